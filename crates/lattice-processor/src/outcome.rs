//! The append/rollback outcomes of spec §4.1. These are semantic
//! results the state machine branches on, not failures; genuine
//! failures (storage I/O, ledger corruption) instead escape as
//! `Err(lattice_types::Error)` from `append_block`/`rollback_block`,
//! classified by [`lattice_types::Error::halts_processor`].

use lattice_types::{Block, Height};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Genesis or head-extending append succeeded.
    Appended,
    /// No `AccountInfo` and height > 0, or height beyond head + 1:
    /// the missing prefix must be requested from the gateway, starting
    /// at `from_height` (0 for an unknown account, `head_height + 1`
    /// otherwise).
    GapPrevious { from_height: Height },
    /// height = head + 1 but previous does not match the current head.
    /// Per spec §9 Open Questions, the existing head is fed to the
    /// election (not the incoming block): the fork is over who holds
    /// the current height, and the incoming block already lost the
    /// race to extend it.
    PreviousMismatch { existing_head: Box<Block> },
    /// A second, different block at an existing (account, height),
    /// unconfirmed: an election is the right way to resolve it.
    Fork,
    /// A second, different, *confirmed* block at an existing
    /// (account, height): the incoming block must win outright. The
    /// caller rolls back `head_to_rollback` (the account's current
    /// head) and re-enqueues this same append at high priority; if the
    /// fork was below the current head the cascade repeats until the
    /// rolled-back chain reaches the contested height (spec §4.1
    /// outcome 7, "the incoming confirmed block must win").
    ForkConfirmedWin { head_to_rollback: lattice_types::BlockHash },
    /// A fork below the confirmed height; should be unreachable with an
    /// honest gateway.
    ConfirmedFork,
    /// Already applied; confirmed_height possibly raised.
    Exist,
    /// height < tail_height.
    Pruned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    RolledBack,
    AccountMiss,
    NonHead,
    Confirmed,
}
