//! The flat error taxonomy described in spec §7. Block-processor and
//! rollback *outcomes* are not failures in the Rust sense — they drive
//! the state machine and are modeled as an [`Outcome`] rather than
//! through this enum's `Result`-producing variants. This enum covers
//! genuine failures: malformed input, storage I/O, and framing errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // -- input validity --
    #[error("truncated block encoding")]
    TruncatedBlock,
    #[error("invalid block type tag {0}")]
    InvalidBlockType(u8),
    #[error("invalid opcode tag {0}")]
    InvalidOpcode(u8),
    #[error("extensions blob exceeds maximum length ({0} > {1})")]
    ExtensionsTooLong(u32, u32),
    #[error("credit must be >= 1")]
    InvalidCredit,
    #[error("counter must be >= 1 and <= credit * transactions_per_credit")]
    InvalidCounter,
    #[error("block height invalid for its position in the chain")]
    InvalidHeight,
    #[error("block timestamp decreases along the account chain")]
    TimestampDecreased,
    #[error("block timestamp is too far in the future")]
    TimestampInFuture,
    #[error("signature does not verify against the claimed account")]
    InvalidSignature,
    #[error("send block balance did not decrease")]
    InvalidSendBalance,
    #[error("receive-class block balance did not increase as required")]
    InvalidReceiveBalance,
    #[error("malformed account text encoding")]
    InvalidAccountEncoding,
    #[error("malformed hex encoding")]
    InvalidHexEncoding,

    // -- block processor outcomes surfaced as errors to callers outside the
    //    state machine (e.g. client RPC echoing §7's taxonomy) --
    #[error("previous block does not exist")]
    GapPrevious,
    #[error("block previous-hash does not match the current head")]
    PreviousMismatch,
    #[error("fork detected at this account height")]
    Fork,
    #[error("confirmed fork detected (should be unreachable under an honest gateway)")]
    ConfirmedFork,
    #[error("block height below the account's tail; pruned")]
    Pruned,
    #[error("block already applied")]
    Exist,
    #[error("block already confirmed")]
    Confirmed,
    #[error("processing deferred pending a dependency")]
    Waiting,
    #[error("block processor halted after an unrecoverable storage error")]
    Halt,

    // -- rollback outcomes --
    #[error("rollback target account has no AccountInfo")]
    RollbackAccountMiss,
    #[error("rollback target is not the account head")]
    RollbackNonHead,
    #[error("rollback target is already confirmed")]
    RollbackConfirmed,
    #[error("account head pointer references a block missing from storage")]
    LedgerCorrupt,

    // -- storage I/O --
    #[error("ledger storage get failed on table {table}: {source}")]
    StorageGet {
        table: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("ledger storage put failed on table {table}: {source}")]
    StoragePut {
        table: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("ledger storage delete failed on table {table}: {source}")]
    StorageDelete {
        table: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("ledger transaction commit failed: {0}")]
    StorageCommit(anyhow::Error),

    // -- election --
    #[error("election tally failed: {0}")]
    ElectionTally(String),

    // -- gateway / client framing --
    #[error("invalid JSON message: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unrecognized message discriminator")]
    InvalidMessage,
    #[error("unknown client action {0:?}")]
    UnknownAction(String),
    #[error("action queue is over its soft back-pressure limit")]
    Backpressure,
}

impl Error {
    /// Maps an error to the `error_code` integer returned over client RPC
    /// (§6.4). Codes are grouped by band, matching the enumeration order
    /// above; this is intentionally not `#[repr(...)]` on the enum itself
    /// since new variants may be added within a band over time.
    pub fn error_code(&self) -> i32 {
        match self {
            Error::TruncatedBlock => 100,
            Error::InvalidBlockType(_) => 101,
            Error::InvalidOpcode(_) => 102,
            Error::ExtensionsTooLong(_, _) => 103,
            Error::InvalidCredit => 104,
            Error::InvalidCounter => 105,
            Error::InvalidHeight => 106,
            Error::TimestampDecreased => 107,
            Error::TimestampInFuture => 108,
            Error::InvalidSignature => 109,
            Error::InvalidSendBalance => 110,
            Error::InvalidReceiveBalance => 111,
            Error::InvalidAccountEncoding => 112,
            Error::InvalidHexEncoding => 113,

            Error::GapPrevious => 200,
            Error::PreviousMismatch => 201,
            Error::Fork => 202,
            Error::ConfirmedFork => 203,
            Error::Pruned => 204,
            Error::Exist => 205,
            Error::Confirmed => 206,
            Error::Waiting => 207,
            Error::Halt => 208,

            Error::RollbackAccountMiss => 300,
            Error::RollbackNonHead => 301,
            Error::RollbackConfirmed => 302,
            Error::LedgerCorrupt => 303,

            Error::StorageGet { .. } => 400,
            Error::StoragePut { .. } => 401,
            Error::StorageDelete { .. } => 402,
            Error::StorageCommit(_) => 403,

            Error::ElectionTally(_) => 500,

            Error::InvalidJson(_) => 600,
            Error::InvalidMessage => 601,
            Error::UnknownAction(_) => 602,
            Error::Backpressure => 603,
        }
    }

    /// True for the storage-I/O band only (spec §7: "Storage I/O errors
    /// abort the current write transaction ... escalates to HALT").
    /// Every other band — input validity, block-processor/rollback
    /// outcomes, election, gateway framing — is per-block or per-message
    /// and must not stop the processor loop.
    pub fn halts_processor(&self) -> bool {
        matches!(
            self,
            Error::StorageGet { .. }
                | Error::StoragePut { .. }
                | Error::StorageDelete { .. }
                | Error::StorageCommit(_)
                | Error::LedgerCorrupt
        )
    }
}
