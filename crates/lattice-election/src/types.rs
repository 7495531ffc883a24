//! Election bookkeeping types (spec §4.3 "Entities").

use std::collections::HashMap;

use lattice_types::{Account, Block, BlockHash, Signature512, Timestamp};

/// A single representative's vote for a candidate block.
#[derive(Debug, Clone)]
pub struct Vote {
    pub timestamp: Timestamp,
    pub signature: Signature512,
    pub block_hash: BlockHash,
}

/// Per-representative tally state for one election.
#[derive(Debug, Clone, Default)]
pub struct RepVoteInfo {
    pub conflict_found: bool,
    pub weight: u64,
    pub last_vote: Option<Vote>,
}

/// A candidate block under contention, plus how many times it has been
/// observed (e.g. returned by more than one peer's query response).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub block: Block,
    pub seen_count: u32,
}

/// One contested (account, height) slot and everything needed to decide
/// which candidate the local node treats as canonical.
#[derive(Debug, Clone)]
pub struct Election {
    pub account: Account,
    pub height: u64,
    pub candidates: HashMap<BlockHash, Candidate>,
    pub votes: HashMap<Account, RepVoteInfo>,
    pub rounds: u32,
    pub rounds_fork: u32,
    pub wins: u32,
    pub confirms: u32,
    pub winner: Option<BlockHash>,
    pub is_fork: bool,
    pub broadcast: bool,
    pub wakeup: Timestamp,
}

impl Election {
    pub fn new(account: Account, height: u64, wakeup: Timestamp) -> Self {
        Election {
            account,
            height,
            candidates: HashMap::new(),
            votes: HashMap::new(),
            rounds: 0,
            rounds_fork: 0,
            wins: 0,
            confirms: 0,
            winner: None,
            is_fork: false,
            broadcast: false,
            wakeup,
        }
    }

    pub fn add_candidate(&mut self, block: Block) {
        let hash = block.hash();
        self.candidates
            .entry(hash)
            .and_modify(|c| c.seen_count += 1)
            .or_insert(Candidate {
                block,
                seen_count: 1,
            });
        if self.candidates.len() > 1 {
            self.is_fork = true;
        }
    }
}
