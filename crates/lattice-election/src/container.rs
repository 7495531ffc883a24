//! The election container: external triggers, the per-election scheduling
//! loop, and the bridge back into the Block Processor for force-append and
//! force-confirm (spec §4.3 "Scheduling loop", "External triggers").

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{Mutex, Notify};

use lattice_processor::{Action, ActionQueue, Priority};
use lattice_store::WeightCache;
use lattice_types::constants::{
    FORK_ELECTION_DELAY_SECS, FORK_ELECTION_INTERVAL_SECS, FORK_ELECTION_ROUNDS_THRESHOLD,
    MIN_CONFIRM_INTERVAL, NON_FORK_ELECTION_DELAY_SECS, NON_FORK_ELECTION_INTERVAL_SECS,
};
use lattice_types::{Account, Block, BlockHash, Height, Signature512, Timestamp};

use crate::tally::tally;
use crate::types::{Election, Vote};

type Key = (Account, Height);

/// Owns every contested-height election and the scheduling queue that
/// drives them. Runs on its own task, mirroring the processor's
/// single-owner-thread-over-a-mutex-guarded-heap shape.
pub struct Elections {
    elections: Mutex<HashMap<Key, Election>>,
    schedule: Mutex<BinaryHeap<Reverse<(Timestamp, Key)>>>,
    notify: Notify,
    weights: Arc<WeightCache>,
    queue: Arc<ActionQueue>,
}

impl Elections {
    pub fn new(weights: Arc<WeightCache>, queue: Arc<ActionQueue>) -> Self {
        Elections {
            elections: Mutex::new(HashMap::new()),
            schedule: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            weights,
            queue,
        }
    }

    /// `Add(blocks)`: register a newly observed candidate, or augment the
    /// election for an already-contested (account, height).
    pub async fn add(&self, block: Block, now: Timestamp) {
        let key = (block.account(), block.height());
        let mut elections = self.elections.lock().await;
        let is_new = !elections.contains_key(&key);
        let election = elections
            .entry(key)
            .or_insert_with(|| Election::new(key.0, key.1, now + NON_FORK_ELECTION_DELAY_SECS as i64));
        election.add_candidate(block);
        drop(elections);

        if is_new {
            let delay = NON_FORK_ELECTION_DELAY_SECS as i64;
            self.schedule_at(key, now + delay).await;
        }
    }

    /// `ProcessConfirm`: record a representative's vote for a candidate.
    pub async fn process_confirm(
        &self,
        rep: Account,
        timestamp: Timestamp,
        signature: Signature512,
        block_hash: BlockHash,
        weight: u64,
        account: Account,
        height: Height,
    ) {
        let key = (account, height);
        let mut elections = self.elections.lock().await;
        let Some(election) = elections.get_mut(&key) else {
            return;
        };

        let entry = election.votes.entry(rep).or_default();
        if let Some(previous) = &entry.last_vote {
            let conflicting = previous.block_hash != block_hash
                && (timestamp - previous.timestamp).abs() < MIN_CONFIRM_INTERVAL;
            if conflicting {
                entry.conflict_found = true;
            }
        }
        entry.weight = weight;
        entry.last_vote = Some(Vote {
            timestamp,
            signature,
            block_hash,
        });

        // A new vote from a heavy rep mid-fork is worth rebroadcasting
        // promptly rather than waiting for the next scheduled wakeup.
        if election.is_fork {
            election.broadcast = true;
        }
    }

    /// `ProcessConflict`: record a representative-equivocation observation
    /// directly, without waiting to see it arise from two `ProcessConfirm`
    /// calls.
    pub async fn process_conflict(
        &self,
        rep: Account,
        _t1: Timestamp,
        _t2: Timestamp,
        _sig1: Signature512,
        _sig2: Signature512,
        account: Account,
        height: Height,
        weight: u64,
    ) {
        let key = (account, height);
        let mut elections = self.elections.lock().await;
        let Some(election) = elections.get_mut(&key) else {
            return;
        };
        let entry = election.votes.entry(rep).or_default();
        entry.conflict_found = true;
        entry.weight = weight;
    }

    async fn schedule_at(&self, key: Key, at: Timestamp) {
        self.schedule.lock().await.push(Reverse((at, key)));
        self.notify.notify_one();
    }

    /// Runs the scheduling loop forever. Each iteration waits for the
    /// next due wakeup, then processes that election's round:
    /// broadcast-or-tally alternation per spec §4.3. `online` is the
    /// weight of representatives seen recently by the gateway link;
    /// the global total comes straight from the ledger's weight cache.
    pub async fn run(self: Arc<Self>, online: u64) {
        loop {
            let next_due = {
                let schedule = self.schedule.lock().await;
                schedule.peek().map(|Reverse((at, _))| *at)
            };

            match next_due {
                None => self.notify.notified().await,
                Some(at) => {
                    let now = lattice_types::now();
                    if at > now {
                        let wait = (at - now).max(0) as u64;
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_secs(wait)) => {}
                            _ = self.notify.notified() => {}
                        }
                        continue;
                    }

                    let key = {
                        let mut schedule = self.schedule.lock().await;
                        schedule.pop().map(|Reverse((_, key))| key)
                    };
                    let Some(key) = key else { continue };
                    if let Some(next) = self.run_round(key, lattice_types::now(), online).await {
                        self.schedule_at(key, next).await;
                    }
                }
            }
        }
    }

    /// Advances one election by a single round, issuing force-append /
    /// force-confirm actions to the processor when warranted, and returns
    /// the next wakeup time. Elections are never retired from the
    /// schedule here; they keep tracking late votes until the Block
    /// Processor reports the height pruned (not yet implemented).
    async fn run_round(&self, key: Key, now: Timestamp, online: u64) -> Option<Timestamp> {
        let total = self.weights.total().0.min(u64::MAX as u128) as u64;
        let mut elections = self.elections.lock().await;
        let election = elections.get_mut(&key)?;

        let result = tally(election, now, online, total);
        election.rounds += 1;
        if election.is_fork {
            election.rounds_fork += 1;
        }

        if result.win {
            election.wins += 1;
        } else {
            election.wins = 0;
        }
        if result.confirm {
            election.confirms += 1;
        } else {
            election.confirms = 0;
        }
        election.winner = result.first;

        let force_append = election.is_fork
            && result.win
            && election.wins >= FORK_ELECTION_ROUNDS_THRESHOLD;
        let force_confirm = election.is_fork
            && result.confirm
            && election.confirms >= FORK_ELECTION_ROUNDS_THRESHOLD;

        let winner_block = result.first.and_then(|hash| election.candidates.get(&hash)).map(|c| c.block.clone());
        drop(elections);

        if let Some(block) = winner_block {
            if force_append {
                self.queue
                    .push(
                        Priority::Urgent,
                        Action::RollbackBlock {
                            account: key.0,
                            hash: block.hash(),
                        },
                    )
                    .await;
                self.queue
                    .push(
                        Priority::Urgent,
                        Action::AppendBlock {
                            block: Box::new(block.clone()),
                            confirmed: force_confirm,
                        },
                    )
                    .await;
            } else if force_confirm {
                self.queue
                    .push(
                        Priority::High,
                        Action::AppendBlock {
                            block: Box::new(block),
                            confirmed: true,
                        },
                    )
                    .await;
            }
        }

        let mut elections = self.elections.lock().await;
        let election = elections.get_mut(&key)?;
        Some(next_wakeup(election, now))
    }
}

/// Computes the next wakeup time per the non-fork/fork delay schedule
/// (spec §4.3 "Scheduling loop").
fn next_wakeup(election: &Election, now: Timestamp) -> Timestamp {
    let base = if election.is_fork {
        FORK_ELECTION_INTERVAL_SECS
    } else {
        NON_FORK_ELECTION_INTERVAL_SECS
    };

    let doublings = if election.is_fork {
        0
    } else {
        (election.rounds / 5).min(8)
    };
    let grown = base.saturating_mul(1u64 << doublings);
    let capped = grown.min(base.saturating_mul(1u64 << 8));

    let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
    now + (capped + jitter) as i64
}

/// Initial scheduling delay for a freshly transitioned fork election,
/// exposed so callers (e.g. `add`) can re-schedule immediately on
/// fork detection rather than waiting for the steady-state interval.
pub fn fork_transition_delay() -> Timestamp {
    FORK_ELECTION_DELAY_SECS as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_processor::ActionQueue;
    use lattice_store::WeightCache;
    use lattice_types::{AirdropBlock, Amount, Common, Opcode};

    fn airdrop(account: Account, balance: u128) -> Block {
        Block::Airdrop(AirdropBlock {
            common: Common {
                opcode: Opcode::Reward,
                credit: 1,
                counter: 1,
                timestamp: 0,
                height: 0,
                account,
                previous: BlockHash::default(),
                balance: Amount(balance),
                link: [0u8; 32],
                signature: Signature512::default(),
            },
        })
    }

    fn elections() -> Elections {
        Elections::new(Arc::new(WeightCache::new()), Arc::new(ActionQueue::new()))
    }

    #[tokio::test]
    async fn add_registers_a_single_candidate_election() {
        let elections = elections();
        let account = Account([7u8; 32]);
        elections.add(airdrop(account, 1), 0).await;

        let guard = elections.elections.lock().await;
        let election = guard.get(&(account, 0)).expect("election registered");
        assert_eq!(election.candidates.len(), 1);
        assert!(!election.is_fork);
    }

    #[tokio::test]
    async fn second_distinct_candidate_marks_the_election_a_fork() {
        let elections = elections();
        let account = Account([9u8; 32]);
        elections.add(airdrop(account, 1), 0).await;
        elections.add(airdrop(account, 2), 0).await;

        let guard = elections.elections.lock().await;
        let election = guard.get(&(account, 0)).expect("election registered");
        assert_eq!(election.candidates.len(), 2);
        assert!(election.is_fork);
    }

    #[tokio::test]
    async fn conflicting_votes_from_one_rep_are_flagged() {
        let elections = elections();
        let account = Account([1u8; 32]);
        let a = airdrop(account, 1);
        let b = airdrop(account, 2);
        elections.add(a.clone(), 0).await;
        elections.add(b.clone(), 0).await;

        let rep = Account([42u8; 32]);
        elections
            .process_confirm(rep, 0, Signature512::default(), a.hash(), 10, account, 0)
            .await;
        elections
            .process_confirm(rep, 10, Signature512::default(), b.hash(), 10, account, 0)
            .await;

        let guard = elections.elections.lock().await;
        let election = guard.get(&(account, 0)).unwrap();
        assert!(election.votes.get(&rep).unwrap().conflict_found);
    }
}
