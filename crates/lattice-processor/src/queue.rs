//! The prioritized action queue (spec §4.1). Three priority bands, FIFO
//! within a band; a soft limit lets upstream stages apply back-pressure
//! without the queue itself refusing work.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use tokio::sync::{Mutex, Notify};

use lattice_types::constants::ACTION_QUEUE_SOFT_LIMIT;
use lattice_types::{Account, Block, BlockHash, Height};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal = 0,
    High = 1,
    Urgent = 2,
}

#[derive(Debug, Clone)]
pub enum Action {
    AppendBlock { block: Box<Block>, confirmed: bool },
    RollbackBlock { account: Account, hash: BlockHash },
    QueryCallback { account: Account, height: Height, blocks: Vec<Block> },
}

struct QueuedAction {
    priority: Priority,
    sequence: u64,
    action: Action,
}

impl PartialEq for QueuedAction {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedAction {}

impl PartialOrd for QueuedAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedAction {
    /// `BinaryHeap` is a max-heap: higher priority wins, and for equal
    /// priority the *lower* sequence (older) wins, i.e. FIFO.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

pub struct ActionQueue {
    heap: Mutex<BinaryHeap<QueuedAction>>,
    notify: Notify,
    sequence: AtomicU64,
    len: AtomicUsize,
}

impl ActionQueue {
    pub fn new() -> Self {
        ActionQueue {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            len: AtomicUsize::new(0),
        }
    }

    pub async fn push(&self, priority: Priority, action: Action) {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().await.push(QueuedAction {
            priority,
            sequence,
            action,
        });
        self.len.fetch_add(1, AtomicOrdering::Relaxed);
        self.notify.notify_one();
    }

    /// Blocks until an action is available, then returns the
    /// highest-priority, oldest-queued one.
    pub async fn pop(&self) -> Action {
        loop {
            {
                let mut heap = self.heap.lock().await;
                if let Some(queued) = heap.pop() {
                    self.len.fetch_sub(1, AtomicOrdering::Relaxed);
                    return queued.action;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Lock-free length snapshot for callers outside the processor loop
    /// that need to check back-pressure without awaiting the heap lock
    /// (spec §4.1 "so upstream stages can pause ingestion").
    pub fn is_over_soft_limit(&self) -> bool {
        self.len.load(AtomicOrdering::Relaxed) >= ACTION_QUEUE_SOFT_LIMIT
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{AirdropBlock, Amount, Common, Opcode, Signature512};

    fn dummy_block() -> Block {
        Block::Airdrop(AirdropBlock {
            common: Common {
                opcode: Opcode::Reward,
                credit: 1,
                counter: 1,
                timestamp: 0,
                height: 0,
                account: Account::ZERO,
                previous: BlockHash::default(),
                balance: Amount::ZERO,
                link: [0u8; 32],
                signature: Signature512::default(),
            },
        })
    }

    #[tokio::test]
    async fn higher_priority_pops_first() {
        let queue = ActionQueue::new();
        queue
            .push(
                Priority::Normal,
                Action::AppendBlock {
                    block: Box::new(dummy_block()),
                    confirmed: false,
                },
            )
            .await;
        queue
            .push(
                Priority::Urgent,
                Action::RollbackBlock {
                    account: Account::ZERO,
                    hash: BlockHash::default(),
                },
            )
            .await;

        match queue.pop().await {
            Action::RollbackBlock { .. } => {}
            other => panic!("expected urgent rollback first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let queue = ActionQueue::new();
        for height in 0..3u64 {
            queue
                .push(
                    Priority::Normal,
                    Action::QueryCallback {
                        account: Account::ZERO,
                        height,
                        blocks: vec![],
                    },
                )
                .await;
        }
        for expected in 0..3u64 {
            match queue.pop().await {
                Action::QueryCallback { height, .. } => assert_eq!(height, expected),
                other => panic!("unexpected action {other:?}"),
            }
        }
    }
}
