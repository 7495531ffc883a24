//! The processor loop: single writer, single consumer of the action
//! queue (spec §4.1, §5 "One processor thread owns the action queue and
//! is the sole writer to the ledger store").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lattice_store::{WeightCache, DB};
use lattice_types::{Account, Block, BlockHash, Height};

use crate::observer::{EventBuffer, Observers};
use crate::outcome::AppendOutcome;
use crate::queue::{Action, ActionQueue, Priority};
use crate::state_machine::{append_block, rollback_block};

/// Blocks the processor could not place because their previous block,
/// or the account that owns them, isn't known yet. Drained whenever the
/// dependency shows up (spec §4.4 "BlockWaiting"). Implemented over
/// `lattice_query::BlockWaiting` by the binary, since `lattice-query`
/// itself depends on this crate for `Action`/`Priority`.
pub trait WaitingBlocks: Send + Sync {
    fn defer(&self, account: Account, height: Height, block: Block);
    fn drain_ready(&self, account: &Account, height: Height) -> Vec<Block>;
}

/// The prefetch cache keyed by the hash of the block that precedes the
/// cached one, consulted right after a successful append so the next
/// height can be applied without a gateway round-trip (spec §4.4
/// "BlockCache"). Implemented over `lattice_query::BlockCache`.
pub trait NextBlockCache: Send + Sync {
    fn take_next(&self, after: &BlockHash) -> Option<Block>;
}

/// Requests that the gateway backfill an account's chain starting at
/// `from_height`, up to (and including) `target_height` (spec §4.1
/// outcomes 2/3, "Asynchronously request the missing prefix from the
/// gateway via Sync"). Implemented over `lattice_query::QueryScheduler`.
pub trait SyncRequester: Send + Sync {
    fn request_sync(&self, account: Account, from_height: Height, target_height: Height);
}

pub struct Processor<D: DB> {
    pub db: Arc<D>,
    pub weights: Arc<WeightCache>,
    pub observers: Observers,
    pub queue: Arc<ActionQueue>,
    sync: Option<Arc<dyn SyncRequester>>,
    cache: Option<Arc<dyn NextBlockCache>>,
    waiting: Option<Arc<dyn WaitingBlocks>>,
    /// Blocks dropped for a validity/semantic-band error (spec §7: "the
    /// block is dropped and a counter incremented"), surfaced over
    /// client RPC via `ClientAction::Stats`.
    dropped_blocks: AtomicU64,
}

impl<D: DB> Processor<D> {
    pub fn new(db: Arc<D>, weights: Arc<WeightCache>, observers: Observers, queue: Arc<ActionQueue>) -> Self {
        Processor {
            db,
            weights,
            observers,
            queue,
            sync: None,
            cache: None,
            waiting: None,
            dropped_blocks: AtomicU64::new(0),
        }
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }

    pub fn with_sync(mut self, sync: Arc<dyn SyncRequester>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn NextBlockCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_waiting(mut self, waiting: Arc<dyn WaitingBlocks>) -> Self {
        self.waiting = Some(waiting);
        self
    }

    /// Drains the queue forever. Returns only on a storage-I/O-band
    /// error (spec §7: these "abort the current write transaction ...
    /// escalates to HALT"); every other error band — bad input,
    /// block-processor/rollback outcomes — drops the one block and
    /// keeps the loop running.
    pub async fn run(&self) {
        loop {
            let action = self.queue.pop().await;
            if let Err(()) = self.handle(action).await {
                tracing::error!("processor halted after unrecoverable storage error");
                return;
            }
        }
    }

    async fn handle(&self, action: Action) -> Result<(), ()> {
        match action {
            Action::AppendBlock { block, confirmed } => {
                self.handle_append(*block, confirmed).await
            }
            Action::RollbackBlock { account, hash } => {
                self.handle_rollback(account, hash).await
            }
            Action::QueryCallback { blocks, .. } => {
                for block in blocks {
                    self.queue
                        .push(Priority::Normal, Action::AppendBlock { block: Box::new(block), confirmed: false })
                        .await;
                }
                Ok(())
            }
        }
    }

    async fn handle_append(&self, block: Block, confirmed: bool) -> Result<(), ()> {
        let now = lattice_types::now();
        let db = self.db.clone();
        let weights = self.weights.clone();

        let mut events = EventBuffer::new();
        let outcome = db.update(|tx| {
            append_block(tx, &weights, &mut events, now, block.clone(), confirmed)
                .map_err(anyhow::Error::from)
        });
        if outcome.is_ok() {
            events.flush(&self.observers);
        }

        match outcome {
            Ok(AppendOutcome::GapPrevious { from_height }) => {
                if let Some(sync) = &self.sync {
                    sync.request_sync(block.account(), from_height, block.height());
                }
                if let Some(waiting) = &self.waiting {
                    waiting.defer(block.account(), block.height(), block);
                }
                Ok(())
            }
            Ok(AppendOutcome::Appended) => {
                self.pipeline_from(&block).await;
                Ok(())
            }
            Ok(AppendOutcome::PreviousMismatch { existing_head }) => {
                self.observers.emit(crate::observer::Event::PreviousMismatch { existing_head: *existing_head });
                Ok(())
            }
            Ok(AppendOutcome::ForkConfirmedWin { head_to_rollback }) => {
                // The incoming confirmed block must win (spec §4.1 outcome
                // 7): roll back the account's current head and re-enqueue
                // this same block. If the fork sat below the head, the
                // rollback only peels off the top block; the re-enqueued
                // append lands on `PreviousMismatch`/`Fork` again and
                // repeats until the cascade reaches the contested height.
                self.queue
                    .push(
                        Priority::Urgent,
                        Action::RollbackBlock { account: block.account(), hash: head_to_rollback },
                    )
                    .await;
                self.queue
                    .push(
                        Priority::High,
                        Action::AppendBlock { block: Box::new(block), confirmed: true },
                    )
                    .await;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) => {
                if halts_processor(&err) {
                    tracing::error!(%err, "append transaction aborted on a storage error");
                    Err(())
                } else {
                    self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%err, "dropping block that failed validation");
                    Ok(())
                }
            }
        }
    }

    /// After a successful append, pulls whatever can be applied
    /// immediately without another gateway round-trip: a prefetched
    /// block keyed by the hash just appended, and any block that was
    /// deferred in `BlockWaiting` because it depended on this height.
    async fn pipeline_from(&self, appended: &Block) {
        let account = appended.account();
        let next_height = appended.height() + 1;

        if let Some(cache) = &self.cache {
            if let Some(next) = cache.take_next(&appended.hash()) {
                self.queue
                    .push(Priority::Normal, Action::AppendBlock { block: Box::new(next), confirmed: false })
                    .await;
            }
        }
        if let Some(waiting) = &self.waiting {
            for deferred in waiting.drain_ready(&account, next_height) {
                self.queue
                    .push(Priority::Normal, Action::AppendBlock { block: Box::new(deferred), confirmed: false })
                    .await;
            }
        }
    }

    async fn handle_rollback(&self, account: Account, hash: BlockHash) -> Result<(), ()> {
        let db = self.db.clone();
        let weights = self.weights.clone();

        let mut events = EventBuffer::new();
        let outcome = db.update(|tx| {
            rollback_block(tx, &weights, &mut events, &account, &hash).map_err(anyhow::Error::from)
        });
        if outcome.is_ok() {
            events.flush(&self.observers);
        }

        match outcome {
            Ok(_) => Ok(()),
            Err(err) => {
                if halts_processor(&err) {
                    tracing::error!(%err, "rollback transaction aborted on a storage error");
                    Err(())
                } else {
                    self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%err, "dropping rollback that failed validation");
                    Ok(())
                }
            }
        }
    }
}

/// Only the storage-I/O band (spec §7) halts the processor; every other
/// error — bad input, block-processor/rollback outcomes the state
/// machine surfaced as `Err` rather than driving further — is dropped
/// with the block. A downcast failure means the error didn't come from
/// `lattice_types::Error` at all, which shouldn't happen given
/// `append_block`/`rollback_block`'s signatures; treat it as halting
/// out of caution rather than silently dropping an unrecognized error.
fn halts_processor(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<lattice_types::Error>() {
        Some(err) => err.halts_processor(),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use ed25519_dalek::{Signer, SigningKey};
    use lattice_store::Backend;
    use lattice_types::{AirdropBlock, Amount, Common, Opcode, Signature512};
    use rand::rngs::OsRng;
    use tempfile::tempdir;

    use super::*;

    fn signed_airdrop(key: &SigningKey, height: u64, previous: BlockHash, balance: Amount) -> Block {
        let account = Account(key.verifying_key().to_bytes());
        let mut block = Block::Airdrop(AirdropBlock {
            common: Common {
                opcode: Opcode::Reward,
                credit: 1,
                counter: 1,
                timestamp: 1_700_000_000 + height as i64,
                height,
                account,
                previous,
                balance,
                link: [0u8; 32],
                signature: Signature512::default(),
            },
        });
        let hash = block.hash();
        let signature = key.sign(hash.as_bytes());
        if let Block::Airdrop(b) = &mut block {
            b.common.signature = Signature512(signature.to_bytes());
        }
        block
    }

    #[derive(Default)]
    struct RecordingSync {
        requests: StdMutex<Vec<(Account, Height, Height)>>,
    }

    impl SyncRequester for RecordingSync {
        fn request_sync(&self, account: Account, from_height: Height, target_height: Height) {
            self.requests.lock().unwrap().push((account, from_height, target_height));
        }
    }

    #[derive(Default)]
    struct OneShotCache {
        entries: StdMutex<Vec<(BlockHash, Block)>>,
    }

    impl NextBlockCache for OneShotCache {
        fn take_next(&self, after: &BlockHash) -> Option<Block> {
            let mut entries = self.entries.lock().unwrap();
            let idx = entries.iter().position(|(hash, _)| hash == after)?;
            Some(entries.remove(idx).1)
        }
    }

    #[tokio::test]
    async fn gap_previous_requests_sync_instead_of_halting() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Backend::create_or_open(dir.path()));
        let weights = Arc::new(WeightCache::new());
        let observers = Observers::new(16);
        let queue = Arc::new(ActionQueue::new());
        let sync = Arc::new(RecordingSync::default());

        let processor = Processor::new(Arc::clone(&db), weights, observers, Arc::clone(&queue))
            .with_sync(Arc::clone(&sync) as Arc<dyn SyncRequester>);

        let key = SigningKey::generate(&mut OsRng);
        let block = signed_airdrop(&key, 3, BlockHash([1u8; 32]), Amount(100));
        let account = block.account();

        processor
            .handle(Action::AppendBlock { block: Box::new(block.clone()), confirmed: false })
            .await
            .unwrap();

        let requests = sync.requests.lock().unwrap();
        assert_eq!(requests.as_slice(), &[(account, 0, 3)]);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn successful_append_pulls_the_prefetched_next_block_from_cache() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Backend::create_or_open(dir.path()));
        let weights = Arc::new(WeightCache::new());
        let observers = Observers::new(16);
        let queue = Arc::new(ActionQueue::new());
        let cache = Arc::new(OneShotCache::default());

        let key = SigningKey::generate(&mut OsRng);
        let genesis = signed_airdrop(&key, 0, BlockHash::default(), Amount(100));
        let next = signed_airdrop(&key, 1, genesis.hash(), Amount(150));
        cache.entries.lock().unwrap().push((genesis.hash(), next.clone()));

        let processor = Processor::new(Arc::clone(&db), weights, observers, Arc::clone(&queue))
            .with_cache(Arc::clone(&cache) as Arc<dyn NextBlockCache>);

        processor
            .handle(Action::AppendBlock { block: Box::new(genesis), confirmed: true })
            .await
            .unwrap();

        assert_eq!(queue.len().await, 1);
        match queue.pop().await {
            Action::AppendBlock { block, confirmed } => {
                assert_eq!(block.hash(), next.hash());
                assert!(!confirmed);
            }
            other => panic!("expected the prefetched block to be queued, got {other:?}"),
        }
    }

    /// Spec §8 scenario 4: a locally-held unconfirmed fork candidate loses
    /// once the gateway confirms the other side. The processor rolls the
    /// local head back and lets the confirmed block win.
    #[tokio::test]
    async fn confirmed_fork_rolls_back_the_local_head_and_reapplies_the_winner() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Backend::create_or_open(dir.path()));
        let weights = Arc::new(WeightCache::new());
        let observers = Observers::new(16);
        let mut events = observers.subscribe();
        let queue = Arc::new(ActionQueue::new());

        let processor = Processor::new(Arc::clone(&db), weights, observers, Arc::clone(&queue));

        let key = SigningKey::generate(&mut OsRng);
        let genesis = signed_airdrop(&key, 0, BlockHash::default(), Amount(100));
        let account = genesis.account();
        processor
            .handle(Action::AppendBlock { block: Box::new(genesis.clone()), confirmed: true })
            .await
            .unwrap();

        let local = signed_airdrop(&key, 1, genesis.hash(), Amount(150));
        processor
            .handle(Action::AppendBlock { block: Box::new(local.clone()), confirmed: false })
            .await
            .unwrap();

        let remote = signed_airdrop(&key, 1, genesis.hash(), Amount(200));
        processor
            .handle(Action::AppendBlock { block: Box::new(remote.clone()), confirmed: false })
            .await
            .unwrap();

        // The confirm-notify for `remote` arrives: it must win over the
        // local unconfirmed `local`.
        processor
            .handle(Action::AppendBlock { block: Box::new(remote.clone()), confirmed: true })
            .await
            .unwrap();

        assert_eq!(queue.len().await, 2);
        while queue.len().await > 0 {
            let action = queue.pop().await;
            processor.handle(action).await.unwrap();
        }

        let info = db.view(|tx| tx.get_account(&account).unwrap()).unwrap();
        assert_eq!(info.head, remote.hash());
        assert_eq!(info.head_height, 1);
        assert_eq!(info.confirmed_height, 1);

        let remaining_forks = db.view(|tx| tx.fork_list(&account, 1).unwrap());
        assert!(remaining_forks.is_empty());

        let mut saw_fork_add = false;
        let mut saw_rollback = false;
        let mut saw_fork_delete = false;
        while let Ok(event) = events.try_recv() {
            match event {
                crate::observer::Event::ForkAdd { .. } => saw_fork_add = true,
                crate::observer::Event::BlockRollback { block } => {
                    assert_eq!(block.hash(), local.hash());
                    saw_rollback = true;
                }
                crate::observer::Event::ForkDelete { .. } => saw_fork_delete = true,
                _ => {}
            }
        }
        assert!(saw_fork_add, "expected a ForkAdd event when the fork was first detected");
        assert!(saw_rollback, "expected the local head to be rolled back");
        assert!(saw_fork_delete, "expected a ForkDelete event once the winner landed");
    }

    /// Spec §7: a validity-band error must drop the one block and bump a
    /// counter, not halt the processor loop (§9's trust boundary: a
    /// malicious or buggy gateway forwarding a bad block cannot take the
    /// node down).
    #[tokio::test]
    async fn invalid_signature_drops_the_block_instead_of_halting() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Backend::create_or_open(dir.path()));
        let weights = Arc::new(WeightCache::new());
        let observers = Observers::new(16);
        let queue = Arc::new(ActionQueue::new());
        let processor = Processor::new(Arc::clone(&db), weights, observers, Arc::clone(&queue));

        let key = SigningKey::generate(&mut OsRng);
        let mut forged = signed_airdrop(&key, 0, BlockHash::default(), Amount(100));
        if let Block::Airdrop(b) = &mut forged {
            b.common.signature.0[0] ^= 0xFF;
        }

        let result = processor
            .handle(Action::AppendBlock { block: Box::new(forged), confirmed: false })
            .await;
        assert_eq!(result, Ok(()));
        assert_eq!(processor.dropped_blocks(), 1);

        // the loop keeps working: a legitimately signed block still lands.
        let genesis = signed_airdrop(&key, 0, BlockHash::default(), Amount(100));
        let account = genesis.account();
        processor
            .handle(Action::AppendBlock { block: Box::new(genesis), confirmed: true })
            .await
            .unwrap();

        let info = db.view(|tx| tx.get_account(&account).unwrap()).unwrap();
        assert_eq!(info.head_height, 0);
        assert_eq!(processor.dropped_blocks(), 1);
    }
}
