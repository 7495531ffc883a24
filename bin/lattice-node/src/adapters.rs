//! Adapters implementing `lattice-processor`'s decoupling traits over the
//! concrete `lattice-query` stores. Kept here, rather than in either
//! library crate, because `lattice-query` already depends on
//! `lattice-processor` for `Action`/`Priority`; a direct impl the other
//! way round would make the two crates depend on each other.

use std::sync::Arc;

use lattice_processor::{NextBlockCache, SyncRequester, WaitingBlocks};
use lattice_query::{BlockCache, BlockWaiting, QueryScheduler};
use lattice_types::{Account, Block, BlockHash, Height};

pub struct CacheAdapter(pub Arc<BlockCache>);

impl NextBlockCache for CacheAdapter {
    fn take_next(&self, after: &BlockHash) -> Option<Block> {
        self.0.take(after, lattice_types::now())
    }
}

pub struct WaitingAdapter(pub Arc<BlockWaiting>);

impl WaitingBlocks for WaitingAdapter {
    fn defer(&self, account: Account, height: Height, block: Block) {
        self.0.insert(account, height, block, lattice_types::now());
    }

    fn drain_ready(&self, account: &Account, height: Height) -> Vec<Block> {
        match self.0.take(*account, height, lattice_types::now()) {
            Some(block) => vec![block],
            None => Vec::new(),
        }
    }
}

/// Bridges the processor's synchronous `request_sync` call into the
/// scheduler's async `add`, which is guarded by a `tokio::sync::Mutex`.
pub struct SyncAdapter(pub Arc<QueryScheduler>);

impl SyncRequester for SyncAdapter {
    fn request_sync(&self, account: Account, from_height: Height, target_height: Height) {
        let count = target_height.saturating_sub(from_height).saturating_add(1).min(u32::MAX as u64) as u32;
        let scheduler = Arc::clone(&self.0);
        tokio::spawn(async move {
            scheduler.add(account, from_height, count).await;
        });
    }
}
