//! Intra-node prefetch and deferred-block stores (spec §4.4
//! "Block-waiting and block-cache").

use std::collections::HashMap;

use parking_lot::Mutex;

use lattice_types::constants::{BLOCK_CACHE_TTL_SECS, BLOCK_WAITING_TTL_SECS};
use lattice_types::{Account, Block, BlockHash, Height, Timestamp};

struct Entry<T> {
    value: T,
    expires_at: Timestamp,
}

/// hash -> pre-fetched next block, consulted right after a successful
/// append so the processor can pipeline the next height without a
/// gateway round-trip.
pub struct BlockCache {
    entries: Mutex<HashMap<BlockHash, Entry<Block>>>,
}

impl BlockCache {
    pub fn new() -> Self {
        BlockCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, hash: BlockHash, block: Block, now: Timestamp) {
        self.entries.lock().insert(
            hash,
            Entry {
                value: block,
                expires_at: now + BLOCK_CACHE_TTL_SECS as i64,
            },
        );
    }

    /// Takes and removes the cached block for `hash`, if present and
    /// unexpired.
    pub fn take(&self, hash: &BlockHash, now: Timestamp) -> Option<Block> {
        let mut entries = self.entries.lock();
        let entry = entries.remove(hash)?;
        if entry.expires_at <= now {
            return None;
        }
        Some(entry.value)
    }

    /// Drops every entry whose TTL has elapsed. Returns the count removed.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}

/// (account, height) -> block deferred because it depends on
/// not-yet-available state (e.g. `GapPrevious`).
pub struct BlockWaiting {
    entries: Mutex<HashMap<(Account, Height), Entry<Block>>>,
}

impl BlockWaiting {
    pub fn new() -> Self {
        BlockWaiting {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, account: Account, height: Height, block: Block, now: Timestamp) {
        self.entries.lock().insert(
            (account, height),
            Entry {
                value: block,
                expires_at: now + BLOCK_WAITING_TTL_SECS as i64,
            },
        );
    }

    pub fn take(&self, account: Account, height: Height, now: Timestamp) -> Option<Block> {
        let mut entries = self.entries.lock();
        let entry = entries.remove(&(account, height))?;
        if entry.expires_at <= now {
            return None;
        }
        Some(entry.value)
    }

    pub fn sweep(&self, now: Timestamp) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}

impl Default for BlockWaiting {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{AirdropBlock, Amount, Common, Opcode, Signature512};

    fn airdrop() -> Block {
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

    #[test]
    fn block_cache_expires_after_ttl() {
        let cache = BlockCache::new();
        let hash = airdrop().hash();
        cache.insert(hash, airdrop(), 0);

        assert!(cache.take(&hash, 0).is_some());

        cache.insert(hash, airdrop(), 0);
        assert!(cache.take(&hash, BLOCK_CACHE_TTL_SECS as i64 + 1).is_none());
    }

    #[test]
    fn block_waiting_sweep_drops_expired_entries() {
        let waiting = BlockWaiting::new();
        waiting.insert(Account::ZERO, 1, airdrop(), 0);
        assert_eq!(waiting.sweep(BLOCK_WAITING_TTL_SECS as i64 + 1), 1);
        assert!(waiting.take(Account::ZERO, 1, 0).is_none());
    }
}
