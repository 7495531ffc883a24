//! In-memory representative weight cache. The ledger's `DBTransaction`
//! commit path is the only writer; this cache mirrors rocksdb state so
//! the election engine never has to touch storage on its hot path.

use std::collections::HashMap;

use parking_lot::RwLock;

use lattice_types::{Account, Amount};

struct Inner {
    weights: HashMap<Account, Amount>,
    total: Amount,
}

pub struct WeightCache {
    inner: RwLock<Inner>,
}

impl WeightCache {
    pub fn new() -> Self {
        WeightCache {
            inner: RwLock::new(Inner {
                weights: HashMap::new(),
                total: Amount::ZERO,
            }),
        }
    }

    pub fn weight(&self, representative: &Account) -> Amount {
        self.inner
            .read()
            .weights
            .get(representative)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    pub fn total(&self) -> Amount {
        self.inner.read().total
    }

    pub fn seed(&self, representative: Account, weight: Amount) {
        let mut inner = self.inner.write();
        let total = inner.total;
        inner.total = total.checked_add(weight).expect("total weight overflow");
        inner.weights.insert(representative, weight);
    }

    /// Starts a staged set of delta operations. Nothing in the cache
    /// changes until [`WeightCacheTxn::commit`] is called, so a dropped
    /// (never committed) transaction is a no-op rollback.
    pub fn begin(&self) -> WeightCacheTxn<'_> {
        WeightCacheTxn {
            cache: self,
            log: Vec::new(),
        }
    }
}

impl Default for WeightCache {
    fn default() -> Self {
        Self::new()
    }
}

enum Op {
    Add(Account, Amount),
    Sub(Account, Amount),
}

pub struct WeightCacheTxn<'a> {
    cache: &'a WeightCache,
    log: Vec<Op>,
}

impl<'a> WeightCacheTxn<'a> {
    pub fn add(&mut self, representative: Account, delta: Amount) {
        if delta.0 != 0 {
            self.log.push(Op::Add(representative, delta));
        }
    }

    pub fn sub(&mut self, representative: Account, delta: Amount) {
        if delta.0 != 0 {
            self.log.push(Op::Sub(representative, delta));
        }
    }

    /// An `add` that overflows or a `sub` that would underflow is a
    /// programming bug (spec §4.2): the debug build asserts so the bug is
    /// caught in testing, the release build clamps instead of panicking
    /// so a live node degrades rather than crashing.
    pub fn commit(self) {
        let mut inner = self.cache.inner.write();
        for op in self.log {
            match op {
                Op::Add(rep, delta) => {
                    let entry = inner.weights.entry(rep).or_insert(Amount::ZERO);
                    debug_assert!(entry.checked_add(delta).is_some(), "representative weight overflow");
                    *entry = entry.checked_add(delta).unwrap_or(Amount(u128::MAX));
                    debug_assert!(inner.total.checked_add(delta).is_some(), "total weight overflow");
                    inner.total = inner.total.checked_add(delta).unwrap_or(Amount(u128::MAX));
                }
                Op::Sub(rep, delta) => {
                    let entry = inner.weights.entry(rep).or_insert(Amount::ZERO);
                    debug_assert!(entry.checked_sub(delta).is_some(), "representative weight underflow");
                    *entry = entry.checked_sub(delta).unwrap_or(Amount::ZERO);
                    debug_assert!(inner.total.checked_sub(delta).is_some(), "total weight underflow");
                    inner.total = inner.total.checked_sub(delta).unwrap_or(Amount::ZERO);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_txn_leaves_cache_untouched() {
        let cache = WeightCache::new();
        let rep = Account([1u8; 32]);
        cache.seed(rep, Amount(100));

        let mut txn = cache.begin();
        txn.add(rep, Amount(50));
        drop(txn);

        assert_eq!(cache.weight(&rep), Amount(100));
    }

    #[test]
    fn committed_txn_updates_weight_and_total() {
        let cache = WeightCache::new();
        let rep = Account([2u8; 32]);
        cache.seed(rep, Amount(100));

        let mut txn = cache.begin();
        txn.add(rep, Amount(50));
        txn.commit();

        assert_eq!(cache.weight(&rep), Amount(150));
        assert_eq!(cache.total(), Amount(150));
    }

    #[test]
    fn representative_change_moves_weight_between_accounts() {
        let cache = WeightCache::new();
        let old_rep = Account([3u8; 32]);
        let new_rep = Account([4u8; 32]);
        cache.seed(old_rep, Amount(200));

        let mut txn = cache.begin();
        txn.sub(old_rep, Amount(200));
        txn.add(new_rep, Amount(200));
        txn.commit();

        assert_eq!(cache.weight(&old_rep), Amount::ZERO);
        assert_eq!(cache.weight(&new_rep), Amount(200));
        assert_eq!(cache.total(), Amount(200));
    }
}
