//! Transactional ledger storage. One `rocksdb::OptimisticTransactionDB`
//! with a column family per logical table, mirroring the teacher's
//! `Backend`/`DBTransaction` split (database/rocksdb.rs) generalized
//! from block headers/transactions/mempool to accounts/blocks/forks.

pub mod account;
pub mod backend;
pub mod weight;

pub use account::AccountInfo;
pub use backend::{Backend, DBTransaction, StoredBlock};
pub use weight::{WeightCache, WeightCacheTxn};

use anyhow::Result;

/// Creates or opens a database, and provides isolated read and atomic
/// read-write transactions over it. Mirrors the teacher's `DB` trait
/// (database/mod.rs).
pub trait DB: Send + Sync + 'static {
    type Txn<'a>: Ledger
    where
        Self: 'a;

    fn create_or_open(path: &std::path::Path) -> Self;

    fn view<F, T>(&self, f: F) -> T
    where
        F: for<'a> FnOnce(&Self::Txn<'a>) -> T;

    fn update<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&Self::Txn<'a>) -> Result<T>;
}

/// Read/write surface a block processor transaction needs. Implemented
/// by [`backend::DBTransaction`].
pub trait Ledger {
    fn get_account(&self, account: &lattice_types::Account) -> Result<Option<AccountInfo>>;
    fn put_account(
        &self,
        account: &lattice_types::Account,
        info: &AccountInfo,
    ) -> Result<()>;
    fn delete_account(&self, account: &lattice_types::Account) -> Result<()>;

    fn get_block(
        &self,
        hash: &lattice_types::BlockHash,
    ) -> Result<Option<StoredBlock>>;
    fn put_block(
        &self,
        hash: &lattice_types::BlockHash,
        block: &lattice_types::Block,
        confirmed: bool,
    ) -> Result<()>;
    fn set_block_confirmed(&self, hash: &lattice_types::BlockHash) -> Result<()>;
    /// Rewrites the forward link stored alongside `hash` to point at
    /// `successor` (spec §3 "blocks" table: "serialized block ‖
    /// successor_hash"; §4.1 outcome 4 "Write successor pointer on
    /// previous block"). `successor == BlockHash::default()` clears it,
    /// meaning `hash` is once again the tip of its account's chain.
    fn link_successor(
        &self,
        hash: &lattice_types::BlockHash,
        successor: lattice_types::BlockHash,
    ) -> Result<()>;
    fn delete_block(&self, hash: &lattice_types::BlockHash) -> Result<()>;

    fn block_hash_by_height(
        &self,
        account: &lattice_types::Account,
        height: lattice_types::Height,
    ) -> Result<Option<lattice_types::BlockHash>>;

    fn fork_add(
        &self,
        account: &lattice_types::Account,
        height: lattice_types::Height,
        hash: &lattice_types::BlockHash,
    ) -> Result<()>;
    fn fork_remove(
        &self,
        account: &lattice_types::Account,
        height: lattice_types::Height,
        hash: &lattice_types::BlockHash,
    ) -> Result<()>;
    fn fork_list(
        &self,
        account: &lattice_types::Account,
        height: lattice_types::Height,
    ) -> Result<Vec<lattice_types::BlockHash>>;

    fn receivable_put(
        &self,
        account: &lattice_types::Account,
        source: &lattice_types::BlockHash,
        amount: lattice_types::Amount,
    ) -> Result<()>;
    fn receivable_delete(
        &self,
        account: &lattice_types::Account,
        source: &lattice_types::BlockHash,
    ) -> Result<()>;
    fn receivable_list(
        &self,
        account: &lattice_types::Account,
    ) -> Result<Vec<(lattice_types::BlockHash, lattice_types::Amount)>>;

    fn rollback_log_append(
        &self,
        account: &lattice_types::Account,
        from_height: lattice_types::Height,
        to_height: lattice_types::Height,
        timestamp: lattice_types::Timestamp,
    ) -> Result<()>;

    fn meta_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn meta_put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn commit(self) -> Result<()>;
}
