//! RocksDB-backed implementation of [`crate::DB`] / [`crate::Ledger`].
//! Generalizes the teacher's `database/rocksdb.rs` `Backend` (one CF per
//! logical table, an `OptimisticTransactionDB`, a `DBTransaction` that
//! borrows column-family handles) from chain headers/txs/mempool to
//! accounts/blocks/forks/receivables.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, OptimisticTransactionDB,
    OptimisticTransactionOptions, Options, WriteOptions,
};

use lattice_types::constants::BLOCKS_PER_INDEX;
use lattice_types::encoding::Serializable;
use lattice_types::{Account, Amount, Block, BlockHash, Height, Timestamp};

use crate::account::AccountInfo;
use crate::{Ledger, DB};

const CF_ACCOUNTS: &str = "cf_accounts";
const CF_BLOCKS: &str = "cf_blocks";
const CF_BLOCKS_INDEX: &str = "cf_blocks_index";
const CF_FORKS: &str = "cf_forks";
const CF_RECEIVABLES: &str = "cf_receivables";
const CF_ROLLBACKS: &str = "cf_rollbacks";
const CF_META: &str = "cf_meta";

const ALL_CFS: &[&str] = &[
    CF_ACCOUNTS,
    CF_BLOCKS,
    CF_BLOCKS_INDEX,
    CF_FORKS,
    CF_RECEIVABLES,
    CF_ROLLBACKS,
    CF_META,
];

/// A ledger block as stored on disk: the block, whether it has been
/// confirmed by the election engine, and the forward link to whatever
/// block was appended after it (spec §3 "blocks" table: "serialized
/// block ‖ successor_hash"). `BlockHash::default()` ("all zero") means
/// this block is still the tip of its account's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub block: Block,
    pub confirmed: bool,
    pub successor: BlockHash,
}

impl StoredBlock {
    pub fn successor(&self) -> Option<BlockHash> {
        if self.successor == BlockHash::default() {
            None
        } else {
            Some(self.successor)
        }
    }
}

/// `confirmed(1) ‖ block ‖ successor(32)`, matching §3's table value up
/// to the leading confirmed flag, which the table description doesn't
/// need but every caller here does.
fn encode_stored_block(block: &Block, confirmed: bool, successor: BlockHash) -> Result<Vec<u8>> {
    let mut buf = vec![confirmed as u8];
    block.write(&mut buf)?;
    buf.extend_from_slice(successor.as_bytes());
    Ok(buf)
}

#[derive(Clone)]
pub struct Backend {
    rocksdb: Arc<OptimisticTransactionDB>,
}

impl Backend {
    fn begin_tx(&self) -> DBTransaction<'_> {
        let write_options = WriteOptions::default();
        let tx_options = OptimisticTransactionOptions::default();
        let inner = self.rocksdb.transaction_opt(&write_options, &tx_options);

        let cf = |name: &str| -> &ColumnFamily {
            self.rocksdb
                .cf_handle(name)
                .unwrap_or_else(|| panic!("{name} column family must exist"))
        };

        DBTransaction {
            inner,
            accounts_cf: cf(CF_ACCOUNTS),
            blocks_cf: cf(CF_BLOCKS),
            blocks_index_cf: cf(CF_BLOCKS_INDEX),
            forks_cf: cf(CF_FORKS),
            receivables_cf: cf(CF_RECEIVABLES),
            rollbacks_cf: cf(CF_ROLLBACKS),
            meta_cf: cf(CF_META),
        }
    }

    /// Cold-start reconstruction of the representative-weight cache
    /// (spec §4.2 "a cold-start reconstructs the cache from the
    /// persisted blocks"): scans every `AccountInfo` and seeds the cache
    /// from the heads that carry a representative.
    pub fn rebuild_weight_cache(&self, weights: &crate::weight::WeightCache) -> Result<()> {
        let cf = self
            .rocksdb
            .cf_handle(CF_ACCOUNTS)
            .ok_or_else(|| anyhow!("cf_accounts column family must exist"))?;

        let mut totals: std::collections::HashMap<Account, Amount> = std::collections::HashMap::new();
        for item in self.rocksdb.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let info = AccountInfo::read(&mut value.as_ref())?;
            if info.representative != Account::default() {
                let entry = totals.entry(info.representative).or_insert(Amount::ZERO);
                *entry = entry.checked_add(info.balance).ok_or_else(|| anyhow!("weight overflow"))?;
            }
        }
        for (representative, weight) in totals {
            weights.seed(representative, weight);
        }
        Ok(())
    }
}

impl DB for Backend {
    type Txn<'a> = DBTransaction<'a>;

    fn create_or_open(path: &Path) -> Self {
        tracing::info!(?path, "opening ledger database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_level_compaction_dynamic_level_bytes(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, opts.clone()))
            .collect::<Vec<_>>();

        let rocksdb = OptimisticTransactionDB::open_cf_descriptors(&opts, path, descriptors)
            .expect("ledger database must open");

        Backend {
            rocksdb: Arc::new(rocksdb),
        }
    }

    fn view<F, T>(&self, f: F) -> T
    where
        F: for<'a> FnOnce(&Self::Txn<'a>) -> T,
    {
        let tx = self.begin_tx();
        let result = f(&tx);
        let _ = tx.inner.rollback();
        result
    }

    fn update<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&Self::Txn<'a>) -> Result<T>,
    {
        let tx = self.begin_tx();
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

pub struct DBTransaction<'db> {
    inner: rocksdb::Transaction<'db, OptimisticTransactionDB>,
    accounts_cf: &'db ColumnFamily,
    blocks_cf: &'db ColumnFamily,
    blocks_index_cf: &'db ColumnFamily,
    forks_cf: &'db ColumnFamily,
    receivables_cf: &'db ColumnFamily,
    rollbacks_cf: &'db ColumnFamily,
    meta_cf: &'db ColumnFamily,
}

fn index_bucket(height: Height) -> Height {
    (height / BLOCKS_PER_INDEX) * BLOCKS_PER_INDEX
}

fn index_key(account: &Account, bucket: Height) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[0..32].copy_from_slice(account.as_bytes());
    key[32..40].copy_from_slice(&bucket.to_be_bytes());
    key
}

fn fork_prefix(account: &Account, height: Height) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[0..32].copy_from_slice(account.as_bytes());
    key[32..40].copy_from_slice(&height.to_be_bytes());
    key
}

fn fork_key(account: &Account, height: Height, hash: &BlockHash) -> [u8; 72] {
    let mut key = [0u8; 72];
    key[0..40].copy_from_slice(&fork_prefix(account, height));
    key[40..72].copy_from_slice(hash.as_bytes());
    key
}

fn receivable_key(account: &Account, source: &BlockHash) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[0..32].copy_from_slice(account.as_bytes());
    key[32..64].copy_from_slice(source.as_bytes());
    key
}

impl<'db> DBTransaction<'db> {
    fn commit(self) -> Result<()> {
        self.inner.commit().map_err(|e| anyhow!(e))
    }

    /// Finds the nearer of the floor and ceiling index anchors around
    /// `target_height` (spec §4.2: "choose the nearer of the floor and
    /// ceiling anchor blocks via the sparse index, then walk successor
    /// links forward or previous links backward until height matches"),
    /// then walks to `target_height` following `successor` (forward) or
    /// `previous` (backward) links. At most `BLOCKS_PER_INDEX - 1` blocks
    /// are read.
    fn walk_to_height(
        &self,
        account: &Account,
        target_height: Height,
        head_height: Height,
        head_hash: BlockHash,
    ) -> Result<Option<BlockHash>> {
        let floor_bucket = index_bucket(target_height);
        let ceiling_bucket = floor_bucket + BLOCKS_PER_INDEX;

        let floor_anchor = if floor_bucket <= head_height {
            self.inner
                .get_cf(self.blocks_index_cf, index_key(account, floor_bucket))?
                .map(|bytes| {
                    let mut h = [0u8; 32];
                    h.copy_from_slice(&bytes);
                    (floor_bucket, BlockHash(h))
                })
        } else {
            None
        };

        let ceiling_anchor = if ceiling_bucket <= head_height {
            self.inner
                .get_cf(self.blocks_index_cf, index_key(account, ceiling_bucket))?
                .map(|bytes| {
                    let mut h = [0u8; 32];
                    h.copy_from_slice(&bytes);
                    (ceiling_bucket, BlockHash(h))
                })
        } else {
            Some((head_height, head_hash))
        };

        let (anchor_height, anchor_hash, walk_forward) = match (floor_anchor, ceiling_anchor) {
            (Some((fh, fhash)), Some((ch, chash))) => {
                let floor_distance = target_height - fh;
                let ceiling_distance = ch - target_height;
                if floor_distance <= ceiling_distance {
                    (fh, fhash, true)
                } else {
                    (ch, chash, false)
                }
            }
            (Some((fh, fhash)), None) => (fh, fhash, true),
            (None, Some((ch, chash))) => (ch, chash, false),
            (None, None) => return Ok(None),
        };

        let mut cursor_height = anchor_height;
        let mut cursor_hash = anchor_hash;

        if walk_forward {
            while cursor_height < target_height {
                let stored = self.get_block(&cursor_hash)?.ok_or_else(|| {
                    anyhow!("block {cursor_hash} missing while walking account chain")
                })?;
                cursor_hash = match stored.successor() {
                    Some(next) => next,
                    None => return Ok(None),
                };
                cursor_height += 1;
            }
        } else {
            while cursor_height > target_height {
                let stored = self.get_block(&cursor_hash)?.ok_or_else(|| {
                    anyhow!("block {cursor_hash} missing while walking account chain")
                })?;
                cursor_hash = stored.block.previous();
                cursor_height -= 1;
            }
        }

        if cursor_height == target_height {
            Ok(Some(cursor_hash))
        } else {
            Ok(None)
        }
    }
}

impl<'db> Ledger for DBTransaction<'db> {
    fn get_account(&self, account: &Account) -> Result<Option<AccountInfo>> {
        match self.inner.get_cf(self.accounts_cf, account.as_bytes())? {
            Some(bytes) => Ok(Some(AccountInfo::read(&mut bytes.as_slice())?)),
            None => Ok(None),
        }
    }

    fn put_account(&self, account: &Account, info: &AccountInfo) -> Result<()> {
        let mut buf = Vec::new();
        info.write(&mut buf)?;
        self.inner.put_cf(self.accounts_cf, account.as_bytes(), buf)?;

        if info.head_height % BLOCKS_PER_INDEX == 0 {
            self.inner.put_cf(
                self.blocks_index_cf,
                index_key(account, info.head_height),
                info.head.as_bytes(),
            )?;
        }
        Ok(())
    }

    fn delete_account(&self, account: &Account) -> Result<()> {
        self.inner.delete_cf(self.accounts_cf, account.as_bytes())?;
        Ok(())
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Option<StoredBlock>> {
        match self.inner.get_cf(self.blocks_cf, hash.as_bytes())? {
            Some(bytes) => {
                let confirmed = bytes[0] != 0;
                let successor_start = bytes.len() - 32;
                let mut successor_bytes = [0u8; 32];
                successor_bytes.copy_from_slice(&bytes[successor_start..]);
                let block = lattice_types::encoding::deserialize(&bytes[1..successor_start])?;
                Ok(Some(StoredBlock { block, confirmed, successor: BlockHash(successor_bytes) }))
            }
            None => Ok(None),
        }
    }

    fn put_block(&self, hash: &BlockHash, block: &Block, confirmed: bool) -> Result<()> {
        // A freshly-inserted block has no successor yet; whatever gets
        // appended on top of it links back via `link_successor`.
        let buf = encode_stored_block(block, confirmed, BlockHash::default())?;
        self.inner.put_cf(self.blocks_cf, hash.as_bytes(), buf)?;
        Ok(())
    }

    fn set_block_confirmed(&self, hash: &BlockHash) -> Result<()> {
        let stored = self
            .get_block(hash)?
            .ok_or_else(|| anyhow!("cannot confirm unknown block {hash}"))?;
        let buf = encode_stored_block(&stored.block, true, stored.successor)?;
        self.inner.put_cf(self.blocks_cf, hash.as_bytes(), buf)?;
        Ok(())
    }

    fn link_successor(&self, hash: &BlockHash, successor: BlockHash) -> Result<()> {
        let stored = self
            .get_block(hash)?
            .ok_or_else(|| anyhow!("cannot link successor onto unknown block {hash}"))?;
        let buf = encode_stored_block(&stored.block, stored.confirmed, successor)?;
        self.inner.put_cf(self.blocks_cf, hash.as_bytes(), buf)?;
        Ok(())
    }

    fn delete_block(&self, hash: &BlockHash) -> Result<()> {
        self.inner.delete_cf(self.blocks_cf, hash.as_bytes())?;
        Ok(())
    }

    fn block_hash_by_height(&self, account: &Account, height: Height) -> Result<Option<BlockHash>> {
        let info = match self.get_account(account)? {
            Some(info) => info,
            None => return Ok(None),
        };
        if height > info.head_height {
            return Ok(None);
        }
        if height == info.head_height {
            return Ok(Some(info.head));
        }
        self.walk_to_height(account, height, info.head_height, info.head)
    }

    fn fork_add(&self, account: &Account, height: Height, hash: &BlockHash) -> Result<()> {
        self.inner
            .put_cf(self.forks_cf, fork_key(account, height, hash), [])?;
        Ok(())
    }

    fn fork_remove(&self, account: &Account, height: Height, hash: &BlockHash) -> Result<()> {
        self.inner
            .delete_cf(self.forks_cf, fork_key(account, height, hash))?;
        Ok(())
    }

    fn fork_list(&self, account: &Account, height: Height) -> Result<Vec<BlockHash>> {
        let prefix = fork_prefix(account, height);
        let mut out = Vec::new();
        let iter = self
            .inner
            .iterator_cf(self.forks_cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key[40..72]);
            out.push(BlockHash(hash));
        }
        Ok(out)
    }

    fn receivable_put(&self, account: &Account, source: &BlockHash, amount: Amount) -> Result<()> {
        self.inner.put_cf(
            self.receivables_cf,
            receivable_key(account, source),
            amount.to_be_bytes(),
        )?;
        Ok(())
    }

    fn receivable_delete(&self, account: &Account, source: &BlockHash) -> Result<()> {
        self.inner
            .delete_cf(self.receivables_cf, receivable_key(account, source))?;
        Ok(())
    }

    fn receivable_list(&self, account: &Account) -> Result<Vec<(BlockHash, Amount)>> {
        let prefix = *account.as_bytes();
        let mut out = Vec::new();
        let iter = self.inner.iterator_cf(
            self.receivables_cf,
            IteratorMode::From(&prefix, Direction::Forward),
        );
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key[32..64]);
            let mut amount_bytes = [0u8; 16];
            amount_bytes.copy_from_slice(&value);
            out.push((BlockHash(hash), Amount::from_be_bytes(amount_bytes)));
        }
        Ok(out)
    }

    fn rollback_log_append(
        &self,
        account: &Account,
        from_height: Height,
        to_height: Height,
        timestamp: Timestamp,
    ) -> Result<()> {
        let mut key = Vec::with_capacity(48);
        key.extend_from_slice(account.as_bytes());
        key.extend_from_slice(&from_height.to_be_bytes());
        key.extend_from_slice(&timestamp.to_be_bytes());

        let mut value = Vec::with_capacity(8);
        value.extend_from_slice(&to_height.to_le_bytes());

        self.inner.put_cf(self.rollbacks_cf, key, value)?;
        Ok(())
    }

    fn meta_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.get_cf(self.meta_cf, key)?)
    }

    fn meta_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put_cf(self.meta_cf, key, value)?;
        Ok(())
    }

    fn commit(self) -> Result<()> {
        DBTransaction::commit(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{Amount, Opcode};
    use tempfile::tempdir;

    fn sample_block(account: Account, height: Height, previous: BlockHash) -> Block {
        lattice_types::Block::Airdrop(lattice_types::AirdropBlock {
            common: lattice_types::Common {
                opcode: Opcode::Reward,
                credit: 1,
                counter: 1,
                timestamp: 1_700_000_000 + height as i64,
                height,
                account,
                previous,
                balance: Amount(height as u128 * 10),
                link: [0u8; 32],
                signature: lattice_types::Signature512([0u8; 64]),
            },
        })
    }

    #[test]
    fn account_round_trips_through_storage() {
        let dir = tempdir().unwrap();
        let backend = Backend::create_or_open(dir.path());
        let account = Account([5u8; 32]);
        let info = AccountInfo {
            head: BlockHash([1u8; 32]),
            head_height: 3,
            tail_height: 0,
            open_block: BlockHash([2u8; 32]),
            balance: Amount(1000),
            representative: Account([9u8; 32]),
            block_count: 4,
            confirmed_height: 0,
            confirmed_hash: BlockHash([2u8; 32]),
            modified: 1_700_000_000,
        };

        backend
            .update(|tx| {
                tx.put_account(&account, &info)?;
                Ok(())
            })
            .unwrap();

        let fetched = backend.view(|tx| tx.get_account(&account).unwrap());
        assert_eq!(fetched, Some(info));
    }

    #[test]
    fn block_lookup_by_height_walks_back_from_head() {
        let dir = tempdir().unwrap();
        let backend = Backend::create_or_open(dir.path());
        let account = Account([6u8; 32]);

        backend
            .update(|tx| {
                let mut previous = BlockHash::default();
                for height in 0..5 {
                    let block = sample_block(account, height, previous);
                    let hash = block.hash();
                    tx.put_block(&hash, &block, false)?;
                    previous = hash;
                }
                let info = AccountInfo {
                    head: previous,
                    head_height: 4,
                    tail_height: 0,
                    open_block: BlockHash::default(),
                    balance: Amount(40),
                    representative: account,
                    block_count: 5,
                    confirmed_height: 0,
                    confirmed_hash: BlockHash::default(),
                    modified: 1_700_000_000,
                };
                tx.put_account(&account, &info)?;
                Ok(())
            })
            .unwrap();

        let hash_at_2 = backend
            .view(|tx| tx.block_hash_by_height(&account, 2).unwrap())
            .unwrap();
        let stored = backend.view(|tx| tx.get_block(&hash_at_2).unwrap()).unwrap();
        assert_eq!(stored.block.height(), 2);
    }

    #[test]
    fn fork_entries_are_listed_and_removed() {
        let dir = tempdir().unwrap();
        let backend = Backend::create_or_open(dir.path());
        let account = Account([7u8; 32]);
        let hash_a = BlockHash([0xAA; 32]);
        let hash_b = BlockHash([0xBB; 32]);

        backend
            .update(|tx| {
                tx.fork_add(&account, 10, &hash_a)?;
                tx.fork_add(&account, 10, &hash_b)?;
                Ok(())
            })
            .unwrap();

        let listed = backend.view(|tx| tx.fork_list(&account, 10).unwrap());
        assert_eq!(listed.len(), 2);

        backend
            .update(|tx| tx.fork_remove(&account, 10, &hash_a))
            .unwrap();
        let listed = backend.view(|tx| tx.fork_list(&account, 10).unwrap());
        assert_eq!(listed, vec![hash_b]);
    }

    #[test]
    fn receivables_round_trip() {
        let dir = tempdir().unwrap();
        let backend = Backend::create_or_open(dir.path());
        let account = Account([8u8; 32]);
        let source = BlockHash([0xCC; 32]);

        backend
            .update(|tx| tx.receivable_put(&account, &source, Amount(42)))
            .unwrap();

        let listed = backend.view(|tx| tx.receivable_list(&account).unwrap());
        assert_eq!(listed, vec![(source, Amount(42))]);

        backend
            .update(|tx| tx.receivable_delete(&account, &source))
            .unwrap();
        let listed = backend.view(|tx| tx.receivable_list(&account).unwrap());
        assert!(listed.is_empty());
    }

    #[test]
    fn successor_pointer_round_trips_through_link_and_clear() {
        let dir = tempdir().unwrap();
        let backend = Backend::create_or_open(dir.path());
        let account = Account([9u8; 32]);
        let block = sample_block(account, 0, BlockHash::default());
        let hash = block.hash();
        let successor = BlockHash([0x42; 32]);

        backend
            .update(|tx| {
                tx.put_block(&hash, &block, false)?;
                assert_eq!(tx.get_block(&hash)?.unwrap().successor(), None);

                tx.link_successor(&hash, successor)?;
                assert_eq!(tx.get_block(&hash)?.unwrap().successor(), Some(successor));

                tx.link_successor(&hash, BlockHash::default())?;
                assert_eq!(tx.get_block(&hash)?.unwrap().successor(), None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn block_lookup_prefers_forward_walk_from_the_floor_index_anchor() {
        let dir = tempdir().unwrap();
        let backend = Backend::create_or_open(dir.path());
        let account = Account([10u8; 32]);

        let mut hashes = Vec::new();
        backend
            .update(|tx| {
                let mut previous = BlockHash::default();
                for height in 0..5 {
                    let block = sample_block(account, height, previous);
                    let hash = block.hash();
                    tx.put_block(&hash, &block, false)?;
                    if height > 0 {
                        tx.link_successor(&previous, hash)?;
                    }
                    let info = AccountInfo {
                        head: hash,
                        head_height: height,
                        tail_height: 0,
                        open_block: hashes.first().copied().unwrap_or(hash),
                        balance: Amount(height as u128 * 10),
                        representative: account,
                        block_count: height + 1,
                        confirmed_height: 0,
                        confirmed_hash: BlockHash::default(),
                        modified: 1_700_000_000,
                    };
                    tx.put_account(&account, &info)?;
                    hashes.push(hash);
                    previous = hash;
                }
                Ok(())
            })
            .unwrap();

        // height 0 lands in index bucket 0, written when head_height == 0.
        // head_height is 4, so the ceiling bucket (64) falls back to head;
        // floor and ceiling are equidistant from height 2, and the floor
        // anchor wins ties, exercising the forward/successor walk.
        let hash_at_2 = backend
            .view(|tx| tx.block_hash_by_height(&account, 2).unwrap())
            .unwrap();
        assert_eq!(hash_at_2, hashes[2]);
    }
}
