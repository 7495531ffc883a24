//! The append and rollback state machines of spec §4.1, evaluated in
//! the exact outcome order the spec lists.

use lattice_store::{AccountInfo, Ledger, WeightCache};
use lattice_types::constants::INVALID_HEIGHT;
use lattice_types::{Account, Amount, Block, BlockHash, Error, Opcode, Result};

use crate::observer::{Event, EventBuffer};
use crate::outcome::{AppendOutcome, RollbackOutcome};

/// Applies opcode-specific side-effects within the same transaction: a
/// send creates a receivable for its destination, a receive consumes
/// one. Other opcodes have no ledger-external effect at this layer.
fn apply_after_append_hook<L: Ledger>(
    tx: &L,
    events: &mut EventBuffer,
    block: &Block,
    previous_balance: Amount,
    block_hash: BlockHash,
    confirmed: bool,
) -> Result<()> {
    match block.opcode() {
        Opcode::Send => {
            let delta = previous_balance
                .checked_sub(block.balance())
                .ok_or(Error::InvalidSendBalance)?;
            tx.receivable_put(&block.link_account(), &block_hash, delta)
                .map_err(|e| Error::StoragePut { table: "receivables", source: e })?;
            if confirmed {
                events.push(Event::ReceivableInfo {
                    account: block.link_account(),
                    source: block.clone(),
                });
            }
        }
        Opcode::Receive => {
            let source = block.link_hash();
            let receivables = tx
                .receivable_list(&block.account())
                .map_err(|e| Error::StorageGet { table: "receivables", source: e })?;
            let matching = receivables
                .into_iter()
                .find(|(hash, _)| *hash == source)
                .ok_or(Error::InvalidReceiveBalance)?;
            let (_, amount) = matching;
            let expected = previous_balance
                .checked_add(amount)
                .ok_or(Error::InvalidReceiveBalance)?;
            if expected != block.balance() {
                return Err(Error::InvalidReceiveBalance);
            }
            tx.receivable_delete(&block.account(), &source)
                .map_err(|e| Error::StorageDelete { table: "receivables", source: e })?;
        }
        _ => {}
    }
    Ok(())
}

/// Walks every already-stored, still-unconfirmed block strictly between
/// `from_height` (exclusive) and `to_height` (exclusive) and emits a
/// `BlockConfirm` for each, in height order, before the caller emits its
/// own event for `to_height` itself (spec §4.4 "Idempotent observer
/// semantics": a confirmation that jumps the watermark forward confirms
/// everything it skipped over, not just the block it named).
fn emit_skipped_confirms<L: Ledger>(
    tx: &L,
    events: &mut EventBuffer,
    account: &Account,
    from_height: Option<lattice_types::Height>,
    to_height: lattice_types::Height,
) -> Result<()> {
    let start = match from_height {
        Some(h) => h + 1,
        None => 0,
    };
    if start >= to_height {
        return Ok(());
    }
    let mut previous_confirmed = from_height.unwrap_or(INVALID_HEIGHT);
    for height in start..to_height {
        let Some(hash) = tx
            .block_hash_by_height(account, height)
            .map_err(|e| Error::StorageGet { table: "blocks_index", source: e })?
        else {
            continue;
        };
        let Some(stored) = tx
            .get_block(&hash)
            .map_err(|e| Error::StorageGet { table: "blocks", source: e })?
        else {
            continue;
        };
        events.push(Event::BlockConfirm {
            block: stored.block,
            previous_confirmed_height: previous_confirmed,
        });
        previous_confirmed = height;
    }
    Ok(())
}

/// Clears any outstanding fork entries for (account, height) once a
/// block has actually landed at that height, and tells observers the
/// fork is resolved (spec §3 lifecycle "[fork entries] deleted when the
/// election resolves"; §8 scenario 4 "fork entry is removed, `ForkDelete`
/// fires").
fn resolve_fork_entries<L: Ledger>(
    tx: &L,
    events: &mut EventBuffer,
    account: &Account,
    height: lattice_types::Height,
    winner: &Block,
) -> Result<()> {
    let entries = tx
        .fork_list(account, height)
        .map_err(|e| Error::StorageGet { table: "forks", source: e })?;
    if entries.is_empty() {
        return Ok(());
    }

    let mut contenders = Vec::new();
    for hash in &entries {
        if let Some(stored) = tx
            .get_block(hash)
            .map_err(|e| Error::StorageGet { table: "blocks", source: e })?
        {
            contenders.push(stored.block);
        }
        tx.fork_remove(account, height, hash)
            .map_err(|e| Error::StorageDelete { table: "forks", source: e })?;
    }

    let first = contenders.into_iter().find(|b| b.hash() != winner.hash()).unwrap_or_else(|| winner.clone());
    events.push(Event::ForkDelete { first, second: winner.clone() });
    Ok(())
}

fn reverse_after_append_hook<L: Ledger>(
    tx: &L,
    block: &Block,
    previous_balance: Amount,
) -> Result<()> {
    match block.opcode() {
        Opcode::Send => {
            tx.receivable_delete(&block.link_account(), &block.hash())
                .map_err(|e| Error::StorageDelete { table: "receivables", source: e })?;
        }
        Opcode::Receive => {
            let amount = block
                .balance()
                .checked_sub(previous_balance)
                .unwrap_or(Amount::ZERO);
            tx.receivable_put(&block.account(), &block.link_hash(), amount)
                .map_err(|e| Error::StoragePut { table: "receivables", source: e })?;
        }
        _ => {}
    }
    Ok(())
}

/// Appends `block` within `tx`. Returns the outcome without committing
/// or rolling back `tx` itself — the caller (the processor loop) owns
/// the transaction boundary so it can feed the existing head to the
/// election engine on `PreviousMismatch`/`Fork` before deciding whether
/// to commit.
pub fn append_block<L: Ledger>(
    tx: &L,
    weights: &WeightCache,
    events: &mut EventBuffer,
    now: lattice_types::Timestamp,
    block: Block,
    confirmed: bool,
) -> Result<AppendOutcome> {
    block.validate_structural()?;
    block.verify_signature()?;

    let account = block.account();
    let existing = tx
        .get_account(&account)
        .map_err(|e| Error::StorageGet { table: "accounts", source: e })?;

    match existing {
        None => {
            if block.height() != 0 {
                return Ok(AppendOutcome::GapPrevious { from_height: 0 });
            }
            block.validate_timestamp(None, now)?;
            let hash = block.hash();
            let confirmed_height = if confirmed { 0 } else { INVALID_HEIGHT };
            let confirmed_hash = if confirmed { hash } else { BlockHash::default() };
            let info = AccountInfo {
                head: hash,
                head_height: 0,
                tail_height: 0,
                open_block: hash,
                balance: block.balance(),
                representative: block.representative().unwrap_or(Account::ZERO),
                block_count: 1,
                confirmed_height,
                confirmed_hash,
                modified: now,
            };
            tx.put_account(&account, &info)
                .map_err(|e| Error::StoragePut { table: "accounts", source: e })?;
            tx.put_block(&hash, &block, confirmed)
                .map_err(|e| Error::StoragePut { table: "blocks", source: e })?;
            apply_after_append_hook(tx, events, &block, Amount::ZERO, hash, confirmed)?;

            if info.representative != Account::ZERO {
                let mut weight_txn = weights.begin();
                weight_txn.add(info.representative, info.balance);
                weight_txn.commit();
            }

            events.push(Event::BlockAppend { block: block.clone(), confirmed });
            if confirmed {
                events.push(Event::BlockConfirm {
                    block,
                    previous_confirmed_height: INVALID_HEIGHT,
                });
            }
            Ok(AppendOutcome::Appended)
        }
        Some(info) => {
            if block.height() > info.head_height + 1 {
                return Ok(AppendOutcome::GapPrevious { from_height: info.head_height + 1 });
            }

            if block.height() == info.head_height + 1 {
                if block.previous() != info.head {
                    let existing_head = tx
                        .get_block(&info.head)
                        .map_err(|e| Error::StorageGet { table: "blocks", source: e })?
                        .map(|stored| stored.block)
                        .ok_or(Error::LedgerCorrupt)?;
                    return Ok(AppendOutcome::PreviousMismatch { existing_head: Box::new(existing_head) });
                }
                return append_onto_head(tx, weights, events, now, block, confirmed, info);
            }

            if block.height() < info.tail_height {
                return Ok(AppendOutcome::Pruned);
            }

            let hash = block.hash();
            let existing_at_height = tx
                .block_hash_by_height(&account, block.height())
                .map_err(|e| Error::StorageGet { table: "blocks_index", source: e })?;

            if existing_at_height == Some(hash) {
                let already_confirmed_to_here = info.confirmed_height != INVALID_HEIGHT
                    && info.confirmed_height >= block.height();
                if confirmed && !already_confirmed_to_here {
                    let baseline = if info.confirmed_height == INVALID_HEIGHT {
                        None
                    } else {
                        Some(info.confirmed_height)
                    };
                    emit_skipped_confirms(tx, events, &account, baseline, block.height())?;

                    let mut raised = info;
                    raised.confirmed_height = block.height();
                    raised.confirmed_hash = hash;
                    tx.put_account(&account, &raised)
                        .map_err(|e| Error::StoragePut { table: "accounts", source: e })?;
                    events.push(Event::BlockConfirm {
                        block,
                        previous_confirmed_height: info.confirmed_height,
                    });
                }
                return Ok(AppendOutcome::Exist);
            }

            if info.confirmed_height != INVALID_HEIGHT && block.height() <= info.confirmed_height {
                return Ok(AppendOutcome::ConfirmedFork);
            }

            if confirmed {
                return Ok(AppendOutcome::ForkConfirmedWin { head_to_rollback: info.head });
            }

            if let Some(local_hash) = existing_at_height {
                tx.fork_add(&account, block.height(), &local_hash)
                    .map_err(|e| Error::StoragePut { table: "forks", source: e })?;
                tx.fork_add(&account, block.height(), &hash)
                    .map_err(|e| Error::StoragePut { table: "forks", source: e })?;
                if let Some(local_stored) = tx
                    .get_block(&local_hash)
                    .map_err(|e| Error::StorageGet { table: "blocks", source: e })?
                {
                    events.push(Event::ForkAdd {
                        first: local_stored.block,
                        second: block,
                    });
                }
            }
            Ok(AppendOutcome::Fork)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn append_onto_head<L: Ledger>(
    tx: &L,
    weights: &WeightCache,
    events: &mut EventBuffer,
    now: lattice_types::Timestamp,
    block: Block,
    confirmed: bool,
    info: AccountInfo,
) -> Result<AppendOutcome> {
    block.validate_send_balance(info.balance)?;

    let previous_timestamp = tx
        .get_block(&info.head)
        .map_err(|e| Error::StorageGet { table: "blocks", source: e })?
        .map(|stored| stored.block.timestamp());
    block.validate_timestamp(previous_timestamp, now)?;

    let hash = block.hash();
    let new_representative = block.representative().unwrap_or(info.representative);

    let mut next = info;
    next.head = hash;
    next.head_height = info.head_height + 1;
    next.balance = block.balance();
    next.representative = new_representative;
    next.block_count += 1;
    next.modified = now;
    if confirmed {
        next.confirmed_height = next.head_height;
        next.confirmed_hash = hash;
    }

    tx.put_block(&hash, &block, confirmed)
        .map_err(|e| Error::StoragePut { table: "blocks", source: e })?;
    tx.link_successor(&info.head, hash)
        .map_err(|e| Error::StoragePut { table: "blocks", source: e })?;
    tx.put_account(&block.account(), &next)
        .map_err(|e| Error::StoragePut { table: "accounts", source: e })?;
    apply_after_append_hook(tx, events, &block, info.balance, hash, confirmed)?;

    if new_representative != info.representative || next.balance != info.balance {
        let mut weight_txn = weights.begin();
        if info.representative != Account::ZERO {
            weight_txn.sub(info.representative, info.balance);
        }
        if new_representative != Account::ZERO {
            weight_txn.add(new_representative, next.balance);
        }
        weight_txn.commit();
    }

    resolve_fork_entries(tx, events, &block.account(), next.head_height, &block)?;

    let previous_confirmed = info.confirmed_height;
    events.push(Event::BlockAppend { block: block.clone(), confirmed });
    if confirmed {
        events.push(Event::BlockConfirm {
            block,
            previous_confirmed_height: previous_confirmed,
        });
    }
    Ok(AppendOutcome::Appended)
}

/// Rolls back `hash`, which must be the account's current, unconfirmed
/// head (spec §4.1 "Rollback state machine").
pub fn rollback_block<L: Ledger>(
    tx: &L,
    weights: &WeightCache,
    events: &mut EventBuffer,
    account: &Account,
    hash: &BlockHash,
) -> Result<RollbackOutcome> {
    let info = match tx
        .get_account(account)
        .map_err(|e| Error::StorageGet { table: "accounts", source: e })?
    {
        Some(info) => info,
        None => return Ok(RollbackOutcome::AccountMiss),
    };

    if info.head != *hash {
        return Ok(RollbackOutcome::NonHead);
    }
    if info.confirmed_height != INVALID_HEIGHT && info.confirmed_height >= info.head_height {
        return Ok(RollbackOutcome::Confirmed);
    }

    let stored = tx
        .get_block(hash)
        .map_err(|e| Error::StorageGet { table: "blocks", source: e })?
        .ok_or(Error::RollbackAccountMiss)?;
    let block = stored.block;

    let previous_balance = if info.head_height == 0 {
        Amount::ZERO
    } else {
        let previous_hash = block.previous();
        let previous_stored = tx
            .get_block(&previous_hash)
            .map_err(|e| Error::StorageGet { table: "blocks", source: e })?
            .ok_or(Error::RollbackNonHead)?;
        previous_stored.block.balance()
    };

    tx.rollback_log_append(account, info.head_height, info.head_height.saturating_sub(1), 0)
        .map_err(|e| Error::StoragePut { table: "rollbacks", source: e })?;
    tx.delete_block(hash)
        .map_err(|e| Error::StorageDelete { table: "blocks", source: e })?;

    reverse_after_append_hook(tx, &block, previous_balance)?;

    if info.representative != Account::ZERO || block.representative().is_some() {
        let mut weight_txn = weights.begin();
        if info.representative != Account::ZERO {
            weight_txn.sub(info.representative, info.balance);
        }
        weight_txn.commit();
    }

    if info.head_height == 0 {
        tx.delete_account(account)
            .map_err(|e| Error::StorageDelete { table: "accounts", source: e })?;
    } else {
        let previous_hash = block.previous();
        let previous_representative = tx
            .get_block(&previous_hash)
            .map_err(|e| Error::StorageGet { table: "blocks", source: e })?
            .and_then(|s| s.block.representative())
            .unwrap_or(Account::ZERO);
        tx.link_successor(&previous_hash, BlockHash::default())
            .map_err(|e| Error::StoragePut { table: "blocks", source: e })?;

        let mut next = info;
        next.head = previous_hash;
        next.head_height = info.head_height - 1;
        next.balance = previous_balance;
        next.representative = previous_representative;
        next.block_count = info.block_count.saturating_sub(1);
        if next.confirmed_height != INVALID_HEIGHT && next.confirmed_height > next.head_height {
            next.confirmed_height = next.head_height;
        }
        tx.put_account(account, &next)
            .map_err(|e| Error::StoragePut { table: "accounts", source: e })?;

        if previous_representative != Account::ZERO {
            let mut weight_txn = weights.begin();
            weight_txn.add(previous_representative, previous_balance);
            weight_txn.commit();
        }
    }

    events.push(Event::BlockRollback { block });
    Ok(RollbackOutcome::RolledBack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use lattice_store::{Backend, DB};
    use lattice_types::{AirdropBlock, Common, Signature512};
    use rand::rngs::OsRng;
    use tempfile::tempdir;

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

    fn harness() -> (Backend, WeightCache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let backend = Backend::create_or_open(dir.path());
        (backend, WeightCache::new(), dir)
    }

    #[test]
    fn linear_append_of_confirmed_genesis() {
        let (backend, weights, _dir) = harness();
        let key = SigningKey::generate(&mut OsRng);
        let block = signed_airdrop(&key, 0, BlockHash::default(), Amount(100));
        let account = block.account();

        let mut events = EventBuffer::new();
        let outcome = backend
            .update(|tx| {
                append_block(tx, &weights, &mut events, 1_700_000_000, block.clone(), true)
                    .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Appended);

        let info = backend.view(|tx| tx.get_account(&account).unwrap()).unwrap();
        assert_eq!(info.head, block.hash());
        assert_eq!(info.head_height, 0);
        assert_eq!(info.confirmed_height, 0);
    }

    #[test]
    fn gap_on_unknown_account_nonzero_height() {
        let (backend, weights, _dir) = harness();
        let key = SigningKey::generate(&mut OsRng);
        let block = signed_airdrop(&key, 2, BlockHash([9u8; 32]), Amount(100));

        let mut events = EventBuffer::new();
        let outcome = backend
            .update(|tx| {
                append_block(tx, &weights, &mut events, 1_700_000_000, block.clone(), false)
                    .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!(outcome, AppendOutcome::GapPrevious { from_height: 0 });
    }

    #[test]
    fn two_blocks_at_same_height_produce_a_fork() {
        let (backend, weights, _dir) = harness();
        let key = SigningKey::generate(&mut OsRng);
        let block_a = signed_airdrop(&key, 0, BlockHash::default(), Amount(100));

        let mut events = EventBuffer::new();
        backend
            .update(|tx| {
                append_block(tx, &weights, &mut events, 1_700_000_000, block_a.clone(), false)
                    .map_err(anyhow::Error::from)
            })
            .unwrap();

        // Same account, same height, different balance -> different hash.
        let mut block_b = block_a.clone();
        if let Block::Airdrop(b) = &mut block_b {
            b.common.balance = Amount(200);
            b.common.signature = Signature512::default();
        }
        let hash_b = block_b.hash();
        let sig_b = key.sign(hash_b.as_bytes());
        if let Block::Airdrop(b) = &mut block_b {
            b.common.signature = Signature512(sig_b.to_bytes());
        }

        let mut events = EventBuffer::new();
        let outcome = backend
            .update(|tx| {
                append_block(tx, &weights, &mut events, 1_700_000_001, block_b.clone(), false)
                    .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Fork);

        let forks = backend
            .view(|tx| tx.fork_list(&block_a.account(), 0).unwrap());
        assert_eq!(forks.len(), 2);
    }

    #[test]
    fn rollback_of_unconfirmed_head_decrements_height() {
        let (backend, weights, _dir) = harness();
        let key = SigningKey::generate(&mut OsRng);
        let genesis = signed_airdrop(&key, 0, BlockHash::default(), Amount(100));
        let account = genesis.account();

        let mut events = EventBuffer::new();
        backend
            .update(|tx| {
                append_block(tx, &weights, &mut events, 1_700_000_000, genesis.clone(), true)
                    .map_err(anyhow::Error::from)
            })
            .unwrap();

        let next = signed_airdrop(&key, 1, genesis.hash(), Amount(150));
        let mut events = EventBuffer::new();
        backend
            .update(|tx| {
                append_block(tx, &weights, &mut events, 1_700_000_001, next.clone(), false)
                    .map_err(anyhow::Error::from)
            })
            .unwrap();

        let mut events = EventBuffer::new();
        let outcome = backend
            .update(|tx| {
                rollback_block(tx, &weights, &mut events, &account, &next.hash())
                    .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!(outcome, RollbackOutcome::RolledBack);

        let info = backend.view(|tx| tx.get_account(&account).unwrap()).unwrap();
        assert_eq!(info.head_height, 0);
        assert_eq!(info.head, genesis.hash());
    }

    #[test]
    fn confirming_a_later_height_also_confirms_the_unconfirmed_blocks_it_skipped() {
        let (backend, weights, _dir) = harness();
        let key = SigningKey::generate(&mut OsRng);
        let genesis = signed_airdrop(&key, 0, BlockHash::default(), Amount(100));
        let account = genesis.account();
        backend
            .update(|tx| {
                append_block(tx, &weights, &mut EventBuffer::new(), 1_700_000_000, genesis.clone(), true)
                    .map_err(anyhow::Error::from)
            })
            .unwrap();

        let h1 = signed_airdrop(&key, 1, genesis.hash(), Amount(150));
        let h2 = signed_airdrop(&key, 2, h1.hash(), Amount(200));
        for (i, block) in [h1.clone(), h2.clone()].into_iter().enumerate() {
            backend
                .update(|tx| {
                    append_block(tx, &weights, &mut EventBuffer::new(), 1_700_000_001 + i as i64, block, false)
                        .map_err(anyhow::Error::from)
                })
                .unwrap();
        }

        // A confirm-notify lands only for height 2: heights 0 and 1 are
        // already on disk but unconfirmed, so this must walk forward and
        // confirm height 1 too before confirming height 2 itself.
        let mut events = EventBuffer::new();
        let outcome = backend
            .update(|tx| {
                append_block(tx, &weights, &mut events, 1_700_000_005, h2.clone(), true)
                    .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Exist);

        let confirmed_heights: Vec<u64> = events
            .as_slice()
            .iter()
            .filter_map(|e| match e {
                Event::BlockConfirm { block, .. } => Some(block.height()),
                _ => None,
            })
            .collect();
        assert_eq!(confirmed_heights, vec![1, 2]);

        let info = backend.view(|tx| tx.get_account(&account).unwrap()).unwrap();
        assert_eq!(info.confirmed_height, 2);
    }
}
