//! Per-account chain-tip state kept in the `accounts` column family.

use std::io::{self, Read, Write};

use lattice_types::encoding::Serializable;
use lattice_types::{Account, Amount, BlockHash, Height, Timestamp};

/// Everything the processor needs to validate and append the next block
/// for an account without walking the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub head: BlockHash,
    pub head_height: Height,
    /// Lowest height still retained for this account. Always 0 today —
    /// no pruning operation advances it yet — but kept as a field since
    /// block lookup and the PRUNED outcome are defined in terms of it.
    pub tail_height: Height,
    pub open_block: BlockHash,
    pub balance: Amount,
    pub representative: Account,
    pub block_count: u64,
    /// Height of the highest block on this account's chain known to be
    /// confirmed. [`lattice_types::constants::INVALID_HEIGHT`] if none.
    pub confirmed_height: Height,
    pub confirmed_hash: BlockHash,
    pub modified: Timestamp,
}

impl Serializable for AccountInfo {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(self.head.as_bytes())?;
        w.write_all(&self.head_height.to_le_bytes())?;
        w.write_all(&self.tail_height.to_le_bytes())?;
        w.write_all(self.open_block.as_bytes())?;
        w.write_all(&self.balance.to_be_bytes())?;
        w.write_all(self.representative.as_bytes())?;
        w.write_all(&self.block_count.to_le_bytes())?;
        w.write_all(&self.confirmed_height.to_le_bytes())?;
        w.write_all(self.confirmed_hash.as_bytes())?;
        w.write_all(&self.modified.to_le_bytes())?;
        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(AccountInfo {
            head: BlockHash(Self::read_bytes::<_, 32>(r)?),
            head_height: Height::from_le_bytes(Self::read_bytes::<_, 8>(r)?),
            tail_height: Height::from_le_bytes(Self::read_bytes::<_, 8>(r)?),
            open_block: BlockHash(Self::read_bytes::<_, 32>(r)?),
            balance: Amount::from_be_bytes(Self::read_bytes::<_, 16>(r)?),
            representative: Account(Self::read_bytes::<_, 32>(r)?),
            block_count: u64::from_le_bytes(Self::read_bytes::<_, 8>(r)?),
            confirmed_height: Height::from_le_bytes(Self::read_bytes::<_, 8>(r)?),
            confirmed_hash: BlockHash(Self::read_bytes::<_, 32>(r)?),
            modified: Timestamp::from_le_bytes(Self::read_bytes::<_, 8>(r)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_info_round_trips() {
        let info = AccountInfo {
            head: BlockHash([1u8; 32]),
            head_height: 10,
            tail_height: 0,
            open_block: BlockHash([2u8; 32]),
            balance: Amount(500),
            representative: Account([3u8; 32]),
            block_count: 11,
            confirmed_height: 9,
            confirmed_hash: BlockHash([4u8; 32]),
            modified: 1_700_000_000,
        };
        let mut buf = Vec::new();
        info.write(&mut buf).unwrap();
        let back = AccountInfo::read(&mut buf.as_slice()).unwrap();
        assert_eq!(info, back);
    }
}
