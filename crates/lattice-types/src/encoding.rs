//! Binary wire format (spec §6.1). Little-endian throughout except
//! `balance`, which is big-endian per spec.

use std::io::{self, Read, Write};

use crate::block::{AirdropBlock, Block, Common, Opcode, RepresentativeBlock, TransactionBlock};
use crate::error::{Error, Result};
use crate::numbers::{Account, Amount, BlockHash, Signature512};

const BLOCK_TYPE_TRANSACTION: u8 = 0;
const BLOCK_TYPE_REPRESENTATIVE: u8 = 1;
const BLOCK_TYPE_AIRDROP: u8 = 2;

/// Mirrors the teacher's `node_data::Serializable`: a minimal read/write
/// contract plus a handful of primitive helpers so block codecs don't
/// repeat byte-order boilerplate.
pub trait Serializable: Sized {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()>;
    fn read<R: Read>(r: &mut R) -> io::Result<Self>;

    fn read_bytes<R: Read, const N: usize>(r: &mut R) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        r.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn io_invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn write_common_prefix<W: Write>(c: &Common, w: &mut W) -> io::Result<()> {
    w.write_all(&[c.opcode.tag()])?;
    w.write_all(&c.credit.to_le_bytes())?;
    w.write_all(&c.counter.to_le_bytes())?;
    w.write_all(&c.timestamp.to_le_bytes())?;
    w.write_all(&c.height.to_le_bytes())?;
    w.write_all(c.account.as_bytes())?;
    w.write_all(c.previous.as_bytes())?;
    Ok(())
}

fn write_balance_link<W: Write>(c: &Common, w: &mut W) -> io::Result<()> {
    w.write_all(&c.balance.to_be_bytes())?;
    w.write_all(&c.link)?;
    Ok(())
}

fn read_common_prefix<R: Read>(r: &mut R) -> io::Result<(Opcode, u16, u32, i64, u64, Account, BlockHash)> {
    let opcode_tag = u8::from_le_bytes(Serializable::read_bytes::<_, 1>(r)?);
    let opcode = Opcode::from_tag(opcode_tag).map_err(|_| io_invalid("invalid opcode"))?;
    let credit = u16::from_le_bytes(Serializable::read_bytes::<_, 2>(r)?);
    let counter = u32::from_le_bytes(Serializable::read_bytes::<_, 4>(r)?);
    let timestamp = i64::from_le_bytes(Serializable::read_bytes::<_, 8>(r)?);
    let height = u64::from_le_bytes(Serializable::read_bytes::<_, 8>(r)?);
    let account = Account(Serializable::read_bytes::<_, 32>(r)?);
    let previous = BlockHash(Serializable::read_bytes::<_, 32>(r)?);
    Ok((opcode, credit, counter, timestamp, height, account, previous))
}

fn read_balance_link<R: Read>(r: &mut R) -> io::Result<(Amount, [u8; 32])> {
    let balance = Amount::from_be_bytes(Serializable::read_bytes::<_, 16>(r)?);
    let link = Serializable::read_bytes::<_, 32>(r)?;
    Ok((balance, link))
}

/// Writes every field used in the block hash, i.e. everything but the
/// signature (§6.1 "The hash is BLAKE2b-256 of the above concatenation up
/// to but not including the signature").
pub(crate) fn write_hashable_fields(block: &Block, buf: &mut Vec<u8>) {
    match block {
        Block::Transaction(b) => {
            buf.push(BLOCK_TYPE_TRANSACTION);
            write_common_prefix(&b.common, buf).expect("Vec write is infallible");
            buf.extend_from_slice(b.representative.as_bytes());
            write_balance_link(&b.common, buf).expect("Vec write is infallible");
            buf.extend_from_slice(&(b.extensions.len() as u32).to_le_bytes());
            buf.extend_from_slice(&b.extensions);
        }
        Block::Representative(b) => {
            buf.push(BLOCK_TYPE_REPRESENTATIVE);
            write_common_prefix(&b.common, buf).expect("Vec write is infallible");
            write_balance_link(&b.common, buf).expect("Vec write is infallible");
            if b.common.opcode == Opcode::Bind {
                let chain = b.chain.unwrap_or(0);
                buf.extend_from_slice(&chain.to_le_bytes());
            }
        }
        Block::Airdrop(b) => {
            buf.push(BLOCK_TYPE_AIRDROP);
            write_common_prefix(&b.common, buf).expect("Vec write is infallible");
            write_balance_link(&b.common, buf).expect("Vec write is infallible");
        }
    }
}

impl Serializable for Block {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = Vec::new();
        write_hashable_fields(self, &mut buf);
        w.write_all(&buf)?;
        w.write_all(self.signature().as_bytes())?;
        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let type_tag = u8::from_le_bytes(Self::read_bytes::<_, 1>(r)?);
        let block = match type_tag {
            BLOCK_TYPE_TRANSACTION => {
                let (opcode, credit, counter, timestamp, height, account, previous) =
                    read_common_prefix(r)?;
                let representative = Account(Self::read_bytes::<_, 32>(r)?);
                let (balance, link) = read_balance_link(r)?;
                let ext_len = u32::from_le_bytes(Self::read_bytes::<_, 4>(r)?);
                let mut extensions = vec![0u8; ext_len as usize];
                r.read_exact(&mut extensions)?;
                let signature = Signature512(Self::read_bytes::<_, 64>(r)?);
                Block::Transaction(TransactionBlock {
                    common: Common {
                        opcode,
                        credit,
                        counter,
                        timestamp,
                        height,
                        account,
                        previous,
                        balance,
                        link,
                        signature,
                    },
                    representative,
                    extensions,
                })
            }
            BLOCK_TYPE_REPRESENTATIVE => {
                let (opcode, credit, counter, timestamp, height, account, previous) =
                    read_common_prefix(r)?;
                let (balance, link) = read_balance_link(r)?;
                let chain = if opcode == Opcode::Bind {
                    Some(u32::from_le_bytes(Self::read_bytes::<_, 4>(r)?))
                } else {
                    None
                };
                let signature = Signature512(Self::read_bytes::<_, 64>(r)?);
                Block::Representative(RepresentativeBlock {
                    common: Common {
                        opcode,
                        credit,
                        counter,
                        timestamp,
                        height,
                        account,
                        previous,
                        balance,
                        link,
                        signature,
                    },
                    chain,
                })
            }
            BLOCK_TYPE_AIRDROP => {
                let (opcode, credit, counter, timestamp, height, account, previous) =
                    read_common_prefix(r)?;
                let (balance, link) = read_balance_link(r)?;
                let signature = Signature512(Self::read_bytes::<_, 64>(r)?);
                Block::Airdrop(AirdropBlock {
                    common: Common {
                        opcode,
                        credit,
                        counter,
                        timestamp,
                        height,
                        account,
                        previous,
                        balance,
                        link,
                        signature,
                    },
                })
            }
            other => return Err(io_invalid(&format!("unknown block type tag {other}"))),
        };
        Ok(block)
    }
}

pub fn serialize(block: &Block) -> Vec<u8> {
    let mut buf = Vec::new();
    block.write(&mut buf).expect("Vec write is infallible");
    buf
}

pub fn deserialize(bytes: &[u8]) -> Result<Block> {
    let mut cursor = bytes;
    Block::read(&mut cursor).map_err(|_| Error::TruncatedBlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numbers::Account as Acc;

    fn sample_transaction() -> Block {
        Block::Transaction(TransactionBlock {
            common: Common {
                opcode: Opcode::Send,
                credit: 1,
                counter: 1,
                timestamp: 1_700_000_000,
                height: 4,
                account: Acc([1u8; 32]),
                previous: BlockHash([2u8; 32]),
                balance: Amount(900),
                link: [3u8; 32],
                signature: Signature512([0u8; 64]),
            },
            representative: Acc([4u8; 32]),
            extensions: vec![9, 9, 9],
        })
    }

    fn sample_representative_bind() -> Block {
        Block::Representative(RepresentativeBlock {
            common: Common {
                opcode: Opcode::Bind,
                credit: 2,
                counter: 5,
                timestamp: 1_700_000_100,
                height: 0,
                account: Acc([5u8; 32]),
                previous: BlockHash([0u8; 32]),
                balance: Amount(0),
                link: [0u8; 32],
                signature: Signature512([1u8; 64]),
            },
            chain: Some(7),
        })
    }

    fn sample_airdrop() -> Block {
        Block::Airdrop(AirdropBlock {
            common: Common {
                opcode: Opcode::Reward,
                credit: 1,
                counter: 1,
                timestamp: 1_700_000_200,
                height: 1,
                account: Acc([6u8; 32]),
                previous: BlockHash([7u8; 32]),
                balance: Amount(500),
                link: [8u8; 32],
                signature: Signature512([2u8; 64]),
            },
        })
    }

    #[test]
    fn binary_round_trip_transaction() {
        let b = sample_transaction();
        let bytes = serialize(&b);
        let back = deserialize(&bytes).unwrap();
        assert_eq!(b, back);
        assert_eq!(b.hash(), back.hash());
    }

    #[test]
    fn binary_round_trip_representative_bind() {
        let b = sample_representative_bind();
        let bytes = serialize(&b);
        let back = deserialize(&bytes).unwrap();
        assert_eq!(b, back);
    }

    #[test]
    fn binary_round_trip_airdrop() {
        let b = sample_airdrop();
        let bytes = serialize(&b);
        let back = deserialize(&bytes).unwrap();
        assert_eq!(b, back);
    }

    #[test]
    fn representative_non_bind_has_no_chain_field() {
        let mut b = sample_representative_bind();
        if let Block::Representative(r) = &mut b {
            r.common.opcode = Opcode::Change;
            r.chain = None;
        }
        let bytes = serialize(&b);
        // No chain field means 4 fewer bytes than the bind-tagged sibling.
        let bind_bytes = serialize(&sample_representative_bind());
        assert_eq!(bytes.len() + 4, bind_bytes.len());
        let back = deserialize(&bytes).unwrap();
        assert_eq!(b, back);
    }

    #[test]
    fn hash_excludes_signature() {
        let mut b = sample_transaction();
        let hash_before = b.hash();
        if let Block::Transaction(t) = &mut b {
            t.common.signature = Signature512([0xFF; 64]);
        }
        assert_eq!(hash_before, b.hash());
    }
}
