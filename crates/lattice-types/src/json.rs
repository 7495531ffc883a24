//! JSON wire form (spec §6.2). A single decoder accepts the binary and
//! JSON forms and normalizes `extensions` / `extensions_raw` to the same
//! in-memory bytes (spec §9 "JSON vs. binary").

use serde_json::{json, Map, Value};

use crate::block::{AirdropBlock, Block, Common, Opcode, RepresentativeBlock, TransactionBlock};
use crate::error::{Error, Result};
use crate::numbers::{Account, Amount, BlockHash, Signature512};

const TYPE_TRANSACTION: &str = "transaction";
const TYPE_REPRESENTATIVE: &str = "representative";
const TYPE_AIRDROP: &str = "airdrop";

fn get_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or(Error::InvalidMessage)
}

fn get_u64_str(obj: &Map<String, Value>, key: &str) -> Result<u64> {
    get_str(obj, key)?.parse().map_err(|_| Error::InvalidMessage)
}

fn get_i64_str(obj: &Map<String, Value>, key: &str) -> Result<i64> {
    get_str(obj, key)?.parse().map_err(|_| Error::InvalidMessage)
}

fn hex_bytes32(s: &str) -> Result<[u8; 32]> {
    let v = hex::decode(s).map_err(|_| Error::InvalidHexEncoding)?;
    if v.len() != 32 {
        return Err(Error::InvalidHexEncoding);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&v);
    Ok(out)
}

pub fn to_json(block: &Block) -> Value {
    let common = block.common();
    let mut obj = Map::new();
    obj.insert(
        "type".into(),
        json!(match block {
            Block::Transaction(_) => TYPE_TRANSACTION,
            Block::Representative(_) => TYPE_REPRESENTATIVE,
            Block::Airdrop(_) => TYPE_AIRDROP,
        }),
    );
    obj.insert("opcode".into(), json!(common.opcode.as_str()));
    obj.insert("credit".into(), json!(common.credit.to_string()));
    obj.insert("counter".into(), json!(common.counter.to_string()));
    obj.insert("timestamp".into(), json!(common.timestamp.to_string()));
    obj.insert("height".into(), json!(common.height.to_string()));
    obj.insert("account".into(), json!(common.account.encode()));
    obj.insert("previous".into(), json!(common.previous.encode_hex()));
    obj.insert("balance".into(), json!(common.balance.0.to_string()));

    let link_hex = hex::encode_upper(common.link);
    let link_value = if common.opcode == Opcode::Send {
        Account(common.link).encode()
    } else {
        link_hex
    };
    obj.insert("link".into(), json!(link_value));
    obj.insert(
        "signature".into(),
        json!(common.signature.encode_hex()),
    );

    match block {
        Block::Transaction(b) => {
            obj.insert("representative".into(), json!(b.representative.encode()));
            obj.insert(
                "extensions_length".into(),
                json!(b.extensions.len().to_string()),
            );
            obj.insert("extensions".into(), json!(hex::encode_upper(&b.extensions)));
        }
        Block::Representative(b) => {
            if let Some(chain) = b.chain {
                obj.insert("chain".into(), json!(chain.to_string()));
                obj.insert("chain_id".into(), json!(chain.to_string()));
            }
        }
        Block::Airdrop(_) => {}
    }

    Value::Object(obj)
}

pub fn from_json(value: &Value) -> Result<Block> {
    let obj = value.as_object().ok_or(Error::InvalidMessage)?;

    let block_type = get_str(obj, "type")?;
    let opcode = Opcode::from_str(get_str(obj, "opcode")?)?;
    let credit: u16 = get_u64_str(obj, "credit")?
        .try_into()
        .map_err(|_| Error::InvalidMessage)?;
    let counter: u32 = get_u64_str(obj, "counter")?
        .try_into()
        .map_err(|_| Error::InvalidMessage)?;
    let timestamp = get_i64_str(obj, "timestamp")?;
    let height = get_u64_str(obj, "height")?;
    let account = Account::decode(get_str(obj, "account")?)?;
    let previous = BlockHash::decode_hex(get_str(obj, "previous")?)?;
    let balance = Amount(
        get_str(obj, "balance")?
            .parse()
            .map_err(|_| Error::InvalidMessage)?,
    );

    let link_text = get_str(obj, "link")?;
    let link = if opcode == Opcode::Send {
        Account::decode(link_text)?.0
    } else {
        hex_bytes32(link_text)?
    };

    let sig_bytes = hex::decode(get_str(obj, "signature")?).map_err(|_| Error::InvalidHexEncoding)?;
    if sig_bytes.len() != 64 {
        return Err(Error::InvalidHexEncoding);
    }
    let mut sig_arr = [0u8; 64];
    sig_arr.copy_from_slice(&sig_bytes);
    let signature = Signature512(sig_arr);

    let common = Common {
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
    };

    match block_type {
        TYPE_TRANSACTION => {
            let representative = Account::decode(get_str(obj, "representative")?)?;
            let extensions = normalize_extensions(obj)?;
            Ok(Block::Transaction(TransactionBlock {
                common,
                representative,
                extensions,
            }))
        }
        TYPE_REPRESENTATIVE => {
            let chain = if opcode == Opcode::Bind {
                Some(
                    obj.get("chain")
                        .or_else(|| obj.get("chain_id"))
                        .and_then(Value::as_str)
                        .ok_or(Error::InvalidMessage)?
                        .parse()
                        .map_err(|_| Error::InvalidMessage)?,
                )
            } else {
                None
            };
            Ok(Block::Representative(RepresentativeBlock { common, chain }))
        }
        TYPE_AIRDROP => Ok(Block::Airdrop(AirdropBlock { common })),
        _ => Err(Error::InvalidMessage),
    }
}

/// `extensions` and `extensions_raw` are two historical names for the same
/// hex-encoded byte string. When both are present they must agree; when
/// only one is present it is used directly; `extensions_length`, if
/// present, must match the decoded length.
fn normalize_extensions(obj: &Map<String, Value>) -> Result<Vec<u8>> {
    let primary = obj.get("extensions").and_then(Value::as_str);
    let raw = obj.get("extensions_raw").and_then(Value::as_str);

    let chosen = match (primary, raw) {
        (Some(a), Some(b)) => {
            if a != b {
                return Err(Error::InvalidMessage);
            }
            a
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => "",
    };

    let bytes = hex::decode(chosen).map_err(|_| Error::InvalidHexEncoding)?;

    if let Some(len_field) = obj.get("extensions_length").and_then(Value::as_str) {
        let declared: usize = len_field.parse().map_err(|_| Error::InvalidMessage)?;
        if declared != bytes.len() {
            return Err(Error::InvalidMessage);
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Common;
    use crate::encoding::Serializable;

    fn sample() -> Block {
        Block::Transaction(TransactionBlock {
            common: Common {
                opcode: Opcode::Send,
                credit: 1,
                counter: 1,
                timestamp: 1_700_000_000,
                height: 4,
                account: Account([1u8; 32]),
                previous: BlockHash([2u8; 32]),
                balance: Amount(900),
                link: Account([3u8; 32]).0,
                signature: Signature512([9u8; 64]),
            },
            representative: Account([4u8; 32]),
            extensions: vec![0xDE, 0xAD, 0xBE, 0xEF],
        })
    }

    #[test]
    fn json_round_trips_to_identical_block() {
        let b = sample();
        let json = to_json(&b);
        let back = from_json(&json).unwrap();
        assert_eq!(b, back);
    }

    #[test]
    fn json_and_binary_hash_agree() {
        let b = sample();
        let json = to_json(&b);
        let from_json_block = from_json(&json).unwrap();

        let mut bytes = Vec::new();
        b.write(&mut bytes).unwrap();
        let from_binary = crate::encoding::deserialize(&bytes).unwrap();

        assert_eq!(from_json_block.hash(), from_binary.hash());
    }

    #[test]
    fn extensions_raw_alone_is_accepted() {
        let b = sample();
        let mut json = to_json(&b);
        let obj = json.as_object_mut().unwrap();
        let ext = obj.remove("extensions").unwrap();
        obj.insert("extensions_raw".into(), ext);
        let back = from_json(&json).unwrap();
        assert_eq!(b, back);
    }

    #[test]
    fn conflicting_extensions_fields_are_rejected() {
        let b = sample();
        let mut json = to_json(&b);
        let obj = json.as_object_mut().unwrap();
        obj.insert("extensions_raw".into(), serde_json::json!("FF"));
        assert!(from_json(&json).is_err());
    }
}
