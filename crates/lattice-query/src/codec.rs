//! Gateway WebSocket message codec (spec §4.4 "Gateway message codec",
//! §6.3). Outbound messages are tagged by an `action` field; inbound
//! replies are tagged by `ack` or `notify`.

use serde_json::{json, Map, Value};

use lattice_processor::{Action, Priority};
use lattice_types::error::{Error, Result};
use lattice_types::json::{from_json, to_json};
use lattice_types::{Account, Block, BlockHash, Height, Signature512, Timestamp};

fn as_object(v: &Value) -> Result<&Map<String, Value>> {
    v.as_object().ok_or(Error::InvalidMessage)
}

fn str_field<'a>(o: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    o.get(key).and_then(Value::as_str).ok_or(Error::InvalidMessage)
}

fn account_field(o: &Map<String, Value>, key: &str) -> Result<Account> {
    Account::decode(str_field(o, key)?)
}

fn block_field(o: &Map<String, Value>, key: &str) -> Result<Block> {
    from_json(o.get(key).ok_or(Error::InvalidMessage)?)
}

/// Which gateway event stream a subscription covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeEvent {
    BlockAppend,
    BlockRollback,
}

impl SubscribeEvent {
    fn as_str(self) -> &'static str {
        match self {
            SubscribeEvent::BlockAppend => "block_append",
            SubscribeEvent::BlockRollback => "block_rollback",
        }
    }
}

/// Messages the core sends out over the gateway link.
#[derive(Debug, Clone)]
pub enum GatewayAction {
    BlocksQuery {
        account: Account,
        height: Height,
        count: u32,
        request_id: u64,
    },
    BlockConfirm {
        representative: Account,
        timestamp: Timestamp,
        signature: Signature512,
        block: Block,
    },
    EventSubscribe {
        event: SubscribeEvent,
    },
}

impl GatewayAction {
    pub fn to_json(&self) -> Value {
        match self {
            GatewayAction::BlocksQuery {
                account,
                height,
                count,
                request_id,
            } => json!({
                "action": "blocks_query",
                "account": account.encode(),
                "height": height,
                "count": count,
                "request_id": request_id,
            }),
            GatewayAction::BlockConfirm {
                representative,
                timestamp,
                signature,
                block,
            } => json!({
                "action": "block_confirm",
                "representative": representative.encode(),
                "timestamp": timestamp,
                "signature": signature.encode_hex(),
                "block": to_json(block),
            }),
            GatewayAction::EventSubscribe { event } => json!({
                "action": "event_subscribe",
                "event": event.as_str(),
            }),
        }
    }
}

/// Result of a `blocks_query` ack (spec §6.3).
#[derive(Debug, Clone)]
pub enum QueryStatus {
    Success { blocks: Vec<Block> },
    Miss,
}

/// Result of a `block_confirm` ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStatus {
    Success,
    Fork,
    Rollback,
}

#[derive(Debug, Clone)]
pub enum GatewayAck {
    BlocksQuery { account: Account, status: QueryStatus },
    BlockConfirm { status: ConfirmStatus, confirmed: bool },
}

#[derive(Debug, Clone)]
pub enum GatewayNotify {
    BlockAppend(Block),
    BlockConfirm(Block),
    BlockRollback(Block),
}

/// A fully parsed inbound gateway message.
#[derive(Debug, Clone)]
pub enum Inbound {
    Ack(GatewayAck),
    Notify(GatewayNotify),
}

/// Parses one inbound gateway frame, dispatching on the `ack`/`notify`
/// discriminator key.
pub fn parse_inbound(value: &Value) -> Result<Inbound> {
    let obj = as_object(value)?;

    if let Some(ack) = obj.get("ack").and_then(Value::as_str) {
        return parse_ack(ack, obj).map(Inbound::Ack);
    }
    if let Some(notify) = obj.get("notify").and_then(Value::as_str) {
        return parse_notify(notify, obj).map(Inbound::Notify);
    }
    Err(Error::InvalidMessage)
}

fn parse_ack(kind: &str, obj: &Map<String, Value>) -> Result<GatewayAck> {
    match kind {
        "blocks_query" => {
            let account = account_field(obj, "account")?;
            let status = match str_field(obj, "status")? {
                "success" => {
                    let blocks = obj
                        .get("blocks")
                        .and_then(Value::as_array)
                        .ok_or(Error::InvalidMessage)?
                        .iter()
                        .map(from_json)
                        .collect::<Result<Vec<Block>>>()?;
                    QueryStatus::Success { blocks }
                }
                "miss" => QueryStatus::Miss,
                _ => return Err(Error::InvalidMessage),
            };
            Ok(GatewayAck::BlocksQuery { account, status })
        }
        "block_confirm" => {
            let status = match str_field(obj, "status")? {
                "success" => ConfirmStatus::Success,
                "fork" => ConfirmStatus::Fork,
                "rollback" => ConfirmStatus::Rollback,
                _ => return Err(Error::InvalidMessage),
            };
            let confirmed = obj
                .get("confirmed")
                .and_then(Value::as_bool)
                .ok_or(Error::InvalidMessage)?;
            Ok(GatewayAck::BlockConfirm { status, confirmed })
        }
        other => Err(Error::UnknownAction(other.to_string())),
    }
}

fn parse_notify(kind: &str, obj: &Map<String, Value>) -> Result<GatewayNotify> {
    let block = block_field(obj, "block")?;
    match kind {
        "block_append" => Ok(GatewayNotify::BlockAppend(block)),
        "block_confirm" => Ok(GatewayNotify::BlockConfirm(block)),
        "block_rollback" => Ok(GatewayNotify::BlockRollback(block)),
        other => Err(Error::UnknownAction(other.to_string())),
    }
}

/// Translates an inbound notify-block payload into the processor action it
/// drives, verifying the block's signature first. `block_append` and a
/// successful `blocks_query` ack enqueue unconfirmed; `block_confirm`
/// enqueues confirmed (spec §4.4).
pub fn notify_to_action(notify: GatewayNotify) -> Result<(Priority, Action)> {
    let (block, confirmed) = match notify {
        GatewayNotify::BlockAppend(b) => (b, false),
        GatewayNotify::BlockConfirm(b) => (b, true),
        GatewayNotify::BlockRollback(b) => {
            b.verify_signature()?;
            return Ok((
                Priority::Normal,
                Action::RollbackBlock {
                    account: b.account(),
                    hash: b.hash(),
                },
            ));
        }
    };
    block.verify_signature()?;
    Ok((
        Priority::Normal,
        Action::AppendBlock {
            block: Box::new(block),
            confirmed,
        },
    ))
}

/// Translates a `blocks_query` ack into processor actions: the first
/// block in the list is enqueued (unconfirmed); the rest are returned
/// separately for the prefetch cache (spec §4.4).
pub fn query_ack_to_actions(blocks: Vec<Block>) -> Result<(Option<(Priority, Action)>, Vec<Block>)> {
    let mut iter = blocks.into_iter();
    let Some(first) = iter.next() else {
        return Ok((None, Vec::new()));
    };
    first.verify_signature()?;
    let action = (
        Priority::Normal,
        Action::AppendBlock {
            block: Box::new(first),
            confirmed: false,
        },
    );
    Ok((Some(action), iter.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{AirdropBlock, Amount, Common, Opcode};

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
    fn blocks_query_action_round_trips_shape() {
        let action = GatewayAction::BlocksQuery {
            account: Account::ZERO,
            height: 5,
            count: 10,
            request_id: 1,
        };
        let v = action.to_json();
        assert_eq!(v["action"], "blocks_query");
        assert_eq!(v["height"], 5);
    }

    #[test]
    fn parses_blocks_query_miss_ack() {
        let v = json!({"ack": "blocks_query", "account": Account::ZERO.encode(), "status": "miss"});
        match parse_inbound(&v).unwrap() {
            Inbound::Ack(GatewayAck::BlocksQuery { status: QueryStatus::Miss, .. }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_block_append_notify() {
        let v = json!({"notify": "block_append", "block": to_json(&airdrop())});
        match parse_inbound(&v).unwrap() {
            Inbound::Notify(GatewayNotify::BlockAppend(_)) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_ack_kind_is_rejected() {
        let v = json!({"ack": "nonsense"});
        assert!(parse_inbound(&v).is_err());
    }
}
