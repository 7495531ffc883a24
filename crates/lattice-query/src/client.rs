//! Client RPC / subscription plane (spec §4.4 "Subscription fabric
//! (client-facing)", §6.4).

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use lattice_types::constants::SUBSCRIPTION_CUTOFF_TIME_SECS;
use lattice_types::error::{Error, Result};
use lattice_types::json::to_json;
use lattice_types::{Account, Block, Height, Timestamp};

fn as_object(v: &Value) -> Result<&Map<String, Value>> {
    v.as_object().ok_or(Error::InvalidMessage)
}

fn str_field<'a>(o: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    o.get(key).and_then(Value::as_str).ok_or(Error::InvalidMessage)
}

fn account_field(o: &Map<String, Value>, key: &str) -> Result<Account> {
    Account::decode(str_field(o, key)?)
}

/// One parsed client request. `request_id` is echoed back verbatim in the
/// reply when present (spec §6.4).
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub request_id: Option<Value>,
    pub action: ClientAction,
}

#[derive(Debug, Clone)]
pub enum ClientAction {
    AccountInfo { account: Account },
    AccountForks { account: Account },
    BlockQueryByHash { hash: lattice_types::BlockHash },
    BlockQueryByHeight { account: Account, height: Height },
    BlockPublish { block: Block },
    AccountSubscribe { account: Account },
    AccountUnsubscribe { account: Account },
    Receivables { account: Account },
    Rewardables { account: Account },
    Stats,
    Peers,
    Elections,
    ElectionInfo { account: Account, height: Height },
    BootstrapStatus,
}

/// Parses one client WebSocket frame per §6.4. `action` is mandatory;
/// `request_id` is optional and passed through untouched so the reply can
/// echo whatever shape the client sent (string, number, or absent).
pub fn parse_request(value: &Value) -> Result<ClientRequest> {
    let obj = as_object(value)?;
    let request_id = obj.get("request_id").cloned();
    let action = match str_field(obj, "action")? {
        "account_info" => ClientAction::AccountInfo {
            account: account_field(obj, "account")?,
        },
        "account_forks" => ClientAction::AccountForks {
            account: account_field(obj, "account")?,
        },
        "block_query" => {
            if let Some(hash) = obj.get("hash").and_then(Value::as_str) {
                ClientAction::BlockQueryByHash {
                    hash: lattice_types::BlockHash::decode_hex(hash)?,
                }
            } else {
                let account = account_field(obj, "account")?;
                let height = obj
                    .get("height")
                    .and_then(Value::as_u64)
                    .ok_or(Error::InvalidMessage)?;
                ClientAction::BlockQueryByHeight { account, height }
            }
        }
        "block_publish" => ClientAction::BlockPublish {
            block: lattice_types::json::from_json(obj.get("block").ok_or(Error::InvalidMessage)?)?,
        },
        "account_subscribe" => ClientAction::AccountSubscribe {
            account: account_field(obj, "account")?,
        },
        "account_unsubscribe" => ClientAction::AccountUnsubscribe {
            account: account_field(obj, "account")?,
        },
        "receivables" => ClientAction::Receivables {
            account: account_field(obj, "account")?,
        },
        "rewardables" => ClientAction::Rewardables {
            account: account_field(obj, "account")?,
        },
        "stats" => ClientAction::Stats,
        "peers" => ClientAction::Peers,
        "elections" => ClientAction::Elections,
        "election_info" => ClientAction::ElectionInfo {
            account: account_field(obj, "account")?,
            height: obj
                .get("height")
                .and_then(Value::as_u64)
                .ok_or(Error::InvalidMessage)?,
        },
        "bootstrap_status" => ClientAction::BootstrapStatus,
        other => return Err(Error::UnknownAction(other.to_string())),
    };
    Ok(ClientRequest { request_id, action })
}

/// Push notification types the client WebSocket (or a configured callback
/// URL) can receive (spec §6.4).
#[derive(Debug, Clone)]
pub enum ClientPush {
    BlockAppend(Block),
    BlockConfirm(Block),
    BlockRollback(Block),
    BlockDrop(Block),
    ForkAdd { account: Account, height: Height },
    ForkDelete { account: Account, height: Height },
    ReceivableInfo { account: Account, source: Block },
}

impl ClientPush {
    pub fn to_json(&self) -> Value {
        match self {
            ClientPush::BlockAppend(b) => json!({"notify": "block_append", "block": to_json(b)}),
            ClientPush::BlockConfirm(b) => json!({"notify": "block_confirm", "block": to_json(b)}),
            ClientPush::BlockRollback(b) => json!({"notify": "block_rollback", "block": to_json(b)}),
            ClientPush::BlockDrop(b) => json!({"notify": "block_drop", "block": to_json(b)}),
            ClientPush::ForkAdd { account, height } => {
                json!({"notify": "fork_add", "account": account.encode(), "height": height})
            }
            ClientPush::ForkDelete { account, height } => {
                json!({"notify": "fork_delete", "account": account.encode(), "height": height})
            }
            ClientPush::ReceivableInfo { account, source } => {
                json!({"notify": "receivable_info", "account": account.encode(), "source": to_json(source)})
            }
        }
    }

    /// The account this push is about, for subscription matching.
    fn subject(&self) -> Account {
        match self {
            ClientPush::BlockAppend(b)
            | ClientPush::BlockConfirm(b)
            | ClientPush::BlockRollback(b)
            | ClientPush::BlockDrop(b) => b.account(),
            ClientPush::ForkAdd { account, .. } | ClientPush::ForkDelete { account, .. } => *account,
            ClientPush::ReceivableInfo { account, .. } => *account,
        }
    }

    /// The link-target account a `send` block's push should also match
    /// against (a subscriber to the destination account cares about
    /// incoming transfers even though the block itself lives on the
    /// sender's chain).
    fn link_subject(&self) -> Option<Account> {
        match self {
            ClientPush::BlockAppend(b) | ClientPush::BlockConfirm(b) => {
                (b.opcode() == lattice_types::Opcode::Send).then(|| b.link_account())
            }
            _ => None,
        }
    }
}

/// Account -> most-recent subscription timestamp. Expires subscriptions
/// that have not been refreshed within `SUBSCRIPTION_CUTOFF_TIME_SECS`.
pub struct Subscriptions {
    last_seen: RwLock<HashMap<Account, Timestamp>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Subscriptions {
            last_seen: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, account: Account, now: Timestamp) {
        self.last_seen.write().insert(account, now);
    }

    pub fn unsubscribe(&self, account: &Account) {
        self.last_seen.write().remove(account);
    }

    fn is_active(&self, account: &Account, now: Timestamp) -> bool {
        self.last_seen
            .read()
            .get(account)
            .is_some_and(|&seen| now - seen <= SUBSCRIPTION_CUTOFF_TIME_SECS as i64)
    }

    /// Drops every subscription whose cutoff has elapsed. Returns the
    /// accounts removed.
    pub fn sweep(&self, now: Timestamp) -> Vec<Account> {
        let mut last_seen = self.last_seen.write();
        let expired: Vec<Account> = last_seen
            .iter()
            .filter(|(_, &seen)| now - seen > SUBSCRIPTION_CUTOFF_TIME_SECS as i64)
            .map(|(a, _)| *a)
            .collect();
        for account in &expired {
            last_seen.remove(account);
        }
        expired
    }

    /// Whether `push` should be delivered given the currently active
    /// subscriptions: either its own account or (for sends) the transfer
    /// destination must be subscribed.
    pub fn matches(&self, push: &ClientPush, now: Timestamp) -> bool {
        if self.is_active(&push.subject(), now) {
            return true;
        }
        match push.link_subject() {
            Some(link) => self.is_active(&link, now),
            None => false,
        }
    }
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new()
    }
}
