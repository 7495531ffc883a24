//! The gateway I/O reactor (spec §5 "One gateway I/O reactor drives a
//! single WebSocket connection"): a single outbound connection, framed
//! with the JSON codec in `lattice_query::codec`, feeding the Block
//! Processor's action queue and driving the outbound query scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use lattice_processor::ActionQueue;
use lattice_query::{
    parse_inbound, query_ack_to_actions, notify_to_action, BlockCache, GatewayAck, GatewayAction,
    Inbound, QueryScheduler, SubscribeEvent,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const QUERY_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct GatewayReactor {
    url: String,
    queue: Arc<ActionQueue>,
    scheduler: Arc<QueryScheduler>,
    cache: Arc<BlockCache>,
    request_id: AtomicU64,
}

impl GatewayReactor {
    pub fn new(
        url: String,
        queue: Arc<ActionQueue>,
        scheduler: Arc<QueryScheduler>,
        cache: Arc<BlockCache>,
    ) -> Self {
        GatewayReactor {
            url,
            queue,
            scheduler,
            cache,
            request_id: AtomicU64::new(1),
        }
    }

    /// Runs forever, reconnecting with a fixed delay on any I/O error —
    /// the gateway is trusted but not assumed always reachable (spec §9
    /// "Upstream trust boundary").
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.run_once().await {
                Ok(()) => tracing::warn!("gateway connection closed; reconnecting"),
                Err(err) => tracing::warn!(%err, "gateway connection failed; reconnecting"),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.url).await?;
        let (mut write, mut read) = ws.split();
        tracing::info!(url = %self.url, "connected to gateway");

        // Re-subscribe to push events on every (re)connect (spec §4.4
        // "On reconnect the core re-subscribes to block_append and
        // block_rollback").
        for event in [SubscribeEvent::BlockAppend, SubscribeEvent::BlockRollback] {
            let action = GatewayAction::EventSubscribe { event };
            write.send(WsMessage::text(action.to_json().to_string())).await?;
        }

        let mut query_poll = tokio::time::interval(QUERY_POLL_INTERVAL);
        loop {
            tokio::select! {
                frame = read.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    let frame = frame?;
                    if let WsMessage::Text(text) = frame {
                        self.handle_inbound(&text).await;
                    }
                }
                _ = query_poll.tick() => {
                    self.send_due_queries(&mut write).await?;
                }
            }
        }
    }

    async fn handle_inbound(&self, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(err) => {
                tracing::debug!(%err, "dropped malformed gateway frame");
                return;
            }
        };
        let inbound = match parse_inbound(&value) {
            Ok(inbound) => inbound,
            Err(err) => {
                tracing::debug!(%err, "dropped unrecognized gateway frame");
                return;
            }
        };

        match inbound {
            Inbound::Notify(notify) => match notify_to_action(notify) {
                Ok((priority, action)) => {
                    // Urgent/High actions (rollbacks, confirmed-fork
                    // retries) always go through; only fresh Normal
                    // traffic backs off under the soft limit (spec §4.1
                    // "so upstream stages can pause ingestion").
                    if priority == lattice_processor::Priority::Normal && self.queue.is_over_soft_limit() {
                        tracing::warn!(
                            "action queue over soft limit; dropping incoming notify, \
                             the block-query scheduler will backfill the gap once it drains"
                        );
                        return;
                    }
                    self.queue.push(priority, action).await;
                }
                Err(err) => tracing::debug!(%err, "dropped invalid notify block"),
            },
            Inbound::Ack(GatewayAck::BlocksQuery { account, status }) => {
                use lattice_query::QueryStatus;
                match status {
                    QueryStatus::Success { blocks } => {
                        self.scheduler.remove(account).await;
                        match query_ack_to_actions(blocks) {
                            Ok((Some((priority, action)), prefetch)) => {
                                let first_hash = match &action {
                                    lattice_processor::Action::AppendBlock { block, .. } => block.hash(),
                                    _ => lattice_types::BlockHash::default(),
                                };
                                self.queue.push(priority, action).await;
                                self.prefetch_into_cache(first_hash, prefetch);
                            }
                            Ok((None, _)) => {}
                            Err(err) => tracing::debug!(%err, "dropped invalid blocks_query ack"),
                        }
                    }
                    QueryStatus::Miss => {
                        self.scheduler.remove(account).await;
                        tracing::debug!(?account, "gateway reported a blocks_query miss");
                    }
                }
            }
            Inbound::Ack(GatewayAck::BlockConfirm { .. }) => {}
        }
    }

    /// Caches every block after the first one a `blocks_query` ack
    /// returned, keyed by the hash of the block immediately preceding it
    /// in the chain, so the processor can pipeline straight through them
    /// after each append instead of round-tripping the gateway again
    /// (spec §4.4 "BlockCache").
    fn prefetch_into_cache(&self, mut previous_hash: lattice_types::BlockHash, prefetch: Vec<lattice_types::Block>) {
        let now = lattice_types::now();
        for block in prefetch {
            let hash = block.hash();
            self.cache.insert(previous_hash, block, now);
            previous_hash = hash;
        }
    }

    async fn send_due_queries<S>(&self, write: &mut S) -> anyhow::Result<()>
    where
        S: futures_util::Sink<WsMessage> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let now = lattice_types::now();
        for request in self.scheduler.due(now).await {
            let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
            let action = GatewayAction::BlocksQuery {
                account: request.account,
                height: request.height,
                count: request.count,
                request_id,
            };
            write.send(WsMessage::text(action.to_json().to_string())).await?;
        }
        Ok(())
    }
}
