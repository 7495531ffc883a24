//! Outbound block-query scheduling, the gateway wire codec, and the
//! client-facing subscription fabric (spec §4.4).

pub mod cache;
pub mod client;
pub mod codec;
pub mod outbound;

pub use cache::{BlockCache, BlockWaiting};
pub use client::{ClientAction, ClientPush, ClientRequest, Subscriptions};
pub use codec::{
    parse_inbound, query_ack_to_actions, notify_to_action, ConfirmStatus, GatewayAck,
    GatewayAction, GatewayNotify, Inbound, QueryStatus, SubscribeEvent,
};
pub use outbound::{QueryRequest, QueryScheduler};
