//! The alarm: a dedicated timer thread driving the periodic TTL sweeps
//! described in spec §4.4 ("Block-waiting and block-cache") and §4.4
//! ("Subscription fabric... expire after CUTOFF_TIME"), and spec §9
//! ("Deferred work... aging is a periodic sweep driven by the alarm").

use std::sync::Arc;
use std::time::Duration;

use lattice_query::{BlockCache, BlockWaiting, Subscriptions};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run(cache: Arc<BlockCache>, waiting: Arc<BlockWaiting>, subscriptions: Arc<Subscriptions>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let now = lattice_types::now();
        let cache_dropped = cache.sweep(now);
        let waiting_dropped = waiting.sweep(now);
        let expired_subs = subscriptions.sweep(now);
        if cache_dropped > 0 || waiting_dropped > 0 || !expired_subs.is_empty() {
            tracing::debug!(
                cache_dropped,
                waiting_dropped,
                expired_subscriptions = expired_subs.len(),
                "alarm sweep"
            );
        }
    }
}
