//! Bridges fork detection to the election engine. `lattice-election`
//! already depends on `lattice-processor` for its action queue types, so
//! the state machine cannot call back into `Elections` directly without
//! a circular crate dependency; instead this task subscribes to the
//! `ForkAdd` observer event the state machine already emits and
//! registers both competing blocks as election candidates.

use std::sync::Arc;

use lattice_election::Elections;
use lattice_processor::{Event, Observers};

pub async fn run(observers: Observers, elections: Arc<Elections>) {
    let mut events = observers.subscribe();
    loop {
        match events.recv().await {
            Ok(Event::ForkAdd { first, second }) => {
                let now = lattice_types::now();
                elections.add(first, now).await;
                elections.add(second, now).await;
            }
            Ok(Event::PreviousMismatch { existing_head }) => {
                let now = lattice_types::now();
                elections.add(existing_head, now).await;
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "election feed lagged behind the observer channel");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}
