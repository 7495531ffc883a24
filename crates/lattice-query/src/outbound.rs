//! Outbound block-query scheduling (spec §4.4 "Outbound block query
//! engine"). A bounded-concurrency worker tracks pending requests (not yet
//! sent) and in-flight requests (sent, awaiting an ack or a retry).

use std::collections::HashMap;

use tokio::sync::Mutex;

use lattice_types::constants::{
    QUERY_BACKOFF_CEILING_SECS, QUERY_BACKOFF_FLOOR_SECS, QUERY_CONCURRENCY,
};
use lattice_types::{Account, Height, Timestamp};

#[derive(Debug, Clone, Copy)]
struct Pending {
    height: Height,
    count: u32,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    height: Height,
    count: u32,
    retries: u32,
    wakeup: Timestamp,
}

/// One outstanding request ready to be sent as a `blocks_query` gateway
/// action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRequest {
    pub account: Account,
    pub height: Height,
    pub count: u32,
}

pub struct QueryScheduler {
    pending: Mutex<HashMap<Account, Pending>>,
    in_flight: Mutex<HashMap<Account, InFlight>>,
}

impl QueryScheduler {
    pub fn new() -> Self {
        QueryScheduler {
            pending: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// `Add(account, height, count)`: merges into a pending entry,
    /// lowering the requested height if the new request starts earlier.
    pub async fn add(&self, account: Account, height: Height, count: u32) {
        let mut pending = self.pending.lock().await;
        pending
            .entry(account)
            .and_modify(|p| {
                p.height = p.height.min(height);
                p.count = p.count.max(count);
            })
            .or_insert(Pending { height, count });
    }

    /// `Remove(account)`: an ack for this account's in-flight request
    /// arrived; cancel the retry timer and free the concurrency slot. At
    /// most one request is ever in flight per account, so the ack alone
    /// (it carries no height, per spec §6.3) disambiguates which entry to
    /// drop.
    pub async fn remove(&self, account: Account) {
        self.in_flight.lock().await.remove(&account);
    }

    /// Pulls every in-flight entry whose backoff has elapsed (for retry)
    /// plus as many pending entries as there are free concurrency slots,
    /// promoting the latter to in-flight. Returns the requests to send.
    pub async fn due(&self, now: Timestamp) -> Vec<QueryRequest> {
        let mut in_flight = self.in_flight.lock().await;

        let mut out = Vec::new();
        for (account, entry) in in_flight.iter().filter(|(_, e)| e.wakeup <= now) {
            out.push(QueryRequest {
                account: *account,
                height: entry.height,
                count: entry.count,
            });
        }

        let free_slots = QUERY_CONCURRENCY.saturating_sub(in_flight.len());
        if free_slots > 0 {
            let mut pending = self.pending.lock().await;
            let promote: Vec<Account> = pending.keys().take(free_slots).copied().collect();
            for account in promote {
                if let Some(p) = pending.remove(&account) {
                    out.push(QueryRequest {
                        account,
                        height: p.height,
                        count: p.count,
                    });
                    in_flight.insert(
                        account,
                        InFlight {
                            height: p.height,
                            count: p.count,
                            retries: 0,
                            wakeup: backoff_wakeup(now, 0),
                        },
                    );
                }
            }
        }

        out
    }

    /// Bumps the retry count and backoff wakeup for an in-flight request
    /// that is due again (no ack arrived in time).
    pub async fn reschedule(&self, account: Account, now: Timestamp) {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(entry) = in_flight.get_mut(&account) {
            entry.retries += 1;
            entry.wakeup = backoff_wakeup(now, entry.retries);
        }
    }

    pub async fn in_flight_len(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

impl Default for QueryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// `delay = min(60, 5 + retries)` seconds (spec §4.4).
fn backoff_wakeup(now: Timestamp, retries: u32) -> Timestamp {
    let delay = (QUERY_BACKOFF_FLOOR_SECS + retries as u64).min(QUERY_BACKOFF_CEILING_SECS);
    now + delay as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_due_promotes_to_in_flight() {
        let scheduler = QueryScheduler::new();
        let account = Account::ZERO;
        scheduler.add(account, 10, 5).await;

        let due = scheduler.due(0).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].height, 10);
        assert_eq!(scheduler.in_flight_len().await, 1);
    }

    #[tokio::test]
    async fn second_add_lowers_height_without_duplicating() {
        let scheduler = QueryScheduler::new();
        let account = Account::ZERO;
        scheduler.add(account, 10, 1).await;
        scheduler.add(account, 3, 1).await;

        let due = scheduler.due(0).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].height, 3);
    }

    #[tokio::test]
    async fn remove_on_ack_frees_the_slot() {
        let scheduler = QueryScheduler::new();
        let account = Account::ZERO;
        scheduler.add(account, 1, 1).await;
        scheduler.due(0).await;
        assert_eq!(scheduler.in_flight_len().await, 1);

        scheduler.remove(account).await;
        assert_eq!(scheduler.in_flight_len().await, 0);
    }

    #[tokio::test]
    async fn reschedule_applies_floor_plus_retries_backoff() {
        let scheduler = QueryScheduler::new();
        let account = Account::ZERO;
        scheduler.add(account, 1, 1).await;
        scheduler.due(0).await;
        scheduler.reschedule(account, 0).await;

        let due_immediately = scheduler.due(0).await;
        assert!(due_immediately.is_empty());
        let due_later = scheduler.due(6).await;
        assert_eq!(due_later.len(), 1);
    }
}
