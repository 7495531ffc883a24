//! Literal protocol parameters. Treated as contract by the test suite (§8).

/// Blocks a single credit entitles an account to submit in a day.
pub const TRANSACTIONS_PER_CREDIT: u32 = 20;

/// Maximum length, in bytes, of a transaction block's extensions blob.
pub const EXTENSIONS_MAX_LEN: u32 = 1024;

/// Maximum seconds a block's timestamp may run ahead of wall clock.
pub const MAX_FUTURE_TIMESTAMP_SECS: i64 = 60;

/// Sparse index stride: one `blocks_index` entry per this many heights.
pub const BLOCKS_PER_INDEX: u64 = 64;

/// Height value reserved to mean "invalid / none".
pub const INVALID_HEIGHT: u64 = u64::MAX;

/// Soft back-pressure threshold on the block processor's action queue.
pub const ACTION_QUEUE_SOFT_LIMIT: usize = 100_000;

/// Election timestamp-weight half-window (seconds).
pub const MAX_TIMESTAMP_DIFF: i64 = 150;

/// Minimum spacing between two non-conflicting votes from one representative.
pub const MIN_CONFIRM_INTERVAL: i64 = 45;

/// Percentage of total weight required for a candidate to be confirmed.
pub const CONFIRM_WEIGHT_PERCENTAGE: u64 = 51;

/// Consecutive winning/confirming rounds before a fork election force-applies.
pub const FORK_ELECTION_ROUNDS_THRESHOLD: u32 = 20;

/// Initial scheduling delay once an election becomes a fork election.
pub const FORK_ELECTION_DELAY_SECS: u64 = 5;

/// Steady-state wakeup interval for a fork election.
pub const FORK_ELECTION_INTERVAL_SECS: u64 = 5;

/// Initial scheduling delay for a freshly created, non-fork election.
pub const NON_FORK_ELECTION_DELAY_SECS: u64 = 10;

/// Steady-state wakeup interval for a non-fork election.
pub const NON_FORK_ELECTION_INTERVAL_SECS: u64 = 15;

/// Cookie/handshake cutoff used by the gateway transport boundary.
pub const COOKIE_CUTOFF_TIME_SECS: u64 = 3;

/// Client subscription expiry if not refreshed.
pub const SUBSCRIPTION_CUTOFF_TIME_SECS: u64 = 900;

/// Outbound query concurrency cap.
pub const QUERY_CONCURRENCY: usize = 16;

/// Outbound query backoff floor/ceiling (seconds): `min(60, 5 + retries)`.
pub const QUERY_BACKOFF_FLOOR_SECS: u64 = 5;
pub const QUERY_BACKOFF_CEILING_SECS: u64 = 60;

/// Prefetch block-cache entry TTL.
pub const BLOCK_CACHE_TTL_SECS: u64 = 300;

/// Block-waiting entry TTL.
pub const BLOCK_WAITING_TTL_SECS: u64 = 3600;

/// Text-encoding prefix for [`crate::numbers::Account`].
pub const ACCOUNT_PREFIX: &str = "lat_";
