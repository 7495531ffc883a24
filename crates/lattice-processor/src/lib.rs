//! The prioritized action queue and the append/rollback state machine
//! that drives all ledger mutation (spec §4.1).

pub mod observer;
pub mod outcome;
pub mod processor;
pub mod queue;
pub mod state_machine;

pub use observer::{Event, EventBuffer, Observers};
pub use outcome::{AppendOutcome, RollbackOutcome};
pub use processor::{NextBlockCache, Processor, SyncRequester, WaitingBlocks};
pub use queue::{Action, ActionQueue, Priority};
