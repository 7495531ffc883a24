//! Observer events (spec §4.1, §9 "Observer callbacks vs. ownership
//! cycles"). Events are broadcast only after a transaction has
//! committed, never from inside the write transaction itself, so a slow
//! or buggy subscriber can never hold the ledger lock.

use lattice_types::{Account, Block, Height};

#[derive(Debug, Clone)]
pub enum Event {
    BlockAppend { block: Block, confirmed: bool },
    BlockConfirm { block: Block, previous_confirmed_height: Height },
    BlockRollback { block: Block },
    BlockDrop { block: Block },
    ForkAdd { first: Block, second: Block },
    ForkDelete { first: Block, second: Block },
    /// An incoming block's previous-hash didn't match the current head:
    /// the existing head is re-submitted to the election as a candidate
    /// for re-confirmation (spec §4.1 outcome 5, §9 Open Questions).
    PreviousMismatch { existing_head: Block },
    /// A `send` landed a new receivable for `account` (spec §6.4's
    /// `receivable_info` push). `source` is the confirmed send block.
    ReceivableInfo { account: Account, source: Block },
}

/// Thin wrapper around a broadcast channel. Cloned freely; every clone
/// is an independent sender handle over the same channel.
#[derive(Clone)]
pub struct Observers {
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl Observers {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Observers { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Best-effort: a lagging subscriber drops events rather than
    /// applying back-pressure to the processor.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

/// Accumulates the events one state-machine call wants to raise without
/// broadcasting them. The state machine runs inside the storage layer's
/// write transaction, before `tx.commit()` returns — emitting straight
/// to `Observers` from in there would let a subscriber see a block that
/// a subsequent commit failure then undoes. Callers flush the buffer
/// only once the surrounding `db.update` has returned `Ok`.
#[derive(Default)]
pub struct EventBuffer(Vec<Event>);

impl EventBuffer {
    pub fn new() -> Self {
        EventBuffer(Vec::new())
    }

    pub fn push(&mut self, event: Event) {
        self.0.push(event);
    }

    pub fn flush(self, observers: &Observers) {
        for event in self.0 {
            observers.emit(event);
        }
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.0
    }
}
