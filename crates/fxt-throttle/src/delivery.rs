//! Conflating delivery channel.
//!
//! This is the throttling mechanism. Each channel owns one worker thread and
//! one unbounded FIFO of symbols with set semantics: a symbol is in the queue
//! at most once. Enqueuing a symbol that is already pending is a no-op; the
//! newer rate is still delivered because the notifier reads the live rate
//! cell when the task is drained.
//!
//! ```text
//! publish(S) ──► pending[S].swap(true)?  ── already pending ──► conflated
//!                        │ newly pending
//!                        ▼
//!               crossbeam unbounded FIFO ──► worker: pending[S] = false
//!                                                   notifier.notify(S)
//! ```
//!
//! The pending flag is cleared at dequeue, before the rate is read. A burst
//! of updates for one symbol therefore collapses to at most two
//! notifications: the one in service and one freshly pending.
//!
//! # Lifecycle
//!
//! A single state word guards every callback:
//!
//! ```text
//! IDLE ──worker CAS──► RUNNING ──worker CAS──► IDLE
//!   │                     │
//!   └──── shutdown ───────┴──────────────────► CLOSED
//! ```
//!
//! The worker only enters a callback by moving `IDLE` to `RUNNING`, so once
//! [`DeliveryChannel::shutdown`] has stored `CLOSED` no new callback can
//! start. Its return value tells whether one was already in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use fxt_core::error::Result;
use fxt_core::types::SymbolId;
use tracing::debug;

use crate::notifier::ProcessorNotifier;
use crate::stats::{EngineCounters, bump};

enum Task {
    Notify(SymbolId),
    Stop,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CLOSED: u8 = 2;

struct ChannelState {
    lifecycle: AtomicU8,
    pending: Box<[AtomicBool]>,
}

/// One delivery lane of one subscriber.
pub struct DeliveryChannel {
    label: String,
    tx: Sender<Task>,
    state: Arc<ChannelState>,
    counters: Arc<EngineCounters>,
    worker: Option<JoinHandle<()>>,
}

impl DeliveryChannel {
    /// Spawn the worker thread and return the channel handle.
    pub fn spawn(
        label: String,
        notifier: ProcessorNotifier,
        symbols: usize,
        counters: Arc<EngineCounters>,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Task>();
        let state = Arc::new(ChannelState {
            lifecycle: AtomicU8::new(IDLE),
            pending: (0..symbols).map(|_| AtomicBool::new(false)).collect(),
        });

        let worker_state = Arc::clone(&state);
        let worker_label = label.clone();
        let worker = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || run_delivery_loop(&worker_label, rx, worker_state, notifier))?;

        Ok(Self { label, tx, state, counters, worker: Some(worker) })
    }

    /// Make `id` pending unless it already is. Never blocks.
    ///
    /// Returns `true` if a new task was queued, `false` if the request was
    /// conflated into an existing pending task or the channel is shut down.
    pub fn publish(&self, id: SymbolId) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.state.pending[id.index()].swap(true, Ordering::AcqRel) {
            bump(&self.counters.conflated);
            return false;
        }
        if self.tx.send(Task::Notify(id)).is_err() {
            // Worker is gone; nothing will ever drain this flag.
            return false;
        }
        bump(&self.counters.enqueued);
        true
    }

    /// Stop accepting work and tell the worker to exit.
    ///
    /// Pending tasks are discarded. No callback starts after this returns.
    /// A callback already running is not interrupted and is not waited for;
    /// the return value is `true` if one was in flight. Idempotent.
    pub fn shutdown(&self) -> bool {
        let prev = self.state.lifecycle.swap(CLOSED, Ordering::AcqRel);
        if prev != CLOSED {
            let _ = self.tx.send(Task::Stop);
            debug!("[{}] shutdown requested", self.label);
        }
        prev == RUNNING
    }

    pub fn is_open(&self) -> bool {
        self.state.lifecycle.load(Ordering::Acquire) != CLOSED
    }

    /// `true` once the worker thread has returned.
    pub fn is_terminated(&self) -> bool {
        self.worker.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for DeliveryChannel {
    fn drop(&mut self) {
        self.shutdown();
        // The worker is detached, never joined: it may be stuck inside a
        // subscriber callback.
        self.worker.take();
    }
}

/// Drain tasks until `Stop` or until every sender is gone.
fn run_delivery_loop(
    label: &str,
    rx: Receiver<Task>,
    state: Arc<ChannelState>,
    mut notifier: ProcessorNotifier,
) {
    debug!("[{label}] delivery loop started");

    while let Ok(task) = rx.recv() {
        let id = match task {
            Task::Notify(id) => id,
            Task::Stop => break,
        };
        // Clearing the flag makes the symbol re-enqueueable; any rate
        // published before a later conflated enqueue is visible below.
        state.pending[id.index()].swap(false, Ordering::AcqRel);
        if state
            .lifecycle
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            break;
        }
        notifier.notify(id);
        if state
            .lifecycle
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            break;
        }
    }

    debug!("[{label}] delivery loop exited");
}
