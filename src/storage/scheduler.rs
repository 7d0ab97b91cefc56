//! Debounced write-back scheduler
//!
//! One thread per key space owns all disk writes for that key space.
//!
//! ```text
//!            dirty (count < max)            timer expires
//!   ┌──────┐ ─────────────────▶ ┌───────┐ ──────────────▶ ┌──────────┐
//!   │ Idle │                    │ Armed │                 │ Flushing │
//!   └──────┘ ◀───────────────── └───────┘ ◀─ dirty ─┐     └────┬─────┘
//!       ▲          (re-arm on every dirty mark)     └──────────┤
//!       └──────────────── flush done, nothing pending ─────────┘
//! ```
//!
//! Reaching `max_count` dirty marks flushes immediately. Marks that arrive
//! while a flush is running wait in the channel and re-arm the timer once it
//! finishes, so flushes never overlap.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::{Result, VaultError};

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing pending
    Idle,

    /// Dirty marks pending, flush due at `deadline`
    Armed { deadline: Instant },

    /// A flush is writing files right now
    Flushing,
}

enum Message {
    Dirty,
    Flush(Sender<Result<()>>),
    Shutdown(Sender<Result<()>>),
}

/// Handle to a key space's write-back thread
pub struct FlushScheduler {
    tx: Sender<Message>,
    state: Arc<Mutex<SchedulerState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    /// Spawn the scheduler thread
    ///
    /// `flush` writes every dirty shard; it is only ever called from the
    /// scheduler thread.
    pub fn spawn<F>(name: String, interval: Duration, max_count: usize, flush: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let (tx, rx) = channel::unbounded();
        let state = Arc::new(Mutex::new(SchedulerState::Idle));

        let worker = Worker {
            rx,
            state: Arc::clone(&state),
            interval,
            max_count: max_count.max(1),
            pending: 0,
            flush,
        };

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())?;

        Ok(Self {
            tx,
            state,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Record one mutation
    pub fn mark_dirty(&self) {
        if self.tx.send(Message::Dirty).is_err() {
            tracing::warn!("Flush scheduler stopped; dirty mark dropped");
        }
    }

    /// Flush now and wait for the result
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = channel::bounded(1);
        self.tx
            .send(Message::Flush(ack_tx))
            .map_err(|_| VaultError::Storage("Flush scheduler stopped".to_string()))?;
        ack_rx
            .recv()
            .map_err(|_| VaultError::Storage("Flush scheduler exited mid-flush".to_string()))?
    }

    /// Final flush, then stop the thread. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = channel::bounded(1);
        let result = match self.tx.send(Message::Shutdown(ack_tx)) {
            Ok(()) => ack_rx.recv().unwrap_or(Ok(())),
            Err(_) => Ok(()),
        };

        if handle.join().is_err() {
            return Err(VaultError::Storage("Flush scheduler panicked".to_string()));
        }
        result
    }

    /// Current scheduler state
    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("Final flush failed: {}", e);
        }
    }
}

// =============================================================================
// Worker Thread
// =============================================================================

struct Worker<F> {
    rx: Receiver<Message>,
    state: Arc<Mutex<SchedulerState>>,
    interval: Duration,
    max_count: usize,
    pending: usize,
    flush: F,
}

impl<F> Worker<F>
where
    F: FnMut() -> Result<()>,
{
    fn run(mut self) {
        loop {
            let current = *self.state.lock();
            let next = match current {
                SchedulerState::Armed { deadline } => self.rx.recv_deadline(deadline),
                _ => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match next {
                Ok(Message::Dirty) => {
                    self.pending += 1;
                    if self.pending >= self.max_count {
                        tracing::trace!("Debounce threshold reached, forcing flush");
                        self.flush_logged();
                    } else {
                        self.set_state(SchedulerState::Armed {
                            deadline: Instant::now() + self.interval,
                        });
                    }
                }
                Ok(Message::Flush(ack)) => {
                    let result = self.flush_now();
                    let _ = ack.send(result);
                }
                Ok(Message::Shutdown(ack)) => {
                    let result = self.flush_now();
                    let _ = ack.send(result);
                    return;
                }
                Err(RecvTimeoutError::Timeout) => self.flush_logged(),
                Err(RecvTimeoutError::Disconnected) => {
                    if self.pending > 0 {
                        self.flush_logged();
                    }
                    return;
                }
            }
        }
    }

    fn flush_now(&mut self) -> Result<()> {
        self.set_state(SchedulerState::Flushing);
        let result = (self.flush)();
        self.pending = 0;
        self.set_state(SchedulerState::Idle);
        result
    }

    fn flush_logged(&mut self) {
        if let Err(e) = self.flush_now() {
            tracing::error!("Debounced flush failed: {}", e);
        }
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }
}
