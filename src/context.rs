//! Cancellable execution context handed to task bodies and protected calls.
//!
//! Cancellation is modelled as the disconnection of a channel nobody ever
//! sends on: dropping the only sender wakes every clone of the receiver at
//! once, and the receiver can sit in a `crossbeam_channel::select!` beside
//! a work queue.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use thiserror::Error;

/// Returned when work observes that its context was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("context cancelled")]
pub struct Cancelled;

/// A cheaply clonable view of a cancellation signal.
#[derive(Debug, Clone)]
pub struct Context {
    done: Receiver<()>,
}

/// Fires the cancellation signal of the contexts created alongside it.
#[derive(Debug)]
pub struct CancelHandle {
    trigger: Mutex<Option<Sender<()>>>,
}

impl Context {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        Self {
            done: crossbeam_channel::never(),
        }
    }

    /// Creates a cancellable context and the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (trigger, done) = crossbeam_channel::bounded(0);
        (
            Self { done },
            CancelHandle {
                trigger: Mutex::new(Some(trigger)),
            },
        )
    }

    /// Returns true once the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Returns `Err(Cancelled)` once the context has been cancelled.
    pub fn err(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Receiver that becomes ready (disconnected) on cancellation.
    ///
    /// Intended for `crossbeam_channel::select!`; nothing is ever received.
    pub fn done(&self) -> &Receiver<()> {
        &self.done
    }

    /// Sleeps for `duration`, waking early if the context is cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        match self.done.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            _ => Err(Cancelled),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl CancelHandle {
    /// Cancels every associated context. Later calls do nothing.
    pub fn cancel(&self) {
        self.trigger.lock().take();
    }

    /// Returns true if `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.trigger.lock().is_none()
    }
}
