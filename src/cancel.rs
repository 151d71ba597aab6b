//! Run-scoped cancellation.
//!
//! # Design
//!
//! A [`Canceller`]/[`CancelToken`] pair built from an atomic flag plus a
//! channel that is never sent on. Cancelling drops the channel's sender, so
//! every clone of the token sees the receiver disconnect — which makes the
//! token usable as a `crossbeam_channel::select!` arm to interrupt blocked
//! sends and receives, not just polled checks.
//!
//! # Invariants
//! - Cancellation is monotonic: once cancelled, never un-cancelled.
//! - `is_cancelled()` is safe to poll from any thread at any frequency.
//! - The channel arm fires at-or-after the flag is set; polling the flag
//!   first at suspension points avoids missed-wakeup windows.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Uninhabited marker: the cancel channel carries no values, only disconnect.
pub enum Never {}

/// Create a linked canceller/token pair for one pipeline run.
pub fn pair() -> (Canceller, CancelToken) {
    let flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded::<Never>(0);
    let canceller = Canceller {
        flag: Arc::clone(&flag),
        guard: Arc::new(Mutex::new(Some(tx))),
    };
    let token = CancelToken { flag, rx };
    (canceller, token)
}

/// Cancel side: held by the pipeline state, shared across tasks.
#[derive(Clone)]
pub struct Canceller {
    flag: Arc<AtomicBool>,
    guard: Arc<Mutex<Option<Sender<Never>>>>,
}

impl Canceller {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Dropping the sender disconnects every token's receiver.
        self.guard.lock().expect("cancel guard poisoned").take();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Observe side: cloned into every worker and task.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    rx: Receiver<Never>,
}

impl CancelToken {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Receiver for `select!` arms. Never yields a value; disconnects on cancel.
    #[inline]
    pub fn channel(&self) -> &Receiver<Never> {
        &self.rx
    }

    /// Check at a suspension point: `Err(Error::Cancelled)` once cancelled.
    #[inline]
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
