//! A shared stop request that fires once.
//!
//! [`CancellationSignal`] replaces the usual grab bag of stop flags, "done" channels and deadline
//! timers with one value: every trigger source (a manual call, a deadline, an interrupt, a
//! panicking worker) calls [`CancellationSignal::trigger`] with its [`Reason`], the first one wins,
//! and everybody observing the signal sees the same outcome forever after.
//!
//! # Examples
//!
//! ```
//! use quiesce::{CancellationSignal, Reason};
//!
//! let signal = CancellationSignal::new();
//! let observer = signal.clone();
//!
//! let waiter = std::thread::spawn(move || {
//!     observer.wait();
//!     observer.reason()
//! });
//!
//! assert!(signal.trigger(Reason::Timeout));
//! assert!(!signal.trigger(Reason::Manual)); // too late, the first reason sticks
//! assert_eq!(waiter.join().unwrap(), Some(Reason::Timeout));
//! ```

use std::{
    convert::Infallible,
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::sync::Mutex;

/// Why a [`CancellationSignal`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// Somebody asked for the run to stop.
    Manual,
    /// The run's deadline expired.
    Timeout,
    /// The process received SIGINT or SIGTERM.
    Interrupt,
    /// A worker's item handler panicked.
    Panicked,
}

impl Reason {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Reason::Manual => "manual",
            Reason::Timeout => "timeout",
            Reason::Interrupt => "interrupt",
            Reason::Panicked => "panicked",
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Reason::Manual => 1,
            Reason::Timeout => 2,
            Reason::Interrupt => 3,
            Reason::Panicked => 4,
        }
    }

    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Reason::Manual),
            2 => Some(Reason::Timeout),
            3 => Some(Reason::Interrupt),
            4 => Some(Reason::Panicked),
            _ => None,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

const UNFIRED: u8 = 0;

/// A cloneable, fire-once request to stop.
///
/// All clones share one state. The signal starts out unfired; the first call to
/// [`trigger`][Self::trigger] fires it and records its [`Reason`], and neither ever changes again.
///
/// Besides polling with [`is_fired`][Self::is_fired], threads can block until the signal fires
/// ([`wait`][Self::wait], [`wait_timeout`][Self::wait_timeout]), or race it against channel
/// operations by selecting on [`as_receiver`][Self::as_receiver].
#[derive(Clone)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

struct Inner {
    /// `UNFIRED`, or the raw value of the winning [`Reason`].
    reason: AtomicU8,
    /// Dropped by the winning trigger. That disconnects `fired` and wakes everyone blocked on it.
    arm: Mutex<Option<Sender<Infallible>>>,
    fired: Receiver<Infallible>,
}

impl CancellationSignal {
    /// Creates an unfired signal.
    pub fn new() -> Self {
        let (arm, fired) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                reason: AtomicU8::new(UNFIRED),
                arm: Mutex::new(Some(arm)),
                fired,
            }),
        }
    }

    /// Fires the signal with `reason`, unless it has already fired.
    ///
    /// Returns whether this call was the one that fired it. Concurrent callers race; exactly one
    /// of them wins, and its `reason` is the one every observer will see.
    pub fn trigger(&self, reason: Reason) -> bool {
        let won = self
            .inner
            .reason
            .compare_exchange(UNFIRED, reason.to_raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            log::debug!("cancellation signal fired ({reason})");
            drop(self.inner.arm.lock().take());
        } else {
            log::trace!("ignoring '{reason}' trigger, signal has already fired");
        }
        won
    }

    /// Returns whether the signal has fired. Never blocks.
    #[inline]
    pub fn is_fired(&self) -> bool {
        self.inner.reason.load(Ordering::Acquire) != UNFIRED
    }

    /// Returns the reason the signal fired with, or [`None`] if it has not fired yet.
    #[inline]
    pub fn reason(&self) -> Option<Reason> {
        Reason::from_raw(self.inner.reason.load(Ordering::Acquire))
    }

    /// Blocks the calling thread until the signal fires.
    pub fn wait(&self) {
        match self.inner.fired.recv() {
            Ok(never) => match never {},
            Err(_) => {}
        }
    }

    /// Blocks the calling thread until the signal fires or `timeout` elapses.
    ///
    /// Returns `true` if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.fired.recv_timeout(timeout) {
            Ok(never) => match never {},
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Returns a receiver that becomes ready (disconnected) once the signal fires.
    ///
    /// Nothing is ever sent on it. Its purpose is to take part in a [`crossbeam_channel::select!`]
    /// so a thread blocked on some other channel wakes up as soon as the signal fires:
    ///
    /// ```
    /// use crossbeam_channel::select;
    /// use quiesce::{CancellationSignal, Reason};
    ///
    /// let signal = CancellationSignal::new();
    /// let (_tx, jobs) = crossbeam_channel::unbounded::<u32>();
    /// signal.trigger(Reason::Manual);
    ///
    /// select! {
    ///     recv(jobs) -> _ => unreachable!(),
    ///     recv(signal.as_receiver()) -> _ => {}
    /// }
    /// ```
    pub fn as_receiver(&self) -> &Receiver<Infallible> {
        &self.inner.fired
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("reason", &self.reason())
            .finish()
    }
}
