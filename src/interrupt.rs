//! Delivery of SIGINT/SIGTERM to cancellation signals.
//!
//! A process can only have one interrupt handler. The first [`register`] call installs it (via
//! [`ctrlc`], which also covers SIGTERM); from then on, every interrupt fires all currently
//! registered [`CancellationSignal`]s with [`Reason::Interrupt`].
//!
//! ```no_run
//! use quiesce::{interrupt, CancellationSignal, Reason};
//!
//! let signal = CancellationSignal::new();
//! let _guard = interrupt::register(&signal)?;
//! signal.wait(); // until Ctrl+C
//! assert_eq!(signal.reason(), Some(Reason::Interrupt));
//! # Ok::<(), std::io::Error>(())
//! ```

use std::{
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        OnceLock,
    },
};

use crate::{
    cancel::{CancellationSignal, Reason},
    sync::Mutex,
};

static HANDLER: OnceLock<Result<(), String>> = OnceLock::new();
static LISTENERS: Mutex<Vec<(u64, CancellationSignal)>> = Mutex::new(Vec::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Keeps a [`CancellationSignal`] registered for interrupts. Dropping it unregisters the signal.
#[must_use = "the signal is unregistered as soon as the guard is dropped"]
#[derive(Debug)]
pub struct InterruptGuard {
    id: u64,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        LISTENERS.lock().retain(|(id, _)| *id != self.id);
    }
}

/// Fires `signal` with [`Reason::Interrupt`] when the process is interrupted, for as long as the
/// returned guard is alive.
///
/// # Errors
///
/// Fails if the process-wide handler could not be installed, for example because some other
/// code in the process already installed one.
pub fn register(signal: &CancellationSignal) -> io::Result<InterruptGuard> {
    install()?;
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    LISTENERS.lock().push((id, signal.clone()));
    Ok(InterruptGuard { id })
}

fn install() -> io::Result<()> {
    HANDLER
        .get_or_init(|| {
            log::debug!("installing interrupt handler");
            ctrlc::set_handler(deliver).map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|msg| io::Error::new(io::ErrorKind::Other, msg))
}

/// Fires every registered signal. Runs on the handler thread owned by `ctrlc`.
pub(crate) fn deliver() {
    let listeners = LISTENERS.lock();
    log::info!("interrupted, cancelling {} registered run(s)", listeners.len());
    for (_, signal) in listeners.iter() {
        signal.trigger(Reason::Interrupt);
    }
}
