//! Error types.
//!
//! Channel closure and cancellation are *not* errors: they are how a run is supposed to end, and
//! show up as [`Received`], [`TerminationCause`] and [`ProducerExit`] values instead. What remains
//! here falls into two groups:
//!
//! - [`ConfigError`]: invalid parameters, rejected before anything is started.
//! - Channel discipline violations ([`ChannelClosed`], [`AlreadyClosed`], [`DisciplineError`]):
//!   the producer closes the channel exactly once and never sends after that, so these indicate a
//!   bug in whoever else got hold of the channel.
//!
//! [`Received`]: crate::Received
//! [`TerminationCause`]: crate::TerminationCause
//! [`ProducerExit`]: crate::ProducerExit

use std::{fmt, io, time::Duration};

use thiserror::Error;

/// Invalid parameters passed to [`Supervisor::run`][crate::Supervisor::run].
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The worker count was 0.
    #[error("worker count must be at least 1")]
    NoWorkers,
    /// A deadline of zero length was requested.
    #[error("timeout must be positive, got {0:?}")]
    ZeroTimeout(Duration),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::NoWorkers => "config_no_workers",
            ConfigError::ZeroTimeout(_) => "config_zero_timeout",
        }
    }
}

/// An item was sent on a closed [`BoundedChannel`][crate::BoundedChannel].
///
/// The rejected item is handed back.
#[derive(Error, Clone, Copy, PartialEq, Eq)]
#[error("sending on a closed channel")]
pub struct ChannelClosed<T>(pub T);

impl<T> ChannelClosed<T> {
    /// Returns the item that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for ChannelClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChannelClosed(..)")
    }
}

/// [`BoundedChannel::close`][crate::BoundedChannel::close] was called on a closed channel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("channel closed twice")]
pub struct AlreadyClosed;

/// An error returned by [`BoundedChannel::send_until`][crate::BoundedChannel::send_until].
///
/// Either way, the item that was not sent is handed back.
#[derive(Error, Clone, Copy, PartialEq, Eq)]
pub enum SendUntilError<T> {
    /// The channel was closed before the item could be sent.
    #[error("sending on a closed channel")]
    Closed(T),
    /// The cancellation signal fired before the item could be sent.
    #[error("send cancelled before the item was accepted")]
    Cancelled(T),
}

impl<T> SendUntilError<T> {
    /// Returns the item that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            SendUntilError::Closed(item) | SendUntilError::Cancelled(item) => item,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SendUntilError::Cancelled(_))
    }
}

impl<T> fmt::Debug for SendUntilError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendUntilError::Closed(_) => f.write_str("Closed(..)"),
            SendUntilError::Cancelled(_) => f.write_str("Cancelled(..)"),
        }
    }
}

/// The [`Producer`][crate::Producer] found its channel closed by somebody else.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisciplineError {
    /// A send failed because the channel had already been closed.
    #[error("producer sent on a channel that was closed behind its back")]
    SendAfterClose,
    /// The producer's own close failed because the channel had already been closed.
    #[error("producer could not close its channel: {0}")]
    AlreadyClosed(#[from] AlreadyClosed),
}

impl DisciplineError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DisciplineError::SendAfterClose => "discipline_send_after_close",
            DisciplineError::AlreadyClosed(_) => "discipline_already_closed",
        }
    }
}

/// Errors returned by [`Supervisor::run`][crate::Supervisor::run].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunError {
    /// The configuration was rejected; nothing was started.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A worker, producer or watcher thread could not be spawned. Everything started before the
    /// failure has been cancelled and joined.
    #[error("failed to spawn thread")]
    Spawn(#[source] io::Error),
    /// The interrupt handler could not be installed; nothing was started.
    #[error("failed to install interrupt handler")]
    Interrupt(#[source] io::Error),
    /// The channel was closed by somebody other than the producer.
    #[error(transparent)]
    Discipline(#[from] DisciplineError),
}

impl RunError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunError::Config(e) => e.as_label(),
            RunError::Spawn(_) => "run_spawn_failed",
            RunError::Interrupt(_) => "run_interrupt_unavailable",
            RunError::Discipline(e) => e.as_label(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_errors_hand_item_back() {
        assert_eq!(ChannelClosed(7).into_inner(), 7);
        assert_eq!(SendUntilError::Closed("a").into_inner(), "a");
        assert_eq!(SendUntilError::Cancelled("b").into_inner(), "b");
        assert!(SendUntilError::Cancelled(()).is_cancelled());
        assert!(!SendUntilError::Closed(()).is_cancelled());
    }

    #[test]
    fn labels() {
        assert_eq!(RunError::from(ConfigError::NoWorkers).as_label(), "config_no_workers");
        assert_eq!(
            RunError::from(DisciplineError::from(AlreadyClosed)).as_label(),
            "discipline_already_closed"
        );
    }

    #[test]
    fn messages() {
        assert_eq!(
            RunError::from(ConfigError::NoWorkers).to_string(),
            "invalid configuration: worker count must be at least 1"
        );
        assert_eq!(
            ConfigError::ZeroTimeout(Duration::ZERO).to_string(),
            "timeout must be positive, got 0ns"
        );
        assert_eq!(format!("{:?}", ChannelClosed(vec![1, 2])), "ChannelClosed(..)");
    }
}
