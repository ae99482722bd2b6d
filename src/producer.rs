//! The feeding side of a run.

use std::time::Duration;

use crate::{
    cancel::CancellationSignal,
    channel::BoundedChannel,
    error::{AlreadyClosed, DisciplineError, SendUntilError},
};

/// How a [`Producer`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    /// The item sequence ran out.
    Exhausted,
    /// The cancellation signal fired first.
    Cancelled,
}

/// What a [`Producer`] did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    /// Number of items the channel accepted.
    pub items_sent: u64,
    pub exit: ProducerExit,
}

/// Feeds a sequence of items into a [`BoundedChannel`] and closes it exactly once.
///
/// The producer owns the channel's closing: [`Producer::run`] closes it when the sequence runs
/// out or the [`CancellationSignal`] fires, and dropping a producer that has not closed its
/// channel yet (because `run` was never called, returned early, or unwound) closes it then.
/// Workers draining the channel therefore always get to see its end.
pub struct Producer<T> {
    channel: BoundedChannel<T>,
    signal: CancellationSignal,
    pace: Option<Duration>,
    closed: bool,
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("producer could not close its channel on exit: {e}");
        }
    }
}

impl<T> Producer<T> {
    pub fn new(channel: BoundedChannel<T>, signal: CancellationSignal) -> Self {
        Self {
            channel,
            signal,
            pace: None,
            closed: false,
        }
    }

    /// Waits `interval` after every item that was sent.
    ///
    /// The wait ends early if the cancellation signal fires.
    pub fn pace(mut self, interval: Duration) -> Self {
        self.pace = Some(interval);
        self
    }

    /// Sends every item of `items`, stopping early if the cancellation signal fires, and then
    /// closes the channel.
    ///
    /// The signal is checked before and after each item is taken from `items`, and a send blocked on a full
    /// channel gives up when the signal fires, so this returns promptly after cancellation even if
    /// no worker is receiving anymore.
    ///
    /// # Errors
    ///
    /// Fails with a [`DisciplineError`] if somebody else closed the channel.
    pub fn run<I>(mut self, items: I) -> Result<ProducerReport, DisciplineError>
    where
        I: IntoIterator<Item = T>,
    {
        let mut items = items.into_iter();
        let mut sent = 0;
        let exit = loop {
            if self.signal.is_fired() {
                break ProducerExit::Cancelled;
            }
            let Some(item) = items.next() else {
                break ProducerExit::Exhausted;
            };
            // Pulling the item may have blocked across cancellation.
            if self.signal.is_fired() {
                break ProducerExit::Cancelled;
            }
            match self.channel.send_until(item, &self.signal) {
                Ok(()) => sent += 1,
                Err(SendUntilError::Cancelled(_)) => break ProducerExit::Cancelled,
                Err(SendUntilError::Closed(_)) => return Err(DisciplineError::SendAfterClose),
            }
            if let Some(pace) = self.pace {
                if self.signal.wait_timeout(pace) {
                    break ProducerExit::Cancelled;
                }
            }
        };

        self.close()?;
        log::debug!("producer {exit:?} after sending {sent} item(s)");
        Ok(ProducerReport {
            items_sent: sent,
            exit,
        })
    }

    fn close(&mut self) -> Result<(), AlreadyClosed> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel.close()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use crate::{background, cancel::Reason, test::within};

    use super::*;

    #[test]
    fn exhausts_and_closes() {
        let channel = BoundedChannel::new(8);
        let producer = Producer::new(channel.clone(), CancellationSignal::new());

        let report = producer.run(1..=5).unwrap();
        assert_eq!(
            report,
            ProducerReport {
                items_sent: 5,
                exit: ProducerExit::Exhausted
            }
        );
        assert!(channel.is_closed());
        let received: Vec<_> = std::iter::from_fn(|| channel.receive()).collect();
        assert_eq!(received, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn empty_sequence_closes_immediately() {
        let channel = BoundedChannel::<u8>::new(0);
        let report = Producer::new(channel.clone(), CancellationSignal::new())
            .run([])
            .unwrap();
        assert_eq!(report.exit, ProducerExit::Exhausted);
        assert_eq!(report.items_sent, 0);
        assert_eq!(channel.receive(), None);
    }

    #[test]
    fn cancelled_before_start_sends_nothing() {
        let channel = BoundedChannel::new(8);
        let signal = CancellationSignal::new();
        signal.trigger(Reason::Manual);

        let report = Producer::new(channel.clone(), signal).run(1..).unwrap();
        assert_eq!(report.exit, ProducerExit::Cancelled);
        assert_eq!(report.items_sent, 0);
        assert!(channel.is_closed());
        assert!(channel.is_empty());
    }

    #[test]
    fn cancellation_unblocks_full_channel() {
        // Nobody receives, so the producer blocks on its first item forever unless cancelled.
        let channel = BoundedChannel::new(0);
        let signal = CancellationSignal::new();
        let producer = Producer::new(channel.clone(), signal.clone());
        let bg = background::spawn("producer".into(), move || producer.run(1..)).unwrap();

        thread::sleep(Duration::from_millis(20));
        signal.trigger(Reason::Timeout);

        let report = within(Duration::from_secs(5), move || bg.join()).unwrap();
        assert_eq!(report.exit, ProducerExit::Cancelled);
        assert_eq!(report.items_sent, 0);
        assert!(channel.is_closed());
    }

    #[test]
    fn pacing_is_cut_short_by_cancellation() {
        let channel = BoundedChannel::new(8);
        let signal = CancellationSignal::new();
        let producer =
            Producer::new(channel.clone(), signal.clone()).pace(Duration::from_secs(60));
        let bg = background::spawn("producer".into(), move || producer.run(1..)).unwrap();

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        signal.trigger(Reason::Manual);

        let report = within(Duration::from_secs(5), move || bg.join()).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.exit, ProducerExit::Cancelled);
        assert_eq!(report.items_sent, 1);
        assert_eq!(channel.receive(), Some(1));
        assert_eq!(channel.receive(), None);
    }

    #[test]
    fn foreign_close_is_a_discipline_error() {
        let channel = BoundedChannel::new(8);
        channel.close().unwrap();
        let err = Producer::new(channel, CancellationSignal::new())
            .run(1..=3)
            .unwrap_err();
        assert_eq!(err, DisciplineError::SendAfterClose);
    }

    #[test]
    fn foreign_close_of_exhausted_producer_is_reported() {
        let channel = BoundedChannel::<u8>::new(8);
        channel.close().unwrap();
        let err = Producer::new(channel, CancellationSignal::new())
            .run([])
            .unwrap_err();
        assert_eq!(err, DisciplineError::AlreadyClosed(AlreadyClosed));
    }

    #[test]
    fn drop_closes_channel() {
        let channel = BoundedChannel::<u8>::new(0);
        drop(Producer::new(channel.clone(), CancellationSignal::new()));
        assert!(channel.is_closed());
        assert_eq!(channel.receive(), None);
    }
}
