//! A closable multi-producer, multi-consumer FIFO queue.
//!
//! [`BoundedChannel`] sits between the producer and the workers of a run. Unlike a plain
//! [`crossbeam_channel`] pair, which closes implicitly when the last `Sender` is dropped, it is
//! closed *explicitly*, and closing it twice or sending after it was closed is reported as a
//! distinct error instead of being silently absorbed.
//!
//! Blocking operations come in two flavors: [`send`]/[`receive`] wait for the channel alone, while
//! [`send_until`]/[`receive_until`] also give up as soon as a [`CancellationSignal`] fires.
//!
//! [`send`]: BoundedChannel::send
//! [`receive`]: BoundedChannel::receive
//! [`send_until`]: BoundedChannel::send_until
//! [`receive_until`]: BoundedChannel::receive_until

use std::{convert::Infallible, fmt, sync::Arc};

use crossbeam_channel::{select, Receiver, Select, Sender, TrySendError};

use crate::{
    cancel::CancellationSignal,
    error::{AlreadyClosed, ChannelClosed, SendUntilError},
    sync::Mutex,
};

/// The outcome of [`BoundedChannel::receive_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received<T> {
    /// The next item in the channel.
    Item(T),
    /// The channel is closed and every item sent before that has been received.
    Closed,
    /// The cancellation signal fired first.
    Cancelled,
}

/// A closable FIFO queue shared by any number of senders and receivers.
///
/// Cloning a [`BoundedChannel`] yields another handle to the same queue.
///
/// With a capacity of 0, every send is a direct handoff to a receiver that is blocked in
/// [`receive`][Self::receive] at that moment. With a larger capacity, up to `capacity` items can
/// be pending before senders block.
pub struct BoundedChannel<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    capacity: usize,
    /// `None` once the channel is closed. Sends happen under this lock, so none can be accepted
    /// after `close` has taken the inlet.
    inlet: Mutex<Option<Inlet<T>>>,
    items: Receiver<T>,
    /// Disconnected on close, waking senders blocked on a full channel.
    closed: Receiver<Infallible>,
}

struct Inlet<T> {
    items: Sender<T>,
    _closer: Sender<Infallible>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> BoundedChannel<T> {
    /// Creates an open channel that buffers up to `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let (items_tx, items) = crossbeam_channel::bounded(capacity);
        let (closer, closed) = crossbeam_channel::bounded(0);
        Self {
            shared: Arc::new(Shared {
                capacity,
                inlet: Mutex::new(Some(Inlet {
                    items: items_tx,
                    _closer: closer,
                })),
                items,
                closed,
            }),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns the number of items waiting to be received.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.items.is_empty()
    }

    /// Returns whether [`close`][Self::close] has been called.
    ///
    /// A closed channel may still hold items that have not been received yet.
    pub fn is_closed(&self) -> bool {
        self.shared.inlet.lock().is_none()
    }

    /// Sends `item`, blocking until there is room for it (or a receiver takes it, for a capacity
    /// of 0).
    ///
    /// If the channel is closed, before or while this call blocks, the item is handed back in a
    /// [`ChannelClosed`] error.
    pub fn send(&self, item: T) -> Result<(), ChannelClosed<T>> {
        self.send_inner(item, None)
            .map_err(|e| ChannelClosed(e.into_inner()))
    }

    /// Like [`send`][Self::send], but gives up once `signal` fires.
    ///
    /// An item that fits without blocking is accepted even if `signal` has already fired; callers
    /// that must not send after cancellation check the signal first.
    pub fn send_until(&self, item: T, signal: &CancellationSignal) -> Result<(), SendUntilError<T>> {
        self.send_inner(item, Some(signal))
    }

    fn send_inner(
        &self,
        mut item: T,
        signal: Option<&CancellationSignal>,
    ) -> Result<(), SendUntilError<T>> {
        loop {
            let items = {
                let inlet = self.shared.inlet.lock();
                let Some(inlet) = inlet.as_ref() else {
                    return Err(SendUntilError::Closed(item));
                };
                match inlet.items.try_send(item) {
                    Ok(()) => return Ok(()),
                    Err(TrySendError::Full(back)) => item = back,
                    // `shared.items` keeps the receiving side alive as long as any handle exists.
                    Err(TrySendError::Disconnected(back)) => return Err(SendUntilError::Closed(back)),
                }
                inlet.items.clone()
            };

            if signal.is_some_and(CancellationSignal::is_fired) {
                return Err(SendUntilError::Cancelled(item));
            }

            // Wait until sending might succeed, then retry under the lock. Waiting outside of it
            // keeps `close` from blocking behind a sender.
            let mut sel = Select::new();
            sel.send(&items);
            sel.recv(&self.shared.closed);
            if let Some(signal) = signal {
                sel.recv(signal.as_receiver());
            }
            sel.ready();
        }
    }

    /// Receives the next item, blocking until one is available.
    ///
    /// Returns [`None`] once the channel is closed and drained. Calling it again after that is
    /// harmless and keeps returning [`None`].
    pub fn receive(&self) -> Option<T> {
        self.shared.items.recv().ok()
    }

    /// Receives the next item, unless `signal` fires first.
    ///
    /// If an item is available *and* the signal has fired, either may be reported.
    pub fn receive_until(&self, signal: &CancellationSignal) -> Received<T> {
        select! {
            recv(self.shared.items) -> item => match item {
                Ok(item) => Received::Item(item),
                Err(_) => Received::Closed,
            },
            recv(signal.as_receiver()) -> _ => Received::Cancelled,
        }
    }

    /// Closes the channel.
    ///
    /// Items already in the channel can still be received. Senders blocked on this channel wake
    /// up and fail with [`ChannelClosed`]; once they are gone, receivers see the end of the
    /// channel.
    ///
    /// Closing a channel twice is a bug in the caller, reported as [`AlreadyClosed`]. The channel
    /// is left as the first `close` left it.
    pub fn close(&self) -> Result<(), AlreadyClosed> {
        match self.shared.inlet.lock().take() {
            Some(inlet) => {
                drop(inlet);
                log::trace!("channel closed with {} item(s) pending", self.len());
                Ok(())
            }
            None => Err(AlreadyClosed),
        }
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use crate::{background, cancel::Reason, test::within};

    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn items_arrive_in_order() {
        let channel = BoundedChannel::new(8);
        for i in 0..5 {
            channel.send(i).unwrap();
        }
        assert_eq!(channel.len(), 5);
        channel.close().unwrap();

        let received: Vec<_> = std::iter::from_fn(|| channel.receive()).collect();
        assert_eq!(received, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn send_after_close_always_fails() {
        let channel = BoundedChannel::new(4);
        channel.close().unwrap();
        for i in 0..3 {
            assert_eq!(channel.send(i), Err(ChannelClosed(i)));
        }
        assert!(channel.is_empty());
    }

    #[test]
    fn double_close_keeps_pending_items() {
        let channel = BoundedChannel::new(4);
        channel.send('a').unwrap();
        channel.send('b').unwrap();
        channel.close().unwrap();

        assert_eq!(channel.close(), Err(AlreadyClosed));
        assert!(channel.is_closed());

        assert_eq!(channel.receive(), Some('a'));
        assert_eq!(channel.receive(), Some('b'));
        assert_eq!(channel.receive(), None);
        assert_eq!(channel.receive(), None);
    }

    #[test]
    fn rendezvous_hands_items_over() {
        let channel = BoundedChannel::new(0);
        let tx = channel.clone();
        let producer = background::spawn("producer".into(), move || {
            for i in 1..=3 {
                tx.send(i).unwrap();
            }
            tx.close().unwrap();
        })
        .unwrap();

        let received = within(Duration::from_secs(5), move || {
            std::iter::from_fn(|| channel.receive()).collect::<Vec<_>>()
        });
        assert_eq!(received, [1, 2, 3]);
        producer.join();
    }

    #[test]
    fn close_wakes_blocked_sender() {
        let channel = BoundedChannel::new(0);
        let tx = channel.clone();
        let sender = background::spawn("sender".into(), move || tx.send(42)).unwrap();

        thread::sleep(Duration::from_millis(20));
        channel.close().unwrap();

        let result = within(Duration::from_secs(5), move || sender.join());
        assert_eq!(result, Err(ChannelClosed(42)));
    }

    #[test]
    fn no_item_accepted_after_close_returned() {
        let channel = BoundedChannel::new(1);
        channel.send(1).unwrap();

        let tx = channel.clone();
        let sender = background::spawn("sender".into(), move || tx.send(2)).unwrap();
        thread::sleep(Duration::from_millis(20));
        channel.close().unwrap();

        // Freeing the slot must not let the blocked sender in.
        assert_eq!(channel.receive(), Some(1));
        let result = within(Duration::from_secs(5), move || sender.join());
        assert_eq!(result, Err(ChannelClosed(2)));
        assert_eq!(channel.receive(), None);
    }

    #[test]
    fn close_wakes_blocked_receiver() {
        let channel = BoundedChannel::<u8>::new(0);
        let rx = channel.clone();
        let receiver = background::spawn("receiver".into(), move || rx.receive()).unwrap();

        thread::sleep(Duration::from_millis(20));
        channel.close().unwrap();

        assert_eq!(within(Duration::from_secs(5), move || receiver.join()), None);
    }

    #[test]
    fn send_until_gives_up_on_cancellation() {
        let channel = BoundedChannel::new(0);
        let signal = CancellationSignal::new();
        let (tx, sig) = (channel.clone(), signal.clone());
        let sender = background::spawn("sender".into(), move || tx.send_until(7, &sig)).unwrap();

        thread::sleep(Duration::from_millis(20));
        signal.trigger(Reason::Manual);

        let result = within(Duration::from_secs(5), move || sender.join());
        assert_eq!(result, Err(SendUntilError::Cancelled(7)));
        assert!(!channel.is_closed());
    }

    #[test]
    fn send_until_accepts_while_unfired() {
        let channel = BoundedChannel::new(1);
        let signal = CancellationSignal::new();
        channel.send_until(1, &signal).unwrap();
        channel.close().unwrap();
        assert_eq!(channel.send_until(2, &signal), Err(SendUntilError::Closed(2)));
        assert_eq!(channel.receive(), Some(1));
    }

    #[test]
    fn receive_until_reports_cancellation() {
        let channel = BoundedChannel::<u8>::new(0);
        let signal = CancellationSignal::new();
        let (rx, sig) = (channel.clone(), signal.clone());
        let receiver =
            background::spawn("receiver".into(), move || rx.receive_until(&sig)).unwrap();

        thread::sleep(Duration::from_millis(20));
        signal.trigger(Reason::Timeout);

        let received = within(Duration::from_secs(5), move || receiver.join());
        assert_eq!(received, Received::Cancelled);
    }

    #[test]
    fn receive_until_reports_items_and_closure() {
        let channel = BoundedChannel::new(2);
        let signal = CancellationSignal::new();
        channel.send("x").unwrap();
        channel.close().unwrap();

        assert_eq!(channel.receive_until(&signal), Received::Item("x"));
        assert_eq!(channel.receive_until(&signal), Received::Closed);
        assert_eq!(channel.receive_until(&signal), Received::Closed);
    }

    #[test]
    fn channel_is_send_sync() {
        assert_send_sync::<BoundedChannel<()>>();
    }
}
