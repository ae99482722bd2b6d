use std::{
    io,
    panic::{self, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use crate::{
    background::{self, Background},
    cancel::{CancellationSignal, Reason},
    channel::{BoundedChannel, Received},
    error::SendUntilError,
};

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// The channel was closed and drained.
    ChannelClosed,
    /// The cancellation signal fired.
    Cancelled,
}

/// What a worker did before it stopped.
///
/// Records are produced by the worker thread itself and handed to the owner by
/// [`WorkerPool::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRecord {
    /// 1-based index of the worker in its pool.
    pub id: usize,
    pub items_processed: u64,
    pub cause: TerminationCause,
}

/// What a worker does with an item it receives after the cancellation signal has fired.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Finish an item that was received in a tie with cancellation, then stop.
    ///
    /// A worker never *waits* for another item once the signal has fired, and finishes at most
    /// one item after it observed the signal.
    #[default]
    Drain,
    /// Stop as soon as the signal is observed. An item received after it fired is dropped
    /// unprocessed.
    Immediate,
}

/// A builder object that can be used to configure and spawn a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolBuilder {
    name: String,
    policy: StopPolicy,
}

impl WorkerPoolBuilder {
    /// Sets the base name of the worker threads.
    ///
    /// Each thread is named after this base name and its 1-based id (`worker-1`, `worker-2`, …).
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    #[inline]
    pub fn policy(self, policy: StopPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Spawns `count` workers that drain `channel` into `handler` until it is closed or `signal`
    /// fires.
    ///
    /// `handler` is called with the worker's id and the item. It is shared by all workers and may
    /// run on several of them at once, hence [`Fn`] rather than [`FnMut`].
    ///
    /// If a thread fails to spawn, the workers started so far are cancelled and joined before the
    /// error is returned.
    ///
    /// # Panics
    ///
    /// This method will panic if `count` is 0.
    pub fn spawn<T, F>(
        self,
        count: usize,
        channel: &BoundedChannel<T>,
        signal: &CancellationSignal,
        handler: F,
    ) -> io::Result<WorkerPool>
    where
        T: Send + 'static,
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        self.spawn_with(count, channel, signal, handler, || ())
    }

    /// Spawns `count` workers that pass every item of `input` through `transform` and send the
    /// results on to `output`, so pools can be chained into a pipeline.
    ///
    /// `output` is closed exactly once, right after the last of these workers has stopped (also
    /// when it panicked, or when spawning failed). Downstream workers therefore see the end of
    /// `output` once this stage has drained `input` or was cancelled. Results that can't be
    /// delivered because `signal` fired while waiting for room in `output` are dropped.
    ///
    /// # Panics
    ///
    /// This method will panic if `count` is 0.
    pub fn spawn_stage<T, U, F>(
        self,
        count: usize,
        input: &BoundedChannel<T>,
        output: &BoundedChannel<U>,
        signal: &CancellationSignal,
        transform: F,
    ) -> io::Result<WorkerPool>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(usize, T) -> U + Send + Sync + 'static,
    {
        let hold = OutputHold::new(output.clone());
        let downstream = output.clone();
        let stop = signal.clone();
        let handler = move |id: usize, item: T| {
            match downstream.send_until(transform(id, item), &stop) {
                Ok(()) => {}
                Err(SendUntilError::Cancelled(_)) => {
                    log::trace!("worker {id} dropping a result after cancellation");
                }
                Err(SendUntilError::Closed(_)) => {
                    log::error!("worker {id} found its output closed by somebody else");
                }
            }
        };
        self.spawn_with(count, input, signal, handler, || hold.share())
    }

    /// Spawns the workers, each holding on to a value from `per_worker` until its thread exits.
    fn spawn_with<T, F, G, H>(
        self,
        count: usize,
        channel: &BoundedChannel<T>,
        signal: &CancellationSignal,
        handler: F,
        mut per_worker: H,
    ) -> io::Result<WorkerPool>
    where
        T: Send + 'static,
        F: Fn(usize, T) + Send + Sync + 'static,
        G: Send + 'static,
        H: FnMut() -> G,
    {
        assert_ne!(count, 0, "count must be at least 1");

        let handler = Arc::new(handler);
        let mut pool = WorkerPool {
            workers: Vec::with_capacity(count),
            signal: signal.clone(),
        };
        for id in 1..=count {
            let channel = channel.clone();
            let signal = signal.clone();
            let handler = handler.clone();
            let policy = self.policy;
            let held = per_worker();
            let worker = background::spawn(format!("{}-{id}", self.name), move || {
                let _held = held;
                let res = panic::catch_unwind(AssertUnwindSafe(|| {
                    work(id, &channel, &signal, policy, &*handler)
                }));
                match res {
                    Ok(record) => record,
                    Err(payload) => {
                        // Wind the rest of the run down; the owner re-raises this on join.
                        signal.trigger(Reason::Panicked);
                        resume_unwind(payload);
                    }
                }
            })?;
            pool.workers.push(worker);
        }

        log::debug!("started {count} '{}' worker(s)", self.name);
        Ok(pool)
    }
}

/// Keeps a stage's output channel open. The last hold to be dropped closes it.
struct OutputHold<U> {
    shared: Arc<HoldShared<U>>,
}

struct HoldShared<U> {
    holds: AtomicUsize,
    output: BoundedChannel<U>,
}

impl<U> OutputHold<U> {
    fn new(output: BoundedChannel<U>) -> Self {
        Self {
            shared: Arc::new(HoldShared {
                holds: AtomicUsize::new(1),
                output,
            }),
        }
    }

    fn share(&self) -> Self {
        self.shared.holds.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<U> Drop for OutputHold<U> {
    fn drop(&mut self) {
        if self.shared.holds.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        match self.shared.output.close() {
            Ok(()) => log::debug!("stage output closed"),
            Err(e) => log::error!("stage could not close its output: {e}"),
        }
    }
}

fn work<T, F>(
    id: usize,
    channel: &BoundedChannel<T>,
    signal: &CancellationSignal,
    policy: StopPolicy,
    handler: &F,
) -> WorkerRecord
where
    F: Fn(usize, T),
{
    let mut items_processed = 0;
    let cause = loop {
        if policy == StopPolicy::Immediate && signal.is_fired() {
            break TerminationCause::Cancelled;
        }
        match channel.receive_until(signal) {
            Received::Item(item) => {
                if policy == StopPolicy::Immediate && signal.is_fired() {
                    log::trace!("worker {id} dropping an item received after cancellation");
                    break TerminationCause::Cancelled;
                }
                handler(id, item);
                items_processed += 1;
                // A tie is only broken in favor of the item once.
                if signal.is_fired() {
                    break TerminationCause::Cancelled;
                }
            }
            // The producer closes the channel in response to cancellation, too. Report the cause,
            // not the symptom.
            Received::Closed if signal.is_fired() => break TerminationCause::Cancelled,
            Received::Closed => break TerminationCause::ChannelClosed,
            Received::Cancelled => break TerminationCause::Cancelled,
        }
    };

    log::debug!("worker {id} stopped ({cause:?}) after {items_processed} item(s)");
    WorkerRecord {
        id,
        items_processed,
        cause,
    }
}

/// An owned set of worker threads draining one [`BoundedChannel`].
///
/// Workers stop when the channel is closed and drained, or when the [`CancellationSignal`] they
/// were spawned with fires, whichever they observe first. [`WorkerPool::join`] waits for all of
/// them and returns their [`WorkerRecord`]s.
///
/// This type enforces structured concurrency: dropping a pool that was not joined fires the
/// signal with [`Reason::Manual`] and joins every worker. If a worker's handler panicked, the
/// signal fires with [`Reason::Panicked`] so the other workers stop too, and the panic is
/// propagated to the thread joining or dropping the pool. If more than one worker panicked, the
/// panic of the lowest id is propagated.
pub struct WorkerPool {
    workers: Vec<Background<WorkerRecord>>,
    signal: CancellationSignal,
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.signal.trigger(Reason::Manual);
        let result = self.wait_for_exit();
        if let Err(payload) = result {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }
}

impl WorkerPool {
    /// Returns a builder that can be used to configure and spawn a [`WorkerPool`].
    #[inline]
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            name: "worker".into(),
            policy: StopPolicy::default(),
        }
    }

    /// Returns the number of workers in the pool.
    #[inline]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Blocks until every worker has stopped, and returns their records ordered by id.
    ///
    /// This does not ask the workers to stop. They stop on their own once the channel is closed
    /// and drained or the cancellation signal fires.
    ///
    /// If a worker panicked, the panic is propagated to the caller after all workers have been
    /// joined.
    pub fn join(mut self) -> Vec<WorkerRecord> {
        match self.wait_for_exit() {
            Ok(records) => records,
            Err(payload) => resume_unwind(payload),
        }
    }

    fn wait_for_exit(&mut self) -> thread::Result<Vec<WorkerRecord>> {
        let mut records = Vec::with_capacity(self.workers.len());
        let mut payload = None;
        for worker in self.workers.drain(..) {
            match worker.try_join() {
                Ok(record) => records.push(record),
                Err(pl) if payload.is_none() => payload = Some(pl),
                Err(_) => {}
            }
        }
        match payload {
            Some(payload) => Err(payload),
            None => Ok(records),
        }
    }
}
