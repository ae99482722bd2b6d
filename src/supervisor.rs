//! Wiring of a complete run: signal, channel, producer, workers and trigger sources.

use std::{convert::Infallible, fmt, time::Duration};

use crossbeam_channel::{select, Receiver};

use crate::{
    background,
    cancel::{CancellationSignal, Reason},
    channel::BoundedChannel,
    error::{ConfigError, RunError},
    interrupt,
    producer::{Producer, ProducerExit, ProducerReport},
    worker::{StopPolicy, TerminationCause, WorkerPool, WorkerRecord},
};

/// A builder object that can be used to configure a [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorBuilder {
    workers: usize,
    capacity: usize,
    timeout: Option<Duration>,
    interrupt: bool,
    policy: StopPolicy,
    pace: Option<Duration>,
    name: String,
}

impl SupervisorBuilder {
    /// Sets the number of worker threads. Defaults to 1.
    #[inline]
    pub fn workers(self, workers: usize) -> Self {
        Self { workers, ..self }
    }

    /// Sets the capacity of the channel between the producer and the workers.
    ///
    /// By default, a capacity of 0 is used, which means every item is handed directly from the
    /// producer to an idle worker.
    #[inline]
    pub fn capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    /// Cancels the run with [`Reason::Timeout`] if it is still going after `timeout`.
    #[inline]
    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Cancels the run with [`Reason::Interrupt`] on SIGINT or SIGTERM.
    #[inline]
    pub fn interrupt(self, interrupt: bool) -> Self {
        Self { interrupt, ..self }
    }

    #[inline]
    pub fn policy(self, policy: StopPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Makes the producer wait `interval` between items.
    #[inline]
    pub fn pace(self, interval: Duration) -> Self {
        Self {
            pace: Some(interval),
            ..self
        }
    }

    /// Sets the base name of the run's threads.
    ///
    /// Workers are named `{name}-{id}`, the producer `{name}-producer` and the deadline watcher
    /// `{name}-deadline`.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    /// Checks the configuration without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(timeout));
            }
        }
        Ok(())
    }

    /// Creates the [`Supervisor`] and its [`CancellationSignal`].
    ///
    /// The configuration is validated by [`Supervisor::run`].
    pub fn build(self) -> Supervisor {
        Supervisor {
            config: self,
            signal: CancellationSignal::new(),
        }
    }
}

/// Owns one run: starts it, wires its cancellation triggers, and waits for it to wind down.
///
/// ```
/// use std::time::Duration;
/// use quiesce::{Reason, Supervisor, TerminationCause};
///
/// let supervisor = Supervisor::builder().workers(4).build();
/// let signal = supervisor.signal().clone();
/// let stopper = std::thread::spawn(move || {
///     std::thread::sleep(Duration::from_millis(50));
///     signal.trigger(Reason::Manual);
/// });
///
/// // An endless sequence, so only the manual trigger ends the run.
/// let report = supervisor.run(0u64.., |_, _| {}).unwrap();
/// stopper.join().unwrap();
///
/// assert_eq!(report.reason, Some(Reason::Manual));
/// assert!(report.workers.iter().all(|w| w.cause == TerminationCause::Cancelled));
/// ```
pub struct Supervisor {
    config: SupervisorBuilder,
    signal: CancellationSignal,
}

impl Supervisor {
    /// Returns a builder that can be used to configure a [`Supervisor`].
    #[inline]
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder {
            workers: 1,
            capacity: 0,
            timeout: None,
            interrupt: false,
            policy: StopPolicy::default(),
            pace: None,
            name: "worker".into(),
        }
    }

    /// Returns the run's cancellation signal.
    ///
    /// Clone it to cancel the run from another thread, or to observe how it ended.
    #[inline]
    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Cancels the run with [`Reason::Manual`].
    ///
    /// Calling this before [`run`][Self::run] makes the run stop right after it started.
    pub fn stop(&self) -> bool {
        self.signal.trigger(Reason::Manual)
    }

    /// Feeds `items` to the workers, which pass each one to `handler`, until the items run out or
    /// the run is cancelled.
    ///
    /// This returns once every thread of the run has stopped: all workers, the producer, and the
    /// deadline watcher. Items that were still in the channel when the run was cancelled are
    /// dropped.
    ///
    /// # Errors
    ///
    /// An invalid configuration, or a failure to install the interrupt handler, is reported
    /// before anything is started. If a thread cannot be spawned, the run is cancelled and
    /// everything started so far is joined before the error is returned.
    ///
    /// # Panics
    ///
    /// If `handler` panics, the run is cancelled with [`Reason::Panicked`] and the panic is
    /// propagated once the other threads have been joined.
    pub fn run<T, I, F>(self, items: I, handler: F) -> Result<RunReport, RunError>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        self.config.validate()?;
        let Supervisor { config, signal } = self;

        let _interrupt = if config.interrupt {
            Some(interrupt::register(&signal).map_err(RunError::Interrupt)?)
        } else {
            None
        };

        let channel = BoundedChannel::new(config.capacity);
        let pool = WorkerPool::builder()
            .name(config.name.clone())
            .policy(config.policy)
            .spawn(config.workers, &channel, &signal, handler)
            .map_err(RunError::Spawn)?;

        let mut producer = Producer::new(channel, signal.clone());
        if let Some(pace) = config.pace {
            producer = producer.pace(pace);
        }
        let producer = background::spawn(format!("{}-producer", config.name), move || {
            producer.run(items)
        })
        .map_err(RunError::Spawn)?;

        let (release, released) = crossbeam_channel::bounded::<Infallible>(0);
        let deadline = match config.timeout {
            Some(timeout) => {
                let watcher = signal.clone();
                let spawned = background::spawn(format!("{}-deadline", config.name), move || {
                    watch_deadline(&watcher, timeout, &released)
                });
                match spawned {
                    Ok(deadline) => Some(deadline),
                    Err(e) => {
                        // The producer is joined on the way out and may be feeding an endless
                        // sequence.
                        signal.trigger(Reason::Manual);
                        return Err(RunError::Spawn(e));
                    }
                }
            }
            None => None,
        };
        log::info!(
            "run started with {} worker(s), capacity {}, timeout {:?}",
            config.workers,
            config.capacity,
            config.timeout,
        );

        let workers = pool.join();
        drop(release);
        if let Some(deadline) = deadline {
            deadline.join();
        }
        let producer = producer.join()?;

        let reason = settled_reason(&workers, &producer, &signal);
        match reason {
            Some(reason) => log::info!("all {} worker(s) stopped ({reason})", workers.len()),
            None => log::info!("all {} worker(s) stopped, input exhausted", workers.len()),
        }
        Ok(RunReport {
            workers,
            producer,
            reason,
        })
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("signal", &self.signal)
            .finish()
    }
}

/// Fires `signal` with [`Reason::Timeout`] after `timeout`, unless the signal fires first or the
/// run is over (`released` disconnects).
fn watch_deadline(signal: &CancellationSignal, timeout: Duration, released: &Receiver<Infallible>) {
    select! {
        recv(crossbeam_channel::after(timeout)) -> _ => {
            if signal.trigger(Reason::Timeout) {
                log::info!("deadline of {timeout:?} expired");
            }
        }
        recv(signal.as_receiver()) -> _ => {}
        recv(released) -> _ => {}
    }
}

/// The signal's reason, if the run actually ended because of it.
///
/// A deadline or interrupt can still fire after the input ran out and every worker drained the
/// channel, while the run is being joined. That run was not cancelled.
fn settled_reason(
    workers: &[WorkerRecord],
    producer: &ProducerReport,
    signal: &CancellationSignal,
) -> Option<Reason> {
    let cancelled = producer.exit == ProducerExit::Cancelled
        || workers.iter().any(|w| w.cause == TerminationCause::Cancelled);
    if cancelled {
        signal.reason()
    } else {
        None
    }
}

/// How a run went, returned by [`Supervisor::run`] once everything has stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// One record per worker, ordered by id.
    pub workers: Vec<WorkerRecord>,
    pub producer: ProducerReport,
    /// Why the run was cancelled, or [`None`] if it ended because the items ran out.
    pub reason: Option<Reason>,
}

impl RunReport {
    /// Returns the number of items processed by all workers together.
    pub fn items_processed(&self) -> u64 {
        self.workers.iter().map(|w| w.items_processed).sum()
    }

    /// Returns the number of workers that stopped for `cause`.
    pub fn stopped_by(&self, cause: TerminationCause) -> usize {
        self.workers.iter().filter(|w| w.cause == cause).count()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.reason.is_some()
    }
}
