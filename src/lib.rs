//! Cooperative cancellation and graceful shutdown for a producer feeding a pool of worker threads.
//!
//! (if you want to process an existing collection in parallel and don't care about stopping
//! halfway, check out [`rayon`] instead; if your work is mostly waiting on I/O, you're probably
//! better served by an `async` runtime)
//!
//! # Overview
//!
//! A *run* consists of one producer, a bounded channel, and a fixed number of worker threads. The
//! producer feeds items into the channel, the workers take them out and hand them to a shared
//! handler. A run ends in one of two ways:
//!
//! - The producer runs out of items and closes the channel. The workers drain what is left and
//!   stop.
//! - The run's [`CancellationSignal`] fires. Everybody stops at the next opportunity, including a
//!   producer blocked on a full channel and workers blocked on an empty one.
//!
//! The signal fires at most once, and the first trigger determines the [`Reason`] the run
//! reports: a manual [`Supervisor::stop`], a deadline, an interrupt (see [`interrupt`]), or a
//! panicking handler.
//!
//! ## Structured concurrency
//!
//! Every thread of a run is owned. [`Supervisor::run`] only returns after all of them have been
//! joined, and dropping a [`WorkerPool`] cancels and joins its workers. If a handler panics, the
//! panic is forwarded to the thread that owns the run, as if it had called the handler itself.
//!
//! ## Building blocks
//!
//! [`Supervisor`] wires everything together. The pieces it is made of are public, too:
//! [`CancellationSignal`], [`BoundedChannel`], [`Producer`] and [`WorkerPool`]. Pools can be
//! chained into a pipeline with [`WorkerPoolBuilder::spawn_stage`].
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use quiesce::{Supervisor, TerminationCause};
//!
//! let report = Supervisor::builder()
//!     .workers(3)
//!     .timeout(Duration::from_secs(60))
//!     .build()
//!     .run(1..=5, |id, item: i32| println!("worker {id} processed {item}"))
//!     .unwrap();
//!
//! assert_eq!(report.items_processed(), 5);
//! assert_eq!(report.reason, None);
//! assert!(report.workers.iter().all(|w| w.cause == TerminationCause::ChannelClosed));
//! ```
//!
//! [`rayon`]: https://crates.io/crates/rayon

mod background;
mod cancel;
mod channel;
mod drop;
mod error;
pub mod interrupt;
mod producer;
mod supervisor;
mod sync;
mod worker;

pub use cancel::{CancellationSignal, Reason};
pub use channel::{BoundedChannel, Received};
pub use error::{
    AlreadyClosed, ChannelClosed, ConfigError, DisciplineError, RunError, SendUntilError,
};
pub use producer::{Producer, ProducerExit, ProducerReport};
pub use supervisor::{RunReport, Supervisor, SupervisorBuilder};
pub use worker::{StopPolicy, TerminationCause, WorkerPool, WorkerPoolBuilder, WorkerRecord};
