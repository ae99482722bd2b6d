use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use quiesce::{StopPolicy, Supervisor, TerminationCause};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Feeds a counter into a pool of workers and winds everything down on exhaustion, timeout or
/// Ctrl+C.
#[derive(Parser, Debug)]
#[command(name = "quiesce", version, about)]
struct Args {
    /// Number of worker threads
    workers: usize,

    /// Cancel the run after this many seconds
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Produce this many items and then stop (produces forever if omitted)
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Capacity of the channel between producer and workers
    #[arg(short, long, default_value_t = 0)]
    capacity: usize,

    /// Wait this long between produced items
    #[arg(long, value_name = "MS", default_value_t = 0)]
    interval_ms: u64,

    /// Drop items received after cancellation instead of finishing them
    #[arg(long)]
    immediate: bool,

    /// Don't cancel the run on SIGINT/SIGTERM
    #[arg(long)]
    no_interrupt: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn,quiesce=info",
        1 => "info,quiesce=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut builder = Supervisor::builder()
        .workers(args.workers)
        .capacity(args.capacity)
        .interrupt(!args.no_interrupt)
        .name("quiesce");
    if let Some(secs) = args.timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    if args.interval_ms != 0 {
        builder = builder.pace(Duration::from_millis(args.interval_ms));
    }
    if args.immediate {
        builder = builder.policy(StopPolicy::Immediate);
    }

    let items: Box<dyn Iterator<Item = u64> + Send> = match args.count {
        Some(count) => Box::new(1..=count),
        None => Box::new(1..),
    };

    let report = builder
        .build()
        .run(items, |id, item| println!("worker {id} processed {item}"))
        .context("run failed")?;

    match report.reason {
        Some(reason) => println!("cancelled ({reason})"),
        None => println!("input exhausted"),
    }
    println!(
        "producer sent {} item(s), workers processed {}",
        report.producer.items_sent,
        report.items_processed(),
    );
    for worker in &report.workers {
        let cause = match worker.cause {
            TerminationCause::ChannelClosed => "channel closed",
            TerminationCause::Cancelled => "cancelled",
        };
        println!(
            "  worker {}: {} item(s), {cause}",
            worker.id, worker.items_processed
        );
    }
    println!("all workers finished");
    Ok(())
}
