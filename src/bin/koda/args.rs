use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use koda::client::{DEFAULT_PREFIX, DEFAULT_URL};

use crate::util::parse_seconds;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// Redis server to use, as redis://[auth@]host[:port][/db].
    #[arg(short, long, env = "KODA_URL", default_value = DEFAULT_URL)]
    pub(crate) url: String,
    /// Namespace for every key koda touches.
    #[arg(short, long, env = "KODA_PREFIX", default_value = DEFAULT_PREFIX)]
    pub(crate) prefix: String,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Creates a job from a JSON payload and queues it.
    Submit {
        queue: String,
        payload: String,
        #[command(flatten)]
        schedule: Schedule,
    },
    /// Creates a job without queueing it. Prints the new job's id.
    Create { payload: String },
    /// Queues a job made by `create`.
    Enqueue {
        queue: String,
        id: u64,
        #[command(flatten)]
        schedule: Schedule,
    },
    /// Prints a stored job as YAML.
    Show { id: u64 },
    /// Prints a queue's job events as they are published.
    Tail { queue: String },
    /// Consumes jobs, logging and finishing each one.
    Work {
        /// Queues to consume, as NAME or NAME:WORKERS.
        #[arg(required = true)]
        queues: Vec<QueueSpec>,
        /// Attempts per job before it is dead-lettered.
        #[arg(long, default_value_t = 1)]
        max_attempts: u32,
        /// Seconds between a failed attempt and the retry.
        #[arg(long, default_value = "0", value_parser = parse_seconds)]
        retry_interval: Duration,
        /// Seconds in-flight jobs get to finish after ctrl-c.
        #[arg(long, default_value = "0", value_parser = parse_seconds)]
        grace: Duration,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct Schedule {
    /// Priority from 0 (lowest) to 100 (highest).
    #[arg(
        long,
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=100),
    )]
    pub(crate) priority: u8,
    /// Seconds until the job can be claimed.
    #[arg(long, conflicts_with = "priority", value_parser = parse_seconds)]
    pub(crate) delay: Option<Duration>,
}

/// `name[:workers]` as given to `work`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct QueueSpec {
    pub(crate) name: String,
    pub(crate) workers: usize,
}

impl FromStr for QueueSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, workers) = match s.split_once(':') {
            Some((name, n)) => {
                let n = n
                    .parse()
                    .map_err(|_| format!("bad worker count in {s:?}"))?;
                (name, n)
            },
            None => (s, 1),
        };

        if name.is_empty() {
            return Err("queue name is empty".into());
        }
        if workers == 0 {
            return Err(format!("{name} needs at least one worker"));
        }

        Ok(Self {
            name: name.into(),
            workers,
        })
    }
}
