mod args;
mod util;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use koda::{Client, Job, Options, QueueConfig, Worker};
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Level};

use crate::args::{Args, Command, QueueSpec, Schedule};
use crate::util::bytes_to_human_str;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    if let Err(error) = begin(args, cancel).await {
        error!(error = format!("{error:#}"), "command failed");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn begin(args: Args, cancel: CancellationToken) -> Result<()> {
    let client = Client::new(
        Options::default()
            .with_url(args.url)
            .with_prefix(args.prefix),
    )
    .context("configuring client")?;

    let ret = run(&client, args.command, cancel).await;
    client.close().await;

    ret
}

async fn run(
    client: &Client,
    command: Command,
    cancel: CancellationToken,
) -> Result<()> {
    match command {
        Command::Submit {
            queue,
            payload,
            schedule: Schedule { priority, delay },
        } => {
            let payload = parse_payload(&payload)?;
            let job = match delay {
                Some(delay) => {
                    client.submit_delayed(&queue, delay, &payload).await?
                },
                None => client.submit(&queue, priority, &payload).await?,
            };
            println!("{}", job.id());
        },
        Command::Create { payload } => {
            let job = client.create_job(&parse_payload(&payload)?).await?;
            println!("{}", job.id());
        },
        Command::Enqueue {
            queue,
            id,
            schedule: Schedule { priority, delay },
        } => {
            let job = client.job(id).await?;
            match delay {
                Some(delay) => {
                    client.submit_delayed_job(&queue, delay, &job).await?
                },
                None => client.submit_job(&queue, priority, &job).await?,
            };
        },
        Command::Show { id } => {
            let job = client.job(id).await?;
            print!("{}", serde_yaml::to_string(&job)?);
        },
        Command::Tail { queue } => tail(client, &queue, cancel).await?,
        Command::Work {
            queues,
            max_attempts,
            retry_interval,
            grace,
        } => {
            let mut worker = Worker::new(client.clone());
            for QueueSpec { name, workers } in queues {
                let queue = QueueConfig::new(name)
                    .with_num_workers(workers)
                    .with_max_attempts(max_attempts)
                    .with_retry_interval(retry_interval);
                worker.register(queue, log_job);
            }

            let canceller = worker.work();
            cancel.cancelled().await;
            info!(?grace, "shutting down");
            canceller.cancel_with_timeout(grace).await;
        },
    }

    Ok(())
}

fn parse_payload(payload: &str) -> Result<serde_json::Value> {
    serde_json::from_str(payload).context("payload is not valid JSON")
}

async fn tail(
    client: &Client,
    queue: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let mut events = client.subscribe(queue).await?;
    debug!(queue, "following events");

    loop {
        let event = select! {
            event = events.next() => match event {
                Some(event) => event,
                None => return Ok(()),
            },
            _ = cancel.cancelled() => return Ok(()),
        };

        println!("{}", serde_json::to_string(&event)?);
    }
}

#[instrument(skip_all, fields(job_id = job.id()))]
async fn log_job(job: Job) -> Result<()> {
    info!(
        attempt = job.num_attempts(),
        payload = bytes_to_human_str(job.payload().raw()),
        "received job"
    );

    Ok(())
}
