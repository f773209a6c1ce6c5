use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::client::Client;
use crate::dispatcher::{Dispatcher, Handler, RunningDispatcher};
use crate::queue::QueueConfig;

/// Collects queue handlers, then runs one dispatcher per queue.
///
/// ```no_run
/// # async fn run(client: koda::Client) {
/// let mut worker = koda::Worker::new(client);
/// worker.register(
///     koda::QueueConfig::new("scrape").with_num_workers(4),
///     |job: koda::Job| async move {
///         println!("scraping {}", job.payload().value());
///         anyhow::Ok(())
///     },
/// );
/// worker.work_forever().await;
/// # }
/// ```
pub struct Worker {
    client: Client,
    dispatchers: Vec<Dispatcher>,
}

impl Worker {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            dispatchers: Vec::new(),
        }
    }

    /// Registers `handler` for `queue`. Settings below their minimum are
    /// raised to it.
    pub fn register<H: Handler>(
        &mut self,
        queue: QueueConfig,
        handler: H,
    ) -> &mut Self {
        self.dispatchers.push(Dispatcher::new(queue, Arc::new(handler)));
        self
    }

    /// Starts every registered dispatcher on the current runtime.
    pub fn work(self) -> Canceller {
        if self.dispatchers.is_empty() {
            warn!("no queues registered");
        }

        let dispatchers = self
            .dispatchers
            .into_iter()
            .map(|dispatcher| {
                let queue = dispatcher.queue();
                info!(
                    queue = %queue.name,
                    workers = queue.num_workers,
                    max_attempts = queue.max_attempts,
                    "starting dispatcher"
                );
                dispatcher.run(self.client.clone())
            })
            .collect();

        Canceller { dispatchers }
    }

    /// Runs until ctrl-c, then cancels without a grace period.
    pub async fn work_forever(self) {
        let canceller = self.work();

        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "failed to listen for ctrl-c");
        }
        info!("interrupted, cancelling");

        canceller.cancel().await;
    }
}

/// Stops the dispatchers started by [`Worker::work`].
pub struct Canceller {
    dispatchers: Vec<RunningDispatcher>,
}

impl Canceller {
    /// Stops immediately. In-flight jobs are failed.
    pub async fn cancel(self) {
        self.cancel_with_timeout(Duration::ZERO).await
    }

    /// Gives in-flight jobs up to `grace` to finish before they are failed.
    /// Every dispatcher is cancelled concurrently.
    pub async fn cancel_with_timeout(self, grace: Duration) {
        let mut tasks = JoinSet::new();
        for dispatcher in self.dispatchers {
            tasks.spawn(dispatcher.cancel(grace));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                error!(%error, "failed to cancel dispatcher");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn dispatchers(&self) -> &[RunningDispatcher] {
        &self.dispatchers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use tokio::sync::Notify;

    use crate::client::tests::memory_client;
    use crate::job::{Job, JobState};
    use crate::storage::Conn;

    async fn finish(_job: Job) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reject(_job: Job) -> anyhow::Result<()> {
        anyhow::bail!("always")
    }

    async fn wait_for_state(client: &Client, id: u64, state: JobState) -> Job {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let job = client.job(id).await.unwrap();
            if job.state() == state {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "job {id} stuck in {}, wanted {state}",
                job.state()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_processes_submitted_job() {
        let (client, _) = memory_client();
        let seen = Arc::new(AtomicUsize::new(0));

        let mut worker = Worker::new(client.clone());
        let counter = seen.clone();
        worker.register(QueueConfig::new("q"), move |job: Job| {
            let counter = counter.clone();
            async move {
                assert_eq!(job.state(), JobState::Working);
                assert_eq!(job.payload().decode::<String>()?, "hello");
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });
        let canceller = worker.work();

        let job = client.submit("q", 0, "hello").await.unwrap();
        let done = wait_for_state(&client, job.id(), JobState::Finished).await;

        assert_eq!(done.num_attempts(), 1);
        assert!(done.completion_time().is_some());
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        canceller.cancel().await;
    }

    #[tokio::test]
    async fn test_retry_then_dead() {
        let (client, store) = memory_client();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = client.subscribe("q").await.unwrap();

        let mut worker = Worker::new(client.clone());
        let counter = calls.clone();
        worker.register(
            QueueConfig::new("q")
                .with_max_attempts(2)
                .with_retry_interval(Duration::from_millis(200)),
            move |_job: Job| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("feed unreachable"))
                }
            },
        );
        let canceller = worker.work();

        let job = client.submit("q", 0, "x").await.unwrap();

        let first = events.next().await.unwrap();
        assert_eq!(first.id, job.id());
        assert_eq!(first.state, JobState::Queued);
        assert_eq!(first.num_attempts, 1);

        let second = events.next().await.unwrap();
        assert_eq!(second.state, JobState::Dead);
        assert_eq!(second.num_attempts, 2);

        let dead = wait_for_state(&client, job.id(), JobState::Dead).await;
        assert_eq!(dead.num_attempts(), 2);
        assert!(dead.delayed_until().is_some());

        // Nothing left for a third attempt.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.sorted_set("test:delayed_queue:q").is_empty());

        canceller.cancel().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_job() {
        let (client, _) = memory_client();

        let mut worker = Worker::new(client.clone());
        worker.register(QueueConfig::new("q"), |job: Job| async move {
            if job.num_attempts() > 0 {
                panic!("handler bug");
            }
            anyhow::Ok(())
        });
        let canceller = worker.work();

        let job = client.submit("q", 0, "x").await.unwrap();
        wait_for_state(&client, job.id(), JobState::Dead).await;

        canceller.cancel().await;
    }

    #[tokio::test]
    async fn test_cancel_fails_in_flight_job() {
        let (client, _) = memory_client();
        let started = Arc::new(Notify::new());

        let mut worker = Worker::new(client.clone());
        let signal = started.clone();
        worker.register(
            QueueConfig::new("q").with_max_attempts(2),
            move |_job: Job| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    std::future::pending::<()>().await;
                    anyhow::Ok(())
                }
            },
        );
        let canceller = worker.work();

        let job = client.submit("q", 0, "x").await.unwrap();
        started.notified().await;
        assert_eq!(canceller.dispatchers()[0].manager().in_flight().await, 1);

        tokio::time::timeout(Duration::from_secs(5), canceller.cancel())
            .await
            .unwrap();

        let job = client.job(job.id()).await.unwrap();
        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.num_attempts(), 1);

        // The loop is gone, so the retry is never picked up.
        let next = client.submit("q", 0, "y").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            client.job(next.id()).await.unwrap().state(),
            JobState::Queued
        );
    }

    #[tokio::test]
    async fn test_cancel_with_timeout_lets_job_finish() {
        let (client, _) = memory_client();
        let started = Arc::new(Notify::new());

        let mut worker = Worker::new(client.clone());
        let signal = started.clone();
        worker.register(QueueConfig::new("q"), move |_job: Job| {
            let signal = signal.clone();
            async move {
                signal.notify_one();
                tokio::time::sleep(Duration::from_millis(100)).await;
                anyhow::Ok(())
            }
        });
        let canceller = worker.work();

        let job = client.submit("q", 0, "x").await.unwrap();
        started.notified().await;
        canceller.cancel_with_timeout(Duration::from_secs(5)).await;

        assert_eq!(
            client.job(job.id()).await.unwrap().state(),
            JobState::Finished
        );
    }

    #[tokio::test]
    async fn test_no_new_claims_during_grace_period() {
        let (client, _) = memory_client();
        let started = Arc::new(Notify::new());

        let mut worker = Worker::new(client.clone());
        let signal = started.clone();
        worker.register(QueueConfig::new("q"), move |_job: Job| {
            let signal = signal.clone();
            async move {
                signal.notify_one();
                tokio::time::sleep(Duration::from_millis(200)).await;
                anyhow::Ok(())
            }
        });
        let canceller = worker.work();

        let first = client.submit("q", 0, "first").await.unwrap();
        started.notified().await;
        let second = client.submit("q", 0, "second").await.unwrap();

        canceller.cancel_with_timeout(Duration::from_secs(5)).await;

        let first = client.job(first.id()).await.unwrap();
        assert_eq!(first.state(), JobState::Finished);

        let second = client.job(second.id()).await.unwrap();
        assert_eq!(second.state(), JobState::Queued);
        assert_eq!(second.num_attempts(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_workers() {
        let (client, _) = memory_client();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut worker = Worker::new(client.clone());
        let (r, p) = (running.clone(), peak.clone());
        worker.register(
            QueueConfig::new("q").with_num_workers(2),
            move |_job: Job| {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            },
        );
        let canceller = worker.work();

        let mut ids = Vec::new();
        for n in 0..6 {
            ids.push(client.submit("q", 0, &n).await.unwrap().id());
        }
        for id in ids {
            wait_for_state(&client, id, JobState::Finished).await;
        }

        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency {peak}");
        canceller.cancel().await;
    }

    #[tokio::test]
    async fn test_corrupt_job_dead_lettered() {
        let (client, store) = memory_client();
        let mut conn = store.conn();

        let bad = client.keys().job(999);
        conn.hset_all(&bad, &[("id", "999".into()), ("state", "1".into())])
            .await
            .unwrap();
        conn.rpush(&client.keys().priority_queue("q", 50), &[bad.clone()])
            .await
            .unwrap();

        let mut worker = Worker::new(client.clone());
        worker.register(QueueConfig::new("q"), finish);
        let canceller = worker.work();

        let good = client.submit("q", 0, "ok").await.unwrap();
        wait_for_state(&client, good.id(), JobState::Finished).await;

        let fields = conn.hget_all(&bad).await.unwrap();
        assert_eq!(
            fields.get("state").map(String::as_str),
            Some(JobState::Dead.as_i64().to_string().as_str())
        );

        canceller.cancel().await;
    }

    #[tokio::test]
    async fn test_multiple_queues() {
        let (client, _) = memory_client();

        let mut worker = Worker::new(client.clone());
        worker
            .register(QueueConfig::new("a"), finish)
            .register(QueueConfig::new("b"), reject);
        let canceller = worker.work();

        let a = client.submit("a", 0, &1).await.unwrap();
        let b = client.submit("b", 0, &2).await.unwrap();
        wait_for_state(&client, a.id(), JobState::Finished).await;
        wait_for_state(&client, b.id(), JobState::Dead).await;

        canceller.cancel_with_timeout(Duration::from_millis(50)).await;
    }
}
