use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::events::JobEvent;
use crate::job::Job;
use crate::keys::ClaimKeys;
use crate::queue::QueueConfig;

/// Pause after a failed claim before the loop tries again.
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Consumer code run for each claimed job. Returning an error fails the
/// job, which is then retried or dead-lettered per its queue's settings.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        self(job).await
    }
}

/// Tracks the jobs a dispatcher has claimed but not yet resolved. Every
/// resolution happens under the lock and removes the job, so a job racing
/// between its handler finishing and a forced cancellation is resolved by
/// exactly one of them.
pub(crate) struct JobManager {
    client: Client,
    queue: QueueConfig,
    jobs: Mutex<HashMap<u64, Job>>,
}

impl JobManager {
    pub(crate) fn new(client: Client, queue: QueueConfig) -> Self {
        Self {
            client,
            queue,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn add(&self, job: Job) {
        self.jobs.lock().await.insert(job.id(), job);
    }

    #[cfg(test)]
    pub(crate) async fn in_flight(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Marks a tracked job finished. Returns false if it was already
    /// resolved elsewhere. A job whose new state can't be saved stays
    /// tracked, so cancelling still resolves it.
    pub(crate) async fn success(&self, id: u64) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.remove(&id) else {
            return false;
        };

        let mut finished = job.clone();
        match self.client.finish(&mut finished).await {
            Ok(()) => self.notify(&finished).await,
            Err(error) => {
                error!(job_id = id, %error, "failed to persist finished job");
                jobs.insert(id, job);
            },
        }

        true
    }

    /// Retries or dead-letters a tracked job. Returns false if it was
    /// already resolved elsewhere. Like [`JobManager::success`], a failed
    /// save leaves the job tracked.
    pub(crate) async fn fail(&self, id: u64) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.remove(&id) else {
            return false;
        };

        let mut failed = job.clone();
        match self.apply_failure(&mut failed).await {
            Ok(()) => self.notify(&failed).await,
            Err(error) => {
                error!(job_id = id, %error, "failed to persist failed job");
                jobs.insert(id, job);
            },
        }

        true
    }

    /// Fails every tracked job. Only used when cancelling.
    pub(crate) async fn fail_all(&self) -> usize {
        let mut jobs = self.jobs.lock().await;
        let snapshot: Vec<Job> = jobs.drain().map(|(_, job)| job).collect();

        let n = snapshot.len();
        for mut job in snapshot {
            match self.apply_failure(&mut job).await {
                Ok(()) => self.notify(&job).await,
                Err(error) => error!(
                    job_id = job.id(),
                    %error,
                    "failed to persist cancelled job"
                ),
            }
        }

        n
    }

    async fn apply_failure(&self, job: &mut Job) -> Result<()> {
        if job.num_attempts() < self.queue.max_attempts {
            debug!(
                job_id = job.id(),
                attempt = job.num_attempts(),
                "retrying job"
            );
            self.client.retry(job, &self.queue).await
        } else {
            warn!(
                job_id = job.id(),
                attempt = job.num_attempts(),
                "job is dead"
            );
            self.client.kill(job).await
        }
    }

    async fn notify(&self, job: &Job) {
        let event = JobEvent::new(&self.queue.name, job);
        if let Err(error) = self.client.publish_event(&event).await {
            debug!(job_id = job.id(), %error, "failed to publish job event");
        }
    }
}

/// One registered queue and its handler, before it is started.
pub(crate) struct Dispatcher {
    queue: QueueConfig,
    handler: Arc<dyn Handler>,
}

impl Dispatcher {
    pub(crate) fn new(queue: QueueConfig, handler: Arc<dyn Handler>) -> Self {
        Self {
            queue: queue.normalized(),
            handler,
        }
    }

    pub(crate) fn queue(&self) -> &QueueConfig {
        &self.queue
    }

    /// Starts the dispatch loop on the current runtime.
    pub(crate) fn run(self, client: Client) -> RunningDispatcher {
        let slots = Arc::new(Semaphore::new(self.queue.num_workers));
        let manager =
            Arc::new(JobManager::new(client.clone(), self.queue.clone()));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(dispatch(
            client,
            self.queue.clone(),
            self.handler,
            slots.clone(),
            manager.clone(),
            cancel.clone(),
        ));

        RunningDispatcher {
            queue: self.queue,
            slots,
            manager,
            cancel,
            task,
        }
    }
}

pub(crate) struct RunningDispatcher {
    queue: QueueConfig,
    slots: Arc<Semaphore>,
    manager: Arc<JobManager>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningDispatcher {
    #[cfg(test)]
    pub(crate) fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    /// Stops claiming, waits up to `grace` for in-flight jobs to finish, then
    /// fails whatever is still tracked.
    #[instrument(skip_all, fields(queue = %self.queue.name))]
    pub(crate) async fn cancel(self, grace: Duration) {
        // A claim already under way when the token fires still hands its job
        // to a slot, so that job gets the grace period too.
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            error!(%error, "dispatch loop failed");
        }

        if !grace.is_zero() {
            let n = u32::try_from(self.queue.num_workers).unwrap_or(u32::MAX);
            match tokio::time::timeout(grace, self.slots.acquire_many(n)).await
            {
                Ok(_) => debug!("in-flight jobs drained"),
                Err(_) => debug!(?grace, "grace period elapsed"),
            }
        }

        let failed = self.manager.fail_all().await;
        info!(failed, "dispatcher stopped");
    }
}

async fn dispatch(
    client: Client,
    queue: QueueConfig,
    handler: Arc<dyn Handler>,
    slots: Arc<Semaphore>,
    manager: Arc<JobManager>,
    cancel: CancellationToken,
) {
    let keys = ClaimKeys::new(client.keys(), &queue.name);
    let span = info_span!("dispatch", queue = %queue.name);

    async move {
        info!(workers = queue.num_workers, "dispatcher started");

        loop {
            let permit = select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match client.claim_with(&keys).await {
                Ok(Some(job)) => {
                    manager.add(job.clone()).await;
                    let span = info_span!("job", job_id = job.id());
                    tokio::spawn(
                        run_job(handler.clone(), manager.clone(), job, permit)
                            .instrument(span),
                    );
                },
                Ok(None) => {},
                Err(Error::Corrupt { key, source }) => {
                    error!(%key, error = %source, "dead-lettering corrupt job");
                    if let Err(error) = client.bury_corrupt(&key).await {
                        error!(%key, %error, "failed to dead-letter job");
                    }
                },
                Err(Error::JobNotFound(id)) => {
                    warn!(job_id = id, "queued job has no stored data");
                },
                Err(error) => {
                    drop(permit);
                    warn!(%error, "claim failed");
                    select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(CLAIM_ERROR_BACKOFF) => {},
                    }
                },
            }
        }

        debug!("dispatch loop exited");
    }
    .instrument(span)
    .await
}

/// Runs the handler and resolves the job. The slot is only given back once
/// the outcome has been persisted.
async fn run_job(
    handler: Arc<dyn Handler>,
    manager: Arc<JobManager>,
    job: Job,
    _permit: OwnedSemaphorePermit,
) {
    let id = job.id();
    debug!(attempt = job.num_attempts(), "running job");

    // A separate task turns a panicking handler into a failed job.
    let outcome =
        tokio::spawn(async move { handler.handle(job).await }).await;

    match outcome {
        Ok(Ok(())) => {
            if manager.success(id).await {
                debug!("job finished");
            }
        },
        Ok(Err(error)) => {
            warn!(error = format!("{error:#}"), "job failed");
            manager.fail(id).await;
        },
        Err(error) => {
            error!(%error, "job handler panicked");
            manager.fail(id).await;
        },
    }
}
