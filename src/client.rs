use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::codec::{self, DecodeError, Field};
use crate::error::{Error, Result};
use crate::events::{EventStream, JobEvent};
use crate::job::{Job, JobState, Payload};
use crate::keys::{ClaimKeys, Keyspace};
use crate::pool::{Pool, PooledConn};
use crate::queue::{clamp_priority, QueueConfig};
use crate::storage::{Conn, ConnFactory, RedisConnFactory};

pub const DEFAULT_URL: &str = "redis://localhost:6379";
pub const DEFAULT_PREFIX: &str = "koda";

/// How long one claim waits on the priority lists before giving up. This
/// also bounds how stale a due delayed job can get and how long a
/// dispatcher takes to notice cancellation.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct Options {
    /// Store url, `redis://[auth@]host[:port][/db]`.
    pub url: String,
    /// Namespace for every key.
    pub prefix: String,
    /// Replaces the Redis connection factory built from `url`.
    pub conn_factory: Option<Arc<dyn ConnFactory>>,
    /// Zero is replaced by [`DEFAULT_CLAIM_TIMEOUT`].
    pub claim_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            prefix: DEFAULT_PREFIX.to_owned(),
            conn_factory: None,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }
}

impl Options {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_conn_factory(mut self, factory: Arc<dyn ConnFactory>) -> Self {
        self.conn_factory = Some(factory);
        self
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Options")
            .field("url", &self.url)
            .field("prefix", &self.prefix)
            .field("conn_factory", &self.conn_factory.is_some())
            .field("claim_timeout", &self.claim_timeout)
            .finish()
    }
}

/// Sorted-set score for a deadline: fractional seconds since the epoch.
pub(crate) fn epoch_score(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

/// `now + d`, saturating at the latest representable time.
fn after(d: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct Inner {
    keys: Keyspace,
    pool: Arc<Pool>,
    claim_timeout: Duration,
}

/// Handle to one job namespace. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("prefix", &self.inner.keys.prefix())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Builds a client. No connection is opened until the first call.
    pub fn new(opts: Options) -> Result<Self> {
        let factory = match opts.conn_factory {
            Some(factory) => factory,
            None => Arc::new(RedisConnFactory::new(&opts.url)?),
        };

        // The stores read a zero wait as "block forever".
        let claim_timeout = if opts.claim_timeout.is_zero() {
            warn!("zero claim timeout, using {DEFAULT_CLAIM_TIMEOUT:?}");
            DEFAULT_CLAIM_TIMEOUT
        } else {
            opts.claim_timeout
        };

        Ok(Self {
            inner: Arc::new(Inner {
                keys: Keyspace::new(opts.prefix),
                pool: Pool::new(factory),
                claim_timeout,
            }),
        })
    }

    pub fn keys(&self) -> &Keyspace {
        &self.inner.keys
    }

    async fn conn(&self) -> Result<PooledConn> {
        self.inner.pool.get().await
    }

    /// Releases idle pooled connections.
    pub async fn close(&self) {
        self.inner.pool.close().await;
    }

    async fn persist(
        &self,
        conn: &mut PooledConn,
        job: &Job,
        fields: &[Field],
    ) -> Result<()> {
        let key = self.inner.keys.job(job.id);
        conn.hset_all(&key, &codec::encode(job, fields)).await
    }

    async fn persist_new(
        &self,
        conn: &mut PooledConn,
        job: &mut Job,
    ) -> Result<()> {
        let counter = self.inner.keys.job_id_counter();
        let id = conn.incr(&counter).await?;

        job.id = u64::try_from(id).map_err(|_| Error::Corrupt {
            key: counter,
            source: DecodeError::OutOfRange {
                field: "cur_job_id",
                value: id,
            },
        })?;
        job.creation_time = Utc::now();

        self.persist(conn, job, &[]).await
    }

    async fn load(&self, conn: &mut PooledConn, key: &str) -> Result<Job> {
        let fields = conn.hget_all(key).await?;

        codec::decode(&fields).map_err(|source| match source {
            DecodeError::Empty => match self.inner.keys.job_id(key) {
                Some(id) => Error::JobNotFound(id),
                None => Error::Corrupt {
                    key: key.to_owned(),
                    source,
                },
            },
            source => Error::Corrupt {
                key: key.to_owned(),
                source,
            },
        })
    }

    async fn enqueue(
        &self,
        conn: &mut PooledConn,
        queue: &str,
        job: &Job,
    ) -> Result<()> {
        let list = self.inner.keys.priority_queue(queue, job.priority);
        conn.rpush(&list, &[self.inner.keys.job(job.id)]).await?;
        Ok(())
    }

    async fn enqueue_delayed(
        &self,
        conn: &mut PooledConn,
        queue: &str,
        job: &Job,
    ) -> Result<()> {
        let until = job.delayed_until.unwrap_or_else(Utc::now);
        conn.add_if_absent(
            &self.inner.keys.delayed_queue(queue),
            epoch_score(until),
            &self.inner.keys.job(job.id),
        )
        .await?;
        Ok(())
    }

    /// Fetches a job by id.
    pub async fn job(&self, id: u64) -> Result<Job> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, &self.inner.keys.job(id)).await
    }

    /// Persists a job in the `Initial` state without queueing it, so it can
    /// be inspected before [`Client::submit_job`] puts it on a queue.
    pub async fn create_job<T: Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> Result<Job> {
        let mut job = Job::new(Payload::new(payload)?, JobState::Initial);

        let mut conn = self.conn().await?;
        self.persist_new(&mut conn, &mut job).await?;

        debug!(job_id = job.id, "created job");
        Ok(job)
    }

    /// Creates a job and appends it to `queue` at `priority` (clamped to
    /// 0..=100).
    pub async fn submit<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        priority: u8,
        payload: &T,
    ) -> Result<Job> {
        let mut job = Job::new(Payload::new(payload)?, JobState::Queued);
        job.priority = clamp_priority(priority.into());

        let mut conn = self.conn().await?;
        self.persist_new(&mut conn, &mut job).await?;
        self.enqueue(&mut conn, queue, &job).await?;

        debug!(
            job_id = job.id,
            queue,
            priority = job.priority,
            "submitted job"
        );
        Ok(job)
    }

    /// Queues a job previously made by [`Client::create_job`]. The stored
    /// copy must still be `Initial`.
    pub async fn submit_job(
        &self,
        queue: &str,
        priority: u8,
        job: &Job,
    ) -> Result<Job> {
        let mut conn = self.conn().await?;
        let mut job = self.load_initial(&mut conn, job.id).await?;

        job.priority = clamp_priority(priority.into());
        job.transition(JobState::Queued);
        self.persist(&mut conn, &job, &[Field::State, Field::Priority])
            .await?;
        self.enqueue(&mut conn, queue, &job).await?;

        debug!(
            job_id = job.id,
            queue,
            priority = job.priority,
            "submitted job"
        );
        Ok(job)
    }

    /// Creates a job that becomes claimable from `queue` once `delay` has
    /// passed.
    pub async fn submit_delayed<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        delay: Duration,
        payload: &T,
    ) -> Result<Job> {
        let mut job = Job::new(Payload::new(payload)?, JobState::Queued);
        job.delayed_until = Some(after(delay));

        let mut conn = self.conn().await?;
        self.persist_new(&mut conn, &mut job).await?;
        self.enqueue_delayed(&mut conn, queue, &job).await?;

        debug!(job_id = job.id, queue, ?delay, "submitted delayed job");
        Ok(job)
    }

    /// The delayed counterpart of [`Client::submit_job`].
    pub async fn submit_delayed_job(
        &self,
        queue: &str,
        delay: Duration,
        job: &Job,
    ) -> Result<Job> {
        let mut conn = self.conn().await?;
        let mut job = self.load_initial(&mut conn, job.id).await?;

        job.delayed_until = Some(after(delay));
        job.transition(JobState::Queued);
        self.persist(&mut conn, &job, &[Field::State, Field::DelayedUntil])
            .await?;
        self.enqueue_delayed(&mut conn, queue, &job).await?;

        debug!(job_id = job.id, queue, ?delay, "submitted delayed job");
        Ok(job)
    }

    async fn load_initial(
        &self,
        conn: &mut PooledConn,
        id: u64,
    ) -> Result<Job> {
        let job = self.load(conn, &self.inner.keys.job(id)).await?;
        if job.state != JobState::Initial {
            return Err(Error::InvalidState(job.state));
        }

        Ok(job)
    }

    /// Makes one claim attempt on `queue`: a due delayed job if there is one,
    /// else the head of the highest non-empty priority list, waiting up to
    /// the claim timeout. The returned job is already persisted as
    /// `Working`.
    pub async fn claim(&self, queue: &str) -> Result<Option<Job>> {
        self.claim_with(&ClaimKeys::new(&self.inner.keys, queue))
            .await
    }

    /// Claims from `queue`, retrying until a job turns up.
    pub async fn wait(&self, queue: &str) -> Result<Job> {
        let keys = ClaimKeys::new(&self.inner.keys, queue);
        loop {
            if let Some(job) = self.claim_with(&keys).await? {
                return Ok(job);
            }
        }
    }

    #[instrument(level = "trace", skip_all, fields(queue = %keys.queue))]
    pub(crate) async fn claim_with(
        &self,
        keys: &ClaimKeys,
    ) -> Result<Option<Job>> {
        let mut conn = self.conn().await?;

        // The delayed pop selects and removes in one step, so no other
        // claimer can receive the same member.
        let now = epoch_score(Utc::now());
        let due = conn.pop_due_by_score(&keys.delayed, 0.0, now, 0, 1).await?;

        let key = match due.into_iter().next() {
            Some(key) => key,
            None => match conn
                .blocking_pop_front(self.inner.claim_timeout, &keys.priorities)
                .await?
            {
                Some((_, key)) => key,
                None => return Ok(None),
            },
        };

        let mut job = self.load(&mut conn, &key).await?;
        if !job.state.can_transition_to(JobState::Working) {
            warn!(
                job_id = job.id,
                state = %job.state,
                "skipping unclaimable job"
            );
            return Ok(None);
        }

        // Persist before handing out, so a crash from here on still leaves
        // the store showing the claim.
        job.mark_working();
        self.persist(&mut conn, &job, &[Field::State, Field::NumAttempts])
            .await?;

        debug!(job_id = job.id, attempt = job.num_attempts, "claimed job");
        Ok(Some(job))
    }

    pub(crate) async fn finish(&self, job: &mut Job) -> Result<()> {
        let mut conn = self.conn().await?;

        job.mark_finished(Utc::now());
        self.persist(&mut conn, job, &[Field::State, Field::CompletionTime])
            .await
    }

    /// Puts a failed job back on the delayed set of `queue` after its retry
    /// interval.
    pub(crate) async fn retry(
        &self,
        job: &mut Job,
        queue: &QueueConfig,
    ) -> Result<()> {
        let mut conn = self.conn().await?;

        job.mark_retry(after(queue.retry_interval));
        self.persist(&mut conn, job, &[Field::State, Field::DelayedUntil])
            .await?;
        self.enqueue_delayed(&mut conn, &queue.name, job).await
    }

    pub(crate) async fn kill(&self, job: &mut Job) -> Result<()> {
        let mut conn = self.conn().await?;

        job.mark_dead();
        self.persist(&mut conn, job, &[Field::State]).await
    }

    /// Dead-letters a job whose stored hash failed to decode. Only the state
    /// (and the id, when the key yields one) is written.
    pub(crate) async fn bury_corrupt(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;

        if conn.hget_all(key).await?.is_empty() {
            return Ok(());
        }

        let mut fields =
            vec![(Field::State.name(), JobState::Dead.as_i64().to_string())];
        if let Some(id) = self.inner.keys.job_id(key) {
            fields.push((Field::Id.name(), id.to_string()));
        }

        conn.hset_all(key, &fields).await
    }

    pub async fn publish_event(&self, event: &JobEvent) -> Result<()> {
        let message = serde_json::to_string(event)?;
        let mut conn = self.conn().await?;
        conn.publish(&self.inner.keys.events(&event.queue), &message)
            .await
    }

    /// Follows the events published for `queue`. Uses its own connection,
    /// outside the pool.
    pub async fn subscribe(&self, queue: &str) -> Result<EventStream> {
        let mut conn = self.conn().await?;
        let sub = conn.subscribe(&self.inner.keys.events(queue)).await?;
        Ok(EventStream::new(sub))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use serde_json::json;

    use crate::storage::MemoryStore;

    pub(crate) fn memory_client() -> (Client, MemoryStore) {
        let store = MemoryStore::new();
        let client = Client::new(
            Options::default()
                .with_prefix("test")
                .with_conn_factory(Arc::new(store.clone()))
                .with_claim_timeout(Duration::from_millis(50)),
        )
        .unwrap();

        (client, store)
    }

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let (client, _) = memory_client();

        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(client.submit("q", n, &n).await.unwrap().id());
            ids.push(client.create_job(&n).await.unwrap().id());
            ids.push(
                client
                    .submit_delayed("q", Duration::from_secs(60), &n)
                    .await
                    .unwrap()
                    .id(),
            );
        }

        assert!(ids.windows(2).all(|w| w[0] < w[1]), "{ids:?}");
        assert_eq!(ids[0], 1);
    }

    #[tokio::test]
    async fn test_submit_claim_finish() {
        let (client, _) = memory_client();

        let job = client.submit("q", 50, &json!({"a": 1})).await.unwrap();
        assert_eq!(job.id(), 1);
        assert_eq!(job.state(), JobState::Queued);

        let mut claimed = client.claim("q").await.unwrap().unwrap();
        assert_eq!(claimed.id(), 1);
        assert_eq!(claimed.state(), JobState::Working);
        assert_eq!(claimed.num_attempts(), 1);
        assert_eq!(claimed.payload().value(), &json!({"a": 1}));

        let stored = client.job(1).await.unwrap();
        assert_eq!(stored.state(), JobState::Working);
        assert_eq!(stored.num_attempts(), 1);

        client.finish(&mut claimed).await.unwrap();
        let stored = client.job(1).await.unwrap();
        assert_eq!(stored.state(), JobState::Finished);
        assert!(stored.completion_time().is_some());
    }

    #[tokio::test]
    async fn test_priority_wins_over_submission_order() {
        let (client, _) = memory_client();

        let low = client.submit("q", 0, "low").await.unwrap();
        let high = client.submit("q", 100, "high").await.unwrap();

        assert_eq!(client.claim("q").await.unwrap().unwrap().id(), high.id());
        assert_eq!(client.claim("q").await.unwrap().unwrap().id(), low.id());
        assert!(client.claim("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let (client, _) = memory_client();

        let mut submitted = Vec::new();
        for n in 0..4 {
            submitted.push(client.submit("q", 10, &n).await.unwrap().id());
        }

        let mut claimed = Vec::new();
        while let Some(job) = client.claim("q").await.unwrap() {
            claimed.push(job.id());
        }

        assert_eq!(claimed, submitted);
    }

    #[tokio::test]
    async fn test_priority_clamped_on_submit() {
        let (client, store) = memory_client();

        let job = client.submit("q", 250, "x").await.unwrap();
        assert_eq!(job.priority(), 100);
        assert_eq!(store.list_len("test:queue:q:100"), 1);
    }

    #[tokio::test]
    async fn test_queues_are_separate() {
        let (client, _) = memory_client();

        client.submit("a", 1, "for a").await.unwrap();
        assert!(client.claim("b").await.unwrap().is_none());
        assert!(client.claim("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delayed_job_visible_only_after_deadline() {
        let (client, store) = memory_client();

        let job = client
            .submit_delayed("q", Duration::from_millis(300), "later")
            .await
            .unwrap();
        assert_eq!(store.sorted_set("test:delayed_queue:q").len(), 1);
        assert!(client.claim("q").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(350)).await;

        let claimed = client.claim("q").await.unwrap().unwrap();
        assert_eq!(claimed.id(), job.id());
        assert!(store.sorted_set("test:delayed_queue:q").is_empty());
    }

    #[tokio::test]
    async fn test_due_delayed_job_claimed_before_priority_list() {
        let (client, _) = memory_client();

        let delayed =
            client.submit_delayed("q", Duration::ZERO, "d").await.unwrap();
        let queued = client.submit("q", 100, "p").await.unwrap();

        assert_eq!(client.claim("q").await.unwrap().unwrap().id(), delayed.id());
        assert_eq!(client.claim("q").await.unwrap().unwrap().id(), queued.id());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_due_job_one_claimer() {
        let (client, _) = memory_client();
        client.submit_delayed("q", Duration::ZERO, "once").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.claim("q").await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_create_then_submit_job() {
        let (client, store) = memory_client();

        let job = client.create_job(&json!(["feed"])).await.unwrap();
        assert_eq!(job.state(), JobState::Initial);
        assert_eq!(client.job(job.id()).await.unwrap().state(), JobState::Initial);
        assert!(client.claim("q").await.unwrap().is_none());

        let queued = client.submit_job("q", 7, &job).await.unwrap();
        assert_eq!(queued.state(), JobState::Queued);
        assert_eq!(queued.priority(), 7);
        assert_eq!(store.list_len("test:queue:q:7"), 1);

        let stored = client.job(job.id()).await.unwrap();
        assert_eq!(stored.state(), JobState::Queued);
        assert_eq!(stored.priority(), 7);

        assert!(matches!(
            client.submit_job("q", 7, &job).await,
            Err(Error::InvalidState(JobState::Queued))
        ));
        assert_eq!(store.list_len("test:queue:q:7"), 1);
    }

    #[tokio::test]
    async fn test_create_then_submit_delayed_job() {
        let (client, store) = memory_client();

        let job = client.create_job("x").await.unwrap();
        let queued = client
            .submit_delayed_job("q", Duration::from_secs(30), &job)
            .await
            .unwrap();

        assert_eq!(queued.state(), JobState::Queued);
        assert!(queued.delayed_until().unwrap() > Utc::now());
        assert_eq!(store.sorted_set("test:delayed_queue:q").len(), 1);
        assert!(matches!(
            client
                .submit_delayed_job("q", Duration::ZERO, &job)
                .await,
            Err(Error::InvalidState(JobState::Queued))
        ));
    }

    #[tokio::test]
    async fn test_missing_job() {
        let (client, _) = memory_client();

        assert!(matches!(client.job(99).await, Err(Error::JobNotFound(99))));
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let (client, _) = memory_client();

        let job = client.submit("q", 33, &json!({"url": "x"})).await.unwrap();
        let stored = client.job(job.id()).await.unwrap();

        assert_eq!(stored.id(), job.id());
        assert_eq!(stored.state(), job.state());
        assert_eq!(stored.priority(), job.priority());
        assert_eq!(stored.num_attempts(), job.num_attempts());
        assert_eq!(stored.payload(), job.payload());
        assert_eq!(
            stored.creation_time().timestamp(),
            job.creation_time().timestamp()
        );
    }

    #[tokio::test]
    async fn test_retry_and_kill() {
        let (client, store) = memory_client();
        let queue = QueueConfig::new("q").with_retry_interval(Duration::from_secs(5));

        client.submit("q", 0, "x").await.unwrap();
        let mut job = client.claim("q").await.unwrap().unwrap();

        client.retry(&mut job, &queue).await.unwrap();
        let stored = client.job(job.id()).await.unwrap();
        assert_eq!(stored.state(), JobState::Queued);
        let delay = stored.delayed_until().unwrap() - Utc::now();
        assert!(delay.num_seconds() >= 3 && delay.num_seconds() <= 5);
        assert_eq!(store.sorted_set("test:delayed_queue:q").len(), 1);

        let mut job = stored;
        job.mark_working();
        client.kill(&mut job).await.unwrap();
        assert_eq!(client.job(job.id()).await.unwrap().state(), JobState::Dead);
    }

    #[tokio::test]
    async fn test_corrupt_job_reported_and_buried() {
        let (client, store) = memory_client();

        let job = client.submit("q", 0, "x").await.unwrap();
        let key = client.keys().job(job.id());
        store
            .conn()
            .hset_all(&key, &[("num_attempts", "lots".to_owned())])
            .await
            .unwrap();

        let err = client.claim("q").await.unwrap_err();
        assert!(matches!(err, Error::Corrupt { ref key, .. } if key == "test:jobs:1"));

        client.bury_corrupt(&key).await.unwrap();
        let fields = store.conn().hget_all(&key).await.unwrap();
        assert_eq!(fields["state"], "4");
        assert_eq!(fields["id"], "1");
    }

    #[tokio::test]
    async fn test_claim_skips_terminal_job() {
        let (client, store) = memory_client();

        let job = client.submit("q", 0, "x").await.unwrap();
        let key = client.keys().job(job.id());
        store
            .conn()
            .hset_all(&key, &[("state", "3".to_owned())])
            .await
            .unwrap();

        assert!(client.claim("q").await.unwrap().is_none());
        assert_eq!(client.job(job.id()).await.unwrap().num_attempts(), 0);
    }

    #[tokio::test]
    async fn test_zero_claim_timeout_still_returns() {
        let client = Client::new(
            Options::default()
                .with_conn_factory(Arc::new(MemoryStore::new()))
                .with_claim_timeout(Duration::ZERO),
        )
        .unwrap();
        assert_eq!(client.inner.claim_timeout, DEFAULT_CLAIM_TIMEOUT);

        let claimed =
            tokio::time::timeout(Duration::from_secs(3), client.claim("q"))
                .await
                .expect("claim on an empty queue should time out");
        assert!(claimed.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_blocks_until_submit() {
        let (client, _) = memory_client();

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.wait("q").await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(120)).await;
        let job = client.submit("q", 1, "late").await.unwrap();

        assert_eq!(waiter.await.unwrap().id(), job.id());
    }

    #[tokio::test]
    async fn test_events() {
        let (client, _) = memory_client();
        let mut events = client.subscribe("q").await.unwrap();

        let job = client.submit("q", 0, "x").await.unwrap();
        client
            .publish_event(&JobEvent::new("q", &job))
            .await
            .unwrap();

        let event = events.next().await.unwrap();
        assert_eq!(event.id, job.id());
        assert_eq!(event.state, JobState::Queued);
        assert_eq!(event.queue, "q");
    }
}
