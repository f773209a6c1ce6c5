//! Out-of-band notifications about resolved jobs. Nothing here is on the
//! claim path; a lost event never affects a job.
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::job::{Job, JobState};
use crate::storage::Subscription;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct JobEvent {
    pub id: u64,
    pub queue: String,
    pub state: JobState,
    pub num_attempts: u32,
}

impl JobEvent {
    pub fn new(queue: &str, job: &Job) -> Self {
        Self {
            id: job.id(),
            queue: queue.to_owned(),
            state: job.state(),
            num_attempts: job.num_attempts(),
        }
    }
}

/// Events published for one queue.
#[derive(Debug)]
pub struct EventStream {
    sub: Subscription,
}

impl EventStream {
    pub(crate) fn new(sub: Subscription) -> Self {
        Self { sub }
    }

    /// Waits for the next event, skipping messages that don't decode.
    pub async fn next(&mut self) -> Option<JobEvent> {
        loop {
            let message = self.sub.recv().await?;
            match serde_json::from_str(&message) {
                Ok(event) => return Some(event),
                Err(error) => warn!(%error, %message, "ignoring bad event"),
            }
        }
    }
}
