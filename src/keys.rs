use itertools::Itertools;

use crate::queue::{MAX_PRIORITY, MIN_PRIORITY};

/// Builds every store key under one namespace prefix.
#[derive(Clone, Debug)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn build(&self, parts: &[&str]) -> String {
        std::iter::once(self.prefix.as_str())
            .chain(parts.iter().copied())
            .join(":")
    }

    pub fn job_id_counter(&self) -> String {
        self.build(&["cur_job_id"])
    }

    pub fn job(&self, id: u64) -> String {
        self.build(&["jobs", &id.to_string()])
    }

    /// Recovers the id from a key produced by [`Keyspace::job`].
    pub fn job_id(&self, key: &str) -> Option<u64> {
        key.strip_prefix(&self.build(&["jobs", ""]))?.parse().ok()
    }

    pub fn priority_queue(&self, queue: &str, priority: u8) -> String {
        self.build(&["queue", queue, &priority.to_string()])
    }

    /// Every priority list of `queue`, highest priority first.
    pub fn priority_queues(&self, queue: &str) -> Vec<String> {
        (MIN_PRIORITY..=MAX_PRIORITY)
            .rev()
            .map(|p| self.priority_queue(queue, p))
            .collect()
    }

    pub fn delayed_queue(&self, queue: &str) -> String {
        self.build(&["delayed_queue", queue])
    }

    pub fn events(&self, queue: &str) -> String {
        self.build(&["events", queue])
    }
}

/// The keys a claim scans, computed once per dispatcher.
#[derive(Clone, Debug)]
pub struct ClaimKeys {
    pub(crate) queue: String,
    pub(crate) delayed: String,
    pub(crate) priorities: Vec<String>,
}

impl ClaimKeys {
    pub fn new(keys: &Keyspace, queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            delayed: keys.delayed_queue(queue),
            priorities: keys.priority_queues(queue),
        }
    }
}
