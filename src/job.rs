use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Lifecycle of a job. The discriminants are what gets persisted.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobState {
    Initial = 0,
    Queued = 1,
    Working = 2,
    Finished = 3,
    Dead = 4,
}

impl JobState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        use JobState::*;

        Some(match value {
            0 => Initial,
            1 => Queued,
            2 => Working,
            3 => Finished,
            4 => Dead,
            _ => return None,
        })
    }

    /// Finished and Dead jobs are never touched again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Dead)
    }

    /// Reports whether `self -> next` is an edge of the lifecycle:
    ///
    /// ```text
    /// Initial -> Queued -> Working -> { Finished | Queued | Dead }
    /// ```
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, next),
            (Initial, Queued)
                | (Queued, Working)
                | (Working, Finished)
                | (Working, Queued)
                | (Working, Dead)
        )
    }

    fn name(self) -> &'static str {
        use JobState::*;

        match self {
            Initial => "initial",
            Queued => "queued",
            Working => "working",
            Finished => "finished",
            Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use JobState::*;

        [Initial, Queued, Working, Finished, Dead]
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| format!("unknown job state {s:?}"))
    }
}

// Used when jobs are rendered as YAML or published as events.
impl Serialize for JobState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Producer-supplied job data: the JSON bytes exactly as submitted, plus a
/// structured view of them. The engine never looks inside.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
    raw: Bytes,
    value: serde_json::Value,
}

impl Payload {
    /// Serialises `value` to JSON.
    pub fn new<T: Serialize + ?Sized>(
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Self::from_raw(serde_json::to_vec(value)?.into())
    }

    /// Wraps JSON bytes, failing if they do not parse.
    pub fn from_raw(raw: Bytes) -> Result<Self, serde_json::Error> {
        let value = serde_json::from_slice(&raw)?;
        Ok(Self { raw, value })
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Decodes the payload into the consumer's own type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.raw)
    }
}

impl Serialize for Payload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.value.serialize(serializer)
    }
}

/// One unit of work. Only the client assigns ids and timestamps; everything
/// a consumer can see is exposed through accessors.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Job {
    pub(crate) id: u64,
    pub(crate) state: JobState,
    pub(crate) priority: u8,
    pub(crate) delayed_until: Option<DateTime<Utc>>,
    pub(crate) creation_time: DateTime<Utc>,
    pub(crate) completion_time: Option<DateTime<Utc>>,
    pub(crate) num_attempts: u32,
    pub(crate) payload: Payload,
}

impl Job {
    /// A job that has not been persisted yet; `id` is assigned on persist.
    pub(crate) fn new(payload: Payload, state: JobState) -> Self {
        Self {
            id: 0,
            state,
            priority: 0,
            delayed_until: None,
            creation_time: Utc::now(),
            completion_time: None,
            num_attempts: 0,
            payload,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn delayed_until(&self) -> Option<DateTime<Utc>> {
        self.delayed_until
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.completion_time
    }

    pub fn num_attempts(&self) -> u32 {
        self.num_attempts
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {} -> {next}",
            self.state,
        );
        self.state = next;
    }

    pub(crate) fn mark_working(&mut self) {
        self.transition(JobState::Working);
        self.num_attempts += 1;
    }

    pub(crate) fn mark_finished(&mut self, at: DateTime<Utc>) {
        self.transition(JobState::Finished);
        self.completion_time = Some(at);
    }

    pub(crate) fn mark_retry(&mut self, until: DateTime<Utc>) {
        self.transition(JobState::Queued);
        self.delayed_until = Some(until);
    }

    pub(crate) fn mark_dead(&mut self) {
        self.transition(JobState::Dead);
    }
}
