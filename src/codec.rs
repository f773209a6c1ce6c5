//! Converts jobs to and from the flat string hash they are persisted as.
use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::{Job, JobState, Payload};
use crate::queue::clamp_priority;

/// One persisted attribute of a job.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Field {
    Id,
    State,
    DelayedUntil,
    CreationTime,
    CompletionTime,
    Priority,
    NumAttempts,
    Payload,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Id,
        Field::State,
        Field::DelayedUntil,
        Field::CreationTime,
        Field::CompletionTime,
        Field::Priority,
        Field::NumAttempts,
        Field::Payload,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::State => "state",
            Field::DelayedUntil => "delayed_until",
            Field::CreationTime => "creation_time",
            Field::CompletionTime => "completion_time",
            Field::Priority => "priority",
            Field::NumAttempts => "num_attempts",
            Field::Payload => "payload",
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no job stored")]
    Empty,
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("field {field:?} is not an integer: {value:?}")]
    InvalidInteger { field: &'static str, value: String },
    #[error("field {field:?} is out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
    #[error("unknown job state {0}")]
    UnknownState(i64),
    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}

fn unix_seconds(t: Option<DateTime<Utc>>) -> String {
    t.map_or(0, |t| t.timestamp()).to_string()
}

fn encode_field(job: &Job, field: Field) -> String {
    match field {
        Field::Id => job.id.to_string(),
        Field::State => job.state.as_i64().to_string(),
        Field::DelayedUntil => unix_seconds(job.delayed_until),
        Field::CreationTime => unix_seconds(Some(job.creation_time)),
        Field::CompletionTime => unix_seconds(job.completion_time),
        Field::Priority => job.priority.to_string(),
        Field::NumAttempts => job.num_attempts.to_string(),
        Field::Payload => {
            String::from_utf8_lossy(job.payload.raw()).into_owned()
        },
    }
}

/// Projects `job` onto the requested fields, or onto every field when none
/// are given. `id` is always part of the projection so a partial write can
/// never produce a hash without it.
pub fn encode(job: &Job, fields: &[Field]) -> Vec<(&'static str, String)> {
    let fields = if fields.is_empty() { &Field::ALL[..] } else { fields };

    let mut out: Vec<_> = fields
        .iter()
        .map(|f| (f.name(), encode_field(job, *f)))
        .collect();

    if !fields.contains(&Field::Id) {
        out.push((Field::Id.name(), encode_field(job, Field::Id)));
    }

    out
}

/// Reads typed values out of a stored hash.
struct HashReader<'a> {
    fields: &'a HashMap<String, String>,
}

impl HashReader<'_> {
    fn get(&self, field: Field) -> Option<&str> {
        self.fields.get(field.name()).map(String::as_str)
    }

    fn expect(&self, field: Field) -> Result<&str, DecodeError> {
        self.get(field)
            .filter(|v| !v.is_empty())
            .ok_or(DecodeError::MissingField(field.name()))
    }

    /// Absent or empty integer fields read as zero.
    fn int(&self, field: Field) -> Result<i64, DecodeError> {
        match self.get(field) {
            None | Some("") => Ok(0),
            Some(v) => parse_int(field, v),
        }
    }

    fn unsigned<T>(&self, field: Field) -> Result<T, DecodeError>
    where
        T: TryFrom<i64>,
    {
        let value = self.int(field)?;
        T::try_from(value).map_err(|_| DecodeError::OutOfRange {
            field: field.name(),
            value,
        })
    }

    /// Zero (or anything before the epoch) means "unset".
    fn time(&self, field: Field) -> Result<Option<DateTime<Utc>>, DecodeError> {
        let secs = self.int(field)?;
        if secs <= 0 {
            return Ok(None);
        }

        DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or(DecodeError::OutOfRange {
                field: field.name(),
                value: secs,
            })
    }
}

fn parse_int(field: Field, value: &str) -> Result<i64, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidInteger {
        field: field.name(),
        value: value.to_owned(),
    })
}

/// Rebuilds a job from its stored hash.
pub fn decode(fields: &HashMap<String, String>) -> Result<Job, DecodeError> {
    if fields.is_empty() {
        return Err(DecodeError::Empty);
    }

    let r = HashReader { fields };

    let id = parse_int(Field::Id, r.expect(Field::Id)?)?;
    let id = u64::try_from(id).map_err(|_| DecodeError::OutOfRange {
        field: Field::Id.name(),
        value: id,
    })?;

    let state = r.int(Field::State)?;
    let state =
        JobState::from_i64(state).ok_or(DecodeError::UnknownState(state))?;

    let payload = Bytes::copy_from_slice(r.expect(Field::Payload)?.as_bytes());
    let payload =
        Payload::from_raw(payload).map_err(DecodeError::InvalidPayload)?;

    Ok(Job {
        id,
        state,
        priority: clamp_priority(r.int(Field::Priority)?),
        delayed_until: r.time(Field::DelayedUntil)?,
        creation_time: r.time(Field::CreationTime)?.unwrap_or_default(),
        completion_time: r.time(Field::CompletionTime)?,
        num_attempts: r.unsigned(Field::NumAttempts)?,
        payload,
    })
}
