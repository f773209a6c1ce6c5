//! A job queue over Redis: producers submit prioritised or delayed jobs,
//! workers claim them one at a time and run registered handlers with
//! bounded concurrency, retrying or dead-lettering failures.
pub mod client;
pub mod codec;
pub mod default;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod job;
pub mod keys;
pub mod pool;
pub mod queue;
pub mod storage;
pub mod worker;

pub use crate::client::{Client, Options};
pub use crate::dispatcher::Handler;
pub use crate::error::{Error, Result};
pub use crate::events::{EventStream, JobEvent};
pub use crate::job::{Job, JobState, Payload};
pub use crate::queue::QueueConfig;
pub use crate::worker::{Canceller, Worker};
