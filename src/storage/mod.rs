//! The narrow storage interface everything else in the crate goes through.
//!
//! Implementations must make every operation atomic at the store level. The
//! claim path in particular relies on [`Conn::pop_due_by_score`] selecting
//! and removing members in one step: two callers must never both receive the
//! same member.
mod memory;
mod redis_conn;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use self::memory::{MemoryConn, MemoryStore};
pub use self::redis_conn::{RedisConn, RedisConnFactory};
use crate::error::Result;

/// A connection to a key/value + list + sorted-set + pub/sub store.
#[async_trait]
pub trait Conn: Send {
    /// Increments the integer at `key` and returns the new value.
    async fn incr(&mut self, key: &str) -> Result<i64>;

    /// Reads a whole hash. A missing key reads as an empty map.
    async fn hget_all(&mut self, key: &str) -> Result<HashMap<String, String>>;

    /// Writes the given fields of a hash, leaving the others untouched.
    async fn hset_all(
        &mut self,
        key: &str,
        fields: &[(&'static str, String)],
    ) -> Result<()>;

    /// Appends to the tail of a list, returning its new length.
    async fn rpush(&mut self, key: &str, values: &[String]) -> Result<usize>;

    /// Pops the head of the first non-empty list, scanning `keys` in order.
    /// Waits up to `timeout` for one to fill (a zero timeout waits forever)
    /// and returns `None` when it runs out. Returns `(list key, value)`.
    async fn blocking_pop_front(
        &mut self,
        timeout: Duration,
        keys: &[String],
    ) -> Result<Option<(String, String)>>;

    /// Adds `member` to a sorted set unless it is already present. Returns
    /// whether it was added.
    async fn add_if_absent(
        &mut self,
        key: &str,
        score: f64,
        member: &str,
    ) -> Result<bool>;

    /// Atomically removes and returns up to `count` members scoring within
    /// `[min, max]`, skipping the first `offset`. Members come out by
    /// ascending score; equal scores are ordered by member bytes, not by
    /// insertion, so `jobs:10` comes out before `jobs:9`.
    async fn pop_due_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>>;

    async fn publish(&mut self, channel: &str, message: &str) -> Result<()>;

    /// Starts receiving messages published to `channel`. Not used on the
    /// claim path.
    async fn subscribe(&mut self, channel: &str) -> Result<Subscription>;

    async fn close(&mut self) -> Result<()>;
}

/// Creates connections for the client's pool.
#[async_trait]
pub trait ConnFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Conn>>;
}

/// Messages arriving on a subscribed channel.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// Waits for the next message; `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
