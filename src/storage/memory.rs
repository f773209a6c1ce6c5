use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use super::{Conn, ConnFactory, Subscription};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    counters: HashMap<String, i64>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    sorted_sets: HashMap<String, HashMap<String, f64>>,
    channels: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl State {
    fn pop_front(&mut self, keys: &[String]) -> Option<(String, String)> {
        keys.iter().find_map(|key| {
            let value = self.lists.get_mut(key)?.pop_front()?;
            Some((key.clone(), value))
        })
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    pushed: Notify,
}

/// An in-process store with the same semantics as the Redis adapter. Every
/// connection handed out shares the same data, and every operation runs
/// under one lock, so each is atomic.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conn(&self) -> MemoryConn {
        MemoryConn {
            shared: self.shared.clone(),
            closed: false,
        }
    }

    /// Length of a list, for inspection.
    pub fn list_len(&self, key: &str) -> usize {
        self.shared.state.lock().lists.get(key).map_or(0, VecDeque::len)
    }

    /// Members of a sorted set with their scores, for inspection.
    pub fn sorted_set(&self, key: &str) -> Vec<(String, f64)> {
        let state = self.shared.state.lock();
        let mut members: Vec<_> = state
            .sorted_sets
            .get(key)
            .into_iter()
            .flatten()
            .map(|(m, s)| (m.clone(), *s))
            .collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }
}

#[async_trait]
impl ConnFactory for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn Conn>> {
        Ok(Box::new(self.conn()))
    }
}

#[derive(Debug)]
pub struct MemoryConn {
    shared: Arc<Shared>,
    closed: bool,
}

impl MemoryConn {
    fn state(&self) -> Result<parking_lot::MutexGuard<'_, State>> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        Ok(self.shared.state.lock())
    }
}

#[async_trait]
impl Conn for MemoryConn {
    async fn incr(&mut self, key: &str) -> Result<i64> {
        let mut state = self.state()?;
        let counter = state.counters.entry(key.to_owned()).or_default();
        *counter += 1;
        Ok(*counter)
    }

    async fn hget_all(&mut self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.state()?.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hset_all(
        &mut self,
        key: &str,
        fields: &[(&'static str, String)],
    ) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut state = self.state()?;
        let hash = state.hashes.entry(key.to_owned()).or_default();
        for (field, value) in fields {
            hash.insert((*field).to_owned(), value.clone());
        }

        Ok(())
    }

    async fn rpush(&mut self, key: &str, values: &[String]) -> Result<usize> {
        let len = {
            let mut state = self.state()?;
            let list = state.lists.entry(key.to_owned()).or_default();
            list.extend(values.iter().cloned());
            list.len()
        };

        self.shared.pushed.notify_waiters();
        Ok(len)
    }

    async fn blocking_pop_front(
        &mut self,
        timeout: Duration,
        keys: &[String],
    ) -> Result<Option<(String, String)>> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            // Register for wakeups before looking, so a push landing between
            // the check and the wait is not missed.
            let pushed = self.shared.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            let popped = self.state()?.pop_front(keys);
            if popped.is_some() {
                return Ok(popped);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                        return Ok(None);
                    }
                },
                None => pushed.await,
            }
        }
    }

    async fn add_if_absent(
        &mut self,
        key: &str,
        score: f64,
        member: &str,
    ) -> Result<bool> {
        let mut state = self.state()?;
        let set = state.sorted_sets.entry(key.to_owned()).or_default();
        if set.contains_key(member) {
            return Ok(false);
        }

        set.insert(member.to_owned(), score);
        Ok(true)
    }

    async fn pop_due_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>> {
        let mut state = self.state()?;
        let Some(set) = state.sorted_sets.get_mut(key) else {
            return Ok(Vec::new());
        };

        let mut due: Vec<(&String, f64)> = set
            .iter()
            .filter(|(_, s)| (min..=max).contains(*s))
            .map(|(m, s)| (m, *s))
            .collect();
        due.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let popped: Vec<String> = due
            .into_iter()
            .skip(offset)
            .take(count)
            .map(|(m, _)| m.clone())
            .collect();

        for member in &popped {
            set.remove(member);
        }

        Ok(popped)
    }

    async fn publish(&mut self, channel: &str, message: &str) -> Result<()> {
        let mut state = self.state()?;
        if let Some(subscribers) = state.channels.get_mut(channel) {
            subscribers.retain(|tx| tx.send(message.to_owned()).is_ok());
        }

        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state()?
            .channels
            .entry(channel.to_owned())
            .or_default()
            .push(tx);

        Ok(Subscription::new(rx))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
