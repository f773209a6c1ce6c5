use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Conn, ConnFactory, Subscription};
use crate::error::{Error, Result};

/// Selects and removes due members in a single server-side step.
const POP_DUE_BY_SCORE_LUA: &str = r"
local members = redis.call('ZRANGEBYSCORE', KEYS[1], ARGV[1], ARGV[2], 'LIMIT', ARGV[3], ARGV[4])
if #members > 0 then
    redis.call('ZREM', KEYS[1], unpack(members))
end
return members
";

/// Opens Redis connections from a `redis://[auth@]host[:port][/db]` url.
#[derive(Clone, Debug)]
pub struct RedisConnFactory {
    client: redis::Client,
}

impl RedisConnFactory {
    pub fn new(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| Error::InvalidUrl {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ConnFactory for RedisConnFactory {
    async fn connect(&self) -> Result<Box<dyn Conn>> {
        let conn = self.client.get_connection_manager().await?;
        debug!("opened redis connection");

        Ok(Box::new(RedisConn {
            client: self.client.clone(),
            conn: Some(conn),
            pop_due_by_score: Script::new(POP_DUE_BY_SCORE_LUA),
        }))
    }
}

/// A single Redis connection. Each pooled connection is its own socket, so
/// a blocking pop on one never stalls another.
pub struct RedisConn {
    client: redis::Client,
    conn: Option<ConnectionManager>,
    pop_due_by_score: Script,
}

impl RedisConn {
    fn conn(&mut self) -> Result<&mut ConnectionManager> {
        self.conn.as_mut().ok_or(Error::ConnectionClosed)
    }
}

#[async_trait]
impl Conn for RedisConn {
    async fn incr(&mut self, key: &str) -> Result<i64> {
        Ok(self.conn()?.incr(key, 1).await?)
    }

    async fn hget_all(&mut self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.conn()?.hgetall(key).await?)
    }

    async fn hset_all(
        &mut self,
        key: &str,
        fields: &[(&'static str, String)],
    ) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let () = self.conn()?.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn rpush(&mut self, key: &str, values: &[String]) -> Result<usize> {
        Ok(self.conn()?.rpush(key, values).await?)
    }

    async fn blocking_pop_front(
        &mut self,
        timeout: Duration,
        keys: &[String],
    ) -> Result<Option<(String, String)>> {
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(keys)
            .arg(timeout.as_secs_f64())
            .query_async(self.conn()?)
            .await?;

        Ok(popped)
    }

    async fn add_if_absent(
        &mut self,
        key: &str,
        score: f64,
        member: &str,
    ) -> Result<bool> {
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(self.conn()?)
            .await?;

        Ok(added == 1)
    }

    async fn pop_due_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>> {
        let mut invocation = self.pop_due_by_score.key(key);
        invocation.arg(min).arg(max).arg(offset).arg(count);

        let conn = self.conn.as_mut().ok_or(Error::ConnectionClosed)?;
        let members: Vec<String> = invocation.invoke_async(conn).await?;

        Ok(members)
    }

    async fn publish(&mut self, channel: &str, message: &str) -> Result<()> {
        let _receivers: i64 = self.conn()?.publish(channel, message).await?;
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = channel.to_owned();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                // Dropping the subscription ends the task even on a quiet
                // channel.
                let msg = select! {
                    msg = messages.next() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                    _ = tx.closed() => break,
                };

                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    },
                    Err(error) => {
                        warn!(%error, %channel, "dropping undecodable message")
                    },
                }
            }
            debug!(%channel, "subscription closed");
        });

        Ok(Subscription::new(rx))
    }

    async fn close(&mut self) -> Result<()> {
        self.conn = None;
        Ok(())
    }
}
