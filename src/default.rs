//! A process-wide client for code that doesn't want to pass one around.
//! Everything here forwards to an ordinary [`Client`].
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::client::{Client, Options};
use crate::error::Result;
use crate::job::Job;

static DEFAULT: RwLock<Option<Client>> = parking_lot::const_rwlock(None);

/// Replaces the default client. Clones handed out earlier keep working
/// against the old one.
pub fn configure(opts: Options) -> Result<()> {
    let client = Client::new(opts)?;
    *DEFAULT.write() = Some(client);
    Ok(())
}

/// The default client, built from [`Options::default`] on first use unless
/// [`configure`] was called.
pub fn client() -> Result<Client> {
    if let Some(client) = DEFAULT.read().as_ref() {
        return Ok(client.clone());
    }

    let mut slot = DEFAULT.write();
    match slot.as_ref() {
        Some(client) => Ok(client.clone()),
        None => {
            let client = Client::new(Options::default())?;
            *slot = Some(client.clone());
            Ok(client)
        },
    }
}

pub async fn submit<T: Serialize + ?Sized>(
    queue: &str,
    priority: u8,
    payload: &T,
) -> Result<Job> {
    client()?.submit(queue, priority, payload).await
}

pub async fn submit_delayed<T: Serialize + ?Sized>(
    queue: &str,
    delay: Duration,
    payload: &T,
) -> Result<Job> {
    client()?.submit_delayed(queue, delay, payload).await
}
