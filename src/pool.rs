use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::Result;
use crate::storage::{Conn, ConnFactory};

/// Connections checked out per call and returned when the guard drops. The
/// pool never blocks: an empty pool opens a fresh connection.
pub struct Pool {
    factory: Arc<dyn ConnFactory>,
    idle: Mutex<Vec<Box<dyn Conn>>>,
}

impl Pool {
    pub fn new(factory: Arc<dyn ConnFactory>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            idle: Mutex::new(Vec::new()),
        })
    }

    pub async fn get(self: &Arc<Self>) -> Result<PooledConn> {
        let idle = self.idle.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                trace!("pool empty, opening connection");
                self.factory.connect().await?
            },
        };

        Ok(PooledConn {
            conn: Some(conn),
            pool: Arc::clone(self),
        })
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Closes every idle connection. Connections checked out right now are
    /// returned to the pool as usual.
    pub async fn close(&self) {
        let idle = std::mem::take(&mut *self.idle.lock());
        for mut conn in idle {
            if let Err(error) = conn.close().await {
                warn!(%error, "failed to close connection");
            }
        }
    }
}

pub struct PooledConn {
    conn: Option<Box<dyn Conn>>,
    pool: Arc<Pool>,
}

impl Deref for PooledConn {
    type Target = dyn Conn;

    fn deref(&self) -> &Self::Target {
        // Only `drop` empties the slot.
        self.conn.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().push(conn);
        }
    }
}
