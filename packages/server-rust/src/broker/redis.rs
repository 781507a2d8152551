//! Redis-backed [`BrokerQueue`] using list commands.
//!
//! `push` is `LPUSH` and `pop` is `BRPOP`, so each list behaves as a FIFO.
//! Pushes share one [`ConnectionManager`]. A `BRPOP` blocks the connection it
//! runs on, so pops check out a dedicated connection from a small idle pool
//! and return it afterwards.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client};
use tracing::debug;

use super::{BrokerError, BrokerQueue};

/// Redis list broker.
pub struct RedisBroker {
    client: Client,
    push_conn: ConnectionManager,
    idle_pop_conns: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisBroker {
    /// Connects to the Redis server at `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the client cannot be created or
    /// the initial connection fails.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = Client::open(url)
            .map_err(|e| BrokerError::Unavailable(format!("invalid redis url: {e}")))?;
        let push_conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BrokerError::Unavailable(format!("redis connect failed: {e}")))?;

        Ok(Self {
            client,
            push_conn,
            idle_pop_conns: Mutex::new(Vec::new()),
        })
    }

    async fn checkout(&self) -> Result<MultiplexedConnection, BrokerError> {
        let idle = self.idle_pop_conns.lock().pop();
        if let Some(conn) = idle {
            return Ok(conn);
        }
        debug!("opening dedicated redis connection for blocking pop");
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Unavailable(format!("redis connect failed: {e}")))
    }
}

#[async_trait]
impl BrokerQueue for RedisBroker {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.push_conn.clone();
        let _: i64 = conn
            .lpush(queue, payload)
            .await
            .map_err(|e| BrokerError::Command {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, BrokerError> {
        let mut conn = self.checkout().await?;
        let popped: Result<Option<(String, Vec<u8>)>, _> = redis::cmd("BRPOP")
            .arg(queue)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await;

        match popped {
            Ok(item) => {
                self.idle_pop_conns.lock().push(conn);
                Ok(item.map(|(_, payload)| payload))
            }
            // The connection may be broken; let it drop instead of returning it.
            Err(e) => Err(BrokerError::Command {
                queue: queue.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
