use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::error::AppResult;
use crate::models::ItemId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Catalog details for one movie
    ItemDetails(ItemId),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::ItemDetails(id) => write!(f, "item:{}", id),
        }
    }
}

/// Creates a Redis client for caching
///
/// `Client::open` only validates the URL; connections are made lazily.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// One queued `SET EX`
struct CacheWrite {
    key: String,
    value: String,
    ttl: u64,
}

/// Cache handler for storing and retrieving data from Redis
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWrite>,
}

/// Handle for draining and stopping the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    writer: JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Flushes every queued write, then waits for the writer to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.try_send(());
        if let Err(e) = self.writer.await {
            tracing::error!(error = %e, "Cache writer ended abnormally");
        }
    }
}

/// Background writer owning one multiplexed connection, reopened after a failed write
struct CacheWriter {
    client: Client,
    conn: Option<MultiplexedConnection>,
    written: u64,
    failed: u64,
}

impl CacheWriter {
    async fn run(
        mut self,
        mut write_rx: mpsc::UnboundedReceiver<CacheWrite>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer started");

        loop {
            tokio::select! {
                Some(write) = write_rx.recv() => self.write(write).await,
                _ = shutdown_rx.recv() => break,
            }
        }

        write_rx.close();
        let mut flushed = 0u64;
        while let Some(write) = write_rx.recv().await {
            self.write(write).await;
            flushed += 1;
        }

        tracing::info!(
            written = self.written,
            failed = self.failed,
            flushed,
            "Cache writer stopped"
        );
    }

    async fn write(&mut self, write: CacheWrite) {
        let key = write.key.clone();
        match self.set_ex(write).await {
            Ok(()) => self.written += 1,
            Err(e) => {
                self.failed += 1;
                tracing::warn!(error = %e, key = %key, "Cache write failed");
            }
        }
    }

    async fn set_ex(&mut self, write: CacheWrite) -> AppResult<()> {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.client.get_multiplexed_async_connection().await?,
        };
        let _: () = conn.set_ex(write.key, write.value, write.ttl).await?;
        self.conn = Some(conn);
        Ok(())
    }
}

impl Cache {
    /// Creates a Cache and spawns its background writer
    ///
    /// Writes go through a channel so that catalog lookups never wait on
    /// Redis `SET`.
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let writer = CacheWriter {
            client: redis_client.clone(),
            conn: None,
            written: 0,
            failed: 0,
        };
        let writer = tokio::spawn(writer.run(write_rx, shutdown_rx));

        let cache = Self {
            redis_client,
            write_tx,
        };

        (cache, CacheWriterHandle { shutdown_tx, writer })
    }

    /// Retrieves a value from the cache by key, `None` on miss
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key.to_string()).await?;

        match cached {
            Some(json) => {
                let data = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Queues a value for storage without waiting on Redis
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let write = CacheWrite {
            key: key.to_string(),
            value: json,
            ttl,
        };

        if let Err(e) = self.write_tx.send(write) {
            tracing::error!(error = %e, "Cache writer gone, write dropped");
        }
    }
}
