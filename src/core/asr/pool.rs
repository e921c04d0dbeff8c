//! Bounded pool of reusable ASR backend connections.
//!
//! Sessions borrow a connection keyed by owner id; the pool keeps total size
//! within `[min, max]`, rebinds an owner to its existing connection, lazily
//! creates up to `max`, and a periodic sweep evicts connections idle longer
//! than `max_idle` without dropping below `min`. All bookkeeping mutations
//! run under a single lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AsrConfig;

use super::AsrError;
use super::client::AsrConnection;
use super::messages::{AsrMode, ControlFrame};

/// Interval between idle-eviction sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Pool sizing configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections created eagerly and kept through sweeps.
    pub min: usize,
    /// Upper bound on total connections.
    pub max: usize,
    /// Free connections idle longer than this are eviction candidates.
    pub max_idle: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 2,
            max: 20,
            max_idle: Duration::from_secs(300),
        }
    }
}

/// Outcome of an acquire attempt. Exhaustion is a value, not an error;
/// the caller decides the fallback.
pub enum PoolAcquire {
    Connection(Arc<AsrConnection>),
    Exhausted,
}

/// Snapshot of pool occupancy, taken under the bookkeeping lock.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub active_owners: usize,
    pub min: usize,
    pub max: usize,
}

struct PooledConnection {
    id: u64,
    conn: Arc<AsrConnection>,
    #[allow(dead_code)]
    created_at: Instant,
    last_used: Instant,
    in_use: bool,
    owner: Option<String>,
}

#[derive(Default)]
struct PoolInner {
    connections: Vec<PooledConnection>,
    owners: HashMap<String, u64>,
    next_id: u64,
}

/// Shared pool of ASR backend connections.
pub struct AsrPool {
    asr_config: AsrConfig,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl AsrPool {
    pub fn new(asr_config: AsrConfig, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            asr_config,
            config,
            inner: Mutex::new(PoolInner::default()),
            sweep_task: Mutex::new(None),
        })
    }

    /// Create the minimum connection set and start the idle sweep.
    ///
    /// Individual creation failures are logged and skipped; the pool grows
    /// back toward `min` lazily on demand.
    pub async fn initialize(self: &Arc<Self>) {
        info!(
            "Initializing ASR pool (min: {}, max: {})",
            self.config.min, self.config.max
        );

        {
            let mut inner = self.inner.lock().await;
            for i in 0..self.config.min {
                match self.create_connection(&mut inner).await {
                    Ok(()) => debug!("Created pool connection {}/{}", i + 1, self.config.min),
                    Err(e) => error!("Failed to create pool connection: {}", e),
                }
            }
            info!("ASR pool initialized with {} connections", inner.connections.len());
        }

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(pool) => pool.sweep_idle().await,
                    None => break,
                }
            }
        });
        *self.sweep_task.lock().await = Some(handle);
    }

    /// Acquire a connection for `owner`.
    ///
    /// An owner already bound to a live connection gets it back. Otherwise a
    /// free live connection is bound, or a new one is created while total is
    /// below `max`. A failed creation leaves the pool unchanged.
    pub async fn acquire(&self, owner: &str) -> Result<PoolAcquire, AsrError> {
        let mut inner = self.inner.lock().await;

        // Existing binding for this owner
        if let Some(&id) = inner.owners.get(owner) {
            if let Some(pos) = inner.connections.iter().position(|c| c.id == id) {
                if inner.connections[pos].conn.is_connected() {
                    inner.connections[pos].last_used = Instant::now();
                    return Ok(PoolAcquire::Connection(inner.connections[pos].conn.clone()));
                }
                // The bound connection died; drop it from the bookkeeping
                warn!("Dropping dead pooled connection bound to owner {}", owner);
                inner.connections.remove(pos);
            }
            inner.owners.remove(owner);
        }

        // Free, live connection
        if let Some(pos) = inner
            .connections
            .iter()
            .position(|c| !c.in_use && c.conn.is_connected())
        {
            let (id, conn) = Self::bind(&mut inner.connections[pos], owner);
            inner.owners.insert(owner.to_string(), id);
            info!("Bound pooled ASR connection to owner {}", owner);
            return Ok(PoolAcquire::Connection(conn));
        }

        // Room to grow
        if inner.connections.len() < self.config.max {
            self.create_connection(&mut inner).await?;
            let pos = inner.connections.len() - 1;
            let (id, conn) = Self::bind(&mut inner.connections[pos], owner);
            inner.owners.insert(owner.to_string(), id);
            info!("Created new pooled ASR connection for owner {}", owner);
            return Ok(PoolAcquire::Connection(conn));
        }

        warn!("ASR pool exhausted, no connection for owner {}", owner);
        Ok(PoolAcquire::Exhausted)
    }

    /// Release the connection bound to `owner`, keeping it pooled for reuse.
    pub async fn release(&self, owner: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.owners.remove(owner) {
            if let Some(pooled) = inner.connections.iter_mut().find(|c| c.id == id) {
                pooled.in_use = false;
                pooled.owner = None;
                pooled.last_used = Instant::now();
            }
            info!("Released pooled ASR connection for owner {}", owner);
        }
    }

    /// Consistent occupancy snapshot.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        let total = inner.connections.len();
        let active = inner.connections.iter().filter(|c| c.in_use).count();
        PoolStats {
            total,
            active,
            idle: total - active,
            active_owners: inner.owners.len(),
            min: self.config.min,
            max: self.config.max,
        }
    }

    /// Stop the sweep and close every connection. Idempotent.
    pub async fn shutdown(&self) {
        info!("Shutting down ASR pool");

        if let Some(handle) = self.sweep_task.lock().await.take() {
            handle.abort();
        }

        let mut inner = self.inner.lock().await;
        for pooled in inner.connections.drain(..) {
            pooled.conn.disconnect();
        }
        inner.owners.clear();
    }

    fn bind(pooled: &mut PooledConnection, owner: &str) -> (u64, Arc<AsrConnection>) {
        pooled.in_use = true;
        pooled.owner = Some(owner.to_string());
        pooled.last_used = Instant::now();
        (pooled.id, pooled.conn.clone())
    }

    /// Connect and configure one backend session, appending it to the
    /// bookkeeping only once fully established.
    async fn create_connection(&self, inner: &mut PoolInner) -> Result<(), AsrError> {
        let conn = AsrConnection::connect(&self.asr_config).await?;
        conn.send_config(&ControlFrame::stream_start(&AsrMode::two_pass(), "stream"))
            .await?;

        let id = inner.next_id;
        inner.next_id += 1;
        let now = Instant::now();
        inner.connections.push(PooledConnection {
            id,
            conn: Arc::new(conn),
            created_at: now,
            last_used: now,
            in_use: false,
            owner: None,
        });
        Ok(())
    }

    /// One eviction pass: collect free connections idle past `max_idle`,
    /// never dropping total below `min`, then close them outside the lock.
    /// The background sweep task calls this on its interval.
    pub async fn sweep_idle(&self) {
        let evicted: Vec<Arc<AsrConnection>> = {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let mut removable = inner.connections.len().saturating_sub(self.config.min);
            if removable == 0 {
                return;
            }

            let mut evicted = Vec::new();
            let mut kept = Vec::with_capacity(inner.connections.len());
            for pooled in inner.connections.drain(..) {
                let idle_expired =
                    !pooled.in_use && now.duration_since(pooled.last_used) > self.config.max_idle;
                if idle_expired && removable > 0 {
                    removable -= 1;
                    evicted.push(pooled.conn);
                } else {
                    kept.push(pooled);
                }
            }
            inner.connections = kept;

            if !evicted.is_empty() {
                info!(
                    "Pool sweep evicted {} idle connections, {} remain",
                    evicted.len(),
                    inner.connections.len()
                );
            }
            evicted
        };

        for conn in evicted {
            conn.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min, 2);
        assert_eq!(config.max, 20);
        assert_eq!(config.max_idle, Duration::from_secs(300));
    }

    #[test]
    fn test_pool_stats_serialization() {
        let stats = PoolStats {
            total: 3,
            active: 1,
            idle: 2,
            active_owners: 1,
            min: 2,
            max: 10,
        };
        let json: serde_json::Value = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total"], 3);
        assert_eq!(json["active"], 1);
        assert_eq!(json["idle"], 2);
        assert_eq!(json["active_owners"], 1);
    }

    #[tokio::test]
    async fn test_stats_on_empty_pool() {
        let pool = AsrPool::new(
            AsrConfig {
                host: "127.0.0.1".to_string(),
                port: 9,
                use_tls: false,
                tls_verify: false,
            },
            PoolConfig::default(),
        );

        let stats = pool.stats().await;
        assert_eq!(stats.total, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.active_owners, 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let pool = AsrPool::new(
            AsrConfig {
                host: "127.0.0.1".to_string(),
                port: 9,
                use_tls: false,
                tls_verify: false,
            },
            PoolConfig::default(),
        );

        pool.shutdown().await;
        pool.shutdown().await;
        assert_eq!(pool.stats().await.total, 0);
    }
}
