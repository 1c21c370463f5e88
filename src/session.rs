//! One pool of broker connections plus the metadata that routes
//! requests across them.
//!
//! A [`Session`] owns at most one [`BrokerConnection`] per broker
//! address. Requests for the same broker share that connection;
//! concurrent first callers share one TCP connect instead of racing
//! two. Closing the session closes every connection before returning,
//! after which every send fails with [`Error::SessionClosed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, OnceCell};

use crate::encode::ToByte;
use crate::error::{Error, Result};
use crate::metadata::ClusterMetadata;
use crate::network::{BrokerAddress, BrokerConnection, ConnectionConfig};
use crate::DEFAULT_CLIENT_ID;

/// Session-wide configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Logical identifier echoed in every request envelope.
    pub client_id: String,
    /// How long a metadata snapshot stays fresh without a refresh.
    pub metadata_ttl: Duration,
    pub connection: ConnectionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            metadata_ttl: Duration::from_secs(300),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Keyed pool of broker connections.
///
/// The per-address `OnceCell` is what coalesces concurrent first
/// callers: both await the same connect instead of opening two
/// sockets.
pub(crate) struct ConnectionPool {
    config: ConnectionConfig,
    connections: Mutex<HashMap<BrokerAddress, Arc<OnceCell<BrokerConnection>>>>,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub(crate) fn new(config: ConnectionConfig) -> ConnectionPool {
        ConnectionPool {
            config,
            connections: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// The connection for `addr`, connecting lazily. A connection that
    /// broke underneath us is discarded and replaced.
    pub(crate) async fn get(&self, addr: &BrokerAddress) -> Result<BrokerConnection> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::SessionClosed);
            }

            let cell = {
                let mut connections = self.connections.lock().await;
                connections
                    .entry(addr.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            };

            let conn = cell
                .get_or_try_init(|| BrokerConnection::connect(addr.clone(), self.config.clone()))
                .await?
                .clone();
            if conn.is_ready() {
                return Ok(conn);
            }

            tracing::debug!("Discarding dead connection to {}", addr);
            let mut connections = self.connections.lock().await;
            if let Some(current) = connections.get(addr) {
                if Arc::ptr_eq(current, &cell) {
                    connections.remove(addr);
                }
            }
        }
    }

    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let cells: Vec<Arc<OnceCell<BrokerConnection>>> = {
            let mut connections = self.connections.lock().await;
            connections.drain().map(|(_, cell)| cell).collect()
        };
        for cell in cells {
            if let Some(conn) = cell.get() {
                conn.close().await;
            }
        }
    }
}

/// Entry point for talking to a cluster: a connection pool and the
/// metadata cache that decides which broker gets which request.
pub struct Session {
    pool: Arc<ConnectionPool>,
    /// Cluster topology, owned by this session.
    pub metadata: ClusterMetadata,
}

impl Session {
    pub fn new(bootstrap: Vec<BrokerAddress>, config: SessionConfig) -> Result<Session> {
        if bootstrap.is_empty() {
            return Err(Error::ArgError(String::from(
                "bootstrap servers must not be empty",
            )));
        }
        let pool = Arc::new(ConnectionPool::new(config.connection));
        let metadata =
            ClusterMetadata::new(pool.clone(), bootstrap, config.client_id, config.metadata_ttl);
        Ok(Session { pool, metadata })
    }

    /// The pooled connection for `addr`, connecting lazily.
    pub async fn connection(&self, addr: &BrokerAddress) -> Result<BrokerConnection> {
        self.pool.get(addr).await
    }

    /// Route one request to the broker at `addr`.
    ///
    /// `build` receives the correlation id the connection allocated
    /// and returns the request to send. `Ok(None)` means no response
    /// was expected.
    pub async fn send<R, F>(
        &self,
        addr: &BrokerAddress,
        expect_response: bool,
        build: F,
    ) -> Result<Option<Bytes>>
    where
        R: ToByte,
        F: FnOnce(i32) -> R,
    {
        let conn = self.pool.get(addr).await?;
        let correlation_id = conn.next_correlation_id();
        let req = build(correlation_id);
        conn.send_request(&req, correlation_id, expect_response).await
    }

    /// Close every connection in the pool. Outstanding requests fail
    /// with [`Error::Canceled`]; later sends fail with
    /// [`Error::SessionClosed`].
    pub async fn close(&self) {
        tracing::debug!("Closing session");
        self.pool.close().await;
    }
}
