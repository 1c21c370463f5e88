//! Cluster metadata & operations.
//!
//! The cache owns the client's picture of the cluster: which brokers
//! exist, which topics and partitions they host, and who leads each
//! partition. Snapshots are immutable and replaced wholesale on every
//! refresh, so a caller holding one never observes a half-updated
//! topology. Routing errors mark topics stale, which forces the next
//! fetch to refresh no matter how young the cache is.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Error, KafkaCode, Result};
use crate::network::BrokerAddress;
use crate::protocol::{
    self,
    metadata::response::{Broker, PartitionMetadata},
};
use crate::session::ConnectionPool;

/// Canonical routing key for one partition of one topic.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

/// Everything the cache knows about one topic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopicEntry {
    pub error_code: KafkaCode,
    pub partitions: HashMap<i32, PartitionMetadata>,
}

/// Immutable view of the topology at one fetch.
#[derive(Clone, Debug, Default)]
pub struct ClusterSnapshot {
    /// Every live broker, by node id.
    pub brokers: HashMap<i32, Broker>,
    /// Every known topic, by name.
    pub topics: HashMap<String, TopicEntry>,
}

impl ClusterSnapshot {
    pub fn broker(&self, node_id: i32) -> Option<&Broker> {
        self.brokers.get(&node_id)
    }

    pub fn partition(&self, topic: &str, partition: i32) -> Option<&PartitionMetadata> {
        self.topics.get(topic)?.partitions.get(&partition)
    }

    /// The broker currently leading a partition, if one is elected
    /// and present in the broker list.
    pub fn leader_for(&self, topic: &str, partition: i32) -> Option<&Broker> {
        let meta = self.partition(topic, partition)?;
        if meta.leader < 0 {
            return None;
        }
        let leader = self.broker(meta.leader)?;
        tracing::debug!(
            "Leader is {:?} for topic {} and partition {}",
            leader,
            topic,
            partition
        );
        Some(leader)
    }
}

struct Cache {
    snapshot: Arc<ClusterSnapshot>,
    fetched_at: Option<Instant>,
    stale: HashSet<String>,
}

/// The session's cluster topology cache.
pub struct ClusterMetadata {
    pool: Arc<ConnectionPool>,
    bootstrap: Vec<BrokerAddress>,
    client_id: String,
    ttl: Duration,
    next_bootstrap: AtomicUsize,
    cache: Mutex<Cache>,
    /// Serializes refreshes so concurrent misses coalesce into one
    /// wire request.
    refresh: tokio::sync::Mutex<()>,
}

impl ClusterMetadata {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        bootstrap: Vec<BrokerAddress>,
        client_id: String,
        ttl: Duration,
    ) -> ClusterMetadata {
        ClusterMetadata {
            pool,
            bootstrap,
            client_id,
            ttl,
            next_bootstrap: AtomicUsize::new(0),
            cache: Mutex::new(Cache {
                snapshot: Arc::new(ClusterSnapshot::default()),
                fetched_at: None,
                stale: HashSet::new(),
            }),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A snapshot covering at least `topics`.
    ///
    /// Returns the cached snapshot when it is fresh, otherwise asks a
    /// bootstrap broker and replaces the cache atomically. Concurrent
    /// callers that miss together refresh once, not once each.
    pub async fn fetch_topics(&self, topics: &[String]) -> Result<Arc<ClusterSnapshot>> {
        if let Some(snapshot) = self.fresh(topics) {
            return Ok(snapshot);
        }

        let _refresh = self.refresh.lock().await;
        // somebody else may have refreshed while we waited in line
        if let Some(snapshot) = self.fresh(topics) {
            tracing::trace!("Coalesced metadata fetch for {:?}", topics);
            return Ok(snapshot);
        }
        self.refresh_from_cluster(topics).await
    }

    /// Mark topics stale; the next fetch covering any of them must
    /// refresh.
    pub fn invalidate(&self, topics: &[String]) {
        tracing::debug!("Invalidating metadata for {:?}", topics);
        let mut cache = self.lock_cache();
        for topic in topics {
            cache.stale.insert(topic.clone());
        }
    }

    /// The cached snapshot, if it can answer for `topics`: young
    /// enough, none of them marked stale, all of them present without
    /// errors, and every partition with an elected leader.
    fn fresh(&self, topics: &[String]) -> Option<Arc<ClusterSnapshot>> {
        let cache = self.lock_cache();
        let fetched_at = cache.fetched_at?;
        if fetched_at.elapsed() > self.ttl {
            return None;
        }
        if topics.iter().any(|topic| cache.stale.contains(topic)) {
            return None;
        }
        for topic in topics {
            let entry = cache.snapshot.topics.get(topic)?;
            if entry.error_code != KafkaCode::None {
                return None;
            }
            if entry.partitions.values().any(|p| p.leader < 0) {
                return None;
            }
        }
        Some(cache.snapshot.clone())
    }

    async fn refresh_from_cluster(&self, topics: &[String]) -> Result<Arc<ClusterSnapshot>> {
        // the cache is replaced wholesale, so ask for everything we
        // currently track as well as what the caller wants
        let mut requested: Vec<String> = topics.to_vec();
        {
            let cache = self.lock_cache();
            for name in cache.snapshot.topics.keys() {
                if !requested.contains(name) {
                    requested.push(name.clone());
                }
            }
        }

        tracing::debug!("Fetching metadata for {:?}", requested);
        let response = self.request_metadata(&requested).await?;
        let snapshot = Arc::new(snapshot_from_response(response));

        let mut cache = self.lock_cache();
        cache.snapshot = snapshot.clone();
        cache.fetched_at = Some(Instant::now());
        cache.stale.clear();
        Ok(snapshot)
    }

    /// One round-robin pass over the bootstrap servers.
    async fn request_metadata(&self, topics: &[String]) -> Result<protocol::MetadataResponse> {
        let mut last_error = None;
        for _ in 0..self.bootstrap.len() {
            let index = self.next_bootstrap.fetch_add(1, Ordering::Relaxed) % self.bootstrap.len();
            let addr = &self.bootstrap[index];
            match self.request_metadata_from(addr, topics).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!("Metadata fetch from {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(Error::ConnectionLost))
    }

    async fn request_metadata_from(
        &self,
        addr: &BrokerAddress,
        topics: &[String],
    ) -> Result<protocol::MetadataResponse> {
        let conn = self.pool.get(addr).await?;
        let correlation_id = conn.next_correlation_id();
        let request = protocol::MetadataRequest::new(correlation_id, &self.client_id, topics);
        let frame = conn
            .send_request(&request, correlation_id, true)
            .await?
            .ok_or(Error::ConnectionLost)?;
        match protocol::MetadataResponse::try_from(frame) {
            Ok(response) => Ok(response),
            Err(e) => {
                // a response we cannot decode means the stream can no
                // longer be trusted
                if matches!(e, Error::TruncatedInput | Error::MalformedInput(_)) {
                    conn.close().await;
                }
                Err(e)
            }
        }
    }
}

fn snapshot_from_response(response: protocol::MetadataResponse) -> ClusterSnapshot {
    let mut brokers = HashMap::with_capacity(response.brokers.len());
    for broker in response.brokers {
        brokers.insert(broker.node_id, broker);
    }

    let mut topics = HashMap::with_capacity(response.topics.len());
    for topic in response.topics {
        let name = String::from_utf8_lossy(&topic.name).into_owned();
        let mut partitions = HashMap::with_capacity(topic.partitions.len());
        for partition in topic.partitions {
            if partition.leader >= 0 && !brokers.contains_key(&partition.leader) {
                tracing::warn!(
                    "Topic {} partition {} led by unknown broker {}",
                    name,
                    partition.partition,
                    partition.leader
                );
            }
            partitions.insert(partition.partition, partition);
        }
        topics.insert(
            name,
            TopicEntry {
                error_code: topic.error_code,
                partitions,
            },
        );
    }

    ClusterSnapshot { brokers, topics }
}
