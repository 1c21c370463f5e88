//! Client that sends records to a cluster.
//!
//! One [`Producer::send`] call serializes the record, resolves the
//! partition leader through the session's metadata cache, produces one
//! single-message set to that broker, and maps the partition-level
//! result back to the caller. Routing errors (a moved or unelected
//! leader, a topic the broker no longer knows) invalidate the cached
//! metadata and retry against a refreshed snapshot, up to the
//! configured number of retries with capped exponential backoff.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::sleep;

use crate::error::{Error, KafkaCode, Result};
use crate::metadata::TopicPartition;
use crate::protocol::{self, produce::request::Message};
use crate::session::Session;
use crate::utils::now;

/// Turns one application value into its wire bytes.
///
/// Called in the sender's context; implementations must not touch
/// client state.
pub trait Serializer {
    type Input;

    fn serialize(&self, value: &Self::Input) -> Result<Bytes>;
}

/// Passes already-encoded bytes through untouched. The default for
/// both keys and values.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesSerializer;

impl Serializer for BytesSerializer {
    type Input = Bytes;

    fn serialize(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }
}

/// One record bound for one partition of one topic.
#[derive(Clone, Debug)]
pub struct ProducerRecord<K, V> {
    pub topic: String,
    pub partition: i32,
    pub key: Option<K>,
    pub value: Option<V>,
    /// Milliseconds since the unix epoch; the send time when `None`.
    pub timestamp: Option<i64>,
}

/// Broker-assigned coordinates of one accepted record.
///
/// A fire-and-forget send (`acks = 0`) has no response to report, so
/// both `offset` and `timestamp` are −1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProduceResult {
    pub topic_partition: TopicPartition,
    pub offset: i64,
    pub timestamp: i64,
}

#[derive(Clone, Debug)]
pub(crate) struct ProduceParams {
    pub client_id: String,
    pub required_acks: i16,
    pub timeout_ms: i32,
    pub retries: u32,
    pub retry_backoff: Duration,
}

/// Sends records to the cluster, one produce request per record.
///
/// Built by a [`ProducerBuilder`](crate::producer_builder::ProducerBuilder).
pub struct Producer<KS = BytesSerializer, VS = BytesSerializer> {
    pub(crate) session: Session,
    pub(crate) params: ProduceParams,
    pub(crate) key_serializer: KS,
    pub(crate) value_serializer: VS,
}

impl<KS: Serializer, VS: Serializer> Producer<KS, VS> {
    /// Send one record and report where the broker put it.
    pub async fn send(
        &self,
        record: ProducerRecord<KS::Input, VS::Input>,
    ) -> Result<ProduceResult> {
        let key = match &record.key {
            Some(key) => Some(self.key_serializer.serialize(key)?),
            None => None,
        };
        let value = match &record.value {
            Some(value) => Some(self.value_serializer.serialize(value)?),
            None => None,
        };
        let timestamp = record.timestamp.unwrap_or_else(now);

        let mut attempt: u32 = 0;
        loop {
            let outcome = self
                .try_send(
                    &record.topic,
                    record.partition,
                    key.clone(),
                    value.clone(),
                    timestamp,
                )
                .await;
            match outcome {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retriable() && attempt < self.params.retries => {
                    tracing::debug!(
                        "Send to {}/{} failed ({}), refreshing metadata and retrying",
                        record.topic,
                        record.partition,
                        e
                    );
                    self.session
                        .metadata
                        .invalidate(std::slice::from_ref(&record.topic));
                    sleep(backoff(self.params.retry_backoff, attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_send(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        value: Option<Bytes>,
        timestamp: i64,
    ) -> Result<ProduceResult> {
        let topics = [topic.to_string()];
        let snapshot = self.session.metadata.fetch_topics(&topics).await?;

        let entry = snapshot
            .topics
            .get(topic)
            .ok_or(Error::KafkaError(KafkaCode::UnknownTopicOrPartition))?;
        if entry.error_code != KafkaCode::None {
            return Err(Error::KafkaError(entry.error_code));
        }
        let meta = entry
            .partitions
            .get(&partition)
            .ok_or(Error::KafkaError(KafkaCode::UnknownTopicOrPartition))?;
        if meta.error_code != KafkaCode::None {
            return Err(Error::KafkaError(meta.error_code));
        }
        if meta.leader < 0 {
            return Err(Error::NoLeader(topic.to_string(), partition));
        }
        let broker = snapshot
            .brokers
            .get(&meta.leader)
            .ok_or_else(|| Error::NoLeader(topic.to_string(), partition))?;
        let addr = broker.addr()?;

        let expect_response = self.params.required_acks != 0;
        let message = Message::new(key, value, timestamp);
        let frame = self
            .session
            .send(&addr, expect_response, |correlation_id| {
                let mut request = protocol::ProduceRequest::new(
                    self.params.required_acks,
                    self.params.timeout_ms,
                    correlation_id,
                    &self.params.client_id,
                );
                request.add(topic, partition, message);
                request
            })
            .await?;

        let topic_partition = TopicPartition {
            topic: topic.to_string(),
            partition,
        };

        let frame = match frame {
            Some(frame) => frame,
            // fire and forget: the broker never answers
            None => {
                return Ok(ProduceResult {
                    topic_partition,
                    offset: -1,
                    timestamp: -1,
                })
            }
        };

        let response = match protocol::ProduceResponse::try_from(frame) {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, Error::TruncatedInput | Error::MalformedInput(_)) {
                    // the stream is desynchronized, stop trusting it
                    if let Ok(conn) = self.session.connection(&addr).await {
                        conn.close().await;
                    }
                }
                return Err(e);
            }
        };

        let partition_response = response
            .partition(topic, partition)
            .ok_or(Error::KafkaError(KafkaCode::Unknown))?;
        if partition_response.error_code != KafkaCode::None {
            return Err(Error::KafkaError(partition_response.error_code));
        }

        tracing::trace!(
            "Produced to {}/{} at offset {}",
            topic,
            partition,
            partition_response.base_offset
        );
        Ok(ProduceResult {
            topic_partition,
            offset: partition_response.base_offset,
            timestamp: partition_response.log_append_time,
        })
    }

    /// Close the underlying session and every broker connection.
    pub async fn close(self) {
        self.session.close().await;
    }
}

/// 100ms, 200ms, 400ms, ... capped at one second.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(4);
    (base * factor).min(Duration::from_secs(1))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 0), Duration::from_millis(100));
        assert_eq!(backoff(base, 1), Duration::from_millis(200));
        assert_eq!(backoff(base, 2), Duration::from_millis(400));
        assert_eq!(backoff(base, 3), Duration::from_millis(800));
        assert_eq!(backoff(base, 4), Duration::from_secs(1));
        assert_eq!(backoff(base, 30), Duration::from_secs(1));
    }

    #[test]
    fn bytes_serializer_is_identity() {
        let value = Bytes::from_static(b"exactly these bytes");
        assert_eq!(BytesSerializer.serialize(&value).unwrap(), value);
    }
}
