//! # Josef
//! Rust-native producer client for Kafka-compatible commit-log brokers.
//!
//! This crate turns application-level produce calls into correct
//! wire-level exchanges with the right broker at the right time. It is
//! Rust all the way down; no FFI bindings, meaning memory safety, safe
//! concurrency and low resource usage.
//!
//! ## Goals
//! - Easy to understand code
//! - Leverage best in class libraries such as Tokio and Nom to do the
//!   heavy lifting
//! - Provide a pure rust implementation of the broker's bytecode
//!   protocol
//! - Be a good building block for higher level works
//!
//! ## Getting started
//!
//! A [`Producer`](prelude::Producer) sends records to a given topic
//! and partition. To instantiate one, start with a
//! [`ProducerBuilder`](prelude::ProducerBuilder) and the bootstrap
//! list of your cluster.
//!
//! ```no_run
//! use josef::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let bootstrap_addrs = vec!["127.0.0.1:9092".to_string()];
//!
//! let producer = ProducerBuilder::new(bootstrap_addrs)?
//!     .client_id("orders".to_string())
//!     .retries(3)
//!     .build()?;
//!
//! let record = ProducerRecord {
//!     topic: "orders".to_string(),
//!     partition: 0,
//!     key: Some(bytes::Bytes::from_static(b"user-81")),
//!     value: Some(bytes::Bytes::from_static(b"created")),
//!     timestamp: None,
//! };
//!
//! let result = producer.send(record).await?;
//! println!("stored at offset {}", result.offset);
//!
//! producer.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! The producer resolves the partition leader through a cached view of
//! the cluster, refreshed on staleness or on routing errors, and
//! multiplexes every request for the same broker over one persistent
//! TCP connection. Users who want to speak the protocol directly can
//! reach the building blocks through [`prelude::protocol`] and a
//! [`Session`](prelude::Session).
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)

mod encode;
mod error;
mod metadata;
mod network;
mod parser;
mod producer;
mod producer_builder;
mod protocol;
mod session;
mod utils;

const DEFAULT_CLIENT_ID: &str = "josef";

pub mod prelude {
    //! Main export of various structures and methods
    //!
    //! # Producing
    //!
    //! The [`Producer`] struct is useful for easily sending messages
    //! to brokers. Configure one with a [`ProducerBuilder`], then call
    //! [`send`](Producer::send) per record; each call resolves once
    //! the leader broker has answered (or immediately for
    //! fire-and-forget producers with `acks = 0`).
    //!
    //! # Going lower
    //!
    //! We also provide the lower level pieces the producer is built
    //! out of, for users who want to interface with the broker API
    //! directly: the [`Session`] connection pool with its
    //! [`ClusterMetadata`] cache, the per-broker
    //! [`BrokerConnection`], and the [`protocol`] request and
    //! response types with the [`encode`]/[`parser`] primitives they
    //! are made of.

    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::metadata::{ClusterMetadata, ClusterSnapshot, TopicEntry, TopicPartition};
    pub use crate::network::{BrokerAddress, BrokerConnection, ConnectionConfig};
    pub use crate::producer::{
        BytesSerializer, ProduceResult, Producer, ProducerRecord, Serializer,
    };
    pub use crate::producer_builder::ProducerBuilder;
    pub use crate::session::{Session, SessionConfig};

    pub use bytes;

    pub mod encode {
        pub use crate::encode::*;
    }

    pub mod parser {
        pub use crate::parser::*;
    }

    pub mod protocol {
        pub use crate::protocol::*;
    }
}
