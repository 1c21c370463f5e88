//! Parsing and processing for Metadata responses.
//!
//! The response contains metadata for each partition, with partitions
//! grouped together by topic. Partitions refer to brokers by node id;
//! the broker list at the front of the response resolves those ids to
//! host and port.
//!
//! ### Protocol Def
//! ```text
//! Metadata Response (Version: 0) => [brokers] [topics]
//!   brokers => node_id host port
//!     node_id => INT32
//!     host => STRING
//!     port => INT32
//!   topics => error_code name [partitions]
//!     error_code => INT16
//!     name => STRING
//!     partitions => error_code partition leader [replicas] [isr]
//!       error_code => INT16
//!       partition => INT32
//!       leader => INT32
//!       replicas => INT32
//!       isr => INT32
//! ```

use bytes::Bytes;
use nom::{number::streaming::be_i32, IResult};
use nombytes::NomBytes;

use crate::{
    error::{Error, KafkaCode, Result},
    network::BrokerAddress,
    parser, protocol,
};

/// The base Metadata response object.
#[derive(Debug, Default, PartialEq)]
pub struct MetadataResponse {
    pub header: protocol::HeaderResponse,
    /// Each broker in the response.
    pub brokers: Vec<Broker>,
    /// Each topic in the response.
    pub topics: Vec<TopicMetadata>,
}

impl TryFrom<Bytes> for MetadataResponse {
    type Error = Error;

    fn try_from(s: Bytes) -> Result<Self> {
        tracing::trace!("Parsing MetadataResponse {:?}", s);
        parser::run_parser(s, parse_metadata_response)
    }
}

pub fn parse_metadata_response(s: NomBytes) -> IResult<NomBytes, MetadataResponse> {
    let (s, header) = protocol::parse_header_response(s)?;
    let (s, brokers) = parser::parse_array(parse_broker)(s)?;
    let (s, topics) = parser::parse_array(parse_topic)(s)?;

    Ok((
        s,
        MetadataResponse {
            header,
            brokers,
            topics,
        },
    ))
}

/// One node of the cluster. Identity is the node id; a record with a
/// known id but a new host or port means the topology moved.
#[derive(Debug, Clone, PartialEq)]
pub struct Broker {
    /// The broker ID.
    pub node_id: i32,
    /// The broker hostname.
    pub host: Bytes,
    /// The broker port.
    pub port: i32,
}

impl Broker {
    /// The dialable address of this broker.
    pub fn addr(&self) -> Result<BrokerAddress> {
        let host = std::str::from_utf8(&self.host).map_err(|err| {
            tracing::error!("Error converting from UTF8 {:?}", err);
            Error::MalformedInput(self.host.clone())
        })?;
        Ok(BrokerAddress {
            host: host.to_string(),
            port: self.port as u16,
        })
    }
}

fn parse_broker(s: NomBytes) -> IResult<NomBytes, Broker> {
    let (s, node_id) = be_i32(s)?;
    let (s, host) = parser::parse_string(s)?;
    let (s, port) = be_i32(s)?;

    Ok((s, Broker { node_id, host, port }))
}

/// Each topic in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMetadata {
    /// The topic error, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The topic name.
    pub name: Bytes,
    /// Each partition in the topic.
    pub partitions: Vec<PartitionMetadata>,
}

fn parse_topic(s: NomBytes) -> IResult<NomBytes, TopicMetadata> {
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, name) = parser::parse_string(s)?;
    let (s, partitions) = parser::parse_array(parse_partition)(s)?;

    Ok((
        s,
        TopicMetadata {
            error_code,
            name,
            partitions,
        },
    ))
}

/// Each partition in the topic. A leader of −1 means no leader is
/// currently elected and the partition cannot accept writes.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMetadata {
    /// The partition error, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The partition index.
    pub partition: i32,
    /// The node ID of the leader broker.
    pub leader: i32,
    /// The set of all nodes that host this partition.
    pub replicas: Vec<i32>,
    /// The set of nodes that are in sync with the leader for this partition.
    pub isr: Vec<i32>,
}

fn parse_partition(s: NomBytes) -> IResult<NomBytes, PartitionMetadata> {
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, partition) = be_i32(s)?;
    let (s, leader) = be_i32(s)?;
    let (s, replicas) = parser::parse_array(be_i32)(s)?;
    let (s, isr) = parser::parse_array(be_i32)(s)?;

    Ok((
        s,
        PartitionMetadata {
            error_code,
            partition,
            leader,
            replicas,
            isr,
        },
    ))
}
