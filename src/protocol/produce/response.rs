//! Parsing and processing for Produce responses.
//!
//! Note, the request needs a non-zero `required_acks` to receive a
//! response at all.
//!
//! ### Protocol Def
//! ```text
//! Produce Response (Version: 2) => [responses] throttle_time_ms
//!   responses => name [partition_responses]
//!     name => STRING
//!     partition_responses => partition error_code base_offset log_append_time
//!       partition => INT32
//!       error_code => INT16
//!       base_offset => INT64
//!       log_append_time => INT64
//!   throttle_time_ms => INT32
//! ```

use bytes::Bytes;
use nom::{
    number::streaming::{be_i32, be_i64},
    IResult,
};
use nombytes::NomBytes;

use crate::{
    error::{Error, KafkaCode, Result},
    parser,
    protocol::{parse_header_response, HeaderResponse},
};

/// The base Produce response object.
#[derive(Debug, PartialEq)]
pub struct ProduceResponse {
    pub header: HeaderResponse,
    /// Each produce response
    pub responses: Vec<TopicResponse>,
    /// Duration in milliseconds for which the request was throttled.
    pub throttle_time_ms: i32,
}

impl ProduceResponse {
    /// The partition-level outcome for one topic partition, if the
    /// broker reported on it.
    pub fn partition(&self, topic: &str, partition: i32) -> Option<&PartitionResponse> {
        self.responses
            .iter()
            .find(|r| r.name == topic)?
            .partition_responses
            .iter()
            .find(|p| p.partition == partition)
    }
}

#[derive(Debug, PartialEq)]
pub struct TopicResponse {
    /// The topic name
    pub name: Bytes,
    /// Each partition that we produced to within the topic.
    pub partition_responses: Vec<PartitionResponse>,
}

#[derive(Debug, PartialEq)]
pub struct PartitionResponse {
    /// The partition index.
    pub partition: i32,
    /// The error code, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The offset the broker assigned to the first message in the set.
    pub base_offset: i64,
    /// The broker-side append time, or −1 when create time is in use.
    pub log_append_time: i64,
}

impl TryFrom<Bytes> for ProduceResponse {
    type Error = Error;

    fn try_from(s: Bytes) -> Result<Self> {
        tracing::trace!("Parsing ProduceResponse {:?}", s);
        parser::run_parser(s, parse_produce_response)
    }
}

pub fn parse_produce_response(s: NomBytes) -> IResult<NomBytes, ProduceResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, responses) = parser::parse_array(parse_topic_response)(s)?;
    let (s, throttle_time_ms) = be_i32(s)?;

    Ok((
        s,
        ProduceResponse {
            header,
            responses,
            throttle_time_ms,
        },
    ))
}

fn parse_topic_response(s: NomBytes) -> IResult<NomBytes, TopicResponse> {
    let (s, name) = parser::parse_string(s)?;
    let (s, partition_responses) = parser::parse_array(parse_partition_response)(s)?;

    Ok((
        s,
        TopicResponse {
            name,
            partition_responses,
        },
    ))
}

fn parse_partition_response(s: NomBytes) -> IResult<NomBytes, PartitionResponse> {
    let (s, partition) = be_i32(s)?;
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, base_offset) = be_i64(s)?;
    let (s, log_append_time) = be_i64(s)?;

    Ok((
        s,
        PartitionResponse {
            partition,
            error_code,
            base_offset,
            log_append_time,
        },
    ))
}
