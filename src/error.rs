//! Crate & protocol level errors.
use std::io;

use bytes::Bytes;
use num_derive::FromPrimitive;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// All the ways a produce call can go wrong, from codec to broker.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// An error in the network.
    #[error("IO error: {0:?}")]
    IoError(io::ErrorKind),

    /// A decode ran off the end of the buffer.
    #[error("truncated input")]
    TruncatedInput,

    /// The data does not match the schema being decoded.
    #[error("malformed input ({} bytes)", .0.len())]
    MalformedInput(Bytes),

    /// The TCP connection died with requests outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// The broker did not accept the connection in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The request was abandoned before a response arrived.
    #[error("request canceled")]
    Canceled,

    /// The session is closed and accepts no further requests.
    #[error("session closed")]
    SessionClosed,

    /// No response arrived within the configured request timeout.
    #[error("request timed out")]
    RequestTimedOut,

    /// The encoded request exceeds `max_request_size`.
    #[error("request of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// No elected leader for the topic partition.
    #[error("no leader for topic {0} partition {1}")]
    NoLeader(String, i32),

    /// An error code reported by a broker.
    #[error("broker error: {0:?}")]
    KafkaError(KafkaCode),

    /// A value does not fit its wire representation.
    #[error("encoding error")]
    EncodingError,

    /// Invalid caller-supplied configuration.
    #[error("invalid argument: {0}")]
    ArgError(String),
}

impl Error {
    /// Routing errors are worth a metadata refresh and another attempt;
    /// everything else is surfaced to the caller as-is.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::NoLeader(_, _) => true,
            Error::KafkaError(code) => code.is_retriable(),
            _ => false,
        }
    }
}

/// Various errors reported by a remote broker.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, Default)]
pub enum KafkaCode {
    /// An unexpected server error
    Unknown = -1,
    #[default]
    None = 0,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange = 1,
    /// This indicates that a message contents does not match its CRC
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// The message has a negative size
    InvalidMessageSize = 4,
    /// This error is thrown if we are in the middle of a leadership
    /// election and there is currently no leader for this partition
    /// and hence it is unavailable for writes.
    LeaderNotAvailable = 5,
    /// This error is thrown if the client attempts to send messages
    /// to a replica that is not the leader for some partition. It
    /// indicates that the clients metadata is out of date.
    NotLeaderForPartition = 6,
    /// This error is thrown if the request exceeds the user-specified
    /// time limit in the request.
    RequestTimedOut = 7,
    /// This is not a client facing error and is used mostly by tools
    /// when a broker is not alive.
    BrokerNotAvailable = 8,
    /// If replica is expected on a broker, but is not (this can be
    /// safely ignored).
    ReplicaNotAvailable = 9,
    /// The server has a configurable maximum message size to avoid
    /// unbounded memory allocation. This error is thrown if the
    /// client attempt to produce a message larger than this maximum.
    MessageSizeTooLarge = 10,
    /// Internal error code for broker-to-broker communication.
    StaleControllerEpoch = 11,
    /// If you specify a string larger than configured maximum for
    /// offset metadata
    OffsetMetadataTooLarge = 12,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The broker returns this error code for an offset fetch request
    /// if it is still loading offsets, or in response to group
    /// membership requests when group metadata is being loaded by the
    /// coordinator.
    GroupLoadInProgress = 14,
    /// The broker returns this error code for group coordinator
    /// requests, offset commits, and most group management requests
    /// if the offsets topic has not yet been created, or if the group
    /// coordinator is not active.
    GroupCoordinatorNotAvailable = 15,
    /// The broker returns this error code if it receives an offset
    /// fetch or commit request for a group that it is not a
    /// coordinator for.
    NotCoordinatorForGroup = 16,
    /// For a request which attempts to access an invalid topic, or if
    /// an attempt is made to write to an internal topic.
    InvalidTopic = 17,
    /// If a message batch in a produce request exceeds the maximum
    /// configured segment size.
    RecordListTooLarge = 18,
    /// Returned from a produce request when the number of in-sync
    /// replicas is lower than the configured minimum and requiredAcks
    /// is -1.
    NotEnoughReplicas = 19,
    /// Returned from a produce request when the message was written
    /// to the log, but with fewer in-sync replicas than required.
    NotEnoughReplicasAfterAppend = 20,
    /// Returned from a produce request if the requested requiredAcks
    /// is invalid (anything other than -1, 1, or 0).
    InvalidRequiredAcks = 21,
    /// Returned from group membership requests when the generation id
    /// provided in the request is not the current generation.
    IllegalGeneration = 22,
    /// Returned in join group when the member provides a protocol
    /// type or set of protocols which is not compatible with the
    /// current group.
    InconsistentGroupProtocol = 23,
    /// Returned in join group when the groupId is empty or null.
    InvalidGroupId = 24,
    /// Returned from group requests when the memberId is not in the
    /// current generation.
    UnknownMemberId = 25,
    /// Returned in join group when the requested session timeout is
    /// outside of the allowed range on the broker
    InvalidSessionTimeout = 26,
    /// Returned in heartbeat requests when the coordinator has begun
    /// rebalancing the group.
    RebalanceInProgress = 27,
    /// This error indicates that an offset commit was rejected
    /// because of oversize metadata.
    InvalidCommitOffsetSize = 28,
    /// Returned by the broker when the client is not authorized to
    /// access the requested topic.
    TopicAuthorizationFailed = 29,
    /// Returned by the broker when the client is not authorized to
    /// access a particular groupId.
    GroupAuthorizationFailed = 30,
    /// Returned by the broker when the client is not authorized to
    /// use an inter-broker or administrative API.
    ClusterAuthorizationFailed = 31,
    /// The timestamp of the message is out of acceptable range.
    InvalidTimestamp = 32,
    /// The broker does not support the requested SASL mechanism.
    UnsupportedSaslMechanism = 33,
    /// Request is not valid given the current SASL state.
    IllegalSaslState = 34,
    /// The version of API is not supported.
    UnsupportedVersion = 35,
    /// Topic with this name already exists.
    TopicAlreadyExists = 36,
    /// This is not the correct controller for this cluster.
    NotController = 41,
    /// The message format version on the broker does not support the
    /// request.
    UnsupportedForMessageFormat = 43,
}

impl KafkaCode {
    /// Codes that mean the cached routing is out of date rather than
    /// the payload being rejected.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
                | KafkaCode::UnknownTopicOrPartition
        )
    }
}
