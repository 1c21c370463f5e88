//! Encoding and creation for Produce requests.

use bytes::{BufMut, Bytes};

use crate::{
    encode::ToByte,
    error::Result,
    protocol::HeaderRequest,
    utils::to_crc,
};

const API_KEY_PRODUCE: i16 = 0;
const API_VERSION: i16 = 2;

/// The magic byte (a.k.a version) we use for sent messages.
const MESSAGE_MAGIC_BYTE: i8 = 1;

/*
Produce Request (Version: 2) => acks timeout [topic_data]
  acks => INT16
  timeout => INT32
  topic_data => topic [data]
    topic => STRING
    data => partition record_set
      partition => INT32
      record_set => BYTES (a message set, not a protocol array)
*/

#[derive(Debug)]
pub struct ProduceRequest<'a> {
    pub header: HeaderRequest<'a>,
    /// The number of acknowledgments the producer requires the leader to
    /// have received before considering a request complete. Allowed
    /// values: 0 for no acknowledgments, 1 for only the leader and -1
    /// for the full ISR.
    pub required_acks: i16,
    /// The timeout to await a response in milliseconds.
    pub timeout_ms: i32,
    /// Each topic to produce to.
    topics: Vec<TopicProduce<'a>>,
}

impl<'a> ProduceRequest<'a> {
    pub fn new(
        required_acks: i16,
        timeout_ms: i32,
        correlation_id: i32,
        client_id: &'a str,
    ) -> ProduceRequest<'a> {
        ProduceRequest {
            header: HeaderRequest::new(API_KEY_PRODUCE, API_VERSION, correlation_id, client_id),
            required_acks,
            timeout_ms,
            topics: vec![],
        }
    }

    pub fn add(&mut self, topic: &'a str, partition: i32, message: Message) {
        match self.topics.iter_mut().find(|t| t.name == topic) {
            Some(t) => t.add(partition, message),
            None => {
                let mut t = TopicProduce::new(topic);
                t.add(partition, message);
                self.topics.push(t);
            }
        }
    }
}

impl<'a> ToByte for ProduceRequest<'a> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        tracing::trace!("Encoding ProduceRequest {:?}", self);
        self.header.encode(buffer)?;
        self.required_acks.encode(buffer)?;
        self.timeout_ms.encode(buffer)?;
        self.topics.encode(buffer)?;
        Ok(())
    }
}

#[derive(Debug)]
struct TopicProduce<'a> {
    /// The topic name.
    pub name: &'a str,
    /// Each partition to produce to.
    pub partitions: Vec<PartitionProduce>,
}

impl<'a> TopicProduce<'a> {
    pub fn new(name: &'a str) -> TopicProduce<'a> {
        TopicProduce {
            name,
            partitions: vec![],
        }
    }

    pub fn add(&mut self, partition: i32, message: Message) {
        match self
            .partitions
            .iter_mut()
            .find(|p| p.partition == partition)
        {
            Some(p) => p.message_set.add(message),
            None => {
                let mut p = PartitionProduce::new(partition);
                p.message_set.add(message);
                self.partitions.push(p);
            }
        }
    }
}

impl<'a> ToByte for TopicProduce<'a> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.name.encode(buffer)?;
        self.partitions.encode(buffer)?;
        Ok(())
    }
}

#[derive(Debug)]
struct PartitionProduce {
    /// The partition index.
    pub partition: i32,
    /// The messages bound for this partition.
    pub message_set: MessageSet,
}

impl PartitionProduce {
    pub fn new(partition: i32) -> PartitionProduce {
        PartitionProduce {
            partition,
            message_set: MessageSet::new(),
        }
    }
}

impl ToByte for PartitionProduce {
    fn encode<W: BufMut>(&self, out: &mut W) -> Result<()> {
        self.partition.encode(out)?;

        // the message set is framed as bytes, not as a protocol array
        let mut buf = Vec::with_capacity(64);
        self.message_set.encode_to_buf(&mut buf)?;
        buf.encode(out)
    }
}

/// One record on the wire.
#[derive(Clone, Debug)]
pub struct Message {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    attributes: i8,
}

impl Message {
    pub fn new(key: Option<Bytes>, value: Option<Bytes>, timestamp: i64) -> Message {
        Message {
            key,
            value,
            timestamp,
            attributes: 0,
        }
    }

    // crc: uint32 over everything after it
    // magic: int8
    // attributes: int8
    // timestamp: int64
    // key: nullable bytes
    // value: nullable bytes
    fn encode_to_buf(&self, out: &mut Vec<u8>) -> Result<()> {
        // will replace crc once we can calculate it
        let crc_pos = out.len();
        0u32.encode(out)?;

        MESSAGE_MAGIC_BYTE.encode(out)?;
        self.attributes.encode(out)?;
        self.timestamp.encode(out)?;
        self.key.encode(out)?;
        self.value.encode(out)?;

        let crc = to_crc(&out[crc_pos + 4..]);
        crc.encode(&mut &mut out[crc_pos..crc_pos + 4])?;

        Ok(())
    }
}

/// The framed container of the messages in a produce request.
///
/// Each entry is an offset, the message size, and the message itself.
/// Producers write offset 0 placeholders; the broker assigns the real
/// offsets on append.
#[derive(Debug, Default)]
pub struct MessageSet {
    messages: Vec<Message>,
}

impl MessageSet {
    pub fn new() -> MessageSet {
        MessageSet { messages: vec![] }
    }

    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn encode_to_buf(&self, out: &mut Vec<u8>) -> Result<()> {
        for message in &self.messages {
            // offset placeholder, assigned by the broker
            0i64.encode(out)?;

            let mut buf = Vec::with_capacity(26);
            message.encode_to_buf(&mut buf)?;
            buf.encode(out)?;
        }
        Ok(())
    }
}
