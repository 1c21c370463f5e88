//! In-process scripted broker for driving the client over real TCP.
//!
//! The broker accepts connections, parses request envelopes, and
//! answers each request with whatever frames the test's script
//! returns. Returning no frames lets a test exercise timeouts,
//! cancellation and fire-and-forget sends.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use josef::prelude::encode::Builder;
use josef::prelude::KafkaCode;

pub const API_KEY_PRODUCE: i16 = 0;
pub const API_KEY_METADATA: i16 = 3;

/// One parsed request envelope, as the broker saw it.
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub struct SeenRequest {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: String,
    pub body: Bytes,
}

type Script = dyn Fn(&SeenRequest) -> Vec<Bytes> + Send + Sync;

#[allow(dead_code)]
pub struct MockBroker {
    pub addr: SocketAddr,
    /// Sockets accepted so far.
    pub accepted: Arc<AtomicUsize>,
    /// Metadata requests seen so far.
    pub metadata_requests: Arc<AtomicUsize>,
    /// Produce requests seen so far.
    pub produce_requests: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockBroker {
    pub async fn spawn<F>(script: F) -> MockBroker
    where
        F: Fn(&SeenRequest) -> Vec<Bytes> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accepted = Arc::new(AtomicUsize::new(0));
        let metadata_requests = Arc::new(AtomicUsize::new(0));
        let produce_requests = Arc::new(AtomicUsize::new(0));
        let script: Arc<Script> = Arc::new(script);

        let broker = MockBroker {
            addr,
            accepted: accepted.clone(),
            metadata_requests: metadata_requests.clone(),
            produce_requests: produce_requests.clone(),
        };

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let script = script.clone();
                let metadata_requests = metadata_requests.clone();
                let produce_requests = produce_requests.clone();
                tokio::spawn(serve(socket, script, metadata_requests, produce_requests));
            }
        });

        broker
    }

    /// The `host:port` bootstrap list pointing at this broker.
    pub fn bootstrap(&self) -> Vec<String> {
        vec![self.addr.to_string()]
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> i32 {
        i32::from(self.addr.port())
    }
}

async fn serve(
    mut socket: TcpStream,
    script: Arc<Script>,
    metadata_requests: Arc<AtomicUsize>,
    produce_requests: Arc<AtomicUsize>,
) {
    loop {
        let mut size_buf = [0u8; 4];
        if socket.read_exact(&mut size_buf).await.is_err() {
            return;
        }
        let size = i32::from_be_bytes(size_buf) as usize;
        let mut frame = vec![0u8; size];
        if socket.read_exact(&mut frame).await.is_err() {
            return;
        }

        let request = parse_request(Bytes::from(frame));
        match request.api_key {
            API_KEY_METADATA => {
                metadata_requests.fetch_add(1, Ordering::SeqCst);
            }
            API_KEY_PRODUCE => {
                produce_requests.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }

        for response in script(&request) {
            let mut out = Vec::with_capacity(response.len() + 4);
            out.extend_from_slice(&(response.len() as i32).to_be_bytes());
            out.extend_from_slice(&response);
            if socket.write_all(&out).await.is_err() {
                return;
            }
        }
    }
}

fn parse_request(mut frame: Bytes) -> SeenRequest {
    let api_key = frame.get_i16();
    let api_version = frame.get_i16();
    let correlation_id = frame.get_i32();
    let client_id_len = frame.get_i16();
    let client_id = if client_id_len < 0 {
        String::new()
    } else {
        let raw = frame.split_to(client_id_len as usize);
        String::from_utf8_lossy(&raw).into_owned()
    };
    SeenRequest {
        api_key,
        api_version,
        correlation_id,
        client_id,
        body: frame,
    }
}

/// The topic names a metadata request asked for.
#[allow(dead_code)]
pub fn requested_topics(request: &SeenRequest) -> Vec<String> {
    assert_eq!(request.api_key, API_KEY_METADATA);
    let mut body = request.body.clone();
    let count = body.get_i32();
    let mut topics = Vec::new();
    for _ in 0..count {
        let len = body.get_i16();
        let raw = body.split_to(len as usize);
        topics.push(String::from_utf8_lossy(&raw).into_owned());
    }
    topics
}

/// A v0 metadata response frame: brokers as `(node_id, host, port)`,
/// topics as `(name, [(partition, leader)])` with no error codes.
#[allow(dead_code)]
pub fn metadata_response(
    correlation_id: i32,
    brokers: &[(i32, &str, i32)],
    topics: &[(&str, Vec<(i32, i32)>)],
) -> Bytes {
    let mut b = Builder::new();
    b.add_i32(correlation_id).unwrap();

    b.add_i32(brokers.len() as i32).unwrap();
    for (node_id, host, port) in brokers {
        b.add_i32(*node_id).unwrap();
        b.add_string(Some(host)).unwrap();
        b.add_i32(*port).unwrap();
    }

    b.add_i32(topics.len() as i32).unwrap();
    for (name, partitions) in topics {
        b.add_i16(KafkaCode::None as i16).unwrap();
        b.add_string(Some(name)).unwrap();
        b.add_i32(partitions.len() as i32).unwrap();
        for (partition, leader) in partitions {
            let nodes = [*leader];
            b.add_i16(KafkaCode::None as i16).unwrap();
            b.add_i32(*partition).unwrap();
            b.add_i32(*leader).unwrap();
            b.add_array(Some(&nodes[..])).unwrap();
            b.add_array(Some(&nodes[..])).unwrap();
        }
    }
    b.take_bytes()
}

/// A v2 produce response frame for a single topic partition.
#[allow(dead_code)]
pub fn produce_response(
    correlation_id: i32,
    topic: &str,
    partition: i32,
    error: KafkaCode,
    base_offset: i64,
    log_append_time: i64,
) -> Bytes {
    let mut b = Builder::new();
    b.add_i32(correlation_id).unwrap();
    b.add_i32(1).unwrap();
    b.add_string(Some(topic)).unwrap();
    b.add_i32(1).unwrap();
    b.add_i32(partition).unwrap();
    b.add_i16(error as i16).unwrap();
    b.add_i64(base_offset).unwrap();
    b.add_i64(log_append_time).unwrap();
    b.add_i32(0).unwrap();
    b.take_bytes()
}
