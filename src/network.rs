//! Connection & communication with a broker.
//!
//! # Network Module
//!
//! The broker speaks a binary protocol over TCP. The protocol defines
//! all APIs as request response message pairs. All messages are size
//! delimited. The client initiates a socket connection and then writes
//! a sequence of request messages and reads back the corresponding
//! response messages. No handshake is required on connection or
//! disconnection.
//!
//! Responses are not required to come back in request order; the
//! correlation id carried by every request and echoed by every
//! response is what pairs them up. One [`BrokerConnection`] therefore
//! keeps a table of pending requests keyed by correlation id, writes
//! frames through a single queue so concurrent senders never
//! interleave bytes on the wire, and runs one read loop that completes
//! whichever pending request a frame belongs to.
//!
//! The client will likely need to maintain a connection to multiple
//! brokers, as data is partitioned and the clients will need to talk
//! to the server that has their data. It should not generally be
//! necessary to maintain more than one connection to a single broker
//! from a single client instance; pooling lives in the
//! [`Session`](crate::session::Session).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

use crate::encode::ToByte;
use crate::error::{Error, Result};
use crate::parser::Reader;

/// Resolved `host:port` of one broker.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BrokerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::ArgError(format!("expected host:port, got {s:?}")))?;
        if host.is_empty() {
            return Err(Error::ArgError(format!("missing host in {s:?}")));
        }
        let port = port
            .parse()
            .map_err(|_| Error::ArgError(format!("invalid port in {s:?}")))?;
        Ok(BrokerAddress {
            host: host.to_string(),
            port,
        })
    }
}

/// Tunables shared by every connection a session opens.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// How long to wait for the TCP connect.
    pub connect_timeout: Duration,
    /// How long to wait for a response once a request is on the wire.
    pub request_timeout: Duration,
    /// Upper bound on the size of a single encoded request.
    pub max_request_size: usize,
    /// Max concurrent requests awaiting a response per connection.
    pub max_in_flight: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_request_size: 1_048_576,
            max_in_flight: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    /// Connected, requests flow.
    Ready,
    /// I/O failed underneath us; only a fresh connection recovers.
    Broken,
    /// Explicitly closed, terminal.
    Closed,
}

struct Shared {
    status: Status,
    next_correlation_id: i32,
    pending: HashMap<i32, oneshot::Sender<Result<Bytes>>>,
}

struct Inner {
    addr: BrokerAddress,
    config: ConnectionConfig,
    shared: Mutex<Shared>,
    frames: mpsc::UnboundedSender<Bytes>,
    in_flight: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// I/O died: every waiter gets `error`, the connection is Broken.
    fn fail(&self, error: Error) {
        let mut shared = self.lock_shared();
        if shared.status == Status::Closed {
            return;
        }
        shared.status = Status::Broken;
        for (_, waiter) in shared.pending.drain() {
            let _ = waiter.send(Err(error.clone()));
        }
        drop(shared);
        self.in_flight.close();
    }
}

/// One TCP connection to one broker.
///
/// Cheap to clone; all clones share the socket, the pending table and
/// the correlation id counter.
#[derive(Clone)]
pub struct BrokerConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("addr", &self.inner.addr)
            .finish()
    }
}

impl BrokerConnection {
    /// Connect to a broker.
    pub async fn connect(addr: BrokerAddress, config: ConnectionConfig) -> Result<Self> {
        tracing::debug!("Connecting to {}", addr);
        let connect = TcpStream::connect((addr.host.as_str(), addr.port));
        let stream = match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::error!("ERROR: Connecting to {} {:?}", addr, e);
                return Err(Error::IoError(e.kind()));
            }
            Err(_) => return Err(Error::ConnectTimeout),
        };
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (frames, frame_rx) = mpsc::unbounded_channel();
        let max_in_flight = config.max_in_flight;
        let inner = Arc::new(Inner {
            addr,
            config,
            shared: Mutex::new(Shared {
                status: Status::Ready,
                next_correlation_id: 1,
                pending: HashMap::new(),
            }),
            frames,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            tasks: Mutex::new(Vec::new()),
        });

        let writer = tokio::spawn(write_loop(inner.clone(), write_half, frame_rx));
        let reader = tokio::spawn(read_loop(inner.clone(), read_half));
        {
            let mut tasks = inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.push(writer);
            tasks.push(reader);
        }

        Ok(BrokerConnection { inner })
    }

    pub fn addr(&self) -> &BrokerAddress {
        &self.inner.addr
    }

    /// True until the connection breaks or is closed.
    pub fn is_ready(&self) -> bool {
        self.inner.lock_shared().status == Status::Ready
    }

    /// Allocate the next correlation id.
    ///
    /// Strictly increasing, wraps at `i32::MAX` back to 0, and skips
    /// any id that still has a request pending so a response after
    /// wraparound can never complete the wrong waiter.
    pub fn next_correlation_id(&self) -> i32 {
        let mut shared = self.inner.lock_shared();
        loop {
            let id = shared.next_correlation_id;
            shared.next_correlation_id = if id == i32::MAX { 0 } else { id + 1 };
            if !shared.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Serialize a request and send it to the broker.
    ///
    /// With `expect_response` the returned future resolves once the
    /// response frame with the matching correlation id arrives, or the
    /// request timeout elapses. Without it (produce with `acks = 0`)
    /// no waiter is registered and the future resolves as soon as the
    /// frame is handed to the write queue.
    pub async fn send_request<R: ToByte>(
        &self,
        req: &R,
        correlation_id: i32,
        expect_response: bool,
    ) -> Result<Option<Bytes>> {
        // size prefix placeholder, patched once the body is encoded
        let mut buffer = Vec::with_capacity(128);
        buffer.extend_from_slice(&[0, 0, 0, 0]);
        req.encode(&mut buffer)?;

        let size = buffer.len() - 4;
        if size > self.inner.config.max_request_size {
            return Err(Error::MessageTooLarge {
                size,
                limit: self.inner.config.max_request_size,
            });
        }
        (size as i32).encode(&mut &mut buffer[..])?;

        if !expect_response {
            if self.inner.lock_shared().status != Status::Ready {
                return Err(Error::ConnectionLost);
            }
            tracing::trace!("Sending {} bytes to {}", buffer.len(), self.inner.addr);
            return self
                .inner
                .frames
                .send(Bytes::from(buffer))
                .map(|_| None)
                .map_err(|_| Error::ConnectionLost);
        }

        let _permit = self
            .inner
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ConnectionLost)?;

        // register the waiter before the frame can hit the wire
        let receiver = {
            let mut shared = self.inner.lock_shared();
            if shared.status != Status::Ready {
                return Err(Error::ConnectionLost);
            }
            let (sender, receiver) = oneshot::channel();
            shared.pending.insert(correlation_id, sender);
            receiver
        };

        tracing::trace!(
            "Sending {} bytes to {} (correlation id {})",
            buffer.len(),
            self.inner.addr,
            correlation_id
        );
        if self.inner.frames.send(Bytes::from(buffer)).is_err() {
            self.inner.lock_shared().pending.remove(&correlation_id);
            return Err(Error::ConnectionLost);
        }

        match tokio::time::timeout(self.inner.config.request_timeout, receiver).await {
            Ok(Ok(result)) => result.map(Some),
            // the sender vanished without a verdict
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                // detach the waiter; the connection itself is fine
                self.inner.lock_shared().pending.remove(&correlation_id);
                tracing::warn!(
                    "Request {} to {} timed out",
                    correlation_id,
                    self.inner.addr
                );
                Err(Error::RequestTimedOut)
            }
        }
    }

    /// Close the connection. Outstanding requests fail with
    /// [`Error::Canceled`]; the socket is down before this returns.
    pub async fn close(&self) {
        {
            let mut shared = self.inner.lock_shared();
            if shared.status != Status::Closed {
                shared.status = Status::Closed;
                for (_, waiter) in shared.pending.drain() {
                    let _ = waiter.send(Err(Error::Canceled));
                }
            }
        }
        self.inner.in_flight.close();

        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        tracing::debug!("Closed connection to {}", self.inner.addr);
    }
}

/// Drains the write queue onto the socket, one frame at a time, so a
/// frame is always contiguous on the wire.
async fn write_loop(
    inner: Arc<Inner>,
    mut write_half: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            tracing::error!("ERROR: Writing to socket {:?}", e);
            inner.fail(Error::ConnectionLost);
            return;
        }
    }
    let _ = write_half.shutdown().await;
}

/// Reads size-delimited response frames and completes whichever
/// pending request each one correlates to.
async fn read_loop(inner: Arc<Inner>, mut read_half: OwnedReadHalf) {
    loop {
        let mut size_buf = [0u8; 4];
        if let Err(e) = read_half.read_exact(&mut size_buf).await {
            tracing::debug!("Read loop for {} ended: {:?}", inner.addr, e);
            inner.fail(Error::ConnectionLost);
            return;
        }
        let size = i32::from_be_bytes(size_buf);
        if size < 4 {
            tracing::error!("ERROR: Nonsense frame size {} from {}", size, inner.addr);
            inner.fail(Error::ConnectionLost);
            return;
        }

        let mut frame = vec![0u8; size as usize];
        if let Err(e) = read_half.read_exact(&mut frame).await {
            tracing::debug!("Read loop for {} ended mid frame: {:?}", inner.addr, e);
            inner.fail(Error::ConnectionLost);
            return;
        }
        let frame = Bytes::from(frame);
        tracing::trace!("Read {} bytes from {}", frame.len(), inner.addr);

        let mut reader = Reader::new(frame.clone());
        let correlation_id = match reader.read_i32() {
            Ok(id) => id,
            Err(_) => {
                inner.fail(Error::ConnectionLost);
                return;
            }
        };

        let waiter = inner.lock_shared().pending.remove(&correlation_id);
        match waiter {
            // the waiter may have been detached in the meantime;
            // a dead receiver is not our problem
            Some(waiter) => {
                let _ = waiter.send(Ok(frame));
            }
            None => {
                tracing::debug!(
                    "Discarding response with unknown correlation id {} from {}",
                    correlation_id,
                    inner.addr
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn broker_address_from_str() {
        let addr: BrokerAddress = "localhost:9092".parse().unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 9092);
        assert_eq!(addr.to_string(), "localhost:9092");
    }

    #[test]
    fn broker_address_rejects_garbage() {
        assert!("localhost".parse::<BrokerAddress>().is_err());
        assert!(":9092".parse::<BrokerAddress>().is_err());
        assert!("localhost:war".parse::<BrokerAddress>().is_err());
        assert!("localhost:99999".parse::<BrokerAddress>().is_err());
    }
}
