//! Configure a [`Producer`].

use std::time::Duration;

use crate::error::{Error, Result};
use crate::network::BrokerAddress;
use crate::producer::{BytesSerializer, ProduceParams, Producer, Serializer};
use crate::session::{Session, SessionConfig};
use crate::DEFAULT_CLIENT_ID;

const DEFAULT_REQUIRED_ACKS: i16 = 1;
const DEFAULT_TIMEOUT_MS: i32 = 30_000;
const DEFAULT_RETRIES: u32 = 0;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Configure a [`Producer`].
///
/// ### Example
/// ```no_run
/// use josef::prelude::*;
///
/// # async fn run() -> Result<()> {
/// let producer = ProducerBuilder::new(vec!["127.0.0.1:9092".to_string()])?
///     .client_id("inventory".to_string())
///     .required_acks(-1)
///     .retries(3)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ProducerBuilder<KS = BytesSerializer, VS = BytesSerializer> {
    bootstrap: Vec<BrokerAddress>,
    session_config: SessionConfig,
    required_acks: i16,
    timeout_ms: i32,
    retries: u32,
    retry_backoff: Duration,
    key_serializer: KS,
    value_serializer: VS,
}

impl ProducerBuilder {
    /// Start a producer builder from the `host:port` bootstrap list.
    /// To complete, use the [`build`](Self::build) method.
    pub fn new(bootstrap_servers: Vec<String>) -> Result<ProducerBuilder> {
        if bootstrap_servers.is_empty() {
            return Err(Error::ArgError(String::from(
                "bootstrap servers must not be empty",
            )));
        }
        let bootstrap = bootstrap_servers
            .iter()
            .map(|addr| addr.parse())
            .collect::<Result<Vec<BrokerAddress>>>()?;

        Ok(ProducerBuilder {
            bootstrap,
            session_config: SessionConfig {
                client_id: DEFAULT_CLIENT_ID.to_string(),
                ..SessionConfig::default()
            },
            required_acks: DEFAULT_REQUIRED_ACKS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            key_serializer: BytesSerializer,
            value_serializer: BytesSerializer,
        })
    }
}

impl<KS, VS> ProducerBuilder<KS, VS> {
    /// Logical identifier echoed in every request envelope.
    pub fn client_id(mut self, client_id: String) -> Self {
        self.session_config.client_id = client_id;
        self
    }

    /// The number of acknowledgments the producer requires the leader
    /// to have received before considering a request complete. Allowed
    /// values: 0 for no acknowledgments, 1 for only the leader and -1
    /// for the full ISR.
    pub fn required_acks(mut self, required_acks: i16) -> Self {
        self.required_acks = required_acks;
        self
    }

    /// The server-side ack timeout, also used as the client-side wait
    /// for the response.
    pub fn timeout_ms(mut self, timeout_ms: i32) -> Self {
        self.timeout_ms = timeout_ms;
        self.session_config.connection.request_timeout =
            Duration::from_millis(timeout_ms.max(0) as u64);
        self
    }

    /// Max retries per send on retriable routing errors.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Base backoff between retries; doubles per attempt, capped at
    /// one second.
    pub fn retry_backoff_ms(mut self, retry_backoff_ms: u64) -> Self {
        self.retry_backoff = Duration::from_millis(retry_backoff_ms);
        self
    }

    /// Upper bound, in bytes, on a single encoded request.
    pub fn max_request_size(mut self, max_request_size: usize) -> Self {
        self.session_config.connection.max_request_size = max_request_size;
        self
    }

    /// Max concurrent pending requests per broker connection.
    pub fn max_in_flight_requests_per_connection(mut self, max_in_flight: usize) -> Self {
        self.session_config.connection.max_in_flight = max_in_flight;
        self
    }

    pub fn connect_timeout_ms(mut self, connect_timeout_ms: u64) -> Self {
        self.session_config.connection.connect_timeout =
            Duration::from_millis(connect_timeout_ms);
        self
    }

    /// How long a metadata snapshot stays fresh without a refresh.
    pub fn metadata_ttl_ms(mut self, metadata_ttl_ms: u64) -> Self {
        self.session_config.metadata_ttl = Duration::from_millis(metadata_ttl_ms);
        self
    }

    /// Serialize keys with `serializer` instead of passing bytes
    /// through.
    pub fn key_serializer<KS2: Serializer>(self, serializer: KS2) -> ProducerBuilder<KS2, VS> {
        ProducerBuilder {
            bootstrap: self.bootstrap,
            session_config: self.session_config,
            required_acks: self.required_acks,
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            retry_backoff: self.retry_backoff,
            key_serializer: serializer,
            value_serializer: self.value_serializer,
        }
    }

    /// Serialize values with `serializer` instead of passing bytes
    /// through.
    pub fn value_serializer<VS2: Serializer>(self, serializer: VS2) -> ProducerBuilder<KS, VS2> {
        ProducerBuilder {
            bootstrap: self.bootstrap,
            session_config: self.session_config,
            required_acks: self.required_acks,
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            retry_backoff: self.retry_backoff,
            key_serializer: self.key_serializer,
            value_serializer: serializer,
        }
    }

    /// Validate the configuration and build the producer. The first
    /// send connects and fetches metadata; nothing dials here.
    pub fn build(self) -> Result<Producer<KS, VS>> {
        if !matches!(self.required_acks, -1 | 0 | 1) {
            return Err(Error::ArgError(format!(
                "acks must be -1, 0 or 1, got {}",
                self.required_acks
            )));
        }
        if self.timeout_ms < 0 {
            return Err(Error::ArgError(String::from("timeout_ms must be >= 0")));
        }

        let client_id = self.session_config.client_id.clone();
        let session = Session::new(self.bootstrap, self.session_config)?;

        Ok(Producer {
            session,
            params: ProduceParams {
                client_id,
                required_acks: self.required_acks,
                timeout_ms: self.timeout_ms,
                retries: self.retries,
                retry_backoff: self.retry_backoff,
            },
            key_serializer: self.key_serializer,
            value_serializer: self.value_serializer,
        })
    }
}
