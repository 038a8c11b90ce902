//! Snapshot delivery with bounded retries.
//!
//! A send is retried only when the transport fails at the connection level.
//! A non-2xx answer, a request that cannot be built or an unserializable
//! snapshot is reported straight away.
//! Nothing here panics or propagates: the caller always gets an outcome.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;

use crate::error::{DeliveryError, TransportError};
use crate::snapshot::Snapshot;

/// Something that can carry a JSON body to the collector.
pub trait Transport {
    /// Send `body`, returning the HTTP status code.
    fn send(&self, body: &[u8]) -> Result<u16, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, body: &[u8]) -> Result<u16, TransportError> {
        (**self).send(body)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, body: &[u8]) -> Result<u16, TransportError> {
        (**self).send(body)
    }
}

/// POSTs snapshots to a collector endpoint.
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Fails if `endpoint` is not an absolute http(s) URL.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| TransportError::Invalid(format!("endpoint {endpoint:?}: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::Invalid(format!(
                "endpoint scheme {:?} is not http or https",
                endpoint.scheme()
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Invalid(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

impl Transport for HttpTransport {
    fn send(&self, body: &[u8]) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .map_err(classify_reqwest_error)?;
        Ok(response.status().as_u16())
    }
}

/// Requests that could never succeed are `Invalid`; the rest are worth
/// another try.
fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_builder() || e.is_redirect() || e.is_decode() {
        TransportError::Invalid(e.to_string())
    } else if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}

/// Prints snapshots to stdout instead of sending them.
pub struct ConsoleTransport;

impl Transport for ConsoleTransport {
    fn send(&self, body: &[u8]) -> Result<u16, TransportError> {
        let text = match serde_json::from_slice::<serde_json::Value>(body)
            .and_then(|v| serde_json::to_string_pretty(&v))
        {
            Ok(pretty) => pretty,
            Err(_) => String::from_utf8_lossy(body).into_owned(),
        };
        println!("{text}");
        Ok(200)
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Result of one delivery.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32, status: u16 },
    Failed { attempts: u32, error: DeliveryError },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts, .. } | DeliveryOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

pub struct DeliveryClient<T: Transport> {
    transport: T,
    cfg: DeliveryConfig,
}

impl<T: Transport> DeliveryClient<T> {
    pub fn new(transport: T, cfg: DeliveryConfig) -> Self {
        Self { transport, cfg }
    }

    /// Serialize and send a snapshot, retrying transient failures.
    /// The snapshot is consumed whatever happens.
    pub fn deliver(&self, snapshot: Snapshot) -> DeliveryOutcome {
        let body = match serde_json::to_vec(&snapshot) {
            Ok(body) => body,
            Err(e) => {
                log::error!("Dropping snapshot: {e}");
                return DeliveryOutcome::Failed {
                    attempts: 0,
                    error: DeliveryError::Malformed(e),
                };
            }
        };
        drop(snapshot);

        let max = self.cfg.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.attempt(&body) {
                Ok(status) => {
                    log::info!(
                        "Delivered {} bytes (HTTP {status}, attempt {attempt}/{max})",
                        body.len()
                    );
                    return DeliveryOutcome::Delivered {
                        attempts: attempt,
                        status,
                    };
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                log::error!("Delivery failed permanently: {error}");
                return DeliveryOutcome::Failed {
                    attempts: attempt,
                    error,
                };
            }
            if attempt >= max {
                log::error!("Delivery failed after {attempt} attempts: {error}");
                return DeliveryOutcome::Failed {
                    attempts: attempt,
                    error,
                };
            }

            log::warn!(
                "Delivery attempt {attempt}/{max} failed: {error}; retrying in {:?}",
                self.cfg.retry_delay
            );
            std::thread::sleep(self.cfg.retry_delay);
        }
    }

    fn attempt(&self, body: &[u8]) -> Result<u16, DeliveryError> {
        let status = self.transport.send(body)?;
        if (200..300).contains(&status) {
            Ok(status)
        } else {
            Err(DeliveryError::Rejected { status })
        }
    }
}
