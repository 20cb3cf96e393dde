//! Webhook Transport Abstraction
//!
//! The notifiers talk to the remote endpoint only through `WebhookTransport`.
//!
//! Implementations:
//! - `ReqwestTransport`: HTTP client for production (feature `http`)
//! - `RecordingTransport`: In-memory recorder for tests, with scriptable failures
//! - `SimulatedTransport`: Fault-injecting wrapper for seeded simulation runs

use crate::store::Contents;
use crate::webhook::record::MutationRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by transport operations
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Error type for webhook requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection-level failure
    Network(String),
    /// Endpoint answered with a non-success status
    Status(u16),
    /// Request did not complete in time
    Timeout,
    /// Other errors
    Other(String),
}

impl TransportError {
    /// Whether another attempt could succeed. Consulted only when the retry
    /// policy opts into stopping on permanent errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout => true,
            TransportError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            TransportError::Other(_) => false,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Network(msg) => write!(f, "Webhook network error: {}", msg),
            TransportError::Status(code) => write!(f, "Webhook returned HTTP {}", code),
            TransportError::Timeout => write!(f, "Webhook request timed out"),
            TransportError::Other(msg) => write!(f, "Webhook error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// HTTP transport capability consumed by the notifiers
pub trait WebhookTransport: Send + Sync + 'static {
    /// `POST url` with the raw content as body
    fn post<'a>(&'a self, url: &'a str, body: &'a Contents) -> TransportFuture<'a>;

    /// `DELETE url` with an empty body
    fn delete<'a>(&'a self, url: &'a str) -> TransportFuture<'a>;

    /// `POST url` with the records serialized as a JSON array
    fn post_batch<'a>(&'a self, url: &'a str, records: &'a [MutationRecord]) -> TransportFuture<'a>;
}

impl<T: WebhookTransport + ?Sized> WebhookTransport for Arc<T> {
    fn post<'a>(&'a self, url: &'a str, body: &'a Contents) -> TransportFuture<'a> {
        (**self).post(url, body)
    }

    fn delete<'a>(&'a self, url: &'a str) -> TransportFuture<'a> {
        (**self).delete(url)
    }

    fn post_batch<'a>(&'a self, url: &'a str, records: &'a [MutationRecord]) -> TransportFuture<'a> {
        (**self).post_batch(url, records)
    }
}

// ============================================================================
// ReqwestTransport - For production
// ============================================================================

#[cfg(feature = "http")]
pub use self::http::ReqwestTransport;

#[cfg(feature = "http")]
mod http {
    use super::{TransportError, TransportFuture, WebhookTransport};
    use crate::store::Contents;
    use crate::webhook::record::MutationRecord;
    use std::time::Duration;

    /// HTTP transport backed by a shared reqwest client
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
            let client = reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .map_err(|e| TransportError::Other(e.to_string()))?;
            Ok(ReqwestTransport { client })
        }

        /// Use a caller-configured client (TLS, auth headers, proxies)
        pub fn with_client(client: reqwest::Client) -> Self {
            ReqwestTransport { client }
        }

        async fn send(request: reqwest::RequestBuilder) -> Result<(), TransportError> {
            let response = request.send().await.map_err(map_reqwest_error)?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(TransportError::Status(status.as_u16()))
            }
        }
    }

    fn map_reqwest_error(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Network(e.to_string())
        }
    }

    impl WebhookTransport for ReqwestTransport {
        fn post<'a>(&'a self, url: &'a str, body: &'a Contents) -> TransportFuture<'a> {
            Box::pin(async move {
                let request = match body {
                    Contents::Text(text) => self.client.post(url).body(text.clone()),
                    Contents::Bytes(bytes) => self.client.post(url).body(bytes.clone()),
                };
                Self::send(request).await
            })
        }

        fn delete<'a>(&'a self, url: &'a str) -> TransportFuture<'a> {
            Box::pin(async move { Self::send(self.client.delete(url)).await })
        }

        fn post_batch<'a>(
            &'a self,
            url: &'a str,
            records: &'a [MutationRecord],
        ) -> TransportFuture<'a> {
            Box::pin(async move {
                let body =
                    serde_json::to_vec(records).map_err(|e| TransportError::Other(e.to_string()))?;
                let request = self
                    .client
                    .post(url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body);
                Self::send(request).await
            })
        }
    }
}

// ============================================================================
// RecordingTransport - For tests
// ============================================================================

/// A request observed by `RecordingTransport`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedRequest {
    Post { url: String, body: Contents },
    Delete { url: String },
    Batch { url: String, records: Vec<MutationRecord> },
}

impl RecordedRequest {
    pub fn url(&self) -> &str {
        match self {
            RecordedRequest::Post { url, .. }
            | RecordedRequest::Delete { url }
            | RecordedRequest::Batch { url, .. } => url,
        }
    }
}

#[derive(Debug, Default)]
struct RecordingState {
    requests: Vec<RecordedRequest>,
    /// Errors returned by the next requests, in order
    scripted_failures: VecDeque<TransportError>,
    /// Error returned once the script is exhausted
    persistent_failure: Option<TransportError>,
}

/// In-memory transport that records every request, including failed ones
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` requests with `error`
    pub fn fail_next(&self, count: usize, error: TransportError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.scripted_failures.push_back(error.clone());
        }
    }

    /// Fail every request (after any scripted failures) with `error`
    pub fn fail_always(&self, error: TransportError) {
        self.state.lock().persistent_failure = Some(error);
    }

    /// Stop failing requests
    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.scripted_failures.clear();
        state.persistent_failure = None;
    }

    /// All requests observed so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Single-operation POST requests as `(url, body)`
    pub fn posts(&self) -> Vec<(String, Contents)> {
        self.state
            .lock()
            .requests
            .iter()
            .filter_map(|r| match r {
                RecordedRequest::Post { url, body } => Some((url.clone(), body.clone())),
                _ => None,
            })
            .collect()
    }

    /// Single-operation DELETE request URLs
    pub fn deletes(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .filter_map(|r| match r {
                RecordedRequest::Delete { url } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// Batch requests as `(url, records)`
    pub fn batches(&self) -> Vec<(String, Vec<MutationRecord>)> {
        self.state
            .lock()
            .requests
            .iter()
            .filter_map(|r| match r {
                RecordedRequest::Batch { url, records } => Some((url.clone(), records.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().requests.clear();
    }

    fn record(&self, request: RecordedRequest) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.requests.push(request);
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }
        match &state.persistent_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl WebhookTransport for RecordingTransport {
    fn post<'a>(&'a self, url: &'a str, body: &'a Contents) -> TransportFuture<'a> {
        Box::pin(async move {
            self.record(RecordedRequest::Post {
                url: url.to_string(),
                body: body.clone(),
            })
        })
    }

    fn delete<'a>(&'a self, url: &'a str) -> TransportFuture<'a> {
        Box::pin(async move {
            self.record(RecordedRequest::Delete {
                url: url.to_string(),
            })
        })
    }

    fn post_batch<'a>(&'a self, url: &'a str, records: &'a [MutationRecord]) -> TransportFuture<'a> {
        Box::pin(async move {
            self.record(RecordedRequest::Batch {
                url: url.to_string(),
                records: records.to_vec(),
            })
        })
    }
}
