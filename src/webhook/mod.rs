//! Webhook Mirroring
//!
//! Wraps a `FileStore` and mirrors every mutation to an HTTP endpoint. The
//! local store is always authoritative; the webhook is a best-effort side
//! channel that never blocks or fails the caller.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► Notifier.write/delete ──► FileStore (sync, authoritative)
//!                     │
//!                     └──► background task ──► WebhookTransport ──► endpoint
//! ```
//!
//! ## Notifiers
//!
//! - **`WebHookFileStore`**: one request per mutation, bounded retries
//! - **`BatchedWebHookFileStore`**: per-path coalescing, flushed on idle
//!   timeout or size limit, one request per batch

pub mod batched;
pub mod config;
pub mod error;
pub mod notifier;
pub mod record;
pub mod simulated_transport;
pub mod transport;

pub use batched::{BatchStats, BatchedWebHookFileStore, FlushTrigger, PendingBatch};
pub use config::{BatchConfig, ConfigError, RetryPolicy, WebhookConfig};
pub use error::WebhookError;
pub use notifier::{DeliveryStats, WebHookFileStore};
pub use record::{join_url, ContentEncoding, MutationRecord, RecordMethod};
pub use simulated_transport::{SimulatedTransport, SimulatedTransportConfig, SimulatedTransportStats};
#[cfg(feature = "http")]
pub use transport::ReqwestTransport;
pub use transport::{
    RecordedRequest, RecordingTransport, TransportError, TransportFuture, WebhookTransport,
};
