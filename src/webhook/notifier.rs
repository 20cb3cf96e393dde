//! Single-Operation Webhook Notifier
//!
//! Wraps a `FileStore` and mirrors every mutation as its own HTTP request:
//!
//! ```text
//! write(path, c) ──► store.write ──► return
//!                         └──► spawn ──► POST   {base_url}{path}  (retry)
//! delete(path)   ──► store.delete ──► return
//!                         └──► spawn ──► DELETE {base_url}{path}  (retry)
//! ```
//!
//! Each delivery is an independent task: there is no ordering between
//! notifications, not even for the same path.

use crate::store::{Contents, FileStore, StoreError};
use crate::webhook::config::{RetryPolicy, WebhookConfig};
use crate::webhook::error::WebhookError;
use crate::webhook::record::join_url;
use crate::webhook::transport::WebhookTransport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Delivery counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Notifications acknowledged by the endpoint
    pub delivered: u64,
    /// Extra attempts made after a failure
    pub retries: u64,
    /// Notifications abandoned after exhausting their attempts
    pub failed: u64,
    /// Deliveries still running
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct DeliveryCounters {
    delivered: AtomicU64,
    retries: AtomicU64,
    failed: AtomicU64,
}

/// One notification to send
#[derive(Debug)]
enum Delivery {
    Post(Contents),
    Delete,
}

impl Delivery {
    fn method(&self) -> &'static str {
        match self {
            Delivery::Post(_) => "POST",
            Delivery::Delete => "DELETE",
        }
    }
}

/// File store that fires one webhook request per mutation
pub struct WebHookFileStore<S: FileStore, T: WebhookTransport> {
    store: S,
    transport: Arc<T>,
    config: WebhookConfig,
    runtime: Handle,
    tasks: TaskTracker,
    /// Serializes `wait_idle` callers around close/reopen
    idle_lock: tokio::sync::Mutex<()>,
    counters: Arc<DeliveryCounters>,
}

impl<S: FileStore, T: WebhookTransport> WebHookFileStore<S, T> {
    /// Create a notifier running deliveries on the current tokio runtime
    pub fn new(store: S, transport: T, config: WebhookConfig) -> Result<Self, WebhookError> {
        let runtime = Handle::try_current().map_err(|_| WebhookError::NoRuntime)?;
        Self::with_handle(store, transport, config, runtime)
    }

    /// Create a notifier running deliveries on `runtime`
    pub fn with_handle(
        store: S,
        transport: T,
        config: WebhookConfig,
        runtime: Handle,
    ) -> Result<Self, WebhookError> {
        config.validate()?;
        Ok(WebHookFileStore {
            store,
            transport: Arc::new(transport),
            config,
            runtime,
            tasks: TaskTracker::new(),
            idle_lock: tokio::sync::Mutex::new(()),
            counters: Arc::new(DeliveryCounters::default()),
        })
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            in_flight: self.tasks.len(),
        }
    }

    /// Wait until every delivery spawned so far has finished (including retries).
    ///
    /// Intended for shutdown and tests; deliveries spawned while waiting are
    /// waited on as well. Concurrent callers are served one at a time.
    pub async fn wait_idle(&self) {
        let _waiting = self.idle_lock.lock().await;
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn dispatch(&self, path: &str, delivery: Delivery) {
        let url = join_url(&self.config.base_url, path);
        let transport = Arc::clone(&self.transport);
        let retry = self.config.retry.clone();
        let counters = Arc::clone(&self.counters);

        self.tasks.spawn_on(
            async move { deliver(transport.as_ref(), &url, delivery, &retry, &counters).await },
            &self.runtime,
        );
    }
}

#[cfg(feature = "http")]
impl<S: FileStore> WebHookFileStore<S, crate::webhook::transport::ReqwestTransport> {
    /// Create a notifier sending over HTTP with the configured request timeout
    pub fn connect(store: S, config: WebhookConfig) -> Result<Self, WebhookError> {
        let transport = crate::webhook::transport::ReqwestTransport::new(config.request_timeout)?;
        Self::new(store, transport, config)
    }
}

/// Send one notification, retrying failures with a fixed delay.
/// Never returns an error: the outcome is logged and counted.
async fn deliver<T: WebhookTransport>(
    transport: &T,
    url: &str,
    delivery: Delivery,
    retry: &RetryPolicy,
    counters: &DeliveryCounters,
) {
    let mut attempt: u32 = 1;
    loop {
        let result = match &delivery {
            Delivery::Post(body) => transport.post(url, body).await,
            Delivery::Delete => transport.delete(url).await,
        };

        match result {
            Ok(()) => {
                debug!("Webhook {} {} delivered (attempt {})", delivery.method(), url, attempt);
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) if retry.should_retry(attempt, &e) => {
                warn!(
                    "Webhook {} {} failed (attempt {}/{}): {}",
                    delivery.method(),
                    url,
                    attempt,
                    retry.max_attempts,
                    e
                );
                counters.retries.fetch_add(1, Ordering::Relaxed);
                attempt += 1;
                tokio::time::sleep(retry.delay).await;
            }
            Err(e) => {
                error!(
                    "Webhook {} {} abandoned after {} attempt(s): {}",
                    delivery.method(),
                    url,
                    attempt,
                    e
                );
                counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }
}

impl<S: FileStore, T: WebhookTransport> FileStore for WebHookFileStore<S, T> {
    fn write(&self, path: &str, contents: Contents) -> Result<(), StoreError> {
        self.store.write(path, contents.clone())?;
        self.dispatch(path, Delivery::Post(contents));
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Contents, StoreError> {
        self.store.read(path)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.store.list(prefix)
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.store.delete(path)?;
        self.dispatch(path, Delivery::Delete);
        Ok(())
    }
}
