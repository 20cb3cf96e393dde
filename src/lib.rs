pub mod observability;
pub mod store;
pub mod webhook;

pub use store::{Contents, FileStore, InMemoryFileStore, LocalFsFileStore, StoreError};
pub use webhook::{
    BatchedWebHookFileStore, MutationRecord, WebHookFileStore, WebhookConfig, WebhookTransport,
};
