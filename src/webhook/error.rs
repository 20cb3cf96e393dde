//! Errors raised while constructing a notifier
//!
//! Delivery failures never surface here: they are logged and counted by the
//! notifiers, and the public write/delete/flush API only reports store errors.

use crate::webhook::config::ConfigError;
use crate::webhook::transport::TransportError;

#[derive(Debug)]
pub enum WebhookError {
    /// No tokio runtime available to run background deliveries
    NoRuntime,
    /// Configuration rejected
    Config(ConfigError),
    /// Transport could not be built
    Transport(TransportError),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::NoRuntime => {
                write!(f, "Webhook notifier must be created inside a tokio runtime")
            }
            WebhookError::Config(e) => write!(f, "{}", e),
            WebhookError::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for WebhookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WebhookError::NoRuntime => None,
            WebhookError::Config(e) => Some(e),
            WebhookError::Transport(e) => Some(e),
        }
    }
}

impl From<ConfigError> for WebhookError {
    fn from(e: ConfigError) -> Self {
        WebhookError::Config(e)
    }
}

impl From<TransportError> for WebhookError {
    fn from(e: TransportError) -> Self {
        WebhookError::Transport(e)
    }
}
