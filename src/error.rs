//! Error types surfaced by the engine

use std::sync::Arc;

use thiserror::Error;

/// The argument list could not be turned into a cache key
///
/// Raised when `serde_json` refuses the argument value, e.g. a map whose keys
/// are not strings.
#[derive(Debug, Error)]
#[error("Argument list cannot be used as a cache key: {0}")]
pub struct KeyError(#[from] serde_json::Error);

/// Errors returned by [`Engine::execute`](crate::Engine::execute) and
/// [`Engine::load`](crate::Engine::load)
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// The wrapped request failed; holds the adapted error
    ///
    /// The same `Arc` is stored as the engine's last error and handed to the
    /// error subscribers.
    #[error("Request failed: {0}")]
    Request(Arc<E>),

    /// Key derivation failed before anything was fetched
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The runtime shut down before the fetch task settled
    #[error("Request task was cancelled before it settled")]
    Cancelled,
}

impl<E> ExecuteError<E> {
    /// Returns the adapted request error, if this is a request failure
    pub fn request_error(&self) -> Option<&Arc<E>> {
        match self {
            ExecuteError::Request(err) => Some(err),
            ExecuteError::Key(_) | ExecuteError::Cancelled => None,
        }
    }
}

/// Errors returned by [`Engine::get_ref`](crate::Engine::get_ref)
#[derive(Debug, Error)]
pub enum RefError {
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Reactive cells run on a background task
    #[error("Reactive cells need a running Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_error_message_mentions_cache_key() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not JSON object keys");
        let err = KeyError::from(serde_json::to_value(&map).unwrap_err());

        assert!(err.to_string().contains("cache key"));
    }

    #[test]
    fn test_request_error_is_shared() {
        let inner = Arc::new("boom".to_string());
        let err: ExecuteError<String> = ExecuteError::Request(inner.clone());

        assert!(Arc::ptr_eq(err.request_error().unwrap(), &inner));
        assert_eq!(err.to_string(), "Request failed: boom");
    }

    #[test]
    fn test_cancelled_carries_no_request_error() {
        let err: ExecuteError<String> = ExecuteError::Cancelled;
        assert!(err.request_error().is_none());
    }
}
