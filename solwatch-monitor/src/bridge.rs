//! Request/response plumbing shared by the gateway bridges.
//!
//! The bus has no native request/response, so requests carry a UUID and the
//! reply topic echoes it back; a pending map of oneshot senders correlates
//! the two, with a hard timeout so a dead gateway turns into an error instead
//! of a hung HTTP request.

use axum::http::StatusCode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("gateway did not answer in time")]
    Timeout,
    #[error("bus unavailable: {0}")]
    Bus(String),
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error("reply channel closed")]
    ChannelClosed,
    #[error("invalid request: {0}")]
    Invalid(&'static str),
}

impl BridgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Bus(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Gateway(_) | BridgeError::ChannelClosed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            BridgeError::Invalid(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Pending replies keyed by request id.
pub struct PendingMap<T> {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<T>>>>,
}

impl<T> Clone for PendingMap<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> PendingMap<T> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn register(&self, request_id: &str) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(request_id.to_string(), tx);
        rx
    }

    /// Resolve a reply. Returns false for unknown ids (late reply after
    /// timeout, or another monitor's request on the shared topic).
    pub fn resolve(&self, request_id: &str, value: T) -> bool {
        match self.inner.lock().remove(request_id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Await a registered reply, cleaning up the slot on timeout.
    pub async fn wait(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, BridgeError> {
        self.wait_with_timeout(request_id, rx, REQUEST_TIMEOUT).await
    }

    async fn wait_with_timeout(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<T>,
        limit: Duration,
    ) -> Result<T, BridgeError> {
        match timeout(limit, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                self.inner.lock().remove(request_id);
                Err(BridgeError::ChannelClosed)
            }
            Err(_) => {
                self.inner.lock().remove(request_id);
                Err(BridgeError::Timeout)
            }
        }
    }
}

impl<T> Default for PendingMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
