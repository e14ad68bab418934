//! Consumed connection interface.
//!
//! The service never owns a transport; it drives any connection object that
//! exposes the `start`/`invoke`/`on`/`off`/`on_close` surface described here.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Event handler registered with the connection for server-pushed events.
///
/// Removal by reference matches on `Arc` pointer identity, so callers must
/// keep the clone they registered if they intend to unsubscribe it later.
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Callback invoked when the underlying connection closes.
pub type CloseHandler = Box<dyn Fn(Option<ClientError>) + Send + Sync>;

/// Errors surfaced by the service and the underlying connection.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The connection could not be started.
    #[error("connection start failed: {0}")]
    StartFailed(String),

    /// A remote invocation was rejected by the server or the transport.
    #[error("invoke {method} failed: {reason}")]
    InvokeFailed {
        /// Wire method name of the failed call.
        method: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Arguments could not be serialized into wire values.
    #[error("invalid arguments for {method}: {reason}")]
    InvalidArguments {
        /// Logical method name of the rejected call.
        method: String,
        /// Serialization failure reason.
        reason: String,
    },

    /// The connection reported a close event.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The service was dropped while the call was still queued.
    #[error("service dropped before the queued call was dispatched")]
    Dropped,
}

/// Long-lived bidirectional RPC/event connection.
///
/// Implementations own the wire. The service layers call queuing, replay, and
/// listener lifecycle on top and treats everything below this trait as
/// opaque. All methods take `&self` so one connection can be shared behind an
/// `Arc`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Begins connecting. Failures are routed by the service to its retry
    /// policy and failure callback, never to `init()` callers.
    async fn start(&self) -> Result<(), ClientError>;

    /// Performs a remote call. `method` is the already-resolved wire name.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError>;

    /// Registers a handler for a server-pushed event.
    fn on(&self, method: &str, handler: EventHandler);

    /// Removes one handler, matched by `Arc` identity, or with `None` every
    /// handler registered for the event.
    fn off(&self, method: &str, handler: Option<&EventHandler>);

    /// Registers a handler invoked when the connection closes.
    fn on_close(&self, handler: CloseHandler);
}
