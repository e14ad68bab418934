//! Lifecycle-aware client adapter for persistent bidirectional RPC/event
//! connections.
//!
//! The crate is organized by concern:
//! - `connection`: the consumed connection trait and error taxonomy.
//! - `service`: the queue-and-replay facade with typed event subscription.
//! - `retry`: retry-delay policies for connection startup.
//! - `resolve`: logical-to-wire method and event name translation.
//! - `scope`: cleanup scopes driving automatic listener teardown.
//!
//! Construct one [`RealtimeService`] per connection and hand clones of it to
//! whichever consumers need it; the handle is cheap to clone and every clone
//! shares the same queue and listener state.

/// Consumed connection trait and errors.
pub mod connection;
/// Name translation between logical and wire identifiers.
pub mod resolve;
/// Retry-delay policies for connection startup.
pub mod retry;
/// Cleanup scopes for automatic listener teardown.
pub mod scope;
/// Queue-and-replay service facade.
pub mod service;

pub use connection::{ClientError, CloseHandler, Connection, EventHandler};
pub use resolve::{Identity, MethodMap, MethodResolver};
pub use retry::{no_retry, BackoffSchedule, RetryContext, RetryDelayFn};
pub use scope::CleanupScope;
pub use service::{FailCallback, OnOptions, RealtimeService, ServiceConfig, SkipPredicate};
