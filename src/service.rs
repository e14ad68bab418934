//! Queue-and-replay service facade over a [`Connection`].
//!
//! The service buffers outgoing calls until the connection is live, replays
//! them in FIFO order once it is, and wraps the connection's native event
//! subscription with name translation, skip filtering, once semantics, and
//! scope-based automatic teardown.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::connection::{ClientError, Connection, EventHandler};
use crate::resolve::{Identity, MethodResolver};
use crate::retry::{no_retry, RetryContext, RetryDelayFn};
use crate::scope::CleanupScope;

/// Callback receiving connection-start failures and close notifications.
pub type FailCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Predicate deciding whether a delivered event should be discarded.
pub type SkipPredicate = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// Configuration for [`RealtimeService`].
///
/// The retry-delay function is an explicit input here; it is never read off
/// the connection object.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Receives start failures and close notifications. Default: no-op.
    pub fail_fn: FailCallback,
    /// Retry-delay policy consulted after each failed start. Default: no retry.
    pub retry: RetryDelayFn,
    /// Logical-to-wire name translation. Default: passthrough.
    pub resolver: Arc<dyn MethodResolver>,
    /// Whether listeners registered with a scope are torn down automatically.
    /// Default: true.
    pub auto_off_in_scope: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            fail_fn: Arc::new(|_error| {}),
            retry: no_retry(),
            resolver: Arc::new(Identity),
            auto_off_in_scope: true,
        }
    }
}

impl ServiceConfig {
    /// Sets the failure callback.
    pub fn with_fail_fn(mut self, fail_fn: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.fail_fn = Arc::new(fail_fn);
        self
    }

    /// Sets the retry-delay function.
    pub fn with_retry(mut self, retry: RetryDelayFn) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the name resolver.
    pub fn with_resolver(mut self, resolver: impl MethodResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Enables or disables scope-based automatic teardown.
    pub fn with_auto_off_in_scope(mut self, enabled: bool) -> Self {
        self.auto_off_in_scope = enabled;
        self
    }
}

/// Per-subscription options for [`RealtimeService::on`].
#[derive(Clone, Default)]
pub struct OnOptions {
    /// Discards a delivery when the predicate returns true. The subscription
    /// itself stays registered.
    pub skip: Option<SkipPredicate>,
    /// Unsubscribes the callback before its first delivery is handed over.
    pub once: bool,
    /// Scope whose teardown should unsubscribe the callback automatically.
    pub scope: Option<Arc<CleanupScope>>,
}

struct PendingCall {
    method: String,
    args: Vec<Value>,
    completion: oneshot::Sender<Result<Value, ClientError>>,
}

struct DispatchState {
    connected: bool,
    queue: Vec<PendingCall>,
}

struct ListenerEntry {
    event: String,
    key: usize,
    wrapper: EventHandler,
}

struct RetryState {
    started_at: Instant,
    previous_retry_count: u32,
}

struct ServiceInner {
    connection: Arc<dyn Connection>,
    resolver: Arc<dyn MethodResolver>,
    retry: RetryDelayFn,
    fail_fn: FailCallback,
    auto_off_in_scope: bool,
    connected_tx: watch::Sender<bool>,
    dispatch: Mutex<DispatchState>,
    listeners: Mutex<Vec<ListenerEntry>>,
    active: Mutex<HashSet<usize>>,
    retry_state: Mutex<RetryState>,
}

/// Lifecycle-aware client handle over a shared connection.
///
/// Cloning is cheap and every clone drives the same queue, listener table,
/// and connected flag; pass clones to whichever consumers need the service
/// instead of stashing it in global state.
#[derive(Clone)]
pub struct RealtimeService {
    inner: Arc<ServiceInner>,
}

impl RealtimeService {
    /// Creates a service with default configuration.
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self::with_config(connection, ServiceConfig::default())
    }

    /// Creates a service with explicit configuration.
    ///
    /// Close notifications from the connection are routed to the configured
    /// failure callback from this point on.
    pub fn with_config(connection: Arc<dyn Connection>, config: ServiceConfig) -> Self {
        let (connected_tx, _) = watch::channel(false);
        let inner = Arc::new(ServiceInner {
            connection,
            resolver: config.resolver,
            retry: config.retry,
            fail_fn: config.fail_fn,
            auto_off_in_scope: config.auto_off_in_scope,
            connected_tx,
            dispatch: Mutex::new(DispatchState {
                connected: false,
                queue: Vec::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            active: Mutex::new(HashSet::new()),
            retry_state: Mutex::new(RetryState {
                started_at: Instant::now(),
                previous_retry_count: 0,
            }),
        });

        let fail_fn = Arc::clone(&inner.fail_fn);
        inner.connection.on_close(Box::new(move |error| {
            let error =
                error.unwrap_or_else(|| ClientError::Closed("connection closed".to_string()));
            fail_fn(&error);
        }));

        Self { inner }
    }

    /// Starts the underlying connection.
    ///
    /// On success the connected flag flips and any calls queued while
    /// disconnected are replayed FIFO. On failure the retry-delay function
    /// decides whether to wait and try again; every failure is also handed to
    /// the failure callback. Start errors never reach the caller.
    pub async fn init(&self) {
        loop {
            match self.inner.connection.start().await {
                Ok(()) => {
                    self.mark_connected();
                    return;
                }
                Err(error) => {
                    let delay = {
                        let mut retry = lock(&self.inner.retry_state);
                        retry.previous_retry_count += 1;
                        (self.inner.retry)(&RetryContext {
                            elapsed: retry.started_at.elapsed(),
                            retry_reason: &error,
                            previous_retry_count: retry.previous_retry_count,
                        })
                    };
                    (self.inner.fail_fn)(&error);
                    match delay {
                        Some(wait) => {
                            debug!(
                                event = "connection_retry_scheduled",
                                delay_ms = wait.as_millis() as u64,
                                error = %error
                            );
                            tokio::time::sleep(wait).await;
                        }
                        None => {
                            debug!(event = "connection_start_abandoned", error = %error);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Whether the connection has been started successfully.
    pub fn connected(&self) -> bool {
        *self.inner.connected_tx.borrow()
    }

    /// Watch channel tracking the connected flag.
    pub fn connected_changed(&self) -> watch::Receiver<bool> {
        self.inner.connected_tx.subscribe()
    }

    /// Performs a remote call, queueing it if the connection is not live yet.
    ///
    /// Connected: the call dispatches immediately. Not connected: the call is
    /// buffered and dispatched by the replay triggered from [`init`]; the
    /// returned future settles with whatever the underlying call produces
    /// either way. A call queued when the process never connects stays
    /// pending until the service is dropped.
    ///
    /// [`init`]: RealtimeService::init
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        enum Dispatch {
            Immediate(Vec<Value>),
            Queued(oneshot::Receiver<Result<Value, ClientError>>),
        }

        let dispatch = {
            let mut state = lock(&self.inner.dispatch);
            if state.connected {
                Dispatch::Immediate(args)
            } else {
                let (completion, receiver) = oneshot::channel();
                state.queue.push(PendingCall {
                    method: method.to_string(),
                    args,
                    completion,
                });
                debug!(event = "invoke_queued", method, queue_len = state.queue.len());
                Dispatch::Queued(receiver)
            }
        };

        match dispatch {
            Dispatch::Immediate(args) => {
                let wire = self.inner.resolver.resolve(method);
                self.inner.connection.invoke(&wire, args).await
            }
            Dispatch::Queued(receiver) => receiver.await.map_err(|_| ClientError::Dropped)?,
        }
    }

    /// Performs a remote call with serializable arguments.
    ///
    /// Tuples and sequences become the call's argument list; any other value
    /// is passed as a single argument.
    pub async fn invoke_with<T: Serialize>(
        &self,
        method: &str,
        args: T,
    ) -> Result<Value, ClientError> {
        let value = serde_json::to_value(args).map_err(|err| ClientError::InvalidArguments {
            method: method.to_string(),
            reason: err.to_string(),
        })?;
        let args = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        self.invoke(method, args).await
    }

    /// Subscribes `callback` to a server-pushed event.
    ///
    /// Deliveries run the skip predicate first; a skipped delivery leaves the
    /// subscription registered. With `once`, the callback is unsubscribed
    /// before its first delivery is handed over, so a burst of events cannot
    /// deliver twice. When a scope is supplied and automatic teardown is
    /// enabled, tearing the scope down unsubscribes the callback unless it
    /// was already removed manually.
    ///
    /// A callback `Arc` identity is registered at most once per event;
    /// registering it again replaces the earlier subscription.
    pub fn on(&self, event: &str, callback: EventHandler, options: OnOptions) {
        let wire = self.inner.resolver.resolve(event);
        let key = handler_key(&callback);
        self.inner.remove_listener(event, Some(key));

        let wrapper: EventHandler = {
            let inner = Arc::downgrade(&self.inner);
            let event = event.to_string();
            let callback = Arc::clone(&callback);
            let skip = options.skip.clone();
            let once = options.once;
            Arc::new(move |args: &[Value]| {
                if let Some(skip) = &skip {
                    if skip(args) {
                        return;
                    }
                }
                if once {
                    if let Some(inner) = inner.upgrade() {
                        inner.remove_listener(&event, Some(key));
                    }
                }
                callback(args);
            })
        };

        lock(&self.inner.listeners).push(ListenerEntry {
            event: event.to_string(),
            key,
            wrapper: Arc::clone(&wrapper),
        });
        self.inner.connection.on(&wire, wrapper);

        if self.inner.auto_off_in_scope {
            if let Some(scope) = &options.scope {
                lock(&self.inner.active).insert(key);
                let inner = Arc::downgrade(&self.inner);
                let event = event.to_string();
                scope.register_cleanup(move || {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    let still_active = lock(&inner.active).remove(&key);
                    if still_active {
                        inner.remove_listener(&event, Some(key));
                    }
                });
            }
        }
    }

    /// Subscribes `callback` for a single delivery.
    pub fn once(&self, event: &str, callback: EventHandler, options: OnOptions) {
        self.on(event, callback, OnOptions {
            once: true,
            ..options
        });
    }

    /// Unsubscribes one callback, matched by the `Arc` identity it was
    /// registered with, or every handler for the event when `callback` is
    /// `None`.
    pub fn off(&self, event: &str, callback: Option<&EventHandler>) {
        self.inner.remove_listener(event, callback.map(handler_key));
    }

    /// Flips the connected flag and replays the buffered calls.
    ///
    /// The flag set and the queue take happen under one lock so a fresh call
    /// observing `connected == false` has already made it into the taken
    /// batch. Replay runs on a single task awaiting each dispatch, which
    /// preserves FIFO arrival order at the connection.
    fn mark_connected(&self) {
        let drained = {
            let mut state = lock(&self.inner.dispatch);
            state.connected = true;
            std::mem::take(&mut state.queue)
        };
        // send_replace stores the value even when no receiver is alive
        let _ = self.inner.connected_tx.send_replace(true);
        debug!(event = "connection_established", queued_calls = drained.len());

        if drained.is_empty() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            for call in drained {
                let wire = inner.resolver.resolve(&call.method);
                let result = inner.connection.invoke(&wire, call.args).await;
                let _ = call.completion.send(result);
            }
        });
    }
}

impl ServiceInner {
    fn remove_listener(&self, event: &str, key: Option<usize>) {
        let wire = self.resolver.resolve(event);
        match key {
            Some(key) => {
                let removed = {
                    let mut listeners = lock(&self.listeners);
                    listeners
                        .iter()
                        .position(|entry| entry.event == event && entry.key == key)
                        .map(|index| listeners.remove(index))
                };
                let Some(entry) = removed else {
                    return;
                };
                lock(&self.active).remove(&key);
                self.connection.off(&wire, Some(&entry.wrapper));
            }
            None => {
                let removed: Vec<ListenerEntry> = {
                    let mut listeners = lock(&self.listeners);
                    let (dropped, kept) = listeners
                        .drain(..)
                        .partition(|entry: &ListenerEntry| entry.event == event);
                    *listeners = kept;
                    dropped
                };
                {
                    let mut active = lock(&self.active);
                    for entry in &removed {
                        active.remove(&entry.key);
                    }
                }
                self.connection.off(&wire, None);
            }
        }
    }
}

fn handler_key(handler: &EventHandler) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

// Listener callbacks run user code; if one panics under a lock the state is
// still coherent, so keep using it instead of propagating the poison.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
