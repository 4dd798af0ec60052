use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use pairwire_frame::{Message, RoutedMessage};
use pairwire_peer::sync::lock;
use pairwire_peer::{Connection, PeerError};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{HandlerError, Result, RouterError};
use crate::handler::{handler_fn, NativeHandler, NoScripts, ScriptHost, ScriptRuntime};
use crate::registry::{Registry, Route};

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Every handler for the label ran; `failed` of them returned an error
    /// or panicked.
    Delivered { invoked: usize, failed: usize },
    /// Nothing is registered for the label.
    RouteNotFound,
    /// The message was not a routed message.
    Malformed,
}

/// Dispatches one connection's routed messages to registered handlers.
///
/// Handlers run one at a time on the router thread. A handler that blocks
/// delays every later message on this connection.
pub struct Router<S: ScriptRuntime = NoScripts> {
    connection: Arc<Connection>,
    runtime: S,
    registry: Mutex<Registry<S::Closure>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Router<NoScripts> {
    /// Router without scripting. Not started.
    pub fn new(connection: Arc<Connection>) -> Self {
        Self::with_runtime(connection, NoScripts)
    }

    /// Build and start a router without scripting.
    pub fn spawn(connection: Arc<Connection>) -> Result<Arc<Self>> {
        Self::spawn_with_runtime(connection, NoScripts)
    }
}

impl<S: ScriptRuntime> Router<S> {
    /// Router that hands script closures to `runtime`. Not started.
    pub fn with_runtime(connection: Arc<Connection>, runtime: S) -> Self {
        Self {
            connection,
            runtime,
            registry: Mutex::new(Registry::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn spawn_with_runtime(connection: Arc<Connection>, runtime: S) -> Result<Arc<Self>> {
        let router = Arc::new(Self::with_runtime(connection, runtime));
        router.start()?;
        Ok(router)
    }

    /// Start the dispatch thread.
    ///
    /// It takes messages until the connection is closed and drained.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(RouterError::AlreadyStarted);
        }
        let name = match self.connection.id() {
            Some(id) => format!("pairwire-router-{id}"),
            None => "pairwire-router".to_string(),
        };
        let router = Arc::downgrade(self);
        let connection = Arc::clone(&self.connection);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(&connection, &router))
            .map_err(RouterError::Spawn)?;
        *worker = Some(handle);
        Ok(())
    }

    /// Wait for the dispatch thread to finish.
    pub fn join(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(peer = self.connection.peer(), "router thread panicked");
            }
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn runtime(&self) -> &S {
        &self.runtime
    }

    /// Send `payload` to the peer under `label`.
    pub fn send(&self, label: impl Into<String>, payload: impl Into<Value>) -> Result<()> {
        self.connection
            .send(RoutedMessage::new(label, payload))
            .map_err(RouterError::from)
    }

    pub fn register_native(&self, label: impl Into<String>, handler: Arc<dyn NativeHandler>) {
        lock(&self.registry).register_native(label, handler);
    }

    /// Register a closure; returns its handle for [`Router::unregister_native`].
    pub fn register_fn<F>(&self, label: impl Into<String>, f: F) -> Arc<dyn NativeHandler>
    where
        F: Fn(&Value) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler = handler_fn(f);
        self.register_native(label, Arc::clone(&handler));
        handler
    }

    pub fn unregister_native(&self, label: &str, handler: &Arc<dyn NativeHandler>) -> bool {
        lock(&self.registry).unregister_native(label, handler)
    }

    pub fn register_script(&self, label: impl Into<String>, closure: S::Closure) {
        lock(&self.registry).register_script(label, closure);
    }

    pub fn unregister_script(&self, label: &str, closure: &S::Closure) -> bool {
        lock(&self.registry).unregister_script(label, closure)
    }

    /// Labels with at least one handler.
    pub fn labels(&self) -> Vec<String> {
        lock(&self.registry).labels()
    }

    /// Deliver one message to its handlers on the calling thread.
    ///
    /// Handlers run against a snapshot of the registry, so they may
    /// register, unregister or send without deadlocking.
    pub fn dispatch(&self, message: Message) -> Dispatch {
        let routed = match message {
            Message::Routed(routed) => routed,
            other => {
                error!(
                    peer = self.connection.peer(),
                    kind = other.kind(),
                    "non-routed message discarded"
                );
                return Dispatch::Malformed;
            }
        };

        let routes = lock(&self.registry).snapshot(&routed.label);
        if routes.is_empty() {
            warn!(label = %routed.label, "route not found");
            return Dispatch::RouteNotFound;
        }

        let mut failed = 0;
        for route in &routes {
            let outcome = catch_unwind(AssertUnwindSafe(|| match route {
                Route::Native(handler) => handler.handle(&routed.payload),
                Route::Script(closure) => self.runtime.invoke(self, closure, &routed.payload),
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failed += 1;
                    warn!(label = %routed.label, ?route, error = %err, "handler failed");
                }
                Err(panic) => {
                    failed += 1;
                    error!(
                        label = %routed.label,
                        ?route,
                        panic = panic_message(panic.as_ref()),
                        "handler panicked"
                    );
                }
            }
        }

        Dispatch::Delivered {
            invoked: routes.len(),
            failed,
        }
    }

    fn run(connection: &Connection, router: &Weak<Self>) {
        debug!(peer = connection.peer(), "router started");
        loop {
            match connection.take() {
                Ok(message) => {
                    let Some(router) = router.upgrade() else {
                        break;
                    };
                    router.dispatch(message);
                }
                Err(PeerError::Cancelled) => break,
                Err(err) => {
                    error!(peer = connection.peer(), error = %err, "router stopped");
                    break;
                }
            }
        }
        debug!(peer = connection.peer(), "router finished");
    }
}

/// Dropping the last handle interrupts the connection, which ends the
/// dispatch thread.
impl<S: ScriptRuntime> Drop for Router<S> {
    fn drop(&mut self) {
        self.connection.interrupt();
    }
}

impl<S: ScriptRuntime> ScriptHost<S::Closure> for Router<S> {
    fn send(&self, label: &str, payload: Value) -> Result<()> {
        self.connection
            .send(RoutedMessage::new(label, payload))
            .map_err(RouterError::from)
    }

    fn send_value(&self, payload: Value) -> Result<()> {
        self.connection.send(payload).map_err(RouterError::from)
    }

    fn take_timeout(&self, timeout: Duration) -> Result<Message> {
        self.connection
            .take_timeout(timeout)
            .map_err(RouterError::from)
    }

    fn try_take(&self) -> Option<Message> {
        self.connection.try_take()
    }

    fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().map_err(RouterError::from)
    }

    fn register_script(&self, label: &str, closure: S::Closure) {
        lock(&self.registry).register_script(label, closure);
    }

    fn unregister_script(&self, label: &str, closure: &S::Closure) -> bool {
        lock(&self.registry).unregister_script(label, closure)
    }
}

impl<S: ScriptRuntime> std::fmt::Debug for Router<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("connection", &self.connection)
            .field("labels", &self.labels())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic>"
    }
}
