use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pairwire_frame::Message;
use serde_json::Value;

use crate::error::{HandlerError, Result};

/// A compiled-in handler for routed payloads.
pub trait NativeHandler: Send + Sync {
    fn handle(&self, payload: &Value) -> std::result::Result<(), HandlerError>;
}

impl<F> NativeHandler for F
where
    F: Fn(&Value) -> std::result::Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, payload: &Value) -> std::result::Result<(), HandlerError> {
        self(payload)
    }
}

/// Wrap a closure as a shareable handler. Keep the returned `Arc` to
/// unregister it later.
pub fn handler_fn<F>(f: F) -> Arc<dyn NativeHandler>
where
    F: Fn(&Value) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a script runtime may do with the router while a closure runs.
///
/// The take methods read the same queue the dispatch thread drains, so a
/// message taken here is never dispatched.
pub trait ScriptHost<C> {
    /// Send a routed message on the router's connection.
    fn send(&self, label: &str, payload: Value) -> Result<()>;

    /// Send a plain value.
    fn send_value(&self, payload: Value) -> Result<()>;

    /// Wait up to `timeout` for the next queued message.
    fn take_timeout(&self, timeout: Duration) -> Result<Message>;

    /// Next queued message, if one is already waiting.
    fn try_take(&self) -> Option<Message>;

    /// Ask the peer to close.
    fn disconnect(&self) -> Result<()>;

    fn register_script(&self, label: &str, closure: C);

    fn unregister_script(&self, label: &str, closure: &C) -> bool;
}

/// An embedded interpreter that can run script closures.
///
/// The router treats closures as opaque: it stores them, compares them
/// for unregistration, and hands them back to [`ScriptRuntime::invoke`].
pub trait ScriptRuntime: Send + Sync + 'static {
    type Closure: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Run `closure` with `payload`. `host` exposes the invoking router.
    fn invoke(
        &self,
        host: &dyn ScriptHost<Self::Closure>,
        closure: &Self::Closure,
        payload: &Value,
    ) -> std::result::Result<(), HandlerError>;
}

/// Closure type of [`NoScripts`]. It has no values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoClosure {}

/// Runtime for routers without scripting.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScripts;

impl ScriptRuntime for NoScripts {
    type Closure = NoClosure;

    fn invoke(
        &self,
        _host: &dyn ScriptHost<NoClosure>,
        closure: &NoClosure,
        _payload: &Value,
    ) -> std::result::Result<(), HandlerError> {
        match *closure {}
    }
}
