//! Label-based dispatch for pairwire connections.
//!
//! A [`Router`] drains one connection's queue on its own thread and fans each
//! routed message out to every handler registered for its label: native
//! handlers first, then script closures, each in registration order.

pub mod error;
pub mod handler;
pub mod registry;
pub mod router;

pub use error::{HandlerError, Result, RouterError};
pub use handler::{handler_fn, NativeHandler, NoClosure, NoScripts, ScriptHost, ScriptRuntime};
pub use registry::{Registry, Route};
pub use router::{Dispatch, Router};
