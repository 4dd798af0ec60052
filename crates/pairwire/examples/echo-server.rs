//! Minimal echo server: every routed message is sent back on its label.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send tcp://127.0.0.1:7700 \
//!     --label greet --json '{"hello":"world"}' --wait

use std::sync::{Arc, Weak};

use pairwire::peer::{Endpoint, Listener};
use pairwire::router::Router;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoint: Endpoint = "tcp://127.0.0.1:7700".parse()?;
    let listener = Listener::bind(&endpoint)?;
    eprintln!("Listening on {}", listener.local_endpoint());

    let mut routers = Vec::new();
    listener.run(|session| {
        routers.retain(|router: &Arc<Router>| !router.connection().is_drained());
        eprintln!("Session {:?} from {}", session.id(), session.peer());
        let router = Arc::new(Router::new(session));
        for label in ["greet", "ping"] {
            let weak: Weak<Router> = Arc::downgrade(&router);
            router.register_fn(label, move |payload| {
                if let Some(router) = weak.upgrade() {
                    router.send(label, payload.clone())?;
                }
                Ok(())
            });
        }
        match router.start() {
            Ok(()) => routers.push(router),
            Err(err) => eprintln!("router failed to start: {err}"),
        }
    })?;
    Ok(())
}
