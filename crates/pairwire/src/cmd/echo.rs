use std::sync::Arc;

use pairwire_peer::Connection;
use pairwire_router::Router;

use crate::cmd::{bind_listener, EchoArgs};
use crate::exit::{io_error, peer_error, router_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let listener = bind_listener(&args.endpoint, &args.session_timeout)?;

    // Dropping a router closes its session.
    let mut routers: Vec<Arc<Router>> = Vec::new();
    listener
        .run(|session| {
            routers.retain(|router| !router.connection().is_drained());
            let id = session.id();
            let started = match &args.labels {
                Some(labels) => route_echo(session, labels).map(|router| routers.push(router)),
                None => spawn_echo(session),
            };
            if let Err(err) = started {
                tracing::warn!(session = ?id, error = %err, "echo session not started");
            }
        })
        .map_err(|err| peer_error("accept loop failed", err))?;

    Ok(SUCCESS)
}

/// Echo only the given labels, through a router.
fn route_echo(session: Arc<Connection>, labels: &[String]) -> CliResult<Arc<Router>> {
    let router = Arc::new(Router::new(session));
    for label in labels {
        let weak = Arc::downgrade(&router);
        let reply_label = label.clone();
        router.register_fn(label.clone(), move |payload| {
            if let Some(router) = weak.upgrade() {
                tracing::info!(label = %reply_label, "echoing routed message");
                router.send(reply_label.as_str(), payload.clone())?;
            }
            Ok(())
        });
    }
    router
        .start()
        .map_err(|err| router_error("router start failed", err))?;
    Ok(router)
}

/// Echo every message, plain or routed.
fn spawn_echo(session: Arc<Connection>) -> CliResult<()> {
    let name = format!("pairwire-echo-{}", session.id().unwrap_or_default());
    std::thread::Builder::new()
        .name(name)
        .spawn(move || echo_loop(&session))
        .map(|_| ())
        .map_err(|err| io_error("echo thread failed", err))
}

fn echo_loop(session: &Connection) {
    while let Ok(message) = session.take() {
        tracing::info!(
            session = ?session.id(),
            kind = message.kind(),
            label = message.label(),
            "echoing message"
        );
        if let Err(err) = session.send(message) {
            tracing::warn!(session = ?session.id(), error = %err, "echo send failed");
            break;
        }
    }
}
