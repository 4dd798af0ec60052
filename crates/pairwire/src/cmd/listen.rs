use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use pairwire_frame::Message;
use pairwire_peer::Connection;

use crate::cmd::{bind_listener, ListenArgs};
use crate::exit::{io_error, peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

type Received = (Arc<Connection>, Message);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = bind_listener(&args.endpoint, &args.session_timeout)?;
    let (tx, rx) = mpsc::channel::<Received>();

    let accept = {
        let listener = Arc::clone(&listener);
        thread::Builder::new()
            .name("pairwire-accept".to_string())
            .spawn(move || {
                listener.run(move |session| {
                    let tx = tx.clone();
                    let name = format!("pairwire-listen-{}", session.id().unwrap_or_default());
                    if let Err(err) = thread::Builder::new()
                        .name(name)
                        .spawn(move || forward(session, tx))
                    {
                        tracing::warn!(error = %err, "session reader not started");
                    }
                })
            })
            .map_err(|err| io_error("accept thread failed", err))?
    };

    let mut printed = 0usize;
    for (session, message) in rx {
        print_message(&message, session.id(), session.peer(), format);
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            listener.stop();
            break;
        }
    }

    match accept.join() {
        Ok(result) => result.map_err(|err| peer_error("accept loop failed", err))?,
        Err(_) => return Err(CliError::new(INTERNAL, "accept thread panicked")),
    }
    Ok(SUCCESS)
}

fn forward(session: Arc<Connection>, tx: Sender<Received>) {
    while let Ok(message) = session.take() {
        if tx.send((Arc::clone(&session), message)).is_err() {
            break;
        }
    }
}
