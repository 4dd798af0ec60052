use pairwire_transport::Endpoint;

use crate::connection::{Connection, ConnectionConfig};
use crate::error::Result;
use crate::handshake::Role;

/// Connect to a listening endpoint as the initiating side.
pub fn connect(endpoint: &Endpoint) -> Result<Connection> {
    connect_with_config(endpoint, ConnectionConfig::default())
}

/// Connect with explicit configuration.
///
/// Returns once the marker exchange has succeeded and the receive thread
/// is running.
pub fn connect_with_config(endpoint: &Endpoint, config: ConnectionConfig) -> Result<Connection> {
    let stream = endpoint.connect()?;
    tracing::debug!(%endpoint, transport = stream.transport_name(), "connected");
    Connection::establish(stream, Role::Initiator, config)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::error::PeerError;
    use crate::listener::Listener;
    use crate::Message;

    #[test]
    fn connect_convenience() {
        let endpoint: Endpoint = "tcp://127.0.0.1:0".parse().unwrap();
        let listener = Listener::bind(&endpoint).unwrap();
        let bound = listener.local_endpoint().clone();

        let server = thread::spawn(move || {
            let session = listener.accept_session().unwrap().unwrap();
            let message = session.take_timeout(Duration::from_secs(5)).unwrap();
            session.send(message).unwrap();
            session.wait();
        });

        let conn = connect(&bound).unwrap();
        assert_eq!(conn.id(), None);
        conn.send(json!({"hello": "world"})).unwrap();
        assert_eq!(
            conn.take_timeout(Duration::from_secs(5)).unwrap(),
            Message::value(json!({"hello": "world"}))
        );
        conn.disconnect().unwrap();
        conn.wait();
        server.join().unwrap();
    }

    #[test]
    fn connect_refused_is_transport_error() {
        // Bind then drop to find a port with nothing listening.
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let endpoint: Endpoint = format!("127.0.0.1:{port}").parse().unwrap();
        assert!(matches!(
            connect(&endpoint),
            Err(PeerError::Transport(_))
        ));
    }
}
