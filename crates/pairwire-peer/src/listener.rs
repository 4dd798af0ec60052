use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pairwire_transport::{Acceptor, Endpoint, Stream};
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionConfig};
use crate::error::{PeerError, Result};
use crate::handshake::Role;
use crate::sync::lock;

/// Live sessions by id.
pub(crate) type SessionTable = Mutex<HashMap<u64, Arc<Connection>>>;

/// Listener tuning.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Settings for each accepted session. Its `read_timeout` is replaced by
    /// `session_read_timeout`.
    pub connection: ConnectionConfig,
    /// Idle bound on session reads. A session silent for this long closes.
    pub session_read_timeout: Option<Duration>,
    /// How often the accept loop re-checks for new connections and for stop.
    pub accept_poll_interval: Duration,
    /// File mode for Unix socket endpoints.
    pub socket_mode: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            session_read_timeout: Some(Duration::from_secs(30)),
            accept_poll_interval: Duration::from_millis(25),
            socket_mode: 0o600,
        }
    }
}

impl ListenerConfig {
    pub fn with_connection(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    pub fn with_session_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_read_timeout = timeout;
        self
    }

    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }

    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    fn session_config(&self) -> ConnectionConfig {
        self.connection
            .clone()
            .with_read_timeout(self.session_read_timeout)
    }
}

/// Accepts sessions on one endpoint and tracks the live ones.
///
/// Session ids start at 1, strictly increase, and are consumed only by
/// sessions whose handshake succeeded. A session leaves the live table once
/// its socket has closed and its queue has been drained.
pub struct Listener {
    acceptor: Mutex<Option<Acceptor>>,
    endpoint: Endpoint,
    sessions: Arc<SessionTable>,
    next_session_id: AtomicU64,
    running: AtomicBool,
    config: ListenerConfig,
}

impl Listener {
    /// Bind to `endpoint` with default configuration.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        Self::bind_with_config(endpoint, ListenerConfig::default())
    }

    pub fn bind_with_config(endpoint: &Endpoint, config: ListenerConfig) -> Result<Self> {
        let acceptor = Acceptor::bind_with_mode(endpoint, config.socket_mode)?;
        acceptor.set_nonblocking(true)?;
        let endpoint = acceptor.local_endpoint();
        info!(%endpoint, transport = acceptor.transport_name(), "listening");

        Ok(Self {
            acceptor: Mutex::new(Some(acceptor)),
            endpoint,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_session_id: AtomicU64::new(1),
            running: AtomicBool::new(true),
            config,
        })
    }

    /// The endpoint actually bound (TCP port 0 resolved).
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Accept sessions until [`Listener::stop`] is called.
    ///
    /// `on_session` runs on this thread for each handshaken session, after
    /// the session is live and its receive thread has started. A connection
    /// whose handshake fails is logged and dropped; the loop continues.
    pub fn run<F>(&self, mut on_session: F) -> Result<()>
    where
        F: FnMut(Arc<Connection>),
    {
        while self.is_running() {
            match self.accept_session() {
                Ok(Some(session)) if self.is_running() => on_session(session),
                Ok(_) => break,
                Err(err @ PeerError::Transport(_)) if !self.is_running() => {
                    debug!(error = %err, "accept interrupted by stop");
                    break;
                }
                Err(err) => warn!(endpoint = %self.endpoint, error = %err, "session rejected"),
            }
        }
        debug!(endpoint = %self.endpoint, "accept loop finished");
        Ok(())
    }

    /// Wait for the next connection and bring it up as a live session.
    ///
    /// Returns `Ok(None)` once the listener has been stopped.
    pub fn accept_session(&self) -> Result<Option<Arc<Connection>>> {
        loop {
            let accepted = {
                let acceptor = lock(&self.acceptor);
                match acceptor.as_ref() {
                    Some(acceptor) if self.is_running() => acceptor.try_accept(),
                    _ => return Ok(None),
                }
            };
            match accepted {
                Ok(Some(stream)) => return self.establish_session(stream),
                Ok(None) => std::thread::sleep(self.config.accept_poll_interval),
                Err(err) => {
                    if !self.is_running() {
                        return Ok(None);
                    }
                    error!(endpoint = %self.endpoint, error = %err, "accept failed");
                    std::thread::sleep(self.config.accept_poll_interval);
                }
            }
        }
    }

    /// Handshake, then admit the session unless the listener was stopped
    /// meanwhile. Admission holds the table lock so it is ordered against
    /// [`Listener::stop`] draining the table.
    fn establish_session(&self, stream: Stream) -> Result<Option<Arc<Connection>>> {
        let credentials = stream.peer_credentials();
        let session = Arc::new(Connection::open(
            stream,
            Role::Acceptor,
            self.config.session_config(),
        ));
        session.handshake()?;

        let id = {
            let mut sessions = lock(&self.sessions);
            if !self.is_running() {
                drop(sessions);
                debug!(peer = session.peer(), "listener stopped during handshake; session dropped");
                session.interrupt();
                return Ok(None);
            }
            let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
            session.attach_session(id, Arc::downgrade(&self.sessions));
            session.start()?;
            sessions.insert(id, Arc::clone(&session));
            id
        };

        match credentials {
            Some((uid, gid, pid)) => {
                info!(session = id, peer = session.peer(), uid, gid, pid, "session opened")
            }
            None => info!(session = id, peer = session.peer(), "session opened"),
        }
        Ok(Some(session))
    }

    /// Look up a live session.
    pub fn lookup(&self, id: u64) -> Result<Arc<Connection>> {
        lock(&self.sessions)
            .get(&id)
            .cloned()
            .ok_or(PeerError::NotFound(id))
    }

    /// Ids of the live sessions, ascending.
    pub fn session_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = lock(&self.sessions).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Stop accepting, interrupt every live session and close the socket.
    ///
    /// Safe to call more than once and from any thread.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        drop(lock(&self.acceptor).take());

        let sessions: Vec<Arc<Connection>> = lock(&self.sessions)
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in &sessions {
            session.interrupt();
        }
        if was_running {
            info!(
                endpoint = %self.endpoint,
                interrupted = sessions.len(),
                "listener stopped"
            );
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("endpoint", &self.endpoint)
            .field("running", &self.is_running())
            .field("sessions", &self.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::thread;
    use std::time::Instant;

    use serde_json::json;

    use super::*;
    use crate::connection::ConnectionState;
    use crate::connector::connect;
    use crate::Message;

    fn tcp_listener() -> Arc<Listener> {
        let endpoint: Endpoint = "127.0.0.1:0".parse().unwrap();
        Arc::new(Listener::bind(&endpoint).unwrap())
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[cfg(unix)]
    fn make_sock_path(tag: &str) -> std::path::PathBuf {
        let dir = std::path::PathBuf::from(format!(
            "/tmp/pw-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("listener.sock")
    }

    #[test]
    fn session_ids_increase_from_one() {
        let listener = tcp_listener();
        let endpoint = listener.local_endpoint().clone();

        let accepting = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..3 {
                    ids.push(listener.accept_session().unwrap().unwrap().id().unwrap());
                }
                ids
            })
        };

        let clients: Vec<_> = (0..3).map(|_| connect(&endpoint).unwrap()).collect();
        assert_eq!(accepting.join().unwrap(), vec![1, 2, 3]);
        assert_eq!(listener.session_ids(), vec![1, 2, 3]);
        assert_eq!(listener.session_count(), 3);
        drop(clients);
    }

    #[test]
    fn failed_handshake_consumes_no_id() {
        let listener = tcp_listener();
        let endpoint = listener.local_endpoint().clone();

        let running = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || {
                let mut seen = Vec::new();
                listener
                    .run(|session| seen.push(session.id().unwrap()))
                    .unwrap();
                seen
            })
        };

        // Pretend to be a second server.
        let Endpoint::Tcp(addr) = &endpoint else {
            unreachable!()
        };
        let mut impostor = std::net::TcpStream::connect(addr).unwrap();
        impostor.write_all(b"S").unwrap();
        let mut reply = [0u8; 1];
        impostor.read_exact(&mut reply).unwrap();
        assert_eq!(reply[0], b'S');

        let good = connect(&endpoint).unwrap();
        wait_for(|| listener.session_count() == 1);
        assert_eq!(listener.session_ids(), vec![1]);

        listener.stop();
        assert_eq!(running.join().unwrap(), vec![1]);
        good.wait();
        assert!(!good.is_active());
    }

    #[test]
    fn stop_during_handshake_admits_nothing() {
        let listener = tcp_listener();
        let Endpoint::Tcp(addr) = listener.local_endpoint().clone() else {
            unreachable!()
        };
        let running = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || {
                let mut admitted = 0usize;
                listener.run(|_| admitted += 1).unwrap();
                admitted
            })
        };

        let mut raw = std::net::TcpStream::connect(addr).unwrap();
        let mut marker = [0u8; 1];
        raw.read_exact(&mut marker).unwrap();
        assert_eq!(marker[0], b'S');

        // The acceptor is now waiting for our marker.
        listener.stop();
        raw.write_all(b"C").unwrap();

        assert_eq!(running.join().unwrap(), 0);
        assert_eq!(listener.session_count(), 0);
        assert!(listener.session_ids().is_empty());

        raw.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut rest = Vec::new();
        assert_eq!(raw.read_to_end(&mut rest).unwrap(), 0);
    }

    #[test]
    fn lookup_finds_live_session_and_rejects_unknown() {
        let listener = tcp_listener();
        let endpoint = listener.local_endpoint().clone();
        let accepting = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.accept_session().unwrap().unwrap())
        };
        let client = connect(&endpoint).unwrap();
        let session = accepting.join().unwrap();

        let found = listener.lookup(1).unwrap();
        assert!(Arc::ptr_eq(&found, &session));
        assert!(matches!(listener.lookup(42), Err(PeerError::NotFound(42))));

        client.send_routed("echo", json!("hi")).unwrap();
        assert_eq!(
            found.take_timeout(Duration::from_secs(5)).unwrap(),
            Message::routed("echo", json!("hi"))
        );
    }

    #[test]
    fn drained_session_is_reaped() {
        let listener = tcp_listener();
        let endpoint = listener.local_endpoint().clone();
        let accepting = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.accept_session().unwrap().unwrap())
        };
        let client = connect(&endpoint).unwrap();
        let session = accepting.join().unwrap();

        client.send(json!("pending")).unwrap();
        client.disconnect().unwrap();
        session.wait();

        // Still buffered, so still live.
        assert_eq!(session.state(), ConnectionState::Draining);
        assert!(listener.lookup(1).is_ok());

        assert_eq!(session.take().unwrap(), Message::value(json!("pending")));
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(matches!(listener.lookup(1), Err(PeerError::NotFound(1))));
        assert_eq!(listener.session_count(), 0);
    }

    #[test]
    fn idle_session_times_out() {
        let endpoint: Endpoint = "127.0.0.1:0".parse().unwrap();
        let config =
            ListenerConfig::default().with_session_read_timeout(Some(Duration::from_millis(100)));
        let listener = Arc::new(Listener::bind_with_config(&endpoint, config).unwrap());
        let bound = listener.local_endpoint().clone();
        let accepting = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.accept_session().unwrap().unwrap())
        };
        let client = connect(&bound).unwrap();
        let session = accepting.join().unwrap();

        session.wait();
        assert_eq!(session.state(), ConnectionState::Closed);
        client.wait();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(listener.session_count(), 0);
    }

    #[test]
    fn stop_interrupts_sessions_and_is_idempotent() {
        let listener = tcp_listener();
        let endpoint = listener.local_endpoint().clone();
        let running = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.run(|_| {}))
        };

        let a = connect(&endpoint).unwrap();
        let b = connect(&endpoint).unwrap();
        wait_for(|| listener.session_count() == 2);

        listener.stop();
        listener.stop();
        running.join().unwrap().unwrap();

        a.wait();
        b.wait();
        assert_eq!(a.state(), ConnectionState::Closed);
        assert_eq!(b.state(), ConnectionState::Closed);
        assert_eq!(listener.session_count(), 0);
        assert!(!listener.is_running());
        assert!(listener.accept_session().unwrap().is_none());
        assert!(connect(&endpoint).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn unix_endpoint_sessions() {
        let path = make_sock_path("unix-sessions");
        let endpoint = Endpoint::Unix(path.clone());
        let listener = Arc::new(Listener::bind(&endpoint).unwrap());
        let accepting = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.accept_session().unwrap().unwrap())
        };
        let client = connect(&endpoint).unwrap();
        let session = accepting.join().unwrap();

        session.send(json!([1, 2, 3])).unwrap();
        assert_eq!(
            client.take_timeout(Duration::from_secs(5)).unwrap(),
            Message::value(json!([1, 2, 3]))
        );

        listener.stop();
        drop(listener);
        assert!(!path.exists());
    }
}
