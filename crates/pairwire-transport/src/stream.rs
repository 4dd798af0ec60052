use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected stream socket. Implements Read + Write.
///
/// This is the fundamental I/O type returned by connect and accept.
/// It wraps either a TCP stream or, on Unix, a Unix domain socket stream.
pub struct Stream {
    inner: StreamInner,
}

enum StreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            StreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: StreamInner::Tcp(stream),
        }
    }
}

#[cfg(unix)]
impl From<std::os::unix::net::UnixStream> for Stream {
    fn from(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: StreamInner::Unix(stream),
        }
    }
}

impl Stream {
    /// Set read timeout on the underlying stream.
    ///
    /// A read that stalls past the timeout fails with `WouldBlock`/`TimedOut`.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            StreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            StreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Switch between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match &self.inner {
            StreamInner::Tcp(stream) => stream.set_nonblocking(nonblocking).map_err(Into::into),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.set_nonblocking(nonblocking).map_err(Into::into),
        }
    }

    /// Disable Nagle's algorithm on TCP streams. No-op for Unix sockets.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        match &self.inner {
            StreamInner::Tcp(stream) => stream.set_nodelay(nodelay).map_err(Into::into),
            #[cfg(unix)]
            StreamInner::Unix(_) => Ok(()),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            StreamInner::Tcp(stream) => Ok(Self::from(stream.try_clone()?)),
            #[cfg(unix)]
            StreamInner::Unix(stream) => Ok(Self::from(stream.try_clone()?)),
        }
    }

    /// Shut down both halves of the socket.
    ///
    /// Any thread blocked reading from a clone of this stream observes EOF.
    /// Shutting down an already disconnected socket is not an error.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            StreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Human-readable description of the remote end, for logs.
    pub fn peer_label(&self) -> String {
        match &self.inner {
            StreamInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| format!("tcp://{addr}"))
                .unwrap_or_else(|_| "tcp://<unknown>".to_string()),
            #[cfg(unix)]
            StreamInner::Unix(stream) => match stream.peer_addr() {
                Ok(addr) => match addr.as_pathname() {
                    Some(path) => format!("unix:{}", path.display()),
                    None => "unix:<unnamed>".to_string(),
                },
                Err(_) => "unix:<unknown>".to_string(),
            },
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            StreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            StreamInner::Unix(_) => "unix-domain-socket",
        }
    }

    /// Get the credentials of a Unix-socket peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` for TCP peers
    /// and when unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            StreamInner::Unix(stream) => stream.as_raw_fd(),
            StreamInner::Tcp(_) => return None,
        };

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("type", &self.transport_name())
            .field("peer", &self.peer_label())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn shutdown_unblocks_reader_clone() {
        let (left, _right) = UnixStream::pair().unwrap();
        let stream = Stream::from(left);
        let mut reader = stream.try_clone().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf).unwrap()
        });

        std::thread::sleep(Duration::from_millis(20));
        stream.shutdown().unwrap();
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn shutdown_twice_is_ok() {
        let (left, _right) = UnixStream::pair().unwrap();
        let stream = Stream::from(left);
        stream.shutdown().unwrap();
        stream.shutdown().unwrap();
    }

    #[test]
    fn tcp_stream_roundtrip_and_label() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let (mut server, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            server.read_exact(&mut buf).unwrap();
            buf
        });

        let mut client = Stream::from(TcpStream::connect(addr).unwrap());
        assert_eq!(client.transport_name(), "tcp");
        assert_eq!(client.peer_label(), format!("tcp://{addr}"));
        assert!(client.peer_credentials().is_none());
        client.write_all(b"ping").unwrap();

        assert_eq!(&handle.join().unwrap(), b"ping");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn unix_peer_credentials_report_current_process() {
        let (left, _right) = UnixStream::pair().unwrap();
        let stream = Stream::from(left);
        let (_, _, pid) = stream.peer_credentials().expect("credentials on linux");
        assert_eq!(pid, std::process::id());
    }
}
