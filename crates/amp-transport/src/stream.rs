use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected byte stream: implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// Hosts and clients normally hold the TCP variant; the local variant
/// connects two endpoints inside one process.
pub struct AmpStream {
    inner: AmpStreamInner,
}

enum AmpStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Local(std::os::unix::net::UnixStream),
}

impl Read for AmpStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            AmpStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            AmpStreamInner::Local(stream) => stream.read(buf),
        }
    }
}

impl Write for AmpStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            AmpStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            AmpStreamInner::Local(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            AmpStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            AmpStreamInner::Local(stream) => stream.flush(),
        }
    }
}

impl AmpStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: AmpStreamInner::Tcp(stream),
        }
    }

    /// Create two connected in-process endpoints.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((
            Self {
                inner: AmpStreamInner::Local(left),
            },
            Self {
                inner: AmpStreamInner::Local(right),
            },
        ))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            AmpStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            AmpStreamInner::Local(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            AmpStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            AmpStreamInner::Local(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            AmpStreamInner::Tcp(stream) => AmpStreamInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            AmpStreamInner::Local(stream) => AmpStreamInner::Local(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Shut down both directions, unblocking any reader on a clone of this stream.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            AmpStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            AmpStreamInner::Local(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Ok(()) => Ok(()),
            // Already torn down by the peer.
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Remote address, when the stream is a TCP connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            AmpStreamInner::Tcp(stream) => stream.peer_addr().ok(),
            #[cfg(unix)]
            AmpStreamInner::Local(_) => None,
        }
    }

    /// Short carrier name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            AmpStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            AmpStreamInner::Local(_) => "local",
        }
    }
}

impl std::fmt::Debug for AmpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmpStream")
            .field("type", &self.transport_name())
            .field("peer", &self.peer_addr())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn local_pair_roundtrip() {
        let (mut left, mut right) = AmpStream::pair().unwrap();
        left.write_all(b"ping").unwrap();

        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(right.transport_name(), "local");
        assert!(right.peer_addr().is_none());
    }

    #[test]
    fn shutdown_unblocks_cloned_reader() {
        let (left, _right) = AmpStream::pair().unwrap();
        let mut reader = left.try_clone().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).unwrap()
        });

        std::thread::sleep(Duration::from_millis(20));
        left.shutdown().unwrap();
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn debug_names_carrier() {
        let (left, _right) = AmpStream::pair().unwrap();
        let dbg = format!("{left:?}");
        assert!(dbg.contains("local"));
    }
}
