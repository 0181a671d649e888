use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use amp_transport::TcpTransport;

use crate::connection::Connection;
use crate::error::Result;
use crate::host::Host;

/// Accepts client connections for a [`Host`].
pub struct HostListener {
    transport: TcpTransport,
    host: Arc<Host>,
    next_conn_id: AtomicU64,
}

impl HostListener {
    /// Bind a TCP listener serving `host`.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug, host: Arc<Host>) -> Result<Self> {
        let transport = TcpTransport::bind(addr)?;
        tracing::info!(addr = %transport.local_addr(), "host listening");
        Ok(Self {
            transport,
            host,
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Accept the next connection. Login happens in [`Connection::serve`].
    pub fn accept(&self) -> Result<Connection> {
        let stream = self.transport.accept()?;
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let conn = Connection::new(Arc::clone(&self.host), stream);
        tracing::info!(conn = id, peer = conn.peer(), "accepted connection");
        Ok(conn)
    }

    /// Serve connections, one thread each, until the host shuts down.
    pub fn run(&self) -> Result<()> {
        loop {
            let conn = match self.accept() {
                Ok(conn) => conn,
                Err(err) if self.host.is_shutting_down() => {
                    tracing::debug!(error = %err, "accept after shutdown");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };
            if self.host.is_shutting_down() {
                return Ok(());
            }

            let peer = conn.peer().to_string();
            let spawned = thread::Builder::new()
                .name(format!("amp-conn-{peer}"))
                .spawn(move || {
                    if let Err(err) = conn.serve() {
                        tracing::warn!(%peer, code = %err.code(), error = %err, "connection ended");
                    }
                });
            if let Err(err) = spawned {
                tracing::error!(error = %err, "failed to spawn connection thread");
            }
        }
    }

    /// Handle that shuts the host down and unblocks [`HostListener::run`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            host: Arc::clone(&self.host),
            addr: self.local_addr(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }
}

impl std::fmt::Debug for HostListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostListener")
            .field("addr", &self.local_addr())
            .finish()
    }
}

/// Cloneable trigger for a graceful stop, safe to move into a signal handler.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    host: Arc<Host>,
    addr: SocketAddr,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.host.shutdown();
        // Wake the blocking accept so the run loop sees the flag.
        let mut addr = self.addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr {
                SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(500));
    }
}
