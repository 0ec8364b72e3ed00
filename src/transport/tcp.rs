// TCP Platform Implementation
// Provides the socket primitives of the transport module over std::net TCP streams

use crate::transport::{Platform, PlatformError, SocketHandle, TransportSignals};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// TCP PLATFORM CONFIG
// ============================================================================

/// Configuration for the TCP platform adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpPlatformConfig {
    /// Connect timeout in seconds
    pub connect_timeout_secs: u32,
    /// How long a send may wait on a full socket buffer, in seconds
    pub write_timeout_secs: u32,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
}

impl Default for TcpPlatformConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            write_timeout_secs: 5,
            nodelay: true,
        }
    }
}

impl TcpPlatformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, secs: u32) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_write_timeout(mut self, secs: u32) -> Self {
        self.write_timeout_secs = secs;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

// ============================================================================
// TCP PLATFORM
// ============================================================================

struct TcpSocket {
    stream: TcpStream,
    peer_closed: bool,
}

/// TCP sockets behind the `Platform` trait.
///
/// Reads are non-blocking: a read with nothing available returns 0 bytes.
/// Writes block until the whole buffer is out or the write timeout passes. End of stream raises the
/// socket-closed signal once; OS error numbers are forwarded as platform
/// error codes.
pub struct TcpPlatform {
    config: TcpPlatformConfig,
    sockets: HashMap<SocketHandle, TcpSocket>,
    next_handle: u16,
    signals: Option<TransportSignals>,
    responses: Vec<String>,
}

impl TcpPlatform {
    pub fn new(config: TcpPlatformConfig) -> Self {
        Self {
            config,
            sockets: HashMap::new(),
            next_handle: 0,
            signals: None,
            responses: Vec::new(),
        }
    }

    /// Number of sockets currently open
    pub fn open_sockets(&self) -> usize {
        self.sockets.len()
    }

    /// Status lines emitted for the command layer
    pub fn responses(&self) -> &[String] {
        &self.responses
    }

    fn report(&self, error: &std::io::Error) {
        if let (Some(signals), Some(code)) = (&self.signals, error.raw_os_error()) {
            signals.on_platform_error(code);
        }
    }

    fn connect(&self, address: &str, port: u16) -> Result<TcpStream, std::io::Error> {
        let timeout = Duration::from_secs(u64::from(self.config.connect_timeout_secs.max(1)));
        let mut last_error = None;
        for addr in (address, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            std::io::Error::new(ErrorKind::AddrNotAvailable, "address resolved to nothing")
        }))
    }
}

impl Platform for TcpPlatform {
    fn open_socket(&mut self, address: &str, port: u16) -> Result<SocketHandle, PlatformError> {
        let stream = self.connect(address, port).map_err(|e| {
            self.report(&e);
            PlatformError::from(e)
        })?;
        stream.set_nodelay(self.config.nodelay).ok();
        stream.set_nonblocking(true)?;

        let handle = SocketHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.sockets.insert(
            handle,
            TcpSocket {
                stream,
                peer_closed: false,
            },
        );
        info!(%handle, address, port, "TCP socket connected");
        Ok(handle)
    }

    fn send(&mut self, socket: SocketHandle, data: &[u8]) -> usize {
        let timeout = Duration::from_secs(u64::from(self.config.write_timeout_secs.max(1)));
        let Some(entry) = self.sockets.get_mut(&socket) else {
            return 0;
        };
        let blocking = entry
            .stream
            .set_write_timeout(Some(timeout))
            .and_then(|()| entry.stream.set_nonblocking(false));
        if let Err(e) = blocking {
            warn!(%socket, error = %e, "TCP socket could not switch to blocking writes");
            self.report(&e);
            return 0;
        }

        let mut written = 0;
        let mut failure = None;
        while written < data.len() {
            match entry.stream.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Err(e) = entry.stream.set_nonblocking(true) {
            failure.get_or_insert(e);
        }

        if let Some(e) = failure {
            warn!(%socket, written, error = %e, "TCP write failed");
            self.report(&e);
        }
        written
    }

    fn receive(&mut self, socket: SocketHandle, buffer: &mut [u8]) -> Result<usize, PlatformError> {
        let entry = self
            .sockets
            .get_mut(&socket)
            .ok_or(PlatformError::Code(-1))?;
        if buffer.is_empty() {
            return Ok(0);
        }
        match entry.stream.read(buffer) {
            Ok(0) => {
                if !entry.peer_closed {
                    entry.peer_closed = true;
                    debug!(%socket, "TCP peer closed the stream");
                    if let Some(signals) = &self.signals {
                        signals.on_socket_closed();
                    }
                }
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => {
                warn!(%socket, error = %e, "TCP read failed");
                self.report(&e);
                Err(PlatformError::from(e))
            }
        }
    }

    fn close_socket(&mut self, socket: SocketHandle) -> bool {
        match self.sockets.remove(&socket) {
            Some(entry) => match entry.stream.shutdown(Shutdown::Both) {
                Ok(()) => true,
                Err(e) if e.kind() == ErrorKind::NotConnected => true,
                Err(e) => {
                    warn!(%socket, error = %e, "TCP shutdown failed");
                    self.report(&e);
                    false
                }
            },
            None => false,
        }
    }

    fn subscribe(&mut self, signals: TransportSignals) {
        self.signals = Some(signals);
    }

    fn send_response(&mut self, response: &str) {
        info!(response, "Status");
        self.responses.push(response.to_string());
    }
}
