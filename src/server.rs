//! QNet server.
//!
//! The server is single-threaded and fully blocking. Each iteration of the
//! accept loop handles exactly one connection from start to finish:
//!
//! 1. accept
//! 2. decode one request frame
//! 3. dispatch (`is_q`, `who`, `motd`, otherwise [`Handler::handle`])
//! 4. send one response frame
//! 5. close
//!
//! A request that cannot be decoded goes to [`Handler::bad`] and gets no
//! response. The shutdown-pending flag is only looked at before the next
//! accept, so it never cuts a conversation short.

use crate::frame::FrameCodec;
use crate::handler::{Handler, ServerControl};
use crate::net;
use bytes::{Bytes, BytesMut};
use socket2::SockRef;
use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default listen backlog.
pub const DEFAULT_QUEUE_SIZE: u32 = 5;

/// Most bytes salvaged from a peer after a failed decode.
const SALVAGE_LIMIT: usize = 4096;

/// How long to wait for leftover bytes from a misbehaving peer.
const SALVAGE_TIMEOUT: Duration = Duration::from_millis(50);

/// Pause after a failed accept so persistent errors (e.g. EMFILE) don't spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Construction parameters for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Hostname or IP address to bind to.
    pub address: String,
    pub port: u16,
    /// Trim leading/trailing whitespace from requests before `handle`.
    pub auto_strip: bool,
    /// Pending connections the kernel holds while the server is busy.
    pub queue_size: u32,
    pub codec: FrameCodec,
}

impl ServerOptions {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            auto_strip: false,
            queue_size: DEFAULT_QUEUE_SIZE,
            codec: FrameCodec::default(),
        }
    }

    pub fn auto_strip(mut self, auto_strip: bool) -> Self {
        self.auto_strip = auto_strip;
        self
    }

    pub fn queue_size(mut self, queue_size: u32) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }
}

/// Serial, one-conversation-per-connection QNet server.
pub struct Server<H> {
    options: ServerOptions,
    handler: H,
    control: ServerControl,
}

impl<H: Handler> Server<H> {
    /// Create a server. Runs [`Handler::setup`] before returning.
    pub fn new(options: ServerOptions, mut handler: H) -> Self {
        handler.setup();

        Self {
            options,
            handler,
            control: ServerControl::default(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn is_shutdown_pending(&self) -> bool {
        self.control.is_shutdown_pending()
    }

    /// Stop after the connection currently being handled, if any.
    pub fn set_shutdown_pending(&mut self) {
        self.control.set_shutdown_pending();
    }

    /// Bind the configured address with the configured backlog.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr = net::resolve(&self.options.address, self.options.port)?;
        net::bind_listener(addr, self.options.queue_size)
    }

    /// Bind and serve until shutdown is requested.
    pub fn serve(&mut self) -> io::Result<()> {
        let listener = self.bind()?;
        self.serve_on(listener)
    }

    /// Serve on an already-bound listener until shutdown is requested.
    ///
    /// The listener is shut down and closed before this returns.
    pub fn serve_on(&mut self, listener: TcpListener) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(address = %local, "Serving");

        while !self.control.is_shutdown_pending() {
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    thread::sleep(ACCEPT_BACKOFF);
                    continue;
                }
            };

            debug!(peer = %peer, "New connection");
            self.converse(stream, peer);
            debug!(peer = %peer, "Connection closed");
        }

        info!(address = %local, "Shutting down");

        // Not every platform allows shutdown on a listening socket.
        if let Err(e) = SockRef::from(&listener).shutdown(Shutdown::Both) {
            debug!(error = %e, "Listener shutdown");
        }
        drop(listener);

        Ok(())
    }

    /// Run one conversation. The stream is closed when this returns.
    fn converse(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        let mut raw = BytesMut::new();
        let request = match self.options.codec.decode_into(&mut stream, &mut raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Malformed packet");
                salvage(&mut stream, &mut raw);
                self.handler.bad(raw.freeze(), peer);
                return;
            }
        };

        let Some(response) = self.dispatch(request, peer) else {
            return;
        };

        if let Err(e) = self.options.codec.send(&mut stream, &response) {
            warn!(peer = %peer, error = %e, "Error sending response");
        }
    }

    /// Pick the response for a decoded request.
    ///
    /// `None` means the handler failed and nothing should be sent.
    fn dispatch(&mut self, request: Bytes, peer: SocketAddr) -> Option<Bytes> {
        match &request[..] {
            b"is_q" => Some(Bytes::from_static(b"yes")),
            b"who" => Some(self.handler.who()),
            b"motd" => Some(self.handler.motd()),
            _ => {
                let request = if self.options.auto_strip {
                    strip(request)
                } else {
                    request
                };

                match self.handler.handle(request, peer, &mut self.control) {
                    Ok(response) => Some(response),
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Handler failed");
                        None
                    }
                }
            }
        }
    }
}

/// Collect what a peer left in the socket after a failed decode.
///
/// Best effort: one bounded read with a short timeout.
fn salvage(stream: &mut TcpStream, raw: &mut BytesMut) {
    if stream.set_read_timeout(Some(SALVAGE_TIMEOUT)).is_err() {
        return;
    }

    let mut buf = [0u8; SALVAGE_LIMIT];
    if let Ok(n) = stream.read(&mut buf) {
        raw.extend_from_slice(&buf[..n]);
    }
}

/// Trim leading and trailing ASCII whitespace without copying.
fn strip(request: Bytes) -> Bytes {
    let start = request
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(request.len());
    let end = request
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    request.slice(start..end)
}
