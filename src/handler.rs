//! Server extension points.
//!
//! A [`Server`](crate::server::Server) is configured with a [`Handler`].
//! Every method has a default, so an implementation only overrides what it
//! needs:
//!
//! | method    | called                                   | default                    |
//! |-----------|------------------------------------------|----------------------------|
//! | `setup`   | once, when the server is constructed     | nothing                    |
//! | `who`     | for a `who` request                      | `Test QNet Server`         |
//! | `motd`    | for a `motd` request                     | `This is the MOTD.`        |
//! | `handle`  | for every other request                  | log, `shutdown` stops, `OK`|
//! | `bad`     | when a request frame cannot be decoded   | log a warning              |

use bytes::Bytes;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Default `who` response.
pub const DEFAULT_WHO: &str = "Test QNet Server";

/// Default `motd` response.
pub const DEFAULT_MOTD: &str = "This is the MOTD.";

/// Default `handle` response.
pub const DEFAULT_ACK: &str = "OK";

/// Payload that makes the default handler stop the server.
pub const SHUTDOWN_COMMAND: &[u8] = b"shutdown";

/// Error returned by [`Handler::handle`].
///
/// The server logs it and closes the connection without responding.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Server state a handler is allowed to change.
#[derive(Debug, Default)]
pub struct ServerControl {
    shutdown_pending: bool,
}

impl ServerControl {
    /// Stop accepting connections once the current one is finished.
    pub fn set_shutdown_pending(&mut self) {
        self.shutdown_pending = true;
    }

    pub fn is_shutdown_pending(&self) -> bool {
        self.shutdown_pending
    }
}

/// Request handling and lifecycle hooks for a QNet server.
pub trait Handler {
    /// One-time initialization, run when the server is constructed.
    fn setup(&mut self) {}

    /// Response to the built-in `who` request.
    fn who(&self) -> Bytes {
        Bytes::from_static(DEFAULT_WHO.as_bytes())
    }

    /// Response to the built-in `motd` request.
    fn motd(&self) -> Bytes {
        Bytes::from_static(DEFAULT_MOTD.as_bytes())
    }

    /// Produce the response to a request that is not a built-in command.
    ///
    /// `peer` is the client's address and port. Call
    /// [`ServerControl::set_shutdown_pending`] to stop the server after this
    /// response has been sent.
    fn handle(
        &mut self,
        request: Bytes,
        peer: SocketAddr,
        control: &mut ServerControl,
    ) -> Result<Bytes, HandlerError> {
        Ok(default_handle(&request, peer, control))
    }

    /// Called with the bytes collected from a peer whose request could not
    /// be decoded. No response is ever sent for these.
    fn bad(&mut self, raw: Bytes, peer: SocketAddr) {
        warn!(peer = %peer, len = raw.len(), "Received bad packet");
    }
}

/// The stock `handle` behavior, usable from custom handlers that only want
/// to add to it.
pub fn default_handle(request: &[u8], peer: SocketAddr, control: &mut ServerControl) -> Bytes {
    info!(peer = %peer, payload = %String::from_utf8_lossy(request), "Received");

    if request == SHUTDOWN_COMMAND {
        control.set_shutdown_pending();
        info!("Shutting down soon");
    }

    Bytes::from_static(DEFAULT_ACK.as_bytes())
}

/// Handler with a configurable name and MOTD and default behavior otherwise.
#[derive(Debug, Clone)]
pub struct DefaultHandler {
    name: Bytes,
    motd: Bytes,
}

impl DefaultHandler {
    pub fn new(name: impl Into<Bytes>, motd: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            motd: motd.into(),
        }
    }
}

impl Default for DefaultHandler {
    fn default() -> Self {
        Self::new(DEFAULT_WHO, DEFAULT_MOTD)
    }
}

impl Handler for DefaultHandler {
    fn who(&self) -> Bytes {
        self.name.clone()
    }

    fn motd(&self) -> Bytes {
        self.motd.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    impl Handler for Bare {}

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn test_trait_defaults() {
        let mut handler = Bare;
        let mut control = ServerControl::default();

        assert_eq!(&handler.who()[..], b"Test QNet Server");
        assert_eq!(&handler.motd()[..], b"This is the MOTD.");

        let response = handler
            .handle(Bytes::from_static(b"ping"), peer(), &mut control)
            .unwrap();
        assert_eq!(&response[..], b"OK");
        assert!(!control.is_shutdown_pending());
    }

    #[test]
    fn test_default_handle_shutdown() {
        let mut control = ServerControl::default();
        let response = default_handle(b"shutdown", peer(), &mut control);
        assert_eq!(&response[..], b"OK");
        assert!(control.is_shutdown_pending());
    }

    #[test]
    fn test_shutdown_is_case_sensitive() {
        let mut control = ServerControl::default();
        default_handle(b"SHUTDOWN", peer(), &mut control);
        default_handle(b"shutdown ", peer(), &mut control);
        assert!(!control.is_shutdown_pending());
    }

    #[test]
    fn test_default_handler_names() {
        let handler = DefaultHandler::new("TestServer", "Hello");
        assert_eq!(&handler.who()[..], b"TestServer");
        assert_eq!(&handler.motd()[..], b"Hello");

        let handler = DefaultHandler::default();
        assert_eq!(&handler.who()[..], DEFAULT_WHO.as_bytes());
    }
}
