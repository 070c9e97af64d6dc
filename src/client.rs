//! Client side of a QNet conversation.
//!
//! A [`Connection`] only remembers where the server is. Each call to
//! [`Connection::converse`] opens a fresh TCP connection, sends one request
//! frame, reads one response frame and closes.

use crate::frame::{write_frame, FrameCodec, FrameError};
use bytes::Bytes;
use std::io;
use std::net::{Shutdown, TcpStream};
use tracing::trace;

/// Client-side conversation errors.
#[derive(Debug)]
pub enum ClientError {
    /// Could not open a transport connection to the server.
    ConnectionFailed {
        address: String,
        port: u16,
        source: io::Error,
    },
    /// Request could not be sent or the response could not be decoded.
    Frame(FrameError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::ConnectionFailed {
                address,
                port,
                source,
            } => write!(f, "Failed to connect to {}:{}: {}", address, port, source),
            ClientError::Frame(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::ConnectionFailed { source, .. } => Some(source),
            ClientError::Frame(e) => Some(e),
        }
    }
}

impl From<FrameError> for ClientError {
    fn from(e: FrameError) -> Self {
        ClientError::Frame(e)
    }
}

/// Handle for talking to one QNet server.
///
/// # Example
///
/// ```no_run
/// use qnet::Connection;
///
/// let connection = Connection::new("192.168.1.128", 4099);
/// let name = connection.converse("who")?;
/// # Ok::<(), qnet::ClientError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Connection {
    address: String,
    port: u16,
    codec: FrameCodec,
}

impl Connection {
    /// `address` may be a hostname or a literal IP address.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            codec: FrameCodec::default(),
        }
    }

    /// Use non-default frame limits. The server must use the same ones.
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send one message and return the server's response.
    ///
    /// The transport connection is closed before this returns, whether the
    /// conversation succeeded or not. There is no timeout: a server that
    /// never answers blocks the call.
    pub fn converse(&self, message: impl AsRef<[u8]>) -> Result<Bytes, ClientError> {
        // Oversized messages fail before a connection is opened.
        let frame = self.codec.encode(message.as_ref())?;

        let mut stream = TcpStream::connect((self.address.as_str(), self.port)).map_err(
            |source| ClientError::ConnectionFailed {
                address: self.address.clone(),
                port: self.port,
                source,
            },
        )?;
        trace!(address = %self.address, port = self.port, len = frame.len(), "Sending request");

        write_frame(&mut stream, &frame)?;
        let response = self.codec.decode(&mut stream)?;

        // The stream is dropped (and closed) on every path; this just makes
        // the orderly close explicit.
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            trace!(error = %e, "Connection shutdown");
        }

        trace!(len = response.len(), "Received response");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Accept one connection, decode a request and reply with `reply(request)`.
    fn one_shot_server<F>(reply: F) -> (u16, thread::JoinHandle<Bytes>)
    where
        F: FnOnce(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let codec = FrameCodec::default();
            let request = codec.decode(&mut stream).unwrap();
            stream.write_all(&reply(&request)).unwrap();
            request
        });
        (port, handle)
    }

    #[test]
    fn test_converse() {
        let (port, server) = one_shot_server(|request| {
            let mut response = b"echo:".to_vec();
            response.extend_from_slice(request);
            FrameCodec::default().encode(&response).unwrap().to_vec()
        });

        let connection = Connection::new("127.0.0.1", port);
        let response = connection.converse("hello").unwrap();
        assert_eq!(&response[..], b"echo:hello");
        assert_eq!(&server.join().unwrap()[..], b"hello");
    }

    #[test]
    fn test_connection_is_reusable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let codec = FrameCodec::default();
            for _ in 0..3 {
                let (mut stream, _) = listener.accept().unwrap();
                let request = codec.decode(&mut stream).unwrap();
                codec.send(&mut stream, &request).unwrap();
            }
        });

        let connection = Connection::new("127.0.0.1", port);
        for message in ["one", "two", "three"] {
            assert_eq!(&connection.converse(message).unwrap()[..], message.as_bytes());
        }
        server.join().unwrap();
    }

    #[test]
    fn test_server_closes_without_response() {
        let (port, server) = one_shot_server(|_| Vec::new());

        let connection = Connection::new("127.0.0.1", port);
        match connection.converse("anyone there?") {
            Err(ClientError::Frame(FrameError::MalformedHeader(header))) => {
                assert!(header.is_empty())
            }
            other => panic!("unexpected: {:?}", other),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_truncated_response() {
        let (port, server) = one_shot_server(|_| b"000010abc".to_vec());

        let connection = Connection::new("127.0.0.1", port);
        assert!(matches!(
            connection.converse("hi"),
            Err(ClientError::Frame(FrameError::TruncatedPayload {
                expected: 10,
                received: 3
            }))
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_connection_failed() {
        // Grab a free port, then release it so nothing is listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let connection = Connection::new("127.0.0.1", port);
        match connection.converse("hello") {
            Err(ClientError::ConnectionFailed {
                address,
                port: failed_port,
                ..
            }) => {
                assert_eq!(address, "127.0.0.1");
                assert_eq!(failed_port, port);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_message_too_large_sends_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();

        let connection =
            Connection::new("127.0.0.1", port).with_codec(FrameCodec::new(2, 10).unwrap());
        assert!(matches!(
            connection.converse("far too long for this codec"),
            Err(ClientError::Frame(FrameError::MessageTooLarge { .. }))
        ));

        // No connection was ever attempted.
        let accepted = listener.accept();
        assert!(matches!(accepted, Err(ref e) if e.kind() == io::ErrorKind::WouldBlock));
    }

    #[test]
    fn test_request_bytes_on_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut header = [0u8; 6];
            stream.read_exact(&mut header).unwrap();
            let mut body = [0u8; 4];
            stream.read_exact(&mut body).unwrap();
            stream.write_all(b"000003yes").unwrap();
            (header, body)
        });

        let response = Connection::new("127.0.0.1", port).converse("is_q").unwrap();
        assert_eq!(&response[..], b"yes");

        let (header, body) = server.join().unwrap();
        assert_eq!(&header, b"000004");
        assert_eq!(&body, b"is_q");
    }
}
