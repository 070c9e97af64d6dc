//! Socket helpers shared by the server and the demo binary.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

/// Resolve `host:port` to the first matching socket address.
pub fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address found for {host}:{port}"),
        )
    })
}

/// Create a blocking listener with the given backlog.
///
/// `SO_REUSEADDR` lets a new server bind the port right after a previous one
/// on the same port has shut down.
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}

/// Best guess at the name this machine should serve as.
///
/// Falls back to `localhost` when the hostname is unavailable.
pub fn get_address() -> String {
    hostname().unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return None;
    }

    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match std::str::from_utf8(&buf[..len]) {
        Ok(name) if !name.is_empty() => Some(name.to_string()),
        _ => None,
    }
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_loopback() {
        let addr = resolve("127.0.0.1", 4099).unwrap();
        assert_eq!(addr.port(), 4099);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_listener(resolve("127.0.0.1", 0).unwrap(), 5).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_get_address_not_empty() {
        assert!(!get_address().is_empty());
    }
}
