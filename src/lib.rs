//! qnet: one request, one response, over TCP.
//!
//! A QNet conversation is as simple as it gets:
//!
//! 1. The client connects and sends one message.
//! 2. The server answers with one message.
//! 3. The connection is closed.
//!
//! Sending more means starting another conversation. Messages are framed
//! with a fixed-width decimal length header (see [`frame`]).
//!
//! Every server answers three built-in requests:
//! - `is_q`: `yes`, identifying a QNet server
//! - `who`: the server's name
//! - `motd`: the message of the day
//!
//! Anything else goes to the server's [`Handler`].
//!
//! There is no authentication or encryption. Do not send passwords or other
//! secrets over QNet.

pub mod client;
pub mod config;
pub mod frame;
pub mod handler;
pub mod net;
pub mod server;

pub use client::{ClientError, Connection};
pub use frame::{FrameCodec, FrameError, SIZE_DIGITS, SIZE_RANGE};
pub use handler::{DefaultHandler, Handler, HandlerError, ServerControl};
pub use net::get_address;
pub use server::{Server, ServerOptions};
