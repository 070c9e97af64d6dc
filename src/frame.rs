//! Length-prefixed framing for QNet messages.
//!
//! Every message travels as a fixed-width, zero-padded ASCII decimal length
//! header followed by exactly that many payload bytes:
//!
//! ```text
//! 000005hello
//! ^^^^^^ header (SIZE_DIGITS bytes)
//!       ^^^^^ payload (5 bytes)
//! ```
//!
//! The transport is a plain byte stream, so both directions are written to
//! tolerate partial reads and partial writes.

use bytes::{Bytes, BytesMut};
use std::io::{self, ErrorKind, Read, Write};

/// Width of the decimal length header.
pub const SIZE_DIGITS: usize = 6;

/// Exclusive upper bound on payload length.
pub const SIZE_RANGE: usize = 1_000_000;

/// Largest read issued while collecting a payload.
const READ_CHUNK: usize = 4096;

/// Widest header whose value still fits in a `u64`.
pub const MAX_SIZE_DIGITS: usize = 18;

/// Framing errors.
#[derive(Debug)]
pub enum FrameError {
    /// Message length is not below the codec's size range.
    MessageTooLarge { len: usize, limit: usize },
    /// Header was cut short or contained a non-digit byte.
    MalformedHeader(Vec<u8>),
    /// Stream ended before the declared payload arrived.
    TruncatedPayload { expected: usize, received: usize },
    /// A write accepted zero bytes.
    ConnectionBroken,
    /// Underlying transport error.
    Io(io::Error),
    /// Header width and size range cannot describe a fixed-width frame.
    InvalidLimits { size_digits: usize, size_range: usize },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::MessageTooLarge { len, limit } => {
                write!(
                    f,
                    "Message is too long: {} bytes (limit is {})",
                    len,
                    limit.saturating_sub(1)
                )
            }
            FrameError::MalformedHeader(header) => write!(
                f,
                "Malformed frame header: {:?}",
                String::from_utf8_lossy(header)
            ),
            FrameError::TruncatedPayload { expected, received } => write!(
                f,
                "Connection closed after {} of {} payload bytes",
                received, expected
            ),
            FrameError::ConnectionBroken => write!(f, "Connection broken while sending"),
            FrameError::Io(e) => write!(f, "I/O error: {}", e),
            FrameError::InvalidLimits {
                size_digits,
                size_range,
            } => write!(
                f,
                "Invalid frame limits: size_range {} with {} header digits \
                 (digits must be 1..={}, range 1..=10^digits)",
                size_range, size_digits, MAX_SIZE_DIGITS
            ),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        FrameError::Io(e)
    }
}

/// Encoder/decoder for a single QNet frame.
///
/// Both peers of a conversation must agree on the header width and size
/// range; [`FrameCodec::default`] uses the wire constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    size_digits: usize,
    size_range: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            size_digits: SIZE_DIGITS,
            size_range: SIZE_RANGE,
        }
    }
}

impl FrameCodec {
    /// Create a codec with a custom header width and size range.
    ///
    /// `size_digits` must be in `1..=MAX_SIZE_DIGITS` and `size_range` in
    /// `1..=10^size_digits`, so every allowed length fits the header.
    pub fn new(size_digits: usize, size_range: usize) -> Result<Self, FrameError> {
        let max_range = (1..=MAX_SIZE_DIGITS)
            .contains(&size_digits)
            .then(|| 10u64.pow(size_digits as u32));

        match max_range {
            Some(max) if size_range >= 1 && size_range as u64 <= max => Ok(Self {
                size_digits,
                size_range,
            }),
            _ => Err(FrameError::InvalidLimits {
                size_digits,
                size_range,
            }),
        }
    }

    pub fn size_digits(&self) -> usize {
        self.size_digits
    }

    pub fn size_range(&self) -> usize {
        self.size_range
    }

    /// Largest payload this codec will frame.
    pub fn max_message_len(&self) -> usize {
        self.size_range.saturating_sub(1)
    }

    /// Encode a message into a complete frame.
    pub fn encode(&self, message: &[u8]) -> Result<BytesMut, FrameError> {
        self.check_len(message.len())?;

        let mut frame = BytesMut::with_capacity(self.size_digits + message.len());
        let header = format!("{:0width$}", message.len(), width = self.size_digits);
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(message);
        Ok(frame)
    }

    /// Read exactly one frame from `reader` and return its payload.
    pub fn decode<R: Read>(&self, reader: &mut R) -> Result<Bytes, FrameError> {
        let mut raw = BytesMut::new();
        self.decode_into(reader, &mut raw)
    }

    /// Read exactly one frame, keeping every consumed byte in `raw`.
    ///
    /// On failure `raw` holds whatever was read before the error, which the
    /// server hands to `Handler::bad`. On success the frame's bytes are
    /// taken out of `raw`.
    pub fn decode_into<R: Read>(
        &self,
        reader: &mut R,
        raw: &mut BytesMut,
    ) -> Result<Bytes, FrameError> {
        let start = raw.len();

        // Header: loop until all digits arrive or the peer hangs up.
        let mut header = [0u8; MAX_SIZE_DIGITS];
        while raw.len() - start < self.size_digits {
            let want = self.size_digits - (raw.len() - start);
            let n = read_some(reader, &mut header[..want])?;
            if n == 0 {
                return Err(FrameError::MalformedHeader(raw[start..].to_vec()));
            }
            raw.extend_from_slice(&header[..n]);
        }

        let expected = self.parse_header(&raw[start..start + self.size_digits])?;

        let mut chunk = [0u8; READ_CHUNK];
        let payload_start = start + self.size_digits;
        while raw.len() - payload_start < expected {
            let remaining = expected - (raw.len() - payload_start);
            let n = read_some(reader, &mut chunk[..remaining.min(READ_CHUNK)])?;
            if n == 0 {
                return Err(FrameError::TruncatedPayload {
                    expected,
                    received: raw.len() - payload_start,
                });
            }
            raw.extend_from_slice(&chunk[..n]);
        }

        let mut frame = raw.split_off(start);
        Ok(frame.split_off(self.size_digits).freeze())
    }

    /// Encode `message` and write the whole frame to `writer`.
    pub fn send<W: Write>(&self, writer: &mut W, message: &[u8]) -> Result<(), FrameError> {
        let frame = self.encode(message)?;
        write_frame(writer, &frame)
    }

    fn check_len(&self, len: usize) -> Result<(), FrameError> {
        if len >= self.size_range {
            return Err(FrameError::MessageTooLarge {
                len,
                limit: self.size_range,
            });
        }
        Ok(())
    }

    fn parse_header(&self, header: &[u8]) -> Result<usize, FrameError> {
        if !header.iter().all(u8::is_ascii_digit) {
            return Err(FrameError::MalformedHeader(header.to_vec()));
        }

        let value = header
            .iter()
            .fold(0u64, |acc, &b| acc * 10 + u64::from(b - b'0'));

        // Receivers hold the sender's limit too.
        let len = usize::try_from(value).unwrap_or(usize::MAX);
        self.check_len(len)?;
        Ok(len)
    }
}

/// Write an already-encoded frame, looping over partial writes.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> Result<(), FrameError> {
    let mut sent = 0;
    while sent < frame.len() {
        match writer.write(&frame[sent..]) {
            Ok(0) => return Err(FrameError::ConnectionBroken),
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    writer.flush()?;
    Ok(())
}

/// A single read, retried when interrupted by a signal.
fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
