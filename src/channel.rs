//! Duplex byte channel to the vulnerable target.
//!
//! The exploitation core only needs two operations: send one line, then
//! read until a delimiter. [`Tube`](crate::tube::Tube) implements this for
//! a spawned process and [`StreamChannel`] for any `Read + Write` stream
//! such as a `TcpStream`.

use std::io::{self, Read, Write};

use crate::config::Config;
use crate::error::{Error, Result};

/// Internal read buffer size.
const BUF_SIZE: usize = 4096;

/// Request/response byte stream to a target.
pub trait Channel {
    /// Send `payload` followed by a newline.
    fn write_line(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Block until `delim` is seen and return everything up to and
    /// including it.
    fn read_until(&mut self, delim: &[u8]) -> io::Result<Vec<u8>>;
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn write_line(&mut self, payload: &[u8]) -> io::Result<()> {
        (**self).write_line(payload)
    }

    fn read_until(&mut self, delim: &[u8]) -> io::Result<Vec<u8>> {
        (**self).read_until(delim)
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn write_line(&mut self, payload: &[u8]) -> io::Result<()> {
        (**self).write_line(payload)
    }

    fn read_until(&mut self, delim: &[u8]) -> io::Result<Vec<u8>> {
        (**self).read_until(delim)
    }
}

/// A [`Channel`] over a blocking `Read + Write` stream.
pub struct StreamChannel<S> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S: Read + Write> StreamChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> Channel for StreamChannel<S> {
    fn write_line(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload);
        line.push(b'\n');
        self.stream.write_all(&line)?;
        self.stream.flush()
    }

    fn read_until(&mut self, delim: &[u8]) -> io::Result<Vec<u8>> {
        let mut tmp = [0u8; BUF_SIZE];
        loop {
            if let Some(pos) = find_subsequence(&self.buffer, delim) {
                let end = pos + delim.len();
                return Ok(self.buffer.drain(..end).collect());
            }
            let n = match self.stream.read(&mut tmp) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream closed after {} bytes without delimiter", self.buffer.len()),
                ));
            }
            self.buffer.extend_from_slice(&tmp[..n]);
        }
    }
}

/// Find a subsequence (delimiter) in a byte slice.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Send one payload and read the reply up to `terminator`.
///
/// Exactly one `write_line` and one `read_until` per call. Channel errors
/// are wrapped with `context`.
pub(crate) fn round_trip<C: Channel + ?Sized>(
    chan: &mut C,
    config: &Config,
    payload: &[u8],
    terminator: &[u8],
    context: impl Fn() -> String,
) -> Result<Vec<u8>> {
    let level = config.trace_level();
    log::log!(level, "send {}: {}", context(), payload.escape_ascii());
    chan.write_line(payload)
        .map_err(|e| Error::io(format!("{}: send failed", context()), e))?;
    let reply = chan
        .read_until(terminator)
        .map_err(|e| Error::io(format!("{}: receive failed", context()), e))?;
    log::log!(level, "recv {}: {}", context(), reply.escape_ascii());
    if !reply.ends_with(terminator) {
        return Err(Error::Protocol(format!(
            "{}: reply does not end with the terminator",
            context()
        )));
    }
    Ok(reply)
}
