//! fmtpwn: calibrated read and write primitives for printf format string bugs.
//!
//! Given a target that echoes attacker input through a `printf`-family
//! call, fmtpwn finds the argument slot holding that input and then builds
//! Direct Parameter Access (`%N$`) payloads that leak memory at arbitrary
//! addresses and overwrite 1, 2 or 4 low-order bytes there.
//!
//! # Module overview
//!
//! - [`error`]: Error types used throughout the crate.
//! - [`pointer`]: Fixed-width, endianness-aware address encoding.
//! - [`config`]: Search bounds, pointer width and write ceiling.
//! - [`fmtstr`]: DPA template builder, alignment padding and reply parsing.
//! - [`channel`]: The send-line / read-until contract and a socket implementation.
//! - [`tube`]: Process I/O tubes over pipes (pwntools-style). *(Unix-only)*
//! - [`calibrate`]: Oracle search for the attacker-controlled parameter index.
//! - [`leak`]: Arbitrary reads: leak at address, leak at parameter, find parameter.
//! - [`write`]: Partial writes through `%hhn`, `%hn` and `%n`.
//! - [`exit`]: Exit-on-error wrapper for script-style callers.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use fmtpwn::config::Config;
//! use fmtpwn::fmtstr::FormatStringInfo;
//! use fmtpwn::leak::Leaker;
//! use fmtpwn::tube::Tube;
//! use fmtpwn::write::Writer;
//!
//! # fn main() -> fmtpwn::error::Result<()> {
//! let mut tube = Tube::spawn(Path::new("./vuln"), &[])
//!     .map_err(|e| fmtpwn::error::Error::io("spawn", e))?;
//! let leaker = Leaker::new(&mut tube, Config::x86_64(), FormatStringInfo::default())?;
//! let got = leaker.pointer_maker().make(0x404018);
//! let puts = leaker.read_pointer(&mut tube, &got)?;
//!
//! let writer = Writer::from_leaker(&leaker)?;
//! writer.write_lower_2_bytes_at(&mut tube, 0x1337, &got)?;
//! # let _ = puts;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod pointer;
pub mod config;
pub mod fmtstr;
pub mod channel;
pub mod calibrate;
pub mod leak;
pub mod write;
pub mod exit;

// Pipe and poll based
#[cfg(unix)]
pub mod tube;

#[cfg(test)]
mod sim;
