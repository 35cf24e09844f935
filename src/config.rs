//! Exploitation parameters shared by the calibrator, leaker and writer.

use crate::error::{Error, Result};
use crate::pointer::{Endian, PointerMaker};

/// Default upper bound on the parameter index searched during calibration.
pub const DEFAULT_MAX_NUM_PARAMS: usize = 200;

/// Default ceiling on the character count a write may request.
pub const DEFAULT_MAX_WRITE: usize = 1024;

/// Configuration for payload generation against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of parameter indices probed during calibration. Also the
    /// worst-case index used to size template padding.
    pub max_num_params: usize,
    /// Target pointer width in bytes (4 or 8).
    pub pointer_size: usize,
    /// Target byte order.
    pub endian: Endian,
    /// Largest value a `%n` write may produce.
    pub max_write: usize,
    /// Log every payload and reply at `info` instead of `trace`.
    pub verbose: bool,
}

impl Config {
    /// Configuration for a little-endian 64-bit target.
    pub fn x86_64() -> Self {
        Self {
            max_num_params: DEFAULT_MAX_NUM_PARAMS,
            pointer_size: 8,
            endian: Endian::Little,
            max_write: DEFAULT_MAX_WRITE,
            verbose: false,
        }
    }

    /// Configuration for a little-endian 32-bit target.
    pub fn x86() -> Self {
        Self {
            pointer_size: 4,
            ..Self::x86_64()
        }
    }

    pub fn with_max_num_params(mut self, n: usize) -> Self {
        self.max_num_params = n;
        self
    }

    pub fn with_max_write(mut self, n: usize) -> Self {
        self.max_write = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_num_params == 0 {
            return Err(Error::Config("max_num_params must be positive".into()));
        }
        if self.max_write == 0 {
            return Err(Error::Config("max_write must be positive".into()));
        }
        PointerMaker::new(self.endian, self.pointer_size)?;
        Ok(())
    }

    pub fn pointer_maker(&self) -> Result<PointerMaker> {
        PointerMaker::new(self.endian, self.pointer_size)
    }

    /// Log level for payload traces.
    pub(crate) fn trace_level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Trace
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::x86_64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        assert!(Config::x86_64().validate().is_ok());
        assert!(Config::x86().validate().is_ok());
        assert_eq!(Config::x86().pointer_size, 4);
        assert_eq!(Config::default(), Config::x86_64());
    }

    #[test]
    fn rejects_zero_bounds() {
        let cfg = Config::x86_64().with_max_num_params(0);
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
        let cfg = Config::x86_64().with_max_write(0);
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_pointer_size() {
        let cfg = Config {
            pointer_size: 0,
            ..Config::x86_64()
        };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            pointer_size: 2,
            ..Config::x86_64()
        };
        assert!(cfg.pointer_maker().is_err());
    }

    #[test]
    fn verbose_raises_trace_level() {
        assert_eq!(Config::x86_64().trace_level(), log::Level::Trace);
        let cfg = Config {
            verbose: true,
            ..Config::x86_64()
        };
        assert_eq!(cfg.trace_level(), log::Level::Info);
    }
}
