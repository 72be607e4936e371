//! Tunables threaded through the retry classifier, the DSA, and
//! discovery. CLI flag parsing is out of scope (see spec §1/§6); this
//! struct is the contract the core exposes for those flags to set.

use crate::error::ConfigError;

/// Hard ceiling on any `MaxTries` value (§4.D).
pub const MAX_MAX_TRIES: u8 = 15;
pub const DEFAULT_MAX_TRIES: u8 = 10;
pub const DEFAULT_ASYNC_THRESHOLD: usize = 3;

/// Which retry budget applies to a logical DDC operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// A write-only operation, e.g. set-VCP.
    WriteOnly,
    /// A write-then-read operation, e.g. get-VCP.
    WriteRead,
    /// A single fragment of a multi-part transfer (capabilities, table).
    MultiPart,
}

/// `--maxtries A,B,C` — one budget per [`OpClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxTries {
    write_only: u8,
    write_read: u8,
    multi_part: u8,
}

impl MaxTries {
    pub fn new(write_only: u8, write_read: u8, multi_part: u8) -> Result<Self, ConfigError> {
        for v in [write_only, write_read, multi_part] {
            if v > MAX_MAX_TRIES {
                return Err(ConfigError::MaxTriesTooLarge(v));
            }
        }
        Ok(Self {
            write_only,
            write_read,
            multi_part,
        })
    }

    pub fn for_class(&self, class: OpClass) -> u8 {
        match class {
            OpClass::WriteOnly => self.write_only,
            OpClass::WriteRead => self.write_read,
            OpClass::MultiPart => self.multi_part,
        }
    }
}

impl Default for MaxTries {
    fn default() -> Self {
        Self {
            write_only: DEFAULT_MAX_TRIES,
            write_read: DEFAULT_MAX_TRIES,
            multi_part: DEFAULT_MAX_TRIES,
        }
    }
}

/// `--edid-read-size`; spec fixes the legal set to `{0, 128, 256}` (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdidReadSize {
    /// `0`: use the implementation default (128 bytes).
    Default,
    Bytes128,
    Bytes256,
}

impl EdidReadSize {
    pub fn from_raw(value: usize) -> Result<Self, ConfigError> {
        match value {
            0 => Ok(EdidReadSize::Default),
            128 => Ok(EdidReadSize::Bytes128),
            256 => Ok(EdidReadSize::Bytes256),
            other => Err(ConfigError::InvalidEdidReadSize(other)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EdidReadSize::Default | EdidReadSize::Bytes128 => 128,
            EdidReadSize::Bytes256 => 256,
        }
    }
}

/// Process-wide knobs that discovery, the retry classifier, and the DSA
/// all read from. There is one `Config` per [`crate::MonitorRegistry`] facade.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_tries: MaxTries,
    /// `--sleep-multiplier`: when set, disables DSA adaptation (§4.E).
    pub sleep_multiplier_override: Option<f64>,
    pub dynamic_sleep_enabled: bool,
    /// §4.H: candidate count at or above which discovery fans out.
    pub async_threshold: usize,
    pub edid_read_size: EdidReadSize,
    pub enable_usb: bool,
    /// Retry `set-address` with the "force slave address" ioctl on busy (§4.A).
    pub force_slave_address: bool,
}

impl Config {
    pub fn with_sleep_multiplier_override(mut self, multiplier: f64) -> Result<Self, ConfigError> {
        if !(0.0..100.0).contains(&multiplier) {
            return Err(ConfigError::SleepMultiplierOutOfRange(multiplier));
        }
        self.sleep_multiplier_override = Some(multiplier);
        self.dynamic_sleep_enabled = false;
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_tries: MaxTries::default(),
            sleep_multiplier_override: None,
            dynamic_sleep_enabled: true,
            async_threshold: DEFAULT_ASYNC_THRESHOLD,
            edid_read_size: EdidReadSize::Default,
            enable_usb: false,
            force_slave_address: true,
        }
    }
}
