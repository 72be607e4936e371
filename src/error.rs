//! Error taxonomy and the `ErrorInfo` cause tree.
//!
//! Low layers (transport, codec) only ever produce a single leaf
//! [`DdcOpError`]. The retry classifier in [`crate::retry`] is the only
//! layer allowed to build a composite [`ErrorInfo`] out of several
//! attempts; everything above it passes the tree through unchanged.

use std::fmt;
use thiserror::Error;

use crate::ddc::ci::DdcCiProtocolError;

/// Error kinds from the taxonomy, independent of how many causes an
/// [`ErrorInfo`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdcStatus {
    PermissionDenied,
    NotFound,
    Busy,
    IoError,
    ShortRead,
    BadChecksum,
    BadLength,
    OpcodeMismatch,
    FeatureCodeMismatch,
    NullResponse,
    AllResponsesNull,
    ReportedUnsupported,
    DeterminedUnsupported,
    RetriesExhausted,
    InvalidArgument,
    InvalidOperation,
    BadConfigurationFile,
    AlreadyInitialised,
    VerificationFailed,
}

impl fmt::Display for DdcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DdcStatus::PermissionDenied => "permission-denied",
            DdcStatus::NotFound => "not-found",
            DdcStatus::Busy => "busy",
            DdcStatus::IoError => "io-error",
            DdcStatus::ShortRead => "short-read",
            DdcStatus::BadChecksum => "bad-checksum",
            DdcStatus::BadLength => "bad-length",
            DdcStatus::OpcodeMismatch => "opcode-mismatch",
            DdcStatus::FeatureCodeMismatch => "feature-code-mismatch",
            DdcStatus::NullResponse => "null-response",
            DdcStatus::AllResponsesNull => "all-responses-null",
            DdcStatus::ReportedUnsupported => "reported-unsupported",
            DdcStatus::DeterminedUnsupported => "determined-unsupported",
            DdcStatus::RetriesExhausted => "retries-exhausted",
            DdcStatus::InvalidArgument => "invalid-argument",
            DdcStatus::InvalidOperation => "invalid-operation",
            DdcStatus::BadConfigurationFile => "bad-configuration-file",
            DdcStatus::AlreadyInitialised => "already-initialised",
            DdcStatus::VerificationFailed => "verification-failed",
        };
        f.write_str(name)
    }
}

/// The leaf error produced by a single DDC exchange attempt.
///
/// Never retried by the layer that raises it; only [`crate::retry`] decides
/// whether to try again.
#[derive(Debug, Error)]
pub enum DdcOpError {
    #[error("permission denied opening {0}")]
    PermissionDenied(String),

    #[error("device not found: {0}")]
    NotFound(String),

    #[error("device busy: {0}")]
    Busy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read: expected {expected} got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("DDC/CI protocol error: {0}")]
    Protocol(#[from] DdcCiProtocolError),

    #[error("null response")]
    NullResponse,

    #[error("monitor reported feature unsupported")]
    ReportedUnsupported,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl DdcOpError {
    /// Classify this leaf error into a [`DdcStatus`].
    pub fn status(&self) -> DdcStatus {
        match self {
            DdcOpError::PermissionDenied(_) => DdcStatus::PermissionDenied,
            DdcOpError::NotFound(_) => DdcStatus::NotFound,
            DdcOpError::Busy(_) => DdcStatus::Busy,
            DdcOpError::Io(_) => DdcStatus::IoError,
            DdcOpError::ShortRead { .. } => DdcStatus::ShortRead,
            DdcOpError::Protocol(e) => e.status(),
            DdcOpError::NullResponse => DdcStatus::NullResponse,
            DdcOpError::ReportedUnsupported => DdcStatus::ReportedUnsupported,
            DdcOpError::InvalidArgument(_) => DdcStatus::InvalidArgument,
            DdcOpError::InvalidOperation(_) => DdcStatus::InvalidOperation,
        }
    }

    /// Non-retryable errors short-circuit the retry loop in §4.D.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DdcOpError::PermissionDenied(_)
                | DdcOpError::NotFound(_)
                | DdcOpError::InvalidArgument(_)
                | DdcOpError::InvalidOperation(_)
        )
    }
}

impl DdcCiProtocolError {
    pub fn status(&self) -> DdcStatus {
        match self {
            DdcCiProtocolError::InvalidLength => DdcStatus::BadLength,
            DdcCiProtocolError::InvalidChecksum => DdcStatus::BadChecksum,
            DdcCiProtocolError::InvalidMessageFormat => DdcStatus::BadLength,
            DdcCiProtocolError::ParserError(_) => DdcStatus::BadLength,
        }
    }
}

/// A node in the structured error tree described in spec §3/§7.
///
/// Equality is by structure, so tests can assert on the shape of a
/// retry history without comparing formatted text.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub status: DdcStatus,
    pub call_site: &'static str,
    pub detail: String,
    pub causes: Vec<ErrorInfo>,
}

impl ErrorInfo {
    pub fn new(status: DdcStatus, call_site: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            call_site,
            detail: detail.into(),
            causes: Vec::new(),
        }
    }

    pub fn with_causes(
        status: DdcStatus,
        call_site: &'static str,
        detail: impl Into<String>,
        causes: Vec<ErrorInfo>,
    ) -> Self {
        Self {
            status,
            call_site,
            detail: detail.into(),
            causes,
        }
    }

    pub fn leaf(call_site: &'static str, err: &DdcOpError) -> Self {
        Self::new(err.status(), call_site, err.to_string())
    }

    pub fn add_cause(&mut self, cause: ErrorInfo) {
        self.causes.push(cause);
    }

    /// Render the cause tree the way a CLI verbose trace would.
    pub fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(
            f,
            "{:indent$}{} ({}): {}",
            "",
            self.call_site,
            self.status,
            self.detail,
            indent = depth * 2
        )?;
        for cause in &self.causes {
            cause.fmt_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

impl std::error::Error for ErrorInfo {}

/// Errors raised while validating user-supplied configuration (§6).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("maxtries value {0} exceeds MAX_MAX_TRIES ({MAX_MAX_TRIES})", MAX_MAX_TRIES = crate::config::MAX_MAX_TRIES)]
    MaxTriesTooLarge(u8),

    #[error("sleep-multiplier {0} is out of range [0, 100)")]
    SleepMultiplierOutOfRange(f64),

    #[error("edid-read-size must be one of {{0, 128, 256}}, got {0}")]
    InvalidEdidReadSize(usize),
}
