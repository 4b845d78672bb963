//! Crate-level error type
//!
//! Each subsystem owns a focused error enum ([`TimingError`], [`HalError`],
//! [`ConfigError`]); [`DosimeterError`] wraps them for callers that bring
//! the whole device up in one go.

use thiserror_no_std::Error;

pub use crate::config::ConfigError;
pub use crate::hal::HalError;
pub use crate::hv_pump::TimingError;

/// Any failure that can occur while bringing the dosimeter core up.
///
/// All variants are fatal at boot: the firmware halts rather than run the
/// high-voltage converter with a bad recipe.
#[derive(Debug, Error)]
pub enum DosimeterError {
    #[error("HV timing rejected: {0}")]
    Timing(TimingError),
    #[error("Peripheral error: {0}")]
    Hal(HalError),
    #[error("Configuration error: {0}")]
    Config(ConfigError),
}

impl From<TimingError> for DosimeterError {
    fn from(value: TimingError) -> Self {
        Self::Timing(value)
    }
}

impl From<HalError> for DosimeterError {
    fn from(value: HalError) -> Self {
        Self::Hal(value)
    }
}

impl From<ConfigError> for DosimeterError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

pub type DosimeterResult<T> = Result<T, DosimeterError>;
