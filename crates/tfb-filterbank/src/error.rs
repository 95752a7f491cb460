//! Error types for filterbank construction and block processing

use thiserror::Error;

/// Filterbank error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterbankError {
    /// Hop size outside the supported power-of-two set
    #[error("Unsupported hop size: {0} (supported: 32, 64, 128, 256, 512, 1024)")]
    UnsupportedHopSize(usize),

    /// Channel count above the supported maximum
    #[error("Invalid channel count: {requested} (max supported: {max})")]
    InvalidChannelCount { requested: usize, max: usize },

    /// Time-domain block length differs from the hop size
    #[error("Block size mismatch: expected {expected} samples, got {got}")]
    BlockSizeMismatch { expected: usize, got: usize },

    /// Number of channels passed differs from the configured count
    #[error("Channel mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: usize, got: usize },

    /// Spectral frame does not carry the instance's band count
    #[error("Bin count mismatch: expected {expected}, got {got}")]
    BinCountMismatch { expected: usize, got: usize },

    /// Injected master prototype table is unusable
    #[error("Invalid prototype filter: {0}")]
    InvalidPrototype(String),

    /// FFT backend failure
    #[error("Spectral engine error: {0}")]
    Spectral(String),
}

impl FilterbankError {
    /// True for caller bugs (wrong buffer shapes) as opposed to configuration errors.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::BlockSizeMismatch { .. }
                | Self::ChannelMismatch { .. }
                | Self::BinCountMismatch { .. }
        )
    }
}

/// Result type for filterbank operations
pub type FilterbankResult<T> = Result<T, FilterbankError>;
