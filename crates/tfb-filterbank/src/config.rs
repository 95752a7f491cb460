//! Configuration types for filterbank instances

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FilterbankError, FilterbankResult};

/// Number of hop-sized slots spanned by the prototype filters
pub const TOTAL_HOPS: usize = 10;

/// Hop length the master prototype tables are designed for
pub const MASTER_HOP: usize = 1024;

/// Upper bound on input or output channels per instance
pub const MAX_CHANNELS: usize = 1024;

/// Bins added by the hybrid stage (4 plain bins become 8 hybrid bins)
pub const HYBRID_EXTRA_BINS: usize = 4;

/// Supported hop size (power of two between 32 and 1024 samples)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct HopSize(usize);

impl HopSize {
    /// Every supported hop size, ascending
    pub const ALL: [HopSize; 6] = [
        HopSize(32),
        HopSize(64),
        HopSize(128),
        HopSize(256),
        HopSize(512),
        HopSize(1024),
    ];

    /// Validate a hop size in samples
    pub fn new(samples: usize) -> FilterbankResult<Self> {
        if samples.is_power_of_two() && (32..=MASTER_HOP).contains(&samples) {
            Ok(Self(samples))
        } else {
            Err(FilterbankError::UnsupportedHopSize(samples))
        }
    }

    /// Hop length in samples
    #[inline]
    pub fn samples(self) -> usize {
        self.0
    }

    /// FFT frame length (two hops)
    #[inline]
    pub fn frame_len(self) -> usize {
        2 * self.0
    }

    /// Unique bins of the real FFT (DC through Nyquist)
    #[inline]
    pub fn plain_bins(self) -> usize {
        self.0 + 1
    }

    /// Prototype filter length for this hop size
    #[inline]
    pub fn filter_len(self) -> usize {
        TOTAL_HOPS * self.0
    }

    /// Decimation factor applied to the master prototype tables
    #[inline]
    pub fn decimation(self) -> usize {
        MASTER_HOP / self.0
    }
}

impl Default for HopSize {
    fn default() -> Self {
        Self(128)
    }
}

impl TryFrom<usize> for HopSize {
    type Error = FilterbankError;

    fn try_from(samples: usize) -> Result<Self, Self::Error> {
        Self::new(samples)
    }
}

impl From<HopSize> for usize {
    fn from(hop: HopSize) -> Self {
        hop.0
    }
}

impl fmt::Display for HopSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// FFT implementation backing the spectral engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralBackend {
    /// Real-input FFT (realfft), half-size complex transform
    #[default]
    RealFft,
    /// Full-size complex FFT (rustfft) with explicit Hermitian mirroring
    ComplexFft,
}

impl SpectralBackend {
    pub fn name(self) -> &'static str {
        match self {
            Self::RealFft => "realfft",
            Self::ComplexFft => "complexfft",
        }
    }
}

impl fmt::Display for SpectralBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpectralBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "realfft" | "real" => Ok(Self::RealFft),
            "complexfft" | "complex" => Ok(Self::ComplexFft),
            other => Err(format!("unknown spectral backend '{other}' (expected realfft or complex)")),
        }
    }
}

/// Filterbank instance configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterbankConfig {
    /// Samples consumed/produced per block call
    pub hop_size: HopSize,
    /// Analysis (time -> spectrum) channels
    pub in_channels: usize,
    /// Synthesis (spectrum -> time) channels
    pub out_channels: usize,
    /// Use the low-delay prototype
    pub low_delay: bool,
    /// Subdivide the lowest bands with the half-band hybrid stage
    pub hybrid: bool,
    /// FFT backend
    pub backend: SpectralBackend,
}

impl Default for FilterbankConfig {
    fn default() -> Self {
        Self {
            hop_size: HopSize::default(),
            in_channels: 1,
            out_channels: 1,
            low_delay: false,
            hybrid: false,
            backend: SpectralBackend::default(),
        }
    }
}

impl FilterbankConfig {
    /// Config with the given hop size and channel counts, normal delay, no hybrid stage
    pub fn new(hop_size: usize, in_channels: usize, out_channels: usize) -> FilterbankResult<Self> {
        let config = Self {
            hop_size: HopSize::new(hop_size)?,
            in_channels,
            out_channels,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Short hop with the low-delay prototype, for interactive processing
    pub fn low_latency() -> Self {
        Self {
            hop_size: HopSize(64),
            low_delay: true,
            ..Default::default()
        }
    }

    /// Hybrid stage enabled for finer low-frequency resolution
    pub fn high_resolution() -> Self {
        Self {
            hop_size: HopSize(128),
            hybrid: true,
            ..Default::default()
        }
    }

    /// Set hop size
    pub fn with_hop_size(mut self, hop_size: HopSize) -> Self {
        self.hop_size = hop_size;
        self
    }

    /// Set channel counts
    pub fn with_channels(mut self, in_channels: usize, out_channels: usize) -> Self {
        self.in_channels = in_channels;
        self.out_channels = out_channels;
        self
    }

    /// Enable/disable the low-delay prototype
    pub fn with_low_delay(mut self, low_delay: bool) -> Self {
        self.low_delay = low_delay;
        self
    }

    /// Enable/disable the hybrid stage
    pub fn with_hybrid(mut self, hybrid: bool) -> Self {
        self.hybrid = hybrid;
        self
    }

    /// Set FFT backend
    pub fn with_backend(mut self, backend: SpectralBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Bins per channel in spectral frames
    pub fn num_bands(&self) -> usize {
        if self.hybrid {
            self.hop_size.plain_bins() + HYBRID_EXTRA_BINS
        } else {
            self.hop_size.plain_bins()
        }
    }

    /// Check channel counts
    pub fn validate(&self) -> FilterbankResult<()> {
        validate_channels(self.in_channels)?;
        validate_channels(self.out_channels)
    }
}

pub(crate) fn validate_channels(count: usize) -> FilterbankResult<()> {
    if count > MAX_CHANNELS {
        return Err(FilterbankError::InvalidChannelCount {
            requested: count,
            max: MAX_CHANNELS,
        });
    }
    Ok(())
}
