//! Time-frequency filterbank for spatial audio
//!
//! Block-streaming complex-valued filterbank: each call turns one hop of
//! time-domain samples per channel into `hop + 1` sub-band bins, and back.
//!
//! ## Analysis / synthesis
//! - Cosine-modulated polyphase structure over a 10-hop prototype window
//! - Hop sizes 32 to 1024 (powers of two)
//! - Real FFT backends selected at runtime (realfft, rustfft)
//! - Perfect reconstruction up to float rounding, with a fixed delay
//!
//! ## Modes
//! - Low-delay prototype: 6-hop delay instead of 9
//! - Hybrid stage: bins 1..=4 split into 8 half-width bins (+3 hops delay)
//!
//! ## Real-time use
//! `forward`/`inverse` never allocate and only log when an engine fails and
//! history is cleared. All allocation happens at construction and in
//! [`Filterbank::channel_change`].

pub mod config;
pub mod filterbank;
pub mod hybrid;
pub mod polyphase;
pub mod prototype;
pub mod ring;
pub mod spectral;

mod error;
mod frame;

pub use config::{
    FilterbankConfig, HopSize, SpectralBackend, HYBRID_EXTRA_BINS, MASTER_HOP, MAX_CHANNELS,
    TOTAL_HOPS,
};
pub use error::{FilterbankError, FilterbankResult};
pub use filterbank::{Filterbank, FilterbankBuilder, identity_route};
pub use frame::SpectralFrame;
pub use hybrid::HybridBandSplitter;
pub use prototype::{MasterPrototype, PrototypeFilterSet};
pub use spectral::{ComplexFftEngine, RealFftEngine, RealSpectralEngine, create_engine};
