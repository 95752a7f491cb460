//! Real spectral engines
//!
//! Forward/inverse real FFT of one `2 × hop` frame. The engine is chosen at
//! construction time through [`SpectralBackend`]:
//! - [`RealFftEngine`] - realfft, half-size complex transform
//! - [`ComplexFftEngine`] - rustfft, full-size complex transform with the
//!   Hermitian half mirrored explicitly
//!
//! Both are unnormalised: `inverse(forward(x)) = frame_len · x`.
//! DC and Nyquist bins always carry an exactly zero imaginary part.

use std::sync::Arc;

use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};

use crate::config::SpectralBackend;
use crate::error::{FilterbankError, FilterbankResult};

/// Real-input FFT of a fixed even frame length.
///
/// Callers always pass buffers of `frame_len` and `num_bins`; an engine
/// should only fail on wrong lengths. If `forward` or `inverse` does fail
/// inside a [`Filterbank`](crate::Filterbank) call, the filterbank has
/// already consumed part of the block and resets its history, as
/// [`Filterbank::clear_buffers`](crate::Filterbank::clear_buffers) does.
pub trait RealSpectralEngine: Send + Sync {
    /// Time-domain frame length (`2 × hop`)
    fn frame_len(&self) -> usize;

    /// `frame` (length `frame_len`) -> `spectrum` (length `frame_len/2 + 1`).
    /// `frame` may be used as scratch and is left unspecified.
    fn forward(&mut self, frame: &mut [f32], spectrum: &mut [Complex32]) -> FilterbankResult<()>;

    /// `spectrum` -> `frame`. Imaginary parts of DC and Nyquist are ignored.
    /// `spectrum` may be used as scratch and is left unspecified.
    fn inverse(&mut self, spectrum: &mut [Complex32], frame: &mut [f32]) -> FilterbankResult<()>;

    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Unique bins produced by `forward`
    fn num_bins(&self) -> usize {
        self.frame_len() / 2 + 1
    }
}

/// Build the engine for a backend
pub fn create_engine(backend: SpectralBackend, frame_len: usize) -> Box<dyn RealSpectralEngine> {
    match backend {
        SpectralBackend::RealFft => Box::new(RealFftEngine::new(frame_len)),
        SpectralBackend::ComplexFft => Box::new(ComplexFftEngine::new(frame_len)),
    }
}

fn check_lengths(engine: &dyn RealSpectralEngine, frame: usize, bins: usize) -> FilterbankResult<()> {
    if frame != engine.frame_len() {
        return Err(FilterbankError::BlockSizeMismatch {
            expected: engine.frame_len(),
            got: frame,
        });
    }
    if bins != engine.num_bins() {
        return Err(FilterbankError::BinCountMismatch {
            expected: engine.num_bins(),
            got: bins,
        });
    }
    Ok(())
}

#[inline]
fn force_real_edges(spectrum: &mut [Complex32]) {
    if let Some(dc) = spectrum.first_mut() {
        dc.im = 0.0;
    }
    if let Some(nyquist) = spectrum.last_mut() {
        nyquist.im = 0.0;
    }
}

// ============ realfft ============

/// realfft-backed engine
pub struct RealFftEngine {
    frame_len: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    scratch_forward: Vec<Complex32>,
    scratch_inverse: Vec<Complex32>,
}

impl RealFftEngine {
    pub fn new(frame_len: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(frame_len);
        let inverse = planner.plan_fft_inverse(frame_len);
        let scratch_forward = forward.make_scratch_vec();
        let scratch_inverse = inverse.make_scratch_vec();

        Self {
            frame_len,
            forward,
            inverse,
            scratch_forward,
            scratch_inverse,
        }
    }
}

impl RealSpectralEngine for RealFftEngine {
    fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn forward(&mut self, frame: &mut [f32], spectrum: &mut [Complex32]) -> FilterbankResult<()> {
        check_lengths(&*self, frame.len(), spectrum.len())?;
        self.forward
            .process_with_scratch(frame, spectrum, &mut self.scratch_forward)
            .map_err(|e| FilterbankError::Spectral(e.to_string()))?;
        force_real_edges(spectrum);
        Ok(())
    }

    fn inverse(&mut self, spectrum: &mut [Complex32], frame: &mut [f32]) -> FilterbankResult<()> {
        check_lengths(&*self, frame.len(), spectrum.len())?;
        force_real_edges(spectrum);
        self.inverse
            .process_with_scratch(spectrum, frame, &mut self.scratch_inverse)
            .map_err(|e| FilterbankError::Spectral(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "realfft"
    }
}

// ============ rustfft ============

/// rustfft-backed engine using a full-length complex transform
pub struct ComplexFftEngine {
    frame_len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl ComplexFftEngine {
    pub fn new(frame_len: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(frame_len);
        let inverse = planner.plan_fft_inverse(frame_len);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            frame_len,
            forward,
            inverse,
            buffer: vec![Complex32::new(0.0, 0.0); frame_len],
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        }
    }
}

impl RealSpectralEngine for ComplexFftEngine {
    fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn forward(&mut self, frame: &mut [f32], spectrum: &mut [Complex32]) -> FilterbankResult<()> {
        check_lengths(&*self, frame.len(), spectrum.len())?;

        for (dst, &x) in self.buffer.iter_mut().zip(frame.iter()) {
            *dst = Complex32::new(x, 0.0);
        }
        self.forward.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let bins = spectrum.len();
        spectrum.copy_from_slice(&self.buffer[..bins]);
        force_real_edges(spectrum);
        Ok(())
    }

    fn inverse(&mut self, spectrum: &mut [Complex32], frame: &mut [f32]) -> FilterbankResult<()> {
        check_lengths(&*self, frame.len(), spectrum.len())?;
        force_real_edges(spectrum);

        // Hermitian mirror: X[N - k] = conj(X[k])
        let half = self.frame_len / 2;
        self.buffer[..=half].copy_from_slice(spectrum);
        for k in 1..half {
            self.buffer[self.frame_len - k] = spectrum[k].conj();
        }
        self.inverse.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (dst, src) in frame.iter_mut().zip(self.buffer.iter()) {
            *dst = src.re;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "complexfft"
    }
}
