//! Public filterbank instance
//!
//! [`Filterbank`] composes the polyphase core with the optional hybrid
//! stage and owns every buffer. One call to [`Filterbank::forward`]
//! consumes one hop per input channel; one call to
//! [`Filterbank::inverse`] produces one hop per output channel. Both are
//! allocation-free and check buffer shapes before touching any state.

use std::sync::Arc;

use crate::config::{FilterbankConfig, HYBRID_EXTRA_BINS, validate_channels};
use crate::error::{FilterbankError, FilterbankResult};
use crate::frame::SpectralFrame;
use crate::hybrid::{GROUP_DELAY, HybridBandSplitter};
use crate::polyphase::PolyphaseCore;
use crate::prototype::{MasterPrototype, PrototypeFilterSet};
use crate::spectral::{RealSpectralEngine, create_engine};

/// Hybrid splitter plus the plain-bin frames between it and the core
struct HybridStage {
    splitter: HybridBandSplitter,
    analysis: SpectralFrame,
    synthesis: SpectralFrame,
}

impl HybridStage {
    fn new(plain_bins: usize, in_channels: usize, out_channels: usize) -> Self {
        Self {
            splitter: HybridBandSplitter::new(plain_bins, in_channels),
            analysis: SpectralFrame::new(in_channels, plain_bins),
            synthesis: SpectralFrame::new(out_channels, plain_bins),
        }
    }
}

/// Builder for instances with an injected master table or FFT engine
pub struct FilterbankBuilder {
    config: FilterbankConfig,
    master: Option<Arc<MasterPrototype>>,
    engine: Option<Box<dyn RealSpectralEngine>>,
}

impl FilterbankBuilder {
    pub fn new(config: FilterbankConfig) -> Self {
        Self {
            config,
            master: None,
            engine: None,
        }
    }

    /// Use `master` instead of the default table for the delay mode. The
    /// table's delay mode must match the config's.
    pub fn master(mut self, master: Arc<MasterPrototype>) -> Self {
        self.master = Some(master);
        self
    }

    /// Use `engine` instead of the configured backend. Its frame length
    /// must be twice the hop size.
    pub fn engine(mut self, engine: Box<dyn RealSpectralEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> FilterbankResult<Filterbank> {
        let config = self.config;
        config.validate()?;

        let hop = config.hop_size;
        let master = self
            .master
            .unwrap_or_else(|| MasterPrototype::for_mode(config.low_delay));
        if master.is_low_delay() != config.low_delay {
            return Err(FilterbankError::InvalidPrototype(format!(
                "{} master table used with low_delay={}",
                if master.is_low_delay() { "low-delay" } else { "normal-delay" },
                config.low_delay
            )));
        }
        let prototype = PrototypeFilterSet::derive(&master, hop);

        let engine = match self.engine {
            Some(engine) if engine.frame_len() != hop.frame_len() => {
                return Err(FilterbankError::Spectral(format!(
                    "engine '{}' has frame length {}, hop {} needs {}",
                    engine.name(),
                    engine.frame_len(),
                    hop,
                    hop.frame_len()
                )));
            }
            Some(engine) => engine,
            None => create_engine(config.backend, hop.frame_len()),
        };

        let core = PolyphaseCore::new(prototype, engine, config.in_channels, config.out_channels);
        let hybrid = config
            .hybrid
            .then(|| HybridStage::new(hop.plain_bins(), config.in_channels, config.out_channels));

        let filterbank = Filterbank { config, core, hybrid };

        log::debug!(
            "Filterbank created: hop={}, in={}, out={}, low_delay={}, hybrid={}, bands={}, delay={} samples, engine={}",
            filterbank.config.hop_size,
            filterbank.config.in_channels,
            filterbank.config.out_channels,
            filterbank.config.low_delay,
            filterbank.config.hybrid,
            filterbank.num_bands(),
            filterbank.processing_delay(),
            filterbank.core.engine_name()
        );

        Ok(filterbank)
    }
}

/// Block-streaming analysis/synthesis filterbank.
///
/// # Example
///
/// ```
/// use tfb_filterbank::{Filterbank, FilterbankConfig};
///
/// let config = FilterbankConfig::new(128, 2, 2).unwrap();
/// let mut fb = Filterbank::new(config).unwrap();
///
/// let input = vec![vec![0.0f32; 128]; 2];
/// let mut output = vec![vec![0.0f32; 128]; 2];
/// let mut spectra = fb.analysis_frame();
///
/// fb.forward(&input, &mut spectra).unwrap();
/// fb.inverse(&spectra, &mut output).unwrap();
/// assert_eq!(spectra.bins(), 129);
/// ```
pub struct Filterbank {
    config: FilterbankConfig,
    core: PolyphaseCore,
    hybrid: Option<HybridStage>,
}

impl Filterbank {
    /// Create an instance with the default master table for the delay mode
    pub fn new(config: FilterbankConfig) -> FilterbankResult<Self> {
        FilterbankBuilder::new(config).build()
    }

    pub fn builder(config: FilterbankConfig) -> FilterbankBuilder {
        FilterbankBuilder::new(config)
    }

    // ============ Processing ============

    /// Analyse one hop per input channel into `spectra`
    /// (`in_channels × num_bands`).
    pub fn forward<I: AsRef<[f32]>>(
        &mut self,
        input: &[I],
        spectra: &mut SpectralFrame,
    ) -> FilterbankResult<()> {
        let hop = self.hop_size();
        check_count(self.in_channels(), input.len())?;
        for block in input {
            check_block(hop, block.as_ref().len())?;
        }
        check_frame(spectra, self.in_channels(), self.num_bands())?;

        let result = match &mut self.hybrid {
            Some(stage) => self
                .core
                .forward(input, &mut stage.analysis)
                .map(|()| stage.splitter.forward(&stage.analysis, spectra)),
            None => self.core.forward(input, spectra),
        };
        self.recover_on_failure(result)
    }

    /// Synthesise one hop per output channel from `spectra`
    /// (`out_channels × num_bands`).
    pub fn inverse<O: AsMut<[f32]>>(
        &mut self,
        spectra: &SpectralFrame,
        output: &mut [O],
    ) -> FilterbankResult<()> {
        let hop = self.hop_size();
        check_frame(spectra, self.out_channels(), self.num_bands())?;
        check_count(self.out_channels(), output.len())?;
        for block in output.iter_mut() {
            check_block(hop, block.as_mut().len())?;
        }

        let result = match &mut self.hybrid {
            Some(stage) => {
                stage.splitter.inverse(spectra, &mut stage.synthesis);
                self.core.inverse(&stage.synthesis, output)
            }
            None => self.core.inverse(spectra, output),
        };
        self.recover_on_failure(result)
    }

    /// Shapes are checked up front, so an error here comes from the engine
    /// after part of the block was consumed. Drop all history so the
    /// instance behaves like a cleared one.
    fn recover_on_failure(&mut self, result: FilterbankResult<()>) -> FilterbankResult<()> {
        if let Err(err) = &result {
            log::warn!("Filterbank engine failure, clearing history: {err}");
            self.clear_buffers();
        }
        result
    }

    /// Run whole signals through forward, `route` and inverse.
    ///
    /// `input` holds one signal per input channel; shorter signals are
    /// zero-padded to the longest, and the final partial hop is padded
    /// too. `route` maps each analysis frame (`in_channels × num_bands`)
    /// to a synthesis frame (`out_channels × num_bands`) that starts
    /// zeroed. Returns one signal per output channel, as long as the
    /// longest input and not delay-compensated. Allocates, so it is meant
    /// for offline use.
    pub fn process_signal<S, F>(&mut self, input: &[S], mut route: F) -> FilterbankResult<Vec<Vec<f32>>>
    where
        S: AsRef<[f32]>,
        F: FnMut(&SpectralFrame, &mut SpectralFrame),
    {
        check_count(self.in_channels(), input.len())?;

        let hop = self.hop_size();
        let len = input.iter().map(|s| s.as_ref().len()).max().unwrap_or(0);
        let hops = len.div_ceil(hop);

        let mut in_block = vec![vec![0.0f32; hop]; self.in_channels()];
        let mut out_block = vec![vec![0.0f32; hop]; self.out_channels()];
        let mut analysis = self.analysis_frame();
        let mut synthesis = self.synthesis_frame();
        let mut output = vec![Vec::with_capacity(hops * hop); self.out_channels()];

        for n in 0..hops {
            let start = n * hop;
            for (block, signal) in in_block.iter_mut().zip(input) {
                let signal = signal.as_ref();
                block.fill(0.0);
                if start < signal.len() {
                    let end = (start + hop).min(signal.len());
                    block[..end - start].copy_from_slice(&signal[start..end]);
                }
            }

            self.forward(&in_block, &mut analysis)?;
            synthesis.fill_zero();
            route(&analysis, &mut synthesis);
            self.inverse(&synthesis, &mut out_block)?;

            for (signal, block) in output.iter_mut().zip(&out_block) {
                signal.extend_from_slice(block);
            }
        }

        for signal in &mut output {
            signal.truncate(len);
        }
        Ok(output)
    }

    // ============ Reconfiguration ============

    /// Change channel counts. Channels present before and after keep their
    /// history; new channels start silent. Nothing changes on error.
    pub fn channel_change(&mut self, in_channels: usize, out_channels: usize) -> FilterbankResult<()> {
        validate_channels(in_channels)?;
        validate_channels(out_channels)?;

        if in_channels == self.config.in_channels && out_channels == self.config.out_channels {
            return Ok(());
        }

        log::debug!(
            "Filterbank channel change: in {} -> {}, out {} -> {}",
            self.config.in_channels,
            in_channels,
            self.config.out_channels,
            out_channels
        );

        self.core.resize(in_channels, out_channels);
        if let Some(stage) = &mut self.hybrid {
            stage.splitter.resize(in_channels);
            stage.analysis.resize_channels(in_channels);
            stage.synthesis.resize_channels(out_channels);
        }
        self.config.in_channels = in_channels;
        self.config.out_channels = out_channels;
        Ok(())
    }

    /// Zero all sample and spectrum history. Channel counts and cursor
    /// positions are unchanged.
    pub fn clear_buffers(&mut self) {
        self.core.clear();
        if let Some(stage) = &mut self.hybrid {
            stage.splitter.clear();
            stage.analysis.fill_zero();
            stage.synthesis.fill_zero();
        }
        log::debug!("Filterbank buffers cleared");
    }

    // ============ Introspection ============

    pub fn config(&self) -> &FilterbankConfig {
        &self.config
    }

    /// Samples per block
    pub fn hop_size(&self) -> usize {
        self.config.hop_size.samples()
    }

    pub fn in_channels(&self) -> usize {
        self.config.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.config.out_channels
    }

    pub fn is_low_delay(&self) -> bool {
        self.config.low_delay
    }

    pub fn is_hybrid(&self) -> bool {
        self.hybrid.is_some()
    }

    /// Bins per channel: `hop + 1`, or `hop + 5` with the hybrid stage
    pub fn num_bands(&self) -> usize {
        self.config.num_bands()
    }

    /// Forward-then-inverse delay in samples
    pub fn processing_delay(&self) -> usize {
        let hybrid_hops = if self.is_hybrid() { GROUP_DELAY } else { 0 };
        (self.core.prototype().delay_hops() + hybrid_hops) * self.hop_size()
    }

    /// Centre frequency of every band in Hz
    pub fn centre_frequencies(&self, sample_rate: f32) -> Vec<f32> {
        let hop = self.hop_size();
        let spacing = sample_rate / (2 * hop) as f32;

        if !self.is_hybrid() {
            return (0..=hop).map(|k| k as f32 * spacing).collect();
        }

        let mut freqs = Vec::with_capacity(self.num_bands());
        freqs.push(0.0);
        for band in 1..=HYBRID_EXTRA_BINS {
            let centre = band as f32;
            freqs.push((centre - 0.25) * spacing);
            freqs.push((centre + 0.25) * spacing);
        }
        freqs.extend((HYBRID_EXTRA_BINS + 1..=hop).map(|k| k as f32 * spacing));
        freqs
    }

    /// Prototype taps in use
    pub fn prototype(&self) -> &PrototypeFilterSet {
        self.core.prototype()
    }

    /// FFT backend name
    pub fn engine_name(&self) -> &'static str {
        self.core.engine_name()
    }

    /// Zeroed frame shaped for [`forward`](Self::forward)
    pub fn analysis_frame(&self) -> SpectralFrame {
        SpectralFrame::new(self.in_channels(), self.num_bands())
    }

    /// Zeroed frame shaped for [`inverse`](Self::inverse)
    pub fn synthesis_frame(&self) -> SpectralFrame {
        SpectralFrame::new(self.out_channels(), self.num_bands())
    }
}

impl Drop for Filterbank {
    fn drop(&mut self) {
        log::debug!(
            "Filterbank destroyed: hop={}, in={}, out={}",
            self.config.hop_size,
            self.config.in_channels,
            self.config.out_channels
        );
    }
}

impl std::fmt::Debug for Filterbank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filterbank")
            .field("config", &self.config)
            .field("engine", &self.core.engine_name())
            .field("cursor_in", &self.core.cursor_in())
            .field("cursor_out", &self.core.cursor_out())
            .finish()
    }
}

#[inline]
fn check_count(expected: usize, got: usize) -> FilterbankResult<()> {
    if expected != got {
        return Err(FilterbankError::ChannelMismatch { expected, got });
    }
    Ok(())
}

#[inline]
fn check_block(expected: usize, got: usize) -> FilterbankResult<()> {
    if expected != got {
        return Err(FilterbankError::BlockSizeMismatch { expected, got });
    }
    Ok(())
}

fn check_frame(frame: &SpectralFrame, channels: usize, bins: usize) -> FilterbankResult<()> {
    check_count(channels, frame.channels())?;
    if frame.bins() != bins {
        return Err(FilterbankError::BinCountMismatch {
            expected: bins,
            got: frame.bins(),
        });
    }
    Ok(())
}

/// Identity routing for [`Filterbank::process_signal`]: channel `i` of the
/// analysis frame feeds channel `i` of the synthesis frame.
pub fn identity_route(analysis: &SpectralFrame, synthesis: &mut SpectralFrame) {
    synthesis.copy_from(analysis);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HopSize, SpectralBackend};
    use crate::spectral::RealFftEngine;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex32;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_send_sync() {
        assert_send_sync::<Filterbank>();
    }

    #[test]
    fn test_band_counts() {
        for hop in HopSize::ALL {
            for hybrid in [false, true] {
                let config = FilterbankConfig::default()
                    .with_hop_size(hop)
                    .with_hybrid(hybrid);
                let fb = Filterbank::new(config).unwrap();
                let expected = hop.samples() + if hybrid { 5 } else { 1 };
                assert_eq!(fb.num_bands(), expected);
                assert_eq!(fb.centre_frequencies(48000.0).len(), expected);
            }
        }
    }

    #[test]
    fn test_processing_delay() {
        let cases = [(false, false, 9), (true, false, 6), (false, true, 12), (true, true, 9)];
        for (low_delay, hybrid, hops) in cases {
            let config = FilterbankConfig::new(64, 1, 1)
                .unwrap()
                .with_low_delay(low_delay)
                .with_hybrid(hybrid);
            let fb = Filterbank::new(config).unwrap();
            assert_eq!(fb.processing_delay(), hops * 64);
        }
    }

    #[test]
    fn test_centre_frequencies() {
        let config = FilterbankConfig::new(32, 1, 1).unwrap();
        let plain = Filterbank::new(config.clone()).unwrap().centre_frequencies(64.0);
        assert_abs_diff_eq!(plain[1], 1.0);
        assert_abs_diff_eq!(plain[32], 32.0);

        let hybrid = Filterbank::new(config.with_hybrid(true))
            .unwrap()
            .centre_frequencies(64.0);
        assert_eq!(hybrid[0], 0.0);
        assert_abs_diff_eq!(hybrid[1], 0.75);
        assert_abs_diff_eq!(hybrid[2], 1.25);
        assert_abs_diff_eq!(hybrid[8], 4.25);
        assert_abs_diff_eq!(hybrid[9], 5.0);
        assert_abs_diff_eq!(hybrid[36], 32.0);
        assert!(hybrid.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_shape_errors_leave_state_untouched() {
        let config = FilterbankConfig::new(32, 2, 1).unwrap();
        let mut fb = Filterbank::new(config).unwrap();
        let mut spectra = fb.analysis_frame();

        let short = vec![vec![0.0f32; 32], vec![0.0f32; 31]];
        let err = fb.forward(&short, &mut spectra).unwrap_err();
        assert_eq!(err, FilterbankError::BlockSizeMismatch { expected: 32, got: 31 });
        assert!(err.is_contract_violation());

        let one = vec![vec![0.0f32; 32]];
        assert_eq!(
            fb.forward(&one, &mut spectra),
            Err(FilterbankError::ChannelMismatch { expected: 2, got: 1 })
        );

        let mut wrong_bins = SpectralFrame::new(2, 20);
        let two = vec![vec![0.0f32; 32]; 2];
        assert_eq!(
            fb.forward(&two, &mut wrong_bins),
            Err(FilterbankError::BinCountMismatch { expected: 33, got: 20 })
        );

        let synthesis = fb.synthesis_frame();
        let mut out = vec![vec![0.0f32; 16]];
        assert!(fb.inverse(&synthesis, &mut out).is_err());

        let debug = format!("{fb:?}");
        assert!(debug.contains("cursor_in: 0"));
        assert!(debug.contains("cursor_out: 0"));
    }

    #[test]
    fn test_channel_change_limits() {
        let mut fb = Filterbank::new(FilterbankConfig::default()).unwrap();
        assert!(matches!(
            fb.channel_change(2000, 1),
            Err(FilterbankError::InvalidChannelCount { requested: 2000, .. })
        ));
        assert_eq!(fb.in_channels(), 1);

        fb.channel_change(0, 4).unwrap();
        assert_eq!(fb.in_channels(), 0);
        assert_eq!(fb.out_channels(), 4);
        assert_eq!(fb.analysis_frame().channels(), 0);
        assert_eq!(fb.synthesis_frame().channels(), 4);
    }

    #[test]
    fn test_builder_rejects_mismatched_engine() {
        let config = FilterbankConfig::new(64, 1, 1).unwrap();
        let result = Filterbank::builder(config)
            .engine(Box::new(RealFftEngine::new(64)))
            .build();
        assert!(matches!(result, Err(FilterbankError::Spectral(_))));
    }

    #[test]
    fn test_builder_with_backend_and_master() {
        let config = FilterbankConfig::new(64, 1, 1)
            .unwrap()
            .with_backend(SpectralBackend::ComplexFft);
        let fb = Filterbank::builder(config)
            .master(MasterPrototype::standard())
            .build()
            .unwrap();
        assert_eq!(fb.engine_name(), "complexfft");
        assert_eq!(fb.prototype().delay_hops(), 9);
    }

    #[test]
    fn test_builder_rejects_master_of_other_delay_mode() {
        let normal = FilterbankConfig::new(64, 1, 1).unwrap();
        let result = Filterbank::builder(normal.clone())
            .master(MasterPrototype::low_delay())
            .build();
        assert!(matches!(result, Err(FilterbankError::InvalidPrototype(_))));

        let low_delay = normal.with_low_delay(true);
        let result = Filterbank::builder(low_delay.clone())
            .master(MasterPrototype::standard())
            .build();
        assert!(matches!(result, Err(FilterbankError::InvalidPrototype(_))));

        // Matching injected table reconstructs with the table's delay
        let mut fb = Filterbank::builder(low_delay)
            .master(MasterPrototype::low_delay())
            .build()
            .unwrap();
        let delay = fb.processing_delay();
        assert_eq!(delay, 6 * 64);
        let input: Vec<f32> = (0..delay + 640).map(|i| ((i * 37 % 101) as f32 / 50.0) - 1.0).collect();
        let output = fb.process_signal(&[&input[..]], identity_route).unwrap();
        for i in delay..input.len() {
            assert_abs_diff_eq!(output[0][i], input[i - delay], epsilon = 1e-3);
        }
    }

    /// Real FFT that fails while `fail` is set
    struct FlakyEngine {
        inner: RealFftEngine,
        fail: Arc<AtomicBool>,
    }

    impl RealSpectralEngine for FlakyEngine {
        fn frame_len(&self) -> usize {
            self.inner.frame_len()
        }

        fn forward(&mut self, frame: &mut [f32], spectrum: &mut [Complex32]) -> FilterbankResult<()> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(FilterbankError::Spectral("forced failure".into()));
            }
            self.inner.forward(frame, spectrum)
        }

        fn inverse(&mut self, spectrum: &mut [Complex32], frame: &mut [f32]) -> FilterbankResult<()> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(FilterbankError::Spectral("forced failure".into()));
            }
            self.inner.inverse(spectrum, frame)
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_engine_failure_leaves_cleared_state() {
        let hop = 32;
        let config = FilterbankConfig::new(hop, 2, 2).unwrap().with_hybrid(true);
        let block = |seed: usize| -> Vec<Vec<f32>> {
            (0..2)
                .map(|ch| (0..hop).map(|i| (((seed + ch) * 31 + i * 7) % 13) as f32 / 6.0 - 1.0).collect())
                .collect()
        };

        let fail = Arc::new(AtomicBool::new(false));
        let engine = FlakyEngine {
            inner: RealFftEngine::new(2 * hop),
            fail: Arc::clone(&fail),
        };
        let mut flaky = Filterbank::builder(config.clone())
            .engine(Box::new(engine))
            .build()
            .unwrap();
        let mut reference = Filterbank::new(config).unwrap();

        let mut spectra = flaky.analysis_frame();
        let mut out = vec![vec![0.0f32; hop]; 2];
        for n in 0..5 {
            flaky.forward(&block(n), &mut spectra).unwrap();
            flaky.inverse(&spectra, &mut out).unwrap();
            reference.forward(&block(n), &mut spectra).unwrap();
            reference.inverse(&spectra, &mut out).unwrap();
        }

        fail.store(true, Ordering::Relaxed);
        let err = flaky.forward(&block(5), &mut spectra).unwrap_err();
        assert!(!err.is_contract_violation());
        fail.store(false, Ordering::Relaxed);
        reference.clear_buffers();

        let mut expected = vec![vec![0.0f32; hop]; 2];
        let mut reference_spectra = reference.analysis_frame();
        for n in 6..20 {
            flaky.forward(&block(n), &mut spectra).unwrap();
            flaky.inverse(&spectra, &mut out).unwrap();
            reference.forward(&block(n), &mut reference_spectra).unwrap();
            reference.inverse(&reference_spectra, &mut expected).unwrap();
            assert_eq!(spectra, reference_spectra);
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn test_process_signal_pads_and_truncates() {
        let config = FilterbankConfig::new(32, 1, 2).unwrap();
        let mut fb = Filterbank::new(config).unwrap();
        let input = vec![vec![0.5f32; 100]];
        let output = fb.process_signal(&input, identity_route).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].len(), 100);
        assert!(output[1].iter().all(|&x| x == 0.0));
    }
}
