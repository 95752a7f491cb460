//! Polyphase filterbank core
//!
//! Cosine-modulated polyphase analysis/synthesis over a 10-hop prototype.
//!
//! ## Forward
//! The new hop is written into every analysis ring at the shared input
//! cursor, which then advances once. Starting from the cursor (the oldest
//! hop) each of the 10 slots is windowed by its segment of the analysis
//! taps and added into one half of a `2 × hop` fold buffer, the half
//! chosen by the slot's distance from the cursor modulo 2. The folded
//! frame is transformed to `hop + 1` bins.
//!
//! ## Inverse
//! Bins are transformed back to a `2 × hop` frame (odd bins negated first
//! in low-delay mode). Starting at the output cursor, each of the 10 slots
//! accumulates one half of the frame windowed by its synthesis segment.
//! The slot at the cursor has now received all 10 overlapping
//! contributions: it is emitted, zeroed and the cursor moves past it.

use num_complex::Complex32;

use crate::config::{HopSize, TOTAL_HOPS};
use crate::error::FilterbankResult;
use crate::frame::SpectralFrame;
use crate::prototype::PrototypeFilterSet;
use crate::ring::{SlotCursor, SlotRing};
use crate::spectral::RealSpectralEngine;

/// Ring buffers, cursors and scratch for both transform directions.
pub struct PolyphaseCore {
    hop: usize,
    prototype: PrototypeFilterSet,
    engine: Box<dyn RealSpectralEngine>,
    analysis: Vec<SlotRing<f32>>,
    synthesis: Vec<SlotRing<f32>>,
    cursor_in: SlotCursor,
    cursor_out: SlotCursor,
    /// Fold buffer / inverse FFT output (`2 × hop`)
    fold: Vec<f32>,
    /// Inverse FFT input copy (`hop + 1`), the engine may overwrite it
    bins: Vec<Complex32>,
}

impl PolyphaseCore {
    pub fn new(
        prototype: PrototypeFilterSet,
        engine: Box<dyn RealSpectralEngine>,
        in_channels: usize,
        out_channels: usize,
    ) -> Self {
        let hop_size = prototype.hop_size();
        debug_assert_eq!(engine.frame_len(), hop_size.frame_len());
        let hop = hop_size.samples();

        Self {
            hop,
            prototype,
            engine,
            analysis: (0..in_channels).map(|_| SlotRing::new(TOTAL_HOPS, hop)).collect(),
            synthesis: (0..out_channels).map(|_| SlotRing::new(TOTAL_HOPS, hop)).collect(),
            cursor_in: SlotCursor::new(TOTAL_HOPS),
            cursor_out: SlotCursor::new(TOTAL_HOPS),
            fold: vec![0.0; hop_size.frame_len()],
            bins: vec![Complex32::new(0.0, 0.0); hop_size.plain_bins()],
        }
    }

    pub fn hop_size(&self) -> HopSize {
        self.prototype.hop_size()
    }

    pub fn prototype(&self) -> &PrototypeFilterSet {
        &self.prototype
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn in_channels(&self) -> usize {
        self.analysis.len()
    }

    pub fn out_channels(&self) -> usize {
        self.synthesis.len()
    }

    /// Input cursor slot
    pub fn cursor_in(&self) -> usize {
        self.cursor_in.position()
    }

    /// Output cursor slot
    pub fn cursor_out(&self) -> usize {
        self.cursor_out.position()
    }

    /// Time -> spectrum. Shapes are checked by the caller: one hop per input
    /// channel, `spectra` sized `in_channels × (hop + 1)`.
    pub fn forward<I: AsRef<[f32]>>(
        &mut self,
        input: &[I],
        spectra: &mut SpectralFrame,
    ) -> FilterbankResult<()> {
        debug_assert_eq!(input.len(), self.analysis.len());
        debug_assert_eq!(spectra.bins(), self.hop + 1);

        let slot = self.cursor_in.position();
        for (ring, block) in self.analysis.iter_mut().zip(input) {
            ring.write_slot(slot, block.as_ref());
        }
        self.cursor_in.advance();

        let hop = self.hop;
        for (ch, ring) in self.analysis.iter().enumerate() {
            self.fold.fill(0.0);
            for (k, samples) in ring.slots_from(self.cursor_in) {
                let taps = self.prototype.analysis_segment(k);
                let half = (k % 2) * hop;
                for ((acc, &x), &h) in self.fold[half..half + hop].iter_mut().zip(samples).zip(taps) {
                    *acc += x * h;
                }
            }
            self.engine.forward(&mut self.fold, spectra.channel_mut(ch))?;
        }

        Ok(())
    }

    /// Spectrum -> time. Shapes are checked by the caller: `spectra` sized
    /// `out_channels × (hop + 1)`, one hop-length output per channel.
    pub fn inverse<O: AsMut<[f32]>>(
        &mut self,
        spectra: &SpectralFrame,
        output: &mut [O],
    ) -> FilterbankResult<()> {
        debug_assert_eq!(output.len(), self.synthesis.len());
        debug_assert_eq!(spectra.bins(), self.hop + 1);

        let hop = self.hop;
        let low_delay = self.prototype.is_low_delay();

        for (ch, (ring, block)) in self.synthesis.iter_mut().zip(output.iter_mut()).enumerate() {
            self.bins.copy_from_slice(spectra.channel(ch));
            if low_delay {
                for bin in self.bins.iter_mut().skip(1).step_by(2) {
                    *bin = -*bin;
                }
            }
            self.engine.inverse(&mut self.bins, &mut self.fold)?;

            for k in 0..TOTAL_HOPS {
                let taps = self.prototype.synthesis_segment(k);
                let half = (k % 2) * hop;
                let slot = ring.slot_mut(self.cursor_out.offset(k));
                for ((acc, &y), &g) in slot.iter_mut().zip(&self.fold[half..half + hop]).zip(taps) {
                    *acc += y * g;
                }
            }

            let complete = ring.slot_mut(self.cursor_out.position());
            block.as_mut().copy_from_slice(complete);
            complete.fill(0.0);
        }
        self.cursor_out.advance();

        Ok(())
    }

    /// Resize both directions. Channels below the new counts keep their
    /// history; added channels start zeroed.
    pub fn resize(&mut self, in_channels: usize, out_channels: usize) {
        let hop = self.hop;
        self.analysis
            .resize_with(in_channels, || SlotRing::new(TOTAL_HOPS, hop));
        self.synthesis
            .resize_with(out_channels, || SlotRing::new(TOTAL_HOPS, hop));
    }

    /// Zero all history in place. Cursors keep their positions.
    pub fn clear(&mut self) {
        self.analysis.iter_mut().for_each(SlotRing::clear);
        self.synthesis.iter_mut().for_each(SlotRing::clear);
    }
}
