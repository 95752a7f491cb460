//! Hybrid low-band splitter
//!
//! Splits plain bins 1..=4 into two half-bandwidth bins each, giving
//! `hop + 5` bins instead of `hop + 1`. The split is a half-band FIR run
//! across the last 7 spectra of each channel, so the analysis side gains a
//! fixed 3-hop group delay. Synthesis just sums the pairs back.
//!
//! Output layout:
//!
//! ```text
//! plain:   [0] [1]     [2]     [3]     [4]     [5] ... [N]
//! hybrid:  [0] [1][2]  [3][4]  [5][6]  [7][8]  [9] ... [N+4]
//! ```

use num_complex::Complex32;

use crate::config::HYBRID_EXTRA_BINS;
use crate::frame::SpectralFrame;
use crate::ring::{SlotCursor, SlotRing};

/// Outer half-band tap
pub const COEFF1: f32 = 0.031_273_141_818_515;
/// Inner half-band tap
pub const COEFF2: f32 = 0.281_273_130_414_96;

/// Spectra kept per channel
pub const HISTORY_LEN: usize = 7;

/// Added analysis delay in hops
pub const GROUP_DELAY: usize = 3;

/// Plain bins that get split
const SPLIT_BANDS: usize = HYBRID_EXTRA_BINS;

#[inline]
fn times_j(z: Complex32) -> Complex32 {
    Complex32::new(-z.im, z.re)
}

/// Per-channel spectrum history plus a shared loop cursor.
#[derive(Debug, Clone)]
pub struct HybridBandSplitter {
    plain_bins: usize,
    history: Vec<SlotRing<Complex32>>,
    cursor: SlotCursor,
}

impl HybridBandSplitter {
    pub fn new(plain_bins: usize, channels: usize) -> Self {
        Self {
            plain_bins,
            history: (0..channels)
                .map(|_| SlotRing::new(HISTORY_LEN, plain_bins))
                .collect(),
            cursor: SlotCursor::new(HISTORY_LEN),
        }
    }

    pub fn plain_bins(&self) -> usize {
        self.plain_bins
    }

    pub fn hybrid_bins(&self) -> usize {
        self.plain_bins + HYBRID_EXTRA_BINS
    }

    pub fn channels(&self) -> usize {
        self.history.len()
    }

    /// Loop cursor slot
    pub fn cursor(&self) -> usize {
        self.cursor.position()
    }

    /// Plain -> hybrid for every channel of `plain`. Advances the loop
    /// cursor once.
    pub fn forward(&mut self, plain: &SpectralFrame, hybrid: &mut SpectralFrame) {
        debug_assert_eq!(plain.channels(), self.history.len());
        debug_assert_eq!(plain.bins(), self.plain_bins);
        debug_assert_eq!(hybrid.bins(), self.hybrid_bins());

        let slot = self.cursor.position();
        for (ring, bins) in self.history.iter_mut().zip(plain.iter()) {
            ring.write_slot(slot, bins);
        }
        self.cursor.advance();

        // After the advance, offset 0 is the oldest spectrum and offset 6 the newest
        let cursor = self.cursor;
        for (ring, out) in self.history.iter().zip(hybrid.iter_mut()) {
            let at = move |offset: usize| ring.slot(cursor.offset(offset));
            let (oldest, older, delayed, newer, newest) = (at(0), at(2), at(GROUP_DELAY), at(4), at(6));

            out[0] = delayed[0];
            for band in 1..=SPLIT_BANDS {
                let correction = times_j(
                    (newer[band] - older[band]) * COEFF2 + (oldest[band] - newest[band]) * COEFF1,
                );
                let half = delayed[band] * 0.5;
                let (lower, upper) = if band % 2 == 1 {
                    (half - correction, half + correction)
                } else {
                    (half + correction, half - correction)
                };
                out[2 * band - 1] = lower;
                out[2 * band] = upper;
            }
            out[SPLIT_BANDS + HYBRID_EXTRA_BINS + 1..]
                .copy_from_slice(&delayed[SPLIT_BANDS + 1..]);
        }
    }

    /// Hybrid -> plain for every channel of `hybrid`. Stateless.
    pub fn inverse(&self, hybrid: &SpectralFrame, plain: &mut SpectralFrame) {
        debug_assert_eq!(hybrid.channels(), plain.channels());
        debug_assert_eq!(hybrid.bins(), self.hybrid_bins());
        debug_assert_eq!(plain.bins(), self.plain_bins);

        for (bins, out) in hybrid.iter().zip(plain.iter_mut()) {
            merge(bins, out);
        }
    }

    /// Resize to `channels`. Retained channels keep their history.
    pub fn resize(&mut self, channels: usize) {
        let bins = self.plain_bins;
        self.history
            .resize_with(channels, || SlotRing::new(HISTORY_LEN, bins));
    }

    /// Zero all history in place. The cursor is left where it is.
    pub fn clear(&mut self) {
        self.history.iter_mut().for_each(SlotRing::clear);
    }
}

/// Sum each split pair back into its plain bin
fn merge(hybrid: &[Complex32], plain: &mut [Complex32]) {
    plain[0] = hybrid[0];
    for band in 1..=SPLIT_BANDS {
        plain[band] = hybrid[2 * band - 1] + hybrid[2 * band];
    }
    plain[SPLIT_BANDS + 1..].copy_from_slice(&hybrid[SPLIT_BANDS + HYBRID_EXTRA_BINS + 1..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn constant_frame(bins: usize, value: Complex32) -> SpectralFrame {
        let mut frame = SpectralFrame::new(1, bins);
        frame.channel_mut(0).fill(value);
        frame
    }

    #[test]
    fn test_bin_counts() {
        let splitter = HybridBandSplitter::new(33, 2);
        assert_eq!(splitter.plain_bins(), 33);
        assert_eq!(splitter.hybrid_bins(), 37);
        assert_eq!(splitter.channels(), 2);
    }

    #[test]
    fn test_group_delay() {
        let mut splitter = HybridBandSplitter::new(17, 1);
        let mut hybrid = SpectralFrame::new(1, 21);
        let silent = SpectralFrame::new(1, 17);

        let mut first = SpectralFrame::new(1, 17);
        for (k, bin) in first.channel_mut(0).iter_mut().enumerate() {
            *bin = Complex32::new(k as f32 + 1.0, 0.0);
        }

        splitter.forward(&first, &mut hybrid);
        for _ in 0..GROUP_DELAY - 1 {
            splitter.forward(&silent, &mut hybrid);
            assert_eq!(hybrid.channel(0)[0], Complex32::new(0.0, 0.0));
        }
        splitter.forward(&silent, &mut hybrid);

        let out = hybrid.channel(0);
        assert_eq!(out[0], Complex32::new(1.0, 0.0));
        assert_eq!(out[9], Complex32::new(6.0, 0.0));
        assert_eq!(out[20], Complex32::new(17.0, 0.0));
    }

    #[test]
    fn test_steady_state_splits_evenly() {
        // A constant spectrum has no half-band correction
        let mut splitter = HybridBandSplitter::new(9, 1);
        let input = constant_frame(9, Complex32::new(2.0, -1.0));
        let mut hybrid = SpectralFrame::new(1, 13);
        for _ in 0..HISTORY_LEN {
            splitter.forward(&input, &mut hybrid);
        }
        for bin in &hybrid.channel(0)[1..=8] {
            assert_abs_diff_eq!(bin.re, 1.0, epsilon = 1e-6);
            assert_abs_diff_eq!(bin.im, -0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_inverse_recovers_delayed_spectrum() {
        let mut splitter = HybridBandSplitter::new(9, 1);
        let mut hybrid = SpectralFrame::new(1, 13);
        let mut plain = SpectralFrame::new(1, 9);
        let mut inputs = Vec::new();

        for t in 0..12 {
            let mut frame = SpectralFrame::new(1, 9);
            for (k, bin) in frame.channel_mut(0).iter_mut().enumerate() {
                *bin = Complex32::new((t * 7 + k) as f32 % 5.0, (t + 3 * k) as f32 % 3.0);
            }
            splitter.forward(&frame, &mut hybrid);
            splitter.inverse(&hybrid, &mut plain);
            inputs.push(frame);

            if t >= GROUP_DELAY {
                let expected = inputs[t - GROUP_DELAY].channel(0);
                for (got, want) in plain.channel(0).iter().zip(expected) {
                    assert_abs_diff_eq!(got.re, want.re, epsilon = 1e-5);
                    assert_abs_diff_eq!(got.im, want.im, epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_resize_and_clear() {
        let mut splitter = HybridBandSplitter::new(9, 1);
        let input = constant_frame(9, Complex32::new(1.0, 0.0));
        let mut hybrid = SpectralFrame::new(1, 13);
        splitter.forward(&input, &mut hybrid);

        splitter.resize(3);
        assert_eq!(splitter.channels(), 3);
        splitter.resize(1);
        assert_eq!(splitter.cursor(), 1);

        splitter.clear();
        assert_eq!(splitter.cursor(), 1);
        let silent = SpectralFrame::new(1, 9);
        for _ in 0..HISTORY_LEN {
            splitter.forward(&silent, &mut hybrid);
            assert_eq!(hybrid.energy(), 0.0);
        }
    }
}
