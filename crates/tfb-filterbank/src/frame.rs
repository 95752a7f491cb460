//! Multichannel spectral frame

use num_complex::Complex32;

/// One block of sub-band samples: `channels × bins` complex values, stored
/// channel-major in a single allocation.
///
/// Produced by [`Filterbank::forward`](crate::Filterbank::forward) and
/// consumed by [`Filterbank::inverse`](crate::Filterbank::inverse). The
/// caller owns it; the filterbank keeps no reference across calls.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    data: Vec<Complex32>,
    channels: usize,
    bins: usize,
}

impl SpectralFrame {
    /// Zeroed frame
    pub fn new(channels: usize, bins: usize) -> Self {
        Self {
            data: vec![Complex32::new(0.0, 0.0); channels * bins],
            channels,
            bins,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Bins per channel
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Bins of one channel
    #[inline]
    pub fn channel(&self, channel: usize) -> &[Complex32] {
        &self.data[channel * self.bins..(channel + 1) * self.bins]
    }

    /// Mutable bins of one channel
    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [Complex32] {
        &mut self.data[channel * self.bins..(channel + 1) * self.bins]
    }

    /// Per-channel bin slices. Empty when the frame has no bins.
    pub fn iter(&self) -> impl Iterator<Item = &[Complex32]> {
        // data is empty when bins == 0, so the substitute chunk size yields nothing
        self.data.chunks_exact(self.bins.max(1))
    }

    /// Mutable per-channel bin slices. Empty when the frame has no bins.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut [Complex32]> {
        self.data.chunks_exact_mut(self.bins.max(1))
    }

    /// All bins, channel 0 first
    pub fn as_slice(&self) -> &[Complex32] {
        &self.data
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(Complex32::new(0.0, 0.0));
    }

    /// Grow or shrink the channel count. Retained channels keep their bins,
    /// new channels start at zero.
    pub fn resize_channels(&mut self, channels: usize) {
        self.data.resize(channels * self.bins, Complex32::new(0.0, 0.0));
        self.channels = channels;
    }

    /// Copy channel-wise from `other` over the shared channel and bin range,
    /// zeroing whatever is left over in `self`.
    pub fn copy_from(&mut self, other: &SpectralFrame) {
        self.fill_zero();
        let bins = self.bins.min(other.bins);
        for (dst, src) in self.iter_mut().zip(other.iter()) {
            dst[..bins].copy_from_slice(&src[..bins]);
        }
    }

    /// Squared magnitude per bin, summed over channels
    pub fn band_energy(&self) -> Vec<f32> {
        let mut energy = vec![0.0; self.bins];
        for channel in self.iter() {
            for (e, bin) in energy.iter_mut().zip(channel) {
                *e += bin.norm_sqr();
            }
        }
        energy
    }

    /// Squared magnitude summed over every bin of every channel
    pub fn energy(&self) -> f32 {
        self.data.iter().map(|bin| bin.norm_sqr()).sum()
    }
}
