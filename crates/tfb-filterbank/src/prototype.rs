//! Prototype filters
//!
//! The filterbank windows its input with a lowpass prototype spanning
//! [`TOTAL_HOPS`] hops. Prototypes are stored once as a master table laid
//! out for a 1024-sample hop ([`MasterPrototype`]) and derived for a
//! concrete hop size by decimation ([`PrototypeFilterSet`]).
//!
//! ## Default master design
//!
//! The default tables sample a power-complementary lowpass whose response
//! falls from 1 at DC to 0 one bin away, following the Meyer transition
//! polynomial, so neighbouring bins sum to unit power. Each pair of
//! mirrored polyphase components is then projected onto the nearest
//! paraunitary sequence with a rotation lattice, which makes the
//! analysis/synthesis round trip exact up to float rounding.
//!
//! - Normal table: spans all 10 hops, symmetric, delay 9 hops.
//! - Low-delay table: spans the first 7 hops (trailing hops are zero),
//!   delay 6 hops. Its odd span is why inverse transforms in low-delay
//!   mode negate odd bins.

use std::f64::consts::PI;
use std::sync::{Arc, OnceLock};

use crate::config::{HopSize, MASTER_HOP, TOTAL_HOPS};
use crate::error::{FilterbankError, FilterbankResult};

/// Hops spanned by the default normal-delay master
const STANDARD_SPAN: usize = TOTAL_HOPS;

/// Hops spanned by the default low-delay master
const LOW_DELAY_SPAN: usize = 7;

/// Quadrature points for sampling the lowpass response
const DESIGN_POINTS: usize = 128;

static STANDARD: OnceLock<Arc<MasterPrototype>> = OnceLock::new();
static LOW_DELAY: OnceLock<Arc<MasterPrototype>> = OnceLock::new();

/// Master prototype table (`TOTAL_HOPS × MASTER_HOP` taps).
#[derive(Debug, Clone, PartialEq)]
pub struct MasterPrototype {
    taps: Vec<f64>,
    delay_hops: usize,
    low_delay: bool,
}

impl MasterPrototype {
    /// Wrap an external coefficient table.
    ///
    /// `delay_hops` is the end-to-end delay (in hops) the table produces
    /// without the hybrid stage. `low_delay` marks tables that need the
    /// odd-bin negation on the inverse transform.
    pub fn from_taps(taps: Vec<f64>, delay_hops: usize, low_delay: bool) -> FilterbankResult<Self> {
        let expected = TOTAL_HOPS * MASTER_HOP;
        if taps.len() != expected {
            return Err(FilterbankError::InvalidPrototype(format!(
                "expected {expected} taps, got {}",
                taps.len()
            )));
        }
        if taps.iter().any(|t| !t.is_finite()) {
            return Err(FilterbankError::InvalidPrototype("non-finite tap".into()));
        }
        if taps.iter().all(|&t| t == 0.0) {
            return Err(FilterbankError::InvalidPrototype("all taps are zero".into()));
        }
        if delay_hops >= TOTAL_HOPS {
            return Err(FilterbankError::InvalidPrototype(format!(
                "delay of {delay_hops} hops exceeds the {TOTAL_HOPS}-hop window"
            )));
        }
        Ok(Self {
            taps,
            delay_hops,
            low_delay,
        })
    }

    /// Shared default normal-delay master
    pub fn standard() -> Arc<Self> {
        STANDARD.get_or_init(|| Arc::new(Self::design(STANDARD_SPAN))).clone()
    }

    /// Shared default low-delay master
    pub fn low_delay() -> Arc<Self> {
        LOW_DELAY.get_or_init(|| Arc::new(Self::design(LOW_DELAY_SPAN))).clone()
    }

    /// Default master for a delay mode
    pub fn for_mode(low_delay: bool) -> Arc<Self> {
        if low_delay { Self::low_delay() } else { Self::standard() }
    }

    /// Coefficients
    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    /// Round-trip delay in hops
    pub fn delay_hops(&self) -> usize {
        self.delay_hops
    }

    /// True if the table is built for the low-delay inverse transform
    pub fn is_low_delay(&self) -> bool {
        self.low_delay
    }

    /// Design a master whose support covers the first `span` hops.
    ///
    /// Even spans suit the normal inverse transform, odd spans the
    /// low-delay one. Delay is `span - 1` hops either way.
    fn design(span: usize) -> Self {
        debug_assert!((2..=TOTAL_HOPS).contains(&span));
        log::trace!("designing {span}-hop master prototype");

        let shape = power_complementary_lowpass(span);
        let mut taps = vec![0.0; TOTAL_HOPS * MASTER_HOP];

        // Paraunitary sequences have even length; odd spans drop the
        // outermost hop of each polyphase component.
        let first = span % 2;
        let mut component = vec![0.0; span - first];

        for m in 0..MASTER_HOP / 2 {
            for (c, k) in component.iter_mut().zip(first..span) {
                *c = shape[m + k * MASTER_HOP];
            }
            project_paraunitary(&mut component);
            for (&c, k) in component.iter().zip(first..span) {
                taps[m + k * MASTER_HOP] = c;
                taps[(MASTER_HOP - 1 - m) + (span - 1 - k) * MASTER_HOP] = c;
            }
        }

        Self {
            taps,
            delay_hops: span - 1,
            low_delay: span % 2 == 1,
        }
    }
}

/// Meyer transition polynomial, `nu(x) + nu(1 - x) = 1` on [0, 1]
fn meyer_nu(x: f64) -> f64 {
    x.powi(4) * (35.0 - 84.0 * x + 70.0 * x * x - 20.0 * x.powi(3))
}

/// Symmetric lowpass of `span` hops at the master hop length.
///
/// The response is `cos(pi/2 * nu(w / bin))` for `w` below one bin
/// (`pi / MASTER_HOP`) and zero above, integrated numerically.
fn power_complementary_lowpass(span: usize) -> Vec<f64> {
    let len = span * MASTER_HOP;
    let centre = (len - 1) as f64 / 2.0;

    let points: Vec<(f64, f64)> = (0..DESIGN_POINTS)
        .map(|q| {
            let x = (q as f64 + 0.5) / DESIGN_POINTS as f64;
            (PI * x, (0.5 * PI * meyer_nu(x)).cos())
        })
        .collect();

    (0..len)
        .map(|n| {
            let t = (n as f64 - centre) / MASTER_HOP as f64;
            points.iter().map(|&(w, gain)| gain * (w * t).cos()).sum::<f64>() / DESIGN_POINTS as f64
        })
        .collect()
}

/// Replace an even-length sequence with the closest sequence orthogonal
/// to its own even shifts.
///
/// Pairs `(a[2i], a[2i+1])` form a 2-vector polynomial. Each step rotates
/// the leading vector onto the first axis and delays the second channel,
/// lowering the degree by one. Rebuilding from the recorded angles yields
/// an exactly paraunitary sequence with unit energy.
fn project_paraunitary(coeffs: &mut [f64]) {
    debug_assert!(coeffs.len() % 2 == 0 && !coeffs.is_empty());

    let mut pairs: Vec<[f64; 2]> = coeffs.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
    let mut angles = Vec::with_capacity(pairs.len());

    while pairs.len() > 1 {
        let theta = pairs[0][1].atan2(pairs[0][0]);
        let (s, c) = theta.sin_cos();
        let rotated: Vec<[f64; 2]> = pairs
            .iter()
            .map(|&[x, y]| [c * x + s * y, -s * x + c * y])
            .collect();
        pairs = rotated
            .windows(2)
            .map(|w| [w[0][0], w[1][1]])
            .collect();
        angles.push(theta);
    }

    let theta = pairs[0][1].atan2(pairs[0][0]);
    let mut lattice = vec![[theta.cos(), theta.sin()]];

    for &theta in angles.iter().rev() {
        let (s, c) = theta.sin_cos();
        let degree = lattice.len();
        lattice = (0..=degree)
            .map(|i| {
                let x = if i < degree { lattice[i][0] } else { 0.0 };
                let y = if i > 0 { lattice[i - 1][1] } else { 0.0 };
                [c * x - s * y, s * x + c * y]
            })
            .collect();
    }

    for (dst, src) in coeffs.chunks_exact_mut(2).zip(&lattice) {
        dst[0] = src[0];
        dst[1] = src[1];
    }
}

/// Analysis and synthesis taps for one `(hop size, delay mode)` pair.
///
/// Synthesis taps are the decimated master scaled by `1/sqrt(2·Σh²)`;
/// analysis taps are the same sequence time-reversed. The scale absorbs
/// the unnormalised inverse FFT.
#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeFilterSet {
    analysis: Vec<f32>,
    synthesis: Vec<f32>,
    hop_size: HopSize,
    low_delay: bool,
    delay_hops: usize,
    gain: f64,
}

impl PrototypeFilterSet {
    /// Derive from the default master for the mode.
    pub fn new(hop_size: usize, low_delay: bool) -> FilterbankResult<Self> {
        let hop = HopSize::new(hop_size)?;
        Ok(Self::derive(&MasterPrototype::for_mode(low_delay), hop))
    }

    /// Decimate, normalise and reverse a master table. The delay mode
    /// follows the table.
    pub fn derive(master: &MasterPrototype, hop_size: HopSize) -> Self {
        let low_delay = master.is_low_delay();
        let factor = hop_size.decimation();
        let taps = master.taps();

        // Mid-point of each decimation cell keeps the master's symmetry.
        let decimated: Vec<f64> = (0..hop_size.filter_len())
            .map(|n| {
                if factor == 1 {
                    taps[n]
                } else {
                    let base = n * factor + factor / 2;
                    0.5 * (taps[base - 1] + taps[base])
                }
            })
            .collect();

        let energy: f64 = decimated.iter().map(|h| h * h).sum();
        let gain = 1.0 / (2.0 * energy).sqrt();

        let synthesis: Vec<f32> = decimated.iter().map(|&h| (h * gain) as f32).collect();
        let analysis: Vec<f32> = synthesis.iter().rev().copied().collect();

        log::trace!(
            "prototype derived: hop={hop_size}, low_delay={low_delay}, decimation={factor}, gain={gain:.6e}"
        );

        Self {
            analysis,
            synthesis,
            hop_size,
            low_delay,
            delay_hops: master.delay_hops(),
            gain,
        }
    }

    /// Full analysis taps (`TOTAL_HOPS × hop`)
    pub fn analysis_taps(&self) -> &[f32] {
        &self.analysis
    }

    /// Full synthesis taps (`TOTAL_HOPS × hop`)
    pub fn synthesis_taps(&self) -> &[f32] {
        &self.synthesis
    }

    /// Hop-length segment `k` of the analysis taps
    #[inline]
    pub fn analysis_segment(&self, k: usize) -> &[f32] {
        let hop = self.hop_size.samples();
        &self.analysis[k * hop..(k + 1) * hop]
    }

    /// Hop-length segment `k` of the synthesis taps
    #[inline]
    pub fn synthesis_segment(&self, k: usize) -> &[f32] {
        let hop = self.hop_size.samples();
        &self.synthesis[k * hop..(k + 1) * hop]
    }

    pub fn hop_size(&self) -> HopSize {
        self.hop_size
    }

    pub fn is_low_delay(&self) -> bool {
        self.low_delay
    }

    /// Round-trip delay in hops (without the hybrid stage)
    pub fn delay_hops(&self) -> usize {
        self.delay_hops
    }

    /// Normalisation constant applied to the decimated master
    pub fn gain(&self) -> f64 {
        self.gain
    }
}
