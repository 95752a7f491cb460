//! Round-trip integration tests
//!
//! forward -> identity routing -> inverse must reproduce the input delayed
//! by `processing_delay()` samples in every mode and on every backend.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tfb_filterbank::{Filterbank, FilterbankConfig, HopSize, SpectralBackend, identity_route};

const TOLERANCE: f32 = 0.01;

/// Uniform noise in [-1, 1)
fn generate_noise(samples: usize, seed: u64) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..samples).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

/// Largest |out[i] - in[i - delay]| over the fully settled region
fn max_aligned_error(input: &[f32], output: &[f32], delay: usize, tail: usize) -> f32 {
    (delay..input.len() - tail)
        .map(|i| (output[i] - input[i - delay]).abs())
        .fold(0.0, f32::max)
}

// ═══════════════════════════════════════════════════════════════════════════════
// MULTICHANNEL HYBRID
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_hybrid_multichannel_round_trip() {
    let config = FilterbankConfig::new(128, 60, 64).unwrap().with_hybrid(true);
    let mut fb = Filterbank::new(config).unwrap();
    let delay = fb.processing_delay();
    assert_eq!(delay, 12 * 128);

    let len = 48000;
    let mut input = vec![vec![0.0f32; len]; 60];
    input[0] = generate_noise(len, 7);

    let output = fb.process_signal(&input, identity_route).unwrap();
    assert_eq!(output.len(), 64);

    let error = max_aligned_error(&input[0], &output[0], delay, 512);
    assert!(error <= TOLERANCE, "max error {error}");

    // Silent inputs and unrouted outputs stay silent
    assert!(output[1].iter().all(|&x| x.abs() < 1e-6));
    assert!(output[63].iter().all(|&x| x == 0.0));
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODES AND BACKENDS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_round_trip_all_modes() {
    let input = vec![generate_noise(8192, 11), generate_noise(8192, 12)];

    for backend in [SpectralBackend::RealFft, SpectralBackend::ComplexFft] {
        for low_delay in [false, true] {
            for hybrid in [false, true] {
                let config = FilterbankConfig::new(64, 2, 2)
                    .unwrap()
                    .with_low_delay(low_delay)
                    .with_hybrid(hybrid)
                    .with_backend(backend);
                let mut fb = Filterbank::new(config).unwrap();
                let delay = fb.processing_delay();
                let output = fb.process_signal(&input, identity_route).unwrap();

                for ch in 0..2 {
                    let error = max_aligned_error(&input[ch], &output[ch], delay, 0);
                    assert!(
                        error <= TOLERANCE,
                        "backend={backend}, low_delay={low_delay}, hybrid={hybrid}, ch={ch}: {error}"
                    );
                }
            }
        }
    }
}

#[test]
fn test_round_trip_every_hop_size() {
    for hop in HopSize::ALL {
        let config = FilterbankConfig::default().with_hop_size(hop);
        let mut fb = Filterbank::new(config).unwrap();
        let delay = fb.processing_delay();

        let input = vec![generate_noise(delay + 8 * hop.samples(), hop.samples() as u64)];
        let output = fb.process_signal(&input, identity_route).unwrap();

        let error = max_aligned_error(&input[0], &output[0], delay, 0);
        assert!(error <= TOLERANCE, "hop={hop}: {error}");
    }
}

#[test]
fn test_block_streaming_matches_process_signal() {
    let config = FilterbankConfig::low_latency();
    let hop = config.hop_size.samples();
    let input = generate_noise(hop * 20, 3);

    let mut whole = Filterbank::new(config.clone()).unwrap();
    let expected = whole.process_signal(&[&input[..]], identity_route).unwrap();

    let mut streaming = Filterbank::new(config).unwrap();
    let mut spectra = streaming.analysis_frame();
    let mut block = [vec![0.0f32; hop]];
    let mut output = Vec::new();
    for chunk in input.chunks_exact(hop) {
        streaming.forward(&[chunk], &mut spectra).unwrap();
        streaming.inverse(&spectra, &mut block).unwrap();
        output.extend_from_slice(&block[0]);
    }

    assert_eq!(output, expected[0]);
}
