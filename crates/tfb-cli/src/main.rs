//! Filterbank command-line tools
//!
//! Usage:
//!   tfb info [--json]              - Band layout, delay, centre frequencies
//!   tfb roundtrip IN.wav OUT.wav   - Analysis + synthesis, delay-compensated
//!   tfb bands IN.wav [--json]      - Mean energy per band

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use tfb_filterbank::{Filterbank, FilterbankConfig, HopSize, SpectralBackend, identity_route};

#[derive(Parser)]
#[command(name = "tfb", about = "Hybrid time-frequency filterbank tools", version)]
struct Cli {
    /// Debug logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print band count, processing delay and centre frequencies
    Info {
        #[command(flatten)]
        filterbank: FilterbankArgs,
        /// Sample rate used for frequencies and delay in ms
        #[arg(long, default_value_t = 48000.0)]
        sample_rate: f32,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a WAV file through forward and inverse transforms
    Roundtrip {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        filterbank: FilterbankArgs,
    },
    /// Mean energy per band of a WAV file, summed over channels
    Bands {
        input: PathBuf,
        #[command(flatten)]
        filterbank: FilterbankArgs,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone)]
struct FilterbankArgs {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Hop size in samples (32, 64, 128, 256, 512, 1024)
    #[arg(long)]
    hop: Option<usize>,
    /// Use the low-delay prototype
    #[arg(long)]
    low_delay: bool,
    /// Split the lowest bands with the hybrid stage
    #[arg(long)]
    hybrid: bool,
    /// FFT backend (realfft, complex)
    #[arg(long)]
    backend: Option<SpectralBackend>,
}

impl FilterbankArgs {
    fn to_config(&self, in_channels: usize, out_channels: usize) -> Result<FilterbankConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => FilterbankConfig::default(),
        };

        if let Some(hop) = self.hop {
            config = config.with_hop_size(HopSize::new(hop)?);
        }
        if self.low_delay {
            config = config.with_low_delay(true);
        }
        if self.hybrid {
            config = config.with_hybrid(true);
        }
        if let Some(backend) = self.backend {
            config = config.with_backend(backend);
        }

        let config = config.with_channels(in_channels, out_channels);
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match cli.command {
        Commands::Info {
            filterbank,
            sample_rate,
            json,
        } => info(&filterbank, sample_rate, json),
        Commands::Roundtrip {
            input,
            output,
            filterbank,
        } => roundtrip(&input, &output, &filterbank),
        Commands::Bands {
            input,
            filterbank,
            json,
        } => bands(&input, &filterbank, json),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFO
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct InfoReport {
    hop_size: usize,
    bands: usize,
    low_delay: bool,
    hybrid: bool,
    backend: String,
    processing_delay_samples: usize,
    processing_delay_ms: f32,
    centre_frequencies_hz: Vec<f32>,
}

fn info(args: &FilterbankArgs, sample_rate: f32, json: bool) -> Result<()> {
    if sample_rate <= 0.0 {
        bail!("Sample rate must be positive, got {sample_rate}");
    }

    let fb = Filterbank::new(args.to_config(1, 1)?)?;
    let delay = fb.processing_delay();
    let report = InfoReport {
        hop_size: fb.hop_size(),
        bands: fb.num_bands(),
        low_delay: fb.is_low_delay(),
        hybrid: fb.is_hybrid(),
        backend: fb.engine_name().to_string(),
        processing_delay_samples: delay,
        processing_delay_ms: delay as f32 * 1000.0 / sample_rate,
        centre_frequencies_hz: fb.centre_frequencies(sample_rate),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Hop size:         {}", report.hop_size);
    println!("Bands:            {}", report.bands);
    println!("Low delay:        {}", report.low_delay);
    println!("Hybrid:           {}", report.hybrid);
    println!("Backend:          {}", report.backend);
    println!(
        "Processing delay: {} samples ({:.2} ms @ {} Hz)",
        report.processing_delay_samples, report.processing_delay_ms, sample_rate
    );
    println!();
    println!("{:>5}  {:>12}", "band", "centre (Hz)");
    for (band, freq) in report.centre_frequencies_hz.iter().enumerate() {
        println!("{band:>5}  {freq:>12.2}");
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUNDTRIP
// ═══════════════════════════════════════════════════════════════════════════════

fn roundtrip(input: &Path, output: &Path, args: &FilterbankArgs) -> Result<()> {
    let audio = read_wav(input)?;
    let channels = audio.channels.len();
    let mut fb = Filterbank::new(args.to_config(channels, channels)?)?;
    let delay = fb.processing_delay();

    log::info!(
        "Round trip: {} ch, {} samples, hop {}, delay {} samples",
        channels,
        audio.len(),
        fb.hop_size(),
        delay
    );

    // Pad the tail by the delay so the aligned output covers the whole input
    let padded: Vec<Vec<f32>> = audio
        .channels
        .iter()
        .map(|signal| {
            let mut padded = signal.clone();
            padded.resize(signal.len() + delay, 0.0);
            padded
        })
        .collect();

    let processed = fb.process_signal(&padded, identity_route)?;
    let aligned = compensate_delay(processed, delay, audio.len());

    let max_error = audio
        .channels
        .iter()
        .zip(&aligned)
        .flat_map(|(x, y)| x.iter().zip(y).map(|(a, b)| (a - b).abs()))
        .fold(0.0f32, f32::max);

    write_wav(
        output,
        &AudioData {
            channels: aligned,
            sample_rate: audio.sample_rate,
        },
    )?;

    println!("Max reconstruction error: {max_error:.3e}");
    Ok(())
}

/// Drop the first `delay` samples of each signal and keep `len`
fn compensate_delay(signals: Vec<Vec<f32>>, delay: usize, len: usize) -> Vec<Vec<f32>> {
    signals
        .into_iter()
        .map(|signal| signal.into_iter().skip(delay).take(len).collect())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// BANDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct BandEnergy {
    band: usize,
    centre_hz: f32,
    energy: f32,
}

fn bands(input: &Path, args: &FilterbankArgs, json: bool) -> Result<()> {
    let audio = read_wav(input)?;
    let mut fb = Filterbank::new(args.to_config(audio.channels.len(), 0)?)?;
    let hop = fb.hop_size();
    let frames = audio.len().div_ceil(hop);

    let mut spectra = fb.analysis_frame();
    let mut block = vec![vec![0.0f32; hop]; audio.channels.len()];
    let mut energy = vec![0.0f32; fb.num_bands()];

    for n in 0..frames {
        let start = n * hop;
        let end = (start + hop).min(audio.len());
        for (dst, signal) in block.iter_mut().zip(&audio.channels) {
            dst.fill(0.0);
            dst[..end - start].copy_from_slice(&signal[start..end]);
        }
        fb.forward(&block, &mut spectra)?;
        for (e, band) in energy.iter_mut().zip(spectra.band_energy()) {
            *e += band;
        }
    }

    let scale = if frames > 0 { 1.0 / frames as f32 } else { 0.0 };
    let report: Vec<BandEnergy> = fb
        .centre_frequencies(audio.sample_rate as f32)
        .into_iter()
        .zip(energy)
        .enumerate()
        .map(|(band, (centre_hz, energy))| BandEnergy {
            band,
            centre_hz,
            energy: energy * scale,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{:>5}  {:>12}  {:>14}", "band", "centre (Hz)", "mean energy");
    for row in &report {
        println!("{:>5}  {:>12.2}  {:>14.6e}", row.band, row.centre_hz, row.energy);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAV I/O
// ═══════════════════════════════════════════════════════════════════════════════

/// Deinterleaved audio
struct AudioData {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioData {
    /// Samples per channel
    fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

fn read_wav(path: &Path) -> Result<AudioData> {
    let reader =
        hound::WavReader::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<Vec<f32>, _>>()
        }
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<f32>, _>>(),
    }
    .with_context(|| format!("Failed to decode {}", path.display()))?;

    Ok(AudioData {
        channels: deinterleave(&interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

fn write_wav(path: &Path, audio: &AudioData) -> Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels.len() as u16,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for i in 0..audio.len() {
        for channel in &audio.channels {
            writer.write_sample(channel[i])?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }
    let mut out = vec![Vec::with_capacity(samples.len() / channels); channels];
    for frame in samples.chunks_exact(channels) {
        for (signal, &sample) in out.iter_mut().zip(frame) {
            signal.push(sample);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave() {
        let out = deinterleave(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2);
        assert_eq!(out, vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]]);
        assert!(deinterleave(&[1.0], 0).is_empty());
    }

    #[test]
    fn test_compensate_delay() {
        let out = compensate_delay(vec![vec![0.0, 0.0, 1.0, 2.0, 3.0]], 2, 2);
        assert_eq!(out, vec![vec![1.0, 2.0]]);
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = FilterbankArgs {
            config: None,
            hop: Some(256),
            low_delay: true,
            hybrid: false,
            backend: Some(SpectralBackend::ComplexFft),
        };
        let config = args.to_config(2, 3).unwrap();
        assert_eq!(config.hop_size.samples(), 256);
        assert!(config.low_delay);
        assert_eq!(config.backend, SpectralBackend::ComplexFft);
        assert_eq!((config.in_channels, config.out_channels), (2, 3));

        let bad = FilterbankArgs { hop: Some(100), ..args };
        assert!(bad.to_config(1, 1).is_err());
    }
}
