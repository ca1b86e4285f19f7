use std::path::Path;

use anyhow::{Context, bail};
use hound::{SampleFormat, WavReader};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters};

/// Mono audio samples with their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Signal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Resamples to the given rate. A no-op when the rates already match.
    ///
    /// The result holds `round(len * target_sr / sample_rate)` samples aligned
    /// with the input, the resampler delay removed.
    pub fn resample(self, target_sr: u32) -> anyhow::Result<Signal> {
        if self.sample_rate == target_sr || self.samples.is_empty() {
            return Ok(Signal::new(self.samples, target_sr));
        }

        let ratio = target_sr as f64 / self.sample_rate as f64;
        let expected = (self.samples.len() as f64 * ratio).round() as usize;

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: rubato::SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: rubato::WindowFunction::BlackmanHarris2,
        };

        let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, self.samples.len(), 1)?;
        let delay = resampler.output_delay();

        let waves_in = vec![self.samples];
        let mut samples = resampler
            .process(&waves_in, None)?
            .into_iter()
            .next()
            .context("resampler returned no channels")?;

        // flush the delay line
        while samples.len() < delay + expected {
            let tail = resampler
                .process_partial(None::<&[Vec<f32>]>, None)?
                .into_iter()
                .next()
                .context("resampler returned no channels")?;
            if tail.is_empty() {
                break;
            }
            samples.extend(tail);
        }

        samples.drain(..delay.min(samples.len()));
        samples.resize(expected, 0.0);
        Ok(Signal::new(samples, target_sr))
    }
}

/// Decodes an audio file into a mono signal.
pub trait AudioLoader {
    fn load(&self, path: &Path) -> anyhow::Result<Signal>;
}

/// Reads WAV files, averaging all channels down to mono.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavLoader;

impl AudioLoader for WavLoader {
    fn load(&self, path: &Path) -> anyhow::Result<Signal> {
        let mut reader = WavReader::open(path)
            .with_context(|| format!("failed to open wav file {}", path.display()))?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            bail!("wav file {} has no channels", path.display());
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok(Signal::new(samples, spec.sample_rate))
    }
}
