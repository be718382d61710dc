//! Deterministic harmonic source-filter vocoder.
//!
//! Sums the harmonics of F0 with amplitudes read off the mel envelope. It has
//! no trained weights and sounds synthetic, but it honours the vocoder
//! contract and renders pitch edits audibly, which makes it the built-in
//! backend for the command line tool and for tests.

use std::f32::consts::TAU;
use std::sync::Arc;

use super::model::{ModelBundle, ModelLoader};
use super::Vocoder;
use crate::audio::mel::{hz_to_mel, mel_to_hz};
use crate::audio::MelSlice;
use crate::config::AnalysisConfig;
use crate::error::{EngineError, Result};

const MAX_HARMONICS: usize = 48;

pub struct HarmonicVocoder {
    sample_rate: f32,
    hop: usize,
    /// Center frequency of each mel band.
    centers: Vec<f32>,
    /// Converts a band's linear mel energy back to a sinusoid amplitude.
    gains: Vec<f32>,
}

impl HarmonicVocoder {
    pub fn new(config: &AnalysisConfig) -> Self {
        let fmax = config.fmax.min(config.sample_rate as f32 / 2.0);
        let mel_min = hz_to_mel(config.fmin);
        let mel_max = hz_to_mel(fmax);
        let n = config.num_mels;
        let edges: Vec<f32> = (0..n + 2)
            .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n + 1) as f32))
            .collect();

        let win = config.win_size.min(config.fft_size) as f32;
        let centers = edges[1..=n].to_vec();
        // A sinusoid of amplitude A peaks at A·win/4 under a Hann window;
        // the Slaney filter then weighs it by 2 / bandwidth.
        let gains = (0..n)
            .map(|m| {
                let bandwidth = (edges[m + 2] - edges[m]).max(1e-3);
                4.0 * bandwidth / (2.0 * win)
            })
            .collect();

        Self {
            sample_rate: config.sample_rate as f32,
            hop: config.hop_size,
            centers,
            gains,
        }
    }

    /// Amplitude of a sinusoid at `freq` according to one mel frame.
    fn envelope(&self, log_mel: &[f32], freq: f32) -> f32 {
        let idx = self.centers.partition_point(|&c| c < freq);
        let amp = |m: usize| log_mel[m].exp() * self.gains[m];
        if idx == 0 {
            return amp(0);
        }
        if idx >= self.centers.len() {
            return amp(self.centers.len() - 1);
        }
        let (lo, hi) = (self.centers[idx - 1], self.centers[idx]);
        let t = (freq - lo) / (hi - lo).max(1e-6);
        amp(idx - 1) * (1.0 - t) + amp(idx) * t
    }
}

impl Vocoder for HarmonicVocoder {
    fn synthesize(&self, mel: MelSlice<'_>, f0_hz: &[f32]) -> Result<Vec<f32>> {
        let frames = mel.frames();
        if mel.num_mels != self.centers.len() {
            return Err(EngineError::SynthesisFailure(format!(
                "expected {} mel bands, got {}",
                self.centers.len(),
                mel.num_mels
            )));
        }

        let nyquist = self.sample_rate / 2.0;
        let mut out = vec![0.0f32; frames * self.hop];
        let mut phase = 0.0f32;

        for frame in 0..frames {
            let f0 = f0_hz[frame];
            let next = f0_hz.get(frame + 1).copied().unwrap_or(f0);
            if f0 <= 0.0 {
                continue;
            }

            let log_mel = mel.frame(frame);
            let harmonics = ((nyquist / f0) as usize).clamp(1, MAX_HARMONICS);
            let amps: Vec<f32> = (1..=harmonics)
                .map(|k| self.envelope(log_mel, k as f32 * f0))
                .collect();

            for n in 0..self.hop {
                let t = n as f32 / self.hop as f32;
                let freq = if next > 0.0 { f0 + (next - f0) * t } else { f0 };
                phase = (phase + freq / self.sample_rate).fract();
                let sample: f32 = amps
                    .iter()
                    .enumerate()
                    .map(|(k, a)| a * (TAU * (k + 1) as f32 * phase).sin())
                    .sum();
                out[frame * self.hop + n] = sample;
            }
        }
        Ok(out)
    }
}

/// Builds a [`HarmonicVocoder`] from a model directory's configuration. The
/// checkpoint only has to be readable.
pub struct HarmonicLoader;

impl ModelLoader for HarmonicLoader {
    fn load(&self, bundle: &ModelBundle) -> Result<Arc<dyn Vocoder>> {
        std::fs::metadata(&bundle.checkpoint)?;
        Ok(Arc::new(HarmonicVocoder::new(&AnalysisConfig::from(&bundle.config))))
    }
}
