use std::sync::Arc;

use super::decode::Waveform;
use super::mel::{self, MelSpectrogram};
use super::pitch::{self, NsdfTracker, PitchTracker};
use crate::config::AnalysisConfig;
use crate::error::{EngineError, Result};

/// Per-frame features of one recording. `mel.frames() == f0.len()`.
#[derive(Clone, Debug)]
pub struct Features {
    pub mel: MelSpectrogram,
    /// Pitch in MIDI note numbers, `NaN` where unvoiced.
    pub f0: Vec<f32>,
    pub analysis: AnalysisConfig,
}

impl Features {
    pub fn frames(&self) -> usize {
        self.f0.len()
    }
}

/// Turns a waveform into a mel spectrogram and an F0 curve on the same frame grid.
pub struct FeatureExtractor {
    config: AnalysisConfig,
    tracker: Arc<dyn PitchTracker>,
}

impl FeatureExtractor {
    pub fn new(config: AnalysisConfig) -> Self {
        let tracker = NsdfTracker::new(config.f0_min, config.f0_max);
        Self {
            config,
            tracker: Arc::new(tracker),
        }
    }

    /// Use a different F0 backend.
    pub fn with_tracker(mut self, tracker: Arc<dyn PitchTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn extract(&self, waveform: &Waveform) -> Result<Features> {
        if waveform.is_empty() {
            return Err(EngineError::InvalidAudio("waveform is empty".into()));
        }
        if waveform.samples.iter().any(|s| !s.is_finite()) {
            return Err(EngineError::InvalidAudio("waveform contains non-finite samples".into()));
        }
        let cfg = &self.config;
        if cfg.hop_size == 0 || cfg.fft_size == 0 || cfg.win_size == 0 || cfg.num_mels == 0 {
            return Err(EngineError::ConfigMismatch(format!(
                "analysis grid is degenerate (hop {}, fft {}, win {}, {} mels)",
                cfg.hop_size, cfg.fft_size, cfg.win_size, cfg.num_mels
            )));
        }
        if waveform.sample_rate != self.config.sample_rate {
            return Err(EngineError::ConfigMismatch(format!(
                "audio is {}Hz but analysis runs at {}Hz",
                waveform.sample_rate, self.config.sample_rate
            )));
        }

        let hop = self.config.hop_size;
        let frames = mel::frame_count(waveform.len(), hop);

        let mel = mel::mel_spectrogram(&waveform.samples, &self.config);
        let raw_f0 = self
            .tracker
            .track(&waveform.samples, waveform.sample_rate, hop, frames)?;

        let mut f0: Vec<f32> = raw_f0.iter().map(|&hz| pitch::hz_to_midi(hz)).collect();
        // Trackers may run on their own grid; align to the mel frames.
        f0.resize(frames, f32::NAN);
        if self.config.interpolate_unvoiced {
            pitch::interpolate_unvoiced(&mut f0);
        }

        let voiced = f0.iter().filter(|v| !v.is_nan()).count();
        log::info!(
            "Extracted {} frames ({:.1} frames/s), {} voiced",
            frames,
            self.config.frame_rate(),
            voiced
        );

        Ok(Features {
            mel,
            f0,
            analysis: self.config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTracker(Vec<f32>);

    impl PitchTracker for FixedTracker {
        fn track(&self, _: &[f32], _: u32, _: usize, _: usize) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            sample_rate: 16000,
            fft_size: 512,
            win_size: 512,
            hop_size: 160,
            num_mels: 32,
            fmax: 8000.0,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn lengths_agree() {
        let samples: Vec<f32> = (0..16000).map(|i| (i as f32 * 0.1).sin() * 0.3).collect();
        let wave = Waveform::new(samples, 16000).unwrap();
        let features = FeatureExtractor::new(config()).extract(&wave).unwrap();
        assert_eq!(features.mel.frames(), 100);
        assert_eq!(features.f0.len(), 100);
    }

    #[test]
    fn deterministic() {
        let samples: Vec<f32> = (0..8000).map(|i| (i as f32 * 0.07).sin() * 0.3).collect();
        let wave = Waveform::new(samples, 16000).unwrap();
        let extractor = FeatureExtractor::new(config());
        let a = extractor.extract(&wave).unwrap();
        let b = extractor.extract(&wave).unwrap();
        assert_eq!(a.mel, b.mel);
        assert_eq!(
            a.f0.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            b.f0.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn sample_rate_mismatch_is_config_error() {
        let wave = Waveform::new(vec![0.1; 4410], 44100).unwrap();
        let err = FeatureExtractor::new(config()).extract(&wave).unwrap_err();
        assert!(matches!(err, EngineError::ConfigMismatch(_)));
    }

    #[test]
    fn zero_hop_is_config_error() {
        let wave = Waveform::new(vec![0.1; 1600], 16000).unwrap();
        let cfg = AnalysisConfig {
            hop_size: 0,
            ..config()
        };
        let err = FeatureExtractor::new(cfg).extract(&wave).unwrap_err();
        assert!(matches!(err, EngineError::ConfigMismatch(_)));
    }

    #[test]
    fn tracker_output_is_aligned_and_interpolated() {
        let wave = Waveform::new(vec![0.1; 1600], 16000).unwrap();
        let extractor = FeatureExtractor::new(config())
            .with_tracker(Arc::new(FixedTracker(vec![0.0, 440.0, 0.0, 880.0])));
        let features = extractor.extract(&wave).unwrap();
        assert_eq!(features.f0.len(), 10);
        assert!((features.f0[0] - 69.0).abs() < 1e-4);
        assert!((features.f0[2] - 75.0).abs() < 1e-4);
        assert!((features.f0[9] - 81.0).abs() < 1e-4);
    }

    #[test]
    fn unvoiced_stays_nan_without_interpolation() {
        let wave = Waveform::new(vec![0.1; 1600], 16000).unwrap();
        let mut cfg = config();
        cfg.interpolate_unvoiced = false;
        let extractor = FeatureExtractor::new(cfg)
            .with_tracker(Arc::new(FixedTracker(vec![440.0, 0.0])));
        let features = extractor.extract(&wave).unwrap();
        assert!(!features.f0[0].is_nan());
        assert!(features.f0[1..].iter().all(|v| v.is_nan()));
    }
}
