//! Adapter around an opaque neural vocoder: mel + F0 in, waveform out.

pub mod harmonic;
pub mod model;

use parking_lot::RwLock;

use crate::audio::pitch::midi_to_hz;
use crate::audio::MelSlice;
use crate::config::AnalysisConfig;
use crate::error::{EngineError, Result};

pub use harmonic::{HarmonicLoader, HarmonicVocoder};
pub use model::{load_model, BoundModel, ModelBundle, ModelConfig, ModelLoader};

/// A model that reconstructs audio from frame-aligned mel and F0 (Hz, `0.0`
/// unvoiced). Implementations must not carry state between calls and should
/// return `frames * hop_size` samples.
pub trait Vocoder: Send + Sync {
    fn synthesize(&self, mel: MelSlice<'_>, f0_hz: &[f32]) -> Result<Vec<f32>>;
}

/// Validates calls into the bound vocoder and its output. The model can be
/// swapped at runtime; calls already running keep the model they started with.
#[derive(Default)]
pub struct VocoderAdapter {
    model: RwLock<Option<BoundModel>>,
}

impl VocoderAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: BoundModel) -> Self {
        Self {
            model: RwLock::new(Some(model)),
        }
    }

    pub fn bind(&self, model: BoundModel) {
        log::info!(
            "Bound vocoder ({}Hz, hop {}, {} mels)",
            model.config.audio_sample_rate,
            model.config.hop_size,
            model.config.audio_num_mel_bins
        );
        *self.model.write() = Some(model);
    }

    pub fn is_loaded(&self) -> bool {
        self.model.read().is_some()
    }

    /// Analysis settings implied by the bound model.
    pub fn analysis(&self) -> Result<AnalysisConfig> {
        self.model
            .read()
            .as_ref()
            .map(BoundModel::analysis)
            .ok_or(EngineError::ModelNotLoaded)
    }

    /// Fail unless features computed under `analysis` fit the bound model.
    pub fn check_compatible(&self, analysis: &AnalysisConfig) -> Result<()> {
        let expected = self.analysis()?;
        if !expected.is_frame_compatible(analysis) {
            return Err(EngineError::ConfigMismatch(format!(
                "track features are {}Hz/hop {}/{} mels, model expects {}Hz/hop {}/{} mels",
                analysis.sample_rate,
                analysis.hop_size,
                analysis.num_mels,
                expected.sample_rate,
                expected.hop_size,
                expected.num_mels
            )));
        }
        Ok(())
    }

    /// Synthesize one padded segment. `f0_midi` is in MIDI note numbers with
    /// `NaN` for unvoiced frames.
    pub fn synthesize(&self, mel: MelSlice<'_>, f0_midi: &[f32]) -> Result<Vec<f32>> {
        let (vocoder, hop, num_mels) = {
            let guard = self.model.read();
            let model = guard.as_ref().ok_or(EngineError::ModelNotLoaded)?;
            (
                model.vocoder.clone(),
                model.config.hop_size,
                model.config.audio_num_mel_bins,
            )
        };

        let frames = mel.frames();
        if frames != f0_midi.len() {
            return Err(EngineError::ShapeMismatch {
                expected: frames,
                actual: f0_midi.len(),
            });
        }
        if mel.num_mels != num_mels {
            return Err(EngineError::ConfigMismatch(format!(
                "mel has {} bands, model expects {}",
                mel.num_mels, num_mels
            )));
        }

        let f0_hz: Vec<f32> = f0_midi.iter().map(|&m| midi_to_hz(m)).collect();
        let mut audio = vocoder.synthesize(mel, &f0_hz)?;

        if let Some(pos) = audio.iter().position(|s| !s.is_finite()) {
            return Err(EngineError::SynthesisFailure(format!(
                "non-finite sample at index {} of {}",
                pos,
                audio.len()
            )));
        }

        let expected = frames * hop;
        if audio.len() != expected {
            log::debug!(
                "Vocoder returned {} samples for {} frames, fitting to {}",
                audio.len(),
                frames,
                expected
            );
            audio.resize(expected, 0.0);
        }
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MelSpectrogram;
    use std::sync::Arc;

    struct Echo {
        hop: usize,
        tail: isize,
        poison: bool,
    }

    impl Vocoder for Echo {
        fn synthesize(&self, mel: MelSlice<'_>, f0_hz: &[f32]) -> Result<Vec<f32>> {
            let n = (mel.frames() * self.hop) as isize + self.tail;
            let mut out: Vec<f32> = (0..n.max(0) as usize)
                .map(|i| f0_hz[(i / self.hop).min(f0_hz.len() - 1)] / 1000.0)
                .collect();
            if self.poison {
                out[0] = f32::NAN;
            }
            Ok(out)
        }
    }

    fn model_config() -> ModelConfig {
        ModelConfig {
            audio_sample_rate: 8000,
            hop_size: 4,
            fft_size: 16,
            win_size: None,
            audio_num_mel_bins: 2,
            fmin: 0.0,
            fmax: None,
            f0_min: 40.0,
            f0_max: 1600.0,
        }
    }

    fn adapter(tail: isize, poison: bool) -> VocoderAdapter {
        VocoderAdapter::with_model(BoundModel::new(
            Arc::new(Echo { hop: 4, tail, poison }),
            model_config(),
        ))
    }

    #[test]
    fn unbound_adapter_reports_model_not_loaded() {
        let adapter = VocoderAdapter::new();
        let mel = MelSpectrogram::from_frames(2, vec![0.0; 4]);
        assert!(!adapter.is_loaded());
        assert!(matches!(
            adapter.synthesize(mel.slice(0..2), &[69.0, 69.0]),
            Err(EngineError::ModelNotLoaded)
        ));
    }

    #[test]
    fn converts_midi_to_hz_and_unvoiced_to_zero() {
        let mel = MelSpectrogram::from_frames(2, vec![0.0; 4]);
        let out = adapter(0, false)
            .synthesize(mel.slice(0..2), &[69.0, f32::NAN])
            .unwrap();
        assert_eq!(out.len(), 8);
        assert!((out[0] - 0.44).abs() < 1e-5);
        assert_eq!(out[7], 0.0);
    }

    #[test]
    fn shape_mismatch() {
        let mel = MelSpectrogram::from_frames(2, vec![0.0; 6]);
        let err = adapter(0, false)
            .synthesize(mel.slice(0..3), &[69.0, 69.0])
            .unwrap_err();
        assert!(matches!(err, EngineError::ShapeMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn non_finite_output_is_synthesis_failure() {
        let mel = MelSpectrogram::from_frames(2, vec![0.0; 4]);
        let err = adapter(0, true)
            .synthesize(mel.slice(0..2), &[69.0, 69.0])
            .unwrap_err();
        assert!(matches!(err, EngineError::SynthesisFailure(_)));
    }

    #[test]
    fn output_is_fitted_to_frame_grid() {
        let mel = MelSpectrogram::from_frames(2, vec![0.0; 6]);
        for tail in [-3, 5] {
            let out = adapter(tail, false)
                .synthesize(mel.slice(0..3), &[69.0; 3])
                .unwrap();
            assert_eq!(out.len(), 12);
        }
    }

    #[test]
    fn compatibility_check() {
        let adapter = adapter(0, false);
        let mut analysis = adapter.analysis().unwrap();
        assert!(adapter.check_compatible(&analysis).is_ok());
        analysis.hop_size = 8;
        assert!(matches!(
            adapter.check_compatible(&analysis),
            Err(EngineError::ConfigMismatch(_))
        ));
    }
}
