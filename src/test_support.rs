//! Shared fixtures for engine tests: a tiny frame grid and scriptable vocoders.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::{Features, MelSlice, MelSpectrogram, Waveform};
use crate::config::AnalysisConfig;
use crate::engine::segment::segments_from_cores;
use crate::engine::Track;
use crate::error::{EngineError, Result};
use crate::vocoder::{BoundModel, ModelConfig, Vocoder, VocoderAdapter};

pub const HOP: usize = 4;
pub const SAMPLE_RATE: u32 = 8000;
pub const NUM_MELS: usize = 2;
/// Source samples carry this value so fallbacks are recognisable.
pub const SOURCE_LEVEL: f32 = 0.25;

pub fn model_config() -> ModelConfig {
    ModelConfig {
        audio_sample_rate: SAMPLE_RATE,
        hop_size: HOP,
        fft_size: 16,
        win_size: None,
        audio_num_mel_bins: NUM_MELS,
        fmin: 0.0,
        fmax: None,
        f0_min: 40.0,
        f0_max: 1600.0,
    }
}

pub fn analysis() -> AnalysisConfig {
    AnalysisConfig::from(&model_config())
}

/// Constant source audio and flat features at MIDI 60 over `frames` frames.
pub fn features(frames: usize) -> (Waveform, Features) {
    let waveform = Waveform::new(vec![SOURCE_LEVEL; frames * HOP], SAMPLE_RATE).unwrap();
    let features = Features {
        mel: MelSpectrogram::from_frames(NUM_MELS, vec![0.0; frames * NUM_MELS]),
        f0: vec![60.0; frames],
        analysis: analysis(),
    };
    (waveform, features)
}

pub fn track(cores: &[Range<usize>], context: usize) -> Track {
    let frames = cores.last().map_or(0, |c| c.end);
    let (waveform, features) = features(frames);
    let segments = segments_from_cores(cores.to_vec(), context, frames);
    Track::from_parts("test", waveform, features, segments).unwrap()
}

/// Emits, for every frame, `f0_hz / 1000` on each of its samples. Counts
/// calls and can be made slow or made to fail above a pitch.
#[derive(Default)]
pub struct ScriptedVocoder {
    pub calls: AtomicUsize,
    pub frames_rendered: AtomicUsize,
    pub delay: Duration,
    pub fail_above_hz: Option<f32>,
    /// Frame counts of each call, in arrival order.
    pub log: Mutex<Vec<usize>>,
}

impl ScriptedVocoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Vocoder for ScriptedVocoder {
    fn synthesize(&self, mel: MelSlice<'_>, f0_hz: &[f32]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.frames_rendered.fetch_add(mel.frames(), Ordering::SeqCst);
        self.log.lock().push(mel.frames());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(limit) = self.fail_above_hz {
            if f0_hz.iter().any(|&f| f > limit) {
                return Err(EngineError::SynthesisFailure("pitch out of model range".into()));
            }
        }
        Ok(f0_hz
            .iter()
            .flat_map(|&f| std::iter::repeat(f / 1000.0).take(HOP))
            .collect())
    }
}

pub fn adapter(vocoder: Arc<ScriptedVocoder>) -> Arc<VocoderAdapter> {
    Arc::new(VocoderAdapter::with_model(BoundModel::new(vocoder, model_config())))
}
