use std::ops::Range;
use std::sync::Arc;

use super::cache::SynthesisCache;
use super::fingerprint::EditFingerprint;
use super::pitch_edit::{Checkpoint, EditEvent, PitchEditStore};
use super::segment::{covers_exactly, Segment, SegmentId, Segmenter};
use crate::audio::{FeatureExtractor, Features, MelSpectrogram, Waveform};
use crate::config::AnalysisConfig;
use crate::error::{EngineError, Result};

/// One vocal recording with its features, editable pitch, segmentation, and
/// synthesis cache. The waveform and the edited F0 are authoritative; the
/// cache is derived and may be discarded at any time.
pub struct Track {
    pub name: String,
    pub(crate) waveform: Waveform,
    pub(crate) mel: Arc<MelSpectrogram>,
    pub(crate) analysis: AnalysisConfig,
    pub(crate) pitch: PitchEditStore,
    pub(crate) segments: Arc<[Segment]>,
    pub(crate) cache: SynthesisCache,
    /// Pitch state the cache was last brought up to date with.
    pub(crate) synced: Checkpoint,
}

impl Track {
    /// Extract features and segment a freshly loaded recording.
    pub fn load(
        name: impl Into<String>,
        waveform: Waveform,
        extractor: &FeatureExtractor,
        segmenter: &Segmenter,
    ) -> Result<Self> {
        let name = name.into();
        let features = extractor.extract(&waveform)?;
        let segments = segmenter.segment(&waveform.samples, features.analysis.hop_size, features.frames());
        log::info!(
            "Loaded track '{}': {:.1}s, {} frames, {} segment(s)",
            name,
            waveform.duration(),
            features.frames(),
            segments.len()
        );
        Self::from_parts(name, waveform, features, segments)
    }

    /// Assemble a track from precomputed pieces, checking that they agree.
    pub fn from_parts(
        name: impl Into<String>,
        waveform: Waveform,
        features: Features,
        segments: Vec<Segment>,
    ) -> Result<Self> {
        let frames = features.frames();
        if features.mel.frames() != frames {
            return Err(EngineError::ShapeMismatch {
                expected: features.mel.frames(),
                actual: frames,
            });
        }
        if frames == 0 {
            return Err(EngineError::InvalidAudio("track has no frames".into()));
        }
        let cores: Vec<Range<usize>> = segments.iter().map(|s| s.core.clone()).collect();
        if !covers_exactly(&cores, frames) {
            return Err(EngineError::ConfigMismatch(format!(
                "segments do not partition 0..{}",
                frames
            )));
        }
        for (index, seg) in segments.iter().enumerate() {
            if seg.id != SegmentId(index) {
                return Err(EngineError::ConfigMismatch(format!(
                    "segment at position {} has id {}",
                    index, seg.id.0
                )));
            }
            if seg.padded.start > seg.core.start || seg.padded.end < seg.core.end || seg.padded.end > frames {
                return Err(EngineError::ConfigMismatch(format!(
                    "segment {} padding {}..{} does not contain core {}..{} within 0..{}",
                    index, seg.padded.start, seg.padded.end, seg.core.start, seg.core.end, frames
                )));
            }
        }

        let pitch = PitchEditStore::new(features.f0);
        let synced = pitch.checkpoint();
        Ok(Self {
            name: name.into(),
            waveform,
            mel: Arc::new(features.mel),
            analysis: features.analysis,
            pitch,
            segments: segments.into(),
            cache: SynthesisCache::new(),
            synced,
        })
    }

    pub fn frames(&self) -> usize {
        self.pitch.len()
    }

    pub fn hop_size(&self) -> usize {
        self.analysis.hop_size
    }

    /// Length of rendered audio: one hop per frame.
    pub fn total_samples(&self) -> usize {
        self.frames() * self.analysis.hop_size
    }

    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    pub fn analysis(&self) -> &AnalysisConfig {
        &self.analysis
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.0)
    }

    pub fn cache(&self) -> &SynthesisCache {
        &self.cache
    }

    pub fn f0_original(&self) -> &[f32] {
        self.pitch.original()
    }

    /// The current edited curve, e.g. for saving into a project.
    pub fn f0_edited(&self) -> &[f32] {
        self.pitch.edited()
    }

    pub fn pitch(&self) -> &PitchEditStore {
        &self.pitch
    }

    pub fn apply_edit(&mut self, range: Range<usize>, values: &[f32]) -> Result<EditEvent> {
        self.pitch.apply_edit(range, values)
    }

    pub fn reset(&mut self, range: Range<usize>) -> Result<EditEvent> {
        self.pitch.reset(range)
    }

    pub fn shift_all(&mut self, semitones: f32) -> EditEvent {
        self.pitch.shift_all(semitones)
    }

    pub fn seed_f0(&mut self, values: &[f32]) -> EditEvent {
        self.pitch.seed(values)
    }

    /// Fingerprint of the current edited F0 over the segment's padded range.
    pub fn fingerprint(&self, segment: &Segment) -> EditFingerprint {
        EditFingerprint::compute(&segment.padded, self.pitch.edited())
    }

    pub fn is_stale(&self, segment: &Segment) -> bool {
        self.cache.is_stale(segment.id, &self.fingerprint(segment))
    }

    /// Frame ranges edited since the cache was last synchronised.
    pub fn pending_ranges(&self) -> Vec<Range<usize>> {
        self.pitch.dirty_ranges_since(self.synced)
    }

    pub(crate) fn mark_synced(&mut self) {
        self.synced = self.pitch.checkpoint();
        self.pitch.prune(self.synced);
    }
}
