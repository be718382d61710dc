//! Incremental resynthesis: re-render only the segments an edit touched and
//! stitch cached and fresh audio back into one waveform.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::f32::consts::FRAC_PI_2;
use std::ops::Range;
use std::sync::Arc;

use rayon::prelude::*;

use super::cache::{CachedSegment, Generation};
use super::fingerprint::EditFingerprint;
use super::segment::{Segment, SegmentId};
use super::track::Track;
use crate::audio::MelSpectrogram;
use crate::config::{CrossfadeShape, SynthesisConfig};
use crate::error::{EngineError, Result, SegmentFailure};
use crate::vocoder::VocoderAdapter;

/// Output of one resynthesis pass.
#[derive(Debug)]
pub struct Rendered {
    /// The full track, `total_frames * hop_size` samples.
    pub samples: Vec<f32>,
    /// Segments whose audio was produced by this pass.
    pub resynthesized: Vec<SegmentId>,
    /// Segments that failed and were filled from an older render or the source.
    pub failures: Vec<SegmentFailure>,
}

impl Rendered {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The failures as a single error, if there were any.
    pub fn partial_failure(&self) -> Option<EngineError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(EngineError::PartialSynthesisFailure {
                failed: self.failures.clone(),
            })
        }
    }
}

/// Everything needed to render one segment, detached from the track so it
/// can run on a worker thread.
pub struct SegmentJob {
    pub id: SegmentId,
    pub generation: Generation,
    pub fingerprint: EditFingerprint,
    core: Range<usize>,
    padded: Range<usize>,
    hop: usize,
    mel: Arc<MelSpectrogram>,
    /// Edited F0 over the padded range.
    f0: Vec<f32>,
}

pub struct Resynthesizer {
    adapter: Arc<VocoderAdapter>,
    pool: rayon::ThreadPool,
    config: SynthesisConfig,
}

impl Resynthesizer {
    pub fn new(adapter: Arc<VocoderAdapter>, config: SynthesisConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("vocoder-{}", i))
            .build()
            .map_err(|e| EngineError::Config(format!("cannot start vocoder workers: {}", e)))?;
        Ok(Self {
            adapter,
            pool,
            config,
        })
    }

    pub fn adapter(&self) -> &Arc<VocoderAdapter> {
        &self.adapter
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    pub(crate) fn pool(&self) -> &rayon::ThreadPool {
        &self.pool
    }

    /// Half the crossfade length in samples.
    fn half_crossfade(&self, hop: usize) -> usize {
        self.config.crossfade_frames * hop / 2
    }

    /// Bring the track's audio up to date with its edited F0 and return the
    /// whole rendered track.
    ///
    /// Segments whose padded range intersects `edited`, together with any
    /// segment whose cached audio no longer matches the current pitch, are
    /// resynthesized in parallel. A segment whose cache already matches is
    /// skipped even when an edited range touches it, so repeating a call
    /// without new edits never reaches the vocoder.
    ///
    /// A segment that fails keeps its previous audio (or the source
    /// recording) and is reported in [`Rendered::failures`]; an unbound or
    /// incompatible model fails the whole call.
    pub fn resynthesize(&self, track: &mut Track, edited: &[Range<usize>]) -> Result<Rendered> {
        self.adapter.check_compatible(&track.analysis)?;

        let ids = self.affected(track, edited);
        if ids.is_empty() {
            log::debug!("Track '{}' is up to date", track.name);
            track.mark_synced();
            return Ok(Rendered {
                samples: self.assemble(track),
                resynthesized: Vec::new(),
                failures: Vec::new(),
            });
        }

        log::info!(
            "Resynthesizing {} of {} segment(s) of '{}'",
            ids.len(),
            track.segments.len(),
            track.name
        );

        let jobs: Vec<SegmentJob> = ids.iter().map(|&id| self.prepare(track, id)).collect();
        let results: Vec<(SegmentJob, Result<CachedSegment>)> = self.pool.install(|| {
            jobs.into_par_iter()
                .map(|job| {
                    let outcome = self.run(&job);
                    (job, outcome)
                })
                .collect()
        });

        let mut resynthesized = Vec::new();
        let mut failures = Vec::new();
        for (job, outcome) in results {
            match outcome {
                Ok(entry) => {
                    if track.cache.commit(job.id, job.generation, entry) {
                        resynthesized.push(job.id);
                    }
                }
                Err(e @ (EngineError::ModelNotLoaded
                | EngineError::ConfigMismatch(_)
                | EngineError::ShapeMismatch { .. })) => return Err(e),
                Err(e) => {
                    log::warn!("Segment {} of '{}' failed: {}", job.id.0, track.name, e);
                    failures.push(SegmentFailure {
                        segment: job.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        track.mark_synced();
        Ok(Rendered {
            samples: self.assemble(track),
            resynthesized,
            failures,
        })
    }

    /// Resynthesize whatever changed since the track was last rendered.
    pub fn render(&self, track: &mut Track) -> Result<Rendered> {
        let pending = track.pending_ranges();
        self.resynthesize(track, &pending)
    }

    /// Segments needing a new render, in track order.
    pub(crate) fn affected(&self, track: &Track, edited: &[Range<usize>]) -> Vec<SegmentId> {
        let mut ids: BTreeSet<SegmentId> = track
            .segments
            .iter()
            .filter(|s| edited.iter().any(|r| s.padded_intersects(r)))
            .map(|s| s.id)
            .collect();
        // Edits that were never reported still show up as fingerprint changes.
        ids.extend(track.segments.iter().filter(|s| track.is_stale(s)).map(|s| s.id));
        ids.retain(|&id| track.is_stale(&track.segments[id.0]));
        ids.into_iter().collect()
    }

    /// Snapshot the inputs of one segment and stamp a new job generation.
    pub(crate) fn prepare(&self, track: &mut Track, id: SegmentId) -> SegmentJob {
        let segment: Segment = track.segments[id.0].clone();
        let fingerprint = track.fingerprint(&segment);
        let f0 = track.pitch.edited()[segment.padded.clone()].to_vec();
        SegmentJob {
            id,
            generation: track.cache.begin(id),
            fingerprint,
            core: segment.core,
            padded: segment.padded,
            hop: track.analysis.hop_size,
            mel: Arc::clone(&track.mel),
            f0,
        }
    }

    /// Synthesize the padded range and trim it to the core plus the
    /// crossfade margins.
    pub(crate) fn run(&self, job: &SegmentJob) -> Result<CachedSegment> {
        let hop = job.hop;
        let audio = self
            .adapter
            .synthesize(job.mel.slice(job.padded.clone()), &job.f0)?;

        let lead_available = (job.core.start - job.padded.start) * hop;
        let trail_available = (job.padded.end - job.core.end) * hop;
        let half = self.half_crossfade(hop);
        let lead = half.min(lead_available);
        let trail = half.min(trail_available);

        let from = lead_available - lead;
        let to = audio.len() - trail_available + trail;
        Ok(CachedSegment {
            samples: audio[from..to].into(),
            lead,
            trail,
            fingerprint: job.fingerprint,
        })
    }

    /// Stitch every segment into one waveform. Segments without cached audio
    /// are filled from the source recording; neighbours are crossfaded over
    /// the margins both sides kept.
    pub fn assemble(&self, track: &Track) -> Vec<f32> {
        let hop = track.analysis.hop_size;
        let half = self.half_crossfade(hop);
        let total = track.total_samples();

        let pieces: Vec<Piece<'_>> = track
            .segments
            .iter()
            .map(|seg| match track.cache.get(seg.id) {
                Some(entry) => Piece::cached(seg, entry, hop),
                None => Piece::source(seg, &track.waveform.samples[..], hop, half, total),
            })
            .collect();

        let mut out = vec![0.0f32; total];
        for (seg, piece) in track.segments.iter().zip(&pieces) {
            for x in seg.core.start * hop..seg.core.end * hop {
                out[x] = piece.at(x);
            }
        }

        for i in 1..pieces.len() {
            let (prev, next) = (&pieces[i - 1], &pieces[i]);
            let boundary = track.segments[i].core.start * hop;
            let h = prev
                .trail
                .min(next.lead)
                .min(half)
                .min(track.segments[i - 1].len() * hop / 2)
                .min(track.segments[i].len() * hop / 2);
            if h == 0 {
                continue;
            }
            let start = boundary - h;
            for x in start..boundary + h {
                let t = ((x - start) as f32 + 0.5) / (2 * h) as f32;
                let (fade_out, fade_in) = fade_gains(self.config.crossfade_shape, t);
                out[x] = prev.at(x) * fade_out + next.at(x) * fade_in;
            }
        }
        out
    }
}

/// Audio for one segment positioned on the track's sample axis.
struct Piece<'a> {
    /// Track sample index of `samples[0]`.
    origin: usize,
    samples: Cow<'a, [f32]>,
    lead: usize,
    trail: usize,
}

impl<'a> Piece<'a> {
    fn cached(seg: &Segment, entry: &'a CachedSegment, hop: usize) -> Self {
        Self {
            origin: seg.core.start * hop - entry.lead,
            samples: Cow::Borrowed(&entry.samples[..]),
            lead: entry.lead,
            trail: entry.trail,
        }
    }

    /// The unedited recording, zero-padded past its end.
    fn source(seg: &Segment, source: &'a [f32], hop: usize, half: usize, total: usize) -> Self {
        let lead = half.min(seg.core.start * hop);
        let trail = half.min(total - seg.core.end * hop);
        let from = seg.core.start * hop - lead;
        let to = seg.core.end * hop + trail;
        let samples = if to <= source.len() {
            Cow::Borrowed(&source[from..to])
        } else {
            let mut owned = source[from.min(source.len())..].to_vec();
            owned.resize(to - from, 0.0);
            Cow::Owned(owned)
        };
        Self {
            origin: from,
            samples,
            lead,
            trail,
        }
    }

    fn at(&self, x: usize) -> f32 {
        x.checked_sub(self.origin)
            .and_then(|i| self.samples.get(i))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Gains for the outgoing and incoming signal at position `t` in `0..1`.
fn fade_gains(shape: CrossfadeShape, t: f32) -> (f32, f32) {
    match shape {
        CrossfadeShape::Linear => (1.0 - t, t),
        CrossfadeShape::EqualPower => ((t * FRAC_PI_2).cos(), (t * FRAC_PI_2).sin()),
    }
}
