//! Silence-based splitting of a track into independently synthesizable chunks.

use std::ops::Range;

use crate::config::SegmentationConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub usize);

/// A contiguous run of frames. Core ranges of a track partition
/// `0..total_frames`; padded ranges extend into the neighbours.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub id: SegmentId,
    pub core: Range<usize>,
    pub padded: Range<usize>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Context frames borrowed before the core.
    pub fn lead(&self) -> usize {
        self.core.start - self.padded.start
    }

    /// Context frames borrowed after the core.
    pub fn trail(&self) -> usize {
        self.padded.end - self.core.end
    }

    pub fn padded_intersects(&self, range: &Range<usize>) -> bool {
        range.start < self.padded.end && self.padded.start < range.end
    }
}

pub struct Segmenter {
    config: SegmentationConfig,
}

impl Segmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Split `frame_count` frames of `samples` (one frame per `hop` samples)
    /// at long silences.
    pub fn segment(&self, samples: &[f32], hop: usize, frame_count: usize) -> Vec<Segment> {
        if frame_count == 0 {
            return Vec::new();
        }
        let energy = frame_energy_db(samples, hop, frame_count);
        let cuts = silence_cuts(
            &energy,
            self.config.silence_threshold_db,
            self.config.min_silence_frames.max(1),
        );
        let cores = merge_short(split_at(&cuts, frame_count), self.config.min_segment_frames);
        let segments = with_context(cores, self.config.context_frames, frame_count);

        log::debug!(
            "Segmented {} frames into {} segment(s) ({} silence cut(s))",
            frame_count,
            segments.len(),
            cuts.len()
        );
        segments
    }
}

/// Per-frame RMS level in dB relative to the loudest frame (0 dB at the peak).
pub fn frame_energy_db(samples: &[f32], hop: usize, frame_count: usize) -> Vec<f32> {
    let levels: Vec<f32> = (0..frame_count)
        .map(|i| {
            let start = (i * hop).min(samples.len());
            let end = ((i + 1) * hop).min(samples.len());
            let chunk = &samples[start..end];
            let rms = if chunk.is_empty() {
                0.0
            } else {
                (chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32).sqrt()
            };
            20.0 * rms.max(1e-10).log10()
        })
        .collect();

    let peak = levels.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    levels.into_iter().map(|db| db - peak).collect()
}

/// Cut points at the midpoint of every interior silence run at least
/// `min_silence` frames long. Silence touching either end of the track
/// stays attached to the first or last segment.
fn silence_cuts(energy_db: &[f32], threshold_db: f32, min_silence: usize) -> Vec<usize> {
    let total = energy_db.len();
    let mut cuts = Vec::new();
    let mut i = 0;
    while i < total {
        if energy_db[i] > threshold_db {
            i += 1;
            continue;
        }
        let start = i;
        while i < total && energy_db[i] <= threshold_db {
            i += 1;
        }
        let end = i;
        if start > 0 && end < total && end - start >= min_silence {
            cuts.push(start + (end - start) / 2);
        }
    }
    cuts
}

fn split_at(cuts: &[usize], total: usize) -> Vec<Range<usize>> {
    let mut cores = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for &cut in cuts {
        if cut > start && cut < total {
            cores.push(start..cut);
            start = cut;
        }
    }
    cores.push(start..total);
    cores
}

/// Fold cores shorter than `min_len` into their shorter neighbour until
/// every core is long enough or only one remains.
fn merge_short(mut cores: Vec<Range<usize>>, min_len: usize) -> Vec<Range<usize>> {
    while cores.len() > 1 {
        let Some(idx) = cores.iter().position(|c| c.len() < min_len) else {
            break;
        };
        let merge_prev = match (idx.checked_sub(1), cores.get(idx + 1)) {
            (Some(prev), Some(next)) => cores[prev].len() <= next.len(),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if merge_prev {
            let removed = cores.remove(idx);
            cores[idx - 1].end = removed.end;
        } else {
            let removed = cores.remove(idx);
            cores[idx].start = removed.start;
        }
    }
    cores
}

fn with_context(cores: Vec<Range<usize>>, context: usize, total: usize) -> Vec<Segment> {
    cores
        .into_iter()
        .enumerate()
        .map(|(i, core)| Segment {
            id: SegmentId(i),
            padded: core.start.saturating_sub(context)..(core.end + context).min(total),
            core,
        })
        .collect()
}

/// Build segments from explicit core ranges. The ranges must partition
/// `0..total`.
pub fn segments_from_cores(cores: Vec<Range<usize>>, context: usize, total: usize) -> Vec<Segment> {
    debug_assert!(covers_exactly(&cores, total));
    with_context(cores, context, total)
}

/// Whether `cores` are ordered, contiguous, and span `0..total` exactly.
pub fn covers_exactly(cores: &[Range<usize>], total: usize) -> bool {
    let mut expected = 0;
    for core in cores {
        if core.start != expected || core.end <= core.start {
            return false;
        }
        expected = core.end;
    }
    expected == total
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOP: usize = 100;

    /// Tone bursts of the given frame lengths separated by silences.
    fn bursts(pattern: &[(usize, bool)]) -> Vec<f32> {
        let mut out = Vec::new();
        for &(frames, loud) in pattern {
            for i in 0..frames * HOP {
                out.push(if loud { (i as f32 * 0.3).sin() * 0.5 } else { 0.0 });
            }
        }
        out
    }

    fn segmenter(min_silence: usize, min_segment: usize, context: usize) -> Segmenter {
        Segmenter::new(SegmentationConfig {
            silence_threshold_db: -60.0,
            min_silence_frames: min_silence,
            min_segment_frames: min_segment,
            context_frames: context,
        })
    }

    fn cores(segments: &[Segment]) -> Vec<Range<usize>> {
        segments.iter().map(|s| s.core.clone()).collect()
    }

    #[test]
    fn splits_at_middle_of_long_silence() {
        let samples = bursts(&[(50, true), (20, false), (50, true)]);
        let segs = segmenter(10, 5, 8).segment(&samples, HOP, 120);
        assert_eq!(cores(&segs), vec![0..60, 60..120]);
        assert_eq!(segs[0].padded, 0..68);
        assert_eq!(segs[1].padded, 52..120);
        assert_eq!(segs[1].id, SegmentId(1));
    }

    #[test]
    fn short_silence_does_not_split() {
        let samples = bursts(&[(50, true), (5, false), (50, true)]);
        let segs = segmenter(10, 5, 8).segment(&samples, HOP, 105);
        assert_eq!(cores(&segs), vec![0..105]);
    }

    #[test]
    fn no_silence_is_one_segment() {
        let samples = bursts(&[(80, true)]);
        let segs = segmenter(10, 5, 8).segment(&samples, HOP, 80);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].core, 0..80);
        assert_eq!(segs[0].padded, 0..80);
    }

    #[test]
    fn edge_silence_stays_attached() {
        let samples = bursts(&[(30, false), (40, true), (30, false)]);
        let segs = segmenter(10, 5, 8).segment(&samples, HOP, 100);
        assert_eq!(cores(&segs), vec![0..100]);
    }

    #[test]
    fn tiny_segments_merge_into_shorter_neighbour() {
        // A 4-frame blip between two long silences would form a tiny core.
        let samples = bursts(&[
            (60, true),
            (20, false),
            (4, true),
            (20, false),
            (60, true),
        ]);
        let segs = segmenter(10, 30, 4).segment(&samples, HOP, 164);
        assert!(covers_exactly(&cores(&segs), 164));
        assert!(segs.iter().all(|s| s.len() >= 30));
        assert_eq!(segs.len(), 2);
    }

    #[test]
    fn merge_prefers_shorter_neighbour() {
        let merged = merge_short(vec![0..50, 50..53, 53..70], 10);
        assert_eq!(merged, vec![0..50, 50..70]);
        let merged = merge_short(vec![0..2, 2..40], 10);
        assert_eq!(merged, vec![0..40]);
    }

    #[test]
    fn cores_partition_for_many_layouts() {
        let layouts: Vec<Vec<(usize, bool)>> = vec![
            vec![(10, true)],
            vec![(3, false), (3, true), (3, false)],
            vec![(40, true), (15, false), (40, true), (15, false), (40, true)],
            vec![(15, false), (40, true), (15, false), (2, true), (15, false)],
            vec![(1, true), (12, false), (1, true), (12, false), (1, true)],
            vec![(50, false)],
        ];
        for layout in &layouts {
            let samples = bursts(layout);
            let total: usize = layout.iter().map(|l| l.0).sum();
            for (min_silence, min_segment, context) in [(1, 1, 0), (10, 5, 8), (12, 50, 64)] {
                let segs = segmenter(min_silence, min_segment, context).segment(&samples, HOP, total);
                assert!(
                    covers_exactly(&cores(&segs), total),
                    "layout {:?} produced {:?}",
                    layout,
                    cores(&segs)
                );
                for s in &segs {
                    assert!(s.padded.start <= s.core.start && s.core.end <= s.padded.end);
                    assert!(s.padded.end <= total);
                    assert!(s.lead() <= context && s.trail() <= context);
                }
            }
        }
    }

    #[test]
    fn frame_count_beyond_samples_reads_silence() {
        let samples = bursts(&[(10, true)]);
        let energy = frame_energy_db(&samples, HOP, 12);
        assert_eq!(energy.len(), 12);
        assert!(energy[11] < -100.0);
    }

    #[test]
    fn empty_track_has_no_segments() {
        assert!(segmenter(10, 5, 8).segment(&[], HOP, 0).is_empty());
    }

    #[test]
    fn padded_intersection() {
        let seg = Segment {
            id: SegmentId(0),
            core: 10..20,
            padded: 5..25,
        };
        assert!(seg.padded_intersects(&(0..6)));
        assert!(seg.padded_intersects(&(24..30)));
        assert!(!seg.padded_intersects(&(25..30)));
        assert!(!seg.padded_intersects(&(0..5)));
    }
}
