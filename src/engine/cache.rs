//! Per-segment store of synthesized audio.

use std::collections::HashMap;
use std::sync::Arc;

use super::fingerprint::EditFingerprint;
use super::segment::SegmentId;

/// Synthesized audio for one segment: the core range plus up to `lead`
/// samples before it and `trail` samples after it kept for crossfading.
#[derive(Clone, Debug)]
pub struct CachedSegment {
    pub samples: Arc<[f32]>,
    pub lead: usize,
    pub trail: usize,
    pub fingerprint: EditFingerprint,
}

impl CachedSegment {
    /// Samples belonging to the core range only.
    pub fn core(&self) -> &[f32] {
        &self.samples[self.lead..self.samples.len() - self.trail]
    }
}

/// Generation stamp handed to a synthesis job. Bumping a segment's generation
/// invalidates every job started before the bump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Default)]
pub struct SynthesisCache {
    entries: HashMap<SegmentId, CachedSegment>,
    generations: HashMap<SegmentId, u64>,
}

impl SynthesisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SegmentId) -> Option<&CachedSegment> {
        self.entries.get(&id)
    }

    /// Store unconditionally; the last write wins.
    pub fn put(&mut self, id: SegmentId, entry: CachedSegment) {
        self.entries.insert(id, entry);
    }

    pub fn is_stale(&self, id: SegmentId, current: &EditFingerprint) -> bool {
        self.entries
            .get(&id)
            .map_or(true, |entry| entry.fingerprint != *current)
    }

    /// Start a new job for `id`, superseding any job already started.
    pub fn begin(&mut self, id: SegmentId) -> Generation {
        let generation = self.generations.entry(id).or_insert(0);
        *generation += 1;
        Generation(*generation)
    }

    /// Invalidate the outstanding job for `id` without starting another.
    pub fn supersede(&mut self, id: SegmentId) {
        *self.generations.entry(id).or_insert(0) += 1;
    }

    pub fn is_current(&self, id: SegmentId, generation: Generation) -> bool {
        self.generations.get(&id).copied().unwrap_or(0) == generation.0
    }

    /// Store the result of the job stamped `generation`. A superseded job's
    /// result is discarded and `false` returned.
    pub fn commit(&mut self, id: SegmentId, generation: Generation, entry: CachedSegment) -> bool {
        if !self.is_current(id, generation) {
            log::debug!(
                "Discarding stale result for segment {} (generation {:?})",
                id.0,
                generation
            );
            return false;
        }
        self.put(id, entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: f32, fingerprint: EditFingerprint) -> CachedSegment {
        CachedSegment {
            samples: vec![value; 8].into(),
            lead: 2,
            trail: 1,
            fingerprint,
        }
    }

    fn fp(value: f32) -> EditFingerprint {
        EditFingerprint::compute(&(0..1), &[value])
    }

    #[test]
    fn missing_entry_is_stale() {
        let cache = SynthesisCache::new();
        assert!(cache.get(SegmentId(0)).is_none());
        assert!(cache.is_stale(SegmentId(0), &fp(1.0)));
    }

    #[test]
    fn staleness_follows_fingerprint() {
        let mut cache = SynthesisCache::new();
        cache.put(SegmentId(3), entry(0.5, fp(1.0)));
        assert!(!cache.is_stale(SegmentId(3), &fp(1.0)));
        assert!(cache.is_stale(SegmentId(3), &fp(2.0)));
        assert_eq!(cache.get(SegmentId(3)).unwrap().core().len(), 5);
    }

    #[test]
    fn put_is_last_write_wins() {
        let mut cache = SynthesisCache::new();
        cache.put(SegmentId(0), entry(0.1, fp(1.0)));
        cache.put(SegmentId(0), entry(0.2, fp(2.0)));
        assert_eq!(cache.get(SegmentId(0)).unwrap().samples[0], 0.2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn superseded_generation_is_discarded() {
        let mut cache = SynthesisCache::new();
        let first = cache.begin(SegmentId(1));
        let second = cache.begin(SegmentId(1));
        assert!(!cache.commit(SegmentId(1), first, entry(0.1, fp(1.0))));
        assert!(cache.get(SegmentId(1)).is_none());
        assert!(cache.commit(SegmentId(1), second, entry(0.2, fp(2.0))));
        assert!(!cache.is_stale(SegmentId(1), &fp(2.0)));
    }

    #[test]
    fn supersede_invalidates_without_starting() {
        let mut cache = SynthesisCache::new();
        let job = cache.begin(SegmentId(0));
        cache.supersede(SegmentId(0));
        assert!(!cache.is_current(SegmentId(0), job));
        assert!(!cache.commit(SegmentId(0), job, entry(0.1, fp(1.0))));
    }

    #[test]
    fn generations_are_per_segment() {
        let mut cache = SynthesisCache::new();
        let a = cache.begin(SegmentId(0));
        cache.begin(SegmentId(1));
        assert!(cache.is_current(SegmentId(0), a));
    }
}
