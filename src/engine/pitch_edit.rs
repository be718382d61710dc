//! Editable F0 curve with a journal of range overwrites.

use std::ops::Range;
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Position in the edit history. Obtained from [`PitchEditStore::checkpoint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint(u64);

/// Notification emitted by every mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditEvent {
    pub range: Range<usize>,
    pub version: u64,
}

struct EditRecord {
    version: u64,
    start: usize,
    previous: Vec<f32>,
}

/// Holds the original and edited pitch curves (MIDI, `NaN` = unvoiced).
/// The original is never written after construction.
pub struct PitchEditStore {
    original: Arc<[f32]>,
    edited: Vec<f32>,
    version: u64,
    journal: Vec<EditRecord>,
    /// Oldest version the journal can still rewind to.
    horizon: u64,
}

/// Pitch equality that treats every NaN as the same unvoiced value.
pub fn same_pitch(a: f32, b: f32) -> bool {
    a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
}

impl PitchEditStore {
    pub fn new(original: Vec<f32>) -> Self {
        let edited = original.clone();
        Self {
            original: original.into(),
            edited,
            version: 0,
            journal: Vec::new(),
            horizon: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.edited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edited.is_empty()
    }

    pub fn original(&self) -> &[f32] {
        &self.original
    }

    /// Current edited curve.
    pub fn edited(&self) -> &[f32] {
        &self.edited
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.edited.len() {
            return Err(EngineError::OutOfRange {
                start: range.start,
                end: range.end,
                len: self.edited.len(),
            });
        }
        Ok(())
    }

    fn overwrite(&mut self, start: usize, values: &[f32]) -> EditEvent {
        let end = start + values.len();
        self.version += 1;
        self.journal.push(EditRecord {
            version: self.version,
            start,
            previous: self.edited[start..end].to_vec(),
        });
        self.edited[start..end].copy_from_slice(values);
        EditEvent {
            range: start..end,
            version: self.version,
        }
    }

    /// Overwrite the edited curve over `range` with `values`.
    pub fn apply_edit(&mut self, range: Range<usize>, values: &[f32]) -> Result<EditEvent> {
        self.check_range(&range)?;
        if values.len() != range.len() {
            return Err(EngineError::ShapeMismatch {
                expected: range.len(),
                actual: values.len(),
            });
        }
        Ok(self.overwrite(range.start, values))
    }

    /// Restore the original curve over `range`.
    pub fn reset(&mut self, range: Range<usize>) -> Result<EditEvent> {
        self.check_range(&range)?;
        let original = Arc::clone(&self.original);
        Ok(self.overwrite(range.start, &original[range]))
    }

    /// Transpose every voiced frame by `semitones`.
    pub fn shift_all(&mut self, semitones: f32) -> EditEvent {
        let shifted: Vec<f32> = self.edited.iter().map(|v| v + semitones).collect();
        self.overwrite(0, &shifted)
    }

    /// Replace the edited curve with externally stored values, e.g. from a
    /// saved project. Only the overlapping prefix is taken when lengths differ.
    pub fn seed(&mut self, values: &[f32]) -> EditEvent {
        let n = values.len().min(self.edited.len());
        if n != values.len() || n != self.edited.len() {
            log::warn!(
                "Seeding {} of {} pitch frames ({} provided)",
                n,
                self.edited.len(),
                values.len()
            );
        }
        self.overwrite(0, &values[..n])
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.version)
    }

    /// Ordered, coalesced frame ranges where the edited curve now differs
    /// from what it was at `checkpoint`. If the journal no longer reaches back
    /// that far the whole curve is reported.
    pub fn dirty_ranges_since(&self, checkpoint: Checkpoint) -> Vec<Range<usize>> {
        if checkpoint.0 >= self.version {
            return Vec::new();
        }
        if checkpoint.0 < self.horizon {
            return if self.edited.is_empty() { Vec::new() } else { vec![0..self.edited.len()] };
        }

        // Rewind a copy of the touched frames back to the checkpoint.
        let mut then = self.edited.clone();
        let mut touched = vec![false; self.edited.len()];
        for record in self.journal.iter().rev().take_while(|r| r.version > checkpoint.0) {
            let end = record.start + record.previous.len();
            then[record.start..end].copy_from_slice(&record.previous);
            touched[record.start..end].fill(true);
        }

        let mut ranges: Vec<Range<usize>> = Vec::new();
        for i in 0..self.edited.len() {
            if !touched[i] || same_pitch(then[i], self.edited[i]) {
                continue;
            }
            match ranges.last_mut() {
                Some(last) if last.end == i => last.end = i + 1,
                _ => ranges.push(i..i + 1),
            }
        }
        ranges
    }

    /// Drop journal entries no longer needed to answer
    /// `dirty_ranges_since` for `checkpoint` or later.
    pub fn prune(&mut self, checkpoint: Checkpoint) {
        self.journal.retain(|r| r.version > checkpoint.0);
        self.horizon = self.horizon.max(checkpoint.0);
    }
}
