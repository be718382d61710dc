pub mod actor;
pub mod cache;
pub mod fingerprint;
pub mod orchestrator;
pub mod pitch_edit;
pub mod segment;
pub mod track;

pub use actor::{TrackHandle, TrackSnapshot};
pub use cache::{CachedSegment, SynthesisCache};
pub use fingerprint::EditFingerprint;
pub use orchestrator::{Rendered, Resynthesizer};
pub use pitch_edit::{Checkpoint, EditEvent, PitchEditStore};
pub use segment::{Segment, SegmentId, Segmenter};
pub use track::Track;
