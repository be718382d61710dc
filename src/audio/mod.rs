pub mod decode;
pub mod features;
pub mod mel;
pub mod pitch;

pub use decode::Waveform;
pub use features::{FeatureExtractor, Features};
pub use mel::{MelSlice, MelSpectrogram};
