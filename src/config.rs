use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub model: ModelSection,
}

/// Frame layout and feature parameters. Two tracks can only share a vocoder
/// when their analysis configurations produce the same frame rate.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_win_size")]
    pub win_size: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    #[serde(default = "default_num_mels")]
    pub num_mels: usize,
    #[serde(default = "default_fmin")]
    pub fmin: f32,
    #[serde(default = "default_fmax")]
    pub fmax: f32,
    #[serde(default = "default_f0_min")]
    pub f0_min: f32,
    #[serde(default = "default_f0_max")]
    pub f0_max: f32,
    #[serde(default = "default_interpolate_unvoiced")]
    pub interpolate_unvoiced: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SegmentationConfig {
    /// Frames quieter than this (dB relative to the loudest frame) count as silence.
    #[serde(default = "default_silence_threshold_db")]
    pub silence_threshold_db: f32,
    /// Shortest silence run that splits two segments.
    #[serde(default = "default_min_silence_frames")]
    pub min_silence_frames: usize,
    /// Segments shorter than this are merged into a neighbour.
    #[serde(default = "default_min_segment_frames")]
    pub min_segment_frames: usize,
    #[serde(default = "default_context_frames")]
    pub context_frames: usize,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_crossfade_frames")]
    pub crossfade_frames: usize,
    #[serde(default)]
    pub crossfade_shape: CrossfadeShape,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadeShape {
    Linear,
    #[default]
    EqualPower,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelSection {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            fft_size: default_fft_size(),
            win_size: default_win_size(),
            hop_size: default_hop_size(),
            num_mels: default_num_mels(),
            fmin: default_fmin(),
            fmax: default_fmax(),
            f0_min: default_f0_min(),
            f0_max: default_f0_max(),
            interpolate_unvoiced: default_interpolate_unvoiced(),
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: default_silence_threshold_db(),
            min_silence_frames: default_min_silence_frames(),
            min_segment_frames: default_min_segment_frames(),
            context_frames: default_context_frames(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            crossfade_frames: default_crossfade_frames(),
            crossfade_shape: CrossfadeShape::default(),
        }
    }
}

impl AnalysisConfig {
    /// Analysis frames per second.
    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_size as f64
    }

    /// Whether features computed under `other` line up frame-for-frame with ours.
    pub fn is_frame_compatible(&self, other: &AnalysisConfig) -> bool {
        self.sample_rate == other.sample_rate
            && self.hop_size == other.hop_size
            && self.num_mels == other.num_mels
    }
}

fn default_sample_rate() -> u32 { 44100 }
fn default_fft_size() -> usize { 2048 }
fn default_win_size() -> usize { 2048 }
fn default_hop_size() -> usize { 512 }
fn default_num_mels() -> usize { 128 }
fn default_fmin() -> f32 { 40.0 }
fn default_fmax() -> f32 { 16000.0 }
fn default_f0_min() -> f32 { 40.0 }
fn default_f0_max() -> f32 { 1600.0 }
fn default_interpolate_unvoiced() -> bool { true }
fn default_silence_threshold_db() -> f32 { -60.0 }
fn default_min_silence_frames() -> usize { 100 }
fn default_min_segment_frames() -> usize { 16 }
fn default_context_frames() -> usize { 64 }
fn default_workers() -> usize { 2 }
fn default_crossfade_frames() -> usize { 8 }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}

/// Look for `hifipitch.toml` in the working directory, then the XDG and
/// platform config directories.
pub fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("hifipitch.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join(crate::APP_NAME).join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join(crate::APP_NAME).join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
