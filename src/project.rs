//! The `.hsp` project document: which recordings make up a session and how
//! each one was edited.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PROJECT_VERSION: &str = "2.1";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[default]
    Vocal,
    Bgm,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectParams {
    #[serde(default = "default_bpm")]
    pub bpm: f64,
    #[serde(default = "default_beats")]
    pub beats: u32,
    /// Only present in single-track documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift: Option<f32>,
}

fn default_bpm() -> f64 { 120.0 }
fn default_beats() -> u32 { 4 }
fn default_volume() -> f32 { 1.0 }

impl Default for ProjectParams {
    fn default() -> Self {
        Self {
            bpm: default_bpm(),
            beats: default_beats(),
            shift: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub name: String,
    pub file_path: PathBuf,
    #[serde(rename = "type", default)]
    pub kind: TrackKind,
    /// Transpose in semitones already contained in `f0`.
    #[serde(default)]
    pub shift: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub start_frame: usize,
    /// Edited pitch in MIDI notes; `null` marks unvoiced frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f0: Option<Vec<Option<f32>>>,
    /// Single-track documents only restore a curve of exactly the track's length.
    #[serde(skip)]
    pub exact_f0_length: bool,
}

impl TrackEntry {
    pub fn new(name: impl Into<String>, file_path: impl Into<PathBuf>, kind: TrackKind) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            kind,
            shift: 0.0,
            muted: false,
            solo: false,
            volume: 1.0,
            start_frame: 0,
            f0: None,
            exact_f0_length: false,
        }
    }

    /// The saved curve with unvoiced frames as `NaN`.
    pub fn f0_midi(&self) -> Option<Vec<f32>> {
        self.f0
            .as_ref()
            .map(|f0| f0.iter().map(|v| v.unwrap_or(f32::NAN)).collect())
    }

    /// The saved curve to seed a track of `frames` frames with, if any.
    pub fn f0_for(&self, frames: usize) -> Option<Vec<f32>> {
        let f0 = self.f0_midi()?;
        if self.exact_f0_length && f0.len() != frames {
            log::warn!(
                "Ignoring saved pitch for '{}': {} frames saved, track has {}",
                self.name,
                f0.len(),
                frames
            );
            return None;
        }
        Some(f0)
    }

    pub fn set_f0_midi(&mut self, f0: &[f32]) {
        self.f0 = Some(f0.iter().map(|&v| (!v.is_nan()).then_some(v)).collect());
    }
}

/// On-disk layout shared by both document versions.
#[derive(Deserialize)]
struct RawProject {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    model_path: Option<PathBuf>,
    #[serde(default)]
    params: ProjectParams,
    #[serde(default)]
    tracks: Option<Vec<TrackEntry>>,
    #[serde(default)]
    audio_path: Option<PathBuf>,
    #[serde(default)]
    f0: Option<Vec<Option<f32>>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Project {
    pub version: String,
    pub model_path: Option<PathBuf>,
    pub params: ProjectParams,
    pub tracks: Vec<TrackEntry>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            version: PROJECT_VERSION.to_string(),
            model_path: None,
            params: ProjectParams::default(),
            tracks: Vec::new(),
        }
    }
}

impl Project {
    /// Parse a project document. Single-track documents from before
    /// multi-track support become a one-track project.
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let raw: RawProject = serde_json::from_str(content)?;
        let mut params = raw.params;

        let tracks = match (raw.tracks, raw.audio_path) {
            (Some(tracks), _) => tracks,
            (None, Some(audio_path)) => {
                let name = audio_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "vocal".to_string());
                let mut entry = TrackEntry::new(name, audio_path, TrackKind::Vocal);
                entry.shift = params.shift.take().unwrap_or(0.0);
                entry.f0 = raw.f0;
                entry.exact_f0_length = true;
                vec![entry]
            }
            (None, None) => Vec::new(),
        };

        Ok(Self {
            version: raw.version.unwrap_or_else(|| "1.0".to_string()),
            model_path: raw.model_path,
            params,
            tracks,
        })
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Store paths relative to `project_dir` where possible.
    pub fn relativize(&mut self, project_dir: &Path) {
        if let Some(model) = &self.model_path {
            self.model_path = Some(relative_to(model, project_dir));
        }
        for track in &mut self.tracks {
            track.file_path = relative_to(&track.file_path, project_dir);
        }
    }
}

/// Resolve a path stored in a project: used as-is when it exists, else
/// relative to the project directory. `None` when neither exists.
pub fn resolve_path(stored: &Path, project_dir: &Path) -> Option<PathBuf> {
    if stored.exists() {
        return Some(stored.to_path_buf());
    }
    let joined = project_dir.join(stored);
    joined.exists().then_some(joined)
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
