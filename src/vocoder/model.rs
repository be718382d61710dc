//! Locating and binding a vocoder model directory.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Vocoder;
use crate::config::AnalysisConfig;
use crate::error::{EngineError, Result};

/// Structured model configuration as shipped next to a checkpoint. Older
/// configs spell some keys differently; those spellings are accepted too.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ModelConfig {
    #[serde(alias = "sampling_rate")]
    pub audio_sample_rate: u32,
    pub hop_size: usize,
    #[serde(alias = "n_fft")]
    pub fft_size: usize,
    #[serde(default)]
    pub win_size: Option<usize>,
    #[serde(alias = "num_mels")]
    pub audio_num_mel_bins: usize,
    #[serde(default)]
    pub fmin: f32,
    #[serde(default)]
    pub fmax: Option<f32>,
    #[serde(default = "default_f0_min")]
    pub f0_min: f32,
    #[serde(default = "default_f0_max")]
    pub f0_max: f32,
}

fn default_f0_min() -> f32 { 40.0 }
fn default_f0_max() -> f32 { 1600.0 }

impl From<&ModelConfig> for AnalysisConfig {
    fn from(model: &ModelConfig) -> Self {
        AnalysisConfig {
            sample_rate: model.audio_sample_rate,
            fft_size: model.fft_size,
            win_size: model.win_size.unwrap_or(model.fft_size),
            hop_size: model.hop_size,
            num_mels: model.audio_num_mel_bins,
            fmin: model.fmin,
            fmax: model.fmax.unwrap_or(model.audio_sample_rate as f32 / 2.0),
            f0_min: model.f0_min,
            f0_max: model.f0_max,
            ..AnalysisConfig::default()
        }
    }
}

impl From<&AnalysisConfig> for ModelConfig {
    fn from(analysis: &AnalysisConfig) -> Self {
        ModelConfig {
            audio_sample_rate: analysis.sample_rate,
            hop_size: analysis.hop_size,
            fft_size: analysis.fft_size,
            win_size: Some(analysis.win_size),
            audio_num_mel_bins: analysis.num_mels,
            fmin: analysis.fmin,
            fmax: Some(analysis.fmax),
            f0_min: analysis.f0_min,
            f0_max: analysis.f0_max,
        }
    }
}

impl ModelConfig {
    pub fn parse(path: &Path, content: &str) -> std::result::Result<Self, String> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(content).map_err(|e| e.to_string()),
            Some("toml") => toml::from_str(content).map_err(|e| e.to_string()),
            _ => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        }
    }

    /// Reject configurations no frame grid can be built from.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.audio_sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.hop_size == 0 {
            return Err("hop_size must be positive".into());
        }
        if self.fft_size == 0 {
            return Err("fft_size must be positive".into());
        }
        if self.audio_num_mel_bins == 0 {
            return Err("audio_num_mel_bins must be positive".into());
        }
        if let Some(win) = self.win_size {
            if win == 0 || win > self.fft_size {
                return Err(format!("win_size {} must be in 1..={}", win, self.fft_size));
            }
        }
        if !(self.f0_min > 0.0 && self.f0_min < self.f0_max) {
            return Err(format!("f0 range {}..{} is empty", self.f0_min, self.f0_max));
        }
        Ok(())
    }
}

/// A model directory: its configuration plus the checkpoint file to load.
#[derive(Clone, Debug)]
pub struct ModelBundle {
    pub dir: PathBuf,
    pub config: ModelConfig,
    pub checkpoint: PathBuf,
}

const CONFIG_NAMES: &[&str] = &["config.yaml", "config.json", "config.toml"];

impl ModelBundle {
    /// Find the configuration (`config.yaml`, `config.json`, or `config.toml`)
    /// and the checkpoint (`model.ckpt`, else the first `*.ckpt`) in `dir`.
    pub fn locate(dir: &Path) -> Result<Self> {
        let load_err = |reason: String| EngineError::ModelLoad {
            path: dir.to_path_buf(),
            reason,
        };

        let config_path = CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists())
            .ok_or_else(|| load_err("no config.yaml, config.json or config.toml found".into()))?;

        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| load_err(format!("cannot read {}: {}", config_path.display(), e)))?;
        let config = ModelConfig::parse(&config_path, &content)
            .map_err(|e| load_err(format!("invalid {}: {}", config_path.display(), e)))?;
        config
            .validate()
            .map_err(|e| load_err(format!("invalid {}: {}", config_path.display(), e)))?;

        let checkpoint = find_checkpoint(dir)
            .map_err(|e| load_err(format!("cannot list directory: {}", e)))?
            .ok_or_else(|| load_err("no .ckpt file found".into()))?;

        log::info!(
            "Found model {} ({}Hz, hop {}, {} mels)",
            checkpoint.display(),
            config.audio_sample_rate,
            config.hop_size,
            config.audio_num_mel_bins
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            checkpoint,
        })
    }
}

fn find_checkpoint(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let preferred = dir.join("model.ckpt");
    if preferred.exists() {
        return Ok(Some(preferred));
    }
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("ckpt") {
            candidates.push(path);
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

/// Turns a located bundle into a runnable vocoder. The checkpoint format is
/// the loader's business.
pub trait ModelLoader {
    fn load(&self, bundle: &ModelBundle) -> Result<Arc<dyn Vocoder>>;
}

/// A vocoder together with the configuration it was trained with.
#[derive(Clone)]
pub struct BoundModel {
    pub vocoder: Arc<dyn Vocoder>,
    pub config: ModelConfig,
    pub source: Option<PathBuf>,
}

impl BoundModel {
    pub fn new(vocoder: Arc<dyn Vocoder>, config: ModelConfig) -> Self {
        Self {
            vocoder,
            config,
            source: None,
        }
    }

    pub fn analysis(&self) -> AnalysisConfig {
        AnalysisConfig::from(&self.config)
    }
}

/// Locate and load the model in `dir`. Every failure surfaces as
/// [`EngineError::ModelLoad`].
pub fn load_model(dir: &Path, loader: &dyn ModelLoader) -> Result<BoundModel> {
    let bundle = ModelBundle::locate(dir)?;
    let vocoder = loader.load(&bundle).map_err(|e| match e {
        EngineError::ModelLoad { .. } => e,
        other => EngineError::ModelLoad {
            path: bundle.checkpoint.clone(),
            reason: other.to_string(),
        },
    })?;
    Ok(BoundModel {
        vocoder,
        config: bundle.config,
        source: Some(bundle.checkpoint),
    })
}
