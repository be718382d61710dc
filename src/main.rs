mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cli::{Cli, Commands};
use hifipitch::audio::decode::load_audio;
use hifipitch::audio::FeatureExtractor;
use hifipitch::config::{self, Config};
use hifipitch::encode::wav::write_wav;
use hifipitch::engine::{Rendered, Resynthesizer, Segmenter, Track, TrackHandle};
use hifipitch::mix::{mix_tracks, MixInput};
use hifipitch::project::{resolve_path, Project, TrackKind};
use hifipitch::vocoder::{load_model, BoundModel, HarmonicLoader, HarmonicVocoder, ModelConfig, VocoderAdapter};

/// Everything needed to load and resynthesize tracks against one model.
struct Session {
    extractor: FeatureExtractor,
    segmenter: Segmenter,
    resynth: Arc<Resynthesizer>,
}

impl Session {
    fn new(cfg: &Config, model_dir: Option<&Path>) -> Result<Self> {
        let model = match model_dir {
            Some(dir) => load_model(dir, &HarmonicLoader)?,
            None => {
                log::info!("No model given, using the built-in harmonic vocoder");
                let config = ModelConfig::from(&cfg.analysis);
                config
                    .validate()
                    .map_err(|e| anyhow::anyhow!("Invalid [analysis] config: {}", e))?;
                BoundModel::new(Arc::new(HarmonicVocoder::new(&cfg.analysis)), config)
            }
        };

        // The model dictates the frame grid; only the unvoiced policy is ours.
        let mut analysis = model.analysis();
        analysis.interpolate_unvoiced = cfg.analysis.interpolate_unvoiced;

        let adapter = Arc::new(VocoderAdapter::with_model(model));
        let resynth = Resynthesizer::new(adapter, cfg.synthesis.clone())?;
        Ok(Self {
            extractor: FeatureExtractor::new(analysis),
            segmenter: Segmenter::new(cfg.segmentation.clone()),
            resynth: Arc::new(resynth),
        })
    }

    fn sample_rate(&self) -> u32 {
        self.extractor.config().sample_rate
    }

    fn hop_size(&self) -> usize {
        self.extractor.config().hop_size
    }

    fn load_track(&self, name: &str, path: &Path) -> Result<Track> {
        let waveform = load_audio(path, self.sample_rate())?;
        Track::load(name, waveform, &self.extractor, &self.segmenter)
            .with_context(|| format!("Failed to analyze {}", path.display()))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect hifipitch.toml / global config
    let mut cfg = Config::default();
    if let Some(path) = cli.config.clone().or_else(config::find_config) {
        if let Some(loaded) = config::load_config(&path) {
            log::info!("Loaded config from {}", path.display());
            cfg = loaded;
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }
    // Merge: CLI flags override only when set away from their defaults
    if cli.workers != 2 { cfg.synthesis.workers = cli.workers; }
    if cli.crossfade_frames != 8 { cfg.synthesis.crossfade_frames = cli.crossfade_frames; }
    cfg.synthesis.crossfade_frames = cfg
        .synthesis
        .crossfade_frames
        .min(cfg.segmentation.context_frames);
    if cli.model.is_none() {
        cli.model = cfg.model.path.clone();
    }

    match cli.command {
        Commands::Analyze { input } => analyze(&cfg, cli.model.as_deref(), &input),
        Commands::Shift {
            input,
            semitones,
            frames,
            output,
        } => shift(&cfg, cli.model.as_deref(), &input, semitones, frames, &output),
        Commands::Render { project, output } => render(&cfg, cli.model, &project, &output),
    }
}

fn analyze(cfg: &Config, model: Option<&Path>, input: &Path) -> Result<()> {
    let session = Session::new(cfg, model)?;
    let track = session.load_track(&file_name(input), input)?;
    let frame_rate = track.analysis().frame_rate();

    println!(
        "{}: {} frames ({:.2} frames/s, {:.1}s)",
        track.name,
        track.frames(),
        frame_rate,
        track.waveform().duration()
    );
    println!("{:>4}  {:>14}  {:>14}  {:>9}  {:>8}", "seg", "core", "padded", "start", "length");
    for seg in track.segments() {
        println!(
            "{:>4}  {:>14}  {:>14}  {:>8.2}s  {:>7.2}s",
            seg.id.0,
            format!("{}..{}", seg.core.start, seg.core.end),
            format!("{}..{}", seg.padded.start, seg.padded.end),
            seg.core.start as f64 / frame_rate,
            seg.len() as f64 / frame_rate
        );
    }
    let voiced = track.f0_original().iter().filter(|v| !v.is_nan()).count();
    println!("voiced frames: {}/{}", voiced, track.frames());
    Ok(())
}

fn shift(
    cfg: &Config,
    model: Option<&Path>,
    input: &Path,
    semitones: f32,
    frames: Option<Range<usize>>,
    output: &Path,
) -> Result<()> {
    let session = Session::new(cfg, model)?;
    let mut track = session.load_track(&file_name(input), input)?;

    let event = match frames {
        Some(range) => {
            let values: Vec<f32> = track
                .f0_edited()
                .get(range.clone())
                .with_context(|| {
                    format!("Frames {}..{} exceed the track's {} frames", range.start, range.end, track.frames())
                })?
                .iter()
                .map(|v| v + semitones)
                .collect();
            track.apply_edit(range, &values)?
        }
        None => track.shift_all(semitones),
    };
    log::info!("Shifted frames {}..{} by {} semitone(s)", event.range.start, event.range.end, semitones);

    let rendered = session.resynth.resynthesize(&mut track, &[event.range])?;
    report(&track.name, &rendered);
    write_wav(output, &rendered.samples, session.sample_rate())
}

fn render(cfg: &Config, model: Option<PathBuf>, project_path: &Path, output: &Path) -> Result<()> {
    let content = std::fs::read_to_string(project_path)
        .with_context(|| format!("Failed to read project {}", project_path.display()))?;
    let project = Project::from_json(&content)
        .with_context(|| format!("Invalid project file {}", project_path.display()))?;
    let project_dir = project_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let model = model.or_else(|| {
        let stored = project.model_path.as_ref()?;
        let resolved = resolve_path(stored, &project_dir);
        if resolved.is_none() {
            log::warn!("Model path {} not found", stored.display());
        }
        resolved
    });
    let session = Session::new(cfg, model.as_deref())?;

    let pb = ProgressBar::new(project.tracks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tracks {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );

    // Vocal tracks render concurrently on their own threads.
    let mut handles = Vec::new();
    let mut backing = Vec::new();
    for entry in &project.tracks {
        pb.set_message(entry.name.clone());
        let Some(path) = resolve_path(&entry.file_path, &project_dir) else {
            log::warn!("Audio file {} not found, skipping '{}'", entry.file_path.display(), entry.name);
            pb.inc(1);
            continue;
        };
        match entry.kind {
            TrackKind::Vocal => {
                let track = session.load_track(&entry.name, &path)?;
                let saved = entry.f0_for(track.frames());
                let handle = TrackHandle::spawn(track, Arc::clone(&session.resynth))?;
                if let Some(f0) = saved {
                    handle.seed_f0(f0)?;
                }
                handles.push((entry, handle));
            }
            TrackKind::Bgm => {
                let waveform = load_audio(&path, session.sample_rate())?;
                backing.push((entry, waveform));
                pb.inc(1);
            }
        }
    }

    let mut rendered = Vec::new();
    for (entry, handle) in handles {
        pb.set_message(entry.name.clone());
        let result = handle.render()?;
        report(&entry.name, &result);
        rendered.push((entry, result.samples));
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let inputs: Vec<MixInput<'_>> = rendered
        .iter()
        .map(|(entry, samples)| (*entry, samples.as_slice()))
        .chain(backing.iter().map(|(entry, wave)| (*entry, &wave.samples[..])))
        .map(|(entry, samples)| MixInput {
            samples,
            start_frame: entry.start_frame,
            volume: entry.volume,
            muted: entry.muted,
            solo: entry.solo,
        })
        .collect();

    let mixed = mix_tracks(&inputs, session.hop_size())
        .context("Nothing to export: every track is muted or missing")?;
    write_wav(output, &mixed, session.sample_rate())
}

fn report(name: &str, rendered: &Rendered) {
    log::info!(
        "'{}': resynthesized {} segment(s)",
        name,
        rendered.resynthesized.len()
    );
    if let Some(err) = rendered.partial_failure() {
        log::warn!("'{}': {}", name, err);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "track".to_string())
}
