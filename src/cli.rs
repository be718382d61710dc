use clap::{Parser, Subcommand};
use std::ops::Range;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hifipitch", version, about = "Vocal pitch editor with segment-cached neural resynthesis")]
pub struct Cli {
    /// Vocoder model directory (config plus .ckpt). Without one the built-in
    /// harmonic vocoder is used.
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    /// Config file (defaults to hifipitch.toml or the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Parallel vocoder calls
    #[arg(long, global = true, default_value_t = 2)]
    pub workers: usize,

    /// Crossfade length at segment joins, in frames
    #[arg(long, global = true, default_value_t = 8)]
    pub crossfade_frames: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract features and print the segment table
    Analyze {
        /// Input audio file (WAV, MP3, FLAC, OGG)
        input: PathBuf,
    },

    /// Transpose a recording (or a frame range of it) and resynthesize
    Shift {
        input: PathBuf,

        /// Semitones to shift by (negative lowers)
        #[arg(long, allow_hyphen_values = true)]
        semitones: f32,

        /// Only shift frames A..B
        #[arg(long, value_parser = parse_frame_range)]
        frames: Option<Range<usize>>,

        #[arg(short, long, default_value = "output.wav")]
        output: PathBuf,
    },

    /// Render a project: resynthesize vocal tracks and mix every track
    Render {
        /// Project file (.hsp)
        project: PathBuf,

        #[arg(short, long, default_value = "output.wav")]
        output: PathBuf,
    },
}

fn parse_frame_range(s: &str) -> Result<Range<usize>, String> {
    let (start, end) = s
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got '{}'", s))?;
    let start: usize = start.trim().parse().map_err(|e| format!("bad start frame: {}", e))?;
    let end: usize = end.trim().parse().map_err(|e| format!("bad end frame: {}", e))?;
    if end <= start {
        return Err(format!("empty frame range {}..{}", start, end));
    }
    Ok(start..end)
}
