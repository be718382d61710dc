use anyhow::{Context, Result};
use std::path::Path;

/// Write mono 32-bit float WAV.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer
        .finalize()
        .with_context(|| format!("Failed to finish {}", path.display()))?;

    log::info!(
        "Wrote {} ({:.1}s @ {}Hz)",
        path.display(),
        samples.len() as f32 / sample_rate as f32,
        sample_rate
    );
    Ok(())
}
