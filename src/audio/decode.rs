use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::EngineError;

/// Mono audio at a fixed sample rate. Samples are shared so the original
/// recording can be handed to the render path without copying.
#[derive(Clone, Debug)]
pub struct Waveform {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl Waveform {
    /// Wrap samples, rejecting empty or non-finite input.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> crate::error::Result<Self> {
        if samples.is_empty() {
            return Err(EngineError::InvalidAudio("waveform is empty".into()));
        }
        if sample_rate == 0 {
            return Err(EngineError::InvalidAudio("sample rate is zero".into()));
        }
        if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
            return Err(EngineError::InvalidAudio(format!(
                "non-finite sample at index {}",
                pos
            )));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

pub fn decode_audio(path: &Path) -> Result<Waveform> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Failed to probe audio format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .context("No audio tracks found")?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());
    let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();

        // Downmix to mono
        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for frame_samples in samples.chunks(channels) {
                let mono: f32 = frame_samples.iter().sum::<f32>() / channels as f32;
                all_samples.push(mono);
            }
        }
    }

    log::info!(
        "Decoded audio: {} samples, {}Hz, {:.1}s",
        all_samples.len(),
        sample_rate,
        all_samples.len() as f32 / sample_rate as f32
    );

    Waveform::new(all_samples, sample_rate)
        .with_context(|| format!("Unusable audio in {}", path.display()))
}

/// Decode and bring the audio to `target_rate`, the rate the vocoder was trained at.
pub fn load_audio(path: &Path, target_rate: u32) -> Result<Waveform> {
    let waveform = decode_audio(path)?;
    if waveform.sample_rate == target_rate {
        return Ok(waveform);
    }
    log::info!(
        "Resampling {} from {}Hz to {}Hz",
        path.display(),
        waveform.sample_rate,
        target_rate
    );
    resample(&waveform, target_rate)
}

/// Resample mono audio with rubato's sinc interpolator.
pub fn resample(waveform: &Waveform, target_rate: u32) -> Result<Waveform> {
    use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

    if waveform.sample_rate == target_rate {
        return Ok(waveform.clone());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / waveform.sample_rate as f64;
    // Trailing zeros push the tail out past the filter delay.
    let pad = params.sinc_len;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        2.0,    // max relative ratio
        params,
        waveform.len() + pad,
        1, // mono
    )
    .context("Failed to create resampler")?;

    let mut padded = Vec::with_capacity(waveform.len() + pad);
    padded.extend_from_slice(&waveform.samples);
    padded.resize(waveform.len() + pad, 0.0);
    let output = resampler
        .process(&[padded], None)
        .context("Resampling failed")?;

    let expected = (waveform.len() as f64 * ratio).ceil() as usize;
    let delay = resampler.output_delay();
    let mut samples: Vec<f32> = output
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .skip(delay)
        .take(expected)
        .collect();
    samples.resize(expected, 0.0);
    Waveform::new(samples, target_rate).context("Resampler produced unusable audio")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_non_finite() {
        assert!(matches!(
            Waveform::new(vec![], 44100),
            Err(EngineError::InvalidAudio(_))
        ));
        assert!(matches!(
            Waveform::new(vec![0.0, f32::NAN], 44100),
            Err(EngineError::InvalidAudio(_))
        ));
        assert!(matches!(
            Waveform::new(vec![0.0, f32::INFINITY], 44100),
            Err(EngineError::InvalidAudio(_))
        ));
        assert!(Waveform::new(vec![0.0, 0.5], 44100).is_ok());
    }

    #[test]
    fn resampling_keeps_duration_and_alignment() {
        // A single click a quarter of the way in.
        let mut samples = vec![0.0f32; 4000];
        samples[1000] = 1.0;
        let w = Waveform::new(samples, 8000).unwrap();

        let up = resample(&w, 16000).unwrap();
        assert_eq!(up.sample_rate, 16000);
        assert_eq!(up.len(), 8000);

        let peak = up
            .samples
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak as i64 - 2000).abs() <= 2, "click moved to {}", peak);
    }

    #[test]
    fn duration_in_seconds() {
        let w = Waveform::new(vec![0.0; 22050], 44100).unwrap();
        assert!((w.duration() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn decodes_wav_written_by_hound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..2205 {
            let s = (i as f32 * 0.05).sin() * 0.5;
            writer.write_sample(s).unwrap();
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let w = decode_audio(&path).unwrap();
        assert_eq!(w.sample_rate, 22050);
        assert_eq!(w.len(), 2205);
        assert!((w.samples[100] - (100.0f32 * 0.05).sin() * 0.5).abs() < 1e-5);
    }
}
