//! Short-time Fourier transform and log-mel spectrogram.

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::ops::Range;

use crate::config::AnalysisConfig;

/// Frame-major log-mel spectrogram: `frames` rows of `num_mels` values.
#[derive(Clone, Debug, PartialEq)]
pub struct MelSpectrogram {
    num_mels: usize,
    data: Vec<f32>,
}

/// Borrowed run of consecutive mel frames.
#[derive(Clone, Copy, Debug)]
pub struct MelSlice<'a> {
    pub num_mels: usize,
    pub data: &'a [f32],
}

impl MelSpectrogram {
    pub fn from_frames(num_mels: usize, data: Vec<f32>) -> Self {
        debug_assert!(num_mels > 0 && data.len() % num_mels == 0);
        Self { num_mels, data }
    }

    pub fn num_mels(&self) -> usize {
        self.num_mels
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.num_mels.max(1)
    }

    pub fn frame(&self, index: usize) -> &[f32] {
        &self.data[index * self.num_mels..(index + 1) * self.num_mels]
    }

    /// Frames `range.start..range.end`. Panics if the range exceeds the spectrogram.
    pub fn slice(&self, range: Range<usize>) -> MelSlice<'_> {
        MelSlice {
            num_mels: self.num_mels,
            data: &self.data[range.start * self.num_mels..range.end * self.num_mels],
        }
    }
}

impl<'a> MelSlice<'a> {
    pub fn frames(&self) -> usize {
        self.data.len() / self.num_mels.max(1)
    }

    pub fn frame(&self, index: usize) -> &'a [f32] {
        &self.data[index * self.num_mels..(index + 1) * self.num_mels]
    }
}

/// Number of analysis frames for a signal of `len` samples.
pub fn frame_count(len: usize, hop: usize) -> usize {
    len.div_ceil(hop)
}

/// Compute the log-mel spectrogram. Frame `i` is centered on sample
/// `i * hop + hop / 2`; samples outside the signal read as zero.
pub fn mel_spectrogram(samples: &[f32], config: &AnalysisConfig) -> MelSpectrogram {
    let hop = config.hop_size;
    let fft_size = config.fft_size;
    let win_size = config.win_size.min(fft_size);
    let frames = frame_count(samples.len(), hop);
    let n_freqs = fft_size / 2 + 1;

    let window = hann_window(win_size);
    let filterbank = mel_filterbank(config);
    let win_offset = (fft_size - win_size) / 2;

    let data: Vec<f32> = (0..frames)
        .into_par_iter()
        .flat_map_iter(|frame_idx| {
            let center = (frame_idx * hop + hop / 2) as isize;
            let start = center - (win_size / 2) as isize;

            let mut fft_input = vec![Complex::new(0.0f32, 0.0); fft_size];
            for (i, w) in window.iter().enumerate() {
                let pos = start + i as isize;
                if pos >= 0 && (pos as usize) < samples.len() {
                    fft_input[win_offset + i] = Complex::new(samples[pos as usize] * w, 0.0);
                }
            }

            // Per-thread FFT planner (rayon-safe)
            let mut planner = FftPlanner::<f32>::new();
            let fft = planner.plan_fft_forward(fft_size);
            fft.process(&mut fft_input);

            let magnitude: Vec<f32> = fft_input[..n_freqs].iter().map(|c| c.norm()).collect();

            filterbank
                .chunks(n_freqs)
                .map(|filter| {
                    let energy: f32 = filter.iter().zip(&magnitude).map(|(w, m)| w * m).sum();
                    dynamic_range_compression(energy)
                })
                .collect::<Vec<f32>>()
        })
        .collect();

    MelSpectrogram::from_frames(config.num_mels, data)
}

/// `ln(max(x, 1e-5))`, the compression the vocoder was trained on.
pub fn dynamic_range_compression(x: f32) -> f32 {
    x.max(1e-5).ln()
}

/// Slaney mel scale.
pub fn hz_to_mel(freq: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;

    if freq >= min_log_hz {
        min_log_mel + (freq / min_log_hz).ln() / logstep
    } else {
        freq / f_sp
    }
}

pub fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;

    if mel >= min_log_mel {
        min_log_hz * ((mel - min_log_mel) * logstep).exp()
    } else {
        f_sp * mel
    }
}

/// Center frequency in Hz of each mel band.
pub fn mel_band_centers(config: &AnalysisConfig) -> Vec<f32> {
    let mel_min = hz_to_mel(config.fmin);
    let mel_max = hz_to_mel(config.fmax.min(config.sample_rate as f32 / 2.0));
    let n = config.num_mels;
    (1..=n)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n + 1) as f32))
        .collect()
}

/// Slaney-normalised triangular filterbank, `num_mels` rows of `fft_size / 2 + 1`.
pub fn mel_filterbank(config: &AnalysisConfig) -> Vec<f32> {
    let fmax = config.fmax.min(config.sample_rate as f32 / 2.0);
    let n_freqs = config.fft_size / 2 + 1;
    let n_mels = config.num_mels;

    let mel_min = hz_to_mel(config.fmin);
    let mel_max = hz_to_mel(fmax);

    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let bin_hz = config.sample_rate as f32 / config.fft_size as f32;
    let mut filterbank = vec![0.0f32; n_mels * n_freqs];

    for m in 0..n_mels {
        let (f_left, f_center, f_right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        let enorm = 2.0 / (f_right - f_left + 1e-10);

        for k in 0..n_freqs {
            let f = k as f32 * bin_hz;
            let weight = if f >= f_left && f <= f_center {
                (f - f_left) / (f_center - f_left + 1e-10)
            } else if f > f_center && f <= f_right {
                (f_right - f) / (f_right - f_center + 1e-10)
            } else {
                0.0
            };
            filterbank[m * n_freqs + k] = weight * enorm;
        }
    }

    filterbank
}

pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AnalysisConfig {
        AnalysisConfig {
            sample_rate: 16000,
            fft_size: 512,
            win_size: 512,
            hop_size: 128,
            num_mels: 40,
            fmin: 0.0,
            fmax: 8000.0,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn mel_scale_roundtrip() {
        for freq in [100.0, 700.0, 2000.0, 7000.0] {
            let back = mel_to_hz(hz_to_mel(freq));
            assert!((freq - back).abs() < 0.5, "{} -> {}", freq, back);
        }
    }

    #[test]
    fn frame_count_rounds_up() {
        assert_eq!(frame_count(1024, 128), 8);
        assert_eq!(frame_count(1025, 128), 9);
        assert_eq!(frame_count(1, 128), 1);
    }

    #[test]
    fn filterbank_rows_are_nonzero() {
        let cfg = small_config();
        let fb = mel_filterbank(&cfg);
        let n_freqs = cfg.fft_size / 2 + 1;
        assert_eq!(fb.len(), cfg.num_mels * n_freqs);
        for row in fb.chunks(n_freqs).skip(2) {
            assert!(row.iter().sum::<f32>() > 0.0);
        }
    }

    #[test]
    fn spectrogram_shape_and_floor() {
        let cfg = small_config();
        let silence = vec![0.0f32; 1000];
        let mel = mel_spectrogram(&silence, &cfg);
        assert_eq!(mel.frames(), frame_count(1000, 128));
        assert_eq!(mel.num_mels(), 40);
        for &v in mel.frame(3) {
            assert!((v - (1e-5f32).ln()).abs() < 1e-6);
        }
    }

    #[test]
    fn tone_energy_lands_near_its_band() {
        let cfg = small_config();
        let tone: Vec<f32> = (0..4096)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 16000.0).sin())
            .collect();
        let mel = mel_spectrogram(&tone, &cfg);
        let frame = mel.frame(10);
        let loudest = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let centers = mel_band_centers(&cfg);
        assert!((centers[loudest] - 1000.0).abs() < 250.0);
    }

    #[test]
    fn slice_views_consecutive_frames() {
        let mel = MelSpectrogram::from_frames(2, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let slice = mel.slice(1..3);
        assert_eq!(slice.frames(), 2);
        assert_eq!(slice.frame(0), &[2.0, 3.0]);
        assert_eq!(slice.frame(1), &[4.0, 5.0]);
    }
}
