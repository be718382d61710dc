//! Fundamental-frequency tracking and pitch unit conversion.
//!
//! Edited curves are held in MIDI note numbers so that a transpose is a plain
//! addition. Unvoiced frames are `NaN`. Hertz only appears at the tracker and
//! vocoder boundaries, where unvoiced is `0.0`.

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::error::Result;

/// Pluggable F0 backend. Returns one value in Hz per analysis frame, `0.0`
/// for unvoiced frames. May return more or fewer than `frames` values; the
/// caller aligns the result to the mel frame count.
pub trait PitchTracker: Send + Sync {
    fn track(&self, samples: &[f32], sample_rate: u32, hop: usize, frames: usize) -> Result<Vec<f32>>;
}

pub fn hz_to_midi(hz: f32) -> f32 {
    if hz > 0.0 {
        69.0 + 12.0 * (hz / 440.0).log2()
    } else {
        f32::NAN
    }
}

pub fn midi_to_hz(midi: f32) -> f32 {
    if midi.is_nan() {
        0.0
    } else {
        440.0 * 2f32.powf((midi - 69.0) / 12.0)
    }
}

/// Fill unvoiced (`NaN`) gaps by linear interpolation between the voiced
/// neighbours; leading and trailing gaps take the nearest voiced value.
/// A curve with no voiced frame is left untouched.
pub fn interpolate_unvoiced(curve: &mut [f32]) {
    let voiced: Vec<usize> = curve
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .map(|(i, _)| i)
        .collect();
    let (Some(&first), Some(&last)) = (voiced.first(), voiced.last()) else {
        return;
    };

    let head = curve[first];
    curve[..first].fill(head);
    let tail = curve[last];
    curve[last + 1..].fill(tail);

    for pair in voiced.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (va, vb) = (curve[a], curve[b]);
        for i in a + 1..b {
            let t = (i - a) as f32 / (b - a) as f32;
            curve[i] = va + (vb - va) * t;
        }
    }
}

/// Normalized square difference function pitch tracker (McLeod), one window
/// per analysis frame, frames analysed in parallel.
#[derive(Clone, Debug)]
pub struct NsdfTracker {
    pub f0_min: f32,
    pub f0_max: f32,
    /// Minimum normalized peak height for a frame to count as voiced.
    pub clarity_threshold: f32,
    /// Frames quieter than this RMS are unvoiced regardless of periodicity.
    pub silence_rms: f32,
}

impl NsdfTracker {
    pub fn new(f0_min: f32, f0_max: f32) -> Self {
        Self {
            f0_min,
            f0_max,
            clarity_threshold: 0.6,
            silence_rms: 1e-3,
        }
    }

    fn window_size(&self, sample_rate: u32) -> usize {
        // Two periods of the lowest pitch we accept.
        let min_len = (2.0 * sample_rate as f32 / self.f0_min).ceil() as usize;
        min_len.next_power_of_two().clamp(256, 8192)
    }

    fn estimate(&self, frame: &[f32], sample_rate: u32, planner_len: usize) -> f32 {
        let n = frame.len();
        let rms = (frame.iter().map(|s| s * s).sum::<f32>() / n as f32).sqrt();
        if rms < self.silence_rms {
            return 0.0;
        }

        let nsdf = compute_nsdf(frame, planner_len);

        let min_lag = ((sample_rate as f32 / self.f0_max).floor() as usize).max(2);
        let max_lag = ((sample_rate as f32 / self.f0_min).ceil() as usize).min(n / 2);
        if min_lag + 2 >= max_lag {
            return 0.0;
        }

        let peaks = key_maxima(&nsdf[..=max_lag], min_lag);
        let Some(best) = peaks.iter().map(|p| p.1).reduce(f32::max) else {
            return 0.0;
        };
        if best < self.clarity_threshold {
            return 0.0;
        }
        // First key maximum close to the best avoids octave errors.
        let Some(&(lag, _)) = peaks.iter().find(|p| p.1 >= best * 0.9) else {
            return 0.0;
        };
        sample_rate as f32 / lag
    }
}

impl PitchTracker for NsdfTracker {
    fn track(&self, samples: &[f32], sample_rate: u32, hop: usize, frames: usize) -> Result<Vec<f32>> {
        let window = self.window_size(sample_rate);
        let fft_len = (2 * window).next_power_of_two();

        let f0 = (0..frames)
            .into_par_iter()
            .map(|frame_idx| {
                let center = (frame_idx * hop + hop / 2) as isize;
                let start = center - (window / 2) as isize;
                let buf: Vec<f32> = (0..window as isize)
                    .map(|i| {
                        let pos = start + i;
                        if pos >= 0 && (pos as usize) < samples.len() {
                            samples[pos as usize]
                        } else {
                            0.0
                        }
                    })
                    .collect();
                self.estimate(&buf, sample_rate, fft_len)
            })
            .collect();
        Ok(f0)
    }
}

/// NSDF via FFT autocorrelation: `2 r(τ) / m(τ)`.
fn compute_nsdf(buf: &[f32], fft_len: usize) -> Vec<f32> {
    let n = buf.len();
    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let mut spectrum: Vec<Complex<f32>> = buf
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(fft_len)
        .collect();
    forward.process(&mut spectrum);
    for x in spectrum.iter_mut() {
        *x = Complex::new(x.norm_sqr(), 0.0);
    }
    inverse.process(&mut spectrum);

    let scale = 1.0 / fft_len as f32;
    let mut nsdf = vec![0.0f32; n];
    let mut m: f32 = buf.iter().map(|s| s * s).sum::<f32>() * 2.0;
    for tau in 0..n {
        if tau > 0 {
            m -= buf[tau - 1].powi(2) + buf[n - tau].powi(2);
        }
        let r = spectrum[tau].re * scale;
        nsdf[tau] = if m > f32::EPSILON { 2.0 * r / m } else { 0.0 };
    }
    nsdf
}

/// Highest point of each positive NSDF lobe after the first zero crossing,
/// refined by parabolic interpolation. Returns `(lag, height)` pairs.
fn key_maxima(nsdf: &[f32], min_lag: usize) -> Vec<(f32, f32)> {
    let mut peaks = Vec::new();
    let mut i = 1;
    while i < nsdf.len() && nsdf[i] > 0.0 {
        i += 1;
    }

    let mut best: Option<(usize, f32)> = None;
    while i + 1 < nsdf.len() {
        if nsdf[i] > 0.0 {
            if i >= min_lag
                && nsdf[i] >= nsdf[i - 1]
                && nsdf[i] > nsdf[i + 1]
                && best.map_or(true, |(_, v)| nsdf[i] > v)
            {
                best = Some((i, nsdf[i]));
            }
        } else if let Some((lag, _)) = best.take() {
            peaks.push(refine_peak(nsdf, lag));
        }
        i += 1;
    }
    if let Some((lag, _)) = best {
        peaks.push(refine_peak(nsdf, lag));
    }
    peaks
}

fn refine_peak(nsdf: &[f32], lag: usize) -> (f32, f32) {
    let (a, b, c) = (nsdf[lag - 1], nsdf[lag], nsdf[lag + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < f32::EPSILON {
        return (lag as f32, b);
    }
    let delta = 0.5 * (a - c) / denom;
    (lag as f32 + delta, b - 0.25 * (a - c) * delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn midi_conversion() {
        assert!((hz_to_midi(440.0) - 69.0).abs() < 1e-5);
        assert!((hz_to_midi(880.0) - 81.0).abs() < 1e-4);
        assert!(hz_to_midi(0.0).is_nan());
        assert_eq!(midi_to_hz(f32::NAN), 0.0);
        assert!((midi_to_hz(60.0) - 261.6256).abs() < 1e-2);
    }

    #[test]
    fn interpolation_fills_gaps_and_edges() {
        let mut curve = vec![f32::NAN, 60.0, f32::NAN, f32::NAN, 63.0, f32::NAN];
        interpolate_unvoiced(&mut curve);
        assert_eq!(curve, vec![60.0, 60.0, 61.0, 62.0, 63.0, 63.0]);
    }

    #[test]
    fn interpolation_leaves_fully_unvoiced_curve() {
        let mut curve = vec![f32::NAN; 4];
        interpolate_unvoiced(&mut curve);
        assert!(curve.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn tracks_steady_sine() {
        let sr = 16000;
        let samples = sine(220.0, sr, 16000);
        let tracker = NsdfTracker::new(60.0, 1000.0);
        let f0 = tracker.track(&samples, sr, 256, 62).unwrap();
        assert_eq!(f0.len(), 62);
        for &hz in &f0[5..55] {
            assert!((hz - 220.0).abs() < 3.0, "estimated {}", hz);
        }
    }

    #[test]
    fn silence_is_unvoiced() {
        let tracker = NsdfTracker::new(60.0, 1000.0);
        let f0 = tracker.track(&vec![0.0; 8000], 16000, 256, 31).unwrap();
        assert!(f0.iter().all(|&hz| hz == 0.0));
    }
}
