use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::{FFT_SIZE, SAMPLE_RATE};
use crate::features::NUM_BINS;

/// Samples this close to the 16-bit rails are treated as capture artifacts.
const CLIP_GUARD: f32 = 1024.0;
/// Scale from raw magnitude to the exported bin values.
const BIN_SCALE: f32 = 16.0;

/// Where the engine is within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftStage {
    Idle,
    Filling,
    Windowing,
    Transforming,
    PeakExtraction,
}

/// Result of one FFT cycle.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    /// |X[k]| / 16 for k in 0..256
    pub bins: [f32; NUM_BINS],
    pub dominant_frequency: f64,
    pub dominant_magnitude: f64,
}

/// Windowed forward FFT over a fixed 512-sample batch.
pub struct FftEngine {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    stage: FftStage,
}

impl FftEngine {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        Self {
            fft,
            window: Self::flat_top_window(FFT_SIZE),
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            magnitudes: vec![0.0; FFT_SIZE / 2 + 1],
            stage: FftStage::Idle,
        }
    }

    /// Flat-top window: wide main lobe, but sinusoid amplitude survives almost
    /// independently of where the tone falls between bins.
    fn flat_top_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let ratio = i as f64 / (size - 1) as f64;
                let phase = 2.0 * std::f64::consts::PI * ratio;
                (0.2810639 - 0.5208972 * phase.cos() + 0.1980399 * (2.0 * phase).cos()) as f32
            })
            .collect()
    }

    pub fn stage(&self) -> FftStage {
        self.stage
    }

    /// Largest in-range absolute sample of each half of the batch. The middle sample
    /// counts toward the first half.
    ///
    /// The first value is released to the envelope path before the transform, the
    /// second after it.
    pub fn half_batch_peaks(samples: &[f32]) -> [f32; 2] {
        let half = samples.len() / 2;
        let upper = i16::MAX as f32 - CLIP_GUARD;
        let lower = i16::MIN as f32 + CLIP_GUARD;
        let mut peaks = [0.0f32; 2];

        for (i, &sample) in samples.iter().enumerate() {
            if sample > upper || sample < lower {
                continue;
            }
            let slot = usize::from(i > half);
            peaks[slot] = peaks[slot].max(sample.abs());
        }
        peaks
    }

    pub fn process(&mut self, samples: &[f32]) -> SpectrumFrame {
        self.stage = FftStage::Filling;
        let len = FFT_SIZE.min(samples.len());
        let mean = if len > 0 {
            samples[..len].iter().sum::<f32>() / len as f32
        } else {
            0.0
        };

        self.stage = FftStage::Windowing;
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let value = if i < len { (samples[i] - mean) * self.window[i] } else { 0.0 };
            *slot = Complex::new(value, 0.0);
        }

        self.stage = FftStage::Transforming;
        self.fft.process(&mut self.buffer);
        for (magnitude, c) in self.magnitudes.iter_mut().zip(self.buffer.iter()) {
            *magnitude = c.norm();
        }

        self.stage = FftStage::PeakExtraction;
        let (dominant_frequency, dominant_magnitude) = self.major_peak();

        let mut bins = [0.0f32; NUM_BINS];
        for (bin, magnitude) in bins.iter_mut().zip(self.magnitudes.iter()) {
            *bin = magnitude.abs() / BIN_SCALE;
        }

        self.stage = FftStage::Idle;
        SpectrumFrame {
            bins,
            dominant_frequency,
            dominant_magnitude,
        }
    }

    /// Strongest local maximum below Nyquist, refined by parabolic interpolation.
    fn major_peak(&self) -> (f64, f64) {
        let m = &self.magnitudes;
        let mut best: Option<usize> = None;
        for k in 1..FFT_SIZE / 2 {
            if m[k - 1] <= m[k] && m[k] > m[k + 1] && best.map_or(true, |b| m[k] > m[b]) {
                best = Some(k);
            }
        }

        let Some(k) = best else {
            return (0.0, 0.0);
        };

        let (a, b, c) = (m[k - 1] as f64, m[k] as f64, m[k + 1] as f64);
        let denom = a - 2.0 * b + c;
        let delta = if denom.abs() > f64::EPSILON { 0.5 * (a - c) / denom } else { 0.0 };
        let frequency = (k as f64 + delta) * SAMPLE_RATE as f64 / FFT_SIZE as f64;
        let magnitude = b - 0.25 * (a - c) * delta;
        (frequency, magnitude)
    }
}

impl Default for FftEngine {
    fn default() -> Self {
        Self::new()
    }
}
