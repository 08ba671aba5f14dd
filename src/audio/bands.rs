use crate::features::{NUM_BANDS, NUM_BINS};

/// Inclusive bin range and divisor of each band.
///
/// Bins are 20 Hz wide (10240 Hz / 512). Centers step by ~1.32x from 60 Hz to 5120 Hz.
const BAND_TABLE: [(usize, usize, f32); NUM_BANDS] = [
    (3, 4, 2.0),      // 60 - 100
    (4, 5, 2.0),      // 80 - 120
    (5, 7, 3.0),      // 100 - 160
    (7, 9, 3.0),      // 140 - 200
    (9, 12, 4.0),     // 180 - 260
    (12, 16, 5.0),    // 240 - 340
    (16, 21, 6.0),    // 320 - 440
    (21, 28, 8.0),    // 420 - 600
    (29, 37, 10.0),   // 580 - 760
    (37, 48, 12.0),   // 740 - 980
    (48, 64, 17.0),   // 960 - 1300
    (64, 84, 21.0),   // 1280 - 1700
    (84, 111, 28.0),  // 1680 - 2240
    (111, 147, 37.0), // 2220 - 2960
    (147, 194, 48.0), // 2940 - 3900
    (194, 255, 62.0), // 3880 - 5120
];

/// Per-band noise floor, multiplied by squelch / 4.
const LINEAR_NOISE: [f32; NUM_BANDS] = [34.0, 28.0, 26.0, 25.0, 20.0, 12.0, 9.0, 6.0, 4.0, 4.0, 3.0, 2.0, 2.0, 2.0, 2.0, 2.0];

/// Pink-noise correction to flatten the frequency response.
const PINK_CORRECTION: [f32; NUM_BANDS] = [
    1.70, 1.71, 1.73, 1.78, 1.68, 1.56, 1.55, 1.63, 1.79, 1.62, 1.80, 2.06, 2.47, 3.35, 6.83, 9.55,
];

const MAX_BAND_VALUE: i32 = 254;
const AVERAGE_WEIGHT: f32 = 0.05;

/// How band energy gets amplified.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BandGain {
    /// AGC active: scale by the current multiplier
    Agc(f32),
    /// Manual gain knob plus input level knob (128 = unity)
    Manual { gain: u8, input_level: u8 },
}

impl BandGain {
    fn apply(self, value: f32) -> f32 {
        match self {
            BandGain::Agc(multiplier) => value * multiplier,
            BandGain::Manual { gain, input_level } => {
                value * gain as f32 / 40.0 * input_level as f32 / 128.0 + value / 16.0
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandResult {
    /// Band values before clamping
    pub calc: [f32; NUM_BANDS],
    pub bands: [u8; NUM_BANDS],
    pub averages: [f32; NUM_BANDS],
}

/// Reduces the magnitude spectrum to 16 log-spaced bands.
#[derive(Debug, Clone)]
pub struct BandAggregator {
    averages: [f32; NUM_BANDS],
}

impl BandAggregator {
    pub fn new() -> Self {
        Self {
            averages: [0.0; NUM_BANDS],
        }
    }

    /// Mean of each band's bin range, no post-processing.
    pub fn raw_bands(bins: &[f32; NUM_BINS]) -> [f32; NUM_BANDS] {
        let mut raw = [0.0f32; NUM_BANDS];
        for (value, &(from, to, divisor)) in raw.iter_mut().zip(BAND_TABLE.iter()) {
            *value = bins[from..=to].iter().sum::<f32>() / divisor;
        }
        raw
    }

    pub fn process(&mut self, bins: &[f32; NUM_BINS], squelch: u8, gain: BandGain) -> BandResult {
        let mut calc = Self::raw_bands(bins);
        let mut bands = [0u8; NUM_BANDS];

        for i in 0..NUM_BANDS {
            let floor = squelch as f32 * LINEAR_NOISE[i] / 4.0;
            let mut value = (calc[i] - floor).max(0.0);
            value *= PINK_CORRECTION[i];
            value = gain.apply(value);
            calc[i] = value;

            let clamped = (value as i32).clamp(0, MAX_BAND_VALUE);
            bands[i] = clamped as u8;
            self.averages[i] = clamped as f32 * AVERAGE_WEIGHT + (1.0 - AVERAGE_WEIGHT) * self.averages[i];
        }

        BandResult {
            calc,
            bands,
            averages: self.averages,
        }
    }

    pub fn averages(&self) -> &[f32; NUM_BANDS] {
        &self.averages
    }
}

impl Default for BandAggregator {
    fn default() -> Self {
        Self::new()
    }
}
