//! Envelope extraction and beat detection for the control tick.

use super::agc::AgcPreset;
use crate::features::FeatureStore;

/// Baseline follows rising input over ~8192 ticks.
const BASELINE_RISE: f32 = 8192.0;
/// Baseline drops to a lower floor over ~32 ticks.
const BASELINE_FALL: f32 = 32.0;
const AVERAGE_WINDOW: f32 = 16.0;
const PEAK_MAX_FLOOR: f32 = 0.5;
/// Minimum spacing between two beat triggers.
const RETRIGGER_MS: u64 = 100;

/// Output of one sampler step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Envelope {
    /// Gain-adjusted envelope clamped to 0..=255
    pub sample: i32,
    /// Gated envelope before manual gain, feeds AGC
    pub sample_real: f32,
    /// Decaying peak-max of `sample_real`
    pub sample_max: f32,
    /// 16-tick average of the gain-adjusted envelope
    pub sample_avg: f32,
}

/// DC-centering filter, exponential smoother and noise gate.
#[derive(Debug, Clone)]
pub struct Sampler {
    weighting: f32,
    baseline: f32,
    smoothed: f32,
    sample_max: f32,
    sample_avg: f32,
}

impl Sampler {
    /// `weighting` is the exponential filter weight of the newest reading.
    pub fn new(weighting: f32) -> Self {
        Self {
            weighting: weighting.clamp(0.0, 1.0),
            baseline: 0.0,
            smoothed: 0.0,
            sample_max: 0.0,
            sample_avg: 0.0,
        }
    }

    pub fn baseline(&self) -> f32 {
        self.baseline
    }

    pub fn sample_max(&self) -> f32 {
        self.sample_max
    }

    /// Run one step on the latest half-batch mic peak.
    ///
    /// `multiplier` and `agc_setting` only steer how the peak-max decays; manual
    /// gain is always what shapes `sample`.
    pub fn update(
        &mut self,
        mic: f32,
        squelch: u8,
        gain: u8,
        input_level: u8,
        multiplier: f32,
        agc_setting: u8,
    ) -> Envelope {
        let preset = AgcPreset::from_setting(agc_setting).constants();

        self.baseline = (self.baseline * (BASELINE_RISE - 1.0) + mic) / BASELINE_RISE;
        if mic < self.baseline {
            self.baseline = (self.baseline * (BASELINE_FALL - 1.0) + mic) / BASELINE_FALL;
        }

        let centered = (mic - self.baseline).abs();
        self.smoothed = self.weighting * centered + (1.0 - self.weighting) * self.smoothed;
        if self.smoothed <= squelch as f32 {
            self.smoothed = 0.0;
        }
        let sample_real = self.smoothed.abs();

        let adjusted = (sample_real * gain as f32 / 40.0 * input_level as f32 / 128.0 + sample_real / 16.0).clamp(0.0, 255.0);

        if self.sample_max < sample_real && sample_real > PEAK_MAX_FLOOR {
            self.sample_max += 0.5 * (sample_real - self.sample_max);
        } else if agc_setting > 0 && multiplier * self.sample_max > preset.zone_stop {
            // over the AGC stop zone, come back down fast
            self.sample_max += 0.5 * (sample_real - self.sample_max);
        } else {
            self.sample_max *= preset.sample_decay as f32;
        }
        if self.sample_max < PEAK_MAX_FLOOR {
            self.sample_max = 0.0;
        }

        self.sample_avg = (self.sample_avg * (AVERAGE_WINDOW - 1.0) + adjusted) / AVERAGE_WINDOW;

        Envelope {
            sample: adjusted as i32,
            sample_real,
            sample_max: self.sample_max,
            sample_avg: self.sample_avg,
        }
    }
}

/// Beat trigger on a single FFT bin.
#[derive(Debug, Clone, Default)]
pub struct PeakDetector {
    last_trigger_ms: Option<u64>,
}

impl PeakDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire the current peak after `min_show_delay_ms`, then test `beat_energy`
    /// against `max_volume`. Returns true when a new peak fired.
    pub fn update(&mut self, store: &FeatureStore, beat_energy: f32, max_volume: u8, min_show_delay_ms: u64, now_ms: u64) -> bool {
        if now_ms.saturating_sub(store.peak_time_ms()) > min_show_delay_ms {
            store.clear_peaks();
        }

        let rearmed = self
            .last_trigger_ms
            .map_or(true, |last| now_ms > last + RETRIGGER_MS);
        if beat_energy > max_volume as f32 && rearmed {
            store.trigger_peak(now_ms);
            self.last_trigger_ms = Some(now_ms);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle(sampler: &mut Sampler, level: f32, ticks: usize, squelch: u8) -> Envelope {
        let mut envelope = Envelope::default();
        for _ in 0..ticks {
            envelope = sampler.update(level, squelch, 40, 128, 1.0, 0);
        }
        envelope
    }

    #[test]
    fn test_noise_gate_forces_silence() {
        let mut sampler = Sampler::new(0.2);
        let mut envelope = Envelope::default();
        // alternating +-5 around zero never clears squelch 10
        for i in 0..2000 {
            let mic = if i % 2 == 0 { 5.0 } else { -5.0 };
            envelope = sampler.update(mic, 10, 40, 128, 1.0, 1);
        }
        assert_eq!(envelope.sample, 0);
        assert_eq!(envelope.sample_real, 0.0);
    }

    #[test]
    fn test_baseline_falls_faster_than_it_rises() {
        let mut rising = Sampler::new(0.2);
        settle(&mut rising, 1000.0, 100, 0);
        let risen = rising.baseline();

        let mut falling = Sampler::new(0.2);
        settle(&mut falling, 1000.0, 20000, 0);
        let start = falling.baseline();
        settle(&mut falling, 0.0, 100, 0);
        let fallen = start - falling.baseline();

        assert!(fallen > risen * 10.0, "fell {} rose {}", fallen, risen);
    }

    #[test]
    fn test_loud_input_saturates_sample() {
        let mut sampler = Sampler::new(0.2);
        let envelope = settle(&mut sampler, 20000.0, 50, 0);
        assert_eq!(envelope.sample, 255);
        assert!(envelope.sample_max > 0.0);
    }

    #[test]
    fn test_peak_max_decays_in_silence() {
        let mut sampler = Sampler::new(1.0);
        settle(&mut sampler, 500.0, 20, 0);
        let high = sampler.sample_max();
        // baseline stays near 0 during the short burst, so the gate opens and closes cleanly
        for _ in 0..200 {
            sampler.update(sampler.baseline(), 0, 40, 128, 1.0, 1);
        }
        assert!(sampler.sample_max() < high);
    }

    #[test]
    fn test_peak_max_snaps_down_over_stop_zone() {
        let run = |multiplier: f32, setting: u8| {
            let mut sampler = Sampler::new(1.0);
            for _ in 0..20 {
                sampler.update(500.0, 0, 40, 128, multiplier, setting);
            }
            let high = sampler.sample_max();
            // input at the baseline: centered value 0
            sampler.update(sampler.baseline(), 0, 40, 128, multiplier, setting);
            (high, sampler.sample_max())
        };

        // ~500 * 1.0 is over the Normal stop zone (336): halve toward the input
        let (high, snapped) = run(1.0, 1);
        assert!(snapped < high * 0.6, "high {} snapped {}", high, snapped);

        // ~500 * 0.1 is under it: ordinary decay
        let (high, decayed) = run(0.1, 1);
        assert!(decayed > high * 0.99);

        // AGC off never snaps
        let (high, decayed) = run(1.0, 0);
        assert!(decayed > high * 0.99);
    }

    #[test]
    fn test_peak_persists_for_show_delay() {
        let store = FeatureStore::new();
        let mut detector = PeakDetector::new();
        assert!(detector.update(&store, 50.0, 10, 16, 0));

        detector.update(&store, 0.0, 10, 16, 10);
        assert!(store.peak());
        detector.update(&store, 0.0, 10, 16, 20);
        assert!(!store.peak());
    }

    #[test]
    fn test_retrigger_interval() {
        let store = FeatureStore::new();
        let mut detector = PeakDetector::new();
        assert!(detector.update(&store, 50.0, 10, 16, 1000));
        assert!(!detector.update(&store, 50.0, 10, 16, 1050));
        assert!(!detector.update(&store, 50.0, 10, 16, 1100));
        assert!(detector.update(&store, 50.0, 10, 16, 1101));
    }

    #[test]
    fn test_acknowledged_peak_stays_cleared() {
        let store = FeatureStore::new();
        let mut detector = PeakDetector::new();
        detector.update(&store, 50.0, 10, 500, 0);
        store.acknowledge_peak();
        detector.update(&store, 0.0, 10, 500, 5);
        assert!(!store.peak());
        // transmit latch is untouched by the consumer
        assert!(store.take_udp_peak());
    }
}
