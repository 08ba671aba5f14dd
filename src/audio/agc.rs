//! Automatic gain control.
//!
//! A PI controller computes a multiplier so that the peak-max of the envelope lands on
//! one of two setpoints. Which setpoint is a bang-bang decision on the projected
//! amplified signal. The controller runs on a fixed minimum tick so the integration
//! constants mean the same thing regardless of how often the caller shows up.

/// Multiplier clamp range.
pub const MIN_MULTIPLIER: f32 = 1.0 / 64.0;
pub const MAX_MULTIPLIER: f32 = 32.0;

/// Control math runs at most once per this many milliseconds.
const MIN_TICK_MS: u64 = 2;
/// Below this the envelope counts as silence for the controller.
const SILENCE_LEVEL: f32 = 2.0;
/// Below this the peak-max counts as silence for the controller.
const SILENCE_PEAK: f32 = 1.0;

/// Integrator only accumulates while the target multiplier is inside this band.
const SAFE_TARGET: (f32, f32) = (0.085, 6.5);
/// 2 ms integration time, 0.25 damping.
const INTEGRATION_RATE: f64 = 0.002 * 0.25;
const INTEGRATOR_DECAY: f64 = 0.9;
const INTEGRATOR_SQUELCH_DECAY: f64 = 0.91;
const INTEGRATOR_SNAP: f64 = 0.01;

/// Constant table of one AGC preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetConstants {
    /// Decay factor for the peak-max while the signal is below it
    pub sample_decay: f64,
    /// Low emergency zone, added to squelch
    pub zone_low: f32,
    /// High emergency zone
    pub zone_high: f32,
    /// Integrator ceiling for the amplified peak-max
    pub zone_stop: f32,
    /// First setpoint, 40-65% of scale
    pub target0: f32,
    /// Switch to the second setpoint above this projected level
    pub target0_up: f32,
    /// Second setpoint, ~85% of scale
    pub target1: f32,
    /// ~0.15 s settling
    pub follow_fast: f64,
    /// 2-15 s settling
    pub follow_slow: f64,
    pub kp: f64,
    pub ki: f64,
    /// Blend factor for the visible AGC sample
    pub sample_smooth: f32,
}

const NORMAL: PresetConstants = PresetConstants {
    sample_decay: 0.9994,
    zone_low: 32.0,
    zone_high: 240.0,
    zone_stop: 336.0,
    target0: 112.0,
    target0_up: 88.0,
    target1: 220.0,
    follow_fast: 1.0 / 192.0,
    follow_slow: 1.0 / 6144.0,
    kp: 0.6,
    ki: 1.7,
    sample_smooth: 1.0 / 12.0,
};

const VIVID: PresetConstants = PresetConstants {
    sample_decay: 0.9985,
    zone_low: 28.0,
    zone_high: 240.0,
    zone_stop: 448.0,
    target0: 144.0,
    target0_up: 64.0,
    target1: 224.0,
    follow_fast: 1.0 / 128.0,
    follow_slow: 1.0 / 4096.0,
    kp: 1.5,
    ki: 1.85,
    sample_smooth: 1.0 / 6.0,
};

const LAZY: PresetConstants = PresetConstants {
    sample_decay: 0.9997,
    zone_low: 36.0,
    zone_high: 248.0,
    zone_stop: 304.0,
    target0: 164.0,
    target0_up: 116.0,
    target1: 216.0,
    follow_fast: 1.0 / 256.0,
    follow_slow: 1.0 / 8192.0,
    kp: 0.65,
    ki: 1.2,
    sample_smooth: 1.0 / 16.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgcPreset {
    Normal,
    Vivid,
    Lazy,
}

impl AgcPreset {
    /// Preset for a raw setting (0 = off, 1..=3). With AGC off the Normal table
    /// still drives peak-max decay.
    pub fn from_setting(setting: u8) -> Self {
        match setting {
            2 => AgcPreset::Vivid,
            3 => AgcPreset::Lazy,
            _ => AgcPreset::Normal,
        }
    }

    pub fn constants(self) -> &'static PresetConstants {
        match self {
            AgcPreset::Normal => &NORMAL,
            AgcPreset::Vivid => &VIVID,
            AgcPreset::Lazy => &LAZY,
        }
    }
}

/// Values published after each AGC call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgcOutput {
    pub multiplier: f32,
    pub agc_sample: f32,
    pub raw_agc_sample: i32,
}

#[derive(Debug, Clone)]
pub struct AgcController {
    multiplier: f32,
    integrator: f64,
    setting: Option<u8>,
    last_tick_ms: Option<u64>,
    agc_sample: f32,
    raw_agc_sample: i32,
}

impl AgcController {
    pub fn new() -> Self {
        Self {
            multiplier: 1.0,
            integrator: 0.0,
            setting: None,
            last_tick_ms: None,
            agc_sample: 0.0,
            raw_agc_sample: 0,
        }
    }

    pub fn multiplier(&self) -> f32 {
        self.multiplier
    }

    pub fn integrator(&self) -> f64 {
        self.integrator
    }

    pub fn agc_sample(&self) -> f32 {
        self.agc_sample
    }

    /// Record the active preset setting. A change re-zeroes the integrator.
    pub fn select_preset(&mut self, setting: u8) {
        if self.setting != Some(setting) {
            self.integrator = 0.0;
            self.setting = Some(setting);
        }
    }

    /// Scale the multiplier from outside the control loop ("user kick").
    pub fn scale_multiplier(&mut self, factor: f32) {
        self.multiplier = (self.multiplier * factor).clamp(MIN_MULTIPLIER, MAX_MULTIPLIER);
    }

    /// One AGC step.
    ///
    /// * `sample_real` - gated, smoothed envelope before manual gain
    /// * `sample_max` - decaying peak-max of that envelope
    /// * `squelch` - noise gate level
    /// * `setting` - raw preset setting, 0 = off
    pub fn update(&mut self, sample_real: f32, sample_max: f32, squelch: u8, setting: u8, now_ms: u64) -> AgcOutput {
        self.select_preset(setting);
        let preset = AgcPreset::from_setting(setting).constants();

        let last_multiplier = self.multiplier;
        let mut multiplier = self.multiplier;

        let due = self
            .last_tick_ms
            .map_or(true, |last| now_ms.saturating_sub(last) > MIN_TICK_MS);
        if due {
            self.last_tick_ms = Some(now_ms);
            multiplier = self.control_step(sample_real, sample_max, squelch, preset, last_multiplier);
        }

        let mut amplified = sample_real * multiplier;
        if sample_real.abs() < SILENCE_LEVEL {
            amplified = 0.0;
        }
        amplified = amplified.min(255.0);
        if amplified < 1.0 {
            amplified = 0.0;
        }

        self.multiplier = multiplier;
        self.raw_agc_sample = (0.8 * amplified + 0.2 * self.raw_agc_sample as f32) as i32;
        if amplified.abs() < 1.0 {
            // fast path to silence
            self.agc_sample = 0.5 * amplified + 0.5 * self.agc_sample;
        } else {
            self.agc_sample += preset.sample_smooth * (amplified - self.agc_sample);
        }

        AgcOutput {
            multiplier: self.multiplier,
            agc_sample: self.agc_sample,
            raw_agc_sample: self.raw_agc_sample,
        }
    }

    fn control_step(
        &mut self,
        sample_real: f32,
        sample_max: f32,
        squelch: u8,
        preset: &PresetConstants,
        last_multiplier: f32,
    ) -> f32 {
        let projected = sample_real * last_multiplier;

        let mut target = if sample_real.abs() < SILENCE_LEVEL || sample_max < SILENCE_PEAK {
            // squelched: hold the gain, spin the integrator down
            if self.integrator.abs() < INTEGRATOR_SNAP {
                self.integrator = 0.0;
            } else {
                self.integrator *= INTEGRATOR_SQUELCH_DECAY;
            }
            last_multiplier
        } else if projected <= preset.target0_up {
            preset.target0 / sample_max
        } else {
            preset.target1 / sample_max
        };
        target = target.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER);

        let control_error = (target - last_multiplier) as f64;

        // anti-windup
        let in_safe_band = target > SAFE_TARGET.0 && target < SAFE_TARGET.1;
        let under_ceiling = last_multiplier * sample_max < preset.zone_stop;
        if in_safe_band && under_ceiling {
            self.integrator += control_error * INTEGRATION_RATE;
        } else {
            self.integrator *= INTEGRATOR_DECAY;
        }

        let zone_check = sample_real * last_multiplier;
        let emergency = zone_check > preset.zone_high || zone_check < squelch as f32 + preset.zone_low;
        let follow = if emergency { preset.follow_fast } else { preset.follow_slow };

        let next = last_multiplier as f64 + follow * (preset.kp * control_error + preset.ki * self.integrator);
        // the PI step can overshoot
        (next as f32).clamp(MIN_MULTIPLIER, MAX_MULTIPLIER)
    }
}

impl Default for AgcController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Feed a constant envelope at 3 ms spacing.
    fn drive(agc: &mut AgcController, level: f32, ticks: u64, setting: u8, start_ms: u64) -> u64 {
        let mut now = start_ms;
        for _ in 0..ticks {
            now += 3;
            agc.update(level, level, 10, setting, now);
        }
        now
    }

    #[test]
    fn test_quiet_signal_raises_gain() {
        let mut agc = AgcController::new();
        drive(&mut agc, 20.0, 5000, 1, 0);
        assert!(agc.multiplier() > 1.0, "multiplier {}", agc.multiplier());
        assert!(agc.agc_sample() > 20.0);
    }

    #[test]
    fn test_loud_signal_lowers_gain() {
        let mut agc = AgcController::new();
        drive(&mut agc, 250.0, 5000, 1, 0);
        assert!(agc.multiplier() < 1.0, "multiplier {}", agc.multiplier());
    }

    #[test]
    fn test_preset_switch_resets_integrator() {
        let mut agc = AgcController::new();
        let now = drive(&mut agc, 20.0, 500, 1, 0);
        assert!(agc.integrator() != 0.0);

        // same timestamp: control math is not due, so nothing accumulates
        agc.update(20.0, 20.0, 10, 2, now);
        assert_eq!(agc.integrator(), 0.0);
    }

    #[test]
    fn test_calls_faster_than_tick_skip_control_math() {
        let mut agc = AgcController::new();
        agc.update(50.0, 50.0, 10, 1, 100);
        let after_first = agc.multiplier();
        let out = agc.update(50.0, 50.0, 10, 1, 101);
        assert_eq!(out.multiplier, after_first);
        // amplification still applies to the latest sample
        assert!(out.raw_agc_sample > 0);
    }

    #[test]
    fn test_silence_spins_integrator_down() {
        let mut agc = AgcController::new();
        let now = drive(&mut agc, 20.0, 500, 1, 0);
        let wound = agc.integrator().abs();
        drive(&mut agc, 0.0, 200, 1, now);
        assert!(agc.integrator().abs() < wound * 0.01);
        assert!(agc.agc_sample() < 0.01);
    }

    #[test]
    fn test_output_is_zero_below_silence_level() {
        let mut agc = AgcController::new();
        let out = agc.update(1.5, 40.0, 10, 1, 10);
        assert_eq!(out.raw_agc_sample, 0);
        assert_eq!(out.agc_sample, 0.0);
    }

    #[test]
    fn test_kick_respects_clamp() {
        let mut agc = AgcController::new();
        for _ in 0..20 {
            agc.scale_multiplier(1.5);
        }
        assert_eq!(agc.multiplier(), MAX_MULTIPLIER);
        for _ in 0..40 {
            agc.scale_multiplier(0.6);
        }
        assert_eq!(agc.multiplier(), MIN_MULTIPLIER);
    }

    #[test]
    fn test_integrator_frozen_outside_safe_band() {
        let mut agc = AgcController::new();
        let now = drive(&mut agc, 20.0, 500, 1, 0);
        let wound = agc.integrator().abs();
        assert!(wound > 0.0);

        // peak-max 10 asks for 112 / 10 = 11.2, above the safe band
        drive(&mut agc, 10.0, 100, 1, now);
        assert!(agc.integrator().abs() < wound * 1e-3, "integrator {}", agc.integrator());
    }

    #[test]
    fn test_integrator_frozen_above_stop_zone() {
        let step = |sample_max: f32| {
            let mut agc = AgcController::new();
            let mut now = 0;
            for _ in 0..50 {
                now += 3;
                agc.update(100.0, sample_max, 10, 1, now);
            }
            agc.integrator()
        };
        // 1.0 * 300 is under the Normal stop zone (336), 1.0 * 400 is over it;
        // both targets (0.73 and 0.55) sit inside the safe band
        assert!(step(300.0) < 0.0);
        assert_eq!(step(400.0), 0.0);
    }

    #[test]
    fn test_emergency_zone_follows_fast() {
        let first_step = |sample_real: f32, sample_max: f32| {
            let mut agc = AgcController::new();
            agc.update(sample_real, sample_max, 10, 1, 3);
            (agc.multiplier() - 1.0).abs()
        };
        // zone check 100 sits inside 10 + 32 .. 240, target 2.2
        let slow = first_step(100.0, 100.0);
        // zone check 250 is above the high zone, same target
        let high = first_step(250.0, 100.0);
        // zone check 20 is under squelch + low zone, target 2.24
        let low = first_step(20.0, 50.0);

        assert!(slow > 0.0);
        assert!(high > slow * 10.0, "high {} slow {}", high, slow);
        assert!(low > slow * 10.0, "low {} slow {}", low, slow);
    }

    proptest! {
        #[test]
        fn multiplier_stays_clamped(
            steps in prop::collection::vec((0.0f32..2000.0, 0.0f32..2000.0, 0u8..4, 0u64..10), 1..400),
            squelch in any::<u8>(),
        ) {
            let mut agc = AgcController::new();
            let mut now = 0u64;
            for (real, max, setting, dt) in steps {
                now += dt;
                let out = agc.update(real, max, squelch, setting, now);
                prop_assert!(out.multiplier >= MIN_MULTIPLIER && out.multiplier <= MAX_MULTIPLIER);
                prop_assert!(out.agc_sample >= 0.0 && out.agc_sample <= 255.0);
            }
        }
    }
}
