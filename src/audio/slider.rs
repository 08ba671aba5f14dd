use super::agc::AgcController;
use crate::controls::Controls;
use log::debug;

/// Small changes publish at most this often.
const SMALL_CHANGE_MS: u64 = 3500;
/// Medium changes (> 15 units).
const MEDIUM_CHANGE_MS: u64 = 2200;
/// Big changes (> 31 units).
const BIG_CHANGE_MS: u64 = 1200;
/// Slider movement that counts as a deliberate user kick.
const KICK_THRESHOLD: i32 = 31;
const KICK_INTERVAL_MS: u64 = 3500;
const KICK_UP: f32 = 1.5;
const KICK_DOWN: f32 = 0.6;

/// Keeps the input-level knob in step with the AGC multiplier.
///
/// While AGC runs, the knob mirrors the multiplier (128 = unity, compressed above 1
/// so values up to ~5x still fit). Moving the knob by hand far enough kicks the
/// multiplier up or down.
#[derive(Debug, Clone, Default)]
pub struct GainSlider {
    last_published: Option<u8>,
    last_update_ms: u64,
    last_kick_ms: u64,
}

impl GainSlider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Knob position that represents `multiplier`.
    pub fn level_for(multiplier: f32) -> u8 {
        let level = if multiplier > 1.0 {
            128.0 * ((multiplier - 1.0) / 4.0 + 1.0)
        } else {
            128.0 * multiplier
        };
        (level as i32).clamp(0, 255) as u8
    }

    /// Returns the new knob position when it was published.
    pub fn update(&mut self, agc: &mut AgcController, controls: &Controls, now_ms: u64) -> Option<u8> {
        if !controls.agc_enabled() {
            return None;
        }

        let current = controls.input_level();
        let last_published = *self.last_published.get_or_insert(current);

        let moved = current as i32 - last_published as i32;
        if moved.abs() > KICK_THRESHOLD && now_ms.saturating_sub(self.last_kick_ms) > KICK_INTERVAL_MS {
            let factor = if moved > 0 { KICK_UP } else { KICK_DOWN };
            agc.scale_multiplier(factor);
            self.last_kick_ms = now_ms;
            debug!("input level moved by {}, kicked AGC multiplier by {}", moved, factor);
        }

        let target = Self::level_for(agc.multiplier());
        let delta = (target as i32 - current as i32).abs();
        let elapsed = now_ms.saturating_sub(self.last_update_ms);
        let due = (elapsed > SMALL_CHANGE_MS && delta > 2)
            || (elapsed > MEDIUM_CHANGE_MS && delta > 15)
            || (elapsed > BIG_CHANGE_MS && delta > 31);
        if !due {
            return None;
        }

        controls.set_input_level(target);
        self.last_update_ms = now_ms;
        self.last_published = Some(target);
        Some(target)
    }
}
