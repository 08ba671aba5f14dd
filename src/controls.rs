use crate::config::{AudioConfig, SyncMode};
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};

/// Runtime knobs shared by the control tick and the FFT task.
///
/// Both tasks re-read these every cycle. Reads are relaxed: a stale value for one
/// cycle is acceptable.
#[derive(Debug)]
pub struct Controls {
    sync_mode: AtomicU8,
    agc_preset: AtomicU8,
    squelch: AtomicU8,
    gain: AtomicU8,
    input_level: AtomicU8,
    beat_bin: AtomicU8,
    max_volume: AtomicU8,
    min_show_delay_ms: AtomicU16,
}

impl Controls {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            sync_mode: AtomicU8::new(config.sync_mode.to_u8()),
            agc_preset: AtomicU8::new(config.agc_preset),
            squelch: AtomicU8::new(config.squelch),
            gain: AtomicU8::new(config.gain),
            input_level: AtomicU8::new(config.input_level),
            beat_bin: AtomicU8::new(config.beat_bin),
            max_volume: AtomicU8::new(config.max_volume),
            min_show_delay_ms: AtomicU16::new(config.min_show_delay_ms),
        }
    }

    pub fn sync_mode(&self) -> SyncMode {
        SyncMode::from_u8(self.sync_mode.load(Ordering::Relaxed))
    }

    pub fn set_sync_mode(&self, mode: SyncMode) {
        self.sync_mode.store(mode.to_u8(), Ordering::Relaxed);
    }

    /// True while features arrive over the network instead of local capture.
    pub fn is_receiving(&self) -> bool {
        self.sync_mode() == SyncMode::Receive
    }

    /// Raw preset index, 0 means AGC off. Out-of-range values read as off.
    pub fn agc_preset(&self) -> u8 {
        match self.agc_preset.load(Ordering::Relaxed) {
            p @ 0..=3 => p,
            _ => 0,
        }
    }

    pub fn set_agc_preset(&self, preset: u8) {
        self.agc_preset.store(preset, Ordering::Relaxed);
    }

    pub fn agc_enabled(&self) -> bool {
        self.agc_preset() > 0
    }

    pub fn squelch(&self) -> u8 {
        self.squelch.load(Ordering::Relaxed)
    }

    pub fn set_squelch(&self, squelch: u8) {
        self.squelch.store(squelch, Ordering::Relaxed);
    }

    pub fn gain(&self) -> u8 {
        self.gain.load(Ordering::Relaxed)
    }

    pub fn set_gain(&self, gain: u8) {
        self.gain.store(gain, Ordering::Relaxed);
    }

    pub fn input_level(&self) -> u8 {
        self.input_level.load(Ordering::Relaxed)
    }

    pub fn set_input_level(&self, level: u8) {
        self.input_level.store(level, Ordering::Relaxed);
    }

    pub fn beat_bin(&self) -> u8 {
        self.beat_bin.load(Ordering::Relaxed)
    }

    pub fn set_beat_bin(&self, bin: u8) {
        self.beat_bin.store(bin, Ordering::Relaxed);
    }

    pub fn max_volume(&self) -> u8 {
        self.max_volume.load(Ordering::Relaxed)
    }

    pub fn set_max_volume(&self, volume: u8) {
        self.max_volume.store(volume, Ordering::Relaxed);
    }

    pub fn min_show_delay_ms(&self) -> u16 {
        self.min_show_delay_ms.load(Ordering::Relaxed)
    }

    pub fn set_min_show_delay_ms(&self, delay: u16) {
        self.min_show_delay_ms.store(delay, Ordering::Relaxed);
    }
}

impl Default for Controls {
    fn default() -> Self {
        Self::from_config(&AudioConfig::default())
    }
}
