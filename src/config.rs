use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

/// Default UDP port for audio sync packets.
pub const DEFAULT_SYNC_PORT: u16 = 11988;
/// Default multicast group for audio sync packets.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 0, 0, 1);

/// Which audio capture variant feeds the FFT task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Default input device through cpal
    Cpal,
    /// Synthetic sine tone
    Tone,
    /// Looping WAV file
    Wav,
}

/// Audio sync role of this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Off,
    Transmit,
    Receive,
}

impl SyncMode {
    pub fn to_u8(self) -> u8 {
        match self {
            SyncMode::Off => 0,
            SyncMode::Transmit => 1,
            SyncMode::Receive => 2,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => SyncMode::Transmit,
            2 => SyncMode::Receive,
            _ => SyncMode::Off,
        }
    }
}

/// Capture settings for the selected source variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Input device name for cpal, `None` picks the host default
    pub device: Option<String>,
    /// Tone frequency in Hz
    pub tone_frequency: f32,
    /// Tone amplitude in 16-bit sample units
    pub tone_amplitude: f32,
    /// Added noise amplitude for the tone source
    pub tone_noise: f32,
    pub wav_path: Option<String>,
    /// Factor applied to normalized float samples to reach 16-bit sample units
    pub input_scale: f32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Cpal,
            device: None,
            tone_frequency: 440.0,
            tone_amplitude: 2000.0,
            tone_noise: 0.0,
            wav_path: None,
            input_scale: 8192.0,
        }
    }
}

/// Everything the core needs at startup, resolved once.
///
/// Loaded from JSON and overridden from the command line by the binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub source: SourceConfig,

    /// Noise gate level for the envelope and band noise floor
    pub squelch: u8,
    /// Manual gain, used while AGC is off
    pub gain: u8,
    /// Input level knob (0-255, 128 = unity)
    pub input_level: u8,
    /// 0 = AGC off, 1 = Normal, 2 = Vivid, 3 = Lazy
    pub agc_preset: u8,
    /// Exponential filter weighting for the envelope
    pub weighting: f32,

    /// FFT bin watched by the beat detector
    pub beat_bin: u8,
    /// Beat threshold for that bin
    pub max_volume: u8,
    /// Minimum time a peak stays asserted, in milliseconds
    pub min_show_delay_ms: u16,

    pub sync_mode: SyncMode,
    pub sync_port: u16,
    pub multicast_group: Ipv4Addr,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            squelch: 10,
            gain: 1,
            input_level: 128,
            agc_preset: 1,
            weighting: 0.2,
            beat_bin: 8,
            max_volume: 10,
            min_show_delay_ms: 15,
            sync_mode: SyncMode::Off,
            sync_port: DEFAULT_SYNC_PORT,
            multicast_group: DEFAULT_MULTICAST_GROUP,
        }
    }
}

impl AudioConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: AudioConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agc_preset > 3 {
            return Err(ConfigError::InvalidValue(format!(
                "agc_preset must be 0..=3, got {}",
                self.agc_preset
            )));
        }
        if !(self.weighting > 0.0 && self.weighting <= 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "weighting must be in (0, 1], got {}",
                self.weighting
            )));
        }
        if self.sync_port == 0 {
            return Err(ConfigError::InvalidValue("sync_port must not be 0".into()));
        }
        if !self.multicast_group.is_multicast() {
            return Err(ConfigError::InvalidValue(format!(
                "{} is not a multicast address",
                self.multicast_group
            )));
        }
        if self.source.kind == SourceKind::Wav && self.source.wav_path.is_none() {
            return Err(ConfigError::InvalidValue("wav source needs wav_path".into()));
        }
        Ok(())
    }
}
