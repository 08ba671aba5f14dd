pub mod agc;
pub mod bands;
pub mod fft;
pub mod sampler;
pub mod slider;
pub mod source;
pub mod task;

pub use agc::{AgcController, AgcOutput, AgcPreset};
pub use bands::{BandAggregator, BandGain};
pub use fft::{FftEngine, FftStage, SpectrumFrame};
pub use sampler::{Envelope, PeakDetector, Sampler};
pub use slider::GainSlider;
pub use source::{build_source, AudioSource, CpalSource, ToneSource, WavSource};
pub use task::{FftCycle, FftTask};

/// Capture rate of every audio source, in Hz.
pub const SAMPLE_RATE: u32 = 10240;
/// Samples per FFT batch. Must be a power of two.
pub const FFT_SIZE: usize = 512;
/// Frequency resolution of one FFT bin (20 Hz).
pub const BIN_WIDTH_HZ: f64 = SAMPLE_RATE as f64 / FFT_SIZE as f64;
