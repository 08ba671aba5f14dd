//! Real-time audio feature extraction with automatic gain control and multicast sync.
//!
//! Two flows share one `FeatureStore`: the FFT task (`audio::FftTask`) captures and
//! transforms 512-sample batches into 16 bands, and the control tick
//! (`reactive::ControlLoop`) derives the envelope, runs AGC and beat detection, and
//! moves features over the network when sync is enabled.

pub mod audio;
pub mod config;
pub mod controls;
pub mod error;
pub mod features;
pub mod reactive;
pub mod sync;

pub use config::{AudioConfig, SyncMode};
pub use controls::Controls;
pub use features::{FeatureSnapshot, FeatureStore};
pub use reactive::ControlLoop;
