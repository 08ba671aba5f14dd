//! The shared feature vector.
//!
//! Two writers update it: the control tick (envelope, averages, AGC samples, history
//! and the peak flags) and the FFT task (bins, bands, dominant frequency, and the
//! half-batch mic peaks the control tick consumes). In receive mode the sync receiver
//! takes over both groups, since local capture and FFT are suspended.
//!
//! Each group is published as one immutable snapshot through `ArcSwap`, so readers
//! never block and never see a half-written group. Nothing ties the groups
//! together: a reader may see envelope data from tick N next to bands from tick N-1.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub const NUM_BANDS: usize = 16;
pub const NUM_BINS: usize = 256;
pub const HISTORY_LEN: usize = 32;

/// Fields owned by the control tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFeatures {
    /// Gain-adjusted envelope, 0-255
    pub envelope: i32,
    /// Ungated envelope as float, feeds AGC
    pub envelope_real: f32,
    pub smoothed_average: f32,
    pub agc_sample: f32,
    pub raw_agc_sample: i32,
    pub multiplier: f32,
    pub history: [u8; HISTORY_LEN],
}

impl Default for SampleFeatures {
    fn default() -> Self {
        Self {
            envelope: 0,
            envelope_real: 0.0,
            smoothed_average: 0.0,
            agc_sample: 0.0,
            raw_agc_sample: 0,
            multiplier: 1.0,
            history: [0; HISTORY_LEN],
        }
    }
}

/// Fields owned by the FFT task.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFeatures {
    /// Scaled magnitude spectrum (|X| / 16)
    pub bins: [f32; NUM_BINS],
    /// Band values before clamping
    pub band_calc: [f32; NUM_BANDS],
    pub bands: [u8; NUM_BANDS],
    pub band_averages: [f32; NUM_BANDS],
    pub dominant_frequency: f64,
    pub dominant_magnitude: f64,
}

impl Default for SpectrumFeatures {
    fn default() -> Self {
        Self {
            bins: [0.0; NUM_BINS],
            band_calc: [0.0; NUM_BANDS],
            bands: [0; NUM_BANDS],
            band_averages: [0.0; NUM_BANDS],
            dominant_frequency: 0.0,
            dominant_magnitude: 0.0,
        }
    }
}

/// Both half-batch mic peaks of one FFT batch, tagged with the batch number.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MicPeaks {
    pub batch: u64,
    pub halves: [f32; 2],
}

/// Read-only view handed to the rendering consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSnapshot {
    pub sample: Arc<SampleFeatures>,
    pub spectrum: Arc<SpectrumFeatures>,
    pub peak: bool,
    pub max_volume: u8,
}

impl FeatureSnapshot {
    pub fn bands(&self) -> &[u8; NUM_BANDS] {
        &self.spectrum.bands
    }

    pub fn envelope(&self) -> i32 {
        self.sample.envelope
    }

    pub fn agc_sample(&self) -> f32 {
        self.sample.agc_sample
    }
}

/// Owner of all shared feature state.
#[derive(Debug)]
pub struct FeatureStore {
    sample: ArcSwap<SampleFeatures>,
    spectrum: ArcSwap<SpectrumFeatures>,
    mic_peaks: ArcSwap<MicPeaks>,
    peak: AtomicBool,
    udp_peak: AtomicBool,
    peak_time_ms: AtomicU64,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self {
            sample: ArcSwap::from_pointee(SampleFeatures::default()),
            spectrum: ArcSwap::from_pointee(SpectrumFeatures::default()),
            mic_peaks: ArcSwap::from_pointee(MicPeaks::default()),
            peak: AtomicBool::new(false),
            udp_peak: AtomicBool::new(false),
            peak_time_ms: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self, max_volume: u8) -> FeatureSnapshot {
        FeatureSnapshot {
            sample: self.sample.load_full(),
            spectrum: self.spectrum.load_full(),
            peak: self.peak(),
            max_volume,
        }
    }

    pub fn sample(&self) -> Arc<SampleFeatures> {
        self.sample.load_full()
    }

    pub fn spectrum(&self) -> Arc<SpectrumFeatures> {
        self.spectrum.load_full()
    }

    pub fn publish_sample(&self, features: SampleFeatures) {
        self.sample.store(Arc::new(features));
    }

    pub fn publish_spectrum(&self, features: SpectrumFeatures) {
        self.spectrum.store(Arc::new(features));
    }

    pub fn mic_peaks(&self) -> MicPeaks {
        **self.mic_peaks.load()
    }

    /// Publish the two half-batch peaks of a new batch as one unit.
    pub fn publish_mic_peaks(&self, halves: [f32; 2]) {
        let batch = self.mic_peaks.load().batch.wrapping_add(1);
        self.mic_peaks.store(Arc::new(MicPeaks { batch, halves }));
    }

    pub fn peak(&self) -> bool {
        self.peak.load(Ordering::Acquire)
    }

    pub fn peak_time_ms(&self) -> u64 {
        self.peak_time_ms.load(Ordering::Acquire)
    }

    /// Assert a peak for both the local consumer and the next transmit.
    pub fn trigger_peak(&self, now_ms: u64) {
        self.peak_time_ms.store(now_ms, Ordering::Release);
        self.peak.store(true, Ordering::Release);
        self.udp_peak.store(true, Ordering::Release);
    }

    pub fn clear_peaks(&self) {
        self.peak.store(false, Ordering::Release);
        self.udp_peak.store(false, Ordering::Release);
    }

    /// Consumer signal that the current peak has been rendered.
    pub fn acknowledge_peak(&self) {
        self.peak.store(false, Ordering::Release);
    }

    /// Sets the local flag from the network without cancelling a pending local peak.
    pub fn merge_remote_peak(&self, remote: bool) {
        if remote {
            // no-op when already set
            self.peak.fetch_or(true, Ordering::AcqRel);
        }
    }

    /// Returns the transmit peak latch and resets it.
    pub fn take_udp_peak(&self) -> bool {
        self.udp_peak.swap(false, Ordering::AcqRel)
    }
}

impl Default for FeatureStore {
    fn default() -> Self {
        Self::new()
    }
}
