//! Audio sync datagram codec.
//!
//! The layout matches the in-memory struct older firmware sends as-is (little-endian,
//! natural alignment), so the padding bytes are part of the format:
//!
//! | offset | size | field                  |
//! |--------|------|------------------------|
//! | 0      | 6    | header `"00001\0"`     |
//! | 6      | 32   | history ring           |
//! | 38     | 2    | padding                |
//! | 40     | 4    | AGC sample (i32)       |
//! | 44     | 4    | envelope sample (i32)  |
//! | 48     | 4    | smoothed average (f32) |
//! | 52     | 1    | peak flag              |
//! | 53     | 16   | bands                  |
//! | 69     | 3    | padding                |
//! | 72     | 8    | dominant magnitude     |
//! | 80     | 8    | dominant frequency     |

use crate::error::SyncError;
use crate::features::{FeatureStore, SampleFeatures, SpectrumFeatures, HISTORY_LEN, NUM_BANDS};

pub const PACKET_HEADER: [u8; 6] = *b"00001\0";
pub const PACKET_SIZE: usize = 88;

const HISTORY_OFFSET: usize = 6;
const AGC_OFFSET: usize = 40;
const SAMPLE_OFFSET: usize = 44;
const AVERAGE_OFFSET: usize = 48;
const PEAK_OFFSET: usize = 52;
const BANDS_OFFSET: usize = 53;
const MAGNITUDE_OFFSET: usize = 72;
const FREQUENCY_OFFSET: usize = 80;

/// Wire projection of the feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPacket {
    pub history: [u8; HISTORY_LEN],
    pub sample_agc: i32,
    pub sample: i32,
    pub sample_avg: f32,
    pub peak: bool,
    pub bands: [u8; NUM_BANDS],
    pub magnitude: f64,
    pub frequency: f64,
}

impl SyncPacket {
    /// Build the outgoing packet. `peak` is the transmit latch, which the caller
    /// resets when it sends.
    pub fn from_features(sample: &SampleFeatures, spectrum: &SpectrumFeatures, peak: bool) -> Self {
        Self {
            history: sample.history,
            sample_agc: sample.agc_sample as i32,
            sample: sample.envelope,
            sample_avg: sample.smoothed_average,
            peak,
            bands: spectrum.bands,
            magnitude: spectrum.dominant_magnitude,
            frequency: spectrum.dominant_frequency,
        }
    }

    /// Snapshot the store and consume its transmit peak latch.
    pub fn from_store(store: &FeatureStore) -> Self {
        let peak = store.take_udp_peak();
        Self::from_features(&store.sample(), &store.spectrum(), peak)
    }

    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        buf[..HISTORY_OFFSET].copy_from_slice(&PACKET_HEADER);
        buf[HISTORY_OFFSET..HISTORY_OFFSET + HISTORY_LEN].copy_from_slice(&self.history);
        buf[AGC_OFFSET..AGC_OFFSET + 4].copy_from_slice(&self.sample_agc.to_le_bytes());
        buf[SAMPLE_OFFSET..SAMPLE_OFFSET + 4].copy_from_slice(&self.sample.to_le_bytes());
        buf[AVERAGE_OFFSET..AVERAGE_OFFSET + 4].copy_from_slice(&self.sample_avg.to_le_bytes());
        buf[PEAK_OFFSET] = u8::from(self.peak);
        buf[BANDS_OFFSET..BANDS_OFFSET + NUM_BANDS].copy_from_slice(&self.bands);
        buf[MAGNITUDE_OFFSET..MAGNITUDE_OFFSET + 8].copy_from_slice(&self.magnitude.to_le_bytes());
        buf[FREQUENCY_OFFSET..FREQUENCY_OFFSET + 8].copy_from_slice(&self.frequency.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, SyncError> {
        let buf: &[u8; PACKET_SIZE] = data.try_into().map_err(|_| SyncError::WrongLength {
            expected: PACKET_SIZE,
            actual: data.len(),
        })?;

        let mut header = [0u8; 6];
        header.copy_from_slice(&buf[..HISTORY_OFFSET]);
        if header != PACKET_HEADER {
            return Err(SyncError::BadHeader(header));
        }

        let mut history = [0u8; HISTORY_LEN];
        history.copy_from_slice(&buf[HISTORY_OFFSET..HISTORY_OFFSET + HISTORY_LEN]);
        let mut bands = [0u8; NUM_BANDS];
        bands.copy_from_slice(&buf[BANDS_OFFSET..BANDS_OFFSET + NUM_BANDS]);

        Ok(Self {
            history,
            sample_agc: i32::from_le_bytes(field(buf, AGC_OFFSET)),
            sample: i32::from_le_bytes(field(buf, SAMPLE_OFFSET)),
            sample_avg: f32::from_le_bytes(field(buf, AVERAGE_OFFSET)),
            peak: buf[PEAK_OFFSET] != 0,
            bands,
            magnitude: f64::from_le_bytes(field(buf, MAGNITUDE_OFFSET)),
            frequency: f64::from_le_bytes(field(buf, FREQUENCY_OFFSET)),
        })
    }

    /// Overwrite the local feature vector with the remote one.
    ///
    /// The peak flag is only ever raised here, never cleared, so a peak the local
    /// renderer has not seen yet survives.
    pub fn apply_to(&self, store: &FeatureStore) {
        let mut sample = (*store.sample()).clone();
        sample.history = self.history;
        sample.agc_sample = self.sample_agc as f32;
        sample.raw_agc_sample = self.sample_agc;
        sample.envelope = self.sample;
        sample.smoothed_average = self.sample_avg;
        store.publish_sample(sample);

        let mut spectrum = (*store.spectrum()).clone();
        spectrum.bands = self.bands;
        spectrum.dominant_magnitude = self.magnitude;
        spectrum.dominant_frequency = self.frequency;
        store.publish_spectrum(spectrum);

        store.merge_remote_peak(self.peak);
    }
}

fn field<const N: usize>(buf: &[u8; PACKET_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}
