//! The control tick.
//!
//! Runs at the host's cadence: envelope, beat detection, AGC, history, slider
//! bookkeeping, then sync transmit or receive polling. The FFT task runs beside it and
//! the two only meet in the `FeatureStore`.

use log::debug;
use std::sync::Arc;

use crate::audio::{AgcController, GainSlider, PeakDetector, Sampler};
use crate::config::{AudioConfig, SyncMode};
use crate::controls::Controls;
use crate::features::{FeatureStore, HISTORY_LEN, NUM_BINS};
use crate::sync::SyncLink;

/// Receive polling waits this long after the last sampling tick.
const RECEIVE_DELAY_MS: u64 = 10;
/// The sampling clock is refreshed at least this often, even while receiving.
const CLOCK_REFRESH_MS: u64 = 20;
const LOG_EVERY: u64 = 1000;

pub struct ControlLoop {
    store: Arc<FeatureStore>,
    controls: Arc<Controls>,
    sampler: Sampler,
    peaks: PeakDetector,
    agc: AgcController,
    slider: GainSlider,
    link: Option<SyncLink>,
    /// Batch number of the last consumed mic peaks
    mic_batch: u64,
    /// Second-half peak waiting for the next tick
    pending_half: Option<f32>,
    mic: f32,
    last_time_ms: u64,
    ticks: u64,
}

impl ControlLoop {
    pub fn new(config: &AudioConfig, store: Arc<FeatureStore>, controls: Arc<Controls>, link: Option<SyncLink>) -> Self {
        Self {
            store,
            controls,
            sampler: Sampler::new(config.weighting),
            peaks: PeakDetector::new(),
            agc: AgcController::new(),
            slider: GainSlider::new(),
            link,
            mic_batch: 0,
            pending_half: None,
            mic: 0.0,
            last_time_ms: 0,
            ticks: 0,
        }
    }

    pub fn store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    pub fn agc(&self) -> &AgcController {
        &self.agc
    }

    pub fn link(&self) -> Option<&SyncLink> {
        self.link.as_ref()
    }

    /// Run one control tick at `now_ms` (monotonic milliseconds).
    pub fn tick(&mut self, now_ms: u64) {
        self.ticks += 1;
        if now_ms.saturating_sub(self.last_time_ms) > CLOCK_REFRESH_MS {
            self.last_time_ms = now_ms;
        }

        let mode = self.controls.sync_mode();
        if mode != SyncMode::Receive {
            self.last_time_ms = now_ms;
            self.sample(now_ms);
        }

        let Some(link) = self.link.as_mut() else {
            return;
        };
        match mode {
            SyncMode::Transmit => {
                link.transmit(&self.store, now_ms);
            }
            SyncMode::Receive => {
                if now_ms.saturating_sub(self.last_time_ms) > RECEIVE_DELAY_MS {
                    link.receive(&self.store);
                }
            }
            SyncMode::Off => {}
        }
    }

    /// A new batch releases its first-half peak now and its second-half peak on the
    /// following tick. Without a new batch the last value is held.
    fn next_mic_peak(&mut self) -> f32 {
        let peaks = self.store.mic_peaks();
        if peaks.batch != self.mic_batch {
            self.mic_batch = peaks.batch;
            self.mic = peaks.halves[0];
            self.pending_half = Some(peaks.halves[1]);
        } else if let Some(second) = self.pending_half.take() {
            self.mic = second;
        }
        self.mic
    }

    fn sample(&mut self, now_ms: u64) {
        let mic = self.next_mic_peak();
        let controls = &self.controls;
        let setting = controls.agc_preset();
        let squelch = controls.squelch();

        let envelope = self.sampler.update(
            mic,
            squelch,
            controls.gain(),
            controls.input_level(),
            self.agc.multiplier(),
            setting,
        );

        let beat_bin = (controls.beat_bin() as usize).min(NUM_BINS - 1);
        let beat_energy = self.store.spectrum().bins[beat_bin];
        self.peaks.update(
            &self.store,
            beat_energy,
            controls.max_volume(),
            controls.min_show_delay_ms() as u64,
            now_ms,
        );

        let agc = self
            .agc
            .update(envelope.sample_real, envelope.sample_max, squelch, setting, now_ms);

        let mut features = (*self.store.sample()).clone();
        features.envelope = envelope.sample;
        features.envelope_real = envelope.sample_real;
        features.smoothed_average = envelope.sample_avg;
        features.agc_sample = agc.agc_sample;
        features.raw_agc_sample = agc.raw_agc_sample;
        features.multiplier = agc.multiplier;
        features.history[(now_ms % HISTORY_LEN as u64) as usize] = agc.agc_sample as u8;
        self.store.publish_sample(features);

        if let Some(level) = self.slider.update(&mut self.agc, controls, now_ms) {
            debug!("Input level follows AGC: {}", level);
        }

        if self.ticks % LOG_EVERY == 0 {
            debug!(
                "Tick {}: mic {:.0}, sample {}, max {:.1}, agc {:.1}, mult {:.3}, integrator {:.5}, peak {}",
                self.ticks,
                mic,
                envelope.sample,
                envelope.sample_max,
                agc.agc_sample,
                agc.multiplier,
                self.agc.integrator(),
                self.store.peak()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::SpectrumFeatures;
    use crate::sync::{SyncPacket, SyncSocket};
    use std::net::{Ipv4Addr, SocketAddr};

    fn control_loop(controls: Arc<Controls>, link: Option<SyncLink>) -> ControlLoop {
        ControlLoop::new(&AudioConfig::default(), Arc::new(FeatureStore::new()), controls, link)
    }

    #[test]
    fn test_tick_publishes_envelope_and_history() {
        let mut control = control_loop(Arc::new(Controls::default()), None);
        let store = control.store().clone();

        // alternate loud and quiet half-batch peaks, like a 10 ms pulse train
        for tick in 0..400u64 {
            if tick % 2 == 0 {
                store.publish_mic_peaks([3000.0, 0.0]);
            }
            control.tick(tick * 3);
        }

        let sample = store.sample();
        assert!(sample.envelope > 0);
        assert!(sample.agc_sample > 0.0);
        assert!(sample.history.iter().any(|&h| h > 0));
        assert_eq!(sample.multiplier, control.agc().multiplier());
    }

    #[test]
    fn test_half_batch_peaks_release_on_consecutive_ticks() {
        let mut control = control_loop(Arc::new(Controls::default()), None);
        let store = control.store().clone();

        // both halves land in the store long before the next tick
        store.publish_mic_peaks([5000.0, 100.0]);
        assert_eq!(control.next_mic_peak(), 5000.0);
        assert_eq!(control.next_mic_peak(), 100.0);
        // no new batch: hold the last value
        assert_eq!(control.next_mic_peak(), 100.0);

        store.publish_mic_peaks([7000.0, 200.0]);
        control.tick(10);
        assert_eq!(control.mic, 7000.0);
        control.tick(20);
        assert_eq!(control.mic, 200.0);
    }

    #[test]
    fn test_loud_first_half_reaches_envelope() {
        let mut control = control_loop(Arc::new(Controls::default()), None);
        let store = control.store().clone();

        let mut now = 0;
        for _ in 0..50 {
            store.publish_mic_peaks([5000.0, 0.0]);
            now += 10;
            control.tick(now);
            now += 10;
            control.tick(now);
        }
        assert!(store.sample().envelope_real > 0.0);
    }

    #[test]
    fn test_beat_bin_triggers_peak() {
        let controls = Arc::new(Controls::default());
        let mut control = control_loop(controls.clone(), None);
        let store = control.store().clone();

        let mut spectrum = SpectrumFeatures::default();
        spectrum.bins[controls.beat_bin() as usize] = 50.0;
        store.publish_spectrum(spectrum);

        control.tick(500);
        assert!(store.peak());
        store.publish_spectrum(SpectrumFeatures::default());
        control.tick(510);
        assert!(store.peak());
        control.tick(520);
        assert!(!store.peak());
    }

    #[test]
    fn test_receive_mode_skips_sampling_and_applies_packets() {
        let controls = Arc::new(Controls::default());
        controls.set_sync_mode(SyncMode::Receive);

        let socket = SyncSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        let target = socket.local_addr().unwrap();
        let mut control = control_loop(controls, Some(SyncLink::new(socket)));
        let store = control.store().clone();
        store.publish_mic_peaks([3000.0, 3000.0]);

        let remote = FeatureStore::new();
        let mut spectrum = SpectrumFeatures::default();
        spectrum.bands = [7; 16];
        remote.publish_spectrum(spectrum);
        let sender = SyncSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .unwrap()
            .with_target(target);
        sender.send(&SyncPacket::from_store(&remote)).unwrap();

        let mut now = 0;
        while store.spectrum().bands != [7; 16] && now < 5000 {
            now += 5;
            control.tick(now);
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(store.spectrum().bands, [7; 16]);
        // local sampling never ran
        assert_eq!(store.sample().envelope_real, 0.0);
    }
}
