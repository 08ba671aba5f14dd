use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::bands::{BandAggregator, BandGain};
use super::fft::FftEngine;
use super::source::AudioSource;
use super::FFT_SIZE;
use crate::controls::Controls;
use crate::features::{FeatureStore, SpectrumFeatures};

/// Unconditional pause at the end of every loop iteration, so other threads pinned
/// to the same core still get time.
const CYCLE_YIELD: Duration = Duration::from_millis(1);
/// Emit a debug line every this many cycles.
const LOG_EVERY: u64 = 500;

/// One capture, transform and aggregation step.
pub struct FftCycle {
    source: Box<dyn AudioSource>,
    engine: FftEngine,
    aggregator: BandAggregator,
    buffer: Vec<f32>,
    cycles: u64,
}

impl FftCycle {
    /// `source` must already be initialized.
    pub fn new(source: Box<dyn AudioSource>) -> Self {
        Self {
            source,
            engine: FftEngine::new(),
            aggregator: BandAggregator::new(),
            buffer: vec![0.0; FFT_SIZE],
            cycles: 0,
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub fn run_once(&mut self, store: &FeatureStore, controls: &Controls) {
        self.source.get_samples(&mut self.buffer);

        store.publish_mic_peaks(FftEngine::half_batch_peaks(&self.buffer));

        let frame = self.engine.process(&self.buffer);

        let gain = if controls.agc_enabled() {
            BandGain::Agc(store.sample().multiplier)
        } else {
            BandGain::Manual {
                gain: controls.gain(),
                input_level: controls.input_level(),
            }
        };
        let result = self.aggregator.process(&frame.bins, controls.squelch(), gain);

        self.cycles += 1;
        if self.cycles % LOG_EVERY == 0 {
            debug!(
                "🔍 FFT cycle {}: peak {:.0} Hz (mag {:.1}), bands {:?}",
                self.cycles, frame.dominant_frequency, frame.dominant_magnitude, result.bands
            );
        }

        store.publish_spectrum(SpectrumFeatures {
            bins: frame.bins,
            band_calc: result.calc,
            bands: result.bands,
            band_averages: result.averages,
            dominant_frequency: frame.dominant_frequency,
            dominant_magnitude: frame.dominant_magnitude,
        });
    }
}

/// The continuously running FFT thread.
///
/// It idles (but keeps yielding) while the device receives features over the network.
pub struct FftTask {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FftTask {
    /// Initialize `source` and start the loop. Source initialization failure is
    /// returned to the caller; there is no fallback capture path.
    pub fn spawn(mut source: Box<dyn AudioSource>, store: Arc<FeatureStore>, controls: Arc<Controls>) -> Result<Self> {
        source
            .initialize()
            .map_err(|e| anyhow!("Failed to initialize {} audio source: {}", source.name(), e))?;
        info!("Audio source '{}' initialized", source.name());

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let mut cycle = FftCycle::new(source);

        let thread = std::thread::Builder::new().name("fft".into()).spawn(move || {
            let mut was_receiving = false;
            while flag.load(Ordering::Relaxed) {
                let receiving = controls.is_receiving();
                if receiving != was_receiving {
                    info!("FFT task {}", if receiving { "suspended (sync receive)" } else { "resumed" });
                    was_receiving = receiving;
                }
                if !receiving {
                    cycle.run_once(&store, &controls);
                }
                std::thread::sleep(CYCLE_YIELD);
            }
            info!("FFT task stopped after {} cycles", cycle.cycles);
        })?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("FFT thread panicked");
            }
        }
    }
}

impl Drop for FftTask {
    fn drop(&mut self) {
        self.stop();
    }
}
