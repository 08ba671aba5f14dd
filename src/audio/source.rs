use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SizedSample, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use hound::{SampleFormat, WavReader};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::path::Path;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{FFT_SIZE, SAMPLE_RATE};
use crate::config::{SourceConfig, SourceKind};

/// Provider of mono sample batches at `SAMPLE_RATE`, in signed 16-bit sample units.
///
/// The FFT task owns the source: it calls `initialize` once and then `get_samples` once
/// per cycle. Nothing downstream depends on which variant is active.
pub trait AudioSource: Send {
    /// Prepare the capture path. A failure here is fatal to the caller.
    fn initialize(&mut self) -> Result<()>;

    /// Fill `buffer` with the most recent capture window.
    ///
    /// Must return within roughly one batch period.
    fn get_samples(&mut self, buffer: &mut [f32]);

    /// Identification string for logging.
    fn name(&self) -> &'static str;
}

/// Build the source variant selected in the configuration.
///
/// `realtime` paces the synthetic variants to the capture rate; tests turn it off.
pub fn build_source(config: &SourceConfig, realtime: bool) -> Result<Box<dyn AudioSource>> {
    let source: Box<dyn AudioSource> = match config.kind {
        SourceKind::Cpal => Box::new(CpalSource::new(config.device.clone(), config.input_scale)),
        SourceKind::Tone => Box::new(
            ToneSource::new(config.tone_frequency, config.tone_amplitude)
                .with_noise(config.tone_noise)
                .realtime(realtime),
        ),
        SourceKind::Wav => {
            let path = config
                .wav_path
                .as_ref()
                .ok_or_else(|| anyhow!("wav source selected but no wav_path configured"))?;
            Box::new(WavSource::new(path, config.input_scale).realtime(realtime))
        }
    };
    Ok(source)
}

/// Linear-interpolating rate converter that keeps its phase across calls.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    step: f64,
    pos: f64,
    prev: f32,
}

impl StreamResampler {
    /// Both rates must be non-zero.
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(anyhow!("cannot resample {} Hz to {} Hz", input_rate, output_rate));
        }
        Ok(Self {
            step: input_rate as f64 / output_rate as f64,
            pos: 0.0,
            prev: 0.0,
        })
    }

    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for &x in input {
            while self.pos < 1.0 {
                out.push(self.prev + (x - self.prev) * self.pos as f32);
                self.pos += self.step;
            }
            self.pos -= 1.0;
            self.prev = x;
        }
    }
}

/// Sleeps so that consecutive batches are spaced one batch period apart.
#[derive(Debug)]
struct Pacer {
    period: Duration,
    next: Option<Instant>,
}

impl Pacer {
    fn for_batch(len: usize) -> Self {
        Self {
            period: Duration::from_secs_f64(len as f64 / SAMPLE_RATE as f64),
            next: None,
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        let deadline = self.next.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
            self.next = Some(deadline + self.period);
        } else if now - deadline > self.period {
            // fell behind, don't try to catch up
            self.next = Some(now + self.period);
        } else {
            self.next = Some(deadline + self.period);
        }
    }
}

/// Synthetic sine tone with optional white noise.
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    noise: f32,
    phase: f64,
    rng: StdRng,
    pacer: Option<Pacer>,
}

impl ToneSource {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude,
            noise: 0.0,
            phase: 0.0,
            rng: StdRng::seed_from_u64(0x5eed),
            pacer: None,
        }
    }

    pub fn with_noise(mut self, noise: f32) -> Self {
        self.noise = noise.max(0.0);
        self
    }

    pub fn realtime(mut self, enabled: bool) -> Self {
        self.pacer = enabled.then(|| Pacer::for_batch(FFT_SIZE));
        self
    }

    pub fn set_amplitude(&mut self, amplitude: f32) {
        self.amplitude = amplitude;
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
    }
}

impl AudioSource for ToneSource {
    fn initialize(&mut self) -> Result<()> {
        if !(self.frequency > 0.0 && self.frequency < SAMPLE_RATE as f32 / 2.0) {
            return Err(anyhow!(
                "tone frequency {} Hz outside (0, {}) Hz",
                self.frequency,
                SAMPLE_RATE / 2
            ));
        }
        info!("Tone source: {:.1} Hz, amplitude {:.0}", self.frequency, self.amplitude);
        Ok(())
    }

    fn get_samples(&mut self, buffer: &mut [f32]) {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }

        let step = 2.0 * std::f64::consts::PI * self.frequency as f64 / SAMPLE_RATE as f64;
        for sample in buffer.iter_mut() {
            let mut value = self.amplitude * self.phase.sin() as f32;
            if self.noise > 0.0 {
                value += self.rng.gen_range(-self.noise..=self.noise);
            }
            *sample = value;
            self.phase = (self.phase + step) % (2.0 * std::f64::consts::PI);
        }
    }

    fn name(&self) -> &'static str {
        "tone"
    }
}

/// Loops a WAV file, downmixed to mono and converted to `SAMPLE_RATE`.
pub struct WavSource {
    path: String,
    scale: f32,
    samples: Vec<f32>,
    position: usize,
    pacer: Option<Pacer>,
}

impl WavSource {
    pub fn new<P: AsRef<Path>>(path: P, scale: f32) -> Self {
        Self {
            path: path.as_ref().display().to_string(),
            scale,
            samples: Vec::new(),
            position: 0,
            pacer: None,
        }
    }

    pub fn realtime(mut self, enabled: bool) -> Self {
        self.pacer = enabled.then(|| Pacer::for_batch(FFT_SIZE));
        self
    }

    fn load(&self) -> Result<Vec<f32>> {
        let mut reader = WavReader::open(&self.path)?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            return Err(anyhow!("invalid channel count in {}", self.path));
        }
        if spec.sample_rate == 0 {
            return Err(anyhow!("invalid sample rate 0 in {}", self.path));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let max = ((1i64 << (spec.bits_per_sample as i64 - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<_, _>>()?
            }
        };

        let mono: Vec<f32> = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        let mut resampled = Vec::with_capacity(mono.len());
        StreamResampler::new(spec.sample_rate, SAMPLE_RATE)?.process(&mono, &mut resampled);
        Ok(resampled.into_iter().map(|s| s * self.scale).collect())
    }
}

impl AudioSource for WavSource {
    fn initialize(&mut self) -> Result<()> {
        self.samples = self.load()?;
        if self.samples.is_empty() {
            return Err(anyhow!("{} contains no samples", self.path));
        }
        self.position = 0;
        info!(
            "WAV source: {} ({:.1}s at {} Hz)",
            self.path,
            self.samples.len() as f32 / SAMPLE_RATE as f32,
            SAMPLE_RATE
        );
        Ok(())
    }

    fn get_samples(&mut self, buffer: &mut [f32]) {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }
        if self.samples.is_empty() {
            buffer.fill(0.0);
            return;
        }
        for sample in buffer.iter_mut() {
            *sample = self.samples[self.position];
            self.position = (self.position + 1) % self.samples.len();
        }
    }

    fn name(&self) -> &'static str {
        "wav"
    }
}

/// Live input through cpal.
///
/// The cpal stream lives on its own capture thread (streams are not `Send` on every
/// host); mono, resampled chunks arrive over a channel.
pub struct CpalSource {
    device_name: Option<String>,
    scale: f32,
    receiver: Option<Receiver<Vec<f32>>>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    pending: VecDeque<f32>,
}

impl CpalSource {
    pub fn new(device_name: Option<String>, scale: f32) -> Self {
        Self {
            device_name,
            scale,
            receiver: None,
            stop: None,
            thread: None,
            pending: VecDeque::with_capacity(FFT_SIZE * 4),
        }
    }

    fn find_device(name: Option<&str>) -> Result<Device> {
        let host = cpal::default_host();
        match name {
            Some(wanted) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| anyhow!("Input device '{}' not found", wanted)),
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available")),
        }
    }

    fn run_capture(
        device_name: Option<String>,
        scale: f32,
        sender: Sender<Vec<f32>>,
        ready: Sender<Result<()>>,
        stop: Receiver<()>,
    ) {
        let stream = match Self::open_stream(device_name.as_deref(), scale, sender) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        // park until the source is dropped
        let _ = stop.recv();
        drop(stream);
        info!("Capture stream closed");
    }

    fn open_stream(device_name: Option<&str>, scale: f32, sender: Sender<Vec<f32>>) -> Result<cpal::Stream> {
        let device = Self::find_device(device_name)?;
        let supported = device
            .default_input_config()
            .map_err(|e| anyhow!("Failed to get default input config: {}", e))?;

        info!("Using audio device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));
        info!("Audio config: {:?}", supported);

        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let stream = match format {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, scale, sender)?,
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, scale, sender)?,
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, scale, sender)?,
            other => return Err(anyhow!("Unsupported sample format {:?}", other)),
        };
        stream.play()?;
        Ok(stream)
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        scale: f32,
        sender: Sender<Vec<f32>>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let channels = config.channels as usize;
        let mut resampler = StreamResampler::new(config.sample_rate.0, SAMPLE_RATE)?;

        info!(
            "Creating input stream with {} channels at {} Hz (resampled to {} Hz)",
            channels, config.sample_rate.0, SAMPLE_RATE
        );

        let stream = device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| {
                        frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32 * scale
                    })
                    .collect();
                let mut out = Vec::with_capacity(mono.len());
                resampler.process(&mono, &mut out);
                if sender.try_send(out).is_err() {
                    warn!("Capture channel full, dropping audio chunk");
                }
            },
            |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )?;

        Ok(stream)
    }
}

impl AudioSource for CpalSource {
    fn initialize(&mut self) -> Result<()> {
        let (sender, receiver) = crossbeam_channel::bounded(64);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let device_name = self.device_name.clone();
        let scale = self.scale;

        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || Self::run_capture(device_name, scale, sender, ready_tx, stop_rx))?;

        ready_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| anyhow!("Capture thread did not report readiness"))??;

        self.receiver = Some(receiver);
        self.stop = Some(stop_tx);
        self.thread = Some(thread);
        Ok(())
    }

    fn get_samples(&mut self, buffer: &mut [f32]) {
        let Some(receiver) = self.receiver.as_ref() else {
            buffer.fill(0.0);
            return;
        };

        let deadline = Instant::now() + Duration::from_secs_f64(2.0 * buffer.len() as f64 / SAMPLE_RATE as f64);
        while self.pending.len() < buffer.len() {
            match receiver.recv_deadline(deadline) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // anything else already queued is newer
        while let Ok(chunk) = receiver.try_recv() {
            self.pending.extend(chunk);
        }

        let excess = self.pending.len().saturating_sub(buffer.len());
        self.pending.drain(..excess);

        let available = self.pending.len();
        let missing = buffer.len() - available;
        buffer[..missing].fill(0.0);
        for (dst, src) in buffer[missing..].iter_mut().zip(self.pending.drain(..)) {
            *dst = src;
        }
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampler_identity() {
        let mut resampler = StreamResampler::new(10240, 10240).unwrap();
        let input: Vec<f32> = (1..=8).map(|i| i as f32).collect();
        let mut out = Vec::new();
        resampler.process(&input, &mut out);
        // one sample of latency
        assert_eq!(out.len(), 8);
        assert_eq!(&out[1..], &input[..7]);
    }

    #[test]
    fn test_resampler_downsamples_by_ratio() {
        let mut resampler = StreamResampler::new(40960, 10240).unwrap();
        let input = vec![1.0f32; 4096];
        let mut out = Vec::new();
        resampler.process(&input[..2000], &mut out);
        resampler.process(&input[2000..], &mut out);
        assert_eq!(out.len(), 1024);
    }

    #[test]
    fn test_resampler_rejects_zero_rate() {
        assert!(StreamResampler::new(0, SAMPLE_RATE).is_err());
        assert!(StreamResampler::new(44100, 0).is_err());
    }

    #[test]
    fn test_tone_amplitude() {
        let mut tone = ToneSource::new(500.0, 1000.0);
        tone.initialize().unwrap();
        let mut buffer = vec![0.0f32; FFT_SIZE];
        tone.get_samples(&mut buffer);
        let peak = buffer.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(peak > 990.0 && peak <= 1000.0);
    }

    #[test]
    fn test_tone_rejects_frequency_above_nyquist() {
        let mut tone = ToneSource::new(6000.0, 1000.0);
        assert!(tone.initialize().is_err());
    }

    #[test]
    fn test_wav_source_missing_file_fails() {
        let mut source = WavSource::new("/nonexistent/input.wav", 8192.0);
        assert!(source.initialize().is_err());
    }

    #[test]
    fn test_wav_source_rejects_zero_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero_rate.wav");

        // canonical 44-byte PCM header: mono, 16-bit, rate 0, two samples of data
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&40u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // channels
        bytes.extend_from_slice(&0u32.to_le_bytes()); // sample rate
        bytes.extend_from_slice(&0u32.to_le_bytes()); // byte rate
        bytes.extend_from_slice(&2u16.to_le_bytes()); // block align
        bytes.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&1000i16.to_le_bytes());
        bytes.extend_from_slice(&(-1000i16).to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let mut source = WavSource::new(&path, 1.0);
        assert!(source.initialize().is_err());
    }

    #[test]
    fn test_wav_source_loops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..100 {
            writer.write_sample(if i % 2 == 0 { 16384i16 } else { -16384 }).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavSource::new(&path, 2.0);
        source.initialize().unwrap();
        let mut buffer = vec![0.0f32; 300];
        source.get_samples(&mut buffer);
        assert!(buffer.iter().all(|s| s.abs() <= 2.0));
        assert!(buffer.iter().any(|s| *s != 0.0));
    }
}
