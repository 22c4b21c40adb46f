//! Audio playback to speakers

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::PlaybackSink;
use crate::{Error, Result};

/// Sample rate of the generated chime
const CHIME_SAMPLE_RATE: u32 = 24000;

/// Chime tones in Hz, played back to back
const CHIME_TONES: [f32; 2] = [660.0, 880.0];

/// Length of each chime tone
const CHIME_TONE_MS: u32 = 90;

/// Speaker output used by the voice controller
pub trait AudioSink: Send {
    /// Start the short preroll chime without blocking
    ///
    /// Reports `chime_finished` through `sink` once the chime is done, unless
    /// it was stopped first.
    ///
    /// # Errors
    ///
    /// Returns error if the chime cannot be started
    fn play_chime(&mut self, sink: PlaybackSink) -> Result<()>;

    /// Decode and play synthesized audio, reporting through `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be decoded
    fn play(&mut self, audio: Vec<u8>, sink: PlaybackSink) -> Result<()>;

    /// Silence the current playback
    fn stop(&mut self);
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    chime: (Vec<f32>, u32),
    stop: Arc<AtomicBool>,
}

impl AudioPlayback {
    /// Create a playback instance using the generated chime
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(device = device.name().unwrap_or_default(), "audio playback initialized");

        Ok(Self {
            chime: (generate_chime(), CHIME_SAMPLE_RATE),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Use a WAV or MP3 file as the preroll chime
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    pub fn load_chime(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        self.chime = decode_audio(&bytes)?;
        tracing::debug!(path = %path.display(), "custom chime loaded");
        Ok(())
    }
}

impl AudioSink for AudioPlayback {
    fn play_chime(&mut self, sink: PlaybackSink) -> Result<()> {
        self.stop();

        let (samples, rate) = self.chime.clone();
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);

        std::thread::Builder::new()
            .name("vera-chime".to_string())
            .spawn(move || {
                if let Err(e) = play_samples_blocking(&samples, rate, &stop) {
                    tracing::warn!(error = %e, "preroll chime failed");
                }
                if !stop.load(Ordering::SeqCst) {
                    sink.chime_finished();
                }
            })?;

        Ok(())
    }

    fn play(&mut self, audio: Vec<u8>, sink: PlaybackSink) -> Result<()> {
        self.stop();

        let (samples, rate) = decode_audio(&audio)?;
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);

        std::thread::Builder::new()
            .name("vera-playback".to_string())
            .spawn(move || {
                sink.started();
                match play_samples_blocking(&samples, rate, &stop) {
                    Ok(()) if stop.load(Ordering::SeqCst) => {
                        tracing::debug!(epoch = %sink.epoch(), "playback stopped");
                    }
                    Ok(()) => sink.finished(),
                    Err(e) => sink.failed(e.to_string()),
                }
            })?;

        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Play mono samples on the default device until done or `stop` is set
fn play_samples_blocking(samples: &[f32], rate: u32, stop: &AtomicBool) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let config = output_config(&device, rate)?;
    let samples = Arc::new(resample(samples, rate, config.sample_rate.0));
    let channels = usize::from(config.channels);

    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            position.store(pos + 1, Ordering::Relaxed);
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(config.sample_rate.0);
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while !finished.load(Ordering::Relaxed) && !stop.load(Ordering::SeqCst) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    tracing::debug!(samples = samples.len(), "playback complete");

    Ok(())
}

/// Choose an output config for `rate`, else the device default
fn output_config(device: &cpal::Device, rate: u32) -> Result<StreamConfig> {
    let wanted = SampleRate(rate);
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.channels() <= 2 && c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
        .min_by_key(cpal::SupportedStreamConfigRange::channels);

    if let Some(range) = supported {
        return Ok(range.with_sample_rate(wanted).config());
    }

    device
        .default_output_config()
        .map(|c| c.config())
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Nearest-sample rate conversion
#[must_use]
pub fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * u64::from(to) / u64::from(from)) as usize;
    (0..out_len)
        .filter_map(|i| {
            let src = (i as u64 * u64::from(from) / u64::from(to)) as usize;
            samples.get(src).copied()
        })
        .collect()
}

/// Two short rising tones with a soft envelope
fn generate_chime() -> Vec<f32> {
    let per_tone = (CHIME_SAMPLE_RATE * CHIME_TONE_MS / 1000) as usize;
    let mut samples = Vec::with_capacity(per_tone * CHIME_TONES.len());

    for frequency in CHIME_TONES {
        for i in 0..per_tone {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / CHIME_SAMPLE_RATE as f32;
            #[allow(clippy::cast_precision_loss)]
            let envelope = (std::f32::consts::PI * i as f32 / per_tone as f32).sin();
            samples.push(0.2 * envelope * (2.0 * std::f32::consts::PI * frequency * t).sin());
        }
    }

    samples
}

/// Decode WAV or MP3 bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the bytes are neither valid WAV nor MP3
pub fn decode_audio(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}

fn decode_mp3(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || rate == 0 {
        return Err(Error::Audio("no audio frames decoded".to_string()));
    }

    Ok((samples, rate))
}

/// Average interleaved channels down to mono
#[must_use]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    #[allow(clippy::cast_precision_loss)]
    let count = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / count)
        .collect()
}
