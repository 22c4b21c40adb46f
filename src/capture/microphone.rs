//! Default input device, delivered as 16 kHz mono chunks

use std::io::Cursor;
use std::sync::mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use crate::voice::{downmix, resample};
use crate::{Error, Result};

/// Rate handed to the endpointer and the transcriber
pub const SAMPLE_RATE: u32 = 16000;

/// An open microphone stream; dropping it releases the device
///
/// cpal streams are not `Send`, so a `Microphone` lives and dies on the
/// thread that opened it.
pub struct Microphone {
    _stream: Stream,
    chunks: mpsc::Receiver<Vec<f32>>,
    rate: u32,
    channels: usize,
}

impl Microphone {
    /// Open the default input device and start streaming
    ///
    /// Prefers a native 16 kHz config and otherwise converts from the
    /// device default.
    ///
    /// # Errors
    ///
    /// Returns error if there is no input device or the stream cannot start
    pub fn open() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let wanted = SampleRate(SAMPLE_RATE);
        let native = device.supported_input_configs().ok().and_then(|mut ranges| {
            ranges.find(|r| r.min_sample_rate() <= wanted && r.max_sample_rate() >= wanted)
        });
        let config = match native {
            Some(range) => range.with_sample_rate(wanted).config(),
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?
                .config(),
        };

        let (tx, chunks) = mpsc::channel();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(data.to_vec());
                },
                |err| tracing::error!(error = %err, "microphone stream error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            rate = config.sample_rate.0,
            channels = config.channels,
            "microphone opened"
        );

        Ok(Self {
            _stream: stream,
            chunks,
            rate: config.sample_rate.0,
            channels: usize::from(config.channels.max(1)),
        })
    }

    /// Everything heard since the last call, as [`SAMPLE_RATE`] mono
    #[must_use]
    pub fn drain(&self) -> Vec<f32> {
        let raw: Vec<f32> = self.chunks.try_iter().flatten().collect();
        resample(&downmix(&raw, self.channels), self.rate, SAMPLE_RATE)
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        tracing::debug!("microphone released");
    }
}

/// Encode mono samples as a 16-bit PCM WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut wav = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut wav, spec).map_err(wav_error)?;
    for &sample in samples {
        writer.write_sample(to_pcm16(sample)).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;

    Ok(wav.into_inner())
}

#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

fn wav_error(e: hound::Error) -> Error {
    Error::Audio(format!("WAV encode error: {e}"))
}
