//! Energy-based speech endpointing
//!
//! Decides when a one-shot capture has heard a complete utterance: speech
//! energy followed by enough trailing silence. Also gives up when nothing is
//! said at all.

use super::microphone::SAMPLE_RATE;

/// RMS energy above which a chunk counts as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech before an utterance can complete (0.3s)
const MIN_SPEECH_SAMPLES: usize = SAMPLE_RATE as usize * 3 / 10;

/// Trailing silence that ends an utterance (0.8s)
const END_SILENCE_SAMPLES: usize = SAMPLE_RATE as usize * 8 / 10;

/// Silence before any speech after which capture gives up (8s)
const NO_SPEECH_SAMPLES: usize = SAMPLE_RATE as usize * 8;

/// What the endpointer concluded after a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Still waiting for speech
    Waiting,
    /// Speech in progress
    Speaking,
    /// Speech followed by trailing silence
    Complete,
    /// Nothing said before the timeout
    NoSpeech,
}

/// Tracks speech activity across audio chunks
#[derive(Debug, Default)]
pub struct SpeechEndpointer {
    speech_samples: usize,
    silence_samples: usize,
    heard_speech: bool,
}

impl SpeechEndpointer {
    /// Create an endpointer waiting for speech
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> Endpoint {
        if samples.is_empty() {
            return self.status();
        }

        if rms_energy(samples) > ENERGY_THRESHOLD {
            self.heard_speech = true;
            self.speech_samples += samples.len();
            self.silence_samples = 0;
        } else {
            self.silence_samples += samples.len();
        }

        let status = self.status();
        tracing::trace!(?status, silence = self.silence_samples, "endpointer");
        status
    }

    /// Whether any speech was heard so far
    #[must_use]
    pub const fn heard_speech(&self) -> bool {
        self.heard_speech
    }

    fn status(&self) -> Endpoint {
        if !self.heard_speech {
            if self.silence_samples > NO_SPEECH_SAMPLES {
                return Endpoint::NoSpeech;
            }
            return Endpoint::Waiting;
        }

        if self.speech_samples > MIN_SPEECH_SAMPLES && self.silence_samples > END_SILENCE_SAMPLES {
            Endpoint::Complete
        } else {
            Endpoint::Speaking
        }
    }
}

/// RMS energy of a chunk
#[allow(clippy::cast_precision_loss)]
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(seconds: f32) -> Vec<f32> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = (SAMPLE_RATE as f32 * seconds) as usize;
        (0..count)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = i as f32 / SAMPLE_RATE as f32;
                0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect()
    }

    fn silence(seconds: f32) -> Vec<f32> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = (SAMPLE_RATE as f32 * seconds) as usize;
        vec![0.0; count]
    }

    #[test]
    fn test_energy_calculation() {
        assert!(rms_energy(&silence(0.01)) < 0.001);
        assert!(rms_energy(&[0.5; 100]) > 0.4);
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut endpointer = SpeechEndpointer::new();
        assert_eq!(endpointer.process(&silence(0.2)), Endpoint::Waiting);
        assert_eq!(endpointer.process(&tone(0.5)), Endpoint::Speaking);
        assert_eq!(endpointer.process(&silence(0.5)), Endpoint::Speaking);
        assert_eq!(endpointer.process(&silence(0.5)), Endpoint::Complete);
    }

    #[test]
    fn test_short_blip_does_not_complete() {
        let mut endpointer = SpeechEndpointer::new();
        endpointer.process(&tone(0.1));
        assert_eq!(endpointer.process(&silence(1.0)), Endpoint::Speaking);
    }

    #[test]
    fn test_long_silence_gives_up() {
        let mut endpointer = SpeechEndpointer::new();
        for _ in 0..8 {
            endpointer.process(&silence(1.0));
        }
        assert_eq!(endpointer.process(&silence(0.5)), Endpoint::NoSpeech);
        assert!(!endpointer.heard_speech());
    }
}
