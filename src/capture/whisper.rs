//! Microphone recognition through a Whisper-compatible transcription API
//!
//! Capture runs on a dedicated thread (cpal streams are not `Send`). The
//! thread records until the endpointer hears a complete utterance or a
//! graceful stop arrives, then transcribes the audio once and reports a
//! single final result followed by the end of the session.
//!
//! The blocking HTTP client owns a private tokio runtime, which panics when
//! built or dropped inside another runtime. It is therefore created and
//! dropped on the capture thread, never on the session driver.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::activity::{Endpoint, SpeechEndpointer};
use super::microphone::{Microphone, SAMPLE_RATE, samples_to_wav};
use super::{RecognitionEngine, RecognitionSink};
use crate::error::CaptureError;
use crate::{Error, Result};

/// How often the capture thread drains the microphone
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on one transcription request
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Response from a Whisper-compatible transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Settings for a Whisper-compatible `/audio/transcriptions` endpoint
#[derive(Debug, Clone)]
pub struct Transcriber {
    url: reqwest::Url,
    api_key: Option<String>,
    model: String,
}

impl Transcriber {
    /// Describe a transcription endpoint
    ///
    /// # Errors
    ///
    /// Returns error if `url` is not a valid URL
    pub fn new(url: &str, api_key: Option<String>, model: String) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid transcription URL '{url}': {e}")))?;

        Ok(Self { url, api_key, model })
    }

    /// Transcribe WAV audio
    ///
    /// `locale` is reduced to its language part ("en-US" becomes "en").
    /// Blocks the calling thread, which must not be a tokio worker.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API rejects it
    pub fn transcribe(&self, wav: &[u8], locale: &str) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let client = reqwest::blocking::Client::builder()
            .timeout(TRANSCRIBE_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        let part = reqwest::blocking::multipart::Part::bytes(wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;

        let mut form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if let Some(language) = locale.split(['-', '_']).next().filter(|l| !l.is_empty()) {
            form = form.text("language", language.to_lowercase());
        }

        let mut request = client.post(self.url.clone()).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json()?;
        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text.trim().to_string())
    }
}

/// Control message for the capture thread
enum Control {
    Stop,
    Abort,
}

struct Worker {
    control: mpsc::Sender<Control>,
    handle: JoinHandle<()>,
}

/// Recognition engine backed by the default microphone and a transcriber
pub struct WhisperRecognizer {
    transcriber: Arc<Transcriber>,
    language: String,
    worker: Option<Worker>,
}

impl WhisperRecognizer {
    /// Create a recognizer
    #[must_use]
    pub fn new(transcriber: Transcriber) -> Self {
        Self {
            transcriber: Arc::new(transcriber),
            language: "en-US".to_string(),
            worker: None,
        }
    }

    fn send(&mut self, control: Control) {
        if let Some(worker) = self.worker.take() {
            // A finished thread has dropped its receiver already
            let _ = worker.control.send(control);
            if worker.handle.is_finished() {
                let _ = worker.handle.join();
            }
        }
    }
}

impl RecognitionEngine for WhisperRecognizer {
    fn set_language(&mut self, locale: &str) {
        self.language = locale.to_string();
    }

    fn start(&mut self, sink: RecognitionSink) -> std::result::Result<(), CaptureError> {
        self.send(Control::Abort);

        let (control_tx, control_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let transcriber = Arc::clone(&self.transcriber);
        let language = self.language.clone();

        let handle = std::thread::Builder::new()
            .name("vera-capture".to_string())
            .spawn(move || {
                run_capture(&transcriber, &language, &sink, &control_rx, &ready_tx);
            })
            .map_err(|e| {
                tracing::error!(error = %e, "failed to spawn capture thread");
                CaptureError::Unknown
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker {
                    control: control_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(kind)) => {
                let _ = handle.join();
                Err(kind)
            }
            Err(_) => Err(CaptureError::Unknown),
        }
    }

    fn stop(&mut self) {
        self.send(Control::Stop);
    }

    fn abort(&mut self) {
        self.send(Control::Abort);
    }
}

/// Body of the capture thread
fn run_capture(
    transcriber: &Transcriber,
    language: &str,
    sink: &RecognitionSink,
    control: &mpsc::Receiver<Control>,
    ready: &mpsc::Sender<std::result::Result<(), CaptureError>>,
) {
    let microphone = match Microphone::open() {
        Ok(microphone) => microphone,
        Err(e) => {
            tracing::warn!(error = %e, "microphone unavailable");
            let _ = ready.send(Err(CaptureError::PermissionDenied));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut endpointer = SpeechEndpointer::new();
    let mut recorded = Vec::new();

    loop {
        match control.recv_timeout(POLL_INTERVAL) {
            Ok(Control::Stop) => break,
            Ok(Control::Abort) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let chunk = microphone.drain();
        let endpoint = endpointer.process(&chunk);
        recorded.extend(chunk);

        match endpoint {
            Endpoint::Complete => break,
            Endpoint::NoSpeech => {
                drop(microphone);
                sink.error(CaptureError::NoSpeech);
                sink.end();
                return;
            }
            Endpoint::Waiting | Endpoint::Speaking => {}
        }
    }

    recorded.extend(microphone.drain());
    drop(microphone);

    if !endpointer.heard_speech() {
        sink.error(CaptureError::NoSpeech);
        sink.end();
        return;
    }

    match samples_to_wav(&recorded, SAMPLE_RATE).and_then(|wav| transcriber.transcribe(&wav, language)) {
        Ok(text) if text.is_empty() => sink.error(CaptureError::NoSpeech),
        Ok(text) => sink.result(true, text),
        Err(Error::Http(e)) => {
            tracing::warn!(error = %e, "transcription request failed");
            sink.error(CaptureError::NetworkError);
        }
        Err(e) => {
            tracing::warn!(error = %e, "transcription failed");
            sink.error(CaptureError::Unknown);
        }
    }
    sink.end();
}
