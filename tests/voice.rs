//! Voice pipeline integration tests
//!
//! Tests capture endpointing and voice output without audio hardware

use std::io::Cursor;
use std::sync::Arc;

use axum::{Router, http::StatusCode, routing::post};
use vera_voice::SynthesisError;
use vera_voice::capture::{Endpoint, SAMPLE_RATE, SpeechEndpointer, samples_to_wav};
use vera_voice::event::{self, Event, EventReceiver};
use vera_voice::voice::{
    EndReason, HttpSynthesizer, PlaybackNotice, PlaybackRequest, Priority, RemoteSynthesizer,
    SpeakOutcome, SpeechOrigin, SynthesisBackend, VoiceOutput, VoiceSettings,
};

mod common;
use common::{FixedRemote, RecordingAudio, RecordingLocal};

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    vec![0.0; (SAMPLE_RATE as f32 * duration_secs) as usize]
}

fn remote_settings() -> VoiceSettings {
    VoiceSettings {
        backend: SynthesisBackend::Remote,
        ..VoiceSettings::default()
    }
}

fn output(
    settings: VoiceSettings,
    remote: Option<Arc<dyn RemoteSynthesizer>>,
) -> (VoiceOutput, EventReceiver, RecordingLocal, RecordingAudio) {
    let (tx, rx) = event::channel();
    let local = RecordingLocal::default();
    let audio = RecordingAudio::default();
    let mut voice = VoiceOutput::new(settings, tx)
        .with_local(Box::new(local.clone()))
        .with_audio(Box::new(audio.clone()));
    if let Some(remote) = remote {
        voice = voice.with_remote(remote);
    }
    (voice, rx, local, audio)
}

/// Voice output with a local engine but no speaker, so nothing chimes
fn output_without_speaker(settings: VoiceSettings) -> (VoiceOutput, EventReceiver, RecordingLocal) {
    let (tx, rx) = event::channel();
    let local = RecordingLocal::default();
    let voice = VoiceOutput::new(settings, tx).with_local(Box::new(local.clone()));
    (voice, rx, local)
}

/// Feed queued completions, collecting notices
fn pump(voice: &mut VoiceOutput, rx: &mut EventReceiver) -> Vec<PlaybackNotice> {
    let mut notices = Vec::new();
    while let Ok(event) = rx.try_recv() {
        let notice = match event {
            Event::Playback { epoch, event } => voice.handle_playback(epoch, event),
            Event::RemoteAudio { epoch, result } => voice.handle_remote(epoch, result),
            _ => None,
        };
        notices.extend(notice);
    }
    notices
}

/// Apply completions until the remote response arrives, then drain the rest
async fn await_remote(voice: &mut VoiceOutput, rx: &mut EventReceiver) -> Vec<PlaybackNotice> {
    let mut notices = Vec::new();
    loop {
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::RemoteAudio { epoch, result } => {
                notices.extend(voice.handle_remote(epoch, result));
                break;
            }
            Event::Playback { epoch, event } => notices.extend(voice.handle_playback(epoch, event)),
            _ => {}
        }
    }
    notices.extend(pump(voice, rx));
    notices
}

/// Speech endpoint that always answers HTTP 500
async fn failing_endpoint() -> String {
    let app = Router::new().route(
        "/api/speak",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream down") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api/speak")
}

#[test]
fn test_endpointer_completes_after_trailing_silence() {
    let mut endpointer = SpeechEndpointer::new();

    assert_eq!(endpointer.process(&generate_silence(0.2)), Endpoint::Waiting);
    assert_eq!(endpointer.process(&generate_sine_samples(440.0, 0.5, 0.3)), Endpoint::Speaking);
    assert!(endpointer.heard_speech());

    assert_eq!(endpointer.process(&generate_silence(1.0)), Endpoint::Complete);
}

#[test]
fn test_endpointer_gives_up_without_speech() {
    let mut endpointer = SpeechEndpointer::new();
    let mut status = Endpoint::Waiting;
    for _ in 0..9 {
        status = endpointer.process(&generate_silence(1.0));
    }
    assert_eq!(status, Endpoint::NoSpeech);
    assert!(!endpointer.heard_speech());
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    let reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.len() as usize, samples.len());
}

#[test]
fn test_preempted_speech_ends_once_each() {
    let (mut voice, mut rx, local) = output_without_speaker(VoiceSettings::default());

    let first = voice.speak(PlaybackRequest::new("A", SpeechOrigin::Direct));
    let SpeakOutcome::Accepted { id: a, preempted: None } = first else {
        panic!("first speak not accepted: {first:?}");
    };

    let second = voice.speak(PlaybackRequest::new("B", SpeechOrigin::Direct));
    let SpeakOutcome::Accepted { id: b, preempted: Some(end_a) } = second else {
        panic!("second speak did not preempt: {second:?}");
    };
    assert_eq!(end_a.id, a);
    assert_eq!(end_a.reason, EndReason::Cancelled);

    // Callbacks for A arriving late are ignored
    {
        let spoken = local.spoken.lock().unwrap();
        spoken[0].1.finished();
    }
    local.finish_last();

    let ends: Vec<_> = pump(&mut voice, &mut rx)
        .into_iter()
        .filter_map(|n| match n {
            PlaybackNotice::Ended(end) => Some(end),
            PlaybackNotice::Started { .. } => None,
        })
        .collect();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].id, b);
    assert_eq!(ends[0].reason, EndReason::Completed);
    assert_eq!(local.texts(), vec!["A".to_string(), "B".to_string()]);
    assert!(!voice.is_active());
}

#[test]
fn test_high_priority_not_preempted_by_normal() {
    let (mut voice, _rx, local) = output_without_speaker(VoiceSettings::default());

    let urgent = PlaybackRequest::new("Stop and breathe.", SpeechOrigin::Direct).with_priority(Priority::High);
    assert!(voice.speak(urgent).id().is_some());
    assert_eq!(
        voice.speak(PlaybackRequest::new("later", SpeechOrigin::Reply)),
        SpeakOutcome::Rejected
    );
    assert_eq!(local.texts().len(), 1);
}

#[test]
fn test_chime_plays_before_speech() {
    let (mut voice, mut rx, local, audio) = output(VoiceSettings::default(), None);

    let id = voice.speak(PlaybackRequest::new("Breathe in.", SpeechOrigin::Direct)).id().unwrap();
    assert_eq!(*audio.chimes.lock().unwrap(), 1);
    assert!(local.texts().is_empty());
    assert_eq!(voice.active_id(), Some(id));

    assert!(pump(&mut voice, &mut rx).is_empty());
    assert_eq!(local.texts(), vec!["Breathe in.".to_string()]);
}

#[test]
fn test_cancel_during_chime_never_speaks() {
    let (mut voice, mut rx, local, audio) = output(VoiceSettings::default(), None);

    voice.speak(PlaybackRequest::new("Breathe in.", SpeechOrigin::Direct));
    let end = voice.cancel().unwrap();
    assert_eq!(end.reason, EndReason::Cancelled);
    assert_eq!(*audio.stops.lock().unwrap(), 1);

    // The chime completion is stale by now
    assert!(pump(&mut voice, &mut rx).is_empty());
    assert!(local.texts().is_empty());
    assert!(!voice.is_active());
}

#[test]
fn test_muted_speech_has_no_notices() {
    let settings = VoiceSettings {
        speaker_enabled: false,
        ..VoiceSettings::default()
    };
    let (mut voice, mut rx, local, audio) = output(settings, None);

    assert_eq!(voice.speak(PlaybackRequest::new("hello", SpeechOrigin::Reply)), SpeakOutcome::Muted);
    assert!(pump(&mut voice, &mut rx).is_empty());
    assert!(local.texts().is_empty());
    assert_eq!(*audio.chimes.lock().unwrap(), 0);
}

#[test]
fn test_missing_local_engine_fails_once() {
    let (tx, mut rx) = event::channel();
    let mut voice = VoiceOutput::new(VoiceSettings::default(), tx);

    let id = voice.speak(PlaybackRequest::new("hello", SpeechOrigin::Direct)).id().unwrap();
    let notices = pump(&mut voice, &mut rx);

    assert_eq!(notices.len(), 1);
    let PlaybackNotice::Ended(end) = notices[0] else {
        panic!("expected end notice");
    };
    assert_eq!(end.id, id);
    assert_eq!(end.reason, EndReason::Failed);
}

#[tokio::test]
async fn test_remote_server_error_falls_back_to_local() {
    let url = failing_endpoint().await;
    let remote: Arc<dyn RemoteSynthesizer> = Arc::new(HttpSynthesizer::new(url));
    let (mut voice, mut rx, local, audio) = output(remote_settings(), Some(remote));

    let id = voice.speak(PlaybackRequest::new("Let's begin.", SpeechOrigin::Reply)).id().unwrap();
    assert!(local.texts().is_empty());

    let notices = await_remote(&mut voice, &mut rx).await;
    assert!(notices.is_empty());
    assert_eq!(local.texts(), vec!["Let's begin.".to_string()]);
    assert!(audio.played.lock().unwrap().is_empty());

    local.finish_last();
    let notices = pump(&mut voice, &mut rx);
    assert_eq!(notices.len(), 2);
    assert!(matches!(notices[1], PlaybackNotice::Ended(end) if end.id == id && end.reason == EndReason::Completed));
}

#[tokio::test]
async fn test_unreachable_remote_is_unavailable() {
    let remote = HttpSynthesizer::new("http://127.0.0.1:9/api/speak");
    let err = remote.synthesize("hello", None).await.unwrap_err();
    assert!(matches!(err, SynthesisError::BackendUnavailable(_)), "{err:?}");
}

#[tokio::test]
async fn test_remote_audio_plays_through_speaker() {
    let remote: Arc<dyn RemoteSynthesizer> = Arc::new(FixedRemote(Ok(vec![0xFF, 0xFB, 0x90])));
    let (mut voice, mut rx, local, audio) = output(remote_settings(), Some(remote));

    let id = voice.speak(PlaybackRequest::new("Welcome back.", SpeechOrigin::Reply)).id().unwrap();
    assert!(await_remote(&mut voice, &mut rx).await.is_empty());
    assert_eq!(audio.played.lock().unwrap().len(), 1);
    assert_eq!(*audio.chimes.lock().unwrap(), 1);

    // A failure while playing remote audio falls back to local speech
    {
        let played = audio.played.lock().unwrap();
        played[0].1.failed("device lost");
    }
    assert!(pump(&mut voice, &mut rx).is_empty());
    assert_eq!(local.texts(), vec!["Welcome back.".to_string()]);
    assert_eq!(voice.active_id(), Some(id));
}

#[tokio::test]
async fn test_cancelled_remote_request_is_ignored() {
    let remote: Arc<dyn RemoteSynthesizer> = Arc::new(FixedRemote::server_error());
    let (mut voice, mut rx, local, _audio) = output(remote_settings(), Some(remote));

    voice.speak(PlaybackRequest::new("hello", SpeechOrigin::Reply));
    // Let the chime finish so the request goes out
    assert!(pump(&mut voice, &mut rx).is_empty());
    let end = voice.cancel().unwrap();
    assert_eq!(end.reason, EndReason::Cancelled);

    assert!(await_remote(&mut voice, &mut rx).await.is_empty());
    assert!(local.texts().is_empty());
    assert!(!voice.is_active());
}
