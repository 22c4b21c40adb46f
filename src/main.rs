use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use vera_voice::api::{ApiServer, ApiState};
use vera_voice::driver::{Command as SessionCommand, SessionDriver, SessionHandle};
use vera_voice::sequence::SequenceLibrary;
use vera_voice::session::{Role, SessionEvent, SessionState};
use vera_voice::voice::{LocalSynthesizer, SynthesisBackend, SystemSynthesizer, select_voice};
use vera_voice::Config;

/// Longest wait for a `say` line to finish
const SAY_TIMEOUT: Duration = Duration::from_secs(120);

/// Vera - voice-guided companion and practice guide
#[derive(Parser)]
#[command(name = "vera", version, about)]
struct Cli {
    /// Voice name fragment (e.g. "Samantha")
    #[arg(long, global = true, env = "VERA_VOICE")]
    voice: Option<String>,

    /// Locale for capture and voice selection (e.g. "en-US")
    #[arg(long, global = true, env = "VERA_LOCALE")]
    locale: Option<String>,

    /// Synthesis backend: local or remote
    #[arg(long, global = true, env = "VERA_TTS_BACKEND")]
    backend: Option<SynthesisBackend>,

    /// Start with the speaker off
    #[arg(long, global = true)]
    mute: bool,

    /// Don't narrate practice phases
    #[arg(long, global = true)]
    no_narration: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Talk with Vera (default)
    Chat,
    /// Run a guided practice sequence
    Practice {
        /// Sequence id or path to a sequence TOML file
        sequence: String,
    },
    /// List available practice sequences
    Sequences,
    /// List voices offered by the local speech engine
    Voices,
    /// Speak one line through the configured backend
    Say {
        /// Text to speak
        #[arg(default_value = "Hello. This is a test of Vera's voice.")]
        text: String,
    },
    /// Run the remote speech endpoint
    Serve {
        /// Port to listen on
        #[arg(long, env = "VERA_PORT")]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,vera_voice=info",
        1 => "info,vera_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load().context("failed to load configuration")?;

    // CLI flags override file and environment
    if let Some(voice) = cli.voice {
        config.voice.voice_hint = voice;
    }
    if let Some(locale) = cli.locale {
        config.voice.locale = locale;
    }
    if let Some(backend) = cli.backend {
        config.voice.backend = backend;
    }
    if cli.mute {
        config.voice.speaker_enabled = false;
    }
    if cli.no_narration {
        config.narration = false;
    }

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(&config).await,
        Command::Practice { sequence } => practice(&config, &sequence).await,
        Command::Sequences => list_sequences(&config),
        Command::Voices => list_voices(&config),
        Command::Say { text } => say(&config, &text).await,
        Command::Serve { port } => serve(&config, port.unwrap_or(config.server.port)).await,
    }
}

/// Interactive conversation on the terminal
async fn chat(config: &Config) -> anyhow::Result<()> {
    let (driver, handle) = SessionDriver::from_config(config)?;
    let mut events = handle.subscribe();
    let task = tokio::spawn(driver.run());

    for utterance in handle.snapshot().await?.utterances {
        print_utterance(utterance.role, &utterance.text);
    }
    println!("(type to talk; :mic, :speaker, :reset, :quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut speaker = config.voice.speaker_enabled;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    ":quit" | ":q" => break,
                    ":mic" => handle.send(SessionCommand::ToggleListening)?,
                    ":cancel" => handle.send(SessionCommand::CancelListening)?,
                    ":reset" => handle.send(SessionCommand::Reset)?,
                    ":speaker" => {
                        speaker = !speaker;
                        handle.send(SessionCommand::SetSpeaker(speaker))?;
                        println!("(speaker {})", if speaker { "on" } else { "off" });
                    }
                    text => handle.send(SessionCommand::SubmitText(text.to_string()))?,
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_chat_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event display lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    shutdown(&handle, task).await
}

fn print_chat_event(event: &SessionEvent) {
    match event {
        SessionEvent::Utterance(utterance) => print_utterance(utterance.role, &utterance.text),
        SessionEvent::StateChanged { to, .. } => match to {
            SessionState::Listening => println!("(listening... :mic to stop)"),
            SessionState::Thinking => println!("(thinking)"),
            SessionState::Idle | SessionState::Speaking => {}
        },
        SessionEvent::CaptureChanged { error: Some(error), .. } => println!("(microphone: {error})"),
        SessionEvent::Cleared => println!("(conversation cleared)"),
        _ => {}
    }
}

fn print_utterance(role: Role, text: &str) {
    match role {
        Role::User => println!("you> {text}"),
        Role::Assistant => println!("vera> {text}"),
        Role::System => println!("[{text}]"),
    }
}

/// Run one practice to completion
async fn practice(config: &Config, name: &str) -> anyhow::Result<()> {
    let library = load_library(config);
    let sequence = library.resolve(name)?;
    println!("{} ({} phases, {}s)", sequence.title(), sequence.len(), sequence.total_seconds());

    let (driver, handle) = SessionDriver::from_config(config)?;
    let mut events = handle.subscribe();
    let task = tokio::spawn(driver.run());
    handle.send(SessionCommand::StartPractice(sequence))?;

    let mut shown_phase = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Practice(progress)) => {
                    if shown_phase != Some(progress.phase_index) && progress.running {
                        shown_phase = Some(progress.phase_index);
                        println!("[{:>3.0}%] {} ({}s)", progress.progress * 100.0, progress.phase_label, progress.remaining_in_phase);
                    }
                }
                Ok(SessionEvent::PracticeCompleted { .. }) => {
                    println!("[100%] complete");
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.send(SessionCommand::StopPractice)?;
                println!("(stopped)");
                break;
            }
        }
    }

    shutdown(&handle, task).await
}

fn load_library(config: &Config) -> SequenceLibrary {
    let mut library = SequenceLibrary::bundled();
    match library.discover(&config.sequences_dir) {
        Ok(0) => {}
        Ok(count) => tracing::info!(count, dir = %config.sequences_dir.display(), "loaded sequences"),
        Err(e) => tracing::warn!(dir = %config.sequences_dir.display(), error = %e, "failed to read sequences directory"),
    }
    library
}

#[allow(clippy::unnecessary_wraps)]
fn list_sequences(config: &Config) -> anyhow::Result<()> {
    for sequence in load_library(config).list() {
        println!(
            "{:<12} {:<30} {:>2} phases  {:>4}s",
            sequence.id(),
            sequence.title(),
            sequence.len(),
            sequence.total_seconds()
        );
    }
    Ok(())
}

fn list_voices(config: &Config) -> anyhow::Result<()> {
    let synth = SystemSynthesizer::detect()
        .context("no local speech engine found (install espeak-ng, or use macOS `say`)")?;
    let voices = synth.voices();
    let selected = select_voice(&voices, &config.voice.voice_hint, &config.voice.locale).map(|v| v.name.clone());

    for voice in &voices {
        let marker = if selected.as_ref() == Some(&voice.name) { "*" } else { " " };
        println!("{marker} {:<30} {}", voice.name, voice.locale);
    }
    if selected.is_none() {
        println!("(no match for '{}', the platform default voice will be used)", config.voice.voice_hint);
    }
    Ok(())
}

/// Speak one line and wait for it to end
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    if !config.voice.speaker_enabled {
        anyhow::bail!("speaker is off (VERA_SPEAKER / --mute)");
    }
    if text.trim().is_empty() {
        anyhow::bail!("nothing to say");
    }

    let (driver, handle) = SessionDriver::from_config(config)?;
    let mut events = handle.subscribe();
    let task = tokio::spawn(driver.run());
    handle.send(SessionCommand::Say(text.to_string()))?;

    let finished = tokio::time::timeout(SAY_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SpeechEnded(end)) => return Some(end),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;

    match finished {
        Ok(Some(end)) => println!("({:?}, {:?})", end.origin, end.reason),
        Ok(None) => tracing::warn!("session closed before speech ended"),
        Err(_) => tracing::warn!("timed out waiting for speech to end"),
    }

    shutdown(&handle, task).await
}

/// Run the remote speech endpoint until Ctrl-C
async fn serve(config: &Config, port: u16) -> anyhow::Result<()> {
    let server = ApiServer::new(ApiState::from_config(config), port);
    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;
    Ok(())
}

async fn shutdown(handle: &SessionHandle, task: tokio::task::JoinHandle<vera_voice::session::Session>) -> anyhow::Result<()> {
    // Already stopped if every sender is gone
    let _ = handle.shutdown();
    task.await.context("session driver panicked")?;
    Ok(())
}
