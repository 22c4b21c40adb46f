//! Vera Voice - voice-guided companion and practice guide
//!
//! This library provides the orchestration behind Vera:
//! - Speech capture with interim transcripts merged into a draft
//! - Voice output over local or remote synthesis, with fallback
//! - Timed practice sequences driven by a one-second clock
//! - The conversation state machine tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Front ends                        │
//! │        CLI chat  │  practice  │  say  │  ...         │
//! └────────────────────┬────────────────────────────────┘
//!                      │ Command / SessionEvent
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Session driver                       │
//! │   Session  │  Capture  │  Voice  │  Sequencer        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Backends                            │
//! │   Whisper STT  │  say / espeak  │  /api/speak        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod reply;
pub mod sequence;
pub mod session;
pub mod transcript;
pub mod voice;

pub use config::Config;
pub use driver::{Command, SessionDriver, SessionHandle, Snapshot};
pub use error::{CaptureError, Error, ReplyError, Result, SynthesisError};
pub use reply::{KeywordReplies, ReplyProducer};
pub use sequence::{PhaseSequencer, Sequence, SequenceLibrary};
pub use session::{Role, Session, SessionConfig, SessionEvent, SessionState, Utterance};
pub use voice::{SynthesisBackend, VoiceOutput, VoiceSettings};
