//! Guided practice sequences
//!
//! A sequence is an immutable, ordered list of timed phases. Sequences are
//! bundled into the binary or loaded from TOML files in the sequences
//! directory; directory files override bundled ones by id.

mod sequencer;

pub use sequencer::{
    PhaseSequencer, SequenceCommand, SequenceEffect, SequenceRunState, progress, reduce,
};

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sequences compiled into the binary (lowest precedence)
const BUNDLED_SEQUENCES: &[(&str, &str)] = &[
    ("breathing", include_str!("../../sequences/breathing.toml")),
    ("somatic", include_str!("../../sequences/somatic.toml")),
    ("grounding", include_str!("../../sequences/grounding.toml")),
];

/// Largest sequence file accepted from disk
const MAX_SEQUENCE_FILE_BYTES: u64 = 256_000;

/// Most times a file may repeat its phases
pub const MAX_ROUNDS: u32 = 100;

/// Longest practice accepted, in seconds
pub const MAX_TOTAL_SECONDS: u32 = 24 * 60 * 60;

/// One timed step of a sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub id: String,
    pub label: String,
    pub duration_seconds: u32,
    /// Text spoken when the phase begins
    pub narration: String,
}

/// An ordered, non-empty list of phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sequence {
    id: String,
    title: String,
    phases: Vec<Phase>,
    /// Narrator voice, overriding the configured one
    voice: Option<String>,
}

impl Sequence {
    /// Build a validated sequence
    ///
    /// # Errors
    ///
    /// Returns error if there are no phases, a phase lasts under a second, or
    /// the phases add up to more than [`MAX_TOTAL_SECONDS`]
    pub fn new(id: impl Into<String>, title: impl Into<String>, phases: Vec<Phase>) -> Result<Self> {
        let id = id.into();
        if phases.is_empty() {
            return Err(Error::Sequence(format!("sequence '{id}' has no phases")));
        }
        if let Some(phase) = phases.iter().find(|p| p.duration_seconds < 1) {
            return Err(Error::Sequence(format!(
                "phase '{}' of sequence '{id}' must last at least one second",
                phase.id
            )));
        }
        let total = phases
            .iter()
            .try_fold(0_u32, |total, p| total.checked_add(p.duration_seconds))
            .filter(|&total| total <= MAX_TOTAL_SECONDS);
        if total.is_none() {
            return Err(Error::Sequence(format!(
                "sequence '{id}' runs longer than {MAX_TOTAL_SECONDS} seconds"
            )));
        }

        Ok(Self {
            id,
            title: title.into(),
            phases,
            voice: None,
        })
    }

    /// Narrate with `voice` instead of the configured voice
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        let voice: String = voice.into();
        self.voice = (!voice.trim().is_empty()).then_some(voice);
        self
    }

    /// Build a sequence from phase durations alone
    ///
    /// # Errors
    ///
    /// Returns error if `durations` is empty or contains a zero
    pub fn from_durations(id: impl Into<String>, durations: &[u32]) -> Result<Self> {
        let phases = durations
            .iter()
            .enumerate()
            .map(|(i, &duration_seconds)| Phase {
                id: format!("phase-{}", i + 1),
                label: format!("Phase {}", i + 1),
                duration_seconds,
                narration: format!("Phase {}.", i + 1),
            })
            .collect();
        let id = id.into();
        Self::new(id.clone(), id, phases)
    }

    /// Parse a TOML sequence definition
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed or the sequence is invalid
    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: SequenceFile = toml::from_str(raw)?;
        file.into_sequence()
    }

    /// Load a TOML sequence file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw).map_err(|e| Error::Sequence(format!("{}: {e}", path.display())))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    #[must_use]
    pub fn phase(&self, index: usize) -> Option<&Phase> {
        self.phases.get(index)
    }

    /// Number of phases (never zero)
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Always false; kept for the `len` convention
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Sum of every phase duration, at most [`MAX_TOTAL_SECONDS`]
    #[must_use]
    pub fn total_seconds(&self) -> u32 {
        self.phases.iter().map(|p| p.duration_seconds).sum()
    }
}

/// On-disk sequence definition
#[derive(Debug, Deserialize)]
struct SequenceFile {
    id: String,
    title: Option<String>,
    voice: Option<String>,
    rounds: Option<u32>,
    phases: Vec<PhaseFile>,
}

#[derive(Debug, Deserialize)]
struct PhaseFile {
    id: String,
    label: String,
    duration_seconds: u32,
    narration: Option<String>,
    prompt: Option<String>,
    detail: Option<String>,
}

impl SequenceFile {
    fn into_sequence(self) -> Result<Sequence> {
        let rounds = self.rounds.unwrap_or(1);
        if !(1..=MAX_ROUNDS).contains(&rounds) {
            return Err(Error::Sequence(format!(
                "sequence '{}' needs between 1 and {MAX_ROUNDS} rounds",
                self.id
            )));
        }

        let once: Vec<Phase> = self.phases.into_iter().map(PhaseFile::into_phase).collect();
        let phases = (0..rounds).flat_map(|_| once.iter().cloned()).collect();
        let title = self.title.unwrap_or_else(|| self.id.clone());
        let sequence = Sequence::new(self.id, title, phases)?;
        Ok(match self.voice {
            Some(voice) => sequence.with_voice(voice),
            None => sequence,
        })
    }
}

impl PhaseFile {
    fn into_phase(self) -> Phase {
        let narration = self.narration.unwrap_or_else(|| {
            let heading = format!("{}.", self.label);
            [Some(heading.as_str()), self.prompt.as_deref(), self.detail.as_deref()]
                .into_iter()
                .flatten()
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        });

        Phase {
            id: self.id,
            label: self.label,
            duration_seconds: self.duration_seconds,
            narration,
        }
    }
}

/// Bundled and user-defined sequences by id
#[derive(Debug, Default)]
pub struct SequenceLibrary {
    sequences: BTreeMap<String, Sequence>,
}

impl SequenceLibrary {
    /// Library holding only the bundled sequences
    #[must_use]
    pub fn bundled() -> Self {
        let mut library = Self::default();
        for (name, raw) in BUNDLED_SEQUENCES {
            match Sequence::from_toml(raw) {
                Ok(sequence) => library.insert(sequence),
                Err(e) => tracing::warn!(name, error = %e, "failed to parse bundled sequence"),
            }
        }
        library
    }

    /// Load every `*.toml` file in `dir`, overriding bundled sequences by id
    ///
    /// A missing directory loads nothing. Invalid files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read
    pub fn discover(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut count = 0;
        for entry in std::fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }

            if let Ok(meta) = std::fs::metadata(&path) {
                if meta.len() > MAX_SEQUENCE_FILE_BYTES {
                    tracing::warn!(path = %path.display(), size = meta.len(), "sequence file too large, skipping");
                    continue;
                }
            }

            match Sequence::load(&path) {
                Ok(sequence) => {
                    tracing::debug!(id = sequence.id(), path = %path.display(), "sequence loaded");
                    self.insert(sequence);
                    count += 1;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to load sequence"),
            }
        }
        Ok(count)
    }

    /// Add or replace a sequence
    pub fn insert(&mut self, sequence: Sequence) {
        self.sequences.insert(sequence.id.clone(), sequence);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Sequence> {
        self.sequences.get(id)
    }

    /// Resolve a sequence id or a path to a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if no sequence matches and the path cannot be loaded
    pub fn resolve(&self, name: &str) -> Result<Sequence> {
        if let Some(sequence) = self.get(name) {
            return Ok(sequence.clone());
        }
        let path = Path::new(name);
        if path.is_file() {
            return Sequence::load(path);
        }
        Err(Error::SequenceNotFound(name.to_string()))
    }

    /// All sequences, ordered by id
    pub fn list(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_sequences_parse() {
        let library = SequenceLibrary::bundled();
        assert_eq!(library.list().count(), BUNDLED_SEQUENCES.len());

        let breathing = library.get("breathing").unwrap();
        assert_eq!(breathing.len(), 12);
        assert_eq!(breathing.total_seconds(), 48);

        let somatic = library.get("somatic").unwrap();
        let durations: Vec<u32> = somatic.phases().iter().map(|p| p.duration_seconds).collect();
        assert_eq!(durations, vec![20, 25, 25, 25, 25, 20]);
        assert!(somatic.phases()[0].narration.starts_with("1) Orient to Safety. Let your eyes drift"));
    }

    #[test]
    fn test_narration_composed_without_detail() {
        let raw = r#"
            id = "short"
            [[phases]]
            id = "a"
            label = "Arrive"
            duration_seconds = 3
            prompt = "Feel your feet."
        "#;
        let sequence = Sequence::from_toml(raw).unwrap();
        assert_eq!(sequence.title(), "short");
        assert_eq!(sequence.phases()[0].narration, "Arrive. Feel your feet.");
    }

    #[test]
    fn test_narration_composed_without_prompt() {
        let raw = r#"
            id = "scan"
            voice = "Moira"
            [[phases]]
            id = "a"
            label = "Settle"
            duration_seconds = 3
            detail = "Notice the weight of your hands."
        "#;
        let sequence = Sequence::from_toml(raw).unwrap();
        assert_eq!(sequence.phases()[0].narration, "Settle. Notice the weight of your hands.");
        assert_eq!(sequence.voice(), Some("Moira"));
    }

    #[test]
    fn test_rejects_overlong_sequences() {
        let err = Sequence::from_durations("big", &[u32::MAX, 1]).unwrap_err();
        assert!(matches!(err, Error::Sequence(_)));
        assert!(Sequence::from_durations("day", &[MAX_TOTAL_SECONDS, 1]).is_err());
        assert_eq!(
            Sequence::from_durations("exact", &[MAX_TOTAL_SECONDS]).unwrap().total_seconds(),
            MAX_TOTAL_SECONDS
        );

        let raw = r#"
            id = "huge"
            [[phases]]
            id = "a"
            label = "A"
            duration_seconds = 4000000000
            [[phases]]
            id = "b"
            label = "B"
            duration_seconds = 4000000000
        "#;
        assert!(matches!(Sequence::from_toml(raw), Err(Error::Sequence(_))));
    }

    #[test]
    fn test_rejects_excessive_rounds() {
        let raw = "id = \"x\"\nrounds = 4294967295\n[[phases]]\nid = \"a\"\nlabel = \"A\"\nduration_seconds = 1\n";
        assert!(matches!(Sequence::from_toml(raw), Err(Error::Sequence(_))));

        let raw = "id = \"x\"\nrounds = 100\n[[phases]]\nid = \"a\"\nlabel = \"A\"\nduration_seconds = 1\n";
        assert_eq!(Sequence::from_toml(raw).unwrap().len(), 100);
    }

    #[test]
    fn test_rejects_empty_and_zero_duration() {
        assert!(Sequence::from_durations("none", &[]).is_err());
        assert!(Sequence::from_durations("zero", &[4, 0]).is_err());

        let raw = "id = \"x\"\nrounds = 0\n[[phases]]\nid = \"a\"\nlabel = \"A\"\nduration_seconds = 1\n";
        assert!(matches!(Sequence::from_toml(raw), Err(Error::Sequence(_))));
    }

    #[test]
    fn test_directory_overrides_bundled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("breathing.toml"),
            "id = \"breathing\"\ntitle = \"Slow\"\n[[phases]]\nid = \"in\"\nlabel = \"In\"\nduration_seconds = 6\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "id = ").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut library = SequenceLibrary::bundled();
        assert_eq!(library.discover(dir.path()).unwrap(), 1);
        assert_eq!(library.get("breathing").unwrap().title(), "Slow");
        assert!(matches!(library.resolve("missing"), Err(Error::SequenceNotFound(_))));
    }

    #[test]
    fn test_missing_directory_loads_nothing() {
        let mut library = SequenceLibrary::default();
        assert_eq!(library.discover(Path::new("/nonexistent/vera/sequences")).unwrap(), 0);
    }
}
