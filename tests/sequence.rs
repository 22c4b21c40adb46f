//! Sequence library and sequencer integration tests

use vera_voice::Error;
use vera_voice::sequence::{PhaseSequencer, SequenceCommand, SequenceEffect, SequenceLibrary};

const CUSTOM: &str = r#"
id = "breathing"
title = "Slow Breathing"

[[phases]]
id = "in"
label = "In"
duration_seconds = 5

[[phases]]
id = "out"
label = "Out"
duration_seconds = 7
prompt = "Let it go."
"#;

#[test]
fn test_discovered_sequence_overrides_bundled() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("breathing.toml"), CUSTOM).unwrap();
    std::fs::write(dir.path().join("broken.toml"), "id = ").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a sequence").unwrap();

    let mut library = SequenceLibrary::bundled();
    let bundled = library.list().count();
    assert_eq!(library.discover(dir.path()).unwrap(), 1);
    assert_eq!(library.list().count(), bundled);

    let breathing = library.get("breathing").unwrap();
    assert_eq!(breathing.title(), "Slow Breathing");
    assert_eq!(breathing.total_seconds(), 12);
    assert_eq!(breathing.phases()[1].narration, "Out. Let it go.");
}

#[test]
fn test_missing_directory_loads_nothing() {
    let mut library = SequenceLibrary::bundled();
    let missing = std::path::Path::new("/nonexistent/vera/sequences");
    assert_eq!(library.discover(missing).unwrap(), 0);
}

#[test]
fn test_resolve_by_id_or_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, CUSTOM.replace("\"breathing\"", "\"evening\"")).unwrap();

    let library = SequenceLibrary::bundled();
    assert_eq!(library.resolve("grounding").unwrap().id(), "grounding");
    assert_eq!(library.resolve(path.to_str().unwrap()).unwrap().id(), "evening");
    assert!(matches!(library.resolve("yoga"), Err(Error::SequenceNotFound(name)) if name == "yoga"));
}

#[test]
fn test_bundled_grounding_runs_to_completion() {
    let library = SequenceLibrary::bundled();
    let sequence = library.resolve("grounding").unwrap();
    let total = sequence.total_seconds();
    let phases = sequence.len();
    let mut sequencer = PhaseSequencer::new(sequence);

    assert_eq!(sequencer.apply(SequenceCommand::Start), Some(SequenceEffect::Narrate(0)));

    let mut narrated = 1;
    let mut completed = false;
    for _ in 0..total {
        match sequencer.apply(SequenceCommand::Tick) {
            Some(SequenceEffect::Narrate(_)) => narrated += 1,
            Some(SequenceEffect::Completed) => completed = true,
            _ => {}
        }
    }

    assert!(completed);
    assert_eq!(narrated, phases);
    assert!(!sequencer.is_running());
    assert!((sequencer.progress() - 1.0).abs() < f64::EPSILON);

    // Finished practices stay finished
    assert_eq!(sequencer.apply(SequenceCommand::Resume), None);
    assert_eq!(sequencer.apply(SequenceCommand::Tick), None);
}
