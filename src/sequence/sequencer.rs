//! Phase sequencer
//!
//! The sequencer is a pure reducer over [`SequenceRunState`]; a one-second
//! tick is fed in from outside, and side effects come back as
//! [`SequenceEffect`] values for the caller to carry out.

use super::{Phase, Sequence};

/// Position and run flag of a sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceRunState {
    pub current_phase_index: usize,
    pub elapsed_in_phase: u32,
    pub running: bool,
    /// Set when the last phase ran out, cleared by any other command
    pub completed: bool,
}

/// Input to the reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCommand {
    Start,
    Stop,
    Tick,
    Next,
    Previous,
    Pause,
    Resume,
}

/// Side effect requested by the reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEffect {
    /// Speak the narration of the phase at this index
    Narrate(usize),
    /// Silence narration in flight
    CancelNarration,
    /// The last phase ran out
    Completed,
}

/// Apply one command to a run state
#[must_use]
pub fn reduce(
    sequence: &Sequence,
    state: SequenceRunState,
    command: SequenceCommand,
) -> (SequenceRunState, Option<SequenceEffect>) {
    let last = sequence.len().saturating_sub(1);

    match command {
        SequenceCommand::Start => (
            SequenceRunState {
                current_phase_index: 0,
                elapsed_in_phase: 0,
                running: true,
                completed: false,
            },
            Some(SequenceEffect::Narrate(0)),
        ),
        SequenceCommand::Stop => (SequenceRunState::default(), Some(SequenceEffect::CancelNarration)),
        SequenceCommand::Tick => {
            if !state.running {
                return (state, None);
            }
            let duration = sequence
                .phase(state.current_phase_index)
                .map_or(1, |p| p.duration_seconds);

            if state.elapsed_in_phase + 1 < duration {
                return (
                    SequenceRunState {
                        elapsed_in_phase: state.elapsed_in_phase + 1,
                        ..state
                    },
                    None,
                );
            }

            if state.current_phase_index < last {
                let next = state.current_phase_index + 1;
                (
                    SequenceRunState {
                        current_phase_index: next,
                        elapsed_in_phase: 0,
                        ..state
                    },
                    Some(SequenceEffect::Narrate(next)),
                )
            } else {
                (
                    SequenceRunState {
                        elapsed_in_phase: 0,
                        running: false,
                        completed: true,
                        ..state
                    },
                    Some(SequenceEffect::Completed),
                )
            }
        }
        SequenceCommand::Next => {
            let target = (state.current_phase_index + 1).min(last);
            navigate(state, target)
        }
        SequenceCommand::Previous => {
            let target = state.current_phase_index.saturating_sub(1);
            navigate(state, target)
        }
        SequenceCommand::Pause => {
            if !state.running {
                return (state, None);
            }
            (
                SequenceRunState {
                    running: false,
                    ..state
                },
                Some(SequenceEffect::CancelNarration),
            )
        }
        SequenceCommand::Resume => {
            if state.running || state.completed {
                return (state, None);
            }
            (
                SequenceRunState {
                    running: true,
                    ..state
                },
                None,
            )
        }
    }
}

/// Move to `target`, resetting elapsed time; narrate only on a real move
fn navigate(state: SequenceRunState, target: usize) -> (SequenceRunState, Option<SequenceEffect>) {
    let moved = target != state.current_phase_index;
    let next = SequenceRunState {
        current_phase_index: target,
        elapsed_in_phase: 0,
        running: state.running,
        completed: false,
    };
    let effect = (moved && state.running).then_some(SequenceEffect::Narrate(target));
    (next, effect)
}

/// Overall completion fraction in `0.0..=1.0`
#[must_use]
pub fn progress(sequence: &Sequence, state: &SequenceRunState) -> f64 {
    if state.completed {
        return 1.0;
    }
    let total = sequence.total_seconds();
    if total == 0 {
        return 0.0;
    }
    let before: u32 = sequence
        .phases()
        .iter()
        .take(state.current_phase_index)
        .map(|p| p.duration_seconds)
        .sum();
    (f64::from(before.saturating_add(state.elapsed_in_phase)) / f64::from(total)).min(1.0)
}

/// A sequence together with its run state
#[derive(Debug, Clone)]
pub struct PhaseSequencer {
    sequence: Sequence,
    state: SequenceRunState,
}

impl PhaseSequencer {
    #[must_use]
    pub fn new(sequence: Sequence) -> Self {
        Self {
            sequence,
            state: SequenceRunState::default(),
        }
    }

    /// Apply a command and return the effect to carry out
    pub fn apply(&mut self, command: SequenceCommand) -> Option<SequenceEffect> {
        let (state, effect) = reduce(&self.sequence, self.state, command);
        if state.current_phase_index != self.state.current_phase_index {
            tracing::debug!(
                sequence = self.sequence.id(),
                from = self.state.current_phase_index,
                to = state.current_phase_index,
                "phase changed"
            );
        }
        self.state = state;
        effect
    }

    #[must_use]
    pub const fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    #[must_use]
    pub const fn state(&self) -> SequenceRunState {
        self.state
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.state.running
    }

    #[must_use]
    pub fn current_phase(&self) -> Option<&Phase> {
        self.sequence.phase(self.state.current_phase_index)
    }

    /// Seconds left in the current phase
    #[must_use]
    pub fn remaining_in_phase(&self) -> u32 {
        self.current_phase()
            .map_or(0, |p| p.duration_seconds.saturating_sub(self.state.elapsed_in_phase))
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        progress(&self.sequence, &self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::MAX_TOTAL_SECONDS;

    fn sequencer(durations: &[u32]) -> PhaseSequencer {
        PhaseSequencer::new(Sequence::from_durations("test", durations).unwrap())
    }

    #[test]
    fn test_three_phase_timeline() {
        let mut seq = sequencer(&[4, 4, 6]);
        assert_eq!(seq.apply(SequenceCommand::Start), Some(SequenceEffect::Narrate(0)));

        let mut effects = Vec::new();
        for second in 1..=14 {
            if let Some(effect) = seq.apply(SequenceCommand::Tick) {
                effects.push((second, effect));
            }
            if second == 8 {
                assert_eq!(seq.state().current_phase_index, 2);
                assert_eq!(seq.state().elapsed_in_phase, 0);
            }
            if second < 14 {
                assert!(seq.is_running(), "stopped early at {second}s");
            }
        }

        assert_eq!(
            effects,
            vec![
                (4, SequenceEffect::Narrate(1)),
                (8, SequenceEffect::Narrate(2)),
                (14, SequenceEffect::Completed),
            ]
        );
        assert!(!seq.is_running());
        assert_eq!(seq.state().elapsed_in_phase, 0);
        assert!((seq.progress() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_is_monotonic_while_running() {
        let mut seq = sequencer(&[2, 3, 1]);
        seq.apply(SequenceCommand::Start);
        let mut last = seq.progress();
        while seq.is_running() {
            seq.apply(SequenceCommand::Tick);
            let now = seq.progress();
            assert!(now >= last);
            last = now;
        }
        assert!((last - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_of_longest_sequence() {
        let sequence = Sequence::from_durations("day", &[MAX_TOTAL_SECONDS - 1, 1]).unwrap();
        let last_second = SequenceRunState {
            current_phase_index: 1,
            elapsed_in_phase: 1,
            running: true,
            completed: false,
        };
        assert!((progress(&sequence, &last_second) - 1.0).abs() < f64::EPSILON);

        let overrun = SequenceRunState {
            elapsed_in_phase: u32::MAX,
            ..last_second
        };
        assert!(progress(&sequence, &overrun) <= 1.0);
    }

    #[test]
    fn test_stop_resets_progress() {
        let mut seq = sequencer(&[4, 4]);
        seq.apply(SequenceCommand::Start);
        for _ in 0..5 {
            seq.apply(SequenceCommand::Tick);
        }
        assert!(seq.progress() > 0.0);

        assert_eq!(seq.apply(SequenceCommand::Stop), Some(SequenceEffect::CancelNarration));
        assert_eq!(seq.state(), SequenceRunState::default());
        assert!(seq.progress().abs() < f64::EPSILON);
        assert_eq!(seq.apply(SequenceCommand::Tick), None);
    }

    #[test]
    fn test_navigation_clamps_without_renarrating() {
        let mut seq = sequencer(&[5, 5]);
        seq.apply(SequenceCommand::Start);
        seq.apply(SequenceCommand::Tick);

        assert_eq!(seq.apply(SequenceCommand::Previous), None);
        assert_eq!(seq.state().elapsed_in_phase, 0);

        assert_eq!(seq.apply(SequenceCommand::Next), Some(SequenceEffect::Narrate(1)));
        seq.apply(SequenceCommand::Tick);
        assert_eq!(seq.apply(SequenceCommand::Next), None);
        assert_eq!(seq.state().current_phase_index, 1);
        assert_eq!(seq.state().elapsed_in_phase, 0);
    }

    #[test]
    fn test_navigation_while_stopped_is_silent() {
        let mut seq = sequencer(&[5, 5, 5]);
        assert_eq!(seq.apply(SequenceCommand::Next), None);
        assert_eq!(seq.state().current_phase_index, 1);
        assert!(!seq.is_running());
    }

    #[test]
    fn test_pause_and_resume_keep_position() {
        let mut seq = sequencer(&[5, 5]);
        seq.apply(SequenceCommand::Start);
        seq.apply(SequenceCommand::Tick);
        seq.apply(SequenceCommand::Tick);

        assert_eq!(seq.apply(SequenceCommand::Pause), Some(SequenceEffect::CancelNarration));
        assert_eq!(seq.apply(SequenceCommand::Tick), None);
        assert_eq!(seq.state().elapsed_in_phase, 2);

        assert_eq!(seq.apply(SequenceCommand::Resume), None);
        assert!(seq.is_running());
        assert_eq!(seq.remaining_in_phase(), 3);
    }

    #[test]
    fn test_resume_after_completion_is_noop() {
        let mut seq = sequencer(&[1]);
        seq.apply(SequenceCommand::Start);
        assert_eq!(seq.apply(SequenceCommand::Tick), Some(SequenceEffect::Completed));
        assert_eq!(seq.apply(SequenceCommand::Resume), None);
        assert!(!seq.is_running());
    }
}
