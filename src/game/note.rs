use crate::core::input::Degree;
use crate::game::judgment::JudgeGrade;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Durations at or below this are taps.
pub const TAP_DURATION_EPSILON: f64 = 1e-9;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteState {
    Spawned,
    Active,
    Hit,
    Missed,
    HoldStarted,
    HoldActive,
    HoldCompleted,
    HoldBroken,
}

impl NoteState {
    #[inline(always)]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            NoteState::Hit | NoteState::Missed | NoteState::HoldCompleted | NoteState::HoldBroken
        )
    }

    /// A hold whose head was hit and which is still waiting on its release.
    #[inline(always)]
    pub const fn is_holding(self) -> bool {
        matches!(self, NoteState::HoldStarted | NoteState::HoldActive)
    }

    pub const fn can_transition_to(self, to: NoteState) -> bool {
        use NoteState::*;
        matches!(
            (self, to),
            (Spawned, Active)
                | (Active, Hit)
                | (Active, Missed)
                | (Active, HoldStarted)
                | (HoldStarted, HoldActive)
                | (HoldStarted, HoldBroken)
                | (HoldActive, HoldCompleted)
                | (HoldActive, HoldBroken)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("note {id} is already resolved as {state:?}")]
    AlreadyResolved { id: String, state: NoteState },
    #[error("note {id} cannot go from {from:?} to {to:?}")]
    Illegal {
        id: String,
        from: NoteState,
        to: NoteState,
    },
    #[error("no live note with id {0}")]
    UnknownNote(String),
}

#[derive(Clone, Debug, Serialize)]
pub struct Note {
    pub id: String,
    /// Beat at which the head reaches the judgment line.
    pub target_beat: f64,
    pub lane: u8,
    pub degree: Degree,
    pub duration_beats: f64,
    pub state: NoteState,
    /// Seconds at which the head (tap) or tail (hold start) was hit.
    pub head_hit_at: Option<f64>,
    pub head_grade: Option<JudgeGrade>,
    pub state_entered_at: f64,
}

impl Note {
    pub fn new(id: impl Into<String>, target_beat: f64, lane: u8, degree: Degree, duration_beats: f64) -> Self {
        Self {
            id: id.into(),
            target_beat,
            lane,
            degree,
            duration_beats: duration_beats.max(0.0),
            state: NoteState::Spawned,
            head_hit_at: None,
            head_grade: None,
            state_entered_at: 0.0,
        }
    }

    #[inline(always)]
    pub fn is_hold(&self) -> bool {
        self.duration_beats > TAP_DURATION_EPSILON
    }

    /// First beat of the note's span; equal to `target_beat` for taps.
    #[inline(always)]
    pub fn tail_beat(&self) -> f64 {
        self.target_beat - self.duration_beats
    }

    /// Beat a press is judged against: the tail for holds, the target for taps.
    #[inline(always)]
    pub fn press_beat(&self) -> f64 {
        if self.is_hold() {
            self.tail_beat()
        } else {
            self.target_beat
        }
    }

    #[inline(always)]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    #[inline(always)]
    pub fn head_was_hit(&self) -> bool {
        self.head_hit_at.is_some()
    }

    /// Applies `to` if the table allows it; returns the previous state.
    pub fn transition(&mut self, to: NoteState, at: f64) -> Result<NoteState, TransitionError> {
        let from = self.state;
        if from.is_terminal() {
            return Err(TransitionError::AlreadyResolved {
                id: self.id.clone(),
                state: from,
            });
        }
        if !from.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                id: self.id.clone(),
                from,
                to,
            });
        }
        self.state = to;
        self.state_entered_at = at;
        Ok(from)
    }

    pub fn record_head_hit(&mut self, grade: JudgeGrade, at: f64) {
        self.head_hit_at = Some(at);
        self.head_grade = Some(grade);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [NoteState; 8] = [
        NoteState::Spawned,
        NoteState::Active,
        NoteState::Hit,
        NoteState::Missed,
        NoteState::HoldStarted,
        NoteState::HoldActive,
        NoteState::HoldCompleted,
        NoteState::HoldBroken,
    ];

    #[test]
    fn terminal_states_accept_nothing() {
        for from in ALL.iter().copied().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn spawned_only_activates() {
        let mut note = Note::new("a", 4.0, 1, 1, 0.0);
        let err = note.transition(NoteState::Hit, 0.0).unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));
        assert_eq!(note.state, NoteState::Spawned);
        assert_eq!(note.transition(NoteState::Active, 1.0), Ok(NoteState::Spawned));
        assert_eq!(note.state_entered_at, 1.0);
    }

    #[test]
    fn resolved_note_rejects_second_resolution() {
        let mut note = Note::new("b", 4.0, 1, 1, 0.0);
        note.transition(NoteState::Active, 0.0).unwrap();
        note.transition(NoteState::Hit, 0.5).unwrap();
        let err = note.transition(NoteState::Missed, 0.6).unwrap_err();
        assert_eq!(
            err,
            TransitionError::AlreadyResolved {
                id: "b".to_string(),
                state: NoteState::Hit
            }
        );
        assert_eq!(note.state, NoteState::Hit);
    }

    #[test]
    fn hold_started_cannot_skip_to_completed() {
        let mut note = Note::new("h", 10.0, 2, 2, 2.0);
        note.transition(NoteState::Active, 0.0).unwrap();
        note.transition(NoteState::HoldStarted, 0.1).unwrap();
        assert!(note.transition(NoteState::HoldCompleted, 0.2).is_err());
        assert!(note.transition(NoteState::HoldStarted, 0.2).is_err());
        note.transition(NoteState::HoldActive, 0.3).unwrap();
        note.transition(NoteState::HoldCompleted, 0.4).unwrap();
    }

    #[test]
    fn geometry() {
        let hold = Note::new("h", 10.0, 1, 1, 2.0);
        assert!(hold.is_hold());
        assert_eq!(hold.tail_beat(), 8.0);
        assert_eq!(hold.press_beat(), 8.0);
        let tap = Note::new("t", 3.0, 1, 1, 0.0);
        assert!(!tap.is_hold());
        assert_eq!(tap.press_beat(), 3.0);
        let negative = Note::new("n", 3.0, 1, 1, -1.0);
        assert_eq!(negative.duration_beats, 0.0);
    }
}
