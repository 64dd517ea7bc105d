use crate::core::input::Degree;
use crate::game::judgment::{JudgeGrade, Judgment};
use crate::game::note::NoteState;
use crate::game::timing::TempoChange;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum HoldResult {
    Held,
    LetGo,
}

/// End-of-song report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SongSummary {
    pub total_notes: u32,
    pub hit_count: u32,
    pub miss_count: u32,
    pub duration_seconds: f64,
    pub max_combo: u32,
    pub holds_held: u32,
    pub holds_let_go: u32,
    pub grade_counts: HashMap<JudgeGrade, u32>,
    pub score_percent: f64,
    pub final_bpm: f64,
}

/// Everything the core tells its collaborators, in the order it happened.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum GameEvent {
    Judgment(Judgment),
    NoteSpawned {
        note_id: String,
        degree: Degree,
        target_beat: f64,
        duration_beats: f64,
    },
    StateChanged {
        note_id: String,
        from: NoteState,
        to: NoteState,
        beat: f64,
    },
    HoldResolved {
        note_id: String,
        result: HoldResult,
    },
    NoteRemoved {
        note_id: String,
        state: NoteState,
    },
    TempoChanged(TempoChange),
    Countdown {
        beats_remaining: u32,
    },
    UnmatchedPress {
        degree: Degree,
        timestamp: f64,
    },
    /// Diagnostic for an operation the core refused; never fatal.
    Rejected {
        reason: String,
    },
    SongEnded(SongSummary),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&GameEvent)>;

/// Per-session subscriber list. Subscribers are called in subscription order.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<(SubscriptionId, Handler)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F: FnMut(&GameEvent) + 'static>(&mut self, handler: F) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(handler)));
        debug!("Event subscriber {:?} added", id);
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        let removed = self.subscribers.len() != before;
        if removed {
            debug!("Event subscriber {:?} removed", id);
        }
        removed
    }

    pub fn publish(&mut self, event: &GameEvent) {
        for (_, handler) in self.subscribers.iter_mut() {
            handler(event);
        }
    }

    pub fn publish_all(&mut self, events: &[GameEvent]) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
