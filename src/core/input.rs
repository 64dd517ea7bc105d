use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Input channel a note or key belongs to, `1..=lane_count`.
pub type Degree = u8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputKind {
    Press,
    Release,
}

/// A raw edge reported by the input collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub degree: Degree,
    pub timestamp: f64,
    pub kind: InputKind,
}

impl InputEvent {
    pub fn press(degree: Degree, timestamp: f64) -> Self {
        Self {
            degree,
            timestamp,
            kind: InputKind::Press,
        }
    }

    pub fn release(degree: Degree, timestamp: f64) -> Self {
        Self {
            degree,
            timestamp,
            kind: InputKind::Release,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputCommand {
    Press { degree: Degree, timestamp: f64 },
    Release { degree: Degree, timestamp: f64 },
}

impl InputCommand {
    #[inline(always)]
    pub const fn timestamp(&self) -> f64 {
        match *self {
            InputCommand::Press { timestamp, .. } | InputCommand::Release { timestamp, .. } => {
                timestamp
            }
        }
    }
}

impl From<InputEvent> for InputCommand {
    fn from(event: InputEvent) -> Self {
        match event.kind {
            InputKind::Press => InputCommand::Press {
                degree: event.degree,
                timestamp: event.timestamp,
            },
            InputKind::Release => InputCommand::Release {
                degree: event.degree,
                timestamp: event.timestamp,
            },
        }
    }
}

/// FIFO of input commands, drained once per tick in arrival order.
///
/// Presses and releases of the same key that land inside one frame are applied
/// in the order they happened, never in callback order.
#[derive(Debug, Default)]
pub struct InputCommandQueue {
    pending: VecDeque<InputCommand>,
    dropped_duplicates: u64,
}

impl InputCommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw event. An event identical to the one queued just before it
    /// is a doubled callback for the same physical action and is dropped.
    pub fn push(&mut self, event: InputEvent) -> bool {
        let command = InputCommand::from(event);
        if self.pending.back() == Some(&command) {
            self.dropped_duplicates = self.dropped_duplicates.saturating_add(1);
            debug!(
                "Dropped duplicate input {:?} on degree {} at {:.4}s",
                event.kind, event.degree, event.timestamp
            );
            return false;
        }
        self.pending.push_back(command);
        true
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Option<InputCommand> {
        self.pending.pop_front()
    }

    /// Pops commands one by one, handing each to `apply` before the next is dequeued.
    pub fn drain_with<F: FnMut(InputCommand)>(&mut self, mut apply: F) -> usize {
        let mut applied = 0;
        while let Some(command) = self.pending.pop_front() {
            apply(command);
            applied += 1;
        }
        applied
    }

    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!("Discarding {} undrained input commands", self.pending.len());
        }
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn dropped_duplicates(&self) -> u64 {
        self.dropped_duplicates
    }
}
