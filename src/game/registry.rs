use crate::core::input::Degree;
use crate::game::note::{Note, NoteState, TransitionError};
use log::{debug, trace};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a live note with id {0} already exists")]
    DuplicateId(String),
}

/// The live notes of a session, in spawn order.
///
/// Pure data plus the transition rules in `Note::transition`; no I/O.
#[derive(Debug, Default)]
pub struct NoteRegistry {
    notes: Vec<Note>,
}

impl NoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, note: Note) -> Result<(), RegistryError> {
        if self.position(&note.id).is_some() {
            return Err(RegistryError::DuplicateId(note.id));
        }
        trace!("Registry insert {} (beat {:.3})", note.id, note.target_beat);
        self.notes.push(note);
        Ok(())
    }

    #[inline(always)]
    fn position(&self, id: &str) -> Option<usize> {
        self.notes.iter().position(|n| n.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Note> {
        self.notes.iter_mut().find(|n| n.id == id)
    }

    pub fn state_of(&self, id: &str) -> Option<NoteState> {
        self.get(id).map(|n| n.state)
    }

    /// Moves note `id` to `to`. Rejections are returned, never panicked on.
    pub fn transition(&mut self, id: &str, to: NoteState, at: f64) -> Result<NoteState, TransitionError> {
        let note = self
            .get_mut(id)
            .ok_or_else(|| TransitionError::UnknownNote(id.to_string()))?;
        let from = note.transition(to, at)?;
        debug!("Note {} {:?} -> {:?}", id, from, to);
        Ok(from)
    }

    /// Removes every note for which `cull` returns true and hands them back.
    pub fn remove_where<F: FnMut(&Note) -> bool>(&mut self, mut cull: F) -> Vec<Note> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.notes.len());
        for note in self.notes.drain(..) {
            if cull(&note) {
                removed.push(note);
            } else {
                kept.push(note);
            }
        }
        self.notes = kept;
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter()
    }

    /// Ids of notes matching `filter`, in spawn order. Used to avoid holding a
    /// borrow across transitions.
    pub fn ids_where<F: Fn(&Note) -> bool>(&self, filter: F) -> Vec<String> {
        self.notes
            .iter()
            .filter(|n| filter(n))
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn on_degree(&self, degree: Degree) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(move |n| n.degree == degree)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes that still await a terminal outcome.
    pub fn unresolved_count(&self) -> usize {
        self.notes.iter().filter(|n| !n.is_terminal()).count()
    }

    pub fn reset(&mut self) {
        if !self.notes.is_empty() {
            debug!("Registry reset, dropping {} notes", self.notes.len());
        }
        self.notes.clear();
    }
}
