use crate::game::chart::{ChartNote, spawn_order};
use crate::game::engine::JudgeFrame;
use crate::game::events::GameEvent;
use crate::game::note::{Note, NoteState};
use crate::game::registry::NoteRegistry;
use log::{debug, info, warn};

/// Feeds chart notes into the registry ahead of the line, activates them as
/// they come into reach, and reclaims resolved notes once they are well past.
#[derive(Debug)]
pub struct SpawnScheduler {
    chart: Vec<ChartNote>,
    note_spawn_cursor: usize,
    lead_beats: f64,
    cull_grace_seconds: f64,
    song_ended: bool,
}

impl SpawnScheduler {
    pub fn new(mut chart: Vec<ChartNote>, lead_beats: f64, cull_grace_seconds: f64) -> Self {
        chart.sort_by(spawn_order);
        Self {
            chart,
            note_spawn_cursor: 0,
            lead_beats: lead_beats.max(0.0),
            cull_grace_seconds: cull_grace_seconds.max(0.0),
            song_ended: false,
        }
    }

    pub fn total_notes(&self) -> usize {
        self.chart.len()
    }

    pub fn total_holds(&self) -> usize {
        self.chart.iter().filter(|n| n.is_hold()).count()
    }

    pub fn is_exhausted(&self) -> bool {
        self.note_spawn_cursor >= self.chart.len()
    }

    pub fn song_ended(&self) -> bool {
        self.song_ended
    }

    /// Grace window in beats at `bpm`; constant in wall-clock time.
    #[inline(always)]
    pub fn grace_beats(&self, bpm: f64) -> f64 {
        self.cull_grace_seconds * bpm / 60.0
    }

    /// Spawns, activates and culls for beat `frame.beat`. Returns true on the
    /// one tick where the song ends.
    pub fn tick(&mut self, registry: &mut NoteRegistry, frame: &JudgeFrame, bpm: f64, out: &mut Vec<GameEvent>) -> bool {
        self.spawn_lookahead_notes(registry, frame.beat, out);
        Self::activate_reachable(registry, frame, out);
        self.cull_resolved(registry, frame.beat, bpm, out);

        if !self.song_ended && self.is_exhausted() && registry.is_empty() {
            self.song_ended = true;
            info!("Song end reached at beat {:.3}", frame.beat);
            return true;
        }
        false
    }

    fn spawn_lookahead_notes(&mut self, registry: &mut NoteRegistry, beat: f64, out: &mut Vec<GameEvent>) {
        while let Some(next) = self.chart.get(self.note_spawn_cursor) {
            if next.tail_beat() - beat > self.lead_beats {
                break;
            }
            self.note_spawn_cursor += 1;
            let note = Note::new(next.id.clone(), next.beat, next.lane(), next.degree, next.length_beats);
            let spawned = GameEvent::NoteSpawned {
                note_id: note.id.clone(),
                degree: note.degree,
                target_beat: note.target_beat,
                duration_beats: note.duration_beats,
            };
            match registry.insert(note) {
                Ok(()) => {
                    debug!("Spawned note {} for beat {:.3}", next.id, next.beat);
                    out.push(spawned);
                }
                Err(e) => {
                    warn!("Spawn skipped: {}", e);
                    out.push(GameEvent::Rejected { reason: e.to_string() });
                }
            }
        }
    }

    /// Moves every spawned note whose good window has opened at `frame.beat`
    /// to `Active`. Also run per input command, whose beat can lead the frame.
    pub fn activate_reachable(registry: &mut NoteRegistry, frame: &JudgeFrame, out: &mut Vec<GameEvent>) {
        let reach = frame.windows.good;
        let ready = registry.ids_where(|n| n.state == NoteState::Spawned && n.press_beat() - reach <= frame.beat);
        for id in ready {
            match registry.transition(&id, NoteState::Active, frame.time) {
                Ok(from) => out.push(GameEvent::StateChanged {
                    note_id: id,
                    from,
                    to: NoteState::Active,
                    beat: frame.beat,
                }),
                Err(e) => out.push(GameEvent::Rejected { reason: e.to_string() }),
            }
        }
    }

    fn cull_resolved(&mut self, registry: &mut NoteRegistry, beat: f64, bpm: f64, out: &mut Vec<GameEvent>) {
        let grace = self.grace_beats(bpm);
        let removed = registry.remove_where(|n| n.is_terminal() && beat - n.target_beat > grace);
        for note in removed {
            debug!("Reclaimed note {} ({:?})", note.id, note.state);
            out.push(GameEvent::NoteRemoved {
                note_id: note.id,
                state: note.state,
            });
        }
    }

    /// Rewinds to the start of the chart.
    pub fn reset(&mut self) {
        self.note_spawn_cursor = 0;
        self.song_ended = false;
    }
}
