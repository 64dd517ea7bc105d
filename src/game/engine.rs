use crate::core::input::Degree;
use crate::game::events::{GameEvent, HoldResult};
use crate::game::judgment::{HitWindows, JudgeGrade, Judgment, WindowBeats};
use crate::game::note::{Note, NoteState};
use crate::game::registry::NoteRegistry;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// What a press that matches no note turns into.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnmatchedPressPolicy {
    #[default]
    Ignore,
    CountAsMiss,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub windows: HitWindows,
    pub unmatched_press: UnmatchedPressPolicy,
    /// How close to the line a released hold still counts as completed.
    pub release_forgiveness_ms: f64,
    /// Start a hold whose tail reaches the line while its degree is already held.
    pub auto_hold: bool,
    pub lane_count: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            windows: HitWindows::default(),
            unmatched_press: UnmatchedPressPolicy::Ignore,
            release_forgiveness_ms: 50.0,
            auto_hold: false,
            lane_count: 4,
        }
    }
}

/// Beat position plus everything derived from the tempo for one judgment.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct JudgeFrame {
    pub beat: f64,
    pub time: f64,
    pub windows: WindowBeats,
    pub forgiveness_beats: f64,
}

impl JudgeFrame {
    /// Same tempo-derived windows, different position.
    pub fn at(&self, beat: f64, time: f64) -> Self {
        Self { beat, time, ..*self }
    }

    #[inline(always)]
    pub fn miss_threshold(&self) -> f64 {
        self.windows.good
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PressOutcome {
    Judged { note_id: String, grade: JudgeGrade },
    Unmatched,
    /// Degree was already down; only the first edge counts.
    Repeated,
    OutOfRange,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReleaseOutcome {
    Completed(String),
    Broken(String),
    Missed(String),
    Unmatched,
    OutOfRange,
}

/// Matches input against live notes and drives every note-state transition
/// that depends on timing.
#[derive(Debug)]
pub struct JudgmentEngine {
    settings: EngineSettings,
    held: Vec<bool>,
}

fn miss_judgment(note: &Note, frame: &JudgeFrame) -> Judgment {
    Judgment {
        note_id: Some(note.id.clone()),
        degree: note.degree,
        grade: JudgeGrade::Miss,
        expected_beat: Some(note.press_beat()),
        offset_beats: frame.beat - note.press_beat(),
        actual_timestamp: frame.time,
    }
}

/// Applies one transition and reports it. Rejections become a diagnostic event.
fn apply(
    registry: &mut NoteRegistry,
    id: &str,
    to: NoteState,
    frame: &JudgeFrame,
    out: &mut Vec<GameEvent>,
) -> bool {
    match registry.transition(id, to, frame.time) {
        Ok(from) => {
            out.push(GameEvent::StateChanged {
                note_id: id.to_string(),
                from,
                to,
                beat: frame.beat,
            });
            true
        }
        Err(e) => {
            debug!("Rejected transition: {}", e);
            out.push(GameEvent::Rejected {
                reason: e.to_string(),
            });
            false
        }
    }
}

impl JudgmentEngine {
    pub fn new(mut settings: EngineSettings) -> Self {
        settings.windows = settings.windows.sanitized();
        if settings.lane_count == 0 {
            warn!("Lane count 0 is invalid; using 1");
            settings.lane_count = 1;
        }
        if !settings.release_forgiveness_ms.is_finite() || settings.release_forgiveness_ms < 0.0 {
            warn!(
                "Release forgiveness {}ms is invalid; using 0",
                settings.release_forgiveness_ms
            );
            settings.release_forgiveness_ms = 0.0;
        }
        Self {
            held: vec![false; settings.lane_count as usize],
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Builds the frame for `beat`/`time` with windows converted at `bpm`.
    pub fn frame(&self, beat: f64, time: f64, bpm: f64) -> JudgeFrame {
        JudgeFrame {
            beat,
            time,
            windows: self.settings.windows.to_beats(bpm),
            forgiveness_beats: self.settings.release_forgiveness_ms / 1000.0 * bpm / 60.0,
        }
    }

    #[inline(always)]
    fn lane_index(&self, degree: Degree) -> Option<usize> {
        if degree == 0 || degree > self.settings.lane_count {
            None
        } else {
            Some(degree as usize - 1)
        }
    }

    pub fn is_held(&self, degree: Degree) -> bool {
        self.lane_index(degree).is_some_and(|i| self.held[i])
    }

    /// Forgets every held key.
    pub fn reset(&mut self) {
        self.held.iter_mut().for_each(|h| *h = false);
    }

    pub fn on_press(
        &mut self,
        registry: &mut NoteRegistry,
        degree: Degree,
        frame: &JudgeFrame,
        out: &mut Vec<GameEvent>,
    ) -> PressOutcome {
        let Some(lane_idx) = self.lane_index(degree) else {
            warn!("Press on unknown degree {}", degree);
            out.push(GameEvent::Rejected {
                reason: format!("press on unknown degree {degree}"),
            });
            return PressOutcome::OutOfRange;
        };
        if self.held[lane_idx] {
            trace!("Degree {} already held; press ignored", degree);
            return PressOutcome::Repeated;
        }
        self.held[lane_idx] = true;

        let candidate = registry
            .on_degree(degree)
            .filter(|n| n.state == NoteState::Active && !n.head_was_hit())
            .map(|n| (n, (n.press_beat() - frame.beat).abs()))
            .filter(|(_, distance)| *distance <= frame.windows.good)
            .min_by(|(a, da), (b, db)| {
                da.partial_cmp(db)
                    .unwrap_or(Ordering::Equal)
                    .then(a.target_beat.partial_cmp(&b.target_beat).unwrap_or(Ordering::Equal))
            })
            .map(|(n, distance)| (n.id.clone(), n.is_hold(), n.press_beat(), distance));

        let Some((note_id, is_hold, expected_beat, distance)) = candidate else {
            self.report_unmatched_press(degree, frame, out);
            return PressOutcome::Unmatched;
        };

        let grade = frame.windows.classify(distance);
        let to = if is_hold { NoteState::HoldStarted } else { NoteState::Hit };
        if !apply(registry, &note_id, to, frame, out) {
            return PressOutcome::Unmatched;
        }
        if let Some(note) = registry.get_mut(&note_id) {
            note.record_head_hit(grade, frame.time);
        }

        let offset_beats = frame.beat - expected_beat;
        info!(
            "JUDGED: Note {}, Degree {}, Offset: {:+.3} beats, Grade: {:?}{}",
            note_id,
            degree,
            offset_beats,
            grade,
            if is_hold { " (hold start)" } else { "" }
        );
        out.push(GameEvent::Judgment(Judgment {
            note_id: Some(note_id.clone()),
            degree,
            grade,
            expected_beat: Some(expected_beat),
            offset_beats,
            actual_timestamp: frame.time,
        }));
        PressOutcome::Judged { note_id, grade }
    }

    fn report_unmatched_press(&self, degree: Degree, frame: &JudgeFrame, out: &mut Vec<GameEvent>) {
        debug!("Unmatched press on degree {} at beat {:.3}", degree, frame.beat);
        out.push(GameEvent::UnmatchedPress {
            degree,
            timestamp: frame.time,
        });
        if self.settings.unmatched_press == UnmatchedPressPolicy::CountAsMiss {
            out.push(GameEvent::Judgment(Judgment {
                note_id: None,
                degree,
                grade: JudgeGrade::Miss,
                expected_beat: None,
                offset_beats: 0.0,
                actual_timestamp: frame.time,
            }));
        }
    }

    pub fn on_release(
        &mut self,
        registry: &mut NoteRegistry,
        degree: Degree,
        frame: &JudgeFrame,
        out: &mut Vec<GameEvent>,
    ) -> ReleaseOutcome {
        let Some(lane_idx) = self.lane_index(degree) else {
            warn!("Release on unknown degree {}", degree);
            out.push(GameEvent::Rejected {
                reason: format!("release on unknown degree {degree}"),
            });
            return ReleaseOutcome::OutOfRange;
        };
        self.held[lane_idx] = false;

        let started = registry
            .on_degree(degree)
            .filter(|n| n.state.is_holding())
            .min_by(|a, b| a.target_beat.partial_cmp(&b.target_beat).unwrap_or(Ordering::Equal))
            .map(|n| (n.id.clone(), n.target_beat, n.head_was_hit()));

        if let Some((note_id, target_beat, head_hit)) = started {
            if target_beat - frame.beat <= frame.forgiveness_beats {
                self.complete_hold(registry, &note_id, frame, out);
                return ReleaseOutcome::Completed(note_id);
            }
            self.break_hold(registry, &note_id, head_hit, frame, out);
            return ReleaseOutcome::Broken(note_id);
        }

        // A hold whose span is under way but that was never started.
        let never_started = registry
            .on_degree(degree)
            .filter(|n| {
                n.is_hold()
                    && n.state == NoteState::Active
                    && n.tail_beat() <= frame.beat
                    && frame.beat <= n.target_beat
            })
            .min_by(|a, b| a.target_beat.partial_cmp(&b.target_beat).unwrap_or(Ordering::Equal))
            .map(|n| n.id.clone());

        if let Some(note_id) = never_started {
            if apply(registry, &note_id, NoteState::Missed, frame, out) {
                if let Some(note) = registry.get(&note_id) {
                    info!("MISSED: Hold {} released without a start", note_id);
                    out.push(GameEvent::Judgment(miss_judgment(note, frame)));
                }
                return ReleaseOutcome::Missed(note_id);
            }
        }
        ReleaseOutcome::Unmatched
    }

    fn complete_hold(&self, registry: &mut NoteRegistry, note_id: &str, frame: &JudgeFrame, out: &mut Vec<GameEvent>) {
        if registry.state_of(note_id) == Some(NoteState::HoldStarted)
            && !apply(registry, note_id, NoteState::HoldActive, frame, out)
        {
            return;
        }
        if apply(registry, note_id, NoteState::HoldCompleted, frame, out) {
            info!("HOLD HELD: Note {} at beat {:.3}", note_id, frame.beat);
            out.push(GameEvent::HoldResolved {
                note_id: note_id.to_string(),
                result: HoldResult::Held,
            });
        }
    }

    fn break_hold(
        &self,
        registry: &mut NoteRegistry,
        note_id: &str,
        head_hit: bool,
        frame: &JudgeFrame,
        out: &mut Vec<GameEvent>,
    ) {
        if !apply(registry, note_id, NoteState::HoldBroken, frame, out) {
            return;
        }
        info!("HOLD LET GO: Note {} at beat {:.3}", note_id, frame.beat);
        out.push(GameEvent::HoldResolved {
            note_id: note_id.to_string(),
            result: HoldResult::LetGo,
        });
        // The start was already scored; only an unscored hold becomes a miss.
        if !head_hit {
            if let Some(note) = registry.get(note_id) {
                out.push(GameEvent::Judgment(miss_judgment(note, frame)));
            }
        }
    }

    /// Per-frame maintenance: auto-hold, hold promotion, early-release
    /// breaks, natural completion and passive misses, in that order.
    pub fn tick(&mut self, registry: &mut NoteRegistry, frame: &JudgeFrame, out: &mut Vec<GameEvent>) {
        if self.settings.auto_hold {
            self.auto_start_holds(registry, frame, out);
        }

        let held = &self.held;
        let is_down = |degree: Degree| -> bool {
            degree >= 1 && held.get(degree as usize - 1).copied().unwrap_or(false)
        };

        for id in registry.ids_where(|n| n.state == NoteState::HoldStarted && is_down(n.degree)) {
            apply(registry, &id, NoteState::HoldActive, frame, out);
        }

        let holding: Vec<(String, Degree, f64, bool)> = registry
            .iter()
            .filter(|n| n.state.is_holding())
            .map(|n| (n.id.clone(), n.degree, n.target_beat, n.head_was_hit()))
            .collect();
        for (id, degree, target_beat, head_hit) in holding {
            let head_reached = target_beat - frame.beat <= frame.forgiveness_beats;
            if !is_down(degree) && !head_reached {
                self.break_hold(registry, &id, head_hit, frame, out);
            } else if frame.beat >= target_beat {
                self.complete_hold(registry, &id, frame, out);
            }
        }

        let threshold = frame.miss_threshold();
        for id in registry.ids_where(|n| n.state == NoteState::Active && frame.beat - n.press_beat() > threshold) {
            self.on_time_expired(registry, &id, frame, out);
        }
    }

    fn auto_start_holds(&self, registry: &mut NoteRegistry, frame: &JudgeFrame, out: &mut Vec<GameEvent>) {
        let held = &self.held;
        let candidates: Vec<(String, Degree, f64)> = registry
            .iter()
            .filter(|n| {
                n.is_hold()
                    && !n.is_terminal()
                    && n.degree >= 1
                    && held.get(n.degree as usize - 1).copied().unwrap_or(false)
                    && n.tail_beat() <= frame.beat
                    && frame.beat - n.tail_beat() <= frame.windows.good
            })
            .map(|n| (n.id.clone(), n.degree, n.tail_beat()))
            .collect();

        for (id, degree, tail_beat) in candidates {
            // An already started hold is rejected here; that is the expected no-op.
            match registry.transition(&id, NoteState::HoldStarted, frame.time) {
                Ok(from) => {
                    let offset_beats = frame.beat - tail_beat;
                    let grade = frame.windows.classify(offset_beats);
                    if let Some(note) = registry.get_mut(&id) {
                        note.record_head_hit(grade, frame.time);
                    }
                    info!("AUTO-HOLD: Note {}, Degree {}, Grade: {:?}", id, degree, grade);
                    out.push(GameEvent::StateChanged {
                        note_id: id.clone(),
                        from,
                        to: NoteState::HoldStarted,
                        beat: frame.beat,
                    });
                    out.push(GameEvent::Judgment(Judgment {
                        note_id: Some(id),
                        degree,
                        grade,
                        expected_beat: Some(tail_beat),
                        offset_beats,
                        actual_timestamp: frame.time,
                    }));
                }
                Err(e) => trace!("Auto-hold skipped: {}", e),
            }
        }
    }

    /// Times out an `Active` note that is past the miss threshold. Emits the
    /// miss judgment only if the transition is accepted, so at most once.
    pub fn on_time_expired(
        &mut self,
        registry: &mut NoteRegistry,
        note_id: &str,
        frame: &JudgeFrame,
        out: &mut Vec<GameEvent>,
    ) -> bool {
        let Some(note) = registry.get(note_id) else {
            return false;
        };
        if frame.beat - note.press_beat() <= frame.miss_threshold() {
            return false;
        }
        if !apply(registry, note_id, NoteState::Missed, frame, out) {
            return false;
        }
        if let Some(note) = registry.get(note_id) {
            info!(
                "MISSED: Note {}, Degree {}, {:.3} beats late",
                note_id,
                note.degree,
                frame.beat - note.press_beat()
            );
            out.push(GameEvent::Judgment(miss_judgment(note, frame)));
        }
        true
    }
}
