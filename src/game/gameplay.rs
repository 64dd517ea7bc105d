use crate::config::GameConfig;
use crate::core::input::{InputCommand, InputCommandQueue, InputEvent};
use crate::game::chart::Chart;
use crate::game::engine::{JudgeFrame, JudgmentEngine};
use crate::game::events::{EventBus, GameEvent, HoldResult, SongSummary, SubscriptionId};
use crate::game::judgment::{self, JudgeGrade};
use crate::game::registry::NoteRegistry;
use crate::game::spawn::SpawnScheduler;
use crate::game::tempo::{StreakState, TempoController};
use crate::game::timing::{BeatClock, ClockError};
use log::{debug, info, warn};
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
struct SessionStats {
    grade_counts: HashMap<JudgeGrade, u32>,
    hit_count: u32,
    miss_count: u32,
    holds_held: u32,
    holds_let_go: u32,
}

/// One play-through of a chart. The host owns the loop and calls [`Session::tick`]
/// once per frame with the current monotonic time.
#[derive(Debug)]
pub struct Session {
    config: GameConfig,
    chart: Chart,
    clock: BeatClock,
    registry: NoteRegistry,
    engine: JudgmentEngine,
    tempo: TempoController,
    spawner: SpawnScheduler,
    pending_inputs: InputCommandQueue,
    bus: EventBus,
    stats: SessionStats,
    started_at: Option<f64>,
    countdown_remaining: u32,
    log_timer_start: f64,
    summary: Option<SongSummary>,
}

impl Session {
    pub fn new(chart: Chart, config: GameConfig) -> Self {
        let config = config.sanitized();
        let chart = chart.validated(config.lane_count);

        let mut tempo_settings = config.tempo_settings();
        if let Some(bpm) = chart.bpm {
            tempo_settings.base_bpm = bpm.clamp(config.min_bpm, config.max_bpm);
        }
        info!(
            "Session for '{}': {} notes ({} holds) at {:.2} BPM, last beat {:.2}",
            chart.title,
            chart.notes.len(),
            chart.hold_count(),
            tempo_settings.base_bpm,
            chart.last_beat().unwrap_or(0.0)
        );

        Self {
            clock: BeatClock::with_schedule_lead(tempo_settings.base_bpm, config.schedule_lead_ms / 1000.0),
            registry: NoteRegistry::new(),
            engine: JudgmentEngine::new(config.engine_settings()),
            tempo: TempoController::new(tempo_settings),
            spawner: SpawnScheduler::new(chart.notes.clone(), config.lead_beats, config.cull_grace_ms / 1000.0),
            pending_inputs: InputCommandQueue::new(),
            bus: EventBus::new(),
            stats: SessionStats::default(),
            started_at: None,
            countdown_remaining: 0,
            log_timer_start: 0.0,
            summary: None,
            config,
            chart,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn clock(&self) -> &BeatClock {
        &self.clock
    }

    pub fn registry(&self) -> &NoteRegistry {
        &self.registry
    }

    pub fn streaks(&self) -> &StreakState {
        self.tempo.streaks()
    }

    pub fn current_beat(&self, now: f64) -> f64 {
        self.clock.current_beat(now)
    }

    pub fn summary(&self) -> Option<&SongSummary> {
        self.summary.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.summary.is_some()
    }

    pub fn subscribe<F: FnMut(&GameEvent) + 'static>(&mut self, handler: F) -> SubscriptionId {
        self.bus.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Starts the clock. Beat 0 lands after the schedule lead, the countdown
    /// and the chart's own offset.
    pub fn start(&mut self, now: f64) -> Result<(), ClockError> {
        let bpm = self.clock.base_bpm();
        let mut lead = self.config.schedule_lead_ms / 1000.0
            + self.config.countdown_beats as f64 * 60.0 / bpm
            + self.chart.first_beat_offset_seconds;
        if lead < 0.0 {
            warn!(
                "Chart offset {:.3}s leaves a negative start lead ({:.3}s); starting at beat 0",
                self.chart.first_beat_offset_seconds, lead
            );
            lead = 0.0;
        }
        self.clock.set_schedule_lead(lead);
        self.clock.start(now)?;
        self.started_at = Some(now);
        self.countdown_remaining = self.config.countdown_beats;
        self.log_timer_start = now;
        info!("Session started; first beat in {:.3}s", lead);
        Ok(())
    }

    /// Queues a raw edge for the next tick. Returns false when it was dropped
    /// as a duplicate.
    pub fn queue_input(&mut self, event: InputEvent) -> bool {
        self.pending_inputs.push(event)
    }

    /// Advances the session to `now`: clock, countdown, spawns, queued input,
    /// hold/miss maintenance, tempo adaptation, then song end. Every event is
    /// published to subscribers and returned.
    pub fn tick(&mut self, now: f64, inputs: &[InputEvent]) -> Vec<GameEvent> {
        for event in inputs {
            self.queue_input(*event);
        }
        if !self.clock.is_started() {
            debug!("tick before start; {} inputs left queued", self.pending_inputs.len());
            return Vec::new();
        }

        let mut out = Vec::new();

        if let Some(change) = self.clock.update(now) {
            debug!("Clock settled at {:.2} BPM", change.new_bpm);
        }
        let beat = self.clock.current_beat(now);
        let bpm = self.clock.bpm(now);

        self.emit_countdown(beat, &mut out);

        let frame = self.engine.frame(beat, now, bpm);
        let song_ended = self.spawner.tick(&mut self.registry, &frame, bpm, &mut out);

        self.process_input_commands(&frame, &mut out);
        self.engine.tick(&mut self.registry, &frame, &mut out);

        self.apply_tempo_adaptation(now, &mut out);
        self.record_stats(&out);

        if song_ended && self.summary.is_none() {
            let summary = self.build_summary(now);
            info!(
                "Song ended: {}/{} hit, {} missed, max combo {}, score {:.2}%",
                summary.hit_count,
                summary.total_notes,
                summary.miss_count,
                summary.max_combo,
                summary.score_percent * 100.0
            );
            self.summary = Some(summary.clone());
            out.push(GameEvent::SongEnded(summary));
        }

        if now - self.log_timer_start >= 1.0 {
            info!(
                "Beat: {:.2}, BPM: {:.2}, Combo: {}, Misses: {}, Live Notes: {} ({} pending)",
                beat,
                bpm,
                self.tempo.streaks().combo,
                self.stats.miss_count,
                self.registry.len(),
                self.registry.unresolved_count()
            );
            self.log_timer_start = now;
        }

        self.bus.publish_all(&out);
        out
    }

    fn emit_countdown(&mut self, beat: f64, out: &mut Vec<GameEvent>) {
        while self.countdown_remaining > 0 && beat >= -(self.countdown_remaining as f64) {
            debug!("Countdown {}", self.countdown_remaining);
            out.push(GameEvent::Countdown {
                beats_remaining: self.countdown_remaining,
            });
            self.countdown_remaining -= 1;
        }
    }

    /// Drains the queue in arrival order. Each command is judged at the beat
    /// of its own (offset-corrected) timestamp, after activating whatever is
    /// in reach at that beat.
    fn process_input_commands(&mut self, frame: &JudgeFrame, out: &mut Vec<GameEvent>) {
        let offset = self.config.input_offset_ms / 1000.0;
        let clock = &self.clock;
        let engine = &mut self.engine;
        let registry = &mut self.registry;
        self.pending_inputs.drain_with(|command| {
            let event_time = command.timestamp() - offset;
            let event_frame = frame.at(clock.current_beat(event_time), event_time);
            if event_frame.beat > frame.beat {
                SpawnScheduler::activate_reachable(registry, &event_frame, out);
            }
            match command {
                InputCommand::Press { degree, .. } => {
                    engine.on_press(registry, degree, &event_frame, out);
                }
                InputCommand::Release { degree, .. } => {
                    engine.on_release(registry, degree, &event_frame, out);
                }
            }
        });
    }

    fn apply_tempo_adaptation(&mut self, now: f64, out: &mut Vec<GameEvent>) {
        let grades: Vec<JudgeGrade> = out
            .iter()
            .filter_map(|event| match event {
                GameEvent::Judgment(j) => Some(j.grade),
                _ => None,
            })
            .collect();
        for grade in grades {
            if let Some(change) = self.tempo.on_judgment(grade, &mut self.clock, now) {
                out.push(GameEvent::TempoChanged(change));
            }
        }
    }

    fn record_stats(&mut self, out: &[GameEvent]) {
        for event in out {
            match event {
                GameEvent::Judgment(j) if j.note_id.is_some() => {
                    *self.stats.grade_counts.entry(j.grade).or_insert(0) += 1;
                    if j.grade.is_miss() {
                        self.stats.miss_count += 1;
                    } else {
                        self.stats.hit_count += 1;
                    }
                }
                GameEvent::HoldResolved { result, .. } => match result {
                    HoldResult::Held => self.stats.holds_held += 1,
                    HoldResult::LetGo => self.stats.holds_let_go += 1,
                },
                _ => {}
            }
        }
    }

    fn build_summary(&self, now: f64) -> SongSummary {
        let total_notes = self.spawner.total_notes() as u32;
        let possible = judgment::possible_grade_points(total_notes, self.spawner.total_holds() as u32);
        SongSummary {
            total_notes,
            hit_count: self.stats.hit_count,
            miss_count: self.stats.miss_count,
            duration_seconds: self.started_at.map_or(0.0, |start| now - start),
            max_combo: self.tempo.streaks().max_combo,
            holds_held: self.stats.holds_held,
            holds_let_go: self.stats.holds_let_go,
            grade_counts: self.stats.grade_counts.clone(),
            score_percent: judgment::calculate_score_percent(
                &self.stats.grade_counts,
                self.stats.holds_held,
                possible,
            ),
            final_bpm: self.clock.bpm(now),
        }
    }

    /// Returns the session to its pre-start state. Queued input is dropped
    /// first so nothing resolves against the emptied registry.
    pub fn reset(&mut self) {
        if !self.pending_inputs.is_empty() {
            warn!("Reset dropped {} queued inputs", self.pending_inputs.len());
        }
        self.pending_inputs.clear();
        self.clock.reset();
        self.registry.reset();
        self.tempo.reset(&mut self.clock, 0.0);
        self.spawner.reset();
        self.engine.reset();
        self.stats = SessionStats::default();
        self.started_at = None;
        self.countdown_remaining = 0;
        self.summary = None;
        info!("Session reset");
    }
}
