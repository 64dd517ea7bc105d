use crate::game::judgment::JudgeGrade;
use crate::game::timing::{BeatClock, TempoChange};
use log::{debug, info};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TempoSettings {
    pub base_bpm: f64,
    pub bpm_step: f64,
    /// Correct judgments in a row per speed-up. 0 disables speeding up.
    pub speed_up_every: u32,
    /// Misses in a row per slow-down. 0 disables slowing down.
    pub speed_down_after: u32,
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub adaptive: bool,
    /// When > 0, changes are ramped over this many seconds instead of stepped.
    pub ramp_seconds: f64,
}

impl Default for TempoSettings {
    fn default() -> Self {
        Self {
            base_bpm: 100.0,
            bpm_step: 10.0,
            speed_up_every: 4,
            speed_down_after: 2,
            min_bpm: 60.0,
            max_bpm: 200.0,
            adaptive: true,
            ramp_seconds: 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StreakState {
    pub combo: u32,
    pub correct_streak: u32,
    pub miss_streak: u32,
    pub max_combo: u32,
}

impl StreakState {
    pub fn record(&mut self, grade: JudgeGrade) {
        if grade.is_miss() {
            self.combo = 0;
            self.correct_streak = 0;
            self.miss_streak += 1;
        } else {
            self.combo += 1;
            self.correct_streak += 1;
            self.miss_streak = 0;
            self.max_combo = self.max_combo.max(self.combo);
        }
    }
}

/// Streak bookkeeping and streak-driven tempo adaptation.
#[derive(Debug)]
pub struct TempoController {
    settings: TempoSettings,
    streaks: StreakState,
    /// Tempo most recently asked of the clock; differs from the clock's
    /// current tempo while a ramp is running.
    target_bpm: f64,
}

impl TempoController {
    pub fn new(settings: TempoSettings) -> Self {
        Self {
            target_bpm: settings.base_bpm,
            settings,
            streaks: StreakState::default(),
        }
    }

    pub fn settings(&self) -> &TempoSettings {
        &self.settings
    }

    pub fn streaks(&self) -> &StreakState {
        &self.streaks
    }

    pub fn target_bpm(&self) -> f64 {
        self.target_bpm
    }

    /// Updates the streaks and, in adaptive mode, moves the tempo once a
    /// streak reaches its threshold. Returns the change asked of the clock.
    pub fn on_judgment(&mut self, grade: JudgeGrade, clock: &mut BeatClock, now: f64) -> Option<TempoChange> {
        self.streaks.record(grade);
        if !self.settings.adaptive {
            return None;
        }

        let s = &self.settings;
        if s.speed_up_every > 0 && self.streaks.correct_streak >= s.speed_up_every {
            self.streaks.correct_streak = 0;
            let next = (self.target_bpm + s.bpm_step).min(s.max_bpm);
            return self.retarget(next, clock, now, "streak");
        }
        if s.speed_down_after > 0 && self.streaks.miss_streak >= s.speed_down_after {
            self.streaks.miss_streak = 0;
            let next = (self.target_bpm - s.bpm_step).max(s.min_bpm);
            return self.retarget(next, clock, now, "miss streak");
        }
        None
    }

    fn retarget(&mut self, next: f64, clock: &mut BeatClock, now: f64, why: &str) -> Option<TempoChange> {
        if (next - self.target_bpm).abs() < f64::EPSILON {
            debug!("Tempo already at limit {:.2} BPM; {} ignored", next, why);
            return None;
        }
        let previous = self.target_bpm;
        self.target_bpm = next;
        info!("Tempo {:.2} -> {:.2} BPM after {}", previous, next, why);
        if self.settings.ramp_seconds > 0.0 {
            clock.ramp_tempo(next, self.settings.ramp_seconds, now);
            Some(TempoChange {
                new_bpm: next,
                delta: next - previous,
            })
        } else {
            Some(clock.set_tempo(next, now))
        }
    }

    /// Zeroes the streaks and puts the clock back on the base tempo.
    pub fn reset(&mut self, clock: &mut BeatClock, now: f64) {
        self.streaks = StreakState::default();
        self.target_bpm = self.settings.base_bpm;
        clock.set_tempo(self.settings.base_bpm, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_clock(bpm: f64) -> BeatClock {
        let mut clock = BeatClock::with_schedule_lead(bpm, 0.0);
        clock.start(0.0).unwrap();
        clock
    }

    #[test]
    fn four_perfects_raise_tempo_once() {
        let mut clock = started_clock(100.0);
        let mut tempo = TempoController::new(TempoSettings::default());
        let mut changes = Vec::new();
        for i in 0..4 {
            if let Some(change) = tempo.on_judgment(JudgeGrade::Perfect, &mut clock, i as f64) {
                changes.push(change);
            }
        }
        assert_eq!(changes.len(), 1);
        assert!((changes[0].new_bpm - 110.0).abs() < 1e-9);
        assert!((changes[0].delta - 10.0).abs() < 1e-9);
        assert!((clock.bpm(4.0) - 110.0).abs() < 1e-9);
        assert_eq!(tempo.streaks().correct_streak, 0);
        assert_eq!(tempo.streaks().combo, 4);
    }

    #[test]
    fn thresholds_fire_once_per_run() {
        let mut clock = started_clock(100.0);
        let mut tempo = TempoController::new(TempoSettings::default());
        let fired: Vec<bool> = (0..8)
            .map(|i| tempo.on_judgment(JudgeGrade::Good, &mut clock, i as f64).is_some())
            .collect();
        assert_eq!(fired, vec![false, false, false, true, false, false, false, true]);
        assert!((tempo.target_bpm() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn misses_slow_down_and_clamp() {
        let mut clock = started_clock(70.0);
        let mut tempo = TempoController::new(TempoSettings {
            base_bpm: 70.0,
            ..TempoSettings::default()
        });
        assert!(tempo.on_judgment(JudgeGrade::Miss, &mut clock, 0.0).is_none());
        let change = tempo.on_judgment(JudgeGrade::Miss, &mut clock, 1.0).unwrap();
        assert!((change.new_bpm - 60.0).abs() < 1e-9);

        // Already at min: the streak resets but nothing is emitted.
        tempo.on_judgment(JudgeGrade::Miss, &mut clock, 2.0);
        assert!(tempo.on_judgment(JudgeGrade::Miss, &mut clock, 3.0).is_none());
        assert_eq!(tempo.streaks().miss_streak, 0);
    }

    #[test]
    fn fixed_mode_only_counts() {
        let mut clock = started_clock(100.0);
        let mut tempo = TempoController::new(TempoSettings {
            adaptive: false,
            ..TempoSettings::default()
        });
        for i in 0..10 {
            assert!(tempo.on_judgment(JudgeGrade::Perfect, &mut clock, i as f64).is_none());
        }
        assert_eq!(tempo.streaks().correct_streak, 10);
        assert_eq!(tempo.streaks().max_combo, 10);
    }

    #[test]
    fn ramped_change_reaches_target_later() {
        let mut clock = started_clock(100.0);
        let mut tempo = TempoController::new(TempoSettings {
            ramp_seconds: 2.0,
            ..TempoSettings::default()
        });
        let mut change = None;
        for i in 0..4 {
            change = change.or(tempo.on_judgment(JudgeGrade::Great, &mut clock, i as f64 * 0.1));
        }
        assert!((change.unwrap().new_bpm - 110.0).abs() < 1e-9);
        assert!(clock.is_ramping());
        assert!(clock.update(2.5).is_some());
        assert!((clock.bpm(2.5) - 110.0).abs() < 1e-9);
    }

    #[test]
    fn reset_restores_base_tempo() {
        let mut clock = started_clock(100.0);
        let mut tempo = TempoController::new(TempoSettings::default());
        for i in 0..4 {
            tempo.on_judgment(JudgeGrade::Perfect, &mut clock, i as f64);
        }
        clock.reset();
        tempo.reset(&mut clock, 5.0);
        assert_eq!(*tempo.streaks(), StreakState::default());
        assert!((clock.base_bpm() - 100.0).abs() < 1e-9);
    }
}
