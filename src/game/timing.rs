use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

/// Lead between `start()` and beat 0, so an external audio device can be armed.
pub const SCHEDULE_LEAD_SECONDS: f64 = 0.1;
/// Lowest tempo the clock will run at; anything below is clamped.
pub const MIN_SAFE_BPM: f64 = 1.0;
const DEFAULT_BPM: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("beat clock is already started")]
    AlreadyStarted,
}

/// Emitted whenever the clock's slope changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempoChange {
    pub new_bpm: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Copy)]
struct TempoRamp {
    start_beat: f64,
    start_time: f64,
    start_bpm: f64,
    target_bpm: f64,
    duration: f64,
}

impl TempoRamp {
    #[inline(always)]
    fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// bpm change per second of ramp.
    #[inline(always)]
    fn slope(&self) -> f64 {
        (self.target_bpm - self.start_bpm) / self.duration
    }

    fn bpm_at(&self, now: f64) -> f64 {
        let t = ((now - self.start_time) / self.duration).clamp(0.0, 1.0);
        self.start_bpm + (self.target_bpm - self.start_bpm) * t
    }

    /// Integral of the interpolated bpm from the ramp start, in beats.
    fn beats_between(&self, from_start: f64) -> f64 {
        if from_start <= 0.0 {
            return from_start * self.start_bpm / 60.0;
        }
        let inside = from_start.min(self.duration);
        let mut beats = (self.start_bpm * inside + 0.5 * self.slope() * inside * inside) / 60.0;
        if from_start > self.duration {
            beats += (from_start - self.duration) * self.target_bpm / 60.0;
        }
        beats
    }

    fn beat_at(&self, now: f64) -> f64 {
        self.start_beat + self.beats_between(now - self.start_time)
    }

    fn end_beat(&self) -> f64 {
        self.beat_at(self.end_time())
    }

    /// Inverse of `beat_at`.
    fn time_at(&self, beat: f64) -> f64 {
        let db = beat - self.start_beat;
        if db <= 0.0 {
            return self.start_time + db * 60.0 / self.start_bpm;
        }
        let end_beat = self.end_beat();
        if beat >= end_beat {
            return self.end_time() + (beat - end_beat) * 60.0 / self.target_bpm;
        }
        let a = self.slope();
        let v0 = self.start_bpm;
        // Root of 0.5*a*dt^2 + v0*dt - 60*db = 0, in the form that stays exact as a -> 0.
        let disc = (v0 * v0 + 2.0 * a * 60.0 * db).max(0.0);
        self.start_time + 120.0 * db / (v0 + disc.sqrt())
    }
}

/// One stretch of the timeline: a tempo from an anchor, possibly ramping.
#[derive(Debug, Clone, Copy)]
struct Segment {
    anchor_beat: f64,
    anchor_time: f64,
    bpm: f64,
    ramp: Option<TempoRamp>,
}

impl Segment {
    const fn steady(anchor_beat: f64, anchor_time: f64, bpm: f64) -> Self {
        Self {
            anchor_beat,
            anchor_time,
            bpm,
            ramp: None,
        }
    }

    fn beat_at(&self, now: f64) -> f64 {
        match &self.ramp {
            Some(ramp) => ramp.beat_at(now),
            None => self.anchor_beat + (now - self.anchor_time) * self.bpm / 60.0,
        }
    }

    fn time_at(&self, beat: f64) -> f64 {
        match &self.ramp {
            Some(ramp) => ramp.time_at(beat),
            None => self.anchor_time + (beat - self.anchor_beat) * 60.0 / self.bpm,
        }
    }

    fn bpm_at(&self, now: f64) -> f64 {
        match &self.ramp {
            Some(ramp) => ramp.bpm_at(now),
            None => self.bpm,
        }
    }
}

/// Maps a monotonic time in seconds to a continuous beat position.
///
/// Every tempo change re-anchors at the beat the clock is currently at, so the
/// beat value itself never jumps; only its slope changes. The segment before
/// the latest re-anchor is kept so late-arriving timestamps still map through
/// the tempo that was in effect when they happened.
#[derive(Debug, Clone)]
pub struct BeatClock {
    segment: Segment,
    previous: Option<Segment>,
    started: bool,
    schedule_lead: f64,
}

#[inline(always)]
fn sanitize_bpm(bpm: f64) -> f64 {
    if !bpm.is_finite() {
        warn!("Non-finite BPM {} replaced with {}", bpm, DEFAULT_BPM);
        return DEFAULT_BPM;
    }
    if bpm < MIN_SAFE_BPM {
        warn!("BPM {:.3} below minimum; clamped to {}", bpm, MIN_SAFE_BPM);
        return MIN_SAFE_BPM;
    }
    bpm
}

impl BeatClock {
    pub fn new(bpm: f64) -> Self {
        Self::with_schedule_lead(bpm, SCHEDULE_LEAD_SECONDS)
    }

    pub fn with_schedule_lead(bpm: f64, schedule_lead: f64) -> Self {
        Self {
            segment: Segment::steady(0.0, 0.0, sanitize_bpm(bpm)),
            previous: None,
            started: false,
            schedule_lead: if schedule_lead.is_finite() { schedule_lead } else { 0.0 },
        }
    }

    pub fn start(&mut self, now: f64) -> Result<(), ClockError> {
        if self.started {
            return Err(ClockError::AlreadyStarted);
        }
        self.segment = Segment::steady(0.0, now + self.schedule_lead, self.segment.bpm);
        self.previous = None;
        self.started = true;
        info!(
            "BeatClock started at {:.3}s; beat 0 at {:.3}s ({:.2} BPM)",
            now, self.segment.anchor_time, self.segment.bpm
        );
        Ok(())
    }

    #[inline(always)]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[inline(always)]
    pub fn is_ramping(&self) -> bool {
        self.segment.ramp.is_some()
    }

    pub fn schedule_lead(&self) -> f64 {
        self.schedule_lead
    }

    /// Lead applied by the next `start()`. Has no effect on a running clock.
    pub fn set_schedule_lead(&mut self, schedule_lead: f64) {
        if schedule_lead.is_finite() {
            self.schedule_lead = schedule_lead;
        }
    }

    pub fn anchor(&self) -> (f64, f64) {
        (self.segment.anchor_beat, self.segment.anchor_time)
    }

    #[inline(always)]
    fn segment_for_time(&self, now: f64) -> &Segment {
        match &self.previous {
            Some(previous) if now < self.segment.anchor_time => previous,
            _ => &self.segment,
        }
    }

    #[inline(always)]
    fn segment_for_beat(&self, beat: f64) -> &Segment {
        match &self.previous {
            Some(previous) if beat < self.segment.anchor_beat => previous,
            _ => &self.segment,
        }
    }

    /// Replaces the current segment, keeping the old one for earlier lookups.
    fn reanchor(&mut self, next: Segment) {
        self.previous = Some(self.segment);
        self.segment = next;
    }

    pub fn current_beat(&self, now: f64) -> f64 {
        if !self.started {
            return 0.0;
        }
        self.segment_for_time(now).beat_at(now)
    }

    /// Tempo in effect at `now`; interpolated while a ramp is running.
    pub fn bpm(&self, now: f64) -> f64 {
        self.segment_for_time(now).bpm_at(now)
    }

    /// Anchor tempo, ignoring any running ramp.
    pub fn base_bpm(&self) -> f64 {
        self.segment.bpm
    }

    pub fn beat_to_time(&self, beat: f64) -> f64 {
        self.segment_for_beat(beat).time_at(beat)
    }

    /// Re-anchors at the current beat, then switches to `new_bpm`.
    /// Cancels a running ramp at its current tempo first.
    pub fn set_tempo(&mut self, new_bpm: f64, now: f64) -> TempoChange {
        let new_bpm = sanitize_bpm(new_bpm);
        let old_bpm = self.bpm(now);
        if self.is_ramping() {
            debug!("set_tempo cancelled a running ramp at {:.2} BPM", old_bpm);
        }
        if self.started {
            let beat = self.current_beat(now);
            self.reanchor(Segment::steady(beat, now, new_bpm));
        } else {
            self.segment = Segment::steady(self.segment.anchor_beat, self.segment.anchor_time, new_bpm);
        }
        debug!(
            "Tempo set {:.2} -> {:.2} BPM at beat {:.3}",
            old_bpm, new_bpm, self.segment.anchor_beat
        );
        TempoChange {
            new_bpm,
            delta: new_bpm - old_bpm,
        }
    }

    /// Starts a linear ramp to `target_bpm` over `duration` seconds.
    ///
    /// Progress is carried in the clock and resolved by `update`; nothing blocks.
    /// Re-targeting a running ramp first settles on the current beat and tempo.
    pub fn ramp_tempo(&mut self, target_bpm: f64, duration: f64, now: f64) {
        let target_bpm = sanitize_bpm(target_bpm);
        if !self.started || !duration.is_finite() || duration <= 0.0 {
            self.set_tempo(target_bpm, now);
            return;
        }
        if let Some(ramp) = &self.segment.ramp {
            if (ramp.target_bpm - target_bpm).abs() < f64::EPSILON {
                return;
            }
        }

        let beat = self.current_beat(now);
        let bpm = self.bpm(now);
        self.reanchor(Segment {
            ramp: Some(TempoRamp {
                start_beat: beat,
                start_time: now,
                start_bpm: bpm,
                target_bpm,
                duration,
            }),
            ..Segment::steady(beat, now, bpm)
        });
        debug!(
            "Ramping {:.2} -> {:.2} BPM over {:.2}s from beat {:.3}",
            bpm, target_bpm, duration, beat
        );
    }

    /// Per-tick maintenance. Finishes a due ramp with a final re-anchor at the
    /// target tempo and reports the resulting change.
    pub fn update(&mut self, now: f64) -> Option<TempoChange> {
        let ramp = self.segment.ramp?;
        if now < ramp.end_time() {
            return None;
        }
        self.reanchor(Segment::steady(ramp.end_beat(), ramp.end_time(), ramp.target_bpm));
        info!(
            "Tempo ramp finished at {:.2} BPM (beat {:.3})",
            self.segment.bpm, self.segment.anchor_beat
        );
        Some(TempoChange {
            new_bpm: ramp.target_bpm,
            delta: ramp.target_bpm - ramp.start_bpm,
        })
    }

    pub fn stop(&mut self) {
        if self.started {
            info!("BeatClock stopped");
        }
        self.started = false;
        self.segment.ramp = None;
        self.previous = None;
    }

    /// Stops the clock and zeroes its anchors. The tempo is left as-is.
    pub fn reset(&mut self) {
        self.stop();
        self.segment = Segment::steady(0.0, 0.0, self.segment.bpm);
    }
}

impl Default for BeatClock {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn started(bpm: f64) -> BeatClock {
        let mut clock = BeatClock::with_schedule_lead(bpm, 0.0);
        clock.start(0.0).unwrap();
        clock
    }

    #[test]
    fn unstarted_clock_reads_zero() {
        let clock = BeatClock::new(150.0);
        assert_eq!(clock.current_beat(42.0), 0.0);
    }

    #[test]
    fn start_twice_fails() {
        let mut clock = BeatClock::new(120.0);
        clock.start(1.0).unwrap();
        assert_eq!(clock.start(2.0), Err(ClockError::AlreadyStarted));
    }

    #[test]
    fn start_applies_schedule_lead() {
        let mut clock = BeatClock::new(120.0);
        clock.start(5.0).unwrap();
        assert!((clock.current_beat(5.0 + SCHEDULE_LEAD_SECONDS)).abs() < EPS);
        assert!(clock.current_beat(5.0) < 0.0);
    }

    #[test]
    fn set_tempo_keeps_beat_and_changes_slope() {
        let mut clock = started(120.0);
        let before = clock.current_beat(10.0);
        let change = clock.set_tempo(60.0, 10.0);
        let after = clock.current_beat(10.0);
        assert!((before - after).abs() < EPS);
        assert!((change.delta + 60.0).abs() < EPS);
        assert!((clock.current_beat(11.0) - after - 1.0).abs() < EPS);
    }

    #[test]
    fn round_trip_through_time() {
        let mut clock = started(137.0);
        clock.set_tempo(91.5, 3.3);
        let now = 7.25;
        assert!((clock.beat_to_time(clock.current_beat(now)) - now).abs() < 1e-9);
    }

    #[test]
    fn invalid_bpm_is_clamped() {
        let clock = BeatClock::new(0.0);
        assert_eq!(clock.base_bpm(), MIN_SAFE_BPM);
        let clock = BeatClock::new(f64::NAN);
        assert_eq!(clock.base_bpm(), DEFAULT_BPM);
    }

    #[test]
    fn ramp_is_continuous_and_finishes_on_target() {
        let mut clock = started(100.0);
        let at_start = clock.current_beat(2.0);
        clock.ramp_tempo(140.0, 4.0, 2.0);
        assert!((clock.current_beat(2.0) - at_start).abs() < EPS);
        assert!((clock.bpm(4.0) - 120.0).abs() < EPS);

        // 4s averaging 120 BPM = 8 beats.
        let end_beat = clock.current_beat(6.0);
        assert!((end_beat - at_start - 8.0).abs() < 1e-9);

        assert!(clock.update(5.0).is_none());
        let change = clock.update(6.5).expect("ramp should finish");
        assert_eq!(change.new_bpm, 140.0);
        assert!(!clock.is_ramping());
        assert!((clock.current_beat(6.0) - end_beat).abs() < 1e-9);
    }

    #[test]
    fn ramp_round_trip() {
        let mut clock = started(90.0);
        clock.ramp_tempo(180.0, 3.0, 1.0);
        for now in [0.5, 1.0, 1.7, 2.9, 4.0, 6.0] {
            let beat = clock.current_beat(now);
            assert!((clock.beat_to_time(beat) - now).abs() < 1e-6, "now={now}");
        }
    }

    #[test]
    fn retargeting_ramp_keeps_continuity() {
        let mut clock = started(100.0);
        clock.ramp_tempo(200.0, 10.0, 0.0);
        let beat = clock.current_beat(5.0);
        let bpm = clock.bpm(5.0);
        clock.ramp_tempo(80.0, 2.0, 5.0);
        assert!((clock.current_beat(5.0) - beat).abs() < 1e-9);
        assert!((clock.bpm(5.0) - bpm).abs() < 1e-9);
    }

    #[test]
    fn late_timestamps_map_through_previous_tempo() {
        let mut clock = started(120.0);
        clock.set_tempo(60.0, 10.0);
        // 9s at 120 BPM, not extrapolated back at 60.
        assert!((clock.current_beat(9.0) - 18.0).abs() < EPS);
        assert!((clock.bpm(9.0) - 120.0).abs() < EPS);
        assert!((clock.beat_to_time(18.0) - 9.0).abs() < EPS);
        assert!((clock.current_beat(11.0) - 21.0).abs() < EPS);
    }

    #[test]
    fn finished_ramp_still_answers_for_its_span() {
        let mut clock = started(100.0);
        clock.ramp_tempo(140.0, 4.0, 2.0);
        let inside = clock.current_beat(4.0);
        clock.update(6.5);
        assert!((clock.current_beat(4.0) - inside).abs() < EPS);
        assert!((clock.beat_to_time(inside) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn reset_zeroes_anchors() {
        let mut clock = started(120.0);
        clock.set_tempo(150.0, 4.0);
        clock.reset();
        assert!(!clock.is_started());
        assert_eq!(clock.anchor(), (0.0, 0.0));
        assert_eq!(clock.current_beat(100.0), 0.0);
    }
}
