use crate::core::input::Degree;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JudgeGrade {
    Perfect,
    Great,
    Good,
    Miss,
}

impl JudgeGrade {
    pub const ALL: [JudgeGrade; 4] = [
        JudgeGrade::Perfect,
        JudgeGrade::Great,
        JudgeGrade::Good,
        JudgeGrade::Miss,
    ];

    #[inline(always)]
    pub const fn is_miss(self) -> bool {
        matches!(self, JudgeGrade::Miss)
    }
}

/// Hit windows in milliseconds, each measured as absolute distance from the target.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitWindows {
    pub perfect_ms: f64,
    pub great_ms: f64,
    pub good_ms: f64,
}

impl Default for HitWindows {
    fn default() -> Self {
        Self {
            perfect_ms: 250.0,
            great_ms: 500.0,
            good_ms: 1000.0,
        }
    }
}

impl HitWindows {
    /// Forces non-negative, finite and nested windows (perfect <= great <= good).
    pub fn sanitized(self) -> Self {
        let clean = |v: f64, name: &str| {
            if !v.is_finite() || v < 0.0 {
                warn!("Hit window {} = {} is invalid; using 0ms", name, v);
                0.0
            } else {
                v
            }
        };
        let perfect_ms = clean(self.perfect_ms, "perfect");
        let mut great_ms = clean(self.great_ms, "great");
        let mut good_ms = clean(self.good_ms, "good");
        if great_ms < perfect_ms {
            warn!("Great window {}ms narrower than perfect {}ms; widened", great_ms, perfect_ms);
            great_ms = perfect_ms;
        }
        if good_ms < great_ms {
            warn!("Good window {}ms narrower than great {}ms; widened", good_ms, great_ms);
            good_ms = great_ms;
        }
        Self {
            perfect_ms,
            great_ms,
            good_ms,
        }
    }

    /// Converts to beats at `bpm`: `(ms / 1000) * (bpm / 60)`.
    #[inline(always)]
    pub fn to_beats(&self, bpm: f64) -> WindowBeats {
        let scale = bpm / 60.0 / 1000.0;
        WindowBeats {
            perfect: self.perfect_ms * scale,
            great: self.great_ms * scale,
            good: self.good_ms * scale,
        }
    }
}

/// Hit windows expressed in beats at one particular tempo.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WindowBeats {
    pub perfect: f64,
    pub great: f64,
    pub good: f64,
}

impl WindowBeats {
    /// Boundaries are inclusive; anything past `good` is a miss.
    pub fn classify(&self, distance_beats: f64) -> JudgeGrade {
        let d = distance_beats.abs();
        if d <= self.perfect {
            JudgeGrade::Perfect
        } else if d <= self.great {
            JudgeGrade::Great
        } else if d <= self.good {
            JudgeGrade::Good
        } else {
            JudgeGrade::Miss
        }
    }
}

/// One judgment handed to scoring, tempo adaptation and downstream collaborators.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Judgment {
    /// `None` for a press that matched no note.
    pub note_id: Option<String>,
    pub degree: Degree,
    pub grade: JudgeGrade,
    pub expected_beat: Option<f64>,
    /// Signed distance in beats, positive when late.
    pub offset_beats: f64,
    pub actual_timestamp: f64,
}

pub const HOLD_SCORE_HELD: i32 = 2;

pub fn grade_points_for(grade: JudgeGrade) -> i32 {
    match grade {
        JudgeGrade::Perfect => 5,
        JudgeGrade::Great => 3,
        JudgeGrade::Good => 1,
        JudgeGrade::Miss => 0,
    }
}

pub fn calculate_grade_points(scoring_counts: &HashMap<JudgeGrade, u32>, holds_held: u32) -> i32 {
    let mut total = 0i32;
    for (grade, count) in scoring_counts {
        total += grade_points_for(*grade) * (*count as i32);
    }
    total + holds_held as i32 * HOLD_SCORE_HELD
}

pub fn possible_grade_points(total_notes: u32, total_holds: u32) -> i32 {
    (total_notes as i32) * grade_points_for(JudgeGrade::Perfect) + (total_holds as i32) * HOLD_SCORE_HELD
}

pub fn calculate_score_percent(
    scoring_counts: &HashMap<JudgeGrade, u32>,
    holds_held: u32,
    possible_grade_points: i32,
) -> f64 {
    if possible_grade_points <= 0 {
        return 0.0;
    }
    let total_points = calculate_grade_points(scoring_counts, holds_held);
    (total_points as f64 / possible_grade_points as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_scale_with_tempo() {
        let beats = HitWindows::default().to_beats(100.0);
        assert!((beats.good - 1.6666667).abs() < 1e-6);
        assert!((beats.perfect - 0.4166667).abs() < 1e-6);
        let faster = HitWindows::default().to_beats(200.0);
        assert!((faster.good - 2.0 * beats.good).abs() < 1e-12);
    }

    #[test]
    fn boundaries_are_inclusive() {
        let w = WindowBeats {
            perfect: 0.25,
            great: 0.5,
            good: 1.0,
        };
        assert_eq!(w.classify(0.25), JudgeGrade::Perfect);
        assert_eq!(w.classify(0.2500001), JudgeGrade::Great);
        assert_eq!(w.classify(-0.5), JudgeGrade::Great);
        assert_eq!(w.classify(1.0), JudgeGrade::Good);
        assert_eq!(w.classify(1.0000001), JudgeGrade::Miss);
    }

    #[test]
    fn sanitized_windows_nest() {
        let w = HitWindows {
            perfect_ms: 80.0,
            great_ms: 40.0,
            good_ms: -5.0,
        }
        .sanitized();
        assert_eq!(w.perfect_ms, 80.0);
        assert_eq!(w.great_ms, 80.0);
        assert_eq!(w.good_ms, 80.0);
    }

    #[test]
    fn score_percent_counts_holds() {
        let counts = HashMap::from_iter([(JudgeGrade::Perfect, 2), (JudgeGrade::Good, 1), (JudgeGrade::Miss, 1)]);
        let possible = possible_grade_points(4, 1);
        assert_eq!(possible, 22);
        assert_eq!(calculate_grade_points(&counts, 1), 13);
        assert!((calculate_score_percent(&counts, 1, possible) - 13.0 / 22.0).abs() < 1e-12);
        assert_eq!(calculate_score_percent(&counts, 0, 0), 0.0);
    }
}
