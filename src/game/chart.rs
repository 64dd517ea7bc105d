use crate::core::input::Degree;
use crate::game::note::TAP_DURATION_EPSILON;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// One authored note, as supplied by a chart loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartNote {
    pub id: String,
    /// Beat at which the head reaches the line.
    pub beat: f64,
    pub degree: Degree,
    /// Visual lane; defaults to the degree.
    #[serde(default)]
    pub lane: Option<u8>,
    #[serde(default)]
    pub length_beats: f64,
}

impl ChartNote {
    pub fn tap(id: impl Into<String>, beat: f64, degree: Degree) -> Self {
        Self {
            id: id.into(),
            beat,
            degree,
            lane: None,
            length_beats: 0.0,
        }
    }

    pub fn hold(id: impl Into<String>, beat: f64, degree: Degree, length_beats: f64) -> Self {
        Self {
            length_beats,
            ..Self::tap(id, beat, degree)
        }
    }

    /// Same rule the engine applies to live notes.
    #[inline(always)]
    pub fn is_hold(&self) -> bool {
        self.length_beats > TAP_DURATION_EPSILON
    }

    #[inline(always)]
    pub fn tail_beat(&self) -> f64 {
        self.beat - self.length_beats
    }

    #[inline(always)]
    pub fn lane(&self) -> u8 {
        self.lane.unwrap_or(self.degree)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub title: String,
    /// Authored tempo. When absent the configured base tempo is used.
    #[serde(default)]
    pub bpm: Option<f64>,
    /// Wall-clock shift of beat 0. Negative values pull the first beat
    /// earlier, eating into the session's start lead.
    #[serde(default)]
    pub first_beat_offset_seconds: f64,
    pub notes: Vec<ChartNote>,
}

/// Spawn order: earliest span start first, then earliest head. Stable.
pub(crate) fn spawn_order(a: &ChartNote, b: &ChartNote) -> Ordering {
    a.tail_beat()
        .partial_cmp(&b.tail_beat())
        .unwrap_or(Ordering::Equal)
        .then(a.beat.partial_cmp(&b.beat).unwrap_or(Ordering::Equal))
}

impl Chart {
    pub fn new(title: impl Into<String>, notes: Vec<ChartNote>) -> Self {
        Self {
            title: title.into(),
            notes,
            ..Self::default()
        }
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = Some(bpm);
        self
    }

    /// Drops notes that cannot be played with `lane_count` degrees and
    /// returns the rest in spawn order.
    pub fn validated(self, lane_count: u8) -> Chart {
        let before = self.notes.len();
        let mut seen: HashSet<String> = HashSet::with_capacity(before);
        let mut notes: Vec<ChartNote> = self
            .notes
            .into_iter()
            .filter(|n| {
                if !n.beat.is_finite() || !n.length_beats.is_finite() {
                    warn!("Chart note {} has a non-finite beat; dropped", n.id);
                    return false;
                }
                if n.length_beats < 0.0 {
                    warn!("Chart note {} has negative length {}; dropped", n.id, n.length_beats);
                    return false;
                }
                if n.degree == 0 || n.degree > lane_count {
                    warn!(
                        "Chart note {} uses degree {} outside 1..={}; dropped",
                        n.id, n.degree, lane_count
                    );
                    return false;
                }
                if !seen.insert(n.id.clone()) {
                    warn!("Chart note id {} is duplicated; later copy dropped", n.id);
                    return false;
                }
                true
            })
            .map(|mut n| {
                if n.length_beats > 0.0 && !n.is_hold() {
                    debug!("Chart note {} length {:e} is below hold resolution; tap", n.id, n.length_beats);
                    n.length_beats = 0.0;
                }
                n
            })
            .collect();
        notes.sort_by(spawn_order);
        if notes.len() != before {
            info!("Chart '{}': kept {} of {} notes", self.title, notes.len(), before);
        }
        let first_beat_offset_seconds = if self.first_beat_offset_seconds.is_finite() {
            self.first_beat_offset_seconds
        } else {
            warn!("Chart '{}' first beat offset is not finite; using 0", self.title);
            0.0
        };
        let bpm = self.bpm.filter(|b| {
            let ok = b.is_finite() && *b > 0.0;
            if !ok {
                warn!("Chart '{}' tempo {} is invalid; ignored", self.title, b);
            }
            ok
        });
        Chart {
            title: self.title,
            bpm,
            first_beat_offset_seconds,
            notes,
        }
    }

    pub fn hold_count(&self) -> usize {
        self.notes.iter().filter(|n| n.is_hold()).count()
    }

    /// Beat of the last head in the chart.
    pub fn last_beat(&self) -> Option<f64> {
        self.notes.iter().map(|n| n.beat).reduce(f64::max)
    }
}
