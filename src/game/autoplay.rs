use crate::core::input::{Degree, InputEvent};
use crate::game::chart::ChartNote;
use crate::game::timing::BeatClock;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Longest a tap is held down, in beats.
const TAP_PRESS_BEATS: f64 = 0.25;

#[derive(Debug, Clone, Copy)]
struct AutoplayEvent {
    beat: f64,
    degree: Degree,
    is_press: bool,
}

/// Plays a chart perfectly. Events are scheduled in beats and stamped with
/// wall-clock time only when polled, so tempo changes are followed.
#[derive(Debug)]
pub struct Autoplay {
    events: Vec<AutoplayEvent>,
    current_index: usize,
    input_offset_seconds: f64,
}

impl Autoplay {
    pub fn new(notes: &[ChartNote], input_offset_ms: f64) -> Self {
        Self {
            events: Self::build_events(notes),
            current_index: 0,
            input_offset_seconds: input_offset_ms / 1000.0,
        }
    }

    fn build_events(notes: &[ChartNote]) -> Vec<AutoplayEvent> {
        let mut by_degree: HashMap<Degree, Vec<&ChartNote>> = HashMap::new();
        for note in notes {
            by_degree.entry(note.degree).or_default().push(note);
        }

        let mut events = Vec::with_capacity(notes.len() * 2);
        for (degree, mut lane) in by_degree {
            lane.sort_by(|a, b| a.tail_beat().partial_cmp(&b.tail_beat()).unwrap_or(Ordering::Equal));
            for (i, note) in lane.iter().enumerate() {
                let press = note.tail_beat();
                let next_press = lane.get(i + 1).map(|n| n.tail_beat());
                let release = if note.length_beats > 0.0 {
                    note.beat
                } else {
                    let gap = next_press.map_or(f64::INFINITY, |next| (next - press) / 2.0);
                    press + TAP_PRESS_BEATS.min(gap)
                };
                events.push(AutoplayEvent {
                    beat: press,
                    degree,
                    is_press: true,
                });
                events.push(AutoplayEvent {
                    beat: release,
                    degree,
                    is_press: false,
                });
            }
        }

        // Releases go first on a shared beat so a key is free for the next press.
        events.sort_by(|a, b| {
            a.beat
                .partial_cmp(&b.beat)
                .unwrap_or(Ordering::Equal)
                .then(a.is_press.cmp(&b.is_press))
                .then(a.degree.cmp(&b.degree))
        });
        events
    }

    /// Every input due at or before `beat`, stamped with the time `clock`
    /// maps its beat to.
    pub fn poll(&mut self, beat: f64, clock: &BeatClock) -> Vec<InputEvent> {
        let mut due = Vec::new();
        while let Some(event) = self.events.get(self.current_index) {
            if event.beat > beat {
                break;
            }
            let timestamp = clock.beat_to_time(event.beat) + self.input_offset_seconds;
            due.push(if event.is_press {
                InputEvent::press(event.degree, timestamp)
            } else {
                InputEvent::release(event.degree, timestamp)
            });
            self.current_index += 1;
        }
        due
    }

    pub fn is_finished(&self) -> bool {
        self.current_index >= self.events.len()
    }

    pub fn reset(&mut self) {
        self.current_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::input::InputKind;

    #[test]
    fn taps_and_holds_produce_paired_events() {
        let notes = vec![
            ChartNote::tap("a", 2.0, 1),
            ChartNote::tap("b", 2.2, 1),
            ChartNote::hold("h", 8.0, 2, 3.0),
        ];
        let mut clock = BeatClock::with_schedule_lead(120.0, 0.0);
        clock.start(0.0).unwrap();
        let mut autoplay = Autoplay::new(&notes, 0.0);

        let events = autoplay.poll(100.0, &clock);
        assert!(autoplay.is_finished());
        let kinds: Vec<(Degree, InputKind)> = events.iter().map(|e| (e.degree, e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (1, InputKind::Press),
                (1, InputKind::Release),
                (1, InputKind::Press),
                (1, InputKind::Release),
                (2, InputKind::Press),
                (2, InputKind::Release),
            ]
        );
        // Tap "a" lets go halfway to "b".
        assert!((events[1].timestamp - 2.1 * 0.5).abs() < 1e-9);
        // Hold spans tail to head.
        assert!((events[4].timestamp - 2.5).abs() < 1e-9);
        assert!((events[5].timestamp - 4.0).abs() < 1e-9);
    }

    #[test]
    fn poll_only_returns_due_events() {
        let notes = vec![ChartNote::tap("a", 1.0, 1), ChartNote::tap("b", 3.0, 1)];
        let mut clock = BeatClock::with_schedule_lead(60.0, 0.0);
        clock.start(0.0).unwrap();
        let mut autoplay = Autoplay::new(&notes, 20.0);

        assert!(autoplay.poll(0.5, &clock).is_empty());
        let first = autoplay.poll(1.0, &clock);
        assert_eq!(first.len(), 1);
        assert!((first[0].timestamp - 1.02).abs() < 1e-9);
        assert_eq!(autoplay.poll(2.0, &clock).len(), 1);
        autoplay.reset();
        assert_eq!(autoplay.poll(2.0, &clock).len(), 2);
    }
}
