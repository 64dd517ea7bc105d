use groovesync::config::GameConfig;
use groovesync::core::input::InputEvent;
use groovesync::game::chart::{Chart, ChartNote};
use groovesync::game::events::GameEvent;
use groovesync::game::gameplay::Session;
use groovesync::game::judgment::{HitWindows, JudgeGrade};
use groovesync::game::timing::BeatClock;
use proptest::prelude::*;
use std::collections::HashMap;

fn started(bpm: f64) -> BeatClock {
    let mut clock = BeatClock::with_schedule_lead(bpm, 0.0);
    clock.start(0.0).unwrap();
    clock
}

proptest! {
    #[test]
    fn beat_never_jumps_across_tempo_changes(
        initial in 30.0f64..300.0,
        steps in prop::collection::vec((0.0f64..5.0, 30.0f64..300.0), 1..20),
    ) {
        let mut clock = started(initial);
        let mut now = 0.0;
        for (dt, bpm) in steps {
            now += dt;
            let before = clock.current_beat(now);
            clock.set_tempo(bpm, now);
            let after = clock.current_beat(now);
            prop_assert!((after - before).abs() <= 1e-9 * before.abs().max(1.0));
            let slope = clock.current_beat(now + 1.0) - after;
            prop_assert!((slope - bpm / 60.0).abs() < 1e-6);
        }
    }

    #[test]
    fn beat_to_time_inverts_current_beat(
        bpm in 1.0f64..400.0,
        target in 1.0f64..400.0,
        ramp in 0.0f64..4.0,
        ramp_at in 0.0f64..10.0,
        probe in 0.0f64..30.0,
    ) {
        let mut clock = started(bpm);
        clock.ramp_tempo(target, ramp, ramp_at);
        let beat = clock.current_beat(probe);
        prop_assert!((clock.beat_to_time(beat) - probe).abs() < 1e-6);
    }

    #[test]
    fn ramp_is_continuous_at_both_ends(
        bpm in 30.0f64..300.0,
        target in 30.0f64..300.0,
        duration in 0.1f64..4.0,
        start in 0.0f64..10.0,
    ) {
        let mut clock = started(bpm);
        let before = clock.current_beat(start);
        clock.ramp_tempo(target, duration, start);
        prop_assert!((clock.current_beat(start) - before).abs() < 1e-9 * before.max(1.0));

        let end = start + duration;
        let inside = clock.current_beat(end);
        prop_assert!(clock.update(end).is_some());
        prop_assert!((clock.current_beat(end) - inside).abs() < 1e-9 * inside.max(1.0));
        prop_assert!((clock.bpm(end) - target).abs() < 1e-9);
    }

    #[test]
    fn windows_nest_and_grades_grow_with_distance(
        perfect in 0.0f64..500.0,
        great in 0.0f64..800.0,
        good in 0.0f64..1500.0,
        bpm in 1.0f64..400.0,
        a in 0.0f64..5.0,
        b in 0.0f64..5.0,
    ) {
        let beats = HitWindows { perfect_ms: perfect, great_ms: great, good_ms: good }
            .sanitized()
            .to_beats(bpm);
        prop_assert!(beats.perfect <= beats.great && beats.great <= beats.good);
        prop_assert_eq!(beats.classify(beats.perfect), JudgeGrade::Perfect);
        prop_assert_eq!(beats.classify(beats.good * 1.000001 + 1e-9), JudgeGrade::Miss);
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(beats.classify(near) <= beats.classify(far));
        prop_assert_eq!(beats.classify(-a), beats.classify(a));
    }

    #[test]
    fn every_note_resolves_exactly_once(
        presses in prop::collection::vec((1u8..=4, 0.0f64..9.0, 0.01f64..1.5), 0..40),
    ) {
        let notes = vec![
            ChartNote::tap("t1", 2.0, 1),
            ChartNote::tap("t2", 3.0, 2),
            ChartNote::tap("t3", 3.0, 2),
            ChartNote::hold("h1", 8.0, 3, 3.0),
            ChartNote::hold("h2", 10.0, 4, 1.0),
            ChartNote::tap("t4", 11.0, 1),
        ];
        let config = GameConfig { schedule_lead_ms: 0.0, ..GameConfig::default() };
        let mut session = Session::new(Chart::new("fuzz", notes), config);
        session.start(0.0).unwrap();

        let mut inputs: Vec<InputEvent> = presses
            .iter()
            .flat_map(|&(degree, at, held)| [InputEvent::press(degree, at), InputEvent::release(degree, at + held)])
            .collect();
        inputs.sort_by(|x, y| x.timestamp.total_cmp(&y.timestamp));

        let mut log = Vec::new();
        let mut next = 0;
        let mut now = 0.0;
        while !session.is_finished() && now < 60.0 {
            let due = inputs[next..].iter().take_while(|e| e.timestamp <= now).count();
            log.extend(session.tick(now, &inputs[next..next + due]));
            next += due;
            now += 1.0 / 60.0;
        }
        prop_assert!(session.is_finished());

        let mut terminal: HashMap<String, usize> = HashMap::new();
        let mut judged: HashMap<String, usize> = HashMap::new();
        for event in &log {
            match event {
                GameEvent::StateChanged { note_id, to, .. } if to.is_terminal() => {
                    *terminal.entry(note_id.clone()).or_default() += 1;
                }
                GameEvent::Judgment(j) => {
                    if let Some(id) = &j.note_id {
                        *judged.entry(id.clone()).or_default() += 1;
                    }
                }
                _ => {}
            }
        }
        prop_assert_eq!(terminal.len(), 6);
        prop_assert!(terminal.values().all(|n| *n == 1));
        prop_assert_eq!(judged.len(), 6);
        prop_assert!(judged.values().all(|n| *n == 1));

        let summary = session.summary().unwrap();
        prop_assert_eq!(summary.hit_count + summary.miss_count, 6);
    }
}
