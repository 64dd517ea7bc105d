use groovesync::config::{self, GameConfig};
use groovesync::core::clock::{MonotonicClock, TimeSource};
use groovesync::core::input::InputKind;
use groovesync::game::autoplay::Autoplay;
use groovesync::game::chart::{Chart, ChartNote};
use groovesync::game::events::GameEvent;
use groovesync::game::gameplay::Session;
use log::{LevelFilter, info, warn};
use rand::Rng;
use std::error::Error;
use std::path::Path;
use std::time::Duration;

const FRAME_INTERVAL: Duration = Duration::from_millis(4);
const MAX_PRESS_JITTER_SECONDS: f64 = 0.03;
const SESSION_TIMEOUT_SECONDS: f64 = 120.0;

/// Two bars of taps, a hold on each hand, then a short run.
fn demo_chart() -> Chart {
    let mut notes = Vec::new();
    for i in 0..8u8 {
        notes.push(ChartNote::tap(format!("tap-{i}"), 2.0 + i as f64, i % 4 + 1));
    }
    notes.push(ChartNote::hold("hold-left", 14.0, 1, 3.0));
    notes.push(ChartNote::hold("hold-right", 14.0, 4, 2.0));
    for i in 0..8u8 {
        notes.push(ChartNote::tap(format!("run-{i}"), 15.0 + i as f64 * 0.5, [2, 3][(i % 2) as usize]));
    }
    Chart::new("demo", notes).with_bpm(120.0)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .filter_module("groovesync::game::registry", LevelFilter::Info)
        .filter_module("groovesync::game::spawn", LevelFilter::Info)
        .init();

    info!("groovesync starting...");

    let config = match std::env::args().nth(1) {
        Some(path) => config::load(Path::new(&path))?,
        None => {
            config::set(GameConfig::default());
            config::get()
        }
    };

    let chart = demo_chart();
    let mut autoplay = Autoplay::new(&chart.notes, config.input_offset_ms);
    let mut session = Session::new(chart, config);
    session.subscribe(|event| {
        if let GameEvent::TempoChanged(change) = event {
            info!("Tempo now {:.1} BPM ({:+.1})", change.new_bpm, change.delta);
        }
    });

    let time = MonotonicClock::new();
    let mut rng = rand::rng();
    session.start(time.now())?;

    while !session.is_finished() {
        let now = time.now();
        if now > SESSION_TIMEOUT_SECONDS {
            warn!("Session did not finish within {}s; stopping", SESSION_TIMEOUT_SECONDS);
            break;
        }
        let mut inputs = autoplay.poll(session.current_beat(now), session.clock());
        for input in inputs.iter_mut() {
            if input.kind == InputKind::Press {
                input.timestamp += rng.random_range(-MAX_PRESS_JITTER_SECONDS..MAX_PRESS_JITTER_SECONDS);
            }
        }
        session.tick(now, &inputs);
        std::thread::sleep(FRAME_INTERVAL);
    }

    match session.summary() {
        Some(summary) => println!("{}", serde_json::to_string_pretty(summary)?),
        None => warn!("No summary produced"),
    }
    Ok(())
}
