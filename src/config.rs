use crate::game::engine::{EngineSettings, UnmatchedPressPolicy};
use crate::game::judgment::HitWindows;
use crate::game::tempo::TempoSettings;
use crate::game::timing::{MIN_SAFE_BPM, SCHEDULE_LEAD_SECONDS};
use configparser::ini::Ini;
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const MAX_LANES: u8 = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {message}")]
    Load { path: PathBuf, message: String },
    #[error("[{section}] {key} = '{value}' is not a valid value")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),
}

/// Every tunable of a session. Components receive a copy; none of them
/// reads the global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    // [Tempo]
    pub base_bpm: f64,
    pub bpm_step: f64,
    pub speed_up_every: u32,
    pub speed_down_after: u32,
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub adaptive_tempo: bool,
    pub tempo_ramp_seconds: f64,
    // [Judgment]
    pub hit_windows: HitWindows,
    pub hold_release_forgiveness_ms: f64,
    pub unmatched_press: UnmatchedPressPolicy,
    pub auto_hold: bool,
    // [Input]
    pub lane_count: u8,
    pub input_offset_ms: f64,
    // [Session]
    pub lead_beats: f64,
    pub cull_grace_ms: f64,
    pub countdown_beats: u32,
    pub schedule_lead_ms: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            base_bpm: 100.0,
            bpm_step: 10.0,
            speed_up_every: 4,
            speed_down_after: 2,
            min_bpm: 60.0,
            max_bpm: 200.0,
            adaptive_tempo: true,
            tempo_ramp_seconds: 0.0,
            hit_windows: HitWindows::default(),
            hold_release_forgiveness_ms: 50.0,
            unmatched_press: UnmatchedPressPolicy::Ignore,
            auto_hold: false,
            lane_count: 4,
            input_offset_ms: 0.0,
            lead_beats: 4.0,
            cull_grace_ms: 500.0,
            countdown_beats: 0,
            schedule_lead_ms: SCHEDULE_LEAD_SECONDS * 1000.0,
        }
    }
}

fn finite_or(value: f64, fallback: f64, name: &str) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!("{} = {} is not finite; using {}", name, value, fallback);
        fallback
    }
}

fn non_negative(value: f64, name: &str) -> f64 {
    if value < 0.0 {
        warn!("{} = {} is negative; using 0", name, value);
        0.0
    } else {
        value
    }
}

impl GameConfig {
    /// Clamps every out-of-range value to something playable, logging each fix.
    pub fn sanitized(mut self) -> Self {
        let defaults = GameConfig::default();

        self.min_bpm = finite_or(self.min_bpm, defaults.min_bpm, "MinBpm").max(MIN_SAFE_BPM);
        self.max_bpm = finite_or(self.max_bpm, defaults.max_bpm, "MaxBpm").max(MIN_SAFE_BPM);
        if self.min_bpm > self.max_bpm {
            warn!("MinBpm {} above MaxBpm {}; swapped", self.min_bpm, self.max_bpm);
            std::mem::swap(&mut self.min_bpm, &mut self.max_bpm);
        }
        let base = finite_or(self.base_bpm, defaults.base_bpm, "BaseBpm");
        self.base_bpm = base.clamp(self.min_bpm, self.max_bpm);
        if self.base_bpm != base {
            warn!("BaseBpm {} outside {}..={}; clamped", base, self.min_bpm, self.max_bpm);
        }
        self.bpm_step = non_negative(finite_or(self.bpm_step, defaults.bpm_step, "BpmStep"), "BpmStep");
        self.tempo_ramp_seconds = non_negative(
            finite_or(self.tempo_ramp_seconds, 0.0, "RampSeconds"),
            "RampSeconds",
        );

        self.hit_windows = self.hit_windows.sanitized();
        self.hold_release_forgiveness_ms = non_negative(
            finite_or(
                self.hold_release_forgiveness_ms,
                defaults.hold_release_forgiveness_ms,
                "HoldReleaseForgivenessMs",
            ),
            "HoldReleaseForgivenessMs",
        );

        if self.lane_count == 0 || self.lane_count > MAX_LANES {
            let clamped = self.lane_count.clamp(1, MAX_LANES);
            warn!("LaneCount {} outside 1..={}; using {}", self.lane_count, MAX_LANES, clamped);
            self.lane_count = clamped;
        }
        self.input_offset_ms = finite_or(self.input_offset_ms, 0.0, "InputOffsetMs");

        self.lead_beats = non_negative(finite_or(self.lead_beats, defaults.lead_beats, "LeadBeats"), "LeadBeats");
        self.cull_grace_ms = non_negative(
            finite_or(self.cull_grace_ms, defaults.cull_grace_ms, "CullGraceMs"),
            "CullGraceMs",
        );
        self.schedule_lead_ms = non_negative(
            finite_or(self.schedule_lead_ms, defaults.schedule_lead_ms, "ScheduleLeadMs"),
            "ScheduleLeadMs",
        );
        self
    }

    pub fn tempo_settings(&self) -> TempoSettings {
        TempoSettings {
            base_bpm: self.base_bpm,
            bpm_step: self.bpm_step,
            speed_up_every: self.speed_up_every,
            speed_down_after: self.speed_down_after,
            min_bpm: self.min_bpm,
            max_bpm: self.max_bpm,
            adaptive: self.adaptive_tempo,
            ramp_seconds: self.tempo_ramp_seconds,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            windows: self.hit_windows,
            unmatched_press: self.unmatched_press,
            release_forgiveness_ms: self.hold_release_forgiveness_ms,
            auto_hold: self.auto_hold,
            lane_count: self.lane_count,
        }
    }

    /// Reads an INI file. Missing keys keep their defaults; the result is sanitized.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut ini = Ini::new();
        ini.load(path).map_err(|message| ConfigError::Load {
            path: path.to_path_buf(),
            message,
        })?;
        Self::from_ini(&ini)
    }

    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let mut ini = Ini::new();
        ini.read(text.to_string()).map_err(|message| ConfigError::Load {
            path: PathBuf::from("<string>"),
            message,
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut c = GameConfig::default();

        read_into(ini, "Tempo", "BaseBpm", &mut c.base_bpm)?;
        read_into(ini, "Tempo", "BpmStep", &mut c.bpm_step)?;
        read_into(ini, "Tempo", "SpeedUpEvery", &mut c.speed_up_every)?;
        read_into(ini, "Tempo", "SpeedDownAfter", &mut c.speed_down_after)?;
        read_into(ini, "Tempo", "MinBpm", &mut c.min_bpm)?;
        read_into(ini, "Tempo", "MaxBpm", &mut c.max_bpm)?;
        read_flag(ini, "Tempo", "Adaptive", &mut c.adaptive_tempo)?;
        read_into(ini, "Tempo", "RampSeconds", &mut c.tempo_ramp_seconds)?;

        read_into(ini, "Judgment", "PerfectMs", &mut c.hit_windows.perfect_ms)?;
        read_into(ini, "Judgment", "GreatMs", &mut c.hit_windows.great_ms)?;
        read_into(ini, "Judgment", "GoodMs", &mut c.hit_windows.good_ms)?;
        read_into(
            ini,
            "Judgment",
            "HoldReleaseForgivenessMs",
            &mut c.hold_release_forgiveness_ms,
        )?;
        if let Some(raw) = ini.get("Judgment", "UnmatchedPress") {
            c.unmatched_press = match raw.trim().to_ascii_lowercase().as_str() {
                "ignore" => UnmatchedPressPolicy::Ignore,
                "miss" | "countasmiss" => UnmatchedPressPolicy::CountAsMiss,
                _ => return Err(invalid("Judgment", "UnmatchedPress", &raw)),
            };
        }
        read_flag(ini, "Judgment", "AutoHold", &mut c.auto_hold)?;

        read_into(ini, "Input", "LaneCount", &mut c.lane_count)?;
        read_into(ini, "Input", "InputOffsetMs", &mut c.input_offset_ms)?;

        read_into(ini, "Session", "LeadBeats", &mut c.lead_beats)?;
        read_into(ini, "Session", "CullGraceMs", &mut c.cull_grace_ms)?;
        read_into(ini, "Session", "CountdownBeats", &mut c.countdown_beats)?;
        read_into(ini, "Session", "ScheduleLeadMs", &mut c.schedule_lead_ms)?;

        Ok(c.sanitized())
    }

    /// Writes every key, so a default file documents all settings.
    pub fn write_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let mut ini = Ini::new();
        let mut put = |section: &str, key: &str, value: String| {
            ini.set(section, key, Some(value));
        };
        put("Tempo", "BaseBpm", self.base_bpm.to_string());
        put("Tempo", "BpmStep", self.bpm_step.to_string());
        put("Tempo", "SpeedUpEvery", self.speed_up_every.to_string());
        put("Tempo", "SpeedDownAfter", self.speed_down_after.to_string());
        put("Tempo", "MinBpm", self.min_bpm.to_string());
        put("Tempo", "MaxBpm", self.max_bpm.to_string());
        put("Tempo", "Adaptive", u8::from(self.adaptive_tempo).to_string());
        put("Tempo", "RampSeconds", self.tempo_ramp_seconds.to_string());
        put("Judgment", "PerfectMs", self.hit_windows.perfect_ms.to_string());
        put("Judgment", "GreatMs", self.hit_windows.great_ms.to_string());
        put("Judgment", "GoodMs", self.hit_windows.good_ms.to_string());
        put(
            "Judgment",
            "HoldReleaseForgivenessMs",
            self.hold_release_forgiveness_ms.to_string(),
        );
        put(
            "Judgment",
            "UnmatchedPress",
            match self.unmatched_press {
                UnmatchedPressPolicy::Ignore => "ignore".to_string(),
                UnmatchedPressPolicy::CountAsMiss => "miss".to_string(),
            },
        );
        put("Judgment", "AutoHold", u8::from(self.auto_hold).to_string());
        put("Input", "LaneCount", self.lane_count.to_string());
        put("Input", "InputOffsetMs", self.input_offset_ms.to_string());
        put("Session", "LeadBeats", self.lead_beats.to_string());
        put("Session", "CullGraceMs", self.cull_grace_ms.to_string());
        put("Session", "CountdownBeats", self.countdown_beats.to_string());
        put("Session", "ScheduleLeadMs", self.schedule_lead_ms.to_string());
        ini.write(path)?;
        Ok(())
    }
}

fn invalid(section: &str, key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn read_into<T: std::str::FromStr>(ini: &Ini, section: &str, key: &str, slot: &mut T) -> Result<(), ConfigError> {
    if let Some(raw) = ini.get(section, key) {
        *slot = raw.trim().parse::<T>().map_err(|_| invalid(section, key, &raw))?;
    }
    Ok(())
}

fn read_flag(ini: &Ini, section: &str, key: &str, slot: &mut bool) -> Result<(), ConfigError> {
    if let Some(raw) = ini.get(section, key) {
        *slot = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => return Err(invalid(section, key, &raw)),
        };
    }
    Ok(())
}

// Global static for the loaded configuration.
static CONFIG: Lazy<Mutex<GameConfig>> = Lazy::new(|| Mutex::new(GameConfig::default()));

/// Loads `path` into the global config. A missing file is created with the
/// defaults; an unreadable or malformed one leaves the defaults in place.
pub fn load(path: &Path) -> Result<GameConfig, ConfigError> {
    let loaded = if path.exists() {
        let config = GameConfig::load_from_path(path)?;
        info!("Loaded config from '{}'.", path.display());
        config
    } else {
        info!("Config '{}' not found, writing defaults.", path.display());
        let config = GameConfig::default();
        if let Err(e) = config.write_to_path(path) {
            warn!("Failed to write default config: {}", e);
        }
        config
    };
    set(loaded.clone());
    Ok(loaded)
}

pub fn set(config: GameConfig) {
    let mut guard = CONFIG.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = config;
}

/// Returns a copy of the currently loaded config.
pub fn get() -> GameConfig {
    CONFIG.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_keys_keep_defaults() {
        let config = GameConfig::from_ini_str("[Tempo]\nBaseBpm = 120\n\n[Judgment]\nAutoHold = yes\n").unwrap();
        assert_eq!(config.base_bpm, 120.0);
        assert!(config.auto_hold);
        assert_eq!(config.speed_up_every, 4);
        assert_eq!(config.hit_windows, HitWindows::default());
    }

    #[test]
    fn malformed_value_is_reported() {
        let err = GameConfig::from_ini_str("[Input]\nLaneCount = four\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "LaneCount"));
        let err = GameConfig::from_ini_str("[Judgment]\nUnmatchedPress = sometimes\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = GameConfig {
            base_bpm: -5.0,
            min_bpm: 300.0,
            max_bpm: 80.0,
            lane_count: 0,
            lead_beats: f64::NAN,
            hit_windows: HitWindows {
                perfect_ms: 100.0,
                great_ms: 50.0,
                good_ms: 200.0,
            },
            ..GameConfig::default()
        }
        .sanitized();
        assert_eq!((config.min_bpm, config.max_bpm), (80.0, 300.0));
        assert_eq!(config.base_bpm, 80.0);
        assert_eq!(config.lane_count, 1);
        assert_eq!(config.lead_beats, GameConfig::default().lead_beats);
        assert_eq!(config.hit_windows.great_ms, 100.0);
    }

    #[test]
    fn written_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groovesync.ini");
        let config = GameConfig {
            base_bpm: 132.0,
            unmatched_press: UnmatchedPressPolicy::CountAsMiss,
            countdown_beats: 4,
            ..GameConfig::default()
        };
        config.write_to_path(&path).unwrap();
        assert_eq!(GameConfig::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn global_load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.ini");
        let loaded = load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(loaded, GameConfig::default());
        assert!(fs::read_to_string(&path).unwrap().contains("basebpm"));
    }

    #[test]
    fn unreadable_path_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GameConfig::load_from_path(&dir.path().join("absent.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }
}
