//! Timing and judgment core for a lane-based rhythm game.
//!
//! The host drives a [`game::gameplay::Session`] with one `tick(now, inputs)`
//! call per frame and reacts to the returned [`game::events::GameEvent`]s.

pub mod config;
pub mod core;
pub mod game;
