pub mod autoplay;
pub mod chart;
pub mod engine;
pub mod events;
pub mod gameplay;
pub mod judgment;
pub mod note;
pub mod registry;
pub mod spawn;
pub mod tempo;
pub mod timing;
