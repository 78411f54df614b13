//! TrafficScope core engine.
//!
//! Event persistence, traffic aggregation, media correlation, and the
//! derived-artifact cache. Components are explicit long-lived service
//! objects constructed once at process start; there is no global state.

pub mod cache;
pub mod config;
pub mod ffmpeg;
pub mod media;
pub mod stats;
pub mod store;
pub mod sun;

mod types;
pub use types::*;

mod error;
pub use error::*;

pub use config::CoreConfig;
