pub mod audio;
pub mod config;
pub mod encode;
pub mod engine;
pub mod error;
pub mod mix;
pub mod project;
pub mod vocoder;

#[cfg(test)]
mod test_support;

pub use error::{EngineError, Result};

/// Application name for config paths
pub const APP_NAME: &str = "hifipitch";
