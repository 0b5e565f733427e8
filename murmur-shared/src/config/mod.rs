//! Client configuration: defaults, file loading, environment overrides.

pub mod client;

pub use client::{ClientConfig, ConfigError, ConfigOverrides, RealtimeSettings, StreamingSettings};
