//! Subcommand implementations.

pub mod completion;
pub mod config;
pub mod follow;
pub mod send;
