#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Wire models, event-stream parsing, reconnection backoff and configuration
//! shared by the Murmur client crates.

pub mod backoff;
pub mod config;
pub mod models;
pub mod sse;
