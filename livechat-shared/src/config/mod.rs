//! # Configuration
//!
//! Client configuration: proxy and realtime endpoints, room, logging and
//! session timing.

pub mod client;

pub use client::{Config, ConfigError, LogFormat, SessionConfig};
