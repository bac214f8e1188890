#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Models and configuration shared by the `LiveChat` client library and CLI.

pub mod config;
pub mod models;
