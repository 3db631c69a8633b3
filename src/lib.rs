//! Sonoscan - structural audio metadata scanner
//!
//! This library crate exposes the CLI's configuration, reporting and seek
//! helpers for integration testing. Parsing lives in `sonoscan-media`.

pub mod config;
pub mod report;
pub mod seek;
