//! Sonoscan-Common: shared value types for the scanner.
//!
//! - **Layout**: [`AudioLayout`], the terminal output of every container parser
//! - **Tags**: [`TagValue`] and [`TagMap`], the dictionary handed to callers
//! - **Formats**: [`AudioFormat`] and extension-based hints in [`paths`]
//!
//! # Examples
//!
//! ```
//! use sonoscan_common::{AudioFormat, TagMap, TagValue};
//! use sonoscan_common::paths::format_from_extension;
//! use std::path::Path;
//!
//! assert_eq!(format_from_extension(Path::new("song.m4a")), Some(AudioFormat::Mp4));
//!
//! let mut tags = TagMap::new();
//! tags.insert("TITLE".to_string(), TagValue::from("Intro"));
//! ```

pub mod paths;
pub mod types;

pub use types::*;
