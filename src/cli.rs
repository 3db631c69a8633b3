use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sonoscan")]
#[command(author, version, about = "Structural audio metadata scanner")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan audio files and display layout and tags
    Scan {
        /// Files or directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Leave embedded artwork out of the tags
        #[arg(long)]
        no_artwork: bool,
    },

    /// Locate the byte offset of a playback position (MP4 and FLAC)
    #[command(group(ArgGroup::new("target").required(true).args(["time_ms", "sample"])))]
    Seek {
        /// File to seek in
        #[arg(required = true)]
        file: PathBuf,

        /// Target position in milliseconds
        #[arg(long)]
        time_ms: Option<u64>,

        /// Target sample index
        #[arg(long)]
        sample: Option<u64>,

        /// Write the rewritten MP4 header to this file
        #[arg(long)]
        header_out: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
