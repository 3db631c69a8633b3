mod cli;

use sonoscan::{
    config,
    report::ScanReport,
    seek::{self, SeekTarget},
};
use sonoscan_common::paths::is_audio_file;
use sonoscan_media::ScanOptions;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "sonoscan=trace,sonoscan_media=trace".to_string()
        } else {
            "sonoscan=info,sonoscan_media=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Scan {
            paths,
            json,
            recursive,
            no_artwork,
        } => {
            let mut options = config::load_config_or_default(cli.config.as_deref())?
                .scan
                .to_options();
            if no_artwork {
                options.include_artwork = false;
            }
            scan_paths(&paths, recursive, json, &options)
        }
        Commands::Seek {
            file,
            time_ms,
            sample,
            header_out,
            json,
        } => {
            let options = config::load_config_or_default(cli.config.as_deref())?
                .scan
                .to_options();
            let target = match (time_ms, sample) {
                (Some(ms), _) => SeekTarget::TimeMs(ms),
                (None, Some(sample)) => SeekTarget::Sample(sample),
                (None, None) => anyhow::bail!("Either --time-ms or --sample is required"),
            };
            seek_file(&file, target, header_out.as_deref(), json, &options)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("sonoscan {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Expand directories into the audio files they hold, sorted by path.
fn collect_files(paths: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut found: Vec<PathBuf> = WalkDir::new(path)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        found.sort();
        files.extend(found);
    }
    files
}

fn scan_paths(paths: &[PathBuf], recursive: bool, json: bool, options: &ScanOptions) -> Result<()> {
    let files = collect_files(paths, recursive);
    if files.is_empty() {
        anyhow::bail!("No audio files found");
    }

    let mut reports = Vec::with_capacity(files.len());
    let mut failed = 0;
    for file in &files {
        match scan_one(file, options) {
            Ok(report) => reports.push(report),
            Err(e) => {
                failed += 1;
                eprintln!("Error: {:#}", e);
            }
        }
    }

    if json {
        let out = if files.len() == 1 {
            match reports.first() {
                Some(report) => report.to_json()?,
                None => String::new(),
            }
        } else {
            serde_json::to_string_pretty(&reports)?
        };
        if !out.is_empty() {
            println!("{}", out);
        }
    } else {
        let texts: Vec<String> = reports.iter().map(ScanReport::to_text).collect();
        print!("{}", texts.join("\n"));
    }

    if failed > 0 {
        anyhow::bail!("{} of {} files could not be scanned", failed, files.len());
    }
    Ok(())
}

fn scan_one(file: &Path, options: &ScanOptions) -> Result<ScanReport> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    let result = sonoscan_media::scan_file(file, options)
        .with_context(|| format!("Failed to scan {:?}", file))?;
    for problem in &result.incomplete {
        tracing::warn!("{}: {}", file.display(), problem);
    }
    Ok(ScanReport::new(file, result))
}

fn seek_file(
    file: &Path,
    target: SeekTarget,
    header_out: Option<&Path>,
    json: bool,
    options: &ScanOptions,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let outcome = seek::seek_file(file, target, options)
        .with_context(|| format!("Failed to seek in {:?}", file))?;

    if let Some(out) = header_out {
        match &outcome.header {
            Some(header) => std::fs::write(out, header)
                .with_context(|| format!("Failed to write header to {:?}", out))?,
            None => tracing::warn!("No rewritten header for {} files", outcome.report.format),
        }
    }

    if json {
        println!("{}", outcome.report.to_json()?);
    } else {
        print!("{}", outcome.report.to_text());
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let (config, source) = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            (config::load_config(p)?, Some(p.to_path_buf()))
        }
        None => match config::find_default_config() {
            Some(found) => {
                println!("Validating config: {:?}", found);
                (config::load_config(&found)?, Some(found))
            }
            None => {
                println!("No config file specified, using defaults");
                (config::Config::default(), None)
            }
        },
    };

    if source.is_some() {
        println!("✓ Configuration is valid");
    }
    let scan = &config.scan;
    println!(
        "  Block sizes: mp4 {}, flac {}, ogg {}, aac {}",
        scan.mp4_block_size, scan.flac_block_size, scan.ogg_block_size, scan.aac_block_size
    );
    println!("  Max box depth: {}", scan.max_box_depth);
    println!("  Max seek probes: {}", scan.max_seek_probes);
    println!("  Include artwork: {}", scan.include_artwork);

    Ok(())
}
