use anyhow::{bail, Context, Result};
use clap::Parser;
use compressor::{
    collect_videos, Collaborators, Compressor, CompressorConfig, CompressorEvent, ItemStatus,
    ScanResult,
};
use log::{debug, info, warn, LevelFilter};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;

/// Used when RUST_LOG is unset
const DEFAULT_LOG_LEVEL: &str = "info";

/// Two-pass, size-targeted batch video compressor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target output size in megabytes (overrides the config file)
    #[arg(short = 't', long = "target-size-mb")]
    target_mb: Option<u32>,

    /// Encode in software even when a hardware encoder is available
    #[arg(long)]
    no_hwaccel: bool,

    /// Copy finished outputs into this directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Print the final queue snapshot as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Video files or directories to compress
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    logger_builder(env_logger::Env::default().default_filter_or(DEFAULT_LOG_LEVEL), args.verbose)
        .init();

    let mut cfg = CompressorConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(target_mb) = args.target_mb {
        if target_mb == 0 {
            bail!("Target size must be at least 1 MB");
        }
        cfg.target_size_mb = target_mb;
    }

    info!("Video compressor starting");
    info!("  Target size: {} MB", cfg.target_size_mb);
    info!("  Scratch dir: {}", cfg.scratch_dir.display());
    info!("  FFmpeg: {}", cfg.ffmpeg_bin.display());

    let handle = Compressor::launch(cfg, Collaborators::default())
        .await
        .context("Failed to start compressor")?;

    let capabilities = handle.capabilities().await?;
    if !capabilities.toolchain_available {
        handle.shutdown();
        warn!("FFmpeg and FFprobe are required; nothing was compressed");
        return Ok(ExitCode::FAILURE);
    }
    if args.no_hwaccel {
        handle.set_hardware_acceleration(false).await?;
    }

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        let mut last_status: HashMap<usize, ItemStatus> = HashMap::new();
        loop {
            match events.recv().await {
                Ok(CompressorEvent::ItemUpdated { index, item }) => {
                    if last_status.insert(index, item.status) != Some(item.status) {
                        info!(
                            "[{}] {}: {}",
                            index + 1,
                            item.display_name,
                            item.status_text
                        );
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => debug!("Skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    for result in collect_videos(&args.inputs[..]) {
        match result {
            ScanResult::Candidate(path) => {
                // Rejections are already reported through the log sink
                let _ = handle.enqueue(path).await;
            }
            ScanResult::Skipped(path, reason) => {
                warn!("Skipping {}: {}", path.display(), reason);
            }
        }
    }

    let counts = match handle.run_batch().await {
        Ok(counts) => counts,
        Err(e) => {
            handle.shutdown();
            warn!("Compression did not start: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let items = handle.snapshot().await?;
    info!("📊 Summary: {}/{} videos completed", counts.completed, counts.total);
    for item in &items {
        info!(
            "  {} [{}] {}",
            item.display_name,
            status_label(item.status),
            item.status_text
        );
    }

    if let Some(dir) = &args.output_dir {
        match handle.export_outputs(dir).await {
            Ok(copied) => info!("Copied {} files to {}", copied, dir.display()),
            Err(e) => warn!("Export failed: {}", e),
        }
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&items).context("Failed to serialize snapshot")?
        );
    }

    handle.shutdown();

    let failed = items.iter().any(|item| item.status == ItemStatus::Error);
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// RUST_LOG wins over the default level; --verbose forces debug
fn logger_builder(env: env_logger::Env<'_>, verbose: bool) -> env_logger::Builder {
    let mut logger = env_logger::Builder::from_env(env);
    logger.format_timestamp_secs();
    if verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger
}

fn status_label(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Ready => "ready",
        ItemStatus::AlreadyOptimal => "optimal",
        ItemStatus::Compressing(_) => "compressing",
        ItemStatus::Completed => "done",
        ItemStatus::Error => "error",
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    // A variable name nothing sets, so the default level applies
    fn unset_env() -> env_logger::Env<'static> {
        env_logger::Env::new()
            .filter("VCOMPRESS_TEST_LOG_NEVER_SET")
            .default_filter_or(DEFAULT_LOG_LEVEL)
    }

    #[test]
    fn test_default_log_level_is_info() {
        let logger = logger_builder(unset_env(), false).build();
        assert_eq!(logger.filter(), LevelFilter::Info);
    }

    #[test]
    fn test_verbose_raises_to_debug() {
        let logger = logger_builder(unset_env(), true).build();
        assert_eq!(logger.filter(), LevelFilter::Debug);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["vcompress", "-t", "25", "--no-hwaccel", "a.mp4", "clips"])
            .unwrap();
        assert_eq!(args.target_mb, Some(25));
        assert!(args.no_hwaccel);
        assert_eq!(args.inputs, vec![PathBuf::from("a.mp4"), PathBuf::from("clips")]);
    }
}
