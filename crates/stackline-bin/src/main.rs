//! CLI entry point for stackline.
//!
//! Provides:
//! - `run`: a synthetic acquisition session through the full pipeline
//! - `check-config`: load, validate and print the effective configuration
//!
//! # Usage
//!
//! ```bash
//! stackline run --config config/stackline.toml --stacks 90 --batch 9
//! stackline check-config --config config/stackline.toml
//! ```
//!
//! Every setting can be overridden from the environment, e.g.
//! `STACKLINE_POOL__BUFFER_COUNT=8`.

// Global allocator: many large, long-lived buffers shared across stage threads.
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stackline::{telemetry, Pipeline, PipelineConfig, SaveInfo};
use stackline_driver_mock::{SyntheticCamera, SyntheticConfig};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DISPLAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "stackline")]
#[command(about = "Zero-copy frame-stack acquisition pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic acquisition session
    Run {
        /// Configuration file (TOML). Missing files fall back to defaults.
        #[arg(long, default_value = "config/stackline.toml")]
        config: PathBuf,

        /// Total stacks to acquire
        #[arg(long, default_value_t = 27)]
        stacks: usize,

        /// Stacks per projection
        #[arg(long, default_value_t = 9)]
        batch: usize,

        /// Save every stack under `storage.output_dir`
        #[arg(long)]
        save: bool,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// Configuration file (TOML)
        #[arg(long, default_value = "config/stackline.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            stacks,
            batch,
            save,
        } => run_session(&config, stacks, batch, save).await,
        Commands::CheckConfig { config } => check_config(&config),
    }
}

/// Synthetic source settings from the `[source]` table, if present.
fn source_config(config_path: &Path) -> Result<SyntheticConfig> {
    let figment = PipelineConfig::figment(config_path);
    if figment.contains("source") {
        figment
            .extract_inner("source")
            .with_context(|| format!("Invalid [source] section in {}", config_path.display()))
    } else {
        Ok(SyntheticConfig::default())
    }
}

async fn run_session(config_path: &Path, stacks: usize, batch: usize, save: bool) -> Result<()> {
    let config = PipelineConfig::load_from(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    telemetry::init_from_config(&config)?;

    let source = source_config(config_path)?;
    info!(
        config = %config_path.display(),
        device = %source.name,
        pattern = ?source.pattern,
        mode = ?source.mode,
        "Starting synthetic session"
    );

    if save {
        std::fs::create_dir_all(&config.storage.output_dir).with_context(|| {
            format!("Failed to create {}", config.storage.output_dir.display())
        })?;
    }

    let pipeline = Pipeline::builder()
        .config(config.clone())
        .build(SyntheticCamera::with_config(source))?;

    let started = Instant::now();
    let batch = batch.max(1);
    let mut dispatched = 0;
    let mut sequence = pipeline.display_update().sequence;

    while dispatched < stacks {
        let count = batch.min(stacks - dispatched);
        let saves = save.then(|| {
            (dispatched..dispatched + count)
                .map(|i| {
                    let name = format!("stack_{:06}.{}", i, config.storage.format.as_str());
                    SaveInfo::new(config.storage.output_dir.join(name), config.storage.format)
                })
                .collect()
        });

        pipeline.load(count, saves, None).await?;
        dispatched += count;
        if !config.accumulation.auto_project {
            pipeline.project().await?;
        }

        let update = pipeline.wait_for_display(sequence, DISPLAY_TIMEOUT).await?;
        sequence = update.sequence;
        info!(
            dispatched,
            sequence,
            stacks = update.stacks,
            low = update.low,
            high = update.high,
            "Projection displayed"
        );
    }

    pipeline
        .wait_idle(DISPLAY_TIMEOUT)
        .await
        .context("Buffers did not return to the pool")?;

    let status = pipeline.status();
    for fault in pipeline.take_faults() {
        warn!(stage = %fault.stage, kind = ?fault.kind, message = %fault.message, "Recorded fault");
    }
    pipeline.close().await?;

    let elapsed = started.elapsed();
    println!("run:          {}", status.run_id);
    println!("shape:        {}", status.shape);
    println!("stacks:       {}", dispatched);
    println!("folded:       {}", status.accumulation.folded);
    println!("skipped:      {}", status.accumulation.skipped);
    println!("projections:  {}", status.accumulation.handoffs);
    println!("health:       {:?}", status.health);
    println!(
        "throughput:   {:.1} stacks/s",
        dispatched as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = PipelineConfig::load_from(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let source = source_config(config_path)?;

    let mut effective = toml::Value::try_from(&config)?;
    if let toml::Value::Table(table) = &mut effective {
        table.insert("source".to_string(), toml::Value::try_from(&source)?);
    }

    println!("# {} is valid", config_path.display());
    println!("{}", toml::to_string_pretty(&effective)?);
    Ok(())
}
