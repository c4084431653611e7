use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use tracing::{info, warn};

use lad_backup::{summarize, BackupSummary};
use lad_service::{GlobalLad, LadConfig, LadPublisher, LadStats};
use lad_types::{ChannelSample, ChannelValue, Origin, TelemetryRecord, TimeFields, Timestamp};

use crate::cli::{BackupAction, BackupArgs, Cli, Command, ConfigArgs, OutputFormat, RunArgs};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args, &cli.format),
        Command::Backup(args) => cmd_backup(args, &cli.format),
        Command::Config(args) => cmd_config(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LadConfig> {
    match path {
        Some(path) => LadConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(LadConfig::default()),
    }
}

fn cmd_run(args: RunArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let config = Arc::new(load_config(args.config.as_deref())?);
    let lad = GlobalLad::start(config)?;

    if let Some(path) = &args.restore {
        let summary = lad.initialize_from_backup(path, args.clear);
        match &summary.error {
            None => println!(
                "{} Restored {} records from {}",
                "✓".green().bold(),
                summary.restored.to_string().bold(),
                path.display()
            ),
            Some(e) => println!("{} Restore from {} failed: {}", "!".yellow().bold(), path.display(), e),
        }
    }

    if let Some(rate) = args.simulate.filter(|&r| r > 0) {
        let publisher = lad.publisher();
        thread::Builder::new()
            .name("lad-simulator".into())
            .spawn(move || simulate(publisher, rate))?;
    }

    println!("{} Global LAD running. Press Ctrl-C to stop.", "●".green());

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async {
        let mut ticker = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!(error = %e, "cannot listen for Ctrl-C");
                    }
                    break;
                }
                _ = ticker.tick(), if args.stats_interval > 0 => {
                    print_stats(&lad.stats(), format);
                }
            }
        }
    });

    info!("shutting down");
    let stats = lad.shutdown();
    print_stats(&stats, format);
    println!("{} Stopped.", "✓".green().bold());
    Ok(())
}

/// Synthetic channel samples across a handful of channels until the LAD
/// stops accepting data.
fn simulate(publisher: LadPublisher, rate: u64) {
    let origin = Origin::new(0, "SIMULATION", "localhost", 1);
    let pause = Duration::from_secs(1) / rate.min(1_000_000) as u32;
    let mut n: u64 = 0;
    loop {
        let record = TelemetryRecord::channel(
            &origin,
            TimeFields::at_ert(Timestamp::from_millis(lad_types::wall_clock_ms() as i64)),
            ChannelSample::new(format!("SIM-{:04}", n % 16), ChannelValue::Unsigned(n)),
        );
        if publisher.on_data(record).is_err() {
            break;
        }
        n += 1;
        thread::sleep(pause);
    }
    info!(published = n, "simulator stopped");
}

fn print_stats(stats: &LadStats, format: &OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(stats) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(error = %e, "cannot render stats"),
        },
        OutputFormat::Text => {
            println!(
                "{} up {}s  seq {}  ring {}/{} free  backlog {}",
                "stats".cyan().bold(),
                stats.uptime_millis / 1_000,
                stats.last_sequence.to_string().bold(),
                stats.remaining_capacity,
                stats.ring_buffer_size,
                stats.backlog,
            );
            println!(
                "      {} records in {} leaves, {} trimmed, {} evicted",
                stats.container.records.to_string().bold(),
                stats.container.leaves,
                stats.container.records_trimmed,
                stats.container.records_evicted,
            );
            for inserter in &stats.inserters {
                println!(
                    "      inserter {}: last {} applied {} failed {}",
                    inserter.partition,
                    inserter.last_sequence,
                    inserter.applied,
                    if inserter.failed > 0 {
                        inserter.failed.to_string().red().to_string()
                    } else {
                        inserter.failed.to_string()
                    },
                );
            }
        }
    }
}

fn cmd_backup(args: BackupArgs, format: &OutputFormat) -> anyhow::Result<()> {
    match args.action {
        BackupAction::Inspect { file } => {
            let summary = summarize(&file).with_context(|| format!("reading {}", file.display()))?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Text => print_inspect(&file, &summary),
            }
            Ok(())
        }
        BackupAction::Verify { file } => {
            let summary = summarize(&file).with_context(|| format!("reading {}", file.display()))?;
            println!("  Frames: {}", summary.frames.to_string().bold());
            println!("  Skipped: {}", summary.skipped);
            println!("  Truncated: {}", summary.truncated);
            if summary.skipped > 0 || summary.truncated {
                println!("{} {} is damaged", "✗".red().bold(), file.display());
                anyhow::bail!("backup verification failed");
            }
            println!("{} {} is intact", "✓".green().bold(), file.display());
            Ok(())
        }
    }
}

fn print_inspect(file: &Path, summary: &BackupSummary) {
    println!("Backup {}", file.display().to_string().bold());
    println!("  Frames: {}", summary.frames);
    if let (Some(first), Some(last)) = (summary.first_sequence, summary.last_sequence) {
        println!("  Sequences: {first}..={last}");
    }
    if summary.skipped > 0 {
        println!("  Skipped: {}", summary.skipped.to_string().red());
    }
    if summary.truncated {
        println!("  {}", "Truncated tail".yellow());
    }
    for (key, count) in &summary.per_key {
        println!("  {:>8}  {}", count, key.cyan());
    }
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    print!("{}", config.to_toml()?);
    Ok(())
}
