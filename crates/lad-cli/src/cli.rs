use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "glad",
    about = "Global LAD: real-time latest-available-data store for spacecraft telemetry",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a LAD instance until interrupted
    Run(RunArgs),
    /// Inspect or verify backup files
    Backup(BackupArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Backup file to load before accepting data
    #[arg(long)]
    pub restore: Option<PathBuf>,
    /// Clear the container before restoring
    #[arg(long, requires = "restore")]
    pub clear: bool,
    /// Seconds between stats reports; 0 disables them
    #[arg(long, default_value = "60")]
    pub stats_interval: u64,
    /// Publish synthetic channel samples at this many records per second
    #[arg(long)]
    pub simulate: Option<u64>,
}

#[derive(Args)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub action: BackupAction,
}

#[derive(Subcommand)]
pub enum BackupAction {
    /// Show record counts per key
    Inspect { file: PathBuf },
    /// Check every frame; fails on corruption
    Verify { file: PathBuf },
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Validate and print this file instead of the defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::try_parse_from(["glad", "run"]).unwrap();
        if let Command::Run(args) = cli.command {
            assert!(args.config.is_none());
            assert!(!args.clear);
            assert_eq!(args.stats_interval, 60);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_run_with_restore() {
        let cli = Cli::try_parse_from([
            "glad", "run", "--config", "lad.toml", "--restore", "b.glad", "--clear", "--stats-interval", "5",
        ])
        .unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.config, Some(PathBuf::from("lad.toml")));
            assert_eq!(args.restore, Some(PathBuf::from("b.glad")));
            assert!(args.clear);
            assert_eq!(args.stats_interval, 5);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn clear_requires_restore() {
        assert!(Cli::try_parse_from(["glad", "run", "--clear"]).is_err());
    }

    #[test]
    fn parse_backup_inspect_json() {
        let cli = Cli::try_parse_from(["glad", "backup", "inspect", "b.glad", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        if let Command::Backup(args) = cli.command {
            assert!(matches!(args.action, BackupAction::Inspect { .. }));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_backup_verify() {
        let cli = Cli::try_parse_from(["glad", "backup", "verify", "b.glad"]).unwrap();
        if let Command::Backup(args) = cli.command {
            assert!(matches!(args.action, BackupAction::Verify { file } if file == PathBuf::from("b.glad")));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_config() {
        let cli = Cli::try_parse_from(["glad", "config"]).unwrap();
        assert!(matches!(cli.command, Command::Config(_)));
    }
}
