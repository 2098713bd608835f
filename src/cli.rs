//! CLI argument parsing for `phoenix-ops` and `phoenix-provision`
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ConfigLayer;

/// Flags shared by both commands: which project/instance to act on.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// GCP project ID
    #[arg(short, long, global = true)]
    pub project: Option<String>,

    /// Instance name
    #[arg(short, long, global = true)]
    pub name: Option<String>,

    /// Compute zone
    #[arg(short, long, global = true)]
    pub zone: Option<String>,

    /// Backup bucket (default: <project>-phoenix-backups)
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Configuration file (default: ~/.config/phoenix-ops/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl TargetArgs {
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            project: self.project.clone(),
            instance_name: self.name.clone(),
            zone: self.zone.clone(),
            backup_bucket: self.bucket.clone(),
            ..Default::default()
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "phoenix-ops")]
#[command(version, about = "Operate and back up a Phoenix instance on Compute Engine")]
pub struct OpsCli {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(subcommand)]
    pub command: OpsCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum OpsCommand {
    /// Show instance and service status
    Status,

    /// Start the instance
    Start,

    /// Stop the instance
    Stop,

    /// Reset the instance
    Restart,

    /// Show service logs
    Logs {
        /// Follow log output
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'l', long, default_value = "100")]
        lines: u32,
    },

    /// Open a shell on the instance
    Ssh,

    /// Pull the configured image and restart the service
    Update,

    /// Archive the data directory to the backup bucket
    Backup,

    /// List archives in the backup bucket, newest first
    ListBackups,

    /// Replace the live data with an archive
    Restore {
        /// Archive name, e.g. phoenix-backup-20260101-120000.tar.gz
        name: String,
    },

    /// Show disk, memory and container usage
    Resources,

    /// Delete the instance
    Delete,
}

#[derive(Parser, Debug)]
#[command(name = "phoenix-provision")]
#[command(version, about = "Create the firewall rule and Compute Engine instance for Phoenix")]
pub struct ProvisionCli {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Machine type
    #[arg(long)]
    pub machine_type: Option<String>,

    /// Boot disk size in GB
    #[arg(long)]
    pub disk_size: Option<u32>,

    /// Host port for the application
    #[arg(long)]
    pub port: Option<u16>,

    /// Application image tag
    #[arg(long = "app-version", alias = "version-tag")]
    pub app_version: Option<String>,

    /// Application image, without tag
    #[arg(long)]
    pub image: Option<String>,
}

impl ProvisionCli {
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            machine_type: self.machine_type.clone(),
            disk_size_gb: self.disk_size,
            port: self.port,
            version: self.app_version.clone(),
            image: self.image.clone(),
            ..self.target.layer()
        }
    }
}

/// Parses arguments, exiting 0 for help/version and 1 for usage errors.
pub fn parse_or_exit<T: Parser>() -> T {
    match T::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}
