use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use phoenix_ops::cli::{parse_or_exit, OpsCli, OpsCommand};
use phoenix_ops::gcp::{check_prerequisites, Backends, GcpAuth};
use phoenix_ops::prompt::{AssumeYes, Confirm, StdinConfirm};
use phoenix_ops::{
    logging, BackupManager, Config, DeleteOutcome, InstanceManager, RestoreOutcome,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli: OpsCli = parse_or_exit();
    logging::init(cli.target.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: OpsCli) -> Result<()> {
    // Validation happens before any call leaves the machine.
    let config = Config::load(cli.target.layer(), cli.target.config.clone())?;

    let account = check_prerequisites().await?;
    debug!("Authenticated as {}", account);

    let backends = Backends::gcp(GcpAuth::Gcloud);
    let confirm: Arc<dyn Confirm> = if cli.target.yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(StdinConfirm)
    };

    let instances = InstanceManager::new(config.clone(), backends.clone(), confirm.clone());
    let backups = BackupManager::new(config, backends, confirm);

    match cli.command {
        OpsCommand::Status => handle_status(&instances).await?,
        OpsCommand::Start => {
            instances.start().await?;
            info!("Instance started");
        }
        OpsCommand::Stop => {
            instances.stop().await?;
            info!("Instance stopped");
        }
        OpsCommand::Restart => {
            instances.restart().await?;
            info!("Instance restarted");
        }
        OpsCommand::Logs { follow, lines } => {
            if let Some(logs) = instances.logs(lines, follow).await? {
                print!("{}", logs);
            }
        }
        OpsCommand::Ssh => instances.ssh().await?,
        OpsCommand::Update => {
            backups.update().await?;
            info!("Service updated");
        }
        OpsCommand::Backup => {
            let archive = backups.backup().await.context("Backup failed")?;
            info!("Backup created: {} ({} bytes)", archive.gcs_uri(), archive.size);
        }
        OpsCommand::ListBackups => handle_list(&backups).await?,
        OpsCommand::Restore { name } => match backups.restore(&name).await? {
            RestoreOutcome::Restored {
                archive,
                previous_data,
            } => {
                info!("Restored {}", archive);
                if let Some(path) = previous_data {
                    info!("Previous data kept at {} on the instance", path);
                }
            }
            RestoreOutcome::Cancelled => {}
        },
        OpsCommand::Resources => print!("{}", instances.resources().await?),
        OpsCommand::Delete => {
            if instances.delete().await? == DeleteOutcome::Deleted {
                info!("Instance deleted");
            }
        }
    }

    Ok(())
}

async fn handle_status(instances: &InstanceManager) -> Result<()> {
    let report = instances.status().await?;
    let instance = &report.instance;

    println!("{:<14} {}", "Instance", instance.name);
    println!("{:<14} {}", "Zone", instance.zone);
    println!("{:<14} {}", "Status", instance.status);
    println!("{:<14} {}", "Machine type", instance.machine_type);
    println!(
        "{:<14} {}",
        "External IP",
        instance.external_ip.as_deref().unwrap_or("-")
    );
    println!(
        "{:<14} {}",
        "Internal IP",
        instance.internal_ip.as_deref().unwrap_or("-")
    );
    println!(
        "{:<14} {}",
        "Service",
        report.service.as_deref().unwrap_or("unknown")
    );
    if let Some(url) = report.url {
        println!("{:<14} {}", "URL", url);
    }

    Ok(())
}

async fn handle_list(backups: &BackupManager) -> Result<()> {
    let archives = backups.list().await?;
    if archives.is_empty() {
        info!("No backups found in gs://{}", backups.bucket());
        return Ok(());
    }

    println!("{:<45} {:>12}  {}", "Name", "Size", "Created (UTC)");
    println!("{}", "-".repeat(80));
    for archive in archives {
        println!(
            "{:<45} {:>12}  {}",
            archive.name.file_name(),
            archive.size,
            archive.name.timestamp().format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}
