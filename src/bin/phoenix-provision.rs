use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use phoenix_ops::cli::{parse_or_exit, ProvisionCli};
use phoenix_ops::gcp::{check_prerequisites, GcpAuth, GcpCompute};
use phoenix_ops::prompt::{AssumeYes, Confirm, StdinConfirm};
use phoenix_ops::{logging, Config, Provisioner};

#[tokio::main]
async fn main() -> ExitCode {
    let cli: ProvisionCli = parse_or_exit();
    logging::init(cli.target.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: ProvisionCli) -> Result<()> {
    let config = Config::load(cli.layer(), cli.target.config.clone())?;

    let account = check_prerequisites().await?;
    debug!("Authenticated as {}", account);

    let confirm: Arc<dyn Confirm> = if cli.target.yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(StdinConfirm)
    };
    let provisioner = Provisioner::new(Arc::new(GcpCompute::new(GcpAuth::Gcloud)), confirm);

    let info = provisioner
        .provision(&config)
        .await
        .context("Provisioning failed")?;
    let instance = &info.instance;

    if info.created {
        info!("Instance {} created in {}", instance.name, instance.zone);
        info!("The startup script installs the service; first boot takes a few minutes");
    }
    println!(
        "External IP: {}",
        instance.external_ip.as_deref().unwrap_or("-")
    );
    println!(
        "Internal IP: {}",
        instance.internal_ip.as_deref().unwrap_or("-")
    );
    if let Some(url) = info.url {
        println!("Application: {}", url);
    }

    Ok(())
}
