use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::{OpsError, Result};
use crate::gcp::remote::run_checked;
use crate::gcp::{Backends, RemoteCommand, ServiceAction};
use crate::prompt::Confirm;
use crate::types::{Instance, InstanceRef, SERVICE_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub instance: Instance,
    /// `systemctl is-active` output; `None` when the instance is not running.
    pub service: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Cancelled,
}

/// Lifecycle and inspection commands. Each is a direct pass-through to the
/// compute API or a single remote command.
pub struct InstanceManager {
    config: Config,
    backends: Backends,
    confirm: Arc<dyn Confirm>,
}

impl InstanceManager {
    pub fn new(config: Config, backends: Backends, confirm: Arc<dyn Confirm>) -> Self {
        Self {
            config,
            backends,
            confirm,
        }
    }

    fn target(&self) -> InstanceRef {
        self.config.instance_ref()
    }

    async fn require_instance(&self, target: &InstanceRef) -> Result<Instance> {
        self.backends
            .compute
            .get_instance(target)
            .await?
            .ok_or_else(|| OpsError::InstanceNotFound {
                name: target.name.clone(),
                zone: target.zone.clone(),
            })
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let target = self.target();
        let instance = self.require_instance(&target).await?;

        let service = if instance.status.is_running() {
            let output = self
                .backends
                .remote
                .run(
                    &target,
                    &RemoteCommand::Service {
                        action: ServiceAction::IsActive,
                        unit: SERVICE_NAME.to_string(),
                    },
                )
                .await?;
            // is-active prints the state and exits non-zero unless active
            Some(output.stdout.trim().to_string()).filter(|s| !s.is_empty())
        } else {
            None
        };
        let url = instance
            .external_ip
            .as_deref()
            .map(|ip| self.config.app_url(ip));

        Ok(StatusReport {
            instance,
            service,
            url,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let target = self.target();
        self.require_instance(&target).await?;
        info!("Starting instance {}", target);
        self.backends.compute.start_instance(&target).await
    }

    pub async fn stop(&self) -> Result<()> {
        let target = self.target();
        self.require_instance(&target).await?;
        info!("Stopping instance {}", target);
        self.backends.compute.stop_instance(&target).await
    }

    pub async fn restart(&self) -> Result<()> {
        let target = self.target();
        self.require_instance(&target).await?;
        info!("Resetting instance {}", target);
        self.backends.compute.reset_instance(&target).await
    }

    /// Recent journal lines for the service. With `follow` the operator's
    /// terminal is attached and `None` is returned once they detach.
    pub async fn logs(&self, lines: u32, follow: bool) -> Result<Option<String>> {
        let target = self.target();
        self.require_instance(&target).await?;

        let command = RemoteCommand::Journal {
            unit: SERVICE_NAME.to_string(),
            lines,
            follow,
        };
        if follow {
            self.backends
                .remote
                .interactive(&target, Some(&command))
                .await?;
            return Ok(None);
        }

        let output = run_checked(self.backends.remote.as_ref(), &target, &command).await?;
        Ok(Some(output.stdout))
    }

    pub async fn ssh(&self) -> Result<()> {
        let target = self.target();
        self.require_instance(&target).await?;
        self.backends.remote.interactive(&target, None).await
    }

    pub async fn resources(&self) -> Result<String> {
        let target = self.target();
        self.require_instance(&target).await?;
        let output = run_checked(
            self.backends.remote.as_ref(),
            &target,
            &RemoteCommand::Resources,
        )
        .await?;
        Ok(output.stdout)
    }

    pub async fn delete(&self) -> Result<DeleteOutcome> {
        let target = self.target();
        self.require_instance(&target).await?;

        let question = format!(
            "Delete instance {}? Its disk and live data will be destroyed.",
            target
        );
        if !self.confirm.confirm(&question)? {
            info!("Delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }

        info!("Deleting instance {}", target);
        self.backends.compute.delete_instance(&target).await?;
        Ok(DeleteOutcome::Deleted)
    }
}
