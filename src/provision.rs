use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::{OpsError, Result};
use crate::gcp::ComputeProvider;
use crate::prompt::Confirm;
use crate::service_unit::render_startup_script;
use crate::types::{FirewallRule, InstanceInfo, InstanceSpec, NETWORK_TAG, SOURCE_IMAGE};

/// Creates the firewall rule and the instance. Each create is preceded by
/// an existence check, so re-running is safe.
pub struct Provisioner {
    compute: Arc<dyn ComputeProvider>,
    confirm: Arc<dyn Confirm>,
}

impl Provisioner {
    pub fn new(compute: Arc<dyn ComputeProvider>, confirm: Arc<dyn Confirm>) -> Self {
        Self { compute, confirm }
    }

    pub fn instance_spec(config: &Config) -> InstanceSpec {
        InstanceSpec {
            name: config.instance_name.clone(),
            zone: config.zone.clone(),
            machine_type: config.machine_type.clone(),
            disk_size_gb: config.disk_size_gb,
            source_image: SOURCE_IMAGE.to_string(),
            network_tag: NETWORK_TAG.to_string(),
            startup_script: render_startup_script(config),
        }
    }

    pub async fn ensure_firewall(&self, config: &Config) -> Result<()> {
        let rule = FirewallRule::for_port(config.port);
        if self
            .compute
            .firewall_exists(&config.project, &rule.name)
            .await?
        {
            info!("Firewall rule {} already exists", rule.name);
            return Ok(());
        }

        info!("Creating firewall rule {} (tcp:{})", rule.name, rule.port);
        self.compute.create_firewall(&config.project, &rule).await
    }

    pub async fn provision(&self, config: &Config) -> Result<InstanceInfo> {
        self.ensure_firewall(config).await?;

        let target = config.instance_ref();
        if let Some(existing) = self.compute.get_instance(&target).await? {
            let question = format!(
                "Instance {} already exists ({}). Delete and recreate it?",
                target.name, existing.status
            );
            if !self.confirm.confirm(&question)? {
                info!("Keeping existing instance {}", target.name);
                let url = existing.external_ip.as_deref().map(|ip| config.app_url(ip));
                return Ok(InstanceInfo {
                    instance: existing,
                    created: false,
                    url,
                });
            }

            info!("Deleting instance {}", target);
            self.compute.delete_instance(&target).await?;
        }

        info!(
            "Creating instance {} ({}, {} GB, {})",
            target,
            config.machine_type,
            config.disk_size_gb,
            config.image_ref()
        );
        let spec = Self::instance_spec(config);
        self.compute.create_instance(&config.project, &spec).await?;

        let instance = self
            .compute
            .get_instance(&target)
            .await?
            .ok_or_else(|| OpsError::InstanceNotFound {
                name: target.name.clone(),
                zone: target.zone.clone(),
            })?;
        let url = instance.external_ip.as_deref().map(|ip| config.app_url(ip));

        Ok(InstanceInfo {
            instance,
            created: true,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLayer;
    use crate::gcp::compute::MockComputeProvider;
    use crate::types::{Instance, InstanceStatus};

    struct Answer(bool);

    impl Confirm for Answer {
        fn confirm(&self, _question: &str) -> Result<bool> {
            Ok(self.0)
        }
    }

    fn config() -> Config {
        Config::from_layers([ConfigLayer {
            project: Some("acme".to_string()),
            ..Default::default()
        }])
        .unwrap()
    }

    fn running() -> Instance {
        Instance {
            name: "phoenix-server".to_string(),
            zone: "us-central1-a".to_string(),
            status: InstanceStatus::Running,
            machine_type: "e2-small".to_string(),
            external_ip: Some("34.1.2.3".to_string()),
            internal_ip: Some("10.128.0.2".to_string()),
        }
    }

    #[tokio::test]
    async fn test_existing_firewall_rule_is_not_recreated() {
        let mut compute = MockComputeProvider::new();
        compute
            .expect_firewall_exists()
            .withf(|project, name| project == "acme" && name == "phoenix-allow-4000")
            .times(1)
            .returning(|_, _| Ok(true));
        compute.expect_create_firewall().never();

        let provisioner = Provisioner::new(Arc::new(compute), Arc::new(Answer(false)));
        provisioner.ensure_firewall(&config()).await.unwrap();
    }

    #[tokio::test]
    async fn test_declining_recreate_keeps_instance() {
        let mut compute = MockComputeProvider::new();
        compute.expect_firewall_exists().returning(|_, _| Ok(true));
        compute
            .expect_get_instance()
            .times(1)
            .returning(|_| Ok(Some(running())));
        compute.expect_delete_instance().never();
        compute.expect_create_instance().never();

        let provisioner = Provisioner::new(Arc::new(compute), Arc::new(Answer(false)));
        let info = provisioner.provision(&config()).await.unwrap();
        assert!(!info.created);
        assert_eq!(info.url.as_deref(), Some("http://34.1.2.3:4000"));
    }

    #[tokio::test]
    async fn test_fresh_provision_creates_rule_and_instance() {
        let mut compute = MockComputeProvider::new();
        compute.expect_firewall_exists().returning(|_, _| Ok(false));
        compute
            .expect_create_firewall()
            .withf(|_, rule| rule.port == 4000)
            .times(1)
            .returning(|_, _| Ok(()));
        let mut lookups = 0;
        compute.expect_get_instance().times(2).returning(move |_| {
            lookups += 1;
            if lookups == 1 {
                Ok(None)
            } else {
                Ok(Some(running()))
            }
        });
        compute
            .expect_create_instance()
            .withf(|project, spec| {
                project == "acme"
                    && spec.machine_type == "e2-small"
                    && spec.startup_script.contains("-p 4000:4000")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let provisioner = Provisioner::new(Arc::new(compute), Arc::new(Answer(false)));
        let info = provisioner.provision(&config()).await.unwrap();
        assert!(info.created);
        assert_eq!(info.instance.internal_ip.as_deref(), Some("10.128.0.2"));
    }
}
