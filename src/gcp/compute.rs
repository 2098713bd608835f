use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::auth::GcpAuth;
use crate::error::{OpsError, Result};
use crate::types::{FirewallRule, Instance, InstanceRef, InstanceSpec, InstanceStatus};

const COMPUTE_API: &str = "https://compute.googleapis.com/compute/v1";
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const LOGGING_SCOPE: &str = "https://www.googleapis.com/auth/logging.write";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn get_instance(&self, target: &InstanceRef) -> Result<Option<Instance>>;
    async fn create_instance(&self, project: &str, spec: &InstanceSpec) -> Result<()>;
    async fn delete_instance(&self, target: &InstanceRef) -> Result<()>;
    async fn start_instance(&self, target: &InstanceRef) -> Result<()>;
    async fn stop_instance(&self, target: &InstanceRef) -> Result<()>;
    async fn reset_instance(&self, target: &InstanceRef) -> Result<()>;
    async fn firewall_exists(&self, project: &str, rule_name: &str) -> Result<bool>;
    async fn create_firewall(&self, project: &str, rule: &FirewallRule) -> Result<()>;
}

/// Compute Engine v1 REST client. Every mutating call waits for its
/// operation to reach `DONE`.
pub struct GcpCompute {
    client: Client,
    auth: GcpAuth,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceResource {
    name: String,
    zone: String,
    status: String,
    machine_type: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(rename = "networkIP")]
    network_ip: Option<String>,
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessConfig {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResource {
    name: String,
    status: String,
    zone: Option<String>,
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorItem {
    message: String,
}

/// Last path segment of a resource URL (`.../zones/us-central1-a` → `us-central1-a`).
fn short_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

impl From<InstanceResource> for Instance {
    fn from(resource: InstanceResource) -> Self {
        let nic = resource.network_interfaces.first();
        Instance {
            name: resource.name,
            zone: short_name(&resource.zone).to_string(),
            status: InstanceStatus::from(resource.status.as_str()),
            machine_type: short_name(&resource.machine_type).to_string(),
            internal_ip: nic.and_then(|n| n.network_ip.clone()),
            external_ip: nic
                .and_then(|n| n.access_configs.first())
                .and_then(|a| a.nat_ip.clone()),
        }
    }
}

impl GcpCompute {
    pub fn new(auth: GcpAuth) -> Self {
        Self::with_base_url(COMPUTE_API, auth)
    }

    pub fn with_base_url(base_url: impl Into<String>, auth: GcpAuth) -> Self {
        Self {
            client: Client::new(),
            auth,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn instances_url(&self, project: &str, zone: &str) -> String {
        format!("{}/projects/{}/zones/{}/instances", self.base_url, project, zone)
    }

    fn instance_url(&self, target: &InstanceRef) -> String {
        format!(
            "{}/{}",
            self.instances_url(&target.project, &target.zone),
            target.name
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.auth.access_token().await?;
        let response = request.bearer_auth(&token).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OpsError::Api { status, body });
        }
        Ok(response)
    }

    /// GET that maps 404 to `None`.
    async fn get_optional(&self, url: &str) -> Result<Option<Response>> {
        let token = self.auth.access_token().await?;
        let response = self.client.get(url).bearer_auth(&token).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(OpsError::Api {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn wait_for_operation(&self, project: &str, response: Response) -> Result<()> {
        let mut operation: OperationResource = response.json().await?;

        loop {
            if operation.status == "DONE" {
                if let Some(error) = operation.error {
                    let message = error
                        .errors
                        .into_iter()
                        .map(|e| e.message)
                        .collect::<Vec<_>>()
                        .join("; ");
                    return Err(OpsError::Operation {
                        name: operation.name,
                        message,
                    });
                }
                return Ok(());
            }

            debug!("Operation {} is {}", operation.name, operation.status);
            tokio::time::sleep(self.poll_interval).await;

            let url = match &operation.zone {
                Some(zone) => format!(
                    "{}/projects/{}/zones/{}/operations/{}",
                    self.base_url,
                    project,
                    short_name(zone),
                    operation.name
                ),
                None => format!(
                    "{}/projects/{}/global/operations/{}",
                    self.base_url, project, operation.name
                ),
            };
            operation = self.send(self.client.get(&url)).await?.json().await?;
        }
    }

    async fn instance_action(&self, target: &InstanceRef, action: &str) -> Result<()> {
        let url = format!("{}/{}", self.instance_url(target), action);
        let response = self.send(self.client.post(&url)).await?;
        self.wait_for_operation(&target.project, response).await
    }
}

#[async_trait]
impl ComputeProvider for GcpCompute {
    async fn get_instance(&self, target: &InstanceRef) -> Result<Option<Instance>> {
        match self.get_optional(&self.instance_url(target)).await? {
            Some(response) => {
                let resource: InstanceResource = response.json().await?;
                Ok(Some(resource.into()))
            }
            None => Ok(None),
        }
    }

    async fn create_instance(&self, project: &str, spec: &InstanceSpec) -> Result<()> {
        let body = json!({
            "name": spec.name,
            "machineType": format!("zones/{}/machineTypes/{}", spec.zone, spec.machine_type),
            "tags": { "items": [spec.network_tag] },
            "disks": [{
                "boot": true,
                "autoDelete": true,
                "initializeParams": {
                    "sourceImage": spec.source_image,
                    "diskSizeGb": spec.disk_size_gb.to_string(),
                }
            }],
            "networkInterfaces": [{
                "network": "global/networks/default",
                "accessConfigs": [{ "type": "ONE_TO_ONE_NAT", "name": "External NAT" }]
            }],
            "metadata": {
                "items": [{ "key": "startup-script", "value": spec.startup_script }]
            },
            "serviceAccounts": [{
                "email": "default",
                "scopes": [STORAGE_SCOPE, LOGGING_SCOPE]
            }]
        });

        let url = self.instances_url(project, &spec.zone);
        let response = self.send(self.client.post(&url).json(&body)).await?;
        self.wait_for_operation(project, response).await
    }

    async fn delete_instance(&self, target: &InstanceRef) -> Result<()> {
        let response = self
            .send(self.client.delete(self.instance_url(target)))
            .await?;
        self.wait_for_operation(&target.project, response).await
    }

    async fn start_instance(&self, target: &InstanceRef) -> Result<()> {
        self.instance_action(target, "start").await
    }

    async fn stop_instance(&self, target: &InstanceRef) -> Result<()> {
        self.instance_action(target, "stop").await
    }

    async fn reset_instance(&self, target: &InstanceRef) -> Result<()> {
        self.instance_action(target, "reset").await
    }

    async fn firewall_exists(&self, project: &str, rule_name: &str) -> Result<bool> {
        let url = format!(
            "{}/projects/{}/global/firewalls/{}",
            self.base_url, project, rule_name
        );
        Ok(self.get_optional(&url).await?.is_some())
    }

    async fn create_firewall(&self, project: &str, rule: &FirewallRule) -> Result<()> {
        let body = json!({
            "name": rule.name,
            "network": "global/networks/default",
            "direction": "INGRESS",
            "allowed": [{ "IPProtocol": "tcp", "ports": [rule.port.to_string()] }],
            "sourceRanges": rule.source_ranges,
            "targetTags": [rule.target_tag],
        });

        let url = format!("{}/projects/{}/global/firewalls", self.base_url, project);
        let response = self.send(self.client.post(&url).json(&body)).await?;
        self.wait_for_operation(project, response).await
    }
}
