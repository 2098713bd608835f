use tokio::process::Command as AsyncCommand;

use crate::error::{OpsError, Result};

/// Source of bearer tokens for the REST clients.
#[derive(Debug, Clone)]
pub enum GcpAuth {
    /// Ask `gcloud auth print-access-token` on every call.
    Gcloud,
    /// Fixed token, for tests and CI.
    Static(String),
}

impl GcpAuth {
    pub async fn access_token(&self) -> Result<String> {
        match self {
            GcpAuth::Static(token) => Ok(token.clone()),
            GcpAuth::Gcloud => {
                let output = AsyncCommand::new("gcloud")
                    .args(["auth", "print-access-token"])
                    .output()
                    .await?;

                if !output.status.success() {
                    return Err(OpsError::Prerequisite(
                        "failed to get an access token; run `gcloud auth login`".to_string(),
                    ));
                }

                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
        }
    }
}

/// Verifies gcloud is installed and an account is active. Returns the account.
pub async fn check_prerequisites() -> Result<String> {
    let output = AsyncCommand::new("which").arg("gcloud").output().await?;

    if !output.status.success() {
        return Err(OpsError::Prerequisite(
            "gcloud CLI is not installed".to_string(),
        ));
    }

    let output = AsyncCommand::new("gcloud")
        .args([
            "auth",
            "list",
            "--filter=status:ACTIVE",
            "--format=value(account)",
        ])
        .output()
        .await?;

    if !output.status.success() || output.stdout.is_empty() {
        return Err(OpsError::Prerequisite(
            "not authenticated with gcloud; run `gcloud auth login`".to_string(),
        ));
    }

    let account = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(account)
}
