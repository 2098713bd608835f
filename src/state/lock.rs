use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{OpsError, Result};
use crate::gcp::remote::{
    lock_parent, RemoteCommand, RemoteExecutor, LOCK_HELD_STATUS, LOCK_PARENT_MISSING_STATUS,
};
use crate::types::{InstanceRef, LOCK_DIR};

/// Remote mutual exclusion for data operations, held as a directory on the
/// instance. `mkdir` is atomic, so two operators cannot both acquire it.
#[derive(Debug)]
pub struct OperationLock {
    target: InstanceRef,
    lock_dir: String,
}

fn operator() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    match std::env::var("HOSTNAME") {
        Ok(host) if !host.is_empty() => format!("{}@{}", user, host),
        _ => user,
    }
}

impl OperationLock {
    pub async fn acquire(
        remote: &dyn RemoteExecutor,
        target: &InstanceRef,
        operation: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let owner = format!("{} by {} at {}", operation, operator(), now.to_rfc3339());
        let command = RemoteCommand::AcquireLock {
            lock_dir: LOCK_DIR.to_string(),
            owner,
        };

        let output = remote.run(target, &command).await?;
        match output.status {
            0 => {
                debug!("Acquired {} on {}", LOCK_DIR, target.name);
                Ok(Self {
                    target: target.clone(),
                    lock_dir: LOCK_DIR.to_string(),
                })
            }
            LOCK_HELD_STATUS => {
                let owner = output.stdout.trim();
                Err(OpsError::OperationInProgress {
                    lock_path: LOCK_DIR.to_string(),
                    owner: if owner.is_empty() {
                        "owner unknown".to_string()
                    } else {
                        owner.to_string()
                    },
                })
            }
            LOCK_PARENT_MISSING_STATUS => Err(OpsError::Prerequisite(format!(
                "{} does not exist on {}; the startup script may still be running",
                lock_parent(LOCK_DIR),
                target.name
            ))),
            status => Err(OpsError::RemoteCommand {
                command: command.render(),
                status,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    /// Best-effort: a failed release is logged, never returned, so it
    /// cannot mask the operation's own result.
    pub async fn release(self, remote: &dyn RemoteExecutor) {
        let command = RemoteCommand::ReleaseLock {
            lock_dir: self.lock_dir.clone(),
        };
        match remote.run(&self.target, &command).await {
            Ok(output) if output.success() => debug!("Released {}", self.lock_dir),
            Ok(output) => warn!(
                "Could not remove lock {} (exit {}); remove it manually",
                self.lock_dir, output.status
            ),
            Err(e) => warn!(
                "Could not remove lock {}: {}; remove it manually",
                self.lock_dir, e
            ),
        }
    }
}
