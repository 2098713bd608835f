//! Backup, list, restore and update for one instance's data directory.
//!
//! No state is kept between invocations. Each operation re-derives what it
//! needs from the provider (does the instance exist, does the bucket exist,
//! does the archive exist) and serializes against other operators through
//! the remote [`OperationLock`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{OpsError, Result};
use crate::gcp::remote::run_checked;
use crate::gcp::{Backends, RemoteCommand, ServiceAction};
use crate::prompt::Confirm;
use crate::state::{Clock, OperationLock, SystemClock};
use crate::types::{
    gcs_uri, BackupArchive, BackupName, DataState, Instance, InstanceRef, BACKUP_PREFIX,
    BACKUP_RETENTION_DAYS, BASE_DIR, DATA_DIR, DATA_DIR_NAME, REMOTE_TMP_DIR, SERVICE_NAME,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored {
        archive: String,
        /// Where the previous live data was moved, if there was any.
        previous_data: Option<String>,
    },
    Cancelled,
}

pub struct BackupManager {
    config: Config,
    backends: Backends,
    confirm: Arc<dyn Confirm>,
    clock: Arc<dyn Clock>,
}

fn temp_path(name: &str) -> String {
    format!("{}/{}", REMOTE_TMP_DIR, name)
}

impl BackupManager {
    pub fn new(config: Config, backends: Backends, confirm: Arc<dyn Confirm>) -> Self {
        Self {
            config,
            backends,
            confirm,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.config.backup_bucket
    }

    async fn require_instance(&self, target: &InstanceRef) -> Result<Instance> {
        let instance = self
            .backends
            .compute
            .get_instance(target)
            .await?
            .ok_or_else(|| OpsError::InstanceNotFound {
                name: target.name.clone(),
                zone: target.zone.clone(),
            })?;

        if !instance.status.is_running() {
            return Err(OpsError::Prerequisite(format!(
                "instance {} is {}; start it first",
                target.name, instance.status
            )));
        }
        Ok(instance)
    }

    /// Creates the bucket with the retention rule if it is missing, and
    /// repairs the rule on a bucket that lacks it. Returns whether the
    /// bucket was created.
    pub async fn ensure_bucket(&self) -> Result<bool> {
        let storage = &self.backends.storage;
        let bucket = self.bucket();

        match storage.get_bucket(bucket).await? {
            Some(existing) => {
                if !existing.has_retention(BACKUP_RETENTION_DAYS) {
                    warn!(
                        "Bucket {} has no {}-day delete rule; adding it",
                        bucket, BACKUP_RETENTION_DAYS
                    );
                    storage.set_retention(bucket, BACKUP_RETENTION_DAYS).await?;
                }
                Ok(false)
            }
            None => {
                info!(
                    "Creating bucket gs://{} ({}, {}-day retention)",
                    bucket, self.config.bucket_location, BACKUP_RETENTION_DAYS
                );
                storage
                    .create_bucket(
                        &self.config.project,
                        bucket,
                        &self.config.bucket_location,
                        BACKUP_RETENTION_DAYS,
                    )
                    .await?;
                Ok(true)
            }
        }
    }

    /// Picks a name for the current second that is not taken in the bucket.
    async fn next_archive_name(&self) -> Result<BackupName> {
        let base = BackupName::at(self.clock.now());
        let mut name = base;
        let mut sequence = 0;

        while self
            .backends
            .storage
            .object_exists(self.bucket(), &name.file_name())
            .await?
        {
            sequence += 1;
            name = base.with_sequence(sequence);
        }
        if sequence > 0 {
            debug!("{} already taken, using {}", base, name);
        }
        Ok(name)
    }

    pub async fn backup(&self) -> Result<BackupArchive> {
        let target = self.config.instance_ref();
        self.require_instance(&target).await?;
        self.ensure_bucket().await?;

        let remote = self.backends.remote.as_ref();
        let lock = OperationLock::acquire(remote, &target, "backup", self.clock.now()).await?;
        let result = self.backup_locked(&target).await;
        lock.release(remote).await;
        result
    }

    async fn backup_locked(&self, target: &InstanceRef) -> Result<BackupArchive> {
        let remote = self.backends.remote.as_ref();
        let name = self.next_archive_name().await?;
        let file_name = name.file_name();
        let temp = temp_path(&file_name);
        let uri = gcs_uri(self.bucket(), &file_name);

        debug!(state = %DataState::BackingUp, "Archiving {}", DATA_DIR);
        info!("Creating archive {} on {}", file_name, target.name);
        run_checked(
            remote,
            target,
            &RemoteCommand::Archive {
                base_dir: BASE_DIR.to_string(),
                dir_name: DATA_DIR_NAME.to_string(),
                archive: temp.clone(),
            },
        )
        .await?;

        info!("Uploading to {}", uri);
        let upload = remote
            .run(
                target,
                &RemoteCommand::Upload {
                    local: temp.clone(),
                    uri: uri.clone(),
                },
            )
            .await?;
        if !upload.success() {
            warn!("Upload exited with {}: {}", upload.status, upload.stderr.trim());
        }

        // The bucket is the source of truth, not the exit code.
        if !self
            .backends
            .storage
            .object_exists(self.bucket(), &file_name)
            .await?
        {
            return Err(OpsError::UploadFailed {
                name: file_name,
                temp_path: temp,
            });
        }

        run_checked(remote, target, &RemoteCommand::RemoveFile { path: temp }).await?;
        debug!(state = %DataState::Idle, "Backup complete");

        let size = self
            .backends
            .storage
            .list_objects(self.bucket(), &file_name)
            .await?
            .into_iter()
            .find(|o| o.name == file_name)
            .map(|o| o.size)
            .unwrap_or(0);

        Ok(BackupArchive {
            name,
            size,
            bucket: self.bucket().to_string(),
        })
    }

    /// Archives in the bucket, newest first. Objects whose names do not
    /// follow the archive pattern are skipped.
    pub async fn list(&self) -> Result<Vec<BackupArchive>> {
        self.ensure_bucket().await?;

        let mut archives: Vec<BackupArchive> = self
            .backends
            .storage
            .list_objects(self.bucket(), BACKUP_PREFIX)
            .await?
            .into_iter()
            .filter_map(|object| {
                BackupName::parse(&object.name).map(|name| BackupArchive {
                    name,
                    size: object.size,
                    bucket: self.bucket().to_string(),
                })
            })
            .collect();

        archives.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(archives)
    }

    /// Accepts a bare archive name or a `gs://<bucket>/<name>` URI.
    fn object_name<'a>(&self, requested: &'a str) -> &'a str {
        let prefix = format!("gs://{}/", self.bucket());
        requested.strip_prefix(prefix.as_str()).unwrap_or(requested)
    }

    pub async fn restore(&self, requested: &str) -> Result<RestoreOutcome> {
        self.ensure_bucket().await?;

        let object = self.object_name(requested.trim());
        let known = BackupName::parse(object).is_some()
            && self
                .backends
                .storage
                .object_exists(self.bucket(), object)
                .await?;
        if !known {
            return Err(self.backup_not_found(object).await?);
        }

        let question = format!(
            "Restore {} onto {}? The service will be stopped and the current data moved aside.",
            object, self.config.instance_name
        );
        if !self.confirm.confirm(&question)? {
            info!("Restore cancelled");
            return Ok(RestoreOutcome::Cancelled);
        }

        let target = self.config.instance_ref();
        self.require_instance(&target).await?;

        let remote = self.backends.remote.as_ref();
        let lock = OperationLock::acquire(remote, &target, "restore", self.clock.now()).await?;
        let result = self.restore_locked(&target, object).await;
        lock.release(remote).await;
        result
    }

    async fn backup_not_found(&self, object: &str) -> Result<OpsError> {
        let available: Vec<String> = self
            .list()
            .await?
            .into_iter()
            .map(|a| a.name.file_name())
            .collect();

        if available.is_empty() {
            warn!("No backups found in gs://{}", self.bucket());
        } else {
            info!("Available backups:");
            for name in &available {
                info!("  {}", name);
            }
        }

        Ok(OpsError::BackupNotFound {
            name: object.to_string(),
            available,
        })
    }

    async fn restore_locked(&self, target: &InstanceRef, object: &str) -> Result<RestoreOutcome> {
        let remote = self.backends.remote.as_ref();
        let temp = temp_path(object);
        let suffix = BackupName::at(self.clock.now())
            .timestamp()
            .format("%Y%m%d-%H%M%S")
            .to_string();

        info!("Stopping {}", SERVICE_NAME);
        run_checked(remote, target, &service(ServiceAction::Stop)).await?;
        debug!(state = %DataState::RestoringStopped, "Service stopped");

        let failed = |step: &str, preserved: &str, source: OpsError| OpsError::RestoreFailed {
            step: step.to_string(),
            preserved: preserved.to_string(),
            source: Box::new(source),
        };

        info!("Downloading {}", object);
        run_checked(
            remote,
            target,
            &RemoteCommand::Download {
                uri: gcs_uri(self.bucket(), object),
                local: temp.clone(),
            },
        )
        .await
        .map_err(|e| failed("downloading the archive", DATA_DIR, e))?;

        let moved = run_checked(
            remote,
            target,
            &RemoteCommand::MoveAside {
                path: DATA_DIR.to_string(),
                suffix,
            },
        )
        .await
        .map_err(|e| failed("moving the current data aside", DATA_DIR, e))?;
        let previous_data = Some(moved.stdout.trim().to_string()).filter(|p| !p.is_empty());
        match &previous_data {
            Some(path) => info!("Previous data moved to {}", path),
            None => info!("No existing data directory to move aside"),
        }
        let preserved = previous_data
            .clone()
            .unwrap_or_else(|| "(no previous data)".to_string());

        debug!(state = %DataState::RestoringExtracting, "Extracting {}", object);
        info!("Extracting into {}", DATA_DIR);
        run_checked(
            remote,
            target,
            &RemoteCommand::Extract {
                archive: temp.clone(),
                dest_dir: BASE_DIR.to_string(),
            },
        )
        .await
        .map_err(|e| failed("extracting the archive", &preserved, e))?;

        run_checked(
            remote,
            target,
            &RemoteCommand::Chown {
                path: DATA_DIR.to_string(),
                owner: self.config.data_owner.clone(),
            },
        )
        .await
        .map_err(|e| failed("restoring ownership", &preserved, e))?;

        run_checked(remote, target, &RemoteCommand::RemoveFile { path: temp })
            .await
            .map_err(|e| failed("removing the downloaded archive", &preserved, e))?;

        info!("Starting {}", SERVICE_NAME);
        run_checked(remote, target, &service(ServiceAction::Start))
            .await
            .map_err(|e| failed("starting the service", &preserved, e))?;
        debug!(state = %DataState::Idle, "Restore complete");

        Ok(RestoreOutcome::Restored {
            archive: object.to_string(),
            previous_data,
        })
    }

    /// Stop, pull the configured image, start.
    pub async fn update(&self) -> Result<()> {
        let target = self.config.instance_ref();
        self.require_instance(&target).await?;

        let remote = self.backends.remote.as_ref();
        let lock = OperationLock::acquire(remote, &target, "update", self.clock.now()).await?;
        let result = self.update_locked(&target).await;
        lock.release(remote).await;
        result
    }

    async fn update_locked(&self, target: &InstanceRef) -> Result<()> {
        let remote = self.backends.remote.as_ref();
        let image = self.config.image_ref();

        info!("Stopping {}", SERVICE_NAME);
        run_checked(remote, target, &service(ServiceAction::Stop)).await?;
        info!("Pulling {}", image);
        run_checked(remote, target, &RemoteCommand::PullImage { image }).await?;
        info!("Starting {}", SERVICE_NAME);
        run_checked(remote, target, &service(ServiceAction::Start)).await?;
        Ok(())
    }
}

fn service(action: ServiceAction) -> RemoteCommand {
    RemoteCommand::Service {
        action,
        unit: SERVICE_NAME.to_string(),
    }
}
