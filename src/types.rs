use std::fmt;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const SERVICE_NAME: &str = "phoenix";
pub const CONTAINER_NAME: &str = "phoenix";
pub const CONTAINER_PORT: u16 = 4000;
pub const CONTAINER_DATA_DIR: &str = "/app/data";
pub const DATABASE_FILE: &str = "phoenix.db";
pub const NETWORK_TAG: &str = "phoenix-server";
pub const SOURCE_IMAGE: &str = "projects/debian-cloud/global/images/family/debian-12";

// Layout on the managed instance.
pub const BASE_DIR: &str = "/opt/phoenix";
pub const DATA_DIR_NAME: &str = "data";
pub const DATA_DIR: &str = "/opt/phoenix/data";
pub const DEPLOY_LOG: &str = "/opt/phoenix/deploy.log";
pub const LOCK_DIR: &str = "/opt/phoenix/.ops.lock";
pub const REMOTE_TMP_DIR: &str = "/tmp";

pub const BACKUP_PREFIX: &str = "phoenix-backup-";
pub const BACKUP_SUFFIX: &str = ".tar.gz";
pub const BACKUP_RETENTION_DAYS: u32 = 30;

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const STAMP_LEN: usize = 15;

/// Identifies one compute instance. Every read goes back to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.name, self.project, self.zone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
    Other(String),
}

impl InstanceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }
}

impl From<&str> for InstanceStatus {
    fn from(value: &str) -> Self {
        match value {
            "PROVISIONING" => InstanceStatus::Provisioning,
            "STAGING" => InstanceStatus::Staging,
            "RUNNING" => InstanceStatus::Running,
            "STOPPING" => InstanceStatus::Stopping,
            "STOPPED" => InstanceStatus::Stopped,
            "SUSPENDING" => InstanceStatus::Suspending,
            "SUSPENDED" => InstanceStatus::Suspended,
            "REPAIRING" => InstanceStatus::Repairing,
            "TERMINATED" => InstanceStatus::Terminated,
            other => InstanceStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Provisioning => "PROVISIONING",
            InstanceStatus::Staging => "STAGING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Stopping => "STOPPING",
            InstanceStatus::Stopped => "STOPPED",
            InstanceStatus::Suspending => "SUSPENDING",
            InstanceStatus::Suspended => "SUSPENDED",
            InstanceStatus::Repairing => "REPAIRING",
            InstanceStatus::Terminated => "TERMINATED",
            InstanceStatus::Other(s) => s,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub zone: String,
    pub status: InstanceStatus,
    pub machine_type: String,
    pub external_ip: Option<String>,
    pub internal_ip: Option<String>,
}

/// What `provision` hands back to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub instance: Instance,
    pub created: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub disk_size_gb: u32,
    pub source_image: String,
    pub network_tag: String,
    pub startup_script: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub name: String,
    pub port: u16,
    pub source_ranges: Vec<String>,
    pub target_tag: String,
}

impl FirewallRule {
    pub fn for_port(port: u16) -> Self {
        Self {
            name: format!("{}-allow-{}", SERVICE_NAME, port),
            port,
            source_ranges: vec!["0.0.0.0/0".to_string()],
            target_tag: NETWORK_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    /// Ages (days) of every `Delete` lifecycle rule on the bucket.
    pub delete_after_days: Vec<u32>,
}

impl BucketInfo {
    pub fn has_retention(&self, days: u32) -> bool {
        self.delete_after_days.contains(&days)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub name: String,
    pub size: u64,
    pub updated: Option<DateTime<Utc>>,
}

/// `phoenix-backup-<YYYYMMDD>-<HHMMSS>[-<N>].tar.gz`
///
/// The optional counter only appears when an archive for the same second
/// already exists in the bucket. Ordering follows (timestamp, counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupName {
    timestamp: NaiveDateTime,
    sequence: u32,
}

impl BackupName {
    pub fn at(now: DateTime<Utc>) -> Self {
        // Second resolution, like `date +%Y%m%d-%H%M%S`.
        let naive = now.naive_utc();
        let timestamp = naive.with_nanosecond(0).unwrap_or(naive);
        Self {
            timestamp,
            sequence: 0,
        }
    }

    pub fn with_sequence(self, sequence: u32) -> Self {
        Self { sequence, ..self }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(BACKUP_SUFFIX)?;
        let stamp = stem.get(..STAMP_LEN)?;
        let well_formed = stamp.bytes().enumerate().all(|(i, b)| {
            if i == 8 {
                b == b'-'
            } else {
                b.is_ascii_digit()
            }
        });
        if !well_formed {
            return None;
        }

        let rest = &stem[STAMP_LEN..];
        let sequence = if rest.is_empty() {
            0
        } else {
            let digits = rest.strip_prefix('-')?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            match digits.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return None,
            }
        };

        let timestamp = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
        Some(Self {
            timestamp,
            sequence,
        })
    }

    pub fn file_name(&self) -> String {
        let stamp = self.timestamp.format(STAMP_FORMAT);
        if self.sequence == 0 {
            format!("{}{}{}", BACKUP_PREFIX, stamp, BACKUP_SUFFIX)
        } else {
            format!("{}{}-{}{}", BACKUP_PREFIX, stamp, self.sequence, BACKUP_SUFFIX)
        }
    }
}

impl fmt::Display for BackupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArchive {
    pub name: BackupName,
    pub size: u64,
    pub bucket: String,
}

impl BackupArchive {
    pub fn gcs_uri(&self) -> String {
        gcs_uri(&self.bucket, &self.name.file_name())
    }
}

pub fn gcs_uri(bucket: &str, object: &str) -> String {
    format!("gs://{}/{}", bucket, object)
}

/// Coarse lifecycle of one instance's data directory, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataState {
    Idle,
    BackingUp,
    RestoringStopped,
    RestoringExtracting,
}

impl fmt::Display for DataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataState::Idle => "IDLE",
            DataState::BackingUp => "BACKING_UP",
            DataState::RestoringStopped => "RESTORING(stopped)",
            DataState::RestoringExtracting => "RESTORING(extracting)",
        };
        f.write_str(s)
    }
}
