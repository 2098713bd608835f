use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Prerequisite missing: {0}")]
    Prerequisite(String),

    #[error("Instance '{name}' not found in zone {zone}")]
    InstanceNotFound { name: String, zone: String },

    #[error("Backup '{name}' not found")]
    BackupNotFound { name: String, available: Vec<String> },

    #[error("Upload of '{name}' could not be verified; temporary archive left at {temp_path}")]
    UploadFailed { name: String, temp_path: String },

    #[error("Restore failed while {step}; previous data preserved at {preserved}")]
    RestoreFailed {
        step: String,
        preserved: String,
        #[source]
        source: Box<OpsError>,
    },

    #[error(
        "Another operation is in progress (lock {lock_path} exists): {owner}. \
         If nothing is running on the instance, remove it with `sudo rm -rf {lock_path}`"
    )]
    OperationInProgress { lock_path: String, owner: String },

    #[error("Remote command `{command}` exited with {status}: {stderr}")]
    RemoteCommand {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Cloud API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Operation {name} failed: {message}")]
    Operation { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OpsError>;
