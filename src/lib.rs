pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod gcp;
pub mod instance;
pub mod logging;
pub mod prompt;
pub mod provision;
pub mod service_unit;
pub mod state;
pub mod types;

pub use backup::{BackupManager, RestoreOutcome};
pub use config::Config;
pub use error::{OpsError, Result};
pub use instance::{DeleteOutcome, InstanceManager};
pub use provision::Provisioner;
