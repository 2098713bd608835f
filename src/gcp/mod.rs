//! Narrow interfaces over Google Cloud: Compute Engine, Cloud Storage and
//! remote execution on the instance. Production implementations talk to
//! the REST APIs and `gcloud`; tests substitute fakes.

pub mod auth;
pub mod compute;
pub mod remote;
pub mod storage;

use std::sync::Arc;

pub use auth::{check_prerequisites, GcpAuth};
pub use compute::{ComputeProvider, GcpCompute};
pub use remote::{CommandOutput, GcloudSsh, RemoteCommand, RemoteExecutor, ServiceAction};
pub use storage::{GcsStorage, StorageProvider};

/// The three collaborators every component is built from.
#[derive(Clone)]
pub struct Backends {
    pub compute: Arc<dyn ComputeProvider>,
    pub storage: Arc<dyn StorageProvider>,
    pub remote: Arc<dyn RemoteExecutor>,
}

impl Backends {
    pub fn gcp(auth: GcpAuth) -> Self {
        Self {
            compute: Arc::new(GcpCompute::new(auth.clone())),
            storage: Arc::new(GcsStorage::new(auth)),
            remote: Arc::new(GcloudSsh::new()),
        }
    }
}
