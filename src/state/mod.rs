pub mod lock;

use chrono::{DateTime, Utc};

pub use lock::OperationLock;

/// Wall clock, injectable so archive names are reproducible in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
