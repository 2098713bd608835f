#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use phoenix_ops::config::{Config, ConfigLayer};
use phoenix_ops::gcp::remote::{LOCK_HELD_STATUS, LOCK_PARENT_MISSING_STATUS};
use phoenix_ops::gcp::{
    Backends, CommandOutput, ComputeProvider, RemoteCommand, RemoteExecutor, ServiceAction,
    StorageProvider,
};
use phoenix_ops::prompt::Confirm;
use phoenix_ops::state::Clock;
use phoenix_ops::types::{
    BucketInfo, FirewallRule, Instance, InstanceRef, InstanceSpec, InstanceStatus, StoredObject,
};
use phoenix_ops::Result;

pub const BUCKET: &str = "acme-phoenix-backups";

pub fn config() -> Config {
    Config::from_layers([ConfigLayer {
        project: Some("acme".to_string()),
        ..Default::default()
    }])
    .unwrap()
}

pub fn running_instance() -> Instance {
    Instance {
        name: "phoenix-server".to_string(),
        zone: "us-central1-a".to_string(),
        status: InstanceStatus::Running,
        machine_type: "e2-small".to_string(),
        external_ip: Some("34.1.2.3".to_string()),
        internal_ip: Some("10.128.0.2".to_string()),
    }
}

/// Everything the fake cloud knows. The instance's filesystem is reduced
/// to the few paths the tool touches; file contents are opaque strings.
#[derive(Debug, Default)]
pub struct CloudState {
    pub instance: Option<Instance>,
    pub firewalls: BTreeSet<String>,
    pub created_specs: Vec<InstanceSpec>,
    pub deleted_instances: u32,

    pub bucket: Option<BucketInfo>,
    pub bucket_creations: u32,
    pub retention_repairs: u32,
    /// object name → contents
    pub objects: BTreeMap<String, String>,

    /// Live data directory contents; `None` when absent.
    pub data: Option<String>,
    /// Paths the live directory was moved to, with their contents.
    pub moved_aside: BTreeMap<String, String>,
    /// Other remote files (temp archives) → contents.
    pub files: BTreeMap<String, String>,
    pub lock_owner: Option<String>,
    pub service_running: bool,
    pub pulled_images: Vec<String>,

    pub commands: Vec<RemoteCommand>,
    pub interactive_sessions: u32,

    pub fail_upload: bool,
    pub fail_extract: bool,
    /// The base directory has not been created yet.
    pub base_missing: bool,
}

#[derive(Clone, Default)]
pub struct FakeCloud {
    pub state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    /// A running instance with live data and the service up.
    pub fn with_running_instance(data: &str) -> Self {
        let cloud = Self::default();
        {
            let mut state = cloud.state.lock().unwrap();
            state.instance = Some(running_instance());
            state.data = Some(data.to_string());
            state.service_running = true;
        }
        cloud
    }

    pub fn backends(&self) -> Backends {
        Backends {
            compute: Arc::new(self.clone()),
            storage: Arc::new(self.clone()),
            remote: Arc::new(self.clone()),
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, CloudState> {
        self.state.lock().unwrap()
    }

    pub fn add_bucket_with_retention(&self, days: Vec<u32>) {
        self.state().bucket = Some(BucketInfo {
            name: BUCKET.to_string(),
            delete_after_days: days,
        });
    }

    pub fn add_object(&self, name: &str, contents: &str) {
        self.state()
            .objects
            .insert(name.to_string(), contents.to_string());
    }

    pub fn object_names(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    pub fn service_commands(&self) -> Vec<ServiceAction> {
        self.state()
            .commands
            .iter()
            .filter_map(|c| match c {
                RemoteCommand::Service { action, .. } => Some(*action),
                _ => None,
            })
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }
}

fn object_from_uri(uri: &str) -> String {
    let path = uri.trim_start_matches("gs://");
    let (bucket, object) = path.split_once('/').unwrap();
    assert_eq!(bucket, BUCKET, "unexpected bucket in {uri}");
    object.to_string()
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        status: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn fail(status: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl ComputeProvider for FakeCloud {
    async fn get_instance(&self, target: &InstanceRef) -> Result<Option<Instance>> {
        Ok(self
            .state()
            .instance
            .clone()
            .filter(|i| i.name == target.name && i.zone == target.zone))
    }

    async fn create_instance(&self, _project: &str, spec: &InstanceSpec) -> Result<()> {
        let mut state = self.state();
        state.created_specs.push(spec.clone());
        state.instance = Some(Instance {
            name: spec.name.clone(),
            zone: spec.zone.clone(),
            machine_type: spec.machine_type.clone(),
            ..running_instance()
        });
        Ok(())
    }

    async fn delete_instance(&self, _target: &InstanceRef) -> Result<()> {
        let mut state = self.state();
        state.instance = None;
        state.deleted_instances += 1;
        Ok(())
    }

    async fn start_instance(&self, _target: &InstanceRef) -> Result<()> {
        if let Some(instance) = self.state().instance.as_mut() {
            instance.status = InstanceStatus::Running;
        }
        Ok(())
    }

    async fn stop_instance(&self, _target: &InstanceRef) -> Result<()> {
        if let Some(instance) = self.state().instance.as_mut() {
            instance.status = InstanceStatus::Terminated;
        }
        Ok(())
    }

    async fn reset_instance(&self, _target: &InstanceRef) -> Result<()> {
        Ok(())
    }

    async fn firewall_exists(&self, _project: &str, rule_name: &str) -> Result<bool> {
        Ok(self.state().firewalls.contains(rule_name))
    }

    async fn create_firewall(&self, _project: &str, rule: &FirewallRule) -> Result<()> {
        self.state().firewalls.insert(rule.name.clone());
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for FakeCloud {
    async fn get_bucket(&self, bucket: &str) -> Result<Option<BucketInfo>> {
        Ok(self.state().bucket.clone().filter(|b| b.name == bucket))
    }

    async fn create_bucket(
        &self,
        _project: &str,
        bucket: &str,
        _location: &str,
        delete_after_days: u32,
    ) -> Result<()> {
        let mut state = self.state();
        state.bucket_creations += 1;
        state.bucket = Some(BucketInfo {
            name: bucket.to_string(),
            delete_after_days: vec![delete_after_days],
        });
        Ok(())
    }

    async fn set_retention(&self, _bucket: &str, delete_after_days: u32) -> Result<()> {
        let mut state = self.state();
        state.retention_repairs += 1;
        if let Some(bucket) = state.bucket.as_mut() {
            bucket.delete_after_days.push(delete_after_days);
        }
        Ok(())
    }

    async fn list_objects(&self, _bucket: &str, prefix: &str) -> Result<Vec<StoredObject>> {
        Ok(self
            .state()
            .objects
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, contents)| StoredObject {
                name: name.clone(),
                size: contents.len() as u64,
                updated: None,
            })
            .collect())
    }

    async fn object_exists(&self, _bucket: &str, object: &str) -> Result<bool> {
        Ok(self.state().objects.contains_key(object))
    }
}

#[async_trait]
impl RemoteExecutor for FakeCloud {
    async fn run(&self, _target: &InstanceRef, command: &RemoteCommand) -> Result<CommandOutput> {
        let mut state = self.state();
        state.commands.push(command.clone());

        let output = match command {
            RemoteCommand::AcquireLock { owner, .. } => {
                if state.base_missing {
                    fail(LOCK_PARENT_MISSING_STATUS, "")
                } else if let Some(holder) = state.lock_owner.clone() {
                    CommandOutput {
                        status: LOCK_HELD_STATUS,
                        stdout: format!("{holder}\n"),
                        stderr: String::new(),
                    }
                } else {
                    state.lock_owner = Some(owner.clone());
                    ok("")
                }
            }
            RemoteCommand::ReleaseLock { .. } => {
                state.lock_owner = None;
                ok("")
            }
            RemoteCommand::Archive { archive, .. } => match state.data.clone() {
                Some(data) => {
                    state.files.insert(archive.clone(), data);
                    ok("")
                }
                None => fail(2, "tar: data: Cannot stat"),
            },
            RemoteCommand::Upload { local, uri } => {
                if state.fail_upload {
                    fail(1, "ERROR: upload interrupted")
                } else {
                    let contents = state.files.get(local).cloned().unwrap_or_default();
                    state.objects.insert(object_from_uri(uri), contents);
                    ok("")
                }
            }
            RemoteCommand::Download { uri, local } => {
                match state.objects.get(&object_from_uri(uri)).cloned() {
                    Some(contents) => {
                        state.files.insert(local.clone(), contents);
                        ok("")
                    }
                    None => fail(1, "No URLs matched"),
                }
            }
            RemoteCommand::MoveAside { path, suffix } => {
                let moved = format!("{path}.bak-{suffix}");
                if state.data.is_none() {
                    ok("")
                } else if state.moved_aside.contains_key(&moved) {
                    // mv -T refuses to replace a non-empty directory
                    fail(1, "mv: cannot move: Directory not empty")
                } else {
                    let data = state.data.take().unwrap_or_default();
                    state.moved_aside.insert(moved.clone(), data);
                    ok(format!("{moved}\n"))
                }
            }
            RemoteCommand::Extract { archive, .. } => {
                if state.fail_extract {
                    fail(2, "gzip: stdin: unexpected end of file")
                } else {
                    match state.files.get(archive).cloned() {
                        Some(contents) => {
                            state.data = Some(contents);
                            ok("")
                        }
                        None => fail(2, "tar: Cannot open"),
                    }
                }
            }
            RemoteCommand::Chown { .. } => ok(""),
            RemoteCommand::RemoveFile { path } => {
                state.files.remove(path);
                ok("")
            }
            RemoteCommand::Service { action, .. } => match action {
                ServiceAction::Start => {
                    state.service_running = true;
                    ok("")
                }
                ServiceAction::Stop => {
                    state.service_running = false;
                    ok("")
                }
                ServiceAction::IsActive => {
                    if state.service_running {
                        ok("active\n")
                    } else {
                        CommandOutput {
                            status: 3,
                            stdout: "inactive\n".to_string(),
                            stderr: String::new(),
                        }
                    }
                }
            },
            RemoteCommand::PullImage { image } => {
                state.pulled_images.push(image.clone());
                ok("")
            }
            RemoteCommand::Journal { lines, .. } => ok(format!("last {lines} lines\n")),
            RemoteCommand::Resources => ok("== Disk\n/dev/sda1 20G\n"),
        };
        Ok(output)
    }

    async fn interactive(
        &self,
        _target: &InstanceRef,
        command: Option<&RemoteCommand>,
    ) -> Result<()> {
        let mut state = self.state();
        state.interactive_sessions += 1;
        if let Some(command) = command {
            state.commands.push(command.clone());
        }
        Ok(())
    }
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()),
        })
    }

    pub fn advance(&self, seconds: i64) {
        let mut now = self.now.lock().unwrap();
        *now = *now + Duration::seconds(seconds);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Fixed answer; counts how often it was asked.
pub struct Answer {
    pub yes: bool,
    pub asked: Mutex<u32>,
}

impl Answer {
    pub fn yes() -> Arc<Self> {
        Arc::new(Self {
            yes: true,
            asked: Mutex::new(0),
        })
    }

    pub fn no() -> Arc<Self> {
        Arc::new(Self {
            yes: false,
            asked: Mutex::new(0),
        })
    }

    pub fn times_asked(&self) -> u32 {
        *self.asked.lock().unwrap()
    }
}

impl Confirm for Answer {
    fn confirm(&self, _question: &str) -> Result<bool> {
        *self.asked.lock().unwrap() += 1;
        Ok(self.yes)
    }
}
