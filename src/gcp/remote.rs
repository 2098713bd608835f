use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::error::{OpsError, Result};
use crate::types::InstanceRef;

/// Exit status the lock command uses when the lock is already held.
pub const LOCK_HELD_STATUS: i32 = 75;
/// Exit status when the directory that should contain the lock is missing.
pub const LOCK_PARENT_MISSING_STATUS: i32 = 76;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    IsActive,
}

impl ServiceAction {
    fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::IsActive => "is-active",
        }
    }
}

/// A single action on the managed instance. Rendering to a shell line
/// happens in one place, with every argument quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    AcquireLock { lock_dir: String, owner: String },
    ReleaseLock { lock_dir: String },
    Archive {
        base_dir: String,
        dir_name: String,
        archive: String,
    },
    Upload { local: String, uri: String },
    Download { uri: String, local: String },
    /// Renames `path` to `<path>.bak-<suffix>` if it exists and prints the
    /// new path. Absence of `path` is not an error.
    MoveAside { path: String, suffix: String },
    Extract { archive: String, dest_dir: String },
    Chown { path: String, owner: String },
    RemoveFile { path: String },
    Service { action: ServiceAction, unit: String },
    PullImage { image: String },
    Journal {
        unit: String,
        lines: u32,
        follow: bool,
    },
    Resources,
}

/// Directory containing `lock_dir`; `/` for a top-level path.
pub fn lock_parent(lock_dir: &str) -> &str {
    match lock_dir.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

/// POSIX single-quote escaping. Plain words pass through unchanged.
pub fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

impl RemoteCommand {
    pub fn render(&self) -> String {
        match self {
            RemoteCommand::AcquireLock { lock_dir, owner } => {
                let lock = quote(lock_dir);
                let parent = quote(lock_parent(lock_dir));
                let owner_file = quote(&format!("{}/owner", lock_dir));
                format!(
                    "if [ ! -d {parent} ]; then exit {missing}; fi; if sudo mkdir {lock} 2>/dev/null; then printf '%s\\n' {owner} | sudo tee {owner_file} >/dev/null; else sudo cat {owner_file} 2>/dev/null; exit {held}; fi",
                    parent = parent,
                    missing = LOCK_PARENT_MISSING_STATUS,
                    lock = lock,
                    owner = quote(owner),
                    owner_file = owner_file,
                    held = LOCK_HELD_STATUS,
                )
            }
            RemoteCommand::ReleaseLock { lock_dir } => {
                format!("sudo rm -rf {}", quote(lock_dir))
            }
            RemoteCommand::Archive {
                base_dir,
                dir_name,
                archive,
            } => format!(
                "sudo tar -czf {} -C {} {}",
                quote(archive),
                quote(base_dir),
                quote(dir_name)
            ),
            RemoteCommand::Upload { local, uri } => {
                format!("sudo gcloud storage cp --quiet {} {}", quote(local), quote(uri))
            }
            RemoteCommand::Download { uri, local } => {
                format!("sudo gcloud storage cp --quiet {} {}", quote(uri), quote(local))
            }
            RemoteCommand::MoveAside { path, suffix } => {
                let from = quote(path);
                let to = quote(&format!("{}.bak-{}", path, suffix));
                format!(
                    "if [ -e {from} ]; then sudo mv -T {from} {to} && echo {to}; fi",
                    from = from,
                    to = to
                )
            }
            RemoteCommand::Extract { archive, dest_dir } => format!(
                "sudo tar -xzf {} -C {}",
                quote(archive),
                quote(dest_dir)
            ),
            RemoteCommand::Chown { path, owner } => {
                format!("sudo chown -R {} {}", quote(owner), quote(path))
            }
            RemoteCommand::RemoveFile { path } => format!("sudo rm -f {}", quote(path)),
            RemoteCommand::Service { action, unit } => {
                format!("sudo systemctl {} {}", action.as_str(), quote(unit))
            }
            RemoteCommand::PullImage { image } => format!("sudo docker pull {}", quote(image)),
            RemoteCommand::Journal {
                unit,
                lines,
                follow,
            } => {
                let mut line = format!(
                    "sudo journalctl -u {} -n {} --no-pager",
                    quote(unit),
                    lines
                );
                if *follow {
                    line.push_str(" -f");
                }
                line
            }
            RemoteCommand::Resources => concat!(
                "echo '== Disk'; df -h /; ",
                "echo '== Memory'; free -m; ",
                "echo '== Containers'; sudo docker stats --no-stream"
            )
            .to_string(),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` and captures its output. A non-zero exit is not an
    /// error at this level.
    async fn run(&self, target: &InstanceRef, command: &RemoteCommand) -> Result<CommandOutput>;

    /// Attaches the operator's terminal; `None` opens a login shell.
    async fn interactive(&self, target: &InstanceRef, command: Option<&RemoteCommand>)
        -> Result<()>;
}

/// Runs `command` and turns a non-zero exit into [`OpsError::RemoteCommand`].
pub async fn run_checked(
    remote: &dyn RemoteExecutor,
    target: &InstanceRef,
    command: &RemoteCommand,
) -> Result<CommandOutput> {
    let output = remote.run(target, command).await?;
    if !output.success() {
        return Err(OpsError::RemoteCommand {
            command: command.render(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// Runs remote commands through `gcloud compute ssh`.
#[derive(Debug, Default)]
pub struct GcloudSsh;

impl GcloudSsh {
    pub fn new() -> Self {
        Self
    }

    fn command(target: &InstanceRef) -> AsyncCommand {
        let mut command = AsyncCommand::new("gcloud");
        command.args([
            "compute".to_string(),
            "ssh".to_string(),
            target.name.clone(),
            format!("--zone={}", target.zone),
            format!("--project={}", target.project),
        ]);
        command
    }
}

#[async_trait]
impl RemoteExecutor for GcloudSsh {
    async fn run(&self, target: &InstanceRef, command: &RemoteCommand) -> Result<CommandOutput> {
        let line = command.render();
        debug!("ssh {}: {}", target.name, line);

        let output = Self::command(target)
            .args(["--quiet", "--command", line.as_str()])
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn interactive(
        &self,
        target: &InstanceRef,
        command: Option<&RemoteCommand>,
    ) -> Result<()> {
        let mut ssh = Self::command(target);
        if let Some(command) = command {
            ssh.args(["--command", command.render().as_str()]);
        }

        let status = ssh.status().await?;
        // 130 is the usual Ctrl+C exit from a followed log
        match status.code() {
            Some(0) | Some(130) => Ok(()),
            code => Err(OpsError::RemoteCommand {
                command: command
                    .map(RemoteCommand::render)
                    .unwrap_or_else(|| "ssh".to_string()),
                status: code.unwrap_or(-1),
                stderr: String::new(),
            }),
        }
    }
}
