//! Boot-time startup script and the systemd unit it installs.
//!
//! Nothing here runs locally. The unit is the contract the backup manager
//! relies on: the container mounts [`DATA_DIR`] and is controlled through
//! the [`SERVICE_NAME`] unit.

use crate::config::Config;
use crate::types::{
    CONTAINER_DATA_DIR, CONTAINER_NAME, CONTAINER_PORT, DATABASE_FILE, DATA_DIR,
    DEPLOY_LOG, SERVICE_NAME,
};

const RESTART_DELAY_SECS: u32 = 10;

pub fn unit_path() -> String {
    format!("/etc/systemd/system/{}.service", SERVICE_NAME)
}

pub fn render_unit(config: &Config) -> String {
    let image = config.image_ref();
    format!(
        "[Unit]
Description=Phoenix application container
After=docker.service network-online.target
Requires=docker.service
Wants=network-online.target

[Service]
Restart=always
RestartSec={restart}
ExecStartPre=-/usr/bin/docker rm -f {container}
ExecStartPre=/usr/bin/docker pull {image}
ExecStart=/usr/bin/docker run --rm --name {container} \\
  -p {host_port}:{container_port} \\
  -v {data_dir}:{mount} \\
  -e DATABASE_URL=sqlite://{mount}/{db} \\
  -e PORT={container_port} \\
  {image}
ExecStop=/usr/bin/docker stop {container}

[Install]
WantedBy=multi-user.target
",
        restart = RESTART_DELAY_SECS,
        container = CONTAINER_NAME,
        image = image,
        host_port = config.port,
        container_port = CONTAINER_PORT,
        data_dir = DATA_DIR,
        mount = CONTAINER_DATA_DIR,
        db = DATABASE_FILE,
    )
}

/// The `startup-script` metadata attached at instance creation.
pub fn render_startup_script(config: &Config) -> String {
    format!(
        "#!/bin/bash
set -euo pipefail

if ! command -v docker >/dev/null 2>&1; then
  apt-get update
  apt-get install -y docker.io
fi
systemctl enable --now docker

mkdir -p {data_dir}

cat > {unit_path} <<'UNIT'
{unit}UNIT

systemctl daemon-reload
systemctl enable --now {service}

echo \"$(date -u +%Y-%m-%dT%H:%M:%SZ) deployed {image} on port {port}\" >> {deploy_log}
",
        data_dir = DATA_DIR,
        unit_path = unit_path(),
        unit = render_unit(config),
        service = SERVICE_NAME,
        image = config.image_ref(),
        port = config.port,
        deploy_log = DEPLOY_LOG,
    )
}
