//! Layered configuration.
//!
//! Built once at startup from, lowest to highest precedence: built-in
//! defaults, a TOML file, the environment (after `.env` is loaded) and CLI
//! flags. The resulting [`Config`] is validated on construction and never
//! mutated afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::{OpsError, Result};
use crate::types::{InstanceRef, SERVICE_NAME};

pub const PLACEHOLDER_PROJECT: &str = "your-project-id";
pub const CONFIG_PATH_ENV: &str = "PHOENIX_OPS_CONFIG";

const DEFAULT_INSTANCE_NAME: &str = "phoenix-server";
const DEFAULT_ZONE: &str = "us-central1-a";
const DEFAULT_MACHINE_TYPE: &str = "e2-small";
const DEFAULT_DISK_SIZE_GB: u32 = 20;
const DEFAULT_PORT: u16 = 4000;
const DEFAULT_VERSION: &str = "latest";
const DEFAULT_IMAGE: &str = "ghcr.io/phoenix-app/phoenix";
const DEFAULT_BUCKET_LOCATION: &str = "US";
const DEFAULT_DATA_OWNER: &str = "1000:1000";

/// One source of configuration values. Unset fields fall through to the
/// layer below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub project: Option<String>,
    pub instance_name: Option<String>,
    pub zone: Option<String>,
    pub machine_type: Option<String>,
    pub disk_size_gb: Option<u32>,
    pub port: Option<u16>,
    pub version: Option<String>,
    pub image: Option<String>,
    pub backup_bucket: Option<String>,
    pub bucket_location: Option<String>,
    pub data_owner: Option<String>,
}

impl ConfigLayer {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| OpsError::Config(format!("invalid config file: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            OpsError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reads the recognized environment variables through `lookup`.
    pub fn from_env<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            project: get("GCP_PROJECT_ID"),
            instance_name: get("INSTANCE_NAME"),
            zone: get("GCP_ZONE"),
            machine_type: get("MACHINE_TYPE"),
            disk_size_gb: parse_env(&get, "DISK_SIZE_GB")?,
            port: parse_env(&get, "PHOENIX_PORT")?,
            version: get("PHOENIX_VERSION"),
            image: get("PHOENIX_IMAGE"),
            backup_bucket: get("BACKUP_BUCKET"),
            bucket_location: get("BACKUP_BUCKET_LOCATION"),
            data_owner: get("PHOENIX_DATA_OWNER"),
        })
    }

    /// Values set in `higher` win over values set in `self`.
    pub fn merge(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            project: higher.project.or(self.project),
            instance_name: higher.instance_name.or(self.instance_name),
            zone: higher.zone.or(self.zone),
            machine_type: higher.machine_type.or(self.machine_type),
            disk_size_gb: higher.disk_size_gb.or(self.disk_size_gb),
            port: higher.port.or(self.port),
            version: higher.version.or(self.version),
            image: higher.image.or(self.image),
            backup_bucket: higher.backup_bucket.or(self.backup_bucket),
            bucket_location: higher.bucket_location.or(self.bucket_location),
            data_owner: higher.data_owner.or(self.data_owner),
        }
    }
}

fn parse_env<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| OpsError::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub project: String,
    pub instance_name: String,
    pub zone: String,
    pub machine_type: String,
    pub disk_size_gb: u32,
    pub port: u16,
    pub version: String,
    pub image: String,
    pub backup_bucket: String,
    pub bucket_location: String,
    pub data_owner: String,
}

impl Config {
    /// Applies `layers` in order (later wins) on top of the defaults and
    /// validates the result.
    pub fn from_layers<I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = ConfigLayer>,
    {
        let merged = layers
            .into_iter()
            .fold(ConfigLayer::default(), ConfigLayer::merge);

        let project = merged
            .project
            .unwrap_or_else(|| PLACEHOLDER_PROJECT.to_string());
        let backup_bucket = merged
            .backup_bucket
            .unwrap_or_else(|| format!("{}-{}-backups", project, SERVICE_NAME));

        let config = Self {
            project,
            instance_name: merged
                .instance_name
                .unwrap_or_else(|| DEFAULT_INSTANCE_NAME.to_string()),
            zone: merged.zone.unwrap_or_else(|| DEFAULT_ZONE.to_string()),
            machine_type: merged
                .machine_type
                .unwrap_or_else(|| DEFAULT_MACHINE_TYPE.to_string()),
            disk_size_gb: merged.disk_size_gb.unwrap_or(DEFAULT_DISK_SIZE_GB),
            port: merged.port.unwrap_or(DEFAULT_PORT),
            version: merged.version.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            image: merged.image.unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            backup_bucket,
            bucket_location: merged
                .bucket_location
                .unwrap_or_else(|| DEFAULT_BUCKET_LOCATION.to_string()),
            data_owner: merged
                .data_owner
                .unwrap_or_else(|| DEFAULT_DATA_OWNER.to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env`, then resolves file, environment and `cli` layers.
    pub fn load(cli: ConfigLayer, config_path: Option<PathBuf>) -> Result<Self> {
        dotenv::dotenv().ok();

        let file_layer = match resolve_config_path(config_path)? {
            Some(path) => {
                debug!("Reading configuration from {}", path.display());
                ConfigLayer::from_file(&path)?
            }
            None => ConfigLayer::default(),
        };
        let env_layer = ConfigLayer::from_env(|key| std::env::var(key).ok())?;

        Self::from_layers([file_layer, env_layer, cli])
    }

    fn validate(&self) -> Result<()> {
        let project = self.project.trim();
        if project.is_empty() || project == PLACEHOLDER_PROJECT {
            return Err(OpsError::Config(
                "GCP project is not set; pass --project or set GCP_PROJECT_ID".to_string(),
            ));
        }
        if !is_valid_resource_name(&self.instance_name) {
            return Err(OpsError::Config(format!(
                "invalid instance name '{}': use lowercase letters, digits and hyphens",
                self.instance_name
            )));
        }
        if self.zone.trim().is_empty() {
            return Err(OpsError::Config("zone must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(OpsError::Config("port must be between 1 and 65535".to_string()));
        }
        if self.disk_size_gb == 0 {
            return Err(OpsError::Config("disk size must be at least 1 GB".to_string()));
        }
        if self.version.trim().is_empty() || self.image.trim().is_empty() {
            return Err(OpsError::Config(
                "container image and version must not be empty".to_string(),
            ));
        }
        if !is_valid_bucket_name(&self.backup_bucket) {
            return Err(OpsError::Config(format!(
                "invalid backup bucket name '{}'",
                self.backup_bucket
            )));
        }
        Ok(())
    }

    pub fn instance_ref(&self) -> InstanceRef {
        InstanceRef {
            project: self.project.clone(),
            zone: self.zone.clone(),
            name: self.instance_name.clone(),
        }
    }

    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }

    pub fn app_url(&self, external_ip: &str) -> String {
        format!("http://{}:{}", external_ip, self.port)
    }
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path));
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(Some(PathBuf::from(path)));
        }
    }
    // The default location is optional.
    Ok(default_config_path().filter(|p| p.exists()))
}

pub fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("phoenix-ops")
            .join("config.toml"),
    )
}

/// Compute Engine resource naming: `[a-z]([-a-z0-9]{0,61}[a-z0-9])?`
fn is_valid_resource_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    if bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

fn is_valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 3 || bytes.len() > 63 {
        return false;
    }
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    alnum(&bytes[0])
        && alnum(&bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|b| alnum(b) || matches!(b, b'-' | b'_' | b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn project(id: &str) -> ConfigLayer {
        ConfigLayer {
            project: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_placeholder_project_is_rejected() {
        let err = Config::from_layers(Vec::new()).unwrap_err();
        assert!(matches!(err, OpsError::Config(_)));

        let err = Config::from_layers([project(PLACEHOLDER_PROJECT)]).unwrap_err();
        assert!(matches!(err, OpsError::Config(_)));
    }

    #[test]
    fn test_defaults_and_derived_bucket() {
        let config = Config::from_layers([project("acme-prod")]).unwrap();
        assert_eq!(config.instance_name, "phoenix-server");
        assert_eq!(config.zone, "us-central1-a");
        assert_eq!(config.port, 4000);
        assert_eq!(config.backup_bucket, "acme-prod-phoenix-backups");
        assert_eq!(config.image_ref(), "ghcr.io/phoenix-app/phoenix:latest");
    }

    #[test]
    fn test_later_layers_win() {
        let file = ConfigLayer::from_toml_str(
            r#"
            project = "from-file"
            zone = "europe-west1-b"
            port = 8080
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> =
            [("GCP_PROJECT_ID", "from-env"), ("PHOENIX_PORT", "9090")].into();
        let env = ConfigLayer::from_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        let cli = ConfigLayer {
            port: Some(7070),
            ..Default::default()
        };

        let config = Config::from_layers([file, env, cli]).unwrap();
        assert_eq!(config.project, "from-env");
        assert_eq!(config.zone, "europe-west1-b");
        assert_eq!(config.port, 7070);
    }

    #[test]
    fn test_explicit_bucket_overrides_derived_name() {
        let layer = ConfigLayer {
            project: Some("acme".to_string()),
            backup_bucket: Some("acme-archive".to_string()),
            ..Default::default()
        };
        let config = Config::from_layers([layer]).unwrap();
        assert_eq!(config.backup_bucket, "acme-archive");
    }

    #[test]
    fn test_invalid_env_number_is_a_config_error() {
        let err = ConfigLayer::from_env(|k| (k == "PHOENIX_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, OpsError::Config(_)));
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let layer = ConfigLayer::from_env(|k| (k == "GCP_ZONE").then(|| "  ".to_string())).unwrap();
        assert_eq!(layer.zone, None);
    }

    #[test]
    fn test_unknown_file_keys_are_rejected() {
        assert!(ConfigLayer::from_toml_str("projcet = \"typo\"").is_err());
    }

    #[test]
    fn test_reads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "project = \"acme\"\nversion = \"1.4.2\"").unwrap();
        let layer = ConfigLayer::from_file(file.path()).unwrap();
        let config = Config::from_layers([layer]).unwrap();
        assert_eq!(config.image_ref(), "ghcr.io/phoenix-app/phoenix:1.4.2");
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_resource_name("phoenix-server"));
        assert!(!is_valid_resource_name("Phoenix"));
        assert!(!is_valid_resource_name("1phoenix"));
        assert!(!is_valid_resource_name("phoenix-"));
        assert!(is_valid_bucket_name("acme-phoenix-backups"));
        assert!(!is_valid_bucket_name("-acme"));
        assert!(!is_valid_bucket_name("ab"));

        let layer = ConfigLayer {
            project: Some("acme".to_string()),
            instance_name: Some("Bad_Name".to_string()),
            ..Default::default()
        };
        assert!(Config::from_layers([layer]).is_err());
    }
}
