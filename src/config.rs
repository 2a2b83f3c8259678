// Configuration management module
// This file handles loading of the YAML fetcher definitions and of the
// process settings taken from environment variables
//
// Numan Thabit 2025 Nov

use crate::errors::ExporterError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Fetcher definitions read from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Label names shared by every labeled fetcher, in emission order
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub fetchers: FetcherConfigs,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetcherConfigs {
    #[serde(default)]
    pub dockerhub_pulls: Vec<DockerHubConfig>,
    #[serde(default)]
    pub github_releases: Vec<GitHubReleasesConfig>,
    #[serde(default)]
    pub nginx_access_log: Vec<NginxAccessLogConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerHubConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    /// Registry API base, defaults to Docker Hub
    pub api_url: Option<Url>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubReleasesConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    /// Only assets whose name matches are counted; absent matches all
    pub assets_regexp: Option<String>,
    /// Label name to pattern whose first capture group is the label value
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Releases API base, defaults to api.github.com
    pub api_url: Option<Url>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NginxAccessLogConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub access_log_path: PathBuf,
    #[serde(default)]
    pub access_log_regexp: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Config {
    pub fn from_yaml(data: &str) -> Result<Self, ExporterError> {
        serde_yaml::from_str(data).map_err(|e| ExporterError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ExporterError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ExporterError::file(path, e))?;
        Self::from_yaml(&data)
            .map_err(|e| ExporterError::Config(format!("{}: {e}", path.display())))
    }

    /// Check the declared label schema: valid Prometheus names, unique, and
    /// not clashing with the reserved `name` label.
    pub fn validate_labels(&self) -> Result<(), ExporterError> {
        let mut seen = std::collections::HashSet::new();
        for label in &self.labels {
            if !is_valid_label_name(label) {
                return Err(ExporterError::Config(format!(
                    "invalid label name: {label:?}"
                )));
            }
            if label == "name" {
                return Err(ExporterError::Config(
                    "label name \"name\" is reserved for the fetcher name".to_string(),
                ));
            }
            if !seen.insert(label.as_str()) {
                return Err(ExporterError::Config(format!(
                    "label {label:?} declared twice"
                )));
            }
        }
        Ok(())
    }
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Process settings, from `EXPORTER_*` environment variables over defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub config_file: PathBuf,
    pub listen_address: SocketAddr,
    pub metrics_path: String,
    pub fetch_timeout_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ExporterError> {
        Self::from_sources(
            config::Environment::with_prefix("EXPORTER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_sources(
        env: impl config::Source + Send + Sync + 'static,
    ) -> Result<Self, ExporterError> {
        let settings: Self = config::Config::builder()
            .set_default("config_file", "config.yml")
            .and_then(|b| b.set_default("listen_address", "0.0.0.0:8080"))
            .and_then(|b| b.set_default("metrics_path", "/metrics"))
            .and_then(|b| b.set_default("fetch_timeout_secs", 3))
            .map_err(|e| ExporterError::Config(e.to_string()))?
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| ExporterError::Config(e.to_string()))?;

        if !settings.metrics_path.starts_with('/') {
            return Err(ExporterError::Config(format!(
                "metrics path must start with '/': {}",
                settings.metrics_path
            )));
        }
        if matches!(settings.metrics_path.as_str(), "/" | "/health") {
            return Err(ExporterError::Config(format!(
                "metrics path {} is already served",
                settings.metrics_path
            )));
        }
        if settings.fetch_timeout_secs == 0 {
            return Err(ExporterError::Config(
                "fetch timeout must be at least one second".to_string(),
            ));
        }
        Ok(settings)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
