use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::{Endpoint, EndpointKind};

/// Default index backend when none is configured or the configured scheme
/// is unsupported.
pub const DEFAULT_INDEX_URL: &str = "file:./data/index.json";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub keywords: KeywordConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Backend selection by URL scheme: `file:<path>` or `sqlite:<path>`.
    #[serde(default = "default_index_url")]
    pub url: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
        }
    }
}

fn default_index_url() -> String {
    DEFAULT_INDEX_URL.to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KeywordConfig {
    /// Newline-formatted dictionary file; extraction is disabled without it.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Capacity of the worker-to-coordinator result channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    pub kind: EndpointKind,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

impl EndpointConfig {
    pub fn to_endpoint(&self) -> Endpoint {
        Endpoint {
            name: self.name.clone(),
            url: self.url.clone(),
            kind: self.kind,
            version: self.version.clone(),
            schedule: self.schedule.clone(),
            headers: self.headers.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.index.url.trim().is_empty() {
        anyhow::bail!("index.url must not be empty");
    }

    if config.scan.channel_capacity == 0 {
        anyhow::bail!("scan.channel_capacity must be > 0");
    }

    let mut seen = std::collections::HashSet::new();
    for ep in &config.endpoints {
        if ep.name.trim().is_empty() {
            anyhow::bail!("endpoint name must not be empty");
        }
        if ep.url.trim().is_empty() {
            anyhow::bail!("endpoint '{}' has an empty url", ep.name);
        }
        if !seen.insert(ep.name.as_str()) {
            anyhow::bail!("duplicate endpoint name: '{}'", ep.name);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.index.url, DEFAULT_INDEX_URL);
        assert_eq!(config.scan.channel_capacity, 64);
        assert!(config.endpoints.is_empty());
        assert!(config.keywords.path.is_none());
    }

    #[test]
    fn test_parse_endpoints() {
        let config: Config = toml::from_str(
            r#"
            [index]
            url = "sqlite:./data/index.sqlite"

            [[endpoints]]
            name = "files"
            url = "/srv/aas"
            kind = "directory"

            [[endpoints]]
            name = "plant"
            url = "https://aas.example.com/api/v3"
            kind = "aas-api"
            version = "v3"
            headers = { Authorization = "Bearer token" }
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].kind, EndpointKind::AasApi);
        let ep = config.endpoints[1].to_endpoint();
        assert_eq!(
            ep.headers.unwrap().get("Authorization").unwrap(),
            "Bearer token"
        );
    }

    #[test]
    fn test_duplicate_endpoint_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aasc.toml");
        std::fs::write(
            &path,
            r#"
            [[endpoints]]
            name = "files"
            url = "/a"
            kind = "directory"

            [[endpoints]]
            name = "files"
            url = "/b"
            kind = "directory"
            "#,
        )
        .unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate endpoint name"));
    }
}
