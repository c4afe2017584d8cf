//! Proxy configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Proxy configuration, loaded from a YAML file and layered with CLI
/// overrides on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Base URL of the upstream Prometheus/Alertmanager-compatible service.
    pub upstream_url: String,

    /// Identifier of the label used to scope data to one tenant.
    pub label_name: String,

    /// If set, the tenant value is fixed for all requests and the
    /// `label_name` parameter must be absent from incoming requests.
    #[serde(default)]
    pub static_label_value: Option<String>,

    /// When false, `/api/v1/labels` and `/api/v1/label/...` are not
    /// registered in the route table; requests to them answer `501 Not
    /// Implemented` rather than falling through to the generic `404`
    /// given to truly unknown paths.
    #[serde(default = "default_true")]
    pub enable_label_apis: bool,

    /// Exact paths to register as tenant-extracted passthroughs, validated
    /// at startup.
    #[serde(default)]
    pub passthrough_paths: Vec<String>,

    /// When true, a conflicting pre-existing tenant matcher causes `400`
    /// instead of silent replacement.
    #[serde(default)]
    pub error_on_replace: bool,
}

fn default_true() -> bool {
    true
}

impl ProxyConfig {
    /// Load configuration from a YAML file, applying CLI overrides on top.
    pub fn load(config_path: &str, cli: &crate::Cli) -> Result<Self> {
        let mut config: ProxyConfig = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("reading config file {config_path}"))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("parsing config file {config_path}"))?
        } else {
            bail!("config file not found: {config_path}");
        };

        if let Some(upstream) = &cli.upstream_url {
            config.upstream_url = upstream.clone();
        }
        if let Some(label_name) = &cli.label_name {
            config.label_name = label_name.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.upstream_url.is_empty() {
            bail!("upstream_url is required");
        }
        if self.label_name.is_empty() {
            bail!("label_name is required");
        }
        Ok(())
    }
}
