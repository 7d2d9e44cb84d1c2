//! Tool configuration types and loading
//!
//! Everything the render engine treats as an ambient default lives here
//! as an explicit value: sidecar images, log retention, replica counts
//! and statically configured resource lookups. Families receive these
//! through [`FamilyBuildConfig`], never through hidden module state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::family::{DEFAULT_LOG_RETENTION_DAYS, DEFAULT_REPLICAS, FamilyBuildConfig, SidecarImages};
use crate::resources::{AttributeOutput, AttributesOutputs, LookupRegistry};

/// Main tool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Render defaults
    pub render: RenderConfig,

    /// Sidecar image overrides
    pub sidecars: SidecarImages,

    /// Statically configured resource attributes, by resource name
    ///
    /// Stands in for live AWS lookups: a FireLens destination or similar
    /// cross-resource reference resolves against these values.
    pub lookups: BTreeMap<String, BTreeMap<String, String>>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .composecfn.yml
        let local_config = PathBuf::from(".composecfn.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/composecfn/composecfn.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("composecfn").join("composecfn.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// The per-family builder configuration derived from this config
    pub fn family_build_config(&self) -> FamilyBuildConfig {
        FamilyBuildConfig {
            sidecar_images: self.sidecars.clone(),
            default_log_retention_days: self.render.log_retention_days,
            default_replicas: self.render.replicas,
        }
    }

    /// The lookup registry derived from the configured static attributes
    pub fn lookup_registry(&self) -> LookupRegistry {
        self.lookups
            .iter()
            .map(|(resource, attributes)| {
                let outputs: AttributesOutputs = attributes
                    .iter()
                    .map(|(name, value)| (name.clone(), AttributeOutput::lookup(value.clone())))
                    .collect();
                (resource.clone(), outputs)
            })
            .collect()
    }
}

/// Render defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Default CloudWatch log retention in days
    #[serde(rename = "log-retention-days")]
    pub log_retention_days: u32,

    /// Default desired count when no service declares replicas
    pub replicas: u32,

    /// Description placed on emitted templates
    pub description: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
            replicas: DEFAULT_REPLICAS,
            description: "ECS task families rendered from a compose project".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.render.log_retention_days, DEFAULT_LOG_RETENTION_DAYS);
        assert_eq!(config.render.replicas, DEFAULT_REPLICAS);
        assert!(config.lookups.is_empty());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
render:
  log-retention-days: 30
  replicas: 2

sidecars:
  xray: registry.internal/xray:pinned

lookups:
  orders-stream:
    Arn: arn:aws:kinesis:eu-west-1:123456789012:stream/orders
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.render.log_retention_days, 30);
        assert_eq!(config.render.replicas, 2);
        assert_eq!(config.sidecars.xray, "registry.internal/xray:pinned");
        assert_eq!(
            config.lookups.get("orders-stream").unwrap().get("Arn").unwrap(),
            "arn:aws:kinesis:eu-west-1:123456789012:stream/orders"
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
render:
  replicas: 3
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.render.replicas, 3);
        assert_eq!(config.render.log_retention_days, DEFAULT_LOG_RETENTION_DAYS);
        assert_eq!(config.sidecars, SidecarImages::default());
    }

    #[test]
    fn test_lookup_registry_conversion() {
        let yaml = r#"
lookups:
  orders-stream:
    Arn: arn:aws:kinesis:eu-west-1:123456789012:stream/orders
    Name: orders
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let registry = config.lookup_registry();

        let resolved = crate::resources::resolve_reference(&registry, "orders-stream").unwrap();
        assert!(resolved.value.starts_with("arn:"));
    }
}
