//! Compose-level volume normalization
//!
//! Top-level `volumes:` entries become named task volumes. Services
//! reference them by name in their mount list; an unresolved name is a
//! fatal reference error caught at project link time. Host-path bind
//! mounts have no awsvpc/Fargate equivalent and are rejected outright.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Raw top-level volume entry (the value may be empty/null in compose)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawVolume {
    pub driver: Option<String>,
    pub driver_opts: BTreeMap<String, String>,
    pub external: bool,
    pub name: Option<String>,
}

/// One normalized compose-level volume
#[derive(Debug, Clone)]
pub struct ComposeVolume {
    /// Volume name as declared in the compose file
    pub name: String,

    /// Alphanumeric identifier for template resources
    pub logical_name: String,

    /// Externally managed (pre-existing filesystem), not created by us
    pub external: bool,

    /// Volume driver hint ("efs" selects an EFS-backed task volume)
    pub driver: Option<String>,

    /// Driver options passed through to the volume configuration
    pub driver_opts: BTreeMap<String, String>,
}

impl ComposeVolume {
    /// Normalize one top-level volume entry; a null body means defaults
    pub fn from_raw(name: &str, raw: Option<RawVolume>) -> Self {
        let raw = raw.unwrap_or_default();
        Self {
            name: name.to_string(),
            logical_name: cfndoc::logical_id(name),
            external: raw.external,
            driver: raw.driver,
            driver_opts: raw.driver_opts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_body_defaults() {
        let volume = ComposeVolume::from_raw("data", None);
        assert_eq!(volume.name, "data");
        assert_eq!(volume.logical_name, "Data");
        assert!(!volume.external);
        assert!(volume.driver.is_none());
    }

    #[test]
    fn test_full_body() {
        let raw: RawVolume = serde_yaml::from_str(
            r#"
driver: efs
driver_opts:
  performance-mode: generalPurpose
external: true
"#,
        )
        .unwrap();
        let volume = ComposeVolume::from_raw("shared-data", Some(raw));
        assert_eq!(volume.logical_name, "SharedData");
        assert!(volume.external);
        assert_eq!(volume.driver.as_deref(), Some("efs"));
        assert_eq!(volume.driver_opts.get("performance-mode").unwrap(), "generalPurpose");
    }
}
