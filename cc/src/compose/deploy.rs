//! Deploy block parsing
//!
//! The compose `deploy:` block carries replica counts, resource
//! limits/reservations and the labels this engine reads for family grouping
//! and essential-container overrides. Compose expresses CPU as fractional
//! vCPUs ("0.5") and memory as byte-size strings ("512M"); ECS wants CPU
//! units (1 vCPU = 1024) and memory in whole MB.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{ComposeError, Result};

/// Label selecting the task family a service belongs to
pub const LABEL_TASK_FAMILY: &str = "ecs.task.family";

/// Label lowering a container's essential flag ("no"/"false")
pub const LABEL_ESSENTIAL: &str = "ecs.essential";

/// Label overriding the start condition dependents use for this container
pub const LABEL_DEPENDS_CONDITION: &str = "ecs.depends.condition";

/// One vCPU in ECS cpu units
pub const CPU_UNITS_PER_VCPU: f64 = 1024.0;

static MEMORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?<value>\d+(?:\.\d+)?)\s*(?<unit>[bkmgBKMG][bB]?)?$").expect("memory size regex"));

/// Raw `deploy:` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDeploy {
    pub replicas: Option<u32>,
    pub resources: RawResources,
    pub labels: RawLabels,
    pub update_config: Option<RawUpdateConfig>,
}

/// Raw `deploy.resources:` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawResources {
    pub limits: Option<RawResourceSpec>,
    pub reservations: Option<RawResourceSpec>,
}

/// CPU/memory pair inside limits or reservations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawResourceSpec {
    /// Fractional vCPUs as a string or number ("0.5", 1)
    pub cpus: Option<serde_yaml::Value>,
    /// Byte-size string ("512M", "2G")
    pub memory: Option<String>,
}

/// Raw `deploy.update_config:` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawUpdateConfig {
    pub parallelism: Option<u32>,
    pub order: Option<String>,
}

/// Labels in either compose form: a map or a `key=value` list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLabels {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

impl Default for RawLabels {
    fn default() -> Self {
        Self::Map(BTreeMap::new())
    }
}

impl RawLabels {
    /// Normalize to a map; list entries without '=' get an empty value
    pub fn into_map(self) -> BTreeMap<String, String> {
        match self {
            Self::Map(map) => map,
            Self::List(entries) => entries
                .into_iter()
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (entry, String::new()),
                })
                .collect(),
        }
    }
}

/// Normalized deploy settings for one service
#[derive(Debug, Clone, Default)]
pub struct DeploySettings {
    /// Desired replica count for the family's ECS service
    pub replicas: Option<u32>,

    /// CPU limit in ECS cpu units
    pub cpu_limit: Option<u32>,

    /// Memory limit in MB (container Memory)
    pub memory_limit: Option<u32>,

    /// CPU reservation in ECS cpu units
    pub cpu_reservation: Option<u32>,

    /// Memory reservation in MB (container MemoryReservation)
    pub memory_reservation: Option<u32>,

    /// Normalized label map
    pub labels: BTreeMap<String, String>,

    /// Rolling-update parallelism hint
    pub update_parallelism: Option<u32>,
}

impl DeploySettings {
    /// Parse and normalize a raw deploy block
    pub fn from_raw(service: &str, raw: RawDeploy) -> Result<Self> {
        let (cpu_limit, memory_limit) = parse_spec(service, raw.resources.limits)?;
        let (cpu_reservation, memory_reservation) = parse_spec(service, raw.resources.reservations)?;

        Ok(Self {
            replicas: raw.replicas,
            cpu_limit,
            memory_limit,
            cpu_reservation,
            memory_reservation,
            labels: raw.labels.into_map(),
            update_parallelism: raw.update_config.and_then(|u| u.parallelism),
        })
    }

    /// Value of the family-grouping label, if declared
    pub fn task_family(&self) -> Option<&str> {
        self.labels.get(LABEL_TASK_FAMILY).map(String::as_str)
    }

    /// Whether labels lower the essential flag
    pub fn essential_lowered(&self) -> bool {
        matches!(
            self.labels.get(LABEL_ESSENTIAL).map(String::as_str),
            Some("no") | Some("false") | Some("0")
        )
    }

    /// Whether labels explicitly raise the essential flag
    pub fn essential_raised(&self) -> bool {
        matches!(
            self.labels.get(LABEL_ESSENTIAL).map(String::as_str),
            Some("yes") | Some("true") | Some("1")
        )
    }

    /// Explicit start-condition override from labels
    pub fn depends_condition(&self) -> Option<&str> {
        self.labels.get(LABEL_DEPENDS_CONDITION).map(String::as_str)
    }
}

fn parse_spec(service: &str, spec: Option<RawResourceSpec>) -> Result<(Option<u32>, Option<u32>)> {
    let Some(spec) = spec else {
        return Ok((None, None));
    };
    let cpu = spec.cpus.map(|c| parse_cpus(service, &c)).transpose()?;
    let memory = spec.memory.map(|m| parse_memory_mb(service, &m)).transpose()?;
    Ok((cpu, memory))
}

/// Convert a compose `cpus` value (fractional vCPUs) to ECS cpu units
pub fn parse_cpus(service: &str, value: &serde_yaml::Value) -> Result<u32> {
    let vcpus = match value {
        serde_yaml::Value::Number(n) => n.as_f64(),
        serde_yaml::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ComposeError::malformed(service, format!("invalid cpus value: {value:?}")))?;

    if !(vcpus > 0.0) || !vcpus.is_finite() {
        return Err(ComposeError::malformed(service, format!("cpus must be positive, got {vcpus}")));
    }
    Ok((vcpus * CPU_UNITS_PER_VCPU).round() as u32)
}

/// Parse a compose byte-size string into whole MB, rounding up
pub fn parse_memory_mb(service: &str, text: &str) -> Result<u32> {
    let caps = MEMORY_RE
        .captures(text.trim())
        .ok_or_else(|| ComposeError::malformed(service, format!("invalid memory size '{text}'")))?;

    let value: f64 = caps["value"]
        .parse()
        .map_err(|_| ComposeError::malformed(service, format!("invalid memory size '{text}'")))?;

    let multiplier = match caps.name("unit").map(|u| u.as_str().to_lowercase()) {
        None => 1.0,
        Some(unit) => match unit.chars().next() {
            Some('b') => 1.0,
            Some('k') => 1024.0,
            Some('m') => 1024.0 * 1024.0,
            Some('g') => 1024.0 * 1024.0 * 1024.0,
            _ => return Err(ComposeError::malformed(service, format!("invalid memory unit in '{text}'"))),
        },
    };
    let bytes = value * multiplier;

    let mb = (bytes / (1024.0 * 1024.0)).ceil() as u32;
    if mb == 0 {
        return Err(ComposeError::malformed(service, format!("memory size '{text}' is below 1MB")));
    }
    Ok(mb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(v: &str) -> serde_yaml::Value {
        serde_yaml::from_str(v).unwrap()
    }

    #[test]
    fn test_parse_cpus_fraction() {
        assert_eq!(parse_cpus("web", &yaml("0.5")).unwrap(), 512);
        assert_eq!(parse_cpus("web", &yaml("\"0.25\"")).unwrap(), 256);
        assert_eq!(parse_cpus("web", &yaml("1")).unwrap(), 1024);
    }

    #[test]
    fn test_parse_cpus_rejects_garbage() {
        assert!(parse_cpus("web", &yaml("\"lots\"")).is_err());
        assert!(parse_cpus("web", &yaml("0")).is_err());
        assert!(parse_cpus("web", &yaml("-1")).is_err());
    }

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(parse_memory_mb("web", "512M").unwrap(), 512);
        assert_eq!(parse_memory_mb("web", "1G").unwrap(), 1024);
        assert_eq!(parse_memory_mb("web", "1GB").unwrap(), 1024);
        assert_eq!(parse_memory_mb("web", "0.5G").unwrap(), 512);
        assert_eq!(parse_memory_mb("web", "1048576").unwrap(), 1);
        assert_eq!(parse_memory_mb("web", "2048K").unwrap(), 2);
    }

    #[test]
    fn test_parse_memory_rounds_up() {
        // 1500K is 1.46MB; partial megabytes round up
        assert_eq!(parse_memory_mb("web", "1500K").unwrap(), 2);
    }

    #[test]
    fn test_parse_memory_rejects_garbage() {
        assert!(parse_memory_mb("web", "lots").is_err());
        assert!(parse_memory_mb("web", "512X").is_err());
        assert!(parse_memory_mb("web", "").is_err());
    }

    #[test]
    fn test_labels_list_form() {
        let labels = RawLabels::List(vec!["ecs.task.family=backend".to_string(), "flag".to_string()]);
        let map = labels.into_map();
        assert_eq!(map.get("ecs.task.family").unwrap(), "backend");
        assert_eq!(map.get("flag").unwrap(), "");
    }

    #[test]
    fn test_deploy_settings_from_raw() {
        let raw: RawDeploy = serde_yaml::from_str(
            r#"
replicas: 3
resources:
  limits:
    cpus: "0.5"
    memory: 512M
  reservations:
    memory: 256M
labels:
  ecs.task.family: backend
  ecs.essential: "no"
"#,
        )
        .unwrap();

        let settings = DeploySettings::from_raw("api", raw).unwrap();
        assert_eq!(settings.replicas, Some(3));
        assert_eq!(settings.cpu_limit, Some(512));
        assert_eq!(settings.memory_limit, Some(512));
        assert_eq!(settings.memory_reservation, Some(256));
        assert_eq!(settings.task_family(), Some("backend"));
        assert!(settings.essential_lowered());
    }

    #[test]
    fn test_essential_lowered_variants() {
        for value in ["no", "false", "0"] {
            let mut labels = BTreeMap::new();
            labels.insert(LABEL_ESSENTIAL.to_string(), value.to_string());
            let settings = DeploySettings {
                labels,
                ..Default::default()
            };
            assert!(settings.essential_lowered(), "{value} should lower essential");
        }

        let settings = DeploySettings::default();
        assert!(!settings.essential_lowered());
    }
}
