//! ComposeService - one normalized `services:` entry
//!
//! Parses the loosely structured compose service shape (list-or-map
//! environment, string-or-map ports and mounts, list-or-map depends_on)
//! into one strongly typed descriptor. Instances are created once at load
//! time and then mutated throughout family initialization: the ordering
//! pass fills start dependencies and essential flags, sidecar injection
//! appends environment variables and log settings.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::compose::deploy::{DeploySettings, RawDeploy};
use crate::compose::extensions::{XIam, XLogging, XNetwork, XScaling};
use crate::compose::healthcheck::{Healthcheck, RawHealthcheck};
use crate::compose::ports::{PortMapping, RawPort, parse_port};
use crate::error::{ComposeError, Result};

/// Container start condition, as ECS DependsOn understands it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartCondition {
    /// Dependency has started
    #[default]
    Start,
    /// Dependency ran to completion (any exit code)
    Complete,
    /// Dependency ran to completion with exit code 0
    Success,
    /// Dependency reports a passing healthcheck
    Healthy,
}

impl std::fmt::Display for StartCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "START"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Healthy => write!(f, "HEALTHY"),
        }
    }
}

impl std::str::FromStr for StartCondition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            // Compose condition names
            "service_started" => Ok(Self::Start),
            "service_completed_successfully" => Ok(Self::Success),
            "service_healthy" => Ok(Self::Healthy),
            // Label override values
            "START" => Ok(Self::Start),
            "COMPLETE" => Ok(Self::Complete),
            "SUCCESS" => Ok(Self::Success),
            "HEALTHY" => Ok(Self::Healthy),
            _ => Err(format!("Unknown start condition: {s}")),
        }
    }
}

/// CPU architecture of a task's runtime platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuArchitecture {
    X86_64,
    Arm64,
}

impl std::fmt::Display for CpuArchitecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X86_64 => write!(f, "X86_64"),
            Self::Arm64 => write!(f, "ARM64"),
        }
    }
}

impl std::str::FromStr for CpuArchitecture {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "X86_64" | "AMD64" => Ok(Self::X86_64),
            "ARM64" | "AARCH64" => Ok(Self::Arm64),
            _ => Err(format!("Unknown CPU architecture: {s}. Use: X86_64 or ARM64")),
        }
    }
}

/// OS family of a task's runtime platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    WindowsServer2019Core,
    WindowsServer2022Core,
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "LINUX"),
            Self::WindowsServer2019Core => write!(f, "WINDOWS_SERVER_2019_CORE"),
            Self::WindowsServer2022Core => write!(f, "WINDOWS_SERVER_2022_CORE"),
        }
    }
}

impl std::str::FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LINUX" => Ok(Self::Linux),
            "WINDOWS_SERVER_2019_CORE" => Ok(Self::WindowsServer2019Core),
            "WINDOWS_SERVER_2022_CORE" => Ok(Self::WindowsServer2022Core),
            _ => Err(format!("Unknown OS family: {s}")),
        }
    }
}

/// ECS launch type hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchType {
    #[default]
    Fargate,
    Ec2,
    External,
}

impl std::fmt::Display for LaunchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fargate => write!(f, "FARGATE"),
            Self::Ec2 => write!(f, "EC2"),
            Self::External => write!(f, "EXTERNAL"),
        }
    }
}

impl std::str::FromStr for LaunchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FARGATE" => Ok(Self::Fargate),
            "EC2" => Ok(Self::Ec2),
            "EXTERNAL" => Ok(Self::External),
            _ => Err(format!("Unknown launch type: {s}. Use: FARGATE, EC2 or EXTERNAL")),
        }
    }
}

/// A dependency edge inside one task: container name + start condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDependency {
    pub container_name: String,
    pub condition: StartCondition,
}

/// Reference from a service to a compose-level secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    /// Compose-level secret name
    pub source: String,
    /// Environment variable the value is exposed as (defaults to source)
    pub target: String,
}

/// One volume mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Compose-level volume name, or a host path for bind mounts
    pub source: String,
    /// Mount point inside the container
    pub target: String,
    pub read_only: bool,
}

/// One ulimit entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ulimit {
    pub name: String,
    pub soft: u64,
    pub hard: u64,
}

/// Container log settings from the standard `logging:` block
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    pub driver: Option<String>,
    pub options: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Raw serde model
// ---------------------------------------------------------------------------

/// Raw `services:` entry as parsed from the compose file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawService {
    pub image: Option<String>,
    pub command: Option<RawCommand>,
    pub ports: Vec<RawPort>,
    pub environment: Option<RawEnvironment>,
    pub secrets: Vec<RawServiceSecret>,
    pub volumes: Vec<RawServiceVolume>,
    pub healthcheck: Option<RawHealthcheck>,
    pub depends_on: Option<RawDependsOn>,
    pub deploy: Option<RawDeploy>,
    pub logging: Option<RawLogging>,
    pub ulimits: BTreeMap<String, RawUlimit>,

    #[serde(rename = "x-network")]
    pub x_network: Option<XNetwork>,
    #[serde(rename = "x-iam")]
    pub x_iam: Option<XIam>,
    #[serde(rename = "x-scaling")]
    pub x_scaling: Option<XScaling>,
    #[serde(rename = "x-logging")]
    pub x_logging: Option<XLogging>,
    #[serde(rename = "x-xray")]
    pub x_xray: bool,
    #[serde(rename = "x-cloudwatch-agent")]
    pub x_cloudwatch_agent: bool,
    #[serde(rename = "x-envoy")]
    pub x_envoy: bool,
    #[serde(rename = "x-launch-type")]
    pub x_launch_type: Option<String>,
    #[serde(rename = "x-cpu-arch")]
    pub x_cpu_arch: Option<String>,
    #[serde(rename = "x-os-family")]
    pub x_os_family: Option<String>,
}

/// `command:` in string or list form
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCommand {
    Line(String),
    Argv(Vec<String>),
}

/// `environment:` in map or `KEY=value` list form
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEnvironment {
    Map(BTreeMap<String, serde_yaml::Value>),
    List(Vec<String>),
}

/// `depends_on:` in list or condition-map form
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, RawDependsOnEntry>),
}

/// One condition-map entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDependsOnEntry {
    pub condition: Option<String>,
}

/// Service-level secret reference, short or long form
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawServiceSecret {
    Name(String),
    Long {
        source: String,
        #[serde(default)]
        target: Option<String>,
    },
}

/// Service-level volume entry, short or long form
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawServiceVolume {
    Short(String),
    Long {
        source: String,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
}

/// Ulimit as a single number or soft/hard pair
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawUlimit {
    Single(u64),
    Pair { soft: u64, hard: u64 },
}

/// Standard `logging:` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawLogging {
    pub driver: Option<String>,
    pub options: BTreeMap<String, serde_yaml::Value>,
}

// ---------------------------------------------------------------------------
// Normalized service
// ---------------------------------------------------------------------------

/// One normalized compose service
#[derive(Debug, Clone)]
pub struct ComposeService {
    /// Service name, unique within the compose file
    pub name: String,

    /// Alphanumeric CloudFormation-safe identifier derived from name
    pub logical_name: String,

    pub image: String,
    pub command: Option<Vec<String>>,
    pub ports: Vec<PortMapping>,
    pub environment: BTreeMap<String, String>,
    pub secrets: Vec<SecretReference>,
    pub volumes: Vec<VolumeMount>,
    pub healthcheck: Option<Healthcheck>,

    /// Declared dependencies: name -> explicit condition (if any)
    pub depends_on: BTreeMap<String, Option<StartCondition>>,

    pub deploy: DeploySettings,
    pub logging: LogSettings,
    pub ulimits: Vec<Ulimit>,

    pub network: XNetwork,
    pub iam: XIam,
    pub scaling: Option<XScaling>,
    pub log_ext: XLogging,

    pub wants_xray: bool,
    pub wants_cloudwatch_agent: bool,
    pub wants_envoy: bool,

    pub launch_type: Option<LaunchType>,
    pub cpu_arch: Option<CpuArchitecture>,
    pub os_family: Option<OsFamily>,

    /// Whether this container's failure kills the task; resolved by the family
    pub is_essential: bool,

    /// Whether this is a managed sidecar rather than a user-declared service
    pub is_aws_sidecar: bool,

    /// Condition dependents of this container wait on
    pub container_start_condition: StartCondition,

    /// In-task dependency edges, filled by the family ordering pass
    pub start_dependencies: Vec<ContainerDependency>,
}

impl ComposeService {
    /// Normalize one raw `services:` entry
    pub fn from_raw(name: &str, raw: RawService) -> Result<Self> {
        let image = raw
            .image
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| ComposeError::malformed(name, "missing required key 'image'"))?;

        let ports = raw
            .ports
            .iter()
            .map(|p| parse_port(name, p))
            .collect::<Result<Vec<_>>>()?;

        let environment = match raw.environment {
            Some(env) => normalize_environment(name, env)?,
            None => BTreeMap::new(),
        };

        let secrets = raw
            .secrets
            .into_iter()
            .map(|s| match s {
                RawServiceSecret::Name(source) => SecretReference {
                    target: source.clone(),
                    source,
                },
                RawServiceSecret::Long { source, target } => SecretReference {
                    target: target.unwrap_or_else(|| source.clone()),
                    source,
                },
            })
            .collect();

        let volumes = raw
            .volumes
            .into_iter()
            .map(|v| parse_volume(name, v))
            .collect::<Result<Vec<_>>>()?;

        let healthcheck = match raw.healthcheck {
            Some(check) => Healthcheck::from_raw(name, check)?,
            None => None,
        };

        let depends_on = match raw.depends_on {
            Some(deps) => normalize_depends_on(name, deps)?,
            None => BTreeMap::new(),
        };

        let deploy = DeploySettings::from_raw(name, raw.deploy.unwrap_or_default())?;
        validate_reservation(name, &deploy)?;

        let logging = match raw.logging {
            Some(raw_log) => LogSettings {
                driver: raw_log.driver,
                options: raw_log
                    .options
                    .into_iter()
                    .map(|(k, v)| (k, yaml_scalar_to_string(&v)))
                    .collect(),
            },
            None => LogSettings::default(),
        };

        let ulimits = raw
            .ulimits
            .into_iter()
            .map(|(name, limit)| match limit {
                RawUlimit::Single(n) => Ulimit { name, soft: n, hard: n },
                RawUlimit::Pair { soft, hard } => Ulimit { name, soft, hard },
            })
            .collect();

        let launch_type = parse_enum_hint(name, raw.x_launch_type.as_deref())?;
        let cpu_arch = parse_enum_hint(name, raw.x_cpu_arch.as_deref())?;
        let os_family = parse_enum_hint(name, raw.x_os_family.as_deref())?;

        // Dependents default to waiting for a healthcheck when one exists;
        // the label can override this per container
        let declared_condition = match deploy.depends_condition() {
            Some(label) => Some(
                label
                    .parse()
                    .map_err(|e: String| ComposeError::malformed(name, e))?,
            ),
            None => None,
        };
        let container_start_condition = declared_condition.unwrap_or(if healthcheck.is_some() {
            StartCondition::Healthy
        } else {
            StartCondition::Start
        });

        Ok(Self {
            name: name.to_string(),
            logical_name: cfndoc::logical_id(name),
            image,
            command: raw.command.map(|c| match c {
                RawCommand::Line(line) => line.split_whitespace().map(String::from).collect(),
                RawCommand::Argv(argv) => argv,
            }),
            ports,
            environment,
            secrets,
            volumes,
            healthcheck,
            depends_on,
            deploy,
            logging,
            ulimits,
            network: raw.x_network.unwrap_or_default(),
            iam: raw.x_iam.unwrap_or_default(),
            scaling: raw.x_scaling,
            log_ext: raw.x_logging.unwrap_or_default(),
            wants_xray: raw.x_xray,
            wants_cloudwatch_agent: raw.x_cloudwatch_agent,
            wants_envoy: raw.x_envoy,
            launch_type,
            cpu_arch,
            os_family,
            is_essential: true,
            is_aws_sidecar: false,
            container_start_condition,
            start_dependencies: Vec::new(),
        })
    }

    /// Append an environment variable (used by sidecar injection)
    pub fn add_env_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(key.into(), value.into());
    }

    /// Append an in-task dependency edge, deduplicating by container name
    pub fn add_start_dependency(&mut self, container_name: impl Into<String>, condition: StartCondition) {
        let container_name = container_name.into();
        if self.start_dependencies.iter().any(|d| d.container_name == container_name) {
            return;
        }
        self.start_dependencies.push(ContainerDependency {
            container_name,
            condition,
        });
    }

    /// Declared container CPU, limits taking precedence over reservations
    pub fn declared_cpu(&self) -> Option<u32> {
        self.deploy.cpu_limit.or(self.deploy.cpu_reservation)
    }

    /// The larger of Memory and MemoryReservation, for aggregate sizing
    pub fn declared_memory(&self) -> Option<u32> {
        match (self.deploy.memory_limit, self.deploy.memory_reservation) {
            (Some(limit), Some(reservation)) => Some(limit.max(reservation)),
            (limit, reservation) => limit.or(reservation),
        }
    }
}

fn parse_enum_hint<T>(service: &str, text: Option<&str>) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    text.map(|t| t.parse().map_err(|e: String| ComposeError::malformed(service, e)))
        .transpose()
}

fn validate_reservation(service: &str, deploy: &DeploySettings) -> Result<()> {
    if let (Some(limit), Some(reservation)) = (deploy.memory_limit, deploy.memory_reservation)
        && reservation > limit
    {
        return Err(ComposeError::malformed(
            service,
            format!("memory reservation {reservation}MB exceeds memory limit {limit}MB"),
        ));
    }
    Ok(())
}

fn normalize_environment(service: &str, env: RawEnvironment) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    match env {
        RawEnvironment::Map(map) => {
            for (key, value) in map {
                if value.is_null() {
                    // Null means "inherit from host" in compose; there is no host here
                    debug!(service, key, "Dropping null environment value");
                    continue;
                }
                out.insert(key, yaml_scalar_to_string(&value));
            }
        }
        RawEnvironment::List(entries) => {
            for entry in entries {
                match entry.split_once('=') {
                    Some((key, value)) => {
                        out.insert(key.to_string(), value.to_string());
                    }
                    None => {
                        debug!(service, entry, "Dropping environment entry without value");
                    }
                }
            }
        }
    }
    Ok(out)
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim_end().to_string(),
    }
}

fn parse_volume(service: &str, raw: RawServiceVolume) -> Result<VolumeMount> {
    match raw {
        RawServiceVolume::Short(spec) => {
            let segments: Vec<&str> = spec.split(':').collect();
            match segments.as_slice() {
                [source, target] => Ok(VolumeMount {
                    source: source.to_string(),
                    target: target.to_string(),
                    read_only: false,
                }),
                [source, target, mode] => Ok(VolumeMount {
                    source: source.to_string(),
                    target: target.to_string(),
                    read_only: *mode == "ro",
                }),
                _ => Err(ComposeError::malformed(
                    service,
                    format!("invalid volume '{spec}', expected 'source:target[:mode]'"),
                )),
            }
        }
        RawServiceVolume::Long {
            source,
            target,
            read_only,
        } => Ok(VolumeMount {
            source,
            target,
            read_only,
        }),
    }
}

fn normalize_depends_on(service: &str, deps: RawDependsOn) -> Result<BTreeMap<String, Option<StartCondition>>> {
    let mut out = BTreeMap::new();
    match deps {
        RawDependsOn::List(names) => {
            for name in names {
                out.insert(name, None);
            }
        }
        RawDependsOn::Map(entries) => {
            for (name, entry) in entries {
                let condition = entry
                    .condition
                    .as_deref()
                    .map(|c| c.parse().map_err(|e: String| ComposeError::malformed(service, e)))
                    .transpose()?;
                out.insert(name, condition);
            }
        }
    }
    Ok(out)
}
