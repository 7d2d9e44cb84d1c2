//! The per-family output descriptor
//!
//! This is the boundary between the composition engine and the render
//! layer: everything a serializer needs to emit one family's resources,
//! with no compose-level concepts left in it. The engine fills it during
//! finalization; the render layer only reads.

use std::collections::{BTreeMap, BTreeSet};

use crate::compose::secret::ComposeSecret;
use crate::compose::service::{ComposeService, ContainerDependency, Ulimit, VolumeMount};
use crate::compose::{CpuArchitecture, Healthcheck, LaunchType, OsFamily, PortMapping};
use crate::family::iam::{RoleKind, TaskIam};
use crate::family::network::IngressRule;
use crate::family::scaling::ScheduledAction;
use crate::resources::RoleRef;

/// Network mode every emitted task definition uses
pub const NETWORK_MODE: &str = "awsvpc";

/// One container secret entry (name + ValueFrom)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSecret {
    pub name: String,
    pub value_from: String,
}

/// One fully resolved container definition
#[derive(Debug, Clone)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    pub essential: bool,

    /// Container-level CPU units; None lets the task-level value apply
    pub cpu: Option<u32>,

    /// Hard memory limit in MB; None lets the container burst to task RAM
    pub memory: Option<u32>,

    /// Soft memory floor in MB
    pub memory_reservation: Option<u32>,

    pub command: Option<Vec<String>>,
    pub port_mappings: Vec<PortMapping>,
    pub environment: BTreeMap<String, String>,
    pub secrets: Vec<ContainerSecret>,
    pub depends_on: Vec<ContainerDependency>,
    pub healthcheck: Option<Healthcheck>,
    pub ulimits: Vec<Ulimit>,
    pub mount_points: Vec<VolumeMount>,

    /// Log driver; None means the render layer's awslogs default
    pub log_driver: Option<String>,
    pub log_options: BTreeMap<String, String>,
}

impl ContainerDefinition {
    /// Project one service's final state into a container definition
    pub fn from_service(service: &ComposeService, secrets: &BTreeMap<String, ComposeSecret>) -> Self {
        Self {
            name: service.name.clone(),
            image: service.image.clone(),
            essential: service.is_essential,
            cpu: service.declared_cpu(),
            memory: service.deploy.memory_limit,
            memory_reservation: service.deploy.memory_reservation,
            command: service.command.clone(),
            port_mappings: service.ports.clone(),
            environment: service.environment.clone(),
            secrets: service
                .secrets
                .iter()
                .map(|reference| ContainerSecret {
                    name: reference.target.clone(),
                    value_from: secrets
                        .get(&reference.source)
                        .map(|s| s.value_from().to_string())
                        .unwrap_or_else(|| reference.source.clone()),
                })
                .collect(),
            depends_on: service.start_dependencies.clone(),
            healthcheck: service.healthcheck.clone(),
            ulimits: service.ulimits.clone(),
            mount_points: service.volumes.clone(),
            log_driver: service.logging.driver.clone(),
            log_options: service.logging.options.clone(),
        }
    }
}

/// One IAM policy resource the family generates
#[derive(Debug, Clone)]
pub struct PolicySpec {
    /// Logical id of the AWS::IAM::Policy resource
    pub logical_id: String,

    /// Role the policy attaches to
    pub role: RoleKind,

    /// PolicyName property
    pub name: String,

    /// Policy document
    pub document: serde_json::Value,
}

/// The task-level portion of a family descriptor
///
/// Assembled once IAM and compute resolution have completed: container
/// definitions in dependency order plus the shared task settings.
#[derive(Debug, Clone)]
pub struct TaskDefinitionDraft {
    pub containers: Vec<ContainerDefinition>,
    pub task_cpu: u32,
    pub task_ram_mb: u32,
    pub network_mode: &'static str,
}

/// Family-level scaling settings for the render layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingDescriptor {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub cpu_target: Option<u8>,
    pub memory_target: Option<u8>,
    pub scheduled: Vec<ScheduledAction>,
}

/// Everything the render layer needs for one family
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub family_name: String,
    pub logical_name: String,

    /// Container definitions in dependency order
    pub containers: Vec<ContainerDefinition>,

    pub task_cpu: u32,
    pub task_ram_mb: u32,
    pub network_mode: &'static str,
    pub launch_type: LaunchType,
    pub cpu_arch: Option<CpuArchitecture>,
    pub os_family: Option<OsFamily>,
    pub replicas: u32,

    /// Rolling-update parallelism hint from the deploy block
    pub update_parallelism: Option<u32>,

    pub execution_role: RoleRef,
    pub task_role: RoleRef,

    /// Aggregated role content (managed ARNs, boundary)
    pub iam: TaskIam,

    /// Inline policies as concrete template resources
    pub policies: Vec<PolicySpec>,

    /// Published ports after the family merge
    pub ports: Vec<PortMapping>,

    /// Security-group ingress rule descriptors
    pub ingress_rules: Vec<IngressRule>,

    pub assign_public_ip: bool,

    pub scaling: Option<ScalingDescriptor>,

    /// Logical ids the ECS Service resource must depend on; enumerates
    /// every generated IAM policy so role grants exist before the service
    pub service_depends_on: Vec<String>,

    /// Names of other families this one depends on
    pub cross_family_depends: BTreeSet<String>,

    /// CloudWatch log retention for the family log group
    pub log_retention_days: u32,

    /// Task volume names
    pub volumes: Vec<String>,
}
