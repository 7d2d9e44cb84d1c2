//! ComposeFamily - the task-family composition engine
//!
//! One family = one ECS task definition + service. The family owns its
//! containers (user services plus managed sidecars) in a single ordered
//! collection and drives a strictly forward state machine:
//!
//! ```text
//! CREATED -> SERVICES_SORTED -> IAM_RESOLVED -> COMPUTE_RESOLVED
//!         -> NETWORK_RESOLVED -> FINALIZED
//! ```
//!
//! Calling a phase out of order is an explicit Ordering error naming the
//! missing prerequisite. Merges that depend on declaration order (ports,
//! boundaries, log retention) iterate the family's declaration list, not
//! the dependency-sorted container list.

pub mod compute;
pub mod descriptor;
pub mod iam;
pub mod network;
pub mod ordering;
pub mod scaling;
pub mod sidecars;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::compose::secret::ComposeSecret;
use crate::compose::service::LogSettings;
use crate::compose::volume::ComposeVolume;
use crate::compose::{ComposeService, CpuArchitecture, LaunchType, OsFamily, StartCondition};
use crate::error::{ComposeError, PolicyWarning, Result};
use crate::resources::{LookupRegistry, RoleRef, resolve_reference};

pub use compute::TaskCompute;
pub use descriptor::{ContainerDefinition, PolicySpec, ScalingDescriptor, TaskDefinitionDraft, TaskDescriptor};
pub use iam::{RoleKind, TaskIam};
pub use network::{FamilyNetwork, IngressRule, IngressSource};
pub use scaling::FamilyScaling;
pub use sidecars::SidecarImages;

/// Default CloudWatch log retention in days
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 14;

/// Default desired count when no service declares replicas
pub const DEFAULT_REPLICAS: u32 = 1;

/// Build phases, strictly forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FamilyPhase {
    Created,
    ServicesSorted,
    IamResolved,
    ComputeResolved,
    NetworkResolved,
    Finalized,
}

impl std::fmt::Display for FamilyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::ServicesSorted => write!(f, "services_sorted"),
            Self::IamResolved => write!(f, "iam_resolved"),
            Self::ComputeResolved => write!(f, "compute_resolved"),
            Self::NetworkResolved => write!(f, "network_resolved"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

/// Explicit configuration for the family builder
///
/// Everything that would otherwise be hidden module state lives here so
/// independent families can build in parallel against the same value.
#[derive(Debug, Clone)]
pub struct FamilyBuildConfig {
    pub sidecar_images: SidecarImages,
    pub default_log_retention_days: u32,
    pub default_replicas: u32,
}

impl Default for FamilyBuildConfig {
    fn default() -> Self {
        Self {
            sidecar_images: SidecarImages::default(),
            default_log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
            default_replicas: DEFAULT_REPLICAS,
        }
    }
}

/// Result of a full family build
#[derive(Debug)]
pub struct BuiltFamily {
    pub descriptor: TaskDescriptor,
    pub warnings: Vec<PolicyWarning>,
}

/// One ECS task family under construction
#[derive(Debug, Clone)]
pub struct ComposeFamily {
    pub name: String,
    pub logical_name: String,

    /// All containers (services + sidecars); dependency-sorted after init
    containers: Vec<ComposeService>,

    /// Container names in declaration order; sidecars append at injection
    declaration: Vec<String>,

    secrets: BTreeMap<String, ComposeSecret>,
    volumes: BTreeMap<String, ComposeVolume>,
    config: FamilyBuildConfig,

    phase: FamilyPhase,

    /// Families this one depends on (cross-family depends_on edges)
    services_depends_on: BTreeSet<String>,

    launch_type: LaunchType,
    cpu_arch: Option<CpuArchitecture>,
    os_family: Option<OsFamily>,

    iam: TaskIam,
    compute: TaskCompute,
    network: FamilyNetwork,
    scaling: FamilyScaling,

    warnings: Vec<PolicyWarning>,
}

impl ComposeFamily {
    /// Create a family from its member services
    pub fn new(
        name: impl Into<String>,
        services: Vec<ComposeService>,
        secrets: BTreeMap<String, ComposeSecret>,
        volumes: BTreeMap<String, ComposeVolume>,
        config: FamilyBuildConfig,
    ) -> Result<Self> {
        let name = name.into();
        if services.is_empty() {
            return Err(ComposeError::inconsistent(&name, "family has no services"));
        }
        let logical_name = cfndoc::logical_id(&name);
        if logical_name.is_empty() {
            return Err(ComposeError::inconsistent(
                &name,
                "family name contains no alphanumeric characters",
            ));
        }

        let declaration = services.iter().map(|s| s.name.clone()).collect();
        Ok(Self {
            name,
            logical_name,
            containers: services,
            declaration,
            secrets,
            volumes,
            config,
            phase: FamilyPhase::Created,
            services_depends_on: BTreeSet::new(),
            launch_type: LaunchType::Fargate,
            cpu_arch: None,
            os_family: None,
            iam: TaskIam::default(),
            compute: TaskCompute::default(),
            network: FamilyNetwork::default(),
            scaling: FamilyScaling::default(),
            warnings: Vec::new(),
        })
    }

    /// Current build phase
    pub fn phase(&self) -> FamilyPhase {
        self.phase
    }

    /// Warnings accumulated so far, in occurrence order
    pub fn warnings(&self) -> &[PolicyWarning] {
        &self.warnings
    }

    /// Containers in current (post-sort) order
    pub fn containers(&self) -> &[ComposeService] {
        &self.containers
    }

    /// User-declared services only
    pub fn services(&self) -> impl Iterator<Item = &ComposeService> {
        self.containers.iter().filter(|c| !c.is_aws_sidecar)
    }

    /// Managed sidecars only
    pub fn managed_sidecars(&self) -> impl Iterator<Item = &ComposeService> {
        self.containers.iter().filter(|c| c.is_aws_sidecar)
    }

    /// Families this one must deploy after
    pub fn services_depends_on(&self) -> &BTreeSet<String> {
        &self.services_depends_on
    }

    /// Resolved compute aggregate
    pub fn compute(&self) -> &TaskCompute {
        &self.compute
    }

    fn require_phase(&self, attempted: &'static str, required: FamilyPhase) -> Result<()> {
        if self.phase != required {
            return Err(ComposeError::Ordering {
                family: self.name.clone(),
                attempted,
                required,
                current: self.phase,
            });
        }
        Ok(())
    }

    /// Phase 1: dependency resolution, platform checks, container ordering
    ///
    /// `service_families` maps every project service name to its family,
    /// so depends_on edges leaving this family become cross-family
    /// deployment dependencies instead of container start dependencies.
    pub fn init_family(&mut self, service_families: &BTreeMap<String, String>) -> Result<()> {
        self.require_phase("init_family", FamilyPhase::Created)?;

        for container in &self.containers {
            for dependency in container.depends_on.keys() {
                if let Some(dep_family) = service_families.get(dependency)
                    && dep_family != &self.name
                {
                    self.services_depends_on.insert(dep_family.clone());
                }
            }
        }

        self.reconcile_platform()?;
        self.resort()?;

        self.phase = FamilyPhase::ServicesSorted;
        debug!(family = %self.name, "Family initialized");
        Ok(())
    }

    /// Cross-service platform consistency: one task definition cannot mix
    /// CPU architectures, OS families or launch types
    fn reconcile_platform(&mut self) -> Result<()> {
        self.cpu_arch = reconcile_hint(
            &self.name,
            "CPU architecture",
            self.services().map(|s| (s.name.as_str(), s.cpu_arch)),
        )?;
        self.os_family = reconcile_hint(
            &self.name,
            "OS family",
            self.services().map(|s| (s.name.as_str(), s.os_family)),
        )?;
        self.launch_type = reconcile_hint(
            &self.name,
            "launch type",
            self.services().map(|s| (s.name.as_str(), s.launch_type)),
        )?
        .unwrap_or_default();
        Ok(())
    }

    fn resort(&mut self) -> Result<()> {
        ordering::resolve_order(&self.name, &mut self.containers)?;

        // Re-sorts re-run essential resolution; a warning already recorded
        // on an earlier pass must not repeat
        let mut new_warnings = Vec::new();
        ordering::resolve_essential(&mut self.containers, &mut new_warnings);
        for warning in new_warnings {
            if !self.warnings.contains(&warning) {
                self.warnings.push(warning);
            }
        }
        Ok(())
    }

    /// Insert a user-declared container after construction
    pub fn add_service(&mut self, service: ComposeService) -> Result<()> {
        if self.phase > FamilyPhase::ServicesSorted {
            return Err(ComposeError::Ordering {
                family: self.name.clone(),
                attempted: "add_service",
                required: FamilyPhase::ServicesSorted,
                current: self.phase,
            });
        }
        if self.containers.iter().any(|c| c.name == service.name) {
            return Err(ComposeError::inconsistent(
                &self.name,
                format!("duplicate container name '{}'", service.name),
            ));
        }

        self.declaration.push(service.name.clone());
        self.containers.push(service);
        if self.phase == FamilyPhase::ServicesSorted {
            self.resort()?;
        }
        Ok(())
    }

    /// Insert a managed sidecar; adding the same name twice is a warned no-op
    pub fn add_managed_sidecar(&mut self, mut sidecar: ComposeService) -> Result<()> {
        if self.phase > FamilyPhase::ServicesSorted {
            return Err(ComposeError::Ordering {
                family: self.name.clone(),
                attempted: "add_managed_sidecar",
                required: FamilyPhase::ServicesSorted,
                current: self.phase,
            });
        }
        if self.containers.iter().any(|c| c.name == sidecar.name) {
            warn!(family = %self.name, sidecar = %sidecar.name, "Sidecar already present, skipping");
            self.warnings.push(PolicyWarning::DuplicateSidecar { name: sidecar.name });
            return Ok(());
        }

        sidecar.is_aws_sidecar = true;
        self.declaration.push(sidecar.name.clone());
        self.containers.push(sidecar);
        if self.phase == FamilyPhase::ServicesSorted {
            self.resort()?;
        }
        Ok(())
    }

    /// Phase 1b: inject managed sidecars requested by cross-cutting flags
    pub fn inject_sidecars(&mut self) -> Result<()> {
        self.require_phase("inject_sidecars", FamilyPhase::ServicesSorted)?;

        let wants_xray = self.services().any(|s| s.wants_xray);
        let wants_cloudwatch = self.services().any(|s| s.wants_cloudwatch_agent);
        let wants_envoy = self.services().any(|s| s.wants_envoy);
        let firelens_options = self.merged_firelens_options();

        if let Some(options) = firelens_options {
            for container in self.containers.iter_mut().filter(|c| !c.is_aws_sidecar) {
                container.logging = LogSettings {
                    driver: Some("awsfirelens".to_string()),
                    options: BTreeMap::new(),
                };
                container
                    .depends_on
                    .insert(sidecars::FIRELENS_CONTAINER_NAME.to_string(), Some(StartCondition::Start));
            }
            let router = sidecars::firelens_router(&self.config.sidecar_images, &options);
            self.add_managed_sidecar(router)?;
        }

        if wants_xray {
            for container in self.containers.iter_mut().filter(|c| !c.is_aws_sidecar) {
                container.add_env_var("AWS_XRAY_DAEMON_ADDRESS", "127.0.0.1:2000");
            }
            let daemon = sidecars::xray_daemon(&self.config.sidecar_images);
            self.add_managed_sidecar(daemon)?;
        }

        if wants_cloudwatch {
            let agent = sidecars::cloudwatch_agent(&self.config.sidecar_images);
            self.add_managed_sidecar(agent)?;
        }

        if wants_envoy {
            for container in self.containers.iter_mut().filter(|c| !c.is_aws_sidecar) {
                container.depends_on.insert(sidecars::ENVOY_CONTAINER_NAME.to_string(), None);
            }
            let proxy = sidecars::envoy_proxy(&self.config.sidecar_images);
            self.add_managed_sidecar(proxy)?;
        }

        Ok(())
    }

    /// FireLens options from every declaring service, first writer wins per key
    fn merged_firelens_options(&self) -> Option<BTreeMap<String, String>> {
        let mut found = false;
        let mut merged = BTreeMap::new();
        for container in self.in_declaration_order() {
            if let Some(firelens) = &container.log_ext.firelens {
                found = true;
                for (key, value) in &firelens.options {
                    merged.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        found.then_some(merged)
    }

    /// Phase 2: fold every container's IAM hints into the two roles
    pub fn resolve_iam(&mut self) -> Result<()> {
        self.require_phase("resolve_iam", FamilyPhase::ServicesSorted)?;

        let mut warnings = Vec::new();
        let order: Vec<usize> = self.declaration_indices();
        let iam = &mut self.iam;
        for index in order {
            iam.merge_service(&self.containers[index], &mut warnings);
        }

        let secret_values: Vec<String> = {
            let mut seen = BTreeSet::new();
            self.containers
                .iter()
                .flat_map(|c| c.secrets.iter())
                .filter_map(|reference| self.secrets.get(&reference.source))
                .filter(|secret| seen.insert(secret.name.clone()))
                .map(|secret| secret.value_from().to_string())
                .collect()
        };
        iam.grant_secrets_read(&secret_values);

        self.warnings.extend(warnings);
        self.phase = FamilyPhase::IamResolved;
        Ok(())
    }

    /// Phase 3: aggregate CPU/RAM and resolve the Fargate tier
    pub fn resolve_compute(&mut self) -> Result<()> {
        self.require_phase("resolve_compute", FamilyPhase::IamResolved)?;

        let mut warnings = Vec::new();
        self.compute = TaskCompute::aggregate(&self.name, self.containers.iter(), &mut warnings)?;
        self.warnings.extend(warnings);

        self.phase = FamilyPhase::ComputeResolved;
        Ok(())
    }

    /// Phase 4: merge ports and ingress sources
    pub fn resolve_network(&mut self) -> Result<()> {
        self.require_phase("resolve_network", FamilyPhase::ComputeResolved)?;

        let mut warnings = Vec::new();
        let order = self.declaration_indices();
        let network = &mut self.network;
        let scaling = &mut self.scaling;
        for index in order {
            let container = &self.containers[index];
            network.merge_service(container, &mut warnings)?;
            scaling.merge_service(container, &mut warnings)?;
        }
        self.warnings.extend(warnings);

        self.phase = FamilyPhase::NetworkResolved;
        Ok(())
    }

    /// Assemble the task-level descriptor: container definitions in
    /// dependency order, shared CPU/RAM and network mode
    ///
    /// Requires the IAM and compute sub-objects to be initialized; valid
    /// from compute resolution onward.
    pub fn init_task_definition(&self) -> Result<TaskDefinitionDraft> {
        if self.phase < FamilyPhase::ComputeResolved {
            return Err(ComposeError::Ordering {
                family: self.name.clone(),
                attempted: "init_task_definition",
                required: FamilyPhase::ComputeResolved,
                current: self.phase,
            });
        }

        Ok(TaskDefinitionDraft {
            containers: self
                .containers
                .iter()
                .map(|c| ContainerDefinition::from_service(c, &self.secrets))
                .collect(),
            task_cpu: self.compute.fargate_cpu,
            task_ram_mb: self.compute.fargate_ram,
            network_mode: descriptor::NETWORK_MODE,
        })
    }

    /// Phase 5: headroom reclaim, lookups, descriptor assembly
    pub fn finalize_family_settings(&mut self, lookups: &LookupRegistry) -> Result<TaskDescriptor> {
        self.require_phase("finalize_family_settings", FamilyPhase::NetworkResolved)?;

        self.resolve_firelens_destination(lookups)?;
        self.reclaim_headroom();

        let log_retention_days = self.merged_log_retention();
        let replicas = self
            .services()
            .filter_map(|s| s.deploy.replicas)
            .max()
            .unwrap_or(self.config.default_replicas);
        let update_parallelism = self.services().filter_map(|s| s.deploy.update_parallelism).max();

        let policies = self.policy_specs();
        let mut service_depends_on: Vec<String> = policies.iter().map(|p| p.logical_id.clone()).collect();
        service_depends_on.sort();

        let scaling = self.scaling.is_enabled().then(|| ScalingDescriptor {
            min_replicas: self.scaling.range.map(|(min, _)| min).unwrap_or(replicas),
            max_replicas: self.scaling.range.map(|(_, max)| max).unwrap_or(replicas),
            cpu_target: self.scaling.cpu_target,
            memory_target: self.scaling.memory_target,
            scheduled: self.scaling.scheduled_actions().into_iter().cloned().collect(),
        });

        let mut volumes: Vec<String> = self
            .containers
            .iter()
            .flat_map(|c| c.volumes.iter().map(|m| m.source.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        volumes.retain(|name| self.volumes.contains_key(name));

        let draft = self.init_task_definition()?;

        let descriptor = TaskDescriptor {
            family_name: self.name.clone(),
            logical_name: self.logical_name.clone(),
            containers: draft.containers,
            task_cpu: draft.task_cpu,
            task_ram_mb: draft.task_ram_mb,
            network_mode: draft.network_mode,
            launch_type: self.launch_type,
            cpu_arch: self.cpu_arch,
            os_family: self.os_family,
            replicas,
            update_parallelism,
            execution_role: RoleRef::new(format!("{}ExecRole", self.logical_name)),
            task_role: RoleRef::new(format!("{}TaskRole", self.logical_name)),
            iam: self.iam.clone(),
            policies,
            ports: self.network.ports(),
            ingress_rules: self.network.ingress_rules(),
            assign_public_ip: self.network.assign_public_ip,
            scaling,
            service_depends_on,
            cross_family_depends: self.services_depends_on.clone(),
            log_retention_days,
            volumes,
        };

        self.phase = FamilyPhase::Finalized;
        info!(
            family = %self.name,
            containers = descriptor.containers.len(),
            cpu = descriptor.task_cpu,
            ram = descriptor.task_ram_mb,
            "Family finalized"
        );
        Ok(descriptor)
    }

    /// Run every phase in order and return the descriptor plus warnings
    pub fn build_all(
        mut self,
        service_families: &BTreeMap<String, String>,
        lookups: &LookupRegistry,
    ) -> Result<BuiltFamily> {
        self.init_family(service_families)?;
        self.inject_sidecars()?;
        self.resolve_iam()?;
        self.resolve_compute()?;
        self.resolve_network()?;
        let descriptor = self.finalize_family_settings(lookups)?;
        Ok(BuiltFamily {
            descriptor,
            warnings: self.warnings,
        })
    }

    /// Resolve a FireLens destination name against the lookup registry
    fn resolve_firelens_destination(&mut self, lookups: &LookupRegistry) -> Result<()> {
        let destination = self.in_declaration_order().find_map(|container| {
            container
                .log_ext
                .firelens
                .as_ref()
                .and_then(|f| f.destination.as_ref())
                .map(|d| (container.name.clone(), d.clone()))
        });

        let Some((referrer, destination)) = destination else {
            return Ok(());
        };

        let Some(output) = resolve_reference(lookups, &destination) else {
            return Err(ComposeError::Reference {
                kind: "resource",
                name: destination,
                referrer,
            });
        };
        let value = output.value.clone();

        if let Some(router) = self
            .containers
            .iter_mut()
            .find(|c| c.name == sidecars::FIRELENS_CONTAINER_NAME)
        {
            router.add_env_var("FLB_DESTINATION_ARN", value);
        }
        Ok(())
    }

    /// Grant a lone essential application container the task's headroom
    ///
    /// Its Cpu/Memory unset so the task-level values apply, keeping the
    /// originally declared memory as a reservation floor while it still
    /// fits under (task RAM - pinned sidecar RAM).
    fn reclaim_headroom(&mut self) {
        let app_count = self.services().count();
        if app_count != 1 {
            return;
        }

        let sidecars_ram: u32 = self
            .managed_sidecars()
            .filter_map(|s| s.declared_memory())
            .sum();
        let fargate_ram = self.compute.fargate_ram;

        let Some(main) = self.containers.iter_mut().find(|c| !c.is_aws_sidecar) else {
            return;
        };
        if !main.is_essential {
            return;
        }

        let declared = main.declared_memory();
        main.deploy.cpu_limit = None;
        main.deploy.cpu_reservation = None;
        main.deploy.memory_limit = None;
        main.deploy.memory_reservation = compute::reclaim_reservation(fargate_ram, sidecars_ram, declared);

        debug!(
            family = %self.name,
            container = %main.name,
            reservation = ?main.deploy.memory_reservation,
            "Reclaimed task headroom for main container"
        );
    }

    /// First-writer-wins merge of x-logging retention across services
    fn merged_log_retention(&mut self) -> u32 {
        let mut resolved: Option<u32> = None;
        let mut conflicts = Vec::new();
        for container in self.in_declaration_order() {
            if let Some(retention) = container.log_ext.retention_days {
                match resolved {
                    None => resolved = Some(retention),
                    Some(kept) if kept == retention => {}
                    Some(kept) => conflicts.push(PolicyWarning::LogRetentionConflict {
                        kept,
                        rejected: retention,
                    }),
                }
            }
        }
        for conflict in &conflicts {
            warn!(family = %self.name, "{conflict}");
        }
        self.warnings.extend(conflicts);
        resolved.unwrap_or(self.config.default_log_retention_days)
    }

    /// Inline policies as concrete template resources with stable ids
    fn policy_specs(&self) -> Vec<PolicySpec> {
        let mut specs = Vec::new();
        for (role, role_suffix, aggregate) in [
            (RoleKind::Execution, "ExecRole", &self.iam.execution),
            (RoleKind::Task, "TaskRole", &self.iam.task),
        ] {
            for (name, document) in &aggregate.inline_policies {
                specs.push(PolicySpec {
                    logical_id: format!("{}{}{}", self.logical_name, role_suffix, cfndoc::logical_id(name)),
                    role,
                    name: name.clone(),
                    document: document.clone(),
                });
            }
        }
        specs
    }

    fn in_declaration_order(&self) -> impl Iterator<Item = &ComposeService> {
        self.declaration
            .iter()
            .filter_map(|name| self.containers.iter().find(|c| &c.name == name))
    }

    fn declaration_indices(&self) -> Vec<usize> {
        self.declaration
            .iter()
            .filter_map(|name| self.containers.iter().position(|c| &c.name == name))
            .collect()
    }
}

/// Fold optional per-service platform hints into one family value
fn reconcile_hint<'a, T>(
    family: &str,
    what: &str,
    values: impl Iterator<Item = (&'a str, Option<T>)>,
) -> Result<Option<T>>
where
    T: Copy + PartialEq + std::fmt::Display,
{
    let mut resolved: Option<(&str, T)> = None;
    for (service, value) in values {
        let Some(value) = value else { continue };
        match resolved {
            None => resolved = Some((service, value)),
            Some((_, first_value)) if first_value == value => {}
            Some((first_service, first_value)) => {
                return Err(ComposeError::inconsistent(
                    family,
                    format!(
                        "{what} conflict: '{first_service}' declares {first_value}, '{service}' declares {value}"
                    ),
                ));
            }
        }
    }
    Ok(resolved.map(|(_, value)| value))
}
