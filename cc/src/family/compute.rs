//! Task compute aggregation and Fargate tier resolution
//!
//! Sums declared CPU/RAM across all containers of a family and maps the
//! result onto the nearest permitted Fargate (CPU, RAM) pair. Sums above
//! the largest tier clamp to it rather than fail: oversubscribing a task
//! is a sizing concern, not a structural one, so the engine warns and
//! emits the best tier it has.

use tracing::{debug, warn};

use crate::compose::ComposeService;
use crate::error::{ComposeError, PolicyWarning, Result};

/// Valid Fargate CPU tiers, in ascending order
pub const FARGATE_CPU_TIERS: [u32; 7] = [256, 512, 1024, 2048, 4096, 8192, 16384];

/// ECS hard floor for container-level CPU units and memory MB
pub const ECS_MIN_CPU: u32 = 128;
/// ECS hard floor for memory, in MB
pub const ECS_MIN_RAM_MB: u32 = 128;

/// Permitted RAM values (MB) for one CPU tier, ascending
pub fn fargate_ram_options(cpu_tier: u32) -> Vec<u32> {
    match cpu_tier {
        256 => vec![512, 1024, 2048],
        512 => (1..=4).map(|gb| gb * 1024).collect(),
        1024 => (2..=8).map(|gb| gb * 1024).collect(),
        2048 => (4..=16).map(|gb| gb * 1024).collect(),
        4096 => (8..=30).map(|gb| gb * 1024).collect(),
        8192 => (4..=15).map(|inc| inc * 4 * 1024).collect(),
        16384 => (4..=15).map(|inc| inc * 8 * 1024).collect(),
        _ => Vec::new(),
    }
}

/// Aggregated compute settings for one family
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCompute {
    /// Sum of declared container CPU units, after the 128 floor
    pub raw_cpu: u32,

    /// Sum of declared container RAM in MB, after the 128 floor
    pub raw_ram: u32,

    /// Selected Fargate CPU tier
    pub fargate_cpu: u32,

    /// Selected RAM value from the tier's allow-list
    pub fargate_ram: u32,
}

impl TaskCompute {
    /// Aggregate all containers of a family and resolve the Fargate tier
    pub fn aggregate<'a>(
        family: &str,
        containers: impl Iterator<Item = &'a ComposeService>,
        warnings: &mut Vec<PolicyWarning>,
    ) -> Result<Self> {
        let mut cpu_sum: u64 = 0;
        let mut ram_sum: u64 = 0;

        for container in containers {
            if let (Some(limit), Some(reservation)) =
                (container.deploy.memory_limit, container.deploy.memory_reservation)
                && reservation > limit
            {
                return Err(ComposeError::inconsistent(
                    family,
                    format!(
                        "container '{}' reserves {reservation}MB but limits memory to {limit}MB",
                        container.name
                    ),
                ));
            }
            cpu_sum += u64::from(container.declared_cpu().unwrap_or(0));
            ram_sum += u64::from(container.declared_memory().unwrap_or(0));
        }

        let raw_cpu = (cpu_sum.min(u64::from(u32::MAX)) as u32).max(ECS_MIN_CPU);
        let raw_ram = (ram_sum.min(u64::from(u32::MAX)) as u32).max(ECS_MIN_RAM_MB);

        let (fargate_cpu, fargate_ram) = resolve_tier(family, raw_cpu, raw_ram, warnings);

        debug!(
            family,
            raw_cpu, raw_ram, fargate_cpu, fargate_ram, "Resolved family compute"
        );

        Ok(Self {
            raw_cpu,
            raw_ram,
            fargate_cpu,
            fargate_ram,
        })
    }
}

/// Map raw (cpu, ram) sums to the nearest permitted Fargate pair
fn resolve_tier(family: &str, raw_cpu: u32, raw_ram: u32, warnings: &mut Vec<PolicyWarning>) -> (u32, u32) {
    let largest = *FARGATE_CPU_TIERS.last().expect("tier table is non-empty");

    let cpu = match FARGATE_CPU_TIERS.iter().find(|&&tier| tier >= raw_cpu) {
        Some(&tier) => tier,
        None => {
            warn!(
                family,
                requested = raw_cpu,
                clamped = largest,
                "Aggregate CPU exceeds largest Fargate tier, clamping"
            );
            warnings.push(PolicyWarning::ComputeClamped {
                axis: "cpu",
                requested: u64::from(raw_cpu),
                clamped: u64::from(largest),
            });
            largest
        }
    };

    let ram_options = fargate_ram_options(cpu);
    let ram_max = *ram_options.last().expect("every tier has RAM options");
    let ram = match ram_options.iter().find(|&&r| r >= raw_ram) {
        Some(&r) => r,
        None => {
            warn!(
                family,
                requested = raw_ram,
                clamped = ram_max,
                "Aggregate RAM exceeds tier maximum, clamping"
            );
            warnings.push(PolicyWarning::ComputeClamped {
                axis: "ram",
                requested: u64::from(raw_ram),
                clamped: u64::from(ram_max),
            });
            ram_max
        }
    };

    (cpu, ram)
}

/// Memory floor the main container keeps after headroom reclaim
///
/// Returns the reservation to set when granting a lone essential container
/// the task's remaining headroom: its originally declared memory, kept only
/// while that value still fits under (task RAM - pinned sidecar RAM).
pub fn reclaim_reservation(fargate_ram: u32, sidecars_ram: u32, declared_memory: Option<u32>) -> Option<u32> {
    let declared = declared_memory?;
    let headroom = fargate_ram.saturating_sub(sidecars_ram);
    if declared < headroom { Some(declared) } else { None }
}
