//! Family autoscaling merge
//!
//! Folds per-service `x-scaling` blocks into one family policy. The
//! replica range widens to cover every declaration; target-tracking
//! values and scheduled actions resolve conflicts first-writer-wins with
//! a recorded warning, matching the engine's other merge policies.

use std::collections::BTreeMap;

use tracing::warn;

use crate::compose::ComposeService;
use crate::compose::extensions::XScheduledAction;
use crate::error::{ComposeError, PolicyWarning, Result};

/// One scheduled scaling action after merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledAction {
    pub name: String,
    pub schedule: String,
    pub min: u32,
    pub max: u32,
}

/// Merged family-level scaling policy
#[derive(Debug, Clone, Default)]
pub struct FamilyScaling {
    /// Replica range, widened across declarations
    pub range: Option<(u32, u32)>,

    /// CPU utilization target percent
    pub cpu_target: Option<u8>,

    /// Memory utilization target percent
    pub memory_target: Option<u8>,

    /// Scheduled actions by name
    pub scheduled: BTreeMap<String, ScheduledAction>,
}

impl FamilyScaling {
    /// Fold one service's `x-scaling` block into the policy
    pub fn merge_service(&mut self, service: &ComposeService, warnings: &mut Vec<PolicyWarning>) -> Result<()> {
        let Some(scaling) = &service.scaling else {
            return Ok(());
        };

        if let Some(range_text) = &scaling.range {
            let (min, max) = parse_range(&service.name, range_text)?;
            self.range = Some(match self.range {
                None => (min, max),
                Some((existing_min, existing_max)) => (existing_min.min(min), existing_max.max(max)),
            });
        }

        if let Some(tracking) = &scaling.target_tracking {
            if let Some(cpu) = tracking.cpu_percent {
                validate_percent(&service.name, "cpu-percent", cpu)?;
                merge_target(&mut self.cpu_target, "cpu", cpu, warnings);
            }
            if let Some(memory) = tracking.memory_percent {
                validate_percent(&service.name, "memory-percent", memory)?;
                merge_target(&mut self.memory_target, "memory", memory, warnings);
            }
        }

        for action in &scaling.scheduled {
            self.merge_scheduled(action, warnings);
        }

        Ok(())
    }

    fn merge_scheduled(&mut self, action: &XScheduledAction, warnings: &mut Vec<PolicyWarning>) {
        match self.scheduled.get(&action.name) {
            None => {
                self.scheduled.insert(
                    action.name.clone(),
                    ScheduledAction {
                        name: action.name.clone(),
                        schedule: action.schedule.clone(),
                        min: action.min,
                        max: action.max,
                    },
                );
            }
            Some(existing)
                if existing.schedule == action.schedule && existing.min == action.min && existing.max == action.max => {
            }
            Some(_) => {
                warn!(action = %action.name, "Scheduled action re-declared with different settings, keeping first");
                warnings.push(PolicyWarning::DuplicateScheduledAction {
                    name: action.name.clone(),
                });
            }
        }
    }

    /// Whether any scaling declaration survived the merge
    pub fn is_enabled(&self) -> bool {
        self.range.is_some() || !self.scheduled.is_empty()
    }

    /// Scheduled actions in name order
    pub fn scheduled_actions(&self) -> Vec<&ScheduledAction> {
        self.scheduled.values().collect()
    }
}

fn merge_target(slot: &mut Option<u8>, metric: &'static str, value: u8, warnings: &mut Vec<PolicyWarning>) {
    match slot {
        None => *slot = Some(value),
        Some(existing) if *existing == value => {}
        Some(existing) => {
            warn!(metric, kept = *existing, rejected = value, "Conflicting scaling target, keeping first");
            warnings.push(PolicyWarning::ScalingTargetConflict {
                metric: metric.to_string(),
                kept: *existing,
                rejected: value,
            });
        }
    }
}

/// Parse a "min-max" replica range
pub fn parse_range(service: &str, text: &str) -> Result<(u32, u32)> {
    let (min_text, max_text) = text
        .split_once('-')
        .ok_or_else(|| ComposeError::malformed(service, format!("invalid scaling range '{text}', expected 'min-max'")))?;

    let min: u32 = min_text
        .trim()
        .parse()
        .map_err(|_| ComposeError::malformed(service, format!("invalid scaling range minimum '{min_text}'")))?;
    let max: u32 = max_text
        .trim()
        .parse()
        .map_err(|_| ComposeError::malformed(service, format!("invalid scaling range maximum '{max_text}'")))?;

    if min > max {
        return Err(ComposeError::malformed(
            service,
            format!("scaling range '{text}' has min greater than max"),
        ));
    }
    Ok((min, max))
}

fn validate_percent(service: &str, field: &str, value: u8) -> Result<()> {
    if value == 0 || value > 100 {
        return Err(ComposeError::malformed(
            service,
            format!("{field} must be between 1 and 100, got {value}"),
        ));
    }
    Ok(())
}
