//! Error taxonomy for the family-composition engine
//!
//! All variants are fatal: they propagate uncaught to the top of the
//! family build and abort the whole render, because a half-built family
//! must never be emitted. Non-fatal conditions are not errors here; they
//! are [`PolicyWarning`] values accumulated on the family and logged.

use thiserror::Error;

use crate::family::FamilyPhase;

/// Errors raised while parsing, composing or rendering a project
#[derive(Debug, Error)]
pub enum ComposeError {
    /// A service or family declaration violates structural expectations
    #[error("Malformed input in service '{service}': {reason}")]
    MalformedInput { service: String, reason: String },

    /// Cross-service conflict within one family
    #[error("Inconsistent family '{family}': {reason}")]
    Consistency { family: String, reason: String },

    /// A named dependency, secret, volume or resource does not resolve
    #[error("Unresolved {kind} reference '{name}' in '{referrer}'")]
    Reference {
        kind: &'static str,
        name: String,
        referrer: String,
    },

    /// A build phase was invoked before its prerequisite completed
    #[error("Family '{family}': {attempted} requires phase {required} but family is in {current}")]
    Ordering {
        family: String,
        attempted: &'static str,
        required: FamilyPhase,
        current: FamilyPhase,
    },

    #[error("Failed to parse compose file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Template assembly failed: {0}")]
    Template(#[from] cfndoc::CfnError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComposeError {
    /// Shorthand for a malformed-input error
    pub fn malformed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a family consistency error
    pub fn inconsistent(family: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Consistency {
            family: family.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the engine
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Non-fatal policy conflicts, resolved deterministically (first writer wins)
///
/// Recorded on the owning family in occurrence order and logged at warn
/// level at the point of detection, so the retained value is testable
/// without capturing log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyWarning {
    /// A later service declared a different permissions boundary
    BoundaryConflict { kept: String, rejected: String },

    /// The same CIDR was re-declared with a different description
    DuplicateCidr { cidr: String },

    /// The same AWS ingress source was re-declared
    DuplicateAwsSource { source_id: String },

    /// A managed sidecar was injected twice under the same name
    DuplicateSidecar { name: String },

    /// An `ecs.essential=no` label was ignored because of a healthcheck
    EssentialForcedByHealthcheck { service: String },

    /// A later service declared a different target-tracking value
    ScalingTargetConflict { metric: String, kept: u8, rejected: u8 },

    /// A scheduled scaling action name was re-declared
    DuplicateScheduledAction { name: String },

    /// A later service declared a different log retention
    LogRetentionConflict { kept: u32, rejected: u32 },

    /// Aggregate CPU or RAM exceeded the largest Fargate tier and was clamped
    ComputeClamped { axis: &'static str, requested: u64, clamped: u64 },
}

impl std::fmt::Display for PolicyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BoundaryConflict { kept, rejected } => {
                write!(f, "permissions boundary '{rejected}' ignored, keeping '{kept}'")
            }
            Self::DuplicateCidr { cidr } => write!(f, "duplicate ingress CIDR '{cidr}' dropped"),
            Self::DuplicateAwsSource { source_id } => {
                write!(f, "duplicate ingress source '{source_id}' dropped")
            }
            Self::DuplicateSidecar { name } => write!(f, "sidecar '{name}' already present, skipping"),
            Self::EssentialForcedByHealthcheck { service } => {
                write!(f, "service '{service}' has a healthcheck, essential=no ignored")
            }
            Self::ScalingTargetConflict { metric, kept, rejected } => {
                write!(f, "scaling target {metric}={rejected} ignored, keeping {kept}")
            }
            Self::DuplicateScheduledAction { name } => {
                write!(f, "scheduled action '{name}' already declared, keeping first")
            }
            Self::LogRetentionConflict { kept, rejected } => {
                write!(f, "log retention {rejected} ignored, keeping {kept}")
            }
            Self::ComputeClamped { axis, requested, clamped } => {
                write!(f, "aggregate {axis} {requested} exceeds largest Fargate tier, clamped to {clamped}")
            }
        }
    }
}
