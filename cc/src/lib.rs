//! composecfn - compose-file to CloudFormation transpiler for ECS
//!
//! Reads Docker Compose files augmented with `x-*` extension keys and
//! emits CloudFormation templates describing ECS services, task
//! definitions, IAM roles, networking and scaling policies. The heart of
//! the crate is the task-family engine: services grouped by the
//! `ecs.task.family` deploy label become one ECS task definition +
//! service each, with per-service settings merged into one consistent
//! descriptor.
//!
//! # Core Concepts
//!
//! - **Deterministic output**: one invocation, one static artifact;
//!   re-rendering the same input yields the same template
//! - **Fail fast**: structural problems abort the whole render; there is
//!   no partial template
//! - **First writer wins**: conflicting non-structural declarations
//!   (permissions boundaries, log retention) keep the first value and
//!   record a warning
//!
//! # Modules
//!
//! - [`compose`] - compose file parsing and normalization
//! - [`family`] - the task-family composition engine
//! - [`render`] - template assembly from task descriptors
//! - [`resources`] - collaborator contracts (roles, lookups)
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod compose;
pub mod config;
pub mod error;
pub mod family;
pub mod render;
pub mod resources;

// Re-export commonly used types
pub use compose::{ComposeProject, ComposeService, PortMapping, Protocol, StartCondition};
pub use config::Config;
pub use error::{ComposeError, PolicyWarning, Result};
pub use family::{
    BuiltFamily, ComposeFamily, FamilyBuildConfig, FamilyPhase, TaskCompute, TaskDescriptor, TaskIam,
};
pub use render::render_project;
pub use resources::{AttributeOutput, AttributesOutputs, LookupRegistry, RoleProvider, RoleRef};
