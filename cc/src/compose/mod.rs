//! Compose file parsing and normalization
//!
//! Everything between the raw YAML document and the strongly typed
//! project model: per-service normalization, port/duration/size grammars,
//! extension blocks and cross-reference validation.

pub mod deploy;
pub mod extensions;
pub mod healthcheck;
pub mod ports;
pub mod project;
pub mod secret;
pub mod service;
pub mod volume;

pub use deploy::{DeploySettings, LABEL_ESSENTIAL, LABEL_TASK_FAMILY};
pub use extensions::{XIam, XLogging, XNetwork, XScaling};
pub use healthcheck::Healthcheck;
pub use ports::{PortMapping, Protocol};
pub use project::ComposeProject;
pub use secret::ComposeSecret;
pub use service::{
    ComposeService, ContainerDependency, CpuArchitecture, LaunchType, OsFamily, SecretReference, StartCondition,
    Ulimit, VolumeMount,
};
pub use volume::ComposeVolume;
