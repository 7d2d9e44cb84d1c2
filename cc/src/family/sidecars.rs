//! Managed sidecar definitions
//!
//! Builders for the auxiliary containers the engine injects based on
//! cross-cutting feature flags: the X-Ray daemon, the CloudWatch agent,
//! the FireLens log router and the App Mesh Envoy proxy. Each sidecar
//! pins its own CPU/RAM (so the main container can reclaim the rest of
//! the task's headroom) and carries its own IAM hints, which the normal
//! aggregation pass folds in like any other container's.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compose::deploy::DeploySettings;
use crate::compose::ports::{PortMapping, Protocol};
use crate::compose::service::{ComposeService, LogSettings, StartCondition};
use crate::compose::{Healthcheck, XIam, XLogging, XNetwork};

/// Container name of the injected X-Ray daemon
pub const XRAY_CONTAINER_NAME: &str = "xray-daemon";
/// Container name of the injected CloudWatch agent
pub const CLOUDWATCH_AGENT_CONTAINER_NAME: &str = "cw-agent";
/// Container name of the injected FireLens log router
pub const FIRELENS_CONTAINER_NAME: &str = "log-router";
/// Container name of the injected Envoy proxy
pub const ENVOY_CONTAINER_NAME: &str = "envoy";

/// Default sidecar images, overridable via tool configuration
pub const DEFAULT_XRAY_IMAGE: &str = "public.ecr.aws/xray/aws-xray-daemon:latest";
pub const DEFAULT_CLOUDWATCH_AGENT_IMAGE: &str = "public.ecr.aws/cloudwatch-agent/cloudwatch-agent:latest";
pub const DEFAULT_FIRELENS_IMAGE: &str = "public.ecr.aws/aws-observability/aws-for-fluent-bit:stable";
pub const DEFAULT_ENVOY_IMAGE: &str = "public.ecr.aws/appmesh/aws-appmesh-envoy:v1.27.3.0-prod";

/// Sidecar image overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarImages {
    pub xray: String,
    #[serde(rename = "cloudwatch-agent")]
    pub cloudwatch_agent: String,
    pub firelens: String,
    pub envoy: String,
}

impl Default for SidecarImages {
    fn default() -> Self {
        Self {
            xray: DEFAULT_XRAY_IMAGE.to_string(),
            cloudwatch_agent: DEFAULT_CLOUDWATCH_AGENT_IMAGE.to_string(),
            firelens: DEFAULT_FIRELENS_IMAGE.to_string(),
            envoy: DEFAULT_ENVOY_IMAGE.to_string(),
        }
    }
}

/// The X-Ray tracing daemon: UDP 2000, write access to X-Ray
pub fn xray_daemon(images: &SidecarImages) -> ComposeService {
    let mut sidecar = sidecar_base(XRAY_CONTAINER_NAME, &images.xray, 32, 256);
    sidecar.ports = vec![PortMapping {
        target: 2000,
        published: 2000,
        protocol: Protocol::Udp,
    }];
    sidecar.iam.managed_policies = vec!["arn:aws:iam::aws:policy/AWSXRayDaemonWriteAccess".to_string()];
    sidecar
}

/// The CloudWatch agent for custom/Prometheus metrics
pub fn cloudwatch_agent(images: &SidecarImages) -> ComposeService {
    let mut sidecar = sidecar_base(CLOUDWATCH_AGENT_CONTAINER_NAME, &images.cloudwatch_agent, 64, 256);
    sidecar.iam.managed_policies = vec!["arn:aws:iam::aws:policy/CloudWatchAgentServerPolicy".to_string()];
    sidecar.environment.insert(
        "CW_CONFIG_CONTENT".to_string(),
        r#"{"logs":{"metrics_collected":{"emf":{}}}}"#.to_string(),
    );
    sidecar
}

/// The FireLens log router (fluent-bit)
///
/// Application containers gain a START dependency on the router and have
/// their log driver switched to awsfirelens; the router itself keeps
/// awslogs so its own output stays observable.
pub fn firelens_router(images: &SidecarImages, options: &BTreeMap<String, String>) -> ComposeService {
    let mut sidecar = sidecar_base(FIRELENS_CONTAINER_NAME, &images.firelens, 64, 128);
    sidecar.environment = options
        .iter()
        .map(|(k, v)| (format!("FLB_{}", k.to_uppercase().replace('-', "_")), v.clone()))
        .collect();
    sidecar.iam.managed_policies = vec!["arn:aws:iam::aws:policy/CloudWatchLogsFullAccess".to_string()];
    sidecar
}

/// The App Mesh Envoy proxy
///
/// Mesh wiring itself is resolved elsewhere; the proxy container ships
/// with the standard liveness check so dependents wait for HEALTHY.
pub fn envoy_proxy(images: &SidecarImages) -> ComposeService {
    let mut sidecar = sidecar_base(ENVOY_CONTAINER_NAME, &images.envoy, 128, 256);
    sidecar.healthcheck = Some(Healthcheck {
        command: vec![
            "CMD-SHELL".to_string(),
            "curl -s http://localhost:9901/server_info | grep -q LIVE".to_string(),
        ],
        interval: 5,
        timeout: 2,
        retries: 3,
        start_period: 10,
    });
    sidecar.container_start_condition = StartCondition::Healthy;
    sidecar.ports = vec![PortMapping {
        target: 9901,
        published: 9901,
        protocol: Protocol::Tcp,
    }];
    sidecar
}

fn sidecar_base(name: &str, image: &str, cpu: u32, ram_mb: u32) -> ComposeService {
    ComposeService {
        name: name.to_string(),
        logical_name: cfndoc::logical_id(name),
        image: image.to_string(),
        command: None,
        ports: Vec::new(),
        environment: BTreeMap::new(),
        secrets: Vec::new(),
        volumes: Vec::new(),
        healthcheck: None,
        depends_on: BTreeMap::new(),
        deploy: DeploySettings {
            cpu_limit: Some(cpu),
            memory_limit: Some(ram_mb),
            ..DeploySettings::default()
        },
        logging: LogSettings::default(),
        ulimits: Vec::new(),
        network: XNetwork::default(),
        iam: XIam::default(),
        scaling: None,
        log_ext: XLogging::default(),
        wants_xray: false,
        wants_cloudwatch_agent: false,
        wants_envoy: false,
        launch_type: None,
        cpu_arch: None,
        os_family: None,
        is_essential: false,
        is_aws_sidecar: true,
        container_start_condition: StartCondition::Start,
        start_dependencies: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xray_daemon_shape() {
        let sidecar = xray_daemon(&SidecarImages::default());
        assert_eq!(sidecar.name, XRAY_CONTAINER_NAME);
        assert!(sidecar.is_aws_sidecar);
        assert!(!sidecar.is_essential);
        assert_eq!(sidecar.deploy.cpu_limit, Some(32));
        assert_eq!(sidecar.deploy.memory_limit, Some(256));
        assert_eq!(sidecar.ports[0].protocol, Protocol::Udp);
        assert_eq!(sidecar.ports[0].target, 2000);
        assert!(sidecar.iam.managed_policies[0].contains("AWSXRayDaemonWriteAccess"));
    }

    #[test]
    fn test_firelens_router_options_become_env() {
        let mut options = BTreeMap::new();
        options.insert("compression".to_string(), "gzip".to_string());
        options.insert("log-level".to_string(), "info".to_string());

        let sidecar = firelens_router(&SidecarImages::default(), &options);
        assert_eq!(sidecar.environment.get("FLB_COMPRESSION").unwrap(), "gzip");
        assert_eq!(sidecar.environment.get("FLB_LOG_LEVEL").unwrap(), "info");
    }

    #[test]
    fn test_envoy_waits_on_health() {
        let sidecar = envoy_proxy(&SidecarImages::default());
        assert!(sidecar.healthcheck.is_some());
        assert_eq!(sidecar.container_start_condition, StartCondition::Healthy);
    }

    #[test]
    fn test_image_overrides() {
        let images = SidecarImages {
            xray: "registry.internal/xray:pinned".to_string(),
            ..SidecarImages::default()
        };
        assert_eq!(xray_daemon(&images).image, "registry.internal/xray:pinned");
        assert_eq!(cloudwatch_agent(&images).image, DEFAULT_CLOUDWATCH_AGENT_IMAGE);
    }

    #[test]
    fn test_sidecar_images_config_shape() {
        let images: SidecarImages = serde_yaml::from_str(
            r#"
xray: custom/xray:1
cloudwatch-agent: custom/cwagent:1
"#,
        )
        .unwrap();
        assert_eq!(images.xray, "custom/xray:1");
        assert_eq!(images.cloudwatch_agent, "custom/cwagent:1");
        assert_eq!(images.firelens, DEFAULT_FIRELENS_IMAGE);
    }
}
