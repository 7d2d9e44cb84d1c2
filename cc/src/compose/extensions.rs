//! `x-*` extension block models
//!
//! Raw serde shapes for the extension keys this engine reads from a service
//! entry. Validation beyond structure (CIDR grammar, source-id prefixes,
//! range bounds) happens in the family merge engines, which is where the
//! conflicting-declaration policies live.

use std::collections::BTreeMap;

use serde::Deserialize;

/// `x-network:` - ingress and placement hints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct XNetwork {
    /// Allow traffic between containers of the same family
    pub self_ingress: bool,

    /// Assign a public IP to the service ENI
    pub assign_public_ip: bool,

    /// Ingress sources allowed to reach the family's published ports
    pub ingress: XIngress,
}

/// Ingress source declarations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct XIngress {
    /// External CIDR sources (IPv4 or IPv6)
    pub external: Vec<XExternalSource>,

    /// AWS-native sources (security groups, prefix lists)
    pub aws_sources: Vec<XAwsSource>,
}

/// One external CIDR source
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct XExternalSource {
    pub cidr: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One AWS-native ingress source
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct XAwsSource {
    /// Source kind: SecurityGroup or PrefixList
    #[serde(rename = "type")]
    pub source_type: String,

    /// sg-* or pl-* identifier
    pub id: String,

    #[serde(default)]
    pub description: Option<String>,
}

/// `x-iam:` - IAM hints folded into the family's task role
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct XIam {
    /// Managed policy ARNs attached to the task role
    pub managed_policies: Vec<String>,

    /// Inline policies attached to the task role
    pub policies: Vec<XInlinePolicy>,

    /// Permissions boundary applied to both family roles
    pub boundary: Option<String>,
}

/// One inline policy declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct XInlinePolicy {
    /// Policy name; autogenerated when omitted
    #[serde(default)]
    pub name: Option<String>,

    /// IAM policy document, passed through verbatim
    pub document: serde_json::Value,
}

/// `x-scaling:` - autoscaling declarations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct XScaling {
    /// Replica range as "min-max"
    pub range: Option<String>,

    /// Target-tracking policies
    pub target_tracking: Option<XTargetTracking>,

    /// Scheduled actions
    pub scheduled: Vec<XScheduledAction>,
}

/// Target-tracking utilization targets (percent)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct XTargetTracking {
    pub cpu_percent: Option<u8>,
    pub memory_percent: Option<u8>,
}

/// One scheduled scaling action
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct XScheduledAction {
    pub name: String,

    /// Schedule expression, e.g. "cron(0 22 * * ? *)"
    pub schedule: String,

    pub min: u32,
    pub max: u32,
}

/// `x-logging:` - log-group and FireLens settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct XLogging {
    /// CloudWatch log retention in days
    pub retention_days: Option<u32>,

    /// Log stream prefix override
    pub prefix: Option<String>,

    /// Route logs through a FireLens sidecar instead of awslogs
    pub firelens: Option<XFirelens>,
}

/// FireLens log-router settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct XFirelens {
    /// Name of a lookup resource (e.g. a Kinesis stream) logs are shipped to
    pub destination: Option<String>,

    /// Extra log-driver options passed to the router
    pub options: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x_network_full_block() {
        let network: XNetwork = serde_yaml::from_str(
            r#"
self-ingress: true
ingress:
  external:
    - cidr: 10.0.0.0/8
      description: corp
    - cidr: 192.168.0.0/16
  aws-sources:
    - type: SecurityGroup
      id: sg-0123456789abcdef0
"#,
        )
        .unwrap();

        assert!(network.self_ingress);
        assert_eq!(network.ingress.external.len(), 2);
        assert_eq!(network.ingress.external[0].description.as_deref(), Some("corp"));
        assert_eq!(network.ingress.aws_sources[0].source_type, "SecurityGroup");
    }

    #[test]
    fn test_x_iam_block() {
        let iam: XIam = serde_yaml::from_str(
            r#"
managed-policies:
  - arn:aws:iam::aws:policy/AmazonS3ReadOnlyAccess
policies:
  - name: KmsDecrypt
    document:
      Version: "2012-10-17"
      Statement:
        - Effect: Allow
          Action: kms:Decrypt
          Resource: "*"
boundary: arn:aws:iam::123456789012:policy/Boundary
"#,
        )
        .unwrap();

        assert_eq!(iam.managed_policies.len(), 1);
        assert_eq!(iam.policies[0].name.as_deref(), Some("KmsDecrypt"));
        assert!(iam.policies[0].document["Statement"].is_array());
        assert!(iam.boundary.is_some());
    }

    #[test]
    fn test_x_scaling_block() {
        let scaling: XScaling = serde_yaml::from_str(
            r#"
range: "1-10"
target-tracking:
  cpu-percent: 75
scheduled:
  - name: night
    schedule: cron(0 22 * * ? *)
    min: 0
    max: 0
"#,
        )
        .unwrap();

        assert_eq!(scaling.range.as_deref(), Some("1-10"));
        assert_eq!(scaling.target_tracking.unwrap().cpu_percent, Some(75));
        assert_eq!(scaling.scheduled[0].name, "night");
    }

    #[test]
    fn test_x_logging_block() {
        let logging: XLogging = serde_yaml::from_str(
            r#"
retention-days: 30
firelens:
  destination: orders-stream
  options:
    compression: gzip
"#,
        )
        .unwrap();

        assert_eq!(logging.retention_days, Some(30));
        let firelens = logging.firelens.unwrap();
        assert_eq!(firelens.destination.as_deref(), Some("orders-stream"));
        assert_eq!(firelens.options.get("compression").unwrap(), "gzip");
    }

    #[test]
    fn test_defaults_are_empty() {
        let network = XNetwork::default();
        assert!(!network.self_ingress);
        assert!(network.ingress.external.is_empty());

        let iam = XIam::default();
        assert!(iam.managed_policies.is_empty());
        assert!(iam.boundary.is_none());
    }
}
