//! Family networking: port merge and ingress-source merge
//!
//! Ports live in separate TCP and UDP maps keyed by target port; a later
//! service re-declaring a target+protocol pair overrides the earlier
//! published mapping (explicit last-write-wins, not a union). Ingress
//! sources union across services: external CIDRs deduplicate by CIDR value
//! alone - re-declaring a CIDR with a different description is a dropped
//! duplicate, not a second rule - and AWS-native sources deduplicate by id.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::compose::ports::{PortMapping, Protocol};
use crate::compose::{ComposeService, XNetwork};
use crate::error::{ComposeError, PolicyWarning, Result};

static IPV4_CIDR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})$").expect("ipv4 cidr regex"));

static IPV6_CIDR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f:]{2,39}/(\d{1,3})$").expect("ipv6 cidr regex"));

/// Kind of an AWS-native ingress source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwsSourceType {
    SecurityGroup,
    PrefixList,
}

impl std::fmt::Display for AwsSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SecurityGroup => write!(f, "SecurityGroup"),
            Self::PrefixList => write!(f, "PrefixList"),
        }
    }
}

/// One allowed ingress source after merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressSource {
    /// Containers of the same family
    SelfIngress,
    /// External CIDR block (IPv4 or IPv6)
    External { cidr: String, description: Option<String> },
    /// AWS security group or managed prefix list
    Aws {
        source_type: AwsSourceType,
        id: String,
        description: Option<String>,
    },
}

/// One security-group ingress rule descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub port: PortMapping,
    pub source: IngressSource,
}

/// Merged family-level networking policy
#[derive(Debug, Clone, Default)]
pub struct FamilyNetwork {
    tcp_ports: BTreeMap<u16, PortMapping>,
    udp_ports: BTreeMap<u16, PortMapping>,

    /// Allow family containers to reach each other's published ports
    pub self_ingress: bool,

    /// Assign a public IP to the service ENI
    pub assign_public_ip: bool,

    external_sources: Vec<(String, Option<String>)>,
    aws_sources: Vec<(AwsSourceType, String, Option<String>)>,
}

impl FamilyNetwork {
    /// Fold one service's ports and `x-network` block into the policy
    ///
    /// Must be called in service declaration order: port conflicts resolve
    /// last-write-wins.
    pub fn merge_service(&mut self, service: &ComposeService, warnings: &mut Vec<PolicyWarning>) -> Result<()> {
        for port in &service.ports {
            let map = match port.protocol {
                Protocol::Tcp => &mut self.tcp_ports,
                Protocol::Udp => &mut self.udp_ports,
            };
            if let Some(previous) = map.insert(port.target, *port)
                && previous.published != port.published
            {
                debug!(
                    service = %service.name,
                    target = port.target,
                    previous = previous.published,
                    published = port.published,
                    "Port target re-declared, later mapping wins"
                );
            }
        }

        self.merge_extension(&service.name, &service.network, warnings)
    }

    fn merge_extension(&mut self, service: &str, network: &XNetwork, warnings: &mut Vec<PolicyWarning>) -> Result<()> {
        self.self_ingress |= network.self_ingress;
        self.assign_public_ip |= network.assign_public_ip;

        for source in &network.ingress.external {
            validate_cidr(service, &source.cidr)?;
            if self.external_sources.iter().any(|(cidr, _)| cidr == &source.cidr) {
                warn!(service, cidr = %source.cidr, "Duplicate ingress CIDR dropped");
                warnings.push(PolicyWarning::DuplicateCidr {
                    cidr: source.cidr.clone(),
                });
                continue;
            }
            self.external_sources.push((source.cidr.clone(), source.description.clone()));
        }

        for source in &network.ingress.aws_sources {
            let source_type = parse_source_type(service, &source.source_type, &source.id)?;
            if self.aws_sources.iter().any(|(_, id, _)| id == &source.id) {
                warn!(service, id = %source.id, "Duplicate AWS ingress source dropped");
                warnings.push(PolicyWarning::DuplicateAwsSource {
                    source_id: source.id.clone(),
                });
                continue;
            }
            self.aws_sources
                .push((source_type, source.id.clone(), source.description.clone()));
        }

        Ok(())
    }

    /// All published ports: TCP first, then UDP, each sorted by target
    pub fn ports(&self) -> Vec<PortMapping> {
        self.tcp_ports.values().chain(self.udp_ports.values()).copied().collect()
    }

    /// The merged ingress sources, external first, in declaration order
    pub fn sources(&self) -> Vec<IngressSource> {
        let mut out = Vec::new();
        if self.self_ingress {
            out.push(IngressSource::SelfIngress);
        }
        for (cidr, description) in &self.external_sources {
            out.push(IngressSource::External {
                cidr: cidr.clone(),
                description: description.clone(),
            });
        }
        for (source_type, id, description) in &self.aws_sources {
            out.push(IngressSource::Aws {
                source_type: *source_type,
                id: id.clone(),
                description: description.clone(),
            });
        }
        out
    }

    /// Security-group rule descriptors: every port crossed with every source
    pub fn ingress_rules(&self) -> Vec<IngressRule> {
        let sources = self.sources();
        self.ports()
            .into_iter()
            .flat_map(|port| {
                sources.iter().map(move |source| IngressRule {
                    port,
                    source: source.clone(),
                })
            })
            .collect()
    }
}

fn parse_source_type(service: &str, source_type: &str, id: &str) -> Result<AwsSourceType> {
    let parsed = match source_type {
        "SecurityGroup" => AwsSourceType::SecurityGroup,
        "PrefixList" => AwsSourceType::PrefixList,
        other => {
            return Err(ComposeError::malformed(
                service,
                format!("unknown ingress source type '{other}'. Use: SecurityGroup or PrefixList"),
            ));
        }
    };

    let expected_prefix = match parsed {
        AwsSourceType::SecurityGroup => "sg-",
        AwsSourceType::PrefixList => "pl-",
    };
    if !id.starts_with(expected_prefix) {
        return Err(ComposeError::malformed(
            service,
            format!("{parsed} source id '{id}' does not start with '{expected_prefix}'"),
        ));
    }
    Ok(parsed)
}

/// Validate an IPv4 or IPv6 CIDR string
pub fn validate_cidr(service: &str, cidr: &str) -> Result<()> {
    if let Some(caps) = IPV4_CIDR_RE.captures(cidr) {
        for i in 1..=4 {
            let octet: u32 = caps[i].parse().unwrap_or(256);
            if octet > 255 {
                return Err(ComposeError::malformed(service, format!("invalid IPv4 CIDR '{cidr}'")));
            }
        }
        let prefix: u32 = caps[5].parse().unwrap_or(33);
        if prefix > 32 {
            return Err(ComposeError::malformed(
                service,
                format!("IPv4 prefix length in '{cidr}' exceeds /32"),
            ));
        }
        return Ok(());
    }

    if cidr.contains(':')
        && let Some(caps) = IPV6_CIDR_RE.captures(cidr)
    {
        let prefix: u32 = caps[1].parse().unwrap_or(129);
        if prefix > 128 {
            return Err(ComposeError::malformed(
                service,
                format!("IPv6 prefix length in '{cidr}' exceeds /128"),
            ));
        }
        return Ok(());
    }

    Err(ComposeError::malformed(
        service,
        format!("invalid CIDR '{cidr}', expected address/prefix"),
    ))
}
