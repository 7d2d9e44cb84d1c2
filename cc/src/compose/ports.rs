//! Port mapping parsing and validation
//!
//! Accepts both compose short-string syntax ("8080:80/udp") and the long
//! map syntax. Port ranges ("8000-8010") and host-IP bindings are rejected:
//! awsvpc task networking has no equivalent for either.

use serde::{Deserialize, Serialize};

use crate::error::{ComposeError, Result};

/// Transport protocol of a port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(format!("Unknown protocol: {s}. Use: tcp or udp")),
        }
    }
}

/// One container port mapping
///
/// Both ports must independently satisfy `1 <= port < 65536`; the u16
/// representation covers the upper bound, the parser rejects zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Container-side port
    pub target: u16,

    /// Host/load-balancer-side port
    pub published: u16,

    /// Transport protocol
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    /// Create a mapping, validating the 1..=65535 bounds
    pub fn new(service: &str, target: u16, published: u16, protocol: Protocol) -> Result<Self> {
        if target == 0 || published == 0 {
            return Err(ComposeError::malformed(
                service,
                format!("port 0 is not a valid port (target={target}, published={published})"),
            ));
        }
        Ok(Self {
            target,
            published,
            protocol,
        })
    }
}

/// Raw port entry as it appears in the compose file
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPort {
    /// Bare integer: `- 80`
    Number(u32),
    /// Short syntax: `- "8080:80/udp"`
    Short(String),
    /// Long syntax: `- target: 80 ...`
    Long(RawPortLong),
}

/// Long-form port entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPortLong {
    pub target: u32,
    #[serde(default)]
    pub published: Option<u32>,
    #[serde(default)]
    pub protocol: Option<String>,
    /// Accepted for compose compatibility, ignored (awsvpc has no host mode)
    #[serde(default)]
    pub mode: Option<String>,
}

/// Parse one raw port entry into a validated mapping
pub fn parse_port(service: &str, raw: &RawPort) -> Result<PortMapping> {
    match raw {
        RawPort::Number(n) => {
            let port = checked_port(service, *n)?;
            PortMapping::new(service, port, port, Protocol::Tcp)
        }
        RawPort::Short(spec) => parse_short_syntax(service, spec),
        RawPort::Long(long) => {
            let target = checked_port(service, long.target)?;
            let published = match long.published {
                Some(p) => checked_port(service, p)?,
                None => target,
            };
            let protocol = match long.protocol.as_deref() {
                Some(p) => p
                    .parse()
                    .map_err(|e: String| ComposeError::malformed(service, e))?,
                None => Protocol::Tcp,
            };
            PortMapping::new(service, target, published, protocol)
        }
    }
}

fn parse_short_syntax(service: &str, spec: &str) -> Result<PortMapping> {
    let (ports, protocol) = match spec.split_once('/') {
        Some((ports, proto)) => {
            let protocol: Protocol = proto
                .parse()
                .map_err(|e: String| ComposeError::malformed(service, e))?;
            (ports, protocol)
        }
        None => (spec, Protocol::Tcp),
    };

    if ports.contains('-') {
        return Err(ComposeError::malformed(
            service,
            format!("port range '{spec}' is not supported, declare each port explicitly"),
        ));
    }

    let segments: Vec<&str> = ports.split(':').collect();
    let (published, target) = match segments.as_slice() {
        [single] => {
            let port = parse_port_number(service, single)?;
            (port, port)
        }
        [published, target] => (
            parse_port_number(service, published)?,
            parse_port_number(service, target)?,
        ),
        _ => {
            return Err(ComposeError::malformed(
                service,
                format!("host-IP port binding '{spec}' is not supported with awsvpc networking"),
            ));
        }
    };

    PortMapping::new(service, target, published, protocol)
}

fn parse_port_number(service: &str, text: &str) -> Result<u16> {
    let n: u32 = text
        .trim()
        .parse()
        .map_err(|_| ComposeError::malformed(service, format!("invalid port '{text}'")))?;
    checked_port(service, n)
}

fn checked_port(service: &str, n: u32) -> Result<u16> {
    if n == 0 || n > u16::MAX as u32 {
        return Err(ComposeError::malformed(
            service,
            format!("port {n} is outside the valid range 1-65535"),
        ));
    }
    Ok(n as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short(spec: &str) -> Result<PortMapping> {
        parse_port("web", &RawPort::Short(spec.to_string()))
    }

    #[test]
    fn test_bare_number() {
        let mapping = parse_port("web", &RawPort::Number(80)).unwrap();
        assert_eq!(mapping.target, 80);
        assert_eq!(mapping.published, 80);
        assert_eq!(mapping.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_short_published_target() {
        let mapping = short("8080:80").unwrap();
        assert_eq!(mapping.published, 8080);
        assert_eq!(mapping.target, 80);
    }

    #[test]
    fn test_short_with_protocol() {
        let mapping = short("2000:2000/udp").unwrap();
        assert_eq!(mapping.protocol, Protocol::Udp);
    }

    #[test]
    fn test_short_single_port() {
        let mapping = short("443").unwrap();
        assert_eq!(mapping.target, 443);
        assert_eq!(mapping.published, 443);
    }

    #[test]
    fn test_range_rejected() {
        let err = short("8000-8010").unwrap_err();
        assert!(err.to_string().contains("range"));

        let err = short("8000-8010:80").unwrap_err();
        assert!(err.to_string().contains("range"));
    }

    #[test]
    fn test_host_ip_rejected() {
        let err = short("127.0.0.1:8080:80").unwrap_err();
        assert!(err.to_string().contains("host-IP"));
    }

    #[test]
    fn test_port_zero_rejected() {
        assert!(short("0").is_err());
        assert!(short("8080:0").is_err());
        assert!(parse_port("web", &RawPort::Number(0)).is_err());
    }

    #[test]
    fn test_port_too_large_rejected() {
        assert!(short("70000").is_err());
        assert!(parse_port("web", &RawPort::Number(65536)).is_err());
    }

    #[test]
    fn test_long_form_defaults() {
        let long = RawPortLong {
            target: 80,
            published: None,
            protocol: None,
            mode: None,
        };
        let mapping = parse_port("web", &RawPort::Long(long)).unwrap();
        assert_eq!(mapping.published, 80);
        assert_eq!(mapping.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_long_form_full() {
        let long = RawPortLong {
            target: 53,
            published: Some(5353),
            protocol: Some("udp".to_string()),
            mode: Some("ingress".to_string()),
        };
        let mapping = parse_port("dns", &RawPort::Long(long)).unwrap();
        assert_eq!(mapping.target, 53);
        assert_eq!(mapping.published, 5353);
        assert_eq!(mapping.protocol, Protocol::Udp);
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let err = short("80:80/sctp").unwrap_err();
        assert!(err.to_string().contains("sctp"));
    }
}
