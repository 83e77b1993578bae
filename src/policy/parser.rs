use crate::error::{MfwError, Result};
use crate::models::rule::{parse_protocol, protocol_name, Direction, Endpoint, EndpointLiteral, IpVersion, Rule};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Rule as written in a policy file. Addresses may use CIDR notation, in
/// which case the prefix stands in for the mask.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_protocol() -> String {
    "any".to_string()
}

fn default_direction() -> String {
    "in".to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    pub rules: Vec<PolicyRule>,
}

pub fn parse_direction(literal: &str) -> Option<Direction> {
    match literal.to_lowercase().as_str() {
        "in" | "ingress" | "input" => Some(Direction::In),
        "out" | "egress" | "output" => Some(Direction::Out),
        _ => None,
    }
}

impl PolicyRule {
    pub fn to_rule(&self) -> Result<Rule> {
        let direction = parse_direction(&self.direction).ok_or_else(|| {
            MfwError::Policy(format!(
                "Invalid direction '{}'. Must be in or out",
                self.direction
            ))
        })?;
        let protocol = parse_protocol(&self.protocol)?;

        let source = EndpointLiteral {
            address: self.src_ip.as_deref(),
            mask: self.src_mask.as_deref(),
            port: self.src_port.unwrap_or(0),
        };
        let destination = EndpointLiteral {
            address: self.dst_ip.as_deref(),
            mask: self.dst_mask.as_deref(),
            port: self.dst_port.unwrap_or(0),
        };

        Rule::from_literals(direction, &source, &destination, protocol)
    }

    /// Renders a stored rule in policy form, so a View listing can be fed
    /// back with `--policy`.
    pub fn from_rule(rule: &Rule) -> Self {
        let (src_ip, src_mask) = render_endpoint(&rule.source, rule.ip_version);
        let (dst_ip, dst_mask) = render_endpoint(&rule.destination, rule.ip_version);

        PolicyRule {
            direction: match rule.direction {
                Direction::In => "in".to_string(),
                Direction::Out => "out".to_string(),
            },
            src_ip,
            src_mask,
            src_port: (!rule.source.is_port_wildcard()).then_some(rule.source.port),
            dst_ip,
            dst_mask,
            dst_port: (!rule.destination.is_port_wildcard()).then_some(rule.destination.port),
            protocol: protocol_name(rule.protocol),
            description: None,
        }
    }
}

fn render_endpoint(endpoint: &Endpoint, version: IpVersion) -> (Option<String>, Option<String>) {
    let address = endpoint.address_ip(version);
    let address_set = endpoint.address.iter().any(|&b| b != 0);

    if !address_set && endpoint.is_address_wildcard() {
        // An all-zero IPv6 rule would otherwise read back as IPv4.
        return match version {
            IpVersion::V4 => (None, None),
            IpVersion::V6 => (Some(format!("{}/0", address)), None),
        };
    }

    match endpoint.prefix_len() {
        Some(prefix) => (Some(format!("{}/{}", address, prefix)), None),
        None => (
            Some(address.to_string()),
            Some(endpoint.mask_ip(version).to_string()),
        ),
    }
}

pub fn parse_policy_file<P: AsRef<Path>>(path: P) -> Result<PolicyFile> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        MfwError::Policy(format!("Failed to read policy file {}: {}", path.display(), e))
    })?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");

    let policy: PolicyFile = match extension {
        "json" => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };

    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::{PROTO_ANY, PROTO_TCP, PROTO_UDP};

    fn create_test_rule(direction: &str, src_ip: Option<&str>, protocol: &str) -> PolicyRule {
        PolicyRule {
            direction: direction.to_string(),
            src_ip: src_ip.map(str::to_string),
            protocol: protocol.to_string(),
            ..PolicyRule::default()
        }
    }

    #[test]
    fn test_valid_ipv4_parsing() {
        let rule = create_test_rule("in", Some("192.168.1.1"), "any").to_rule().unwrap();
        assert_eq!(rule.ip_version, IpVersion::V4);
        assert_eq!(rule.source.address_ip(IpVersion::V4).to_string(), "192.168.1.1");
        assert!(rule.source.is_address_wildcard());
    }

    #[test]
    fn test_valid_cidr_notation() {
        let rule = create_test_rule("in", Some("192.168.1.0/24"), "any").to_rule().unwrap();
        assert_eq!(rule.source.prefix_len(), Some(24));
    }

    #[test]
    fn test_invalid_cidr_prefix_too_large() {
        let result = create_test_rule("in", Some("192.168.1.0/33"), "any").to_rule();
        assert!(result.unwrap_err().to_string().contains("CIDR prefix must be <= 32"));
    }

    #[test]
    fn test_invalid_ip_address() {
        let result = create_test_rule("in", Some("invalid.ip.address"), "any").to_rule();
        assert!(result.unwrap_err().to_string().contains("Invalid source IP address"));
    }

    #[test]
    fn test_direction_aliases() {
        for (literal, expected) in [
            ("in", Direction::In),
            ("Ingress", Direction::In),
            ("input", Direction::In),
            ("OUT", Direction::Out),
            ("egress", Direction::Out),
        ] {
            let rule = create_test_rule(literal, None, "any").to_rule().unwrap();
            assert_eq!(rule.direction, expected);
        }
        assert!(create_test_rule("both", None, "any").to_rule().is_err());
    }

    #[test]
    fn test_protocols() {
        assert_eq!(create_test_rule("in", None, "tcp").to_rule().unwrap().protocol, PROTO_TCP);
        assert_eq!(create_test_rule("in", None, "UDP").to_rule().unwrap().protocol, PROTO_UDP);
        assert_eq!(create_test_rule("in", None, "").to_rule().unwrap().protocol, PROTO_ANY);
        assert!(create_test_rule("in", None, "icmp").to_rule().is_err());
    }

    #[test]
    fn test_explicit_mask() {
        let mut policy_rule = create_test_rule("out", None, "udp");
        policy_rule.dst_ip = Some("2001:db8::".to_string());
        policy_rule.dst_mask = Some("ffff:ffff::".to_string());
        policy_rule.dst_port = Some(53);

        let rule = policy_rule.to_rule().unwrap();
        assert!(rule.is_ipv6());
        assert_eq!(rule.destination.prefix_len(), Some(32));
        assert_eq!(rule.destination.port, 53);
    }

    #[test]
    fn test_from_rule_round_trip() {
        let cases = vec![
            create_test_rule("in", Some("10.0.0.0/24"), "tcp"),
            create_test_rule("out", None, "any"),
            create_test_rule("in", Some("10.9.9.9"), "udp"),
            PolicyRule {
                direction: "out".to_string(),
                dst_ip: Some("2001:db8::1".to_string()),
                dst_mask: Some("ffff::ffff".to_string()),
                src_port: Some(1234),
                ..PolicyRule::default()
            },
            PolicyRule {
                direction: "in".to_string(),
                src_mask: Some("ffff::".to_string()),
                ..PolicyRule::default()
            },
        ];

        for case in cases {
            let rule = case.to_rule().unwrap();
            let rendered = PolicyRule::from_rule(&rule);
            assert_eq!(rendered.to_rule().unwrap(), rule, "{:?}", rendered);
        }
    }
}
