use super::config::{Disposition, DispositionPolicy};
use super::store::RuleStore;
use crate::models::rule::{addr_to_bytes, Direction, Endpoint, IpVersion, Rule, ADDR_LEN, PROTO_ANY};
use std::net::SocketAddr;
use std::sync::Arc;

/// The header tuple of one live packet as seen by the classification engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Packet {
    pub direction: Direction,
    pub ip_version: IpVersion,
    pub src_addr: [u8; ADDR_LEN],
    pub src_port: u16,
    pub dst_addr: [u8; ADDR_LEN],
    pub dst_port: u16,
    pub protocol: u8,
}

impl Packet {
    /// Builds a packet from socket addresses. Source and destination are
    /// expected to share an address family; the source decides the version.
    pub fn new(direction: Direction, src: SocketAddr, dst: SocketAddr, protocol: u8) -> Self {
        Packet {
            direction,
            ip_version: IpVersion::of(&src.ip()),
            src_addr: addr_to_bytes(src.ip()),
            src_port: src.port(),
            dst_addr: addr_to_bytes(dst.ip()),
            dst_port: dst.port(),
            protocol,
        }
    }
}

fn address_matches(endpoint: &Endpoint, addr: &[u8; ADDR_LEN]) -> bool {
    if endpoint.is_address_wildcard() {
        return true;
    }

    endpoint
        .mask
        .iter()
        .zip(endpoint.address.iter())
        .zip(addr.iter())
        .all(|((mask, rule_byte), pkt_byte)| pkt_byte & mask == rule_byte & mask)
}

fn port_matches(rule_port: u16, packet_port: u16) -> bool {
    rule_port == 0 || rule_port == packet_port
}

fn protocol_matches(rule_proto: u8, packet_proto: u8) -> bool {
    rule_proto == PROTO_ANY || rule_proto == packet_proto
}

/// Exact match with wildcards: every dimension must agree, and a zero mask,
/// port or protocol never excludes a packet on its dimension.
pub fn rule_matches(rule: &Rule, packet: &Packet) -> bool {
    rule.direction == packet.direction
        && rule.ip_version == packet.ip_version
        && address_matches(&rule.source, &packet.src_addr)
        && address_matches(&rule.destination, &packet.dst_addr)
        && port_matches(rule.source.port, packet.src_port)
        && port_matches(rule.destination.port, packet.dst_port)
        && protocol_matches(rule.protocol, packet.protocol)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub disposition: Disposition,
    /// Store index of the rule that decided the packet, if any.
    pub matched: Option<usize>,
}

/// First-match-wins classifier over a shared rule store.
#[derive(Debug, Clone)]
pub struct Matcher {
    store: Arc<RuleStore>,
    policy: DispositionPolicy,
}

impl Matcher {
    pub fn new(store: Arc<RuleStore>, policy: DispositionPolicy) -> Self {
        Matcher { store, policy }
    }

    pub fn policy(&self) -> DispositionPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Scans one snapshot in insertion order and stops at the first match.
    pub fn first_match(&self, packet: &Packet) -> Option<(usize, Rule)> {
        let snapshot = self.store.enumerate();
        snapshot
            .iter()
            .enumerate()
            .find(|(_, rule)| rule_matches(rule, packet))
            .map(|(index, rule)| (index, *rule))
    }

    pub fn classify(&self, packet: &Packet) -> Verdict {
        match self.first_match(packet) {
            Some((index, _)) => Verdict {
                disposition: self.policy.on_match,
                matched: Some(index),
            },
            None => Verdict {
                disposition: self.policy.on_miss,
                matched: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::{PROTO_TCP, PROTO_UDP};

    fn web_rule() -> Rule {
        Rule::new(Direction::In, IpVersion::V4)
            .with_source(Endpoint::from_addrs(
                Some("10.0.0.0".parse().unwrap()),
                Some("255.255.255.0".parse().unwrap()),
                0,
            ))
            .with_destination(Endpoint::from_addrs(None, None, 443))
            .with_protocol(PROTO_TCP)
    }

    fn packet(src: &str, dst: &str, protocol: u8) -> Packet {
        Packet::new(Direction::In, src.parse().unwrap(), dst.parse().unwrap(), protocol)
    }

    #[test]
    fn test_rule_matches_subnet_and_port() {
        let rule = web_rule();
        assert!(rule_matches(&rule, &packet("10.0.0.5:51000", "93.0.0.1:443", PROTO_TCP)));
        assert!(!rule_matches(&rule, &packet("10.0.0.5:51000", "93.0.0.1:80", PROTO_TCP)));
        assert!(!rule_matches(&rule, &packet("10.0.1.5:51000", "93.0.0.1:443", PROTO_TCP)));
        assert!(!rule_matches(&rule, &packet("10.0.0.5:51000", "93.0.0.1:443", PROTO_UDP)));
    }

    #[test]
    fn test_direction_and_version_must_agree() {
        let rule = web_rule();
        let mut out = packet("10.0.0.5:51000", "93.0.0.1:443", PROTO_TCP);
        out.direction = Direction::Out;
        assert!(!rule_matches(&rule, &out));

        let any_v4 = Rule::new(Direction::In, IpVersion::V4);
        assert!(!rule_matches(&any_v4, &packet("[::1]:1", "[::2]:2", PROTO_TCP)));
        assert!(rule_matches(&any_v4, &packet("1.1.1.1:1", "2.2.2.2:2", PROTO_TCP)));
    }

    #[test]
    fn test_zero_mask_ignores_address() {
        let mut rule = web_rule();
        rule.source = Endpoint::from_addrs(Some("172.16.0.1".parse().unwrap()), None, 0);
        for src in ["1.2.3.4:9", "200.1.1.1:9", "10.0.0.5:9"] {
            assert!(rule_matches(&rule, &packet(src, "93.0.0.1:443", PROTO_TCP)));
        }
    }

    #[test]
    fn test_ipv6_prefix_match() {
        let rule = Rule::new(Direction::In, IpVersion::V6).with_source(Endpoint::from_addrs(
            Some("2001:db8::".parse().unwrap()),
            Some("ffff:ffff::".parse().unwrap()),
            0,
        ));
        assert!(rule_matches(&rule, &packet("[2001:db8::7]:1", "[::1]:2", PROTO_UDP)));
        assert!(!rule_matches(&rule, &packet("[2001:db9::7]:1", "[::1]:2", PROTO_UDP)));
    }

    #[test]
    fn test_classify_uses_policy() {
        let store = Arc::new(RuleStore::new());
        store.add(web_rule()).unwrap();
        let matcher = Matcher::new(
            Arc::clone(&store),
            DispositionPolicy {
                on_match: Disposition::Deny,
                on_miss: Disposition::Permit,
            },
        );

        let hit = matcher.classify(&packet("10.0.0.5:51000", "93.0.0.1:443", PROTO_TCP));
        assert_eq!(hit.disposition, Disposition::Deny);
        assert_eq!(hit.matched, Some(0));

        let miss = matcher.classify(&packet("10.0.0.5:51000", "93.0.0.1:80", PROTO_TCP));
        assert_eq!(miss.disposition, Disposition::Permit);
        assert_eq!(miss.matched, None);
    }

    #[test]
    fn test_first_match_wins() {
        let store = Arc::new(RuleStore::new());
        let broad = Rule::new(Direction::In, IpVersion::V4);
        store.add(web_rule()).unwrap();
        store.add(broad).unwrap();

        let matcher = Matcher::new(Arc::clone(&store), DispositionPolicy::default());
        let pkt = packet("10.0.0.5:51000", "93.0.0.1:443", PROTO_TCP);
        assert_eq!(matcher.first_match(&pkt), Some((0, web_rule())));

        store.remove(&web_rule());
        store.add(web_rule()).unwrap();
        assert_eq!(matcher.first_match(&pkt), Some((0, broad)));
    }
}
