use crate::error::{MfwError, Result};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const PROTO_ANY: u8 = 0;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

pub const PORT_ANY: u16 = 0;

/// Width of the address and mask buffers, whatever the IP version.
pub const ADDR_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    pub fn to_u8(&self) -> u8 {
        match self {
            Direction::Out => 0,
            Direction::In => 1,
        }
    }

    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Direction::Out),
            1 => Some(Direction::In),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => f.pad("Out"),
            Direction::In => f.pad("In"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn to_u8(&self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }

    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            4 => Some(IpVersion::V4),
            6 => Some(IpVersion::V6),
            _ => None,
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => f.pad("IPv4"),
            IpVersion::V6 => f.pad("IPv6"),
        }
    }
}

/// Widens an address into the fixed 128-bit buffer. IPv4 octets land in
/// bytes 0..4 and the rest stay zero.
pub fn addr_to_bytes(addr: IpAddr) -> [u8; ADDR_LEN] {
    let mut buf = [0u8; ADDR_LEN];
    match addr {
        IpAddr::V4(v4) => buf[..4].copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => buf.copy_from_slice(&v6.octets()),
    }
    buf
}

pub fn bytes_to_addr(buf: &[u8; ADDR_LEN], version: IpVersion) -> IpAddr {
    match version {
        IpVersion::V4 => IpAddr::V4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3])),
        IpVersion::V6 => IpAddr::V6(Ipv6Addr::from(*buf)),
    }
}

/// Builds the mask buffer for a CIDR prefix length.
pub fn prefix_mask(version: IpVersion, prefix_len: u8) -> Result<[u8; ADDR_LEN]> {
    let width = match version {
        IpVersion::V4 => 32,
        IpVersion::V6 => 128,
    };
    if prefix_len > width {
        return Err(MfwError::usage(format!(
            "CIDR prefix must be <= {}, got {}",
            width, prefix_len
        )));
    }

    let mut mask = [0u8; ADDR_LEN];
    let mut remaining = prefix_len as usize;
    for byte in mask.iter_mut() {
        if remaining == 0 {
            break;
        }
        let bits = remaining.min(8);
        *byte = 0xFFu8 << (8 - bits);
        remaining -= bits;
    }
    Ok(mask)
}

/// One side of a rule: address, mask and port. An all-zero mask or a zero port
/// is a wildcard on that dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Endpoint {
    pub address: [u8; ADDR_LEN],
    pub mask: [u8; ADDR_LEN],
    pub port: u16,
}

impl Endpoint {
    pub const ANY: Endpoint = Endpoint {
        address: [0; ADDR_LEN],
        mask: [0; ADDR_LEN],
        port: PORT_ANY,
    };

    pub fn from_addrs(address: Option<IpAddr>, mask: Option<IpAddr>, port: u16) -> Self {
        Endpoint {
            address: address.map(addr_to_bytes).unwrap_or([0; ADDR_LEN]),
            mask: mask.map(addr_to_bytes).unwrap_or([0; ADDR_LEN]),
            port,
        }
    }

    pub fn is_address_wildcard(&self) -> bool {
        self.mask.iter().all(|&b| b == 0)
    }

    pub fn is_port_wildcard(&self) -> bool {
        self.port == PORT_ANY
    }

    pub fn address_ip(&self, version: IpVersion) -> IpAddr {
        bytes_to_addr(&self.address, version)
    }

    pub fn mask_ip(&self, version: IpVersion) -> IpAddr {
        bytes_to_addr(&self.mask, version)
    }

    /// Prefix length when the mask is contiguous, `None` otherwise.
    pub fn prefix_len(&self) -> Option<u8> {
        let ones: u32 = self.mask.iter().map(|b| b.count_ones()).sum();
        let contiguous = self
            .mask
            .iter()
            .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1))
            .skip(ones as usize)
            .all(|bit| bit == 0);
        contiguous.then_some(ones as u8)
    }

    fn high_bytes_clear(&self) -> bool {
        self.address[4..].iter().all(|&b| b == 0) && self.mask[4..].iter().all(|&b| b == 0)
    }
}

/// A single access-control entry. Rules have no identity beyond full field
/// equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rule {
    pub direction: Direction,
    pub ip_version: IpVersion,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub protocol: u8,
}

impl Rule {
    pub fn new(direction: Direction, ip_version: IpVersion) -> Self {
        Rule {
            direction,
            ip_version,
            source: Endpoint::ANY,
            destination: Endpoint::ANY,
            protocol: PROTO_ANY,
        }
    }

    pub fn with_source(mut self, source: Endpoint) -> Self {
        self.source = source;
        self
    }

    pub fn with_destination(mut self, destination: Endpoint) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn is_ipv6(&self) -> bool {
        self.ip_version == IpVersion::V6
    }

    /// Checks the representation invariant: an IPv4 rule only uses the first
    /// four bytes of each address and mask buffer.
    pub fn validate(&self) -> Result<()> {
        if self.ip_version == IpVersion::V4 {
            if !self.source.high_bytes_clear() {
                return Err(MfwError::MalformedRecord(
                    "IPv4 rule has a source address wider than 32 bits".to_string(),
                ));
            }
            if !self.destination.high_bytes_clear() {
                return Err(MfwError::MalformedRecord(
                    "IPv4 rule has a destination address wider than 32 bits".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Assembles a rule from user-supplied literals. The IP version follows
    /// the addresses (or, failing that, the masks) and defaults to IPv4.
    pub fn from_literals(
        direction: Direction,
        source: &EndpointLiteral<'_>,
        destination: &EndpointLiteral<'_>,
        protocol: u8,
    ) -> Result<Rule> {
        validate_protocol(protocol)?;

        let src = source.parse_address("source")?;
        let dst = destination.parse_address("destination")?;

        let src_version = src.map(|(a, _)| IpVersion::of(&a));
        let dst_version = dst.map(|(a, _)| IpVersion::of(&a));

        let version = match (src_version, dst_version) {
            (Some(s), Some(d)) if s != d => {
                return Err(MfwError::usage(
                    "Source and destination addresses must use the same IP version",
                ))
            }
            (Some(v), _) | (None, Some(v)) => v,
            (None, None) => source
                .mask_version()
                .or_else(|| destination.mask_version())
                .unwrap_or(IpVersion::V4),
        };

        let rule = Rule::new(direction, version)
            .with_source(source.to_endpoint(src, version, "source")?)
            .with_destination(destination.to_endpoint(dst, version, "destination")?)
            .with_protocol(protocol);
        rule.validate()?;
        Ok(rule)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<3}  {:<6}  {:<32} {:<5} {:<32} {:<5} {:<3}",
            self.direction,
            self.ip_version,
            self.source.address_ip(self.ip_version).to_string(),
            self.source.port,
            self.destination.address_ip(self.ip_version).to_string(),
            self.destination.port,
            self.protocol
        )
    }
}

/// Raw, unparsed address/mask/port literals for one side of a rule.
#[derive(Clone, Copy, Debug, Default)]
pub struct EndpointLiteral<'a> {
    pub address: Option<&'a str>,
    pub mask: Option<&'a str>,
    pub port: u16,
}

impl<'a> EndpointLiteral<'a> {
    /// Parses the address literal, which may carry a `/prefix` suffix.
    fn parse_address(&self, side: &str) -> Result<Option<(IpAddr, Option<u8>)>> {
        let Some(literal) = self.address else {
            return Ok(None);
        };

        let (addr, prefix) = match literal.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix.parse().map_err(|_| {
                    MfwError::usage(format!("Invalid CIDR prefix '{}' in {} address", prefix, side))
                })?;
                (addr, Some(prefix))
            }
            None => (literal, None),
        };

        let ip: IpAddr = addr
            .parse()
            .map_err(|_| MfwError::usage(format!("Invalid {} IP address '{}'", side, addr)))?;

        if prefix.is_some() && self.mask.is_some() {
            return Err(MfwError::usage(format!(
                "Give the {} mask either as a CIDR prefix or as a mask, not both",
                side
            )));
        }

        Ok(Some((ip, prefix)))
    }

    fn mask_version(&self) -> Option<IpVersion> {
        self.mask
            .and_then(|m| m.parse::<IpAddr>().ok())
            .map(|m| IpVersion::of(&m))
    }

    fn to_endpoint(
        &self,
        parsed: Option<(IpAddr, Option<u8>)>,
        version: IpVersion,
        side: &str,
    ) -> Result<Endpoint> {
        let mask = match (parsed.and_then(|(_, p)| p), self.mask) {
            (Some(prefix), _) => prefix_mask(version, prefix)?,
            (None, Some(literal)) => {
                let mask = parse_mask(literal, version).ok_or_else(|| {
                    MfwError::usage(match version {
                        IpVersion::V4 => format!("Invalid {} subnet mask", side),
                        IpVersion::V6 => format!("Invalid {} subnet mask (IPv6)", side),
                    })
                })?;
                addr_to_bytes(mask)
            }
            (None, None) => [0; ADDR_LEN],
        };

        Ok(Endpoint {
            address: parsed.map(|(a, _)| addr_to_bytes(a)).unwrap_or([0; ADDR_LEN]),
            mask,
            port: self.port,
        })
    }
}

/// Parses a dotted or colon mask literal of the given family.
pub fn parse_mask(literal: &str, version: IpVersion) -> Option<IpAddr> {
    match version {
        IpVersion::V4 => literal.parse::<Ipv4Addr>().ok().map(IpAddr::V4),
        IpVersion::V6 => literal.parse::<Ipv6Addr>().ok().map(IpAddr::V6),
    }
}

/// Input-side protocol restriction. The wire format carries any byte.
pub fn validate_protocol(protocol: u8) -> Result<()> {
    match protocol {
        PROTO_ANY | PROTO_TCP | PROTO_UDP => Ok(()),
        _ => Err(MfwError::usage("Invalid protocol number")),
    }
}

pub fn parse_protocol(literal: &str) -> Result<u8> {
    let protocol = match literal.to_lowercase().as_str() {
        "any" | "" => PROTO_ANY,
        "tcp" => PROTO_TCP,
        "udp" => PROTO_UDP,
        other => other
            .parse::<u8>()
            .map_err(|_| MfwError::usage("Invalid protocol number"))?,
    };
    validate_protocol(protocol)?;
    Ok(protocol)
}

pub fn protocol_name(protocol: u8) -> String {
    match protocol {
        PROTO_ANY => "any".to_string(),
        PROTO_TCP => "tcp".to_string(),
        PROTO_UDP => "udp".to_string(),
        other => other.to_string(),
    }
}
