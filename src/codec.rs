//! Fixed-width binary records exchanged with the classification engine.
//!
//! Layout (72 bytes, no padding):
//!
//! | offset | size | field                          |
//! |--------|------|--------------------------------|
//! | 0      | 1    | operation                      |
//! | 1      | 1    | direction (0 = Out, 1 = In)    |
//! | 2      | 1    | ip_version (4 or 6)            |
//! | 3      | 16   | source address                 |
//! | 19     | 16   | source mask                    |
//! | 35     | 2    | source port (network order)    |
//! | 37     | 16   | destination address            |
//! | 53     | 16   | destination mask               |
//! | 69     | 2    | destination port (network order) |
//! | 71     | 1    | protocol                       |
//!
//! An IPv4 address or mask fills the first four bytes of its 16-byte field
//! (offsets 3..7, 19..23, 37..41 and 53..57) in network order, and the
//! remaining twelve bytes are zero.

use crate::error::{MfwError, Result};
use crate::models::rule::{Direction, Endpoint, IpVersion, Rule, ADDR_LEN};
use std::io::{ErrorKind, Read};

pub const RECORD_LEN: usize = 72;

const OFF_OPERATION: usize = 0;
const OFF_DIRECTION: usize = 1;
const OFF_VERSION: usize = 2;
const OFF_SOURCE: usize = 3;
const ENDPOINT_LEN: usize = ADDR_LEN * 2 + 2;
const OFF_DESTINATION: usize = OFF_SOURCE + ENDPOINT_LEN;
const OFF_PROTOCOL: usize = OFF_DESTINATION + ENDPOINT_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    None,
    Add,
    Remove,
    View,
}

impl Operation {
    pub fn to_u8(&self) -> u8 {
        match self {
            Operation::None => 0,
            Operation::Add => 1,
            Operation::Remove => 2,
            Operation::View => 3,
        }
    }

    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Operation::None),
            1 => Some(Operation::Add),
            2 => Some(Operation::Remove),
            3 => Some(Operation::View),
            _ => None,
        }
    }
}

/// One rule plus the operation it is sent with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    pub operation: Operation,
    pub rule: Rule,
}

impl Record {
    pub fn new(operation: Operation, rule: Rule) -> Self {
        Record { operation, rule }
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[OFF_OPERATION] = self.operation.to_u8();
        buf[OFF_DIRECTION] = self.rule.direction.to_u8();
        buf[OFF_VERSION] = self.rule.ip_version.to_u8();
        put_endpoint(&mut buf[OFF_SOURCE..OFF_DESTINATION], &self.rule.source);
        put_endpoint(&mut buf[OFF_DESTINATION..OFF_PROTOCOL], &self.rule.destination);
        buf[OFF_PROTOCOL] = self.rule.protocol;
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Record> {
        if bytes.len() != RECORD_LEN {
            return Err(MfwError::bad_length(bytes.len()));
        }

        let operation = Operation::from_u8(bytes[OFF_OPERATION]).ok_or_else(|| {
            MfwError::MalformedRecord(format!("unknown operation {}", bytes[OFF_OPERATION]))
        })?;
        let direction = Direction::from_u8(bytes[OFF_DIRECTION]).ok_or_else(|| {
            MfwError::MalformedRecord(format!("unknown direction {}", bytes[OFF_DIRECTION]))
        })?;
        let ip_version = IpVersion::from_u8(bytes[OFF_VERSION]).ok_or_else(|| {
            MfwError::MalformedRecord(format!("unknown IP version {}", bytes[OFF_VERSION]))
        })?;

        let rule = Rule {
            direction,
            ip_version,
            source: get_endpoint(&bytes[OFF_SOURCE..OFF_DESTINATION]),
            destination: get_endpoint(&bytes[OFF_DESTINATION..OFF_PROTOCOL]),
            protocol: bytes[OFF_PROTOCOL],
        };
        rule.validate()?;

        Ok(Record { operation, rule })
    }
}

pub fn encode(rule: &Rule, operation: Operation) -> [u8; RECORD_LEN] {
    Record::new(operation, *rule).encode()
}

pub fn decode(bytes: &[u8]) -> Result<Rule> {
    Record::decode(bytes).map(|record| record.rule)
}

fn put_endpoint(buf: &mut [u8], endpoint: &Endpoint) {
    buf[..ADDR_LEN].copy_from_slice(&endpoint.address);
    buf[ADDR_LEN..ADDR_LEN * 2].copy_from_slice(&endpoint.mask);
    buf[ADDR_LEN * 2..ENDPOINT_LEN].copy_from_slice(&endpoint.port.to_be_bytes());
}

fn get_endpoint(buf: &[u8]) -> Endpoint {
    let mut endpoint = Endpoint::ANY;
    endpoint.address.copy_from_slice(&buf[..ADDR_LEN]);
    endpoint.mask.copy_from_slice(&buf[ADDR_LEN..ADDR_LEN * 2]);
    endpoint.port = u16::from_be_bytes([buf[ADDR_LEN * 2], buf[ADDR_LEN * 2 + 1]]);
    endpoint
}

/// Reads consecutive records from a byte stream until end-of-stream. A short
/// trailing fragment ends the stream rather than counting as corruption.
pub struct RecordReader<R> {
    inner: R,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        RecordReader { inner, done: false }
    }

    fn fill(&mut self, buf: &mut [u8; RECORD_LEN]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < RECORD_LEN {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Rule>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = [0u8; RECORD_LEN];
        match self.fill(&mut buf) {
            Ok(RECORD_LEN) => Some(decode(&buf)),
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                log::debug!("Ignoring {} trailing bytes after last complete record", n);
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::{PROTO_TCP, PROTO_UDP};
    use std::io::Cursor;
    use std::net::IpAddr;

    fn sample_v4() -> Rule {
        Rule::new(Direction::In, IpVersion::V4)
            .with_source(Endpoint::from_addrs(
                Some("10.0.0.0".parse().unwrap()),
                Some("255.255.255.0".parse().unwrap()),
                0,
            ))
            .with_destination(Endpoint::from_addrs(None, None, 443))
            .with_protocol(PROTO_TCP)
    }

    fn sample_v6() -> Rule {
        let addr: IpAddr = "2001:db8::1".parse().unwrap();
        let mask: IpAddr = "ffff:ffff:ffff:ffff::".parse().unwrap();
        Rule::new(Direction::Out, IpVersion::V6)
            .with_destination(Endpoint::from_addrs(Some(addr), Some(mask), 53))
            .with_protocol(PROTO_UDP)
    }

    #[test]
    fn test_layout_offsets() {
        assert_eq!(OFF_DESTINATION, 37);
        assert_eq!(OFF_PROTOCOL, 71);
        assert_eq!(OFF_PROTOCOL + 1, RECORD_LEN);
    }

    #[test]
    fn test_encode_v4_layout() {
        let bytes = encode(&sample_v4(), Operation::Add);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes[2], 4);
        assert_eq!(&bytes[3..7], &[10, 0, 0, 0]);
        assert!(bytes[7..19].iter().all(|&b| b == 0));
        assert_eq!(&bytes[19..23], &[255, 255, 255, 0]);
        // destination port 443 in network order
        assert_eq!(&bytes[69..71], &[0x01, 0xBB]);
        assert_eq!(bytes[71], PROTO_TCP);
    }

    #[test]
    fn test_round_trip() {
        for (rule, op) in [
            (sample_v4(), Operation::Add),
            (sample_v4(), Operation::Remove),
            (sample_v6(), Operation::Add),
            (sample_v6(), Operation::View),
        ] {
            let decoded = Record::decode(&encode(&rule, op)).unwrap();
            assert_eq!(decoded, Record::new(op, rule));
        }
    }

    #[test]
    fn test_decode_wrong_length() {
        let bytes = encode(&sample_v4(), Operation::Add);
        assert!(matches!(
            decode(&bytes[..RECORD_LEN - 1]),
            Err(MfwError::MalformedRecord(_))
        ));

        let mut long = bytes.to_vec();
        long.push(0);
        assert!(decode(&long).is_err());
    }

    #[test]
    fn test_decode_bad_tags() {
        let mut bytes = encode(&sample_v4(), Operation::Add);
        bytes[OFF_VERSION] = 5;
        assert!(decode(&bytes).is_err());

        let mut bytes = encode(&sample_v4(), Operation::Add);
        bytes[OFF_DIRECTION] = 7;
        assert!(decode(&bytes).is_err());

        let mut bytes = encode(&sample_v4(), Operation::Add);
        bytes[OFF_OPERATION] = 9;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_keeps_any_protocol_byte() {
        let mut bytes = encode(&sample_v4(), Operation::Add);
        bytes[OFF_PROTOCOL] = 1;
        assert_eq!(decode(&bytes).unwrap().protocol, 1);
    }

    #[test]
    fn test_reader_ignores_trailing_fragment() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode(&sample_v4(), Operation::View));
        stream.extend_from_slice(&encode(&sample_v6(), Operation::View));
        stream.extend_from_slice(&[1, 2, 3]);

        let rules: Vec<Rule> = RecordReader::new(Cursor::new(stream))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rules, vec![sample_v4(), sample_v6()]);
    }

    #[test]
    fn test_reader_empty_stream() {
        let mut reader = RecordReader::new(Cursor::new(Vec::new()));
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }
}
