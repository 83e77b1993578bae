use super::{ControlChannel, STATUS_FULL, STATUS_MALFORMED, STATUS_OK, STATUS_UNSUPPORTED};
use crate::codec::{self, Operation, Record, RECORD_LEN};
use crate::error::{MfwError, Result};
use crate::models::rule::{Direction, IpVersion, Rule};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

/// Acknowledged protocol over the engine's Unix socket. Every request is a
/// single length-prefixed frame, so the engine either applies the whole
/// record or nothing.
#[derive(Debug, Clone)]
pub struct SocketChannel {
    path: PathBuf,
}

impl SocketChannel {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        SocketChannel {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.path).map_err(|e| MfwError::ChannelOpen {
            path: self.path.display().to_string(),
            source: e,
        })
    }

    fn send_frame(stream: &mut UnixStream, record: &Record) -> Result<()> {
        let mut frame = [0u8; 2 + RECORD_LEN];
        frame[..2].copy_from_slice(&(RECORD_LEN as u16).to_be_bytes());
        frame[2..].copy_from_slice(&record.encode());
        stream.write_all(&frame)?;
        stream.flush()?;
        Ok(())
    }
}

impl ControlChannel for SocketChannel {
    fn submit(&mut self, record: &Record) -> Result<()> {
        let mut stream = self.connect()?;
        Self::send_frame(&mut stream, record)?;

        let mut status = [0u8; 1];
        stream.read_exact(&mut status)?;
        match status[0] {
            STATUS_OK => Ok(()),
            STATUS_MALFORMED => Err(MfwError::Rejected("malformed record".to_string())),
            STATUS_FULL => Err(MfwError::Rejected("rule store is full".to_string())),
            STATUS_UNSUPPORTED => Err(MfwError::Rejected(format!(
                "unsupported operation {:?}",
                record.operation
            ))),
            other => Err(MfwError::Rejected(format!("unknown status {}", other))),
        }
    }

    fn rules(&mut self) -> Result<Vec<Rule>> {
        let mut stream = self.connect()?;
        // View carries no rule fields; the engine ignores them.
        let probe = Rule::new(Direction::In, IpVersion::V4);
        Self::send_frame(&mut stream, &Record::new(Operation::View, probe))?;

        let mut rules = Vec::new();
        loop {
            let mut len = [0u8; 2];
            stream.read_exact(&mut len)?;
            let len = u16::from_be_bytes(len) as usize;
            if len == 0 {
                break;
            }
            if len != RECORD_LEN {
                return Err(MfwError::bad_length(len));
            }

            let mut buf = [0u8; RECORD_LEN];
            stream.read_exact(&mut buf)?;
            rules.push(codec::decode(&buf)?);
        }

        log::debug!("Read {} rules from {}", rules.len(), self.path.display());
        Ok(rules)
    }
}
