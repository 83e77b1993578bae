use super::ControlChannel;
use crate::codec::{Record, RecordReader, RECORD_LEN};
use crate::error::{MfwError, Result};
use crate::models::rule::Rule;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_DEVICE_PATH: &str = "/dev/mfw_dev";

/// Raw stream protocol over a device node: one fixed-size record per write,
/// fixed-size records back on read. The engine sends no acknowledgement.
#[derive(Debug, Clone)]
pub struct DeviceChannel {
    path: PathBuf,
}

impl DeviceChannel {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        DeviceChannel {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_err(&self, source: std::io::Error) -> MfwError {
        MfwError::ChannelOpen {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl Default for DeviceChannel {
    fn default() -> Self {
        DeviceChannel::new(DEFAULT_DEVICE_PATH)
    }
}

/// Writes `buf` until the sink stops accepting bytes and reports how many
/// went through.
fn write_partial(sink: &mut impl Write, buf: &[u8]) -> std::io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match sink.write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if written > 0 => {
                log::debug!("Write stopped after {} bytes: {}", written, e);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

impl ControlChannel for DeviceChannel {
    fn submit(&mut self, record: &Record) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.open_err(e))?;

        let bytes = record.encode();
        let written = write_partial(&mut file, &bytes)?;
        if written != RECORD_LEN {
            return Err(MfwError::PartialWrite {
                written,
                expected: RECORD_LEN,
            });
        }

        file.flush()?;
        log::debug!(
            "Wrote {:?} record to {}",
            record.operation,
            self.path.display()
        );
        Ok(())
    }

    fn rules(&mut self) -> Result<Vec<Rule>> {
        let file = File::open(&self.path).map_err(|e| self.open_err(e))?;
        RecordReader::new(file).collect()
    }
}
