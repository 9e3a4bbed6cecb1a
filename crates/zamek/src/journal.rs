use crate::allocation::{AllocState, Allocation, GroupName};
use crate::{AllocationId, ResourceId};
use anyhow::{anyhow, bail};
use bincode::Options;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::Path;

const JOURNAL_HEADER: &[u8] = b"zmjl0001";

pub const JOURNAL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[inline]
fn bincode_config() -> impl Options {
    bincode::DefaultOptions::new().allow_trailing_bytes()
}

/// One durable mutation of the pool.
///
/// Claims are journaled individually and bracketed by a commit or abort
/// marker, so a replay can tell a completed group grant from one that was
/// interrupted half-way and roll the latter back.
#[derive(Debug, Serialize, Deserialize)]
pub enum JournalEvent {
    AllocationCreated(Box<Allocation>),
    StateChanged {
        id: AllocationId,
        state: AllocState,
        granted_group: Option<GroupName>,
    },
    GuestAdded {
        id: AllocationId,
        user: String,
    },
    GuestRemoved {
        id: AllocationId,
        user: String,
    },
    ActivityRefreshed {
        id: AllocationId,
        at: DateTime<Utc>,
    },
    /// Provisional phase-1 claim of a single resource.
    Claimed {
        resource: ResourceId,
        id: AllocationId,
    },
    /// All claims of the group grant since the last marker are final.
    ClaimCommitted {
        id: AllocationId,
    },
    /// All claims of the group grant since the last marker are void.
    ClaimAborted {
        id: AllocationId,
    },
    Released {
        resource: ResourceId,
        id: AllocationId,
    },
}

/// Streams pool events into a file on disk.
pub struct JournalWriter {
    file: BufWriter<File>,
}

impl JournalWriter {
    pub fn create_or_append(path: &Path) -> anyhow::Result<Self> {
        let mut raw_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let position = raw_file.metadata()?.len();
        raw_file.seek(SeekFrom::Start(position))?;
        let mut file = BufWriter::new(raw_file);

        if position == 0 {
            Self::write_header(&mut file)?;
        }

        Ok(Self { file })
    }

    fn write_header(mut file: &mut BufWriter<File>) -> anyhow::Result<()> {
        file.write_all(JOURNAL_HEADER)?;
        bincode_config().serialize_into(&mut file, JOURNAL_VERSION)?;
        file.flush()?;
        Ok(())
    }

    pub fn store(&mut self, event: &JournalEvent) -> anyhow::Result<()> {
        bincode_config().serialize_into(&mut self.file, event)?;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// Reads journaled events back in a streaming fashion.
pub struct JournalReader {
    source: BufReader<File>,
}

impl JournalReader {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        if header != JOURNAL_HEADER {
            bail!("Invalid journal format");
        }
        let version: String = bincode_config()
            .deserialize_from(&mut file)
            .map_err(|error| anyhow!("Cannot load journal header: {error:?}"))?;
        if version != JOURNAL_VERSION {
            bail!("Version of journal {version} does not match with {JOURNAL_VERSION}");
        }
        Ok(Self { source: file })
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEvent, bincode::Error>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match bincode_config().deserialize_from(&mut self.source) {
            Ok(event) => Some(Ok(event)),
            Err(error) => match error.deref() {
                bincode::ErrorKind::Io(e)
                    if matches!(e.kind(), std::io::ErrorKind::UnexpectedEof) =>
                {
                    None
                }
                _ => Some(Err(error)),
            },
        }
    }
}
