//! Readable content of a virtual file

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Run of contiguous storage units backing a root file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub start_block: u64,
    pub block_count: u64,
}

impl Extent {
    pub fn new(start_block: u64, block_count: u64) -> Self {
        Self {
            start_block,
            block_count,
        }
    }

    pub fn end(&self) -> u64 {
        self.start_block + self.block_count
    }
}

/// Fragmentation descriptor of a root file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub block_size: u64,
    pub extents: Vec<Extent>,
}

impl Allocation {
    /// Bytes covered by all extents
    pub fn allocated_bytes(&self) -> u64 {
        self.extents
            .iter()
            .map(|e| e.block_count)
            .sum::<u64>()
            .saturating_mul(self.block_size)
    }
}

/// Seekable content of one address
pub trait ContentStream: Read + Seek + Send {
    /// Logical size in bytes
    fn size(&self) -> u64;

    /// Extent list, only known for root files
    fn allocation(&self) -> Option<&Allocation> {
        None
    }

    /// Bytes past the logical end inside the last allocated unit, followed
    /// by up to `overread` bytes of the next contiguous unit. Empty when the
    /// source has no notion of slack.
    fn read_slack(&mut self, _overread: usize) -> io::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Content held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    cursor: Cursor<Vec<u8>>,
    slack: Vec<u8>,
    next_unit: Vec<u8>,
    allocation: Option<Allocation>,
}

impl MemoryStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
            ..Default::default()
        }
    }

    pub fn with_slack(mut self, slack: Vec<u8>, next_unit: Vec<u8>) -> Self {
        self.slack = slack;
        self.next_unit = next_unit;
        self
    }

    pub fn with_allocation(mut self, allocation: Allocation) -> Self {
        self.allocation = Some(allocation);
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl ContentStream for MemoryStream {
    fn size(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    fn read_slack(&mut self, overread: usize) -> io::Result<Vec<u8>> {
        let mut data = self.slack.clone();
        let take = overread.min(self.next_unit.len());
        data.extend_from_slice(&self.next_unit[..take]);
        Ok(data)
    }
}

/// A plain file on the examiner's disk
#[derive(Debug)]
pub struct FileStream {
    file: File,
    size: u64,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl ContentStream for FileStream {
    fn size(&self) -> u64 {
        self.size
    }
}

/// Window `[offset, offset + length)` of another stream
pub struct RangeStream {
    inner: Box<dyn ContentStream>,
    offset: u64,
    length: u64,
    pos: u64,
}

impl RangeStream {
    /// The window is clamped to the end of `inner`
    pub fn new(inner: Box<dyn ContentStream>, offset: u64, length: u64) -> Self {
        let available = inner.size().saturating_sub(offset);
        Self {
            inner,
            offset,
            length: length.min(available),
            pos: 0,
        }
    }
}

impl Read for RangeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        self.inner.seek(SeekFrom::Start(self.offset + self.pos))?;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for RangeStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::End(d) => self.length as i128 + d as i128,
            SeekFrom::Current(d) => self.pos as i128 + d as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of range",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl ContentStream for RangeStream {
    fn size(&self) -> u64 {
        self.length
    }
}
