//! Segment files
//!
//! A segment is an immutable run of records, sorted ascending by primary key, with no
//! header, footer, checksum or index. A reader must scan from offset 0:
//!
//! ```text
//! [u32 len][record body] [u32 len][record body] ...
//! ```
//!
//! Finished segments are named after the inclusive key range they hold: `{min}_{max}.spdb`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::pool::BufferPool;
use crate::codec::{self, CodecError, LENGTH_PREFIX};
use crate::record::Item;

/// File extension of segment files.
pub const SEGMENT_EXTENSION: &str = "spdb";

const SINK_CAPACITY: usize = 16 << 20;

/// The inclusive key range a segment holds, which is also its file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SegmentName {
    /// Smallest key
    pub min: i64,
    /// Largest key
    pub max: i64,
}

impl SegmentName {
    /// A name for `[min, max]`.
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Placeholder file name of a lower segment which is still being written.
    pub fn provisional(min: i64) -> String {
        format!("{min}_lower.{SEGMENT_EXTENSION}")
    }

    /// Parse a finished segment file name.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
        // Split on the separator after the first character, so a negative min still parses
        let split = stem.get(1..)?.find('_')? + 1;
        let min = stem[..split].parse().ok()?;
        let max = stem[split + 1..].parse().ok()?;
        Some(Self { min, max })
    }

    /// Does the range include this key?
    pub fn contains(&self, pk: i64) -> bool {
        self.min <= pk && pk <= self.max
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}.{SEGMENT_EXTENSION}", self.min, self.max)
    }
}

/// List the segment files in a directory, sorted by path.
///
/// Only regular files with the segment extension are returned.
pub fn discover_segments(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("could not read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(SEGMENT_EXTENSION)
        {
            paths.push(path);
        }
    }
    paths.sort();
    tracing::debug!(dir = %dir.display(), count = paths.len(), "Discovered segments");
    Ok(paths)
}

/// Appends length-prefixed records to a buffered sink.
///
/// Calls must be sequential; share the [`BufferPool`] rather than the writer.
#[derive(Debug)]
pub struct SegmentWriter<W: Write = File> {
    sink: BufWriter<W>,
    pool: BufferPool,
    bytes_written: u64,
    records: u64,
}

impl SegmentWriter<File> {
    /// Create (or truncate) a segment file at `path`.
    pub fn try_new(path: &Path, pool: BufferPool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        tracing::debug!(path = %path.display(), "Opened segment");
        Ok(Self::new(file, pool))
    }
}

impl<W: Write> SegmentWriter<W> {
    /// Wrap a sink.
    pub fn new(sink: W, pool: BufferPool) -> Self {
        Self {
            sink: BufWriter::with_capacity(SINK_CAPACITY, sink),
            pool,
            bytes_written: 0,
            records: 0,
        }
    }

    /// Encode and append one item.
    ///
    /// The record is fully encoded before anything reaches the sink, so an encode error
    /// leaves previously written records intact.
    pub fn write_item(&mut self, item: &Item) -> Result<()> {
        let mut buf = self.pool.acquire();
        codec::encode_body_into(&mut buf, item)?;
        let len = u32::try_from(buf.len()).map_err(|_| CodecError::RecordTooLarge(buf.len()))?;

        self.sink.write_u32::<LittleEndian>(len)?;
        self.sink.write_all(&buf)?;

        self.bytes_written += (LENGTH_PREFIX + buf.len()) as u64;
        self.records += 1;
        Ok(())
    }

    /// Bytes written so far, length prefixes included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Push buffered bytes down to the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush().map_err(|e| e.into())
    }

    /// Flush and release the sink. The sink is released even if the flush fails.
    pub fn close(self) -> Result<()> {
        let Self { mut sink, .. } = self;
        let result = sink.flush();
        drop(sink);
        result.map_err(|e| e.into())
    }

    /// Flush and hand back the sink.
    pub fn into_inner(self) -> Result<W> {
        self.sink.into_inner().map_err(|e| e.into_error().into())
    }
}

/// Reads the records of a segment sequentially from offset 0.
#[derive(Debug)]
pub struct SegmentReader<R: Read = File> {
    source: BufReader<R>,
    buf: Vec<u8>,
    offset: u64,
    failed: bool,
}

impl SegmentReader<File> {
    /// Open the segment file at `path`.
    pub fn try_open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("could not open segment: {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<R: Read> SegmentReader<R> {
    /// Read records from `source`.
    pub fn new(source: R) -> Self {
        Self {
            source: BufReader::new(source),
            buf: vec![],
            offset: 0,
            failed: false,
        }
    }

    /// Read the next record. `Ok(None)` at a clean end of file.
    pub fn read_item(&mut self) -> Result<Option<Item>> {
        if self.source.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let len = self
            .source
            .read_u32::<LittleEndian>()
            .with_context(|| format!("truncated length prefix at offset {}", self.offset))?
            as usize;
        self.buf.resize(len, 0);
        if let Err(e) = self.source.read_exact(&mut self.buf) {
            if e.kind() == ErrorKind::UnexpectedEof {
                return Err(anyhow::anyhow!(
                    "truncated record at offset {}: expected {len} bytes",
                    self.offset
                ));
            }
            return Err(e.into());
        }
        let item = codec::decode_body(&self.buf)
            .with_context(|| format!("bad record at offset {}", self.offset))?;
        self.offset += (LENGTH_PREFIX + len) as u64;
        Ok(Some(item))
    }
}

impl<R: Read> Iterator for SegmentReader<R> {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.read_item().transpose();
        if matches!(next, Some(Err(_))) {
            self.failed = true;
        }
        next
    }
}
