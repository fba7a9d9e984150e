//! Partition Driver
//!
//! Records are upserted into an in-memory [`Index`] while the raw size of the input lines
//! is tracked against the memory budget. When the next line would take the total over budget
//! the index is flushed before that line is upserted:
//!
//!  - The index is drained in ascending order into a provisional "lower" segment until half
//!    the budget's worth of bytes has been written.
//!  - The lower segment is renamed to `{min}_{last written}.spdb`.
//!  - Everything left goes into an "upper" segment named `{next key}_{max}.spdb`.
//!  - The index, the byte count and the key range are reset.
//!
//! At end of input, anything still buffered is flushed the same way.
//!
//! The budget counts raw input bytes, not heap usage. It only decides when to flush.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::btree::Index;
use crate::codec::CodecError;
use crate::config::IngestConfig;
use crate::input;
use crate::io::{BufferPool, SegmentName, SegmentWriter};
use crate::record::{Item, Value};

/// A segment produced by a flush.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentInfo {
    /// Final location
    pub path: PathBuf,
    /// Key range, also the file name
    pub range: SegmentName,
    /// Records written
    pub records: u64,
    /// Bytes written
    pub bytes: u64,
}

/// The outcome of one flush.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlushReport {
    /// Lower segment first, then upper (if any)
    pub segments: Vec<SegmentInfo>,
    /// Records dropped because they could not be encoded
    pub skipped: u64,
}

/// Totals for a whole ingestion run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestSummary {
    /// Records accepted
    pub records: u64,
    /// Flushes performed
    pub flushes: u64,
    /// Records dropped because they could not be encoded
    pub skipped: u64,
    /// Every segment produced, in order
    pub segments: Vec<SegmentInfo>,
}

/// State of the batch currently buffered. Replaced wholesale on every flush.
#[derive(Debug)]
struct Session {
    index: Index,
    buffered_bytes: u64,
    key_range: Option<(i64, i64)>,
}

impl Session {
    fn try_new(degree: usize) -> Result<Self> {
        Ok(Self {
            index: Index::try_new(degree)?,
            buffered_bytes: 0,
            key_range: None,
        })
    }

    fn track(&mut self, pk: i64) {
        self.key_range = Some(match self.key_range {
            Some((min, max)) => (min.min(pk), max.max(pk)),
            None => (pk, pk),
        });
    }
}

/// Drives ingestion and flushing for a single pass over the input.
#[derive(Debug)]
pub struct Ingestor {
    config: IngestConfig,
    pool: BufferPool,
    session: Session,
    summary: IngestSummary,
}

impl Ingestor {
    /// Create an ingestor with its own buffer pool.
    pub fn try_new(config: IngestConfig) -> Result<Self> {
        Self::with_pool(config, BufferPool::new())
    }

    /// Create an ingestor which shares `pool` with other writers.
    pub fn with_pool(config: IngestConfig, pool: BufferPool) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            storage = %config.storage_dir.display(),
            memory_budget = config.memory_budget,
            degree = config.degree,
            "Creating ingestor"
        );
        let session = Session::try_new(config.degree)?;
        Ok(Self {
            config,
            pool,
            session,
            summary: IngestSummary::default(),
        })
    }

    /// Ingest one record given as ordered fields. `raw_len` is the size of the input it came
    /// from and is what counts against the budget.
    ///
    /// Returns the report of the flush this record triggered, if it triggered one.
    pub fn ingest(
        &mut self,
        fields: Vec<(String, Value)>,
        raw_len: u64,
    ) -> Result<Option<FlushReport>> {
        let item = input::into_item(fields)?;

        let mut report = None;
        if self.session.buffered_bytes + raw_len > self.config.memory_budget
            && !self.session.index.is_empty()
        {
            report = Some(self.flush()?);
        }

        tracing::debug!(pk = item.pk, raw_len, "Ingesting");
        self.session.track(item.pk);
        self.session.buffered_bytes += raw_len;
        self.session.index.upsert(item);
        self.summary.records += 1;
        Ok(report)
    }

    /// Ingest one JSON line.
    pub fn ingest_line(&mut self, line: &str) -> Result<Option<FlushReport>> {
        let fields = input::decode_line(line)?;
        self.ingest(fields, line.len() as u64)
    }

    /// Ingest every line of `reader`. Blank lines are skipped.
    pub fn ingest_reader<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            self.ingest_line(&line)
                .with_context(|| format!("line {}", number + 1))?;
        }
        Ok(())
    }

    /// Drain the index into segment files and start a new batch.
    ///
    /// Flushing an empty index does nothing. Segments are named after the keys they actually
    /// hold. If any segment cannot be created or written the error is returned, every segment
    /// of this flush is removed again and the batch is kept, so the flush may be retried.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let Some((min, max)) = self.session.key_range else {
            return Ok(FlushReport::default());
        };
        tracing::info!(
            items = self.session.index.len(),
            bytes = self.session.buffered_bytes,
            min,
            max,
            "Flushing index"
        );

        let dir = self.config.storage_dir.as_path();
        let half = self.config.memory_budget / 2;
        let mut report = FlushReport::default();
        let mut cursor = self.session.index.iter_ascend();

        // Lower segment, up to half the budget
        let provisional = dir.join(SegmentName::provisional(min));
        let (lower, skipped) = write_segment(dir, &self.pool, provisional, &mut cursor, Some(half))?;
        report.skipped += skipped;
        report.segments.extend(lower);

        // Upper segment, everything else
        if let Some(first) = cursor.next() {
            let path = dir.join(SegmentName::new(first.pk, max).to_string());
            let items = std::iter::once(first).chain(&mut cursor);
            match write_segment(dir, &self.pool, path, items, None) {
                Ok((upper, skipped)) => {
                    report.skipped += skipped;
                    report.segments.extend(upper);
                }
                Err(e) => {
                    for segment in &report.segments {
                        discard(&segment.path);
                    }
                    return Err(e);
                }
            }
        }

        self.session = Session::try_new(self.config.degree)?;
        self.summary.flushes += 1;
        self.summary.skipped += report.skipped;
        self.summary.segments.extend(report.segments.iter().cloned());
        Ok(report)
    }

    /// Flush anything still buffered and return the run totals.
    pub fn finish(mut self) -> Result<IngestSummary> {
        if !self.session.index.is_empty() {
            self.flush()?;
        }
        tracing::info!(
            records = self.summary.records,
            flushes = self.summary.flushes,
            segments = self.summary.segments.len(),
            skipped = self.summary.skipped,
            "Ingestion complete"
        );
        Ok(self.summary)
    }

    /// The index holding the current batch.
    pub fn index(&self) -> &Index {
        &self.session.index
    }

    /// Raw bytes counted against the budget in the current batch.
    pub fn buffered_bytes(&self) -> u64 {
        self.session.buffered_bytes
    }

    /// Smallest and largest key of the current batch.
    pub fn key_range(&self) -> Option<(i64, i64)> {
        self.session.key_range
    }

    /// Totals so far.
    pub fn summary(&self) -> &IngestSummary {
        &self.summary
    }

    /// The active configuration.
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }
}

fn create_writer(path: &Path, pool: &BufferPool) -> Result<SegmentWriter> {
    SegmentWriter::try_new(path, pool.clone()).map_err(|e| {
        tracing::error!(path = %path.display(), "could not create segment: {e}");
        e.context(format!("could not create segment: {}", path.display()))
    })
}

/// Keys actually written by one run.
#[derive(Debug, Default)]
struct Run {
    first: Option<i64>,
    last: Option<i64>,
    skipped: u64,
}

impl Run {
    fn range(&self) -> Option<SegmentName> {
        Some(SegmentName::new(self.first?, self.last?))
    }
}

/// Write items into a new segment at `path`, then move it to the name of the range it holds.
///
/// A segment left empty because every item was skipped is removed and `None` returned. On
/// error nothing is left at `path`.
fn write_segment<'a>(
    dir: &Path,
    pool: &BufferPool,
    path: PathBuf,
    items: impl Iterator<Item = &'a Item>,
    limit: Option<u64>,
) -> Result<(Option<SegmentInfo>, u64)> {
    let writer = create_writer(&path, pool)?;
    let result = fill_segment(dir, writer, &path, items, limit);
    if result.is_err() {
        discard(&path);
    }
    result
}

fn fill_segment<'a>(
    dir: &Path,
    mut writer: SegmentWriter,
    path: &Path,
    items: impl Iterator<Item = &'a Item>,
    limit: Option<u64>,
) -> Result<(Option<SegmentInfo>, u64)> {
    let run = write_run(&mut writer, items, limit)?;
    let records = writer.records();
    let bytes = writer.bytes_written();
    writer.close()?;

    let Some(range) = run.range() else {
        discard(path);
        return Ok((None, run.skipped));
    };
    let target = dir.join(range.to_string());
    if target.as_path() != path {
        std::fs::rename(path, &target).with_context(|| {
            format!("could not rename {} to {}", path.display(), target.display())
        })?;
    }
    tracing::info!(path = %target.display(), min = range.min, max = range.max, records, bytes, "Wrote segment");
    let segment = SegmentInfo {
        path: target,
        range,
        records,
        bytes,
    };
    Ok((Some(segment), run.skipped))
}

/// Write until the items are exhausted or `limit` bytes have been written.
fn write_run<'a>(
    writer: &mut SegmentWriter,
    items: impl Iterator<Item = &'a Item>,
    limit: Option<u64>,
) -> Result<Run> {
    let mut run = Run::default();
    for item in items {
        if write_logged(writer, item)? {
            run.first.get_or_insert(item.pk);
            run.last = Some(item.pk);
        } else {
            run.skipped += 1;
        }
        if limit.is_some_and(|limit| writer.bytes_written() >= limit) {
            break;
        }
    }
    Ok(run)
}

/// Write one item. An item which cannot be encoded is logged and skipped, not fatal.
fn write_logged(writer: &mut SegmentWriter, item: &Item) -> Result<bool> {
    match writer.write_item(item) {
        Ok(()) => Ok(true),
        Err(e) if e.downcast_ref::<CodecError>().is_some() => {
            tracing::error!(pk = item.pk, "skipping record: {e}");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), "could not remove segment: {e}");
    }
}
