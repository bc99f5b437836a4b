//! BAM record reading on top of [`BlockStreamer`].
//!
//! Records are decoded by noodles; only what the shard balancers need is kept:
//! placement, reference span, read name and flags.

use crate::index::ChunkList;
use crate::interval::GenomeInterval;
use crate::schedule::FilePointer;
use crate::stream::{BlockStreamer, StreamOptions};
use crate::types::{ReaderId, SortOrder};
use crate::{Error, Result};
use noodles::bam;
use noodles::bgzf::VirtualPosition;
use noodles::sam::alignment::record::cigar::op::Kind;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// What the read-shard balancer needs from a record.
pub trait ShardRecord {
    fn reader(&self) -> ReaderId;
    /// Virtual position just past the record.
    fn end_position(&self) -> VirtualPosition;
    fn contig(&self) -> Option<usize>;
    fn name(&self) -> &str;
}

/// Turns a file pointer into the records it covers.
pub trait RecordSource {
    type Record: ShardRecord;
    type Records: Iterator<Item = Result<Self::Record>>;

    /// Sort order shared by every input.
    fn sort_order(&self) -> SortOrder;

    /// Records inside the pointer's spans that overlap its intervals.
    fn records(&mut self, pointer: &FilePointer) -> Result<Self::Records>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    pub reader: ReaderId,
    pub contig: Option<usize>,
    /// 1-based leftmost aligned position.
    pub start: Option<u32>,
    /// 1-based inclusive rightmost reference position covered.
    pub end: Option<u32>,
    pub name: String,
    pub flags: u16,
    pub start_position: VirtualPosition,
    pub end_position: VirtualPosition,
}

impl AlignmentRecord {
    /// Keeps the fields the balancers use from a decoded BAM record.
    pub fn from_bam(
        reader: ReaderId,
        record: &bam::Record,
        start_position: VirtualPosition,
        end_position: VirtualPosition,
    ) -> Result<Self> {
        let contig = record
            .reference_sequence_id()
            .transpose()
            .map_err(|e| malformed(reader, start_position, e))?;

        let start = match contig {
            Some(_) => record
                .alignment_start()
                .transpose()
                .map_err(|e| malformed(reader, start_position, e))?
                .map(|position| u32::try_from(usize::from(position)))
                .transpose()
                .map_err(|e| malformed(reader, start_position, e))?,
            None => None,
        };

        let end = match start {
            Some(start) => {
                let span = reference_span(record).map_err(|e| malformed(reader, start_position, e))?;
                let end = u32::try_from(span.max(1) - 1)
                    .ok()
                    .and_then(|extra| start.checked_add(extra))
                    .ok_or_else(|| malformed(reader, start_position, "alignment end is past the largest position"))?;
                Some(end)
            }
            None => None,
        };

        Ok(Self {
            reader,
            contig,
            start,
            end,
            name: record.name().map(|name| name.to_string()).unwrap_or_default(),
            flags: record.flags().bits(),
            start_position,
            end_position,
        })
    }

    /// No reference sequence assigned.
    pub fn is_unplaced(&self) -> bool {
        self.contig.is_none()
    }

    pub fn overlaps(&self, interval: &GenomeInterval) -> bool {
        match (interval, self.contig, self.start, self.end) {
            (GenomeInterval::Unmapped, _, _, _) => self.is_unplaced(),
            (GenomeInterval::Mapped { contig, .. }, Some(c), Some(start), Some(end)) => {
                *contig == c && interval.overlaps_span(start, end)
            }
            _ => false,
        }
    }
}

impl ShardRecord for AlignmentRecord {
    fn reader(&self) -> ReaderId {
        self.reader
    }

    fn end_position(&self) -> VirtualPosition {
        self.end_position
    }

    fn contig(&self) -> Option<usize> {
        self.contig
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Reference bases consumed by the CIGAR (M, D, N, = and X).
fn reference_span(record: &bam::Record) -> io::Result<usize> {
    let mut span: usize = 0;
    for op in record.cigar().iter() {
        let op = op?;
        if matches!(
            op.kind(),
            Kind::Match | Kind::Deletion | Kind::Skip | Kind::SequenceMatch | Kind::SequenceMismatch
        ) {
            span = span
                .checked_add(op.len())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "CIGAR reference span overflows"))?;
        }
    }
    Ok(span)
}

fn malformed(reader: ReaderId, position: VirtualPosition, cause: impl fmt::Display) -> Error {
    Error::InvalidInput(format!("{}: malformed record at {:?}: {}", reader, position, cause))
}

/// Errors raised by the stream itself come back out of noodles wrapped in
/// `io::Error`; those are unwrapped, anything else is a malformed record.
fn record_error(reader: ReaderId, position: VirtualPosition, error: io::Error) -> Error {
    if !error.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        return malformed(reader, position, error);
    }
    match error.into_inner().map(|inner| inner.downcast::<Error>()) {
        Some(Ok(inner)) => *inner,
        _ => Error::Internal(format!("{}: stream error lost at {:?}", reader, position)),
    }
}

/// Byte source handed to the noodles reader.
struct SharedStream(Arc<BlockStreamer>);

impl io::Read for SharedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).map_err(io::Error::from)
    }
}

/// Reads BAM records from one reader's block stream, noting the virtual
/// positions each record starts and ends at.
pub struct RecordReader {
    reader: ReaderId,
    inner: bam::io::Reader<SharedStream>,
    record: bam::Record,
}

impl RecordReader {
    pub fn new(reader: ReaderId, stream: Arc<BlockStreamer>) -> Self {
        Self {
            reader,
            inner: bam::io::Reader::from(SharedStream(stream)),
            record: bam::Record::default(),
        }
    }

    fn stream(&self) -> &BlockStreamer {
        &self.inner.get_ref().0
    }

    /// Next record, or `None` at end of stream.
    pub fn read_record(&mut self) -> Result<Option<AlignmentRecord>> {
        let start_position = self.stream().virtual_position()?;
        match self.inner.read_record(&mut self.record) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(record_error(self.reader, start_position, e)),
        }
        let end_position = self.stream().virtual_position()?;
        AlignmentRecord::from_bam(self.reader, &self.record, start_position, end_position).map(Some)
    }
}

/// One BAM input as seen by the record source.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub id: ReaderId,
    pub path: PathBuf,
    pub sort_order: SortOrder,
}

/// Reads records for file pointers, keeping one open stream per input.
pub struct BamRecordSource {
    inputs: Vec<SourceInput>,
    options: StreamOptions,
    streams: BTreeMap<ReaderId, Arc<BlockStreamer>>,
}

impl BamRecordSource {
    pub fn new(inputs: Vec<SourceInput>, options: StreamOptions) -> Self {
        Self {
            inputs,
            options,
            streams: BTreeMap::new(),
        }
    }

    fn stream(&mut self, input: &SourceInput) -> Result<Arc<BlockStreamer>> {
        if let Some(stream) = self.streams.get(&input.id) {
            return Ok(Arc::clone(stream));
        }
        let stream = Arc::new(BlockStreamer::open(input.id, &input.path, self.options)?);
        self.streams.insert(input.id, Arc::clone(&stream));
        Ok(stream)
    }
}

impl RecordSource for BamRecordSource {
    type Record = AlignmentRecord;
    type Records = PointerRecords;

    fn sort_order(&self) -> SortOrder {
        let mut orders = self.inputs.iter().map(|i| i.sort_order);
        match orders.next() {
            Some(first) if orders.all(|o| o == first) => first,
            _ => SortOrder::Unsorted,
        }
    }

    fn records(&mut self, pointer: &FilePointer) -> Result<PointerRecords> {
        let mut queue = Vec::new();
        for input in self.inputs.clone() {
            let Some(span) = pointer.span(input.id) else {
                continue;
            };
            if span.is_empty() {
                continue;
            }
            queue.push((input.id, self.stream(&input)?, span.clone()));
        }
        queue.reverse();

        Ok(PointerRecords {
            queue,
            current: None,
            intervals: pointer.intervals().to_vec(),
            keep_all: pointer.is_monolithic() && pointer.intervals().is_empty(),
        })
    }
}

/// Records of one file pointer, drained reader by reader.
pub struct PointerRecords {
    /// Remaining readers, last entry first.
    queue: Vec<(ReaderId, Arc<BlockStreamer>, ChunkList)>,
    current: Option<RecordReader>,
    intervals: Vec<GenomeInterval>,
    keep_all: bool,
}

impl PointerRecords {
    fn wanted(&self, record: &AlignmentRecord) -> bool {
        self.keep_all || self.intervals.iter().any(|i| record.overlaps(i))
    }

    fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        loop {
            if self.current.is_none() {
                let Some((reader, stream, span)) = self.queue.pop() else {
                    return Ok(None);
                };
                stream.submit_access_plan(&span)?;
                self.current = Some(RecordReader::new(reader, stream));
            }

            let Some(current) = self.current.as_mut() else {
                continue;
            };
            match current.read_record()? {
                Some(record) if self.wanted(&record) => return Ok(Some(record)),
                Some(_) => {}
                None => self.current = None,
            }
        }
    }
}

impl Iterator for PointerRecords {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.queue.clear();
                self.current = None;
                Some(Err(e))
            }
        }
    }
}
