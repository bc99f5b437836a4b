//! BAI index reading and writing.
//!
//! The index is parsed lazily, one reference sequence at a time. Byte offsets of
//! each reference's section are cached as they are discovered, so queries in
//! increasing contig order never rescan earlier sections.

pub mod bin;
pub mod chunk;

pub use bin::Bin;
pub use chunk::{Chunk, ChunkList};

use crate::{Error, Result};
use noodles::bgzf::VirtualPosition;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// Bytes before the first reference section: magic plus sequence count.
const HEADER_LEN: u64 = 8;

/// Bins and linear index of one reference sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceIndex {
    contig: usize,
    bins: Vec<Bin>,
    lookup: BTreeMap<u32, usize>,
    linear_index: Vec<VirtualPosition>,
}

impl ReferenceIndex {
    pub fn new(contig: usize, bins: Vec<Bin>, linear_index: Vec<VirtualPosition>) -> Self {
        let lookup = bins
            .iter()
            .enumerate()
            .map(|(i, bin)| (bin.number(), i))
            .collect();
        Self {
            contig,
            bins,
            lookup,
            linear_index,
        }
    }

    pub fn contig(&self) -> usize {
        self.contig
    }

    /// Bins in file order.
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn bin(&self, number: u32) -> Option<&Bin> {
        self.lookup.get(&number).map(|i| &self.bins[*i])
    }

    pub fn linear_index(&self) -> &[VirtualPosition] {
        &self.linear_index
    }

    /// True when nothing was indexed for this reference.
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty() && self.linear_index.is_empty()
    }

    /// Smallest virtual offset at which a record overlapping `locus` may start.
    pub fn minimum_offset(&self, locus: u32) -> VirtualPosition {
        let window = (locus.saturating_sub(1) >> bin::LINEAR_INDEX_SHIFT) as usize;
        self.linear_index
            .get(window)
            .copied()
            .unwrap_or(VirtualPosition::from(0))
    }

    /// Chunks that may hold records overlapping `bin`: the bin's own chunks and
    /// those of every coarser bin containing it, pruned by the linear index.
    pub fn span_overlapping(&self, bin_number: u32) -> ChunkList {
        let Some(first_locus) = bin::first_locus_in_bin(bin_number) else {
            return ChunkList::empty();
        };

        let mut chunks: Vec<Chunk> = Vec::new();
        for number in std::iter::once(bin_number).chain(bin::parent_bins(bin_number)) {
            if let Some(bin) = self.bin(number) {
                chunks.extend_from_slice(bin.chunks());
            }
        }
        if chunks.is_empty() {
            return ChunkList::empty();
        }

        ChunkList::optimized(chunks, self.minimum_offset(first_locus))
    }
}

/// Lazily parsed view over a BAI file.
///
/// Access to the underlying file is serialized by a mutex, so a store may be
/// shared between threads.
pub struct IndexStore {
    path: PathBuf,
    sequence_count: usize,
    cursor: Mutex<IndexCursor>,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("path", &self.path)
            .field("sequence_count", &self.sequence_count)
            .finish()
    }
}

impl IndexStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(format!("index {}", path.display())),
            _ => Error::Io(e),
        })?;
        let length = file.metadata()?.len();

        let mut cursor = IndexCursor {
            path: path.clone(),
            reader: BufReader::new(file),
            position: 0,
            length,
            sequence_offsets: Vec::new(),
        };

        let magic: [u8; 4] = cursor.read_array()?;
        if &magic != BAI_MAGIC {
            return Err(Error::corrupt_index(&path, "invalid BAI magic number"));
        }
        let sequence_count = cursor.read_count("reference sequence")?;

        cursor.sequence_offsets = vec![None; sequence_count];
        if let Some(first) = cursor.sequence_offsets.first_mut() {
            *first = Some(HEADER_LEN);
        }

        tracing::debug!(
            "opened index {} with {} reference sequences",
            path.display(),
            sequence_count
        );

        Ok(Self {
            path,
            sequence_count,
            cursor: Mutex::new(cursor),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sequence_count(&self) -> usize {
        self.sequence_count
    }

    /// Parses the bins and linear index of reference sequence `contig`.
    pub fn query_reference_sequence(&self, contig: usize) -> Result<ReferenceIndex> {
        if contig >= self.sequence_count {
            return Err(Error::InvalidContig {
                path: self.path.clone(),
                contig,
                sequence_count: self.sequence_count,
            });
        }

        let mut cursor = self.lock()?;
        cursor.seek_to_sequence(contig)?;

        let bin_count = cursor.read_count("bin")?;
        let mut bins = Vec::with_capacity(bin_count);
        for _ in 0..bin_count {
            let number = cursor.read_i32()?;
            let number = u32::try_from(number)
                .map_err(|_| cursor.corrupt(format!("negative bin number {}", number)))?;
            let chunk_count = cursor.read_count("chunk")?;
            let mut chunks = Vec::with_capacity(chunk_count);
            for _ in 0..chunk_count {
                let start = cursor.read_u64()?;
                let end = cursor.read_u64()?;
                chunks.push(Chunk::from_raw(start, end));
            }
            bins.push(Bin::new(contig, number, chunks));
        }

        let linear_count = cursor.read_count("linear index")?;
        let mut linear_index = Vec::with_capacity(linear_count);
        for _ in 0..linear_count {
            linear_index.push(VirtualPosition::from(cursor.read_u64()?));
        }

        let end = cursor.position;
        cursor.record_offset(contig + 1, end);

        tracing::debug!(
            "loaded contig {} from {}: {} bins, {} linear entries",
            contig,
            self.path.display(),
            bins.len(),
            linear_index.len()
        );

        Ok(ReferenceIndex::new(contig, bins, linear_index))
    }

    /// Last linear index entry of the last reference that has one.
    ///
    /// Reads past this point can only hold unplaced records. Returns `None` when
    /// no reference carries a linear index, i.e. the file has no mapped reads.
    pub fn last_linear_bin_start(&self) -> Result<Option<VirtualPosition>> {
        let mut cursor = self.lock()?;
        cursor.seek(HEADER_LEN)?;

        let mut last = None;
        for contig in 0..self.sequence_count {
            let start = cursor.position;
            cursor.record_offset(contig, start);
            cursor.skip_bins()?;
            let linear_count = cursor.read_count("linear index")? as u64;
            if linear_count > 0 {
                cursor.skip((linear_count - 1) * 8)?;
                last = Some(VirtualPosition::from(cursor.read_u64()?));
            }
        }
        let end = cursor.position;
        cursor.record_offset(self.sequence_count, end);

        Ok(last)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, IndexCursor>> {
        self.cursor
            .lock()
            .map_err(|_| Error::Internal(format!("index lock poisoned: {}", self.path.display())))
    }
}

struct IndexCursor {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    length: u64,
    sequence_offsets: Vec<Option<u64>>,
}

impl IndexCursor {
    fn corrupt(&self, message: impl Into<String>) -> Error {
        Error::corrupt_index(&self.path, message)
    }

    fn record_offset(&mut self, contig: usize, offset: u64) {
        if let Some(slot) = self.sequence_offsets.get_mut(contig) {
            *slot = Some(offset);
        }
    }

    /// Positions the cursor at the start of `contig`'s section, walking forward
    /// from the nearest section whose offset is already known.
    fn seek_to_sequence(&mut self, contig: usize) -> Result<()> {
        let (mut current, offset) = self.sequence_offsets[..=contig]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, offset)| offset.map(|o| (i, o)))
            .ok_or_else(|| self.corrupt("no known reference offsets"))?;

        self.seek(offset)?;
        while current < contig {
            self.skip_bins()?;
            let linear_count = self.read_count("linear index")? as u64;
            self.skip(linear_count * 8)?;
            current += 1;
            let position = self.position;
            self.record_offset(current, position);
        }
        Ok(())
    }

    fn skip_bins(&mut self) -> Result<()> {
        let bin_count = self.read_count("bin")?;
        for _ in 0..bin_count {
            self.skip(4)?;
            let chunk_count = self.read_count("chunk")? as u64;
            self.skip(chunk_count * 16)?;
        }
        Ok(())
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        if self.position != position {
            self.reader.seek(SeekFrom::Start(position))?;
            self.position = position;
        }
        Ok(())
    }

    fn skip(&mut self, count: u64) -> Result<()> {
        self.ensure_available(count)?;
        let offset = i64::try_from(count).map_err(|_| self.corrupt("section too large"))?;
        self.reader.seek_relative(offset)?;
        self.position += count;
        Ok(())
    }

    fn ensure_available(&self, count: u64) -> Result<()> {
        if self.length.saturating_sub(self.position) < count {
            return Err(self.corrupt(format!(
                "premature end of file at byte {} (needed {} more bytes)",
                self.position, count
            )));
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure_available(N as u64)?;
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf)?;
        self.position += N as u64;
        Ok(buf)
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_count(&mut self, what: &str) -> Result<usize> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| self.corrupt(format!("negative {} count {}", what, count)))
    }
}

/// Serializes reference indices in BAI layout.
pub fn write_index<W: Write>(writer: &mut W, references: &[ReferenceIndex]) -> io::Result<()> {
    writer.write_all(BAI_MAGIC)?;
    write_count(writer, references.len())?;

    for reference in references {
        write_count(writer, reference.bins().len())?;
        for bin in reference.bins() {
            writer.write_all(&(bin.number() as i32).to_le_bytes())?;
            write_count(writer, bin.chunks().len())?;
            for chunk in bin.chunks() {
                writer.write_all(&u64::from(chunk.start()).to_le_bytes())?;
                writer.write_all(&u64::from(chunk.end()).to_le_bytes())?;
            }
        }
        write_count(writer, reference.linear_index().len())?;
        for offset in reference.linear_index() {
            writer.write_all(&u64::from(*offset).to_le_bytes())?;
        }
    }

    Ok(())
}

fn write_count<W: Write>(writer: &mut W, count: usize) -> io::Result<()> {
    let count = i32::try_from(count)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "count exceeds i32 range"))?;
    writer.write_all(&count.to_le_bytes())
}
