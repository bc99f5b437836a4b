//! A seekable, read-ahead stream of decompressed bytes restricted to a chunk
//! list.
//!
//! Each [`BlockStreamer`] owns one producer thread. The consumer asks for a
//! block load through a single-slot channel; the producer decompresses the block
//! outside the lock, then copies the parts of it the current [`AccessPlan`]
//! wants into a fixed-size buffer and wakes the consumer. The producer waits
//! whenever the buffer lacks room, so unread bytes are never overwritten.
//!
//! Every run of bytes copied in is tagged with the virtual position it came
//! from (a breadcrumb), which is how [`BlockStreamer::virtual_position`] maps
//! the read cursor back to the file.

use super::access_plan::AccessPlan;
use super::codec::{Block, BlockCodec, BlockValidator, BgzfCodec, ReferenceDecoder};
use crate::error::StreamFailure;
use crate::index::chunk::make_position;
use crate::index::{Chunk, ChunkList};
use crate::types::ReaderId;
use crate::{Error, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use noodles::bgzf::VirtualPosition;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Buffer capacity in bytes; never below [`DEFAULT_BUFFER_SIZE`].
    pub buffer_size: usize,
    /// Re-decompress every block with a reference decoder and compare.
    pub validate: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            validate: false,
        }
    }
}

/// Buffered bytes `[offset, offset + len)` that began at virtual position `start`.
#[derive(Debug, Clone, Copy)]
struct Breadcrumb {
    offset: usize,
    len: usize,
    start: VirtualPosition,
}

impl Breadcrumb {
    fn end_offset(&self) -> usize {
        self.offset + self.len
    }

    fn position_at(&self, offset: usize) -> VirtualPosition {
        let within = u64::from(self.start.uncompressed()) + (offset - self.offset) as u64;
        make_position(self.start.compressed(), within as u16)
    }

    fn offset_of(&self, position: VirtualPosition) -> Option<usize> {
        if position.compressed() != self.start.compressed() {
            return None;
        }
        let delta = usize::from(position.uncompressed()).checked_sub(usize::from(self.start.uncompressed()))?;
        (delta < self.len).then_some(self.offset + delta)
    }
}

struct StreamState {
    buffer: Vec<u8>,
    position: usize,
    limit: usize,
    breadcrumbs: VecDeque<Breadcrumb>,
    /// Virtual position just past the last buffered byte.
    tail: VirtualPosition,
    submitted: ChunkList,
    plan: AccessPlan,
    error: Option<Arc<StreamFailure>>,
    load_pending: bool,
    /// Bumped by every seek or plan change; loads started under an older
    /// generation are discarded.
    generation: u64,
    closed: bool,
}

impl StreamState {
    fn unread(&self) -> usize {
        self.limit - self.position
    }

    fn free_space(&self) -> usize {
        self.buffer.len() - self.limit
    }

    fn eof(&self, length: u64) -> bool {
        match self.plan.next_block() {
            Some(block) => block >= length,
            None => true,
        }
    }

    fn clear(&mut self, tail: VirtualPosition) {
        self.position = 0;
        self.limit = 0;
        self.breadcrumbs.clear();
        self.tail = tail;
        self.load_pending = false;
        self.generation += 1;
    }

    fn virtual_position(&self) -> VirtualPosition {
        self.breadcrumbs
            .iter()
            .find(|crumb| crumb.end_offset() > self.position)
            .map(|crumb| crumb.position_at(self.position))
            .unwrap_or(self.tail)
    }

    /// Discards consumed bytes and shifts the unread ones to the front.
    fn compact(&mut self) {
        let consumed = self.position;
        if consumed == 0 {
            return;
        }

        while self
            .breadcrumbs
            .front()
            .is_some_and(|crumb| crumb.end_offset() <= consumed)
        {
            self.breadcrumbs.pop_front();
        }
        if let Some(first) = self.breadcrumbs.front_mut() {
            if first.offset < consumed {
                let start = first.position_at(consumed);
                first.len -= consumed - first.offset;
                first.offset = consumed;
                first.start = start;
            }
        }

        self.buffer.copy_within(consumed..self.limit, 0);
        for crumb in self.breadcrumbs.iter_mut() {
            crumb.offset -= consumed;
        }
        self.limit -= consumed;
        self.position = 0;
    }

    /// Appends the part of `payload` that `span` selects.
    fn append(&mut self, span: &Chunk, payload: &[u8]) {
        let from = usize::from(span.block_offset_start()).min(payload.len());
        let to = if span.block_end() > span.block_start() {
            payload.len()
        } else {
            usize::from(span.block_offset_end()).min(payload.len())
        };
        let bytes = &payload[from..to.max(from)];

        self.buffer[self.limit..self.limit + bytes.len()].copy_from_slice(bytes);
        self.breadcrumbs.push_back(Breadcrumb {
            offset: self.limit,
            len: bytes.len(),
            start: span.start(),
        });
        self.limit += bytes.len();
        self.tail = span.end();
    }
}

struct Shared {
    state: Mutex<StreamState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, StreamState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("block stream lock poisoned".to_string()))
    }
}

/// Decompressed byte stream over one BAM file.
pub struct BlockStreamer {
    reader: ReaderId,
    source: String,
    length: u64,
    shared: Arc<Shared>,
    requests: Option<Sender<()>>,
    producer: Option<JoinHandle<()>>,
}

impl BlockStreamer {
    /// Opens a stream over the BGZF file at `path`, initially covering the whole file.
    pub fn open(reader: ReaderId, path: impl AsRef<Path>, options: StreamOptions) -> Result<Self> {
        let path = path.as_ref();
        let length = std::fs::metadata(path)?.len();
        let codec = BgzfCodec::open(path)?;
        let validator: Option<Box<dyn BlockValidator>> = if options.validate {
            tracing::info!("{}: block validation mode enabled", reader);
            Some(Box::new(ReferenceDecoder::open(path)?))
        } else {
            None
        };
        Self::with_codec(
            reader,
            path.display().to_string(),
            length,
            Box::new(codec),
            validator,
            options,
        )
    }

    pub fn with_codec(
        reader: ReaderId,
        source: String,
        length: u64,
        codec: Box<dyn BlockCodec>,
        validator: Option<Box<dyn BlockValidator>>,
        options: StreamOptions,
    ) -> Result<Self> {
        let capacity = options.buffer_size.max(DEFAULT_BUFFER_SIZE);
        let shared = Arc::new(Shared {
            state: Mutex::new(StreamState {
                buffer: vec![0u8; capacity],
                position: 0,
                limit: 0,
                breadcrumbs: VecDeque::new(),
                tail: VirtualPosition::from(0),
                submitted: ChunkList::from_chunk(Chunk::from_raw(0, u64::MAX)),
                plan: AccessPlan::whole_file(),
                error: None,
                load_pending: false,
                generation: 0,
                closed: false,
            }),
            changed: Condvar::new(),
        });

        let (sender, receiver) = bounded(1);
        let producer = Producer {
            reader,
            source: source.clone(),
            length,
            shared: Arc::clone(&shared),
            codec,
            validator,
        };
        let handle = std::thread::Builder::new()
            .name(format!("block-loader-{}", reader.index()))
            .spawn(move || producer.run(receiver))?;

        tracing::debug!("opened block stream for {} ({}, {} bytes)", reader, source, length);

        Ok(Self {
            reader,
            source,
            length,
            shared,
            requests: Some(sender),
            producer: Some(handle),
        })
    }

    pub fn reader(&self) -> ReaderId {
        self.reader
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compressed length of the underlying file.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn eof(&self) -> Result<bool> {
        Ok(self.shared.lock()?.eof(self.length))
    }

    /// Virtual position of the next byte `read` would return.
    pub fn virtual_position(&self) -> Result<VirtualPosition> {
        Ok(self.shared.lock()?.virtual_position())
    }

    /// Restricts the stream to `span` and positions it at the span's start.
    pub fn submit_access_plan(&self, span: &ChunkList) -> Result<()> {
        let mut state = self.shared.lock()?;
        let start = span
            .chunks()
            .first()
            .map(Chunk::start)
            .unwrap_or(VirtualPosition::from(0));

        state.clear(start);
        self.shared.changed.notify_all();
        state.submitted = span.clone();
        state.plan = AccessPlan::new(span);
        if let Some(block) = state.plan.next_block() {
            state.plan.advance_position(make_position(block, 0));
        }

        if !state.eof(self.length) {
            self.request_load(&mut state)?;
        }
        Ok(())
    }

    /// Moves the read cursor to `position`.
    ///
    /// Positions inside buffered data are served without reloading.
    pub fn seek(&self, position: VirtualPosition) -> Result<()> {
        let mut state = self.shared.lock()?;
        if let Some(error) = &state.error {
            return Err(Error::StreamIo(Arc::clone(error)));
        }

        let buffered = state.breadcrumbs.iter().find_map(|crumb| crumb.offset_of(position));
        if let Some(offset) = buffered {
            state.position = offset;
            return Ok(());
        }

        state.clear(position);
        let mut plan = AccessPlan::new(&state.submitted);
        plan.remove_before(position);
        state.plan = plan;
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Copies up to `buf.len()` bytes, blocking until they are available.
    ///
    /// Returns fewer bytes only at end of stream, and 0 once nothing is left.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        let mut state = self.shared.lock()?;

        while copied < buf.len() {
            state = self.wait_for_data(state)?;
            let count = state.unread().min(buf.len() - copied);
            if count == 0 {
                break;
            }
            let from = state.position;
            buf[copied..copied + count].copy_from_slice(&state.buffer[from..from + count]);
            state.position += count;
            copied += count;
            self.shared.changed.notify_all();
        }

        assert!(
            copied == buf.len() || state.eof(self.length),
            "{}: read stopped after {} of {} bytes before end of stream",
            self.reader,
            copied,
            buf.len()
        );

        Ok(copied)
    }

    fn wait_for_data<'a>(&'a self, mut state: MutexGuard<'a, StreamState>) -> Result<MutexGuard<'a, StreamState>> {
        loop {
            if let Some(error) = &state.error {
                return Err(Error::StreamIo(Arc::clone(error)));
            }
            if state.unread() > 0 || state.eof(self.length) {
                return Ok(state);
            }
            if !state.load_pending {
                self.request_load(&mut state)?;
            }
            state = self
                .shared
                .changed
                .wait(state)
                .map_err(|_| Error::Internal("interrupted while waiting for block data".to_string()))?;
        }
    }

    fn request_load(&self, state: &mut StreamState) -> Result<()> {
        let sender = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::Internal(format!("{}: stream is closed", self.reader)))?;
        match sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {
                state.load_pending = true;
                Ok(())
            }
            Err(TrySendError::Disconnected(())) => Err(Error::Internal(format!(
                "{}: block loader thread has stopped",
                self.reader
            ))),
        }
    }

    /// Stops the producer thread. Further reads fail.
    pub fn close(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.closed = true;
        }
        self.shared.changed.notify_all();
        self.requests.take();
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                tracing::warn!("{}: block loader thread panicked", self.reader);
            }
            tracing::debug!("closed block stream for {}", self.reader);
        }
    }
}

impl Drop for BlockStreamer {
    fn drop(&mut self) {
        self.close();
    }
}

impl io::Read for BlockStreamer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        BlockStreamer::read(self, buf).map_err(io::Error::from)
    }
}

impl std::fmt::Debug for BlockStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStreamer")
            .field("reader", &self.reader)
            .field("source", &self.source)
            .field("length", &self.length)
            .finish()
    }
}

struct Producer {
    reader: ReaderId,
    source: String,
    length: u64,
    shared: Arc<Shared>,
    codec: Box<dyn BlockCodec>,
    validator: Option<Box<dyn BlockValidator>>,
}

impl Producer {
    fn run(mut self, requests: Receiver<()>) {
        for () in requests.iter() {
            if self.load_next().is_err() {
                break;
            }
        }
    }

    /// Handles one load request. Returns `Err` only when the stream is gone.
    fn load_next(&mut self) -> std::result::Result<(), ()> {
        let (address, generation) = {
            let mut state = self.shared.state.lock().map_err(|_| ())?;
            if state.closed {
                return Err(());
            }
            match state.plan.next_block() {
                Some(address) if address < self.length => (address, state.generation),
                _ => {
                    state.load_pending = false;
                    self.shared.changed.notify_all();
                    return Ok(());
                }
            }
        };

        let loaded = self.fetch(address);

        let mut state = self.shared.state.lock().map_err(|_| ())?;
        if state.generation != generation {
            self.shared.changed.notify_all();
            return Ok(());
        }

        match loaded {
            Ok(block) => {
                state = self.copy_into_buffer(state, address, generation, &block)?;
            }
            Err(cause) => {
                tracing::error!("{}: failed to load block at {}: {}", self.reader, address, cause);
                state.error = Some(Arc::new(StreamFailure::new(self.reader, self.source.clone(), cause)));
            }
        }
        if state.generation == generation {
            state.load_pending = false;
        }
        self.shared.changed.notify_all();
        Ok(())
    }

    fn fetch(&mut self, address: u64) -> io::Result<Block> {
        let block = self.codec.read_block(address)?;
        if let Some(validator) = self.validator.as_mut() {
            validator.check(address, &block.payload)?;
        }
        Ok(block)
    }

    /// Waits for room, then copies the planned parts of `block` into the buffer.
    fn copy_into_buffer<'a>(
        &self,
        mut state: MutexGuard<'a, StreamState>,
        address: u64,
        generation: u64,
        block: &Block,
    ) -> std::result::Result<MutexGuard<'a, StreamState>, ()> {
        state.compact();
        while state.free_space() < block.payload.len() {
            state = self.shared.changed.wait(state).map_err(|_| ())?;
            if state.closed {
                return Err(());
            }
            if state.generation != generation {
                return Ok(state);
            }
            state.compact();
        }

        let next_address = address + block.compressed_size;
        let spans = state.plan.spans_overlapping_block(address, next_address);
        state.plan.advance_position(make_position(next_address, 0));
        for span in &spans {
            state.append(span, &block.payload);
        }
        Ok(state)
    }
}
