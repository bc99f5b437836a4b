//! Block decompression behind the [`BlockCodec`] seam.

use bytes::Bytes;
use noodles::bgzf;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

pub const BGZF_HEADER_SIZE: usize = 18;

/// Largest compressed or uncompressed BGZF block.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

const BGZF_MAGIC: [u8; 4] = [0x1f, 0x8b, 0x08, 0x04];

/// One decompressed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub payload: Bytes,
    /// Size on disk including header and footer.
    pub compressed_size: u64,
}

/// Decompresses the block starting at a given compressed file address.
pub trait BlockCodec: Send {
    fn read_block(&mut self, address: u64) -> io::Result<Block>;
}

/// Whether `header` begins with a BGZF block header (gzip magic, `BC` subfield, `SLEN` 2).
pub fn is_bgzf_header(header: &[u8]) -> bool {
    header.len() >= 16
        && header[..4] == BGZF_MAGIC
        && header[12] == b'B'
        && header[13] == b'C'
        && header[14] == 0x02
        && header[15] == 0x00
}

/// Total compressed block size read from the `BSIZE` field of an 18-byte header.
pub fn block_size_from_header(header: &[u8]) -> io::Result<usize> {
    if header.len() < BGZF_HEADER_SIZE || !is_bgzf_header(header) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid BGZF block header",
        ));
    }
    Ok(usize::from(u16::from_le_bytes([header[16], header[17]])) + 1)
}

/// Reads raw blocks from a seekable source and inflates them.
pub struct BgzfCodec<R> {
    inner: R,
}

impl BgzfCodec<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R> BgzfCodec<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Seek + Send> BlockCodec for BgzfCodec<R> {
    fn read_block(&mut self, address: u64) -> io::Result<Block> {
        self.inner.seek(SeekFrom::Start(address))?;

        let mut raw = vec![0u8; BGZF_HEADER_SIZE];
        self.inner.read_exact(&mut raw)?;
        let size = block_size_from_header(&raw)?;
        if size < BGZF_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("block at {} declares size {}", address, size),
            ));
        }
        raw.resize(size, 0);
        self.inner.read_exact(&mut raw[BGZF_HEADER_SIZE..])?;

        let mut payload = Vec::with_capacity(MAX_BLOCK_SIZE);
        bgzf::Reader::new(&raw[..]).read_to_end(&mut payload)?;

        Ok(Block {
            payload: Bytes::from(payload),
            compressed_size: size as u64,
        })
    }
}

/// Re-reads blocks through a seeking BGZF reader over the whole file, used to
/// cross-check the production codec.
pub struct ReferenceDecoder<R> {
    reader: bgzf::Reader<R>,
}

impl ReferenceDecoder<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read + Seek> ReferenceDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: bgzf::Reader::new(inner),
        }
    }

    /// Decompresses `len` bytes starting at the beginning of the block at `address`.
    pub fn read_at(&mut self, address: u64, len: usize) -> io::Result<Vec<u8>> {
        let position = bgzf::VirtualPosition::try_from((address, 0u16))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        self.reader.seek(position)?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Cross-checks a decompressed block before it enters a stream.
pub trait BlockValidator: Send {
    fn check(&mut self, address: u64, payload: &[u8]) -> io::Result<()>;
}

impl<R: Read + Seek + Send> BlockValidator for ReferenceDecoder<R> {
    fn check(&mut self, address: u64, payload: &[u8]) -> io::Result<()> {
        let expected = self.read_at(address, payload.len())?;
        if expected != payload {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("decompressed bytes of block {} disagree with reference decoder", address),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    /// Compresses each payload into its own block and appends the EOF marker.
    pub(crate) fn bgzf_blocks(payloads: &[&[u8]]) -> (Vec<u8>, Vec<u64>) {
        let mut file = Vec::new();
        let mut addresses = Vec::new();
        for payload in payloads {
            let mut block = Vec::new();
            {
                let mut writer = bgzf::Writer::new(&mut block);
                writer.write_all(payload).unwrap();
            }
            // every writer appends an EOF block; strip it to keep one block per payload
            block.truncate(block.len() - EOF_BLOCK.len());
            addresses.push(file.len() as u64);
            file.extend_from_slice(&block);
        }
        file.extend_from_slice(&EOF_BLOCK);
        (file, addresses)
    }

    pub(crate) const EOF_BLOCK: [u8; 28] = [
        0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43,
        0x02, 0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn test_block_size_from_header() {
        assert_eq!(block_size_from_header(&EOF_BLOCK).unwrap(), 28);
        assert!(block_size_from_header(&[0u8; 18]).is_err());
        assert!(block_size_from_header(&EOF_BLOCK[..10]).is_err());
    }

    #[test]
    fn test_read_block() {
        let (file, addresses) = bgzf_blocks(&[b"first block", b"second"]);
        let mut codec = BgzfCodec::new(Cursor::new(file.clone()));

        let first = codec.read_block(addresses[0]).unwrap();
        assert_eq!(&first.payload[..], b"first block");
        assert_eq!(first.compressed_size, addresses[1] - addresses[0]);

        let second = codec.read_block(addresses[1]).unwrap();
        assert_eq!(&second.payload[..], b"second");

        let eof = codec.read_block(file.len() as u64 - 28).unwrap();
        assert!(eof.payload.is_empty());
        assert_eq!(eof.compressed_size, 28);
    }

    #[test]
    fn test_reference_decoder_matches_codec() {
        let (file, addresses) = bgzf_blocks(&[b"hello", b"world"]);
        let mut decoder = ReferenceDecoder::new(Cursor::new(file.clone()));
        assert_eq!(decoder.read_at(addresses[1], 5).unwrap(), b"world");
        assert_eq!(decoder.read_at(addresses[0], 10).unwrap(), b"helloworld");
    }
}
