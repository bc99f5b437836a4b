use crate::index::IndexStore;
use crate::schedule::ReaderIndex;
use crate::types::{ReaderId, SortOrder};
use crate::{Error, Result};
use noodles::bam;
use noodles::bgzf::VirtualPosition;
use noodles::sam;
use noodles::sam::header::record::value::map::header::tag as header_tag;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INDEX_EXTENSION: &str = "bai";

/// Sort order from the `SO` field of the `@HD` line.
pub fn sort_order(header: &sam::Header) -> SortOrder {
    header
        .header()
        .and_then(|hd| hd.other_fields().get(&header_tag::SORT_ORDER))
        .map(|value| SortOrder::from_header_value(&value.to_string()))
        .unwrap_or_default()
}

/// Reference sequence lengths in dictionary order.
pub fn sequence_lengths(header: &sam::Header) -> Vec<u32> {
    header
        .reference_sequences()
        .values()
        .map(|reference| u32::try_from(reference.length().get()).unwrap_or(u32::MAX))
        .collect()
}

/// Reference sequence names in dictionary order.
pub fn reference_names(header: &sam::Header) -> Vec<String> {
    header
        .reference_sequences()
        .keys()
        .map(|name| name.to_string())
        .collect()
}

/// Companion index of a BAM file, if one exists on disk.
///
/// Tries the appended form (`sample.bam.bai`) before the replaced extension
/// (`sample.bai`).
pub fn find_index(path: &Path) -> Option<PathBuf> {
    let appended = PathBuf::from(format!("{}.{}", path.display(), INDEX_EXTENSION));
    if appended.exists() {
        return Some(appended);
    }
    let replaced = path.with_extension(INDEX_EXTENSION);
    if replaced.exists() {
        return Some(replaced);
    }
    None
}

/// An opened BAM input: header, first record position and index.
#[derive(Debug, Clone)]
pub struct BamInput {
    pub id: ReaderId,
    pub path: PathBuf,
    pub header: sam::Header,
    pub sort_order: SortOrder,
    pub first_record: VirtualPosition,
    pub length: u64,
    pub index: Option<Arc<IndexStore>>,
}

impl BamInput {
    pub fn open(id: ReaderId, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        let length = file.metadata()?.len();

        // bam::io::Reader::new wraps the file in a BGZF reader
        let mut reader = bam::io::Reader::new(file);
        let header = reader.read_header().map_err(|e| {
            Error::InvalidInput(format!("failed to read BAM header of {}: {}", path.display(), e))
        })?;
        let first_record = reader.get_ref().virtual_position();
        let sort_order = sort_order(&header);

        let index = match find_index(path) {
            Some(index_path) => {
                tracing::debug!("{}: using index {}", id, index_path.display());
                Some(Arc::new(IndexStore::open(&index_path)?))
            }
            None => {
                tracing::warn!("{}: no index found for {}", id, path.display());
                None
            }
        };

        tracing::info!(
            "opened {} as {} ({} references, sort order {:?})",
            path.display(),
            id,
            header.reference_sequences().len(),
            sort_order
        );

        Ok(Self {
            id,
            path: path.to_path_buf(),
            header,
            sort_order,
            first_record,
            length,
            index,
        })
    }

    pub fn reader_index(&self) -> ReaderIndex {
        ReaderIndex {
            id: self.id,
            index: self.index.clone(),
            first_record: self.first_record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noodles::bgzf;
    use std::io::Write;

    fn header_bytes(text: &str, references: &[(&str, u32)]) -> Vec<u8> {
        let mut bytes = b"BAM\x01".to_vec();
        bytes.extend_from_slice(&(text.len() as i32).to_le_bytes());
        bytes.extend_from_slice(text.as_bytes());
        bytes.extend_from_slice(&(references.len() as i32).to_le_bytes());
        for (name, length) in references {
            bytes.extend_from_slice(&((name.len() + 1) as i32).to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(&(*length as i32).to_le_bytes());
        }
        bytes
    }

    fn write_bam(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        {
            let mut writer = bgzf::Writer::new(File::create(&path).unwrap());
            writer.write_all(contents).unwrap();
        }
        path
    }

    #[test]
    fn test_open_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        let contents = header_bytes("@HD\tVN:1.6\tSO:coordinate\n", &[("chr1", 1000), ("chr2", 500)]);
        let path = write_bam(dir.path(), "sample.bam", &contents);

        let input = BamInput::open(ReaderId::new(0), &path).unwrap();
        assert_eq!(input.sort_order, SortOrder::Coordinate);
        assert_eq!(sequence_lengths(&input.header), vec![1000, 500]);
        assert_eq!(reference_names(&input.header), vec!["chr1", "chr2"]);
        assert!(input.first_record > VirtualPosition::from(0));
        assert!(input.index.is_none());
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = header_bytes("", &[]);
        contents[3] = 2;
        let path = write_bam(dir.path(), "bad.bam", &contents);
        assert!(matches!(
            BamInput::open(ReaderId::new(0), &path),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BamInput::open(ReaderId::new(0), dir.path().join("absent.bam")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_sort_order_defaults_to_unsorted() {
        let parse = |text: &str| text.parse::<sam::Header>().unwrap();
        assert_eq!(sort_order(&sam::Header::default()), SortOrder::Unsorted);
        assert_eq!(sort_order(&parse("@HD\tVN:1.6\tSO:queryname\n")), SortOrder::Queryname);
        assert_eq!(sort_order(&parse("@HD\tVN:1.6\n")), SortOrder::Unsorted);
    }

    #[test]
    fn test_find_index_conventions() {
        let dir = tempfile::tempdir().unwrap();
        let bam = dir.path().join("sample.bam");
        std::fs::write(&bam, b"").unwrap();
        assert_eq!(find_index(&bam), None);

        let replaced = dir.path().join("sample.bai");
        std::fs::write(&replaced, b"").unwrap();
        assert_eq!(find_index(&bam), Some(replaced));

        let appended = dir.path().join("sample.bam.bai");
        std::fs::write(&appended, b"").unwrap();
        assert_eq!(find_index(&bam), Some(appended));
    }
}
