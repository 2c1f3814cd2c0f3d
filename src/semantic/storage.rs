//! On-disk form of the passage index (`vectors.bin`).
//!
//! ```text
//! offset  size  field
//!      0     1  format version (1)
//!      1    32  sha256 of the model name
//!     33     1  metric tag (0 = squared L2, 1 = cosine)
//!     34     2  dimensions, u16 le
//!     36     8  entry count, u64 le
//!     44     4  crc32 over bytes 0..44, u32 le
//!     48     -  entry count * dimensions f32 le, corpus position order
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::{FlatIndex, IndexError, Metric, SimilarityIndex};

const FORMAT_VERSION: u8 = 1;

const HEADER_SIZE: usize = 48;
const CHECKSUM_OFFSET: usize = HEADER_SIZE - 4;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed index file: {0}")]
    InvalidFormat(String),

    #[error("index file has format version {0}, this build reads version {1}")]
    VersionMismatch(u8, u8),

    #[error("index file was written for another embedding model")]
    ModelMismatch,

    #[error("index header checksum does not match")]
    ChecksumMismatch,

    #[error("index holds {got}-dim vectors, model produces {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, PartialEq)]
struct Header {
    model_id: [u8; 32],
    metric: Metric,
    dimensions: u16,
    entry_count: u64,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = FORMAT_VERSION;
        bytes[1..33].copy_from_slice(&self.model_id);
        bytes[33] = self.metric.to_byte();
        bytes[34..36].copy_from_slice(&self.dimensions.to_le_bytes());
        bytes[36..44].copy_from_slice(&self.entry_count.to_le_bytes());

        let crc = crc32fast::hash(&bytes[..CHECKSUM_OFFSET]);
        bytes[CHECKSUM_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, VectorStorageError> {
        // an unknown version may lay out the rest differently
        if bytes[0] != FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(bytes[0], FORMAT_VERSION));
        }

        let (body, crc) = bytes.split_at(CHECKSUM_OFFSET);
        if crc32fast::hash(body).to_le_bytes().as_slice() != crc {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&bytes[1..33]);

        let metric = Metric::from_byte(bytes[33]).ok_or_else(|| {
            VectorStorageError::InvalidFormat(format!("unknown metric tag {}", bytes[33]))
        })?;

        let mut dimensions = [0u8; 2];
        dimensions.copy_from_slice(&bytes[34..36]);
        let mut entry_count = [0u8; 8];
        entry_count.copy_from_slice(&bytes[36..44]);

        Ok(Self {
            model_id,
            metric,
            dimensions: u16::from_le_bytes(dimensions),
            entry_count: u64::from_le_bytes(entry_count),
        })
    }

    /// Size the whole file must have for this header.
    fn file_len(&self) -> u128 {
        HEADER_SIZE as u128 + self.entry_count as u128 * self.dimensions as u128 * 4
    }
}

/// Reads and writes one index file.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the index back, refusing files written for another model or
    /// vector width. The payload must hold exactly the declared entries.
    pub fn load(
        &self,
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<FlatIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => VectorStorageError::InvalidFormat(format!(
                "{file_len} bytes is too short for a header"
            )),
            _ => e.into(),
        })?;
        let header = Header::decode(&header_bytes)?;

        if header.model_id != *model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.dimensions as usize != dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: dimensions,
                got: header.dimensions as usize,
            });
        }
        if header.file_len() != file_len as u128 {
            return Err(VectorStorageError::InvalidFormat(format!(
                "{} entries of {} dimensions need {} bytes, file has {}",
                header.entry_count,
                dimensions,
                header.file_len(),
                file_len
            )));
        }

        let mut index =
            FlatIndex::with_capacity(dimensions, header.metric, header.entry_count as usize);
        let mut raw = vec![0u8; dimensions * 4];
        let mut vector = vec![0f32; dimensions];
        for _ in 0..header.entry_count {
            reader.read_exact(&mut raw)?;
            for (value, chunk) in vector.iter_mut().zip(raw.chunks_exact(4)) {
                *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            index.add(&vector)?;
        }

        log::debug!(
            "read {} vectors ({} dims) from {}",
            index.len(),
            dimensions,
            self.path.display()
        );

        Ok(index)
    }

    /// Write the index next to the target, fsync, then rename over it.
    pub fn save(&self, index: &FlatIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the header",
                index.dimensions()
            ))
        })?;

        let header = Header {
            model_id: *model_id,
            metric: index.metric(),
            dimensions,
            entry_count: index.len() as u64,
        };

        let temp_path = self.path.with_extension("tmp");
        if let Err(err) = write_file(&temp_path, &header, index) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn write_file(path: &Path, header: &Header, index: &FlatIndex) -> Result<(), VectorStorageError> {
    let mut writer = BufWriter::new(File::create(path)?);

    writer.write_all(&header.encode())?;
    for value in index.vectors().flatten() {
        writer.write_all(&value.to_le_bytes())?;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}
