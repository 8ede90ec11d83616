use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crc32fast::Hasher;
use half::f16;

use crate::{DescrInt, DescrIntConfig, DescrIntError};

const PERSIST_MAGIC: [u8; 4] = *b"DQC1";
const PERSIST_VERSION: u32 = 2;
const MAX_CONFIG_BYTES: usize = 4096;

fn write_u32<W: Write>(writer: &mut W, value: u32, hasher: Option<&mut Hasher>) -> io::Result<()> {
    let bytes = value.to_le_bytes();
    if let Some(h) = hasher {
        h.update(&bytes);
    }
    writer.write_all(&bytes)
}

fn write_u64<W: Write>(writer: &mut W, value: u64, hasher: Option<&mut Hasher>) -> io::Result<()> {
    let bytes = value.to_le_bytes();
    if let Some(h) = hasher {
        h.update(&bytes);
    }
    writer.write_all(&bytes)
}

fn read_u32<R: Read>(reader: &mut R, hasher: Option<&mut Hasher>) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    if let Some(h) = hasher {
        h.update(&buf);
    }
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R, hasher: Option<&mut Hasher>) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    if let Some(h) = hasher {
        h.update(&buf);
    }
    Ok(u64::from_le_bytes(buf))
}

fn usize_from_u64(value: u64) -> Result<usize, DescrIntError> {
    usize::try_from(value)
        .map_err(|_| DescrIntError::InvalidPersistence("value exceeds platform limits"))
}

/// A growable array of encoded descriptors stored back to back.
///
/// Code `i` occupies bytes `[i * encoded_size, (i + 1) * encoded_size)`, the
/// layout expected by [`DescrInt::cosine_distances_mxn_packed`].
#[derive(Debug, Clone)]
pub struct EncodedSet {
    engine: DescrInt,
    data: Vec<u8>,
}

impl EncodedSet {
    pub fn new(engine: DescrInt) -> Self {
        Self {
            engine,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(engine: DescrInt, capacity: usize) -> Self {
        let data = Vec::with_capacity(capacity * engine.encoded_size());
        Self { engine, data }
    }

    /// Encode every row of a row-major matrix of `size`-component descriptors.
    pub fn from_rows_32f(engine: DescrInt, rows: &[f32]) -> Self {
        let size = engine.size();
        assert_eq!(rows.len() % size, 0, "rows must hold whole descriptors");
        let mut set = Self::with_capacity(engine, rows.len() / size);
        for row in rows.chunks_exact(size) {
            set.push_32f(row);
        }
        set
    }

    pub fn engine(&self) -> &DescrInt {
        &self.engine
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.engine.encoded_size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encode and append a descriptor; returns its index.
    pub fn push_32f(&mut self, src: &[f32]) -> usize {
        let start = self.data.len();
        self.data.resize(start + self.engine.encoded_size(), 0);
        self.engine.encode_32f_into(src, &mut self.data[start..]);
        self.len() - 1
    }

    pub fn push_16f(&mut self, src: &[f16]) -> usize {
        let start = self.data.len();
        self.data.resize(start + self.engine.encoded_size(), 0);
        self.engine.encode_16f_into(src, &mut self.data[start..]);
        self.len() - 1
    }

    /// Append an already encoded descriptor.
    pub fn push_encoded(&mut self, code: &[u8]) -> usize {
        assert_eq!(code.len(), self.engine.encoded_size(), "code length mismatch");
        self.data.extend_from_slice(code);
        self.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        let size = self.engine.encoded_size();
        self.data.get(index * size..(index + 1) * size)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[u8]> + '_ {
        self.data.chunks_exact(self.engine.encoded_size())
    }

    /// All codes as slices, ready for [`DescrInt::cosine_distances_mxn`].
    pub fn codes(&self) -> Vec<&[u8]> {
        self.iter().collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Distance matrix of `self` (rows) against `other` (columns).
    pub fn cosine_distances(&self, other: &EncodedSet, parallel: bool) -> Vec<f32> {
        let rows = self.codes();
        let cols = other.codes();
        let mut out = vec![0.0f32; rows.len() * cols.len()];
        if parallel {
            self.engine.par_cosine_distances_mxn(&rows, &cols, &mut out);
        } else {
            self.engine.cosine_distances_mxn(&rows, &cols, &mut out);
        }
        out
    }

    /// Persist the set to the provided filesystem path.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), DescrIntError> {
        let file = File::create(path)?;
        self.save_to_writer(file)
    }

    /// Persist the set using the supplied writer.
    pub fn save_to_writer<W: Write>(&self, writer: W) -> Result<(), DescrIntError> {
        let mut writer = BufWriter::new(writer);
        writer.write_all(&PERSIST_MAGIC)?;
        write_u32(&mut writer, PERSIST_VERSION, None)?;

        let mut hasher = Hasher::new();
        let config_bytes = bincode::serialize(self.engine.config())
            .map_err(|_| DescrIntError::InvalidPersistence("failed to serialize config"))?;
        write_u64(&mut writer, config_bytes.len() as u64, Some(&mut hasher))?;
        writer.write_all(&config_bytes)?;
        hasher.update(&config_bytes);
        let count = u64::try_from(self.len())
            .map_err(|_| DescrIntError::InvalidPersistence("code count exceeds persistence limits"))?;
        write_u64(&mut writer, count, Some(&mut hasher))?;

        writer.write_all(&self.data)?;
        hasher.update(&self.data);

        write_u32(&mut writer, hasher.finalize(), None)?;
        writer.flush()?;
        tracing::info!(
            count = self.len(),
            size = self.engine.size(),
            depth = self.engine.depth(),
            "saved encoded descriptors"
        );
        Ok(())
    }

    /// Load a set from the provided filesystem path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, DescrIntError> {
        let file = File::open(path)?;
        Self::load_from_reader(file)
    }

    /// Load a set from a persisted byte stream.
    pub fn load_from_reader<R: Read>(reader: R) -> Result<Self, DescrIntError> {
        let mut reader = BufReader::new(reader);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != PERSIST_MAGIC {
            return Err(DescrIntError::InvalidPersistence("unrecognized file header"));
        }
        let version = read_u32(&mut reader, None)?;
        if version != PERSIST_VERSION {
            return Err(DescrIntError::InvalidPersistence("unsupported format version"));
        }

        let mut hasher = Hasher::new();
        let config_len = usize_from_u64(read_u64(&mut reader, Some(&mut hasher))?)?;
        if config_len > MAX_CONFIG_BYTES {
            return Err(DescrIntError::InvalidPersistence("config record too large"));
        }
        let mut config_bytes = vec![0u8; config_len];
        reader.read_exact(&mut config_bytes)?;
        hasher.update(&config_bytes);
        let config: DescrIntConfig = bincode::deserialize(&config_bytes)
            .map_err(|_| DescrIntError::InvalidPersistence("failed to deserialize config"))?;
        if config.validate().is_err() {
            return Err(DescrIntError::InvalidPersistence("invalid engine config"));
        }
        let engine = DescrInt::with_config(config)?;
        let (size, depth) = (engine.size(), engine.depth());
        let count = usize_from_u64(read_u64(&mut reader, Some(&mut hasher))?)?;
        let bytes = count
            .checked_mul(engine.encoded_size())
            .ok_or(DescrIntError::InvalidPersistence("code count overflow"))?;

        let mut data = Vec::new();
        let read = reader.by_ref().take(bytes as u64).read_to_end(&mut data)?;
        if read != bytes {
            return Err(DescrIntError::InvalidPersistence("truncated code data"));
        }
        hasher.update(&data);

        let stored = read_u32(&mut reader, None)?;
        if stored != hasher.finalize() {
            tracing::warn!(count, size, depth, "checksum mismatch in encoded descriptor file");
            return Err(DescrIntError::InvalidPersistence("checksum mismatch"));
        }
        tracing::info!(count, size, depth, "loaded encoded descriptors");
        Ok(Self { engine, data })
    }
}
