
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::{IndexIdentity, VectorIndex, check_shape};
use crate::RagError;
use crate::embeddings::DocumentChunk;

/// Binary vector file inside an index directory
pub const VECTOR_FILE: &str = "index.vec";
/// JSON chunk payload inside an index directory
pub const PAYLOAD_FILE: &str = "index.json";

pub const VECTOR_MAGIC: [u8; 4] = *b"DCVI";
pub const VECTOR_FORMAT_VERSION: u16 = 1;

/// Prefix of in-progress build directories under the index root
pub const BUILD_DIR_PREFIX: &str = ".building-";

/// Build directories untouched for this long belong to a dead process.
/// Embedding happens before the directory is created, so a live build only
/// holds it for the time it takes to write two files.
pub const STALE_BUILD_AGE: Duration = Duration::from_secs(10 * 60);

/// Chunk payload stored next to the vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPayload {
    pub identity: IndexIdentity,
    pub embedding_model: String,
    pub source: PathBuf,
    pub created_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub chunks: Vec<DocumentChunk>,
}

/// What is known about a document's index without loading its vectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub identity: IndexIdentity,
    pub directory: PathBuf,
    pub exists: bool,
    pub vector_file_size: Option<u64>,
    pub payload_file_size: Option<u64>,
    pub chunk_count: Option<usize>,
    pub embedding_model: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Decoded contents of a vector file
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFile {
    pub embedding_model: String,
    pub dimension: usize,
    pub vectors: Vec<Vec<f32>>,
}

/// Serialize vectors into the `DCVI` format:
/// magic, u16 version, u16-prefixed model id, u32 dimension, u32 count, then
/// `count * dimension` little-endian f32.
#[inline]
pub fn encode_vectors(
    embedding_model: &str,
    dimension: usize,
    vectors: &[Vec<f32>],
) -> io::Result<Vec<u8>> {
    let model_len = u16::try_from(embedding_model.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "embedding model id too long")
    })?;
    let dimension_u32 = u32::try_from(dimension)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "dimension too large"))?;
    let count_u32 = u32::try_from(vectors.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many vectors"))?;

    let mut buf = Vec::with_capacity(
        header_len(embedding_model.len()) + vectors.len() * dimension * size_of::<f32>(),
    );
    buf.extend_from_slice(&VECTOR_MAGIC);
    buf.extend_from_slice(&VECTOR_FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&model_len.to_le_bytes());
    buf.extend_from_slice(embedding_model.as_bytes());
    buf.extend_from_slice(&dimension_u32.to_le_bytes());
    buf.extend_from_slice(&count_u32.to_le_bytes());
    for vector in vectors {
        for component in vector {
            buf.extend_from_slice(&component.to_le_bytes());
        }
    }

    Ok(buf)
}

/// Parse a `DCVI` vector file, rejecting any length that doesn't match its header
#[inline]
pub fn decode_vectors(bytes: &[u8]) -> Result<VectorFile, String> {
    let mut reader = ByteReader { bytes, offset: 0 };

    let magic = reader.take(4)?;
    if magic != VECTOR_MAGIC {
        return Err("bad magic in vector file".to_string());
    }

    let version = u16::from_le_bytes(reader.array()?);
    if version != VECTOR_FORMAT_VERSION {
        return Err(format!("unsupported vector file version {}", version));
    }

    let model_len = u16::from_le_bytes(reader.array()?) as usize;
    let embedding_model = std::str::from_utf8(reader.take(model_len)?)
        .map_err(|_| "embedding model id is not UTF-8".to_string())?
        .to_string();

    let dimension = u32::from_le_bytes(reader.array()?) as usize;
    let count = u32::from_le_bytes(reader.array()?) as usize;

    let expected = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(size_of::<f32>()))
        .ok_or_else(|| "vector file header overflows".to_string())?;
    let remaining = bytes.len() - reader.offset;
    if remaining != expected {
        return Err(format!(
            "vector data is {} bytes, header declares {}",
            remaining, expected
        ));
    }

    let vectors = if dimension == 0 {
        vec![Vec::new(); count]
    } else {
        reader.bytes[reader.offset..]
            .chunks_exact(size_of::<f32>() * dimension)
            .map(|row| {
                row.chunks_exact(size_of::<f32>())
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            })
            .collect()
    };

    Ok(VectorFile {
        embedding_model,
        dimension,
        vectors,
    })
}

fn header_len(model_len: usize) -> usize {
    VECTOR_MAGIC.len() + 2 + 2 + model_len + 4 + 4
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| "vector file is truncated".to_string())?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], String> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

/// Write both index files into `dir`, which must already exist
#[inline]
pub fn write_index(dir: &Path, index: &VectorIndex) -> io::Result<()> {
    let vectors = encode_vectors(index.embedding_model(), index.dimension(), index.vectors())?;
    write_synced(&dir.join(VECTOR_FILE), &vectors)?;

    let payload = IndexPayload {
        identity: index.identity().clone(),
        embedding_model: index.embedding_model().to_string(),
        source: index.source().to_path_buf(),
        created_at: index.created_at(),
        chunk_count: index.len(),
        chunks: index.chunks().to_vec(),
    };
    let json = serde_json::to_vec_pretty(&payload).map_err(io::Error::other)?;
    write_synced(&dir.join(PAYLOAD_FILE), &json)?;

    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Load an index directory. Anything missing, unreadable or inconsistent is
/// reported as `IndexCorrupt`.
#[inline]
pub fn load_index(dir: &Path) -> crate::Result<VectorIndex> {
    let corrupt = |reason: String| RagError::IndexCorrupt {
        path: dir.to_path_buf(),
        reason,
    };

    let vector_bytes = fs::read(dir.join(VECTOR_FILE))
        .map_err(|e| corrupt(format!("cannot read {}: {}", VECTOR_FILE, e)))?;
    let payload_bytes = fs::read(dir.join(PAYLOAD_FILE))
        .map_err(|e| corrupt(format!("cannot read {}: {}", PAYLOAD_FILE, e)))?;

    let vector_file = decode_vectors(&vector_bytes).map_err(&corrupt)?;
    let payload: IndexPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| corrupt(format!("cannot parse {}: {}", PAYLOAD_FILE, e)))?;

    if payload.chunk_count != payload.chunks.len() {
        return Err(corrupt(format!(
            "payload declares {} chunks but holds {}",
            payload.chunk_count,
            payload.chunks.len()
        )));
    }
    if vector_file.embedding_model != payload.embedding_model {
        return Err(corrupt(format!(
            "vector file model '{}' disagrees with payload model '{}'",
            vector_file.embedding_model, payload.embedding_model
        )));
    }
    let dimension = check_shape(&payload.chunks, &vector_file.vectors).map_err(&corrupt)?;
    if !payload.chunks.is_empty() && dimension != vector_file.dimension {
        return Err(corrupt(format!(
            "vectors have {} dimensions, header declares {}",
            dimension, vector_file.dimension
        )));
    }

    debug!(
        "Loaded index {} ({} chunks, {} dimensions)",
        payload.identity, payload.chunk_count, vector_file.dimension
    );

    Ok(VectorIndex {
        identity: payload.identity,
        embedding_model: payload.embedding_model,
        dimension: vector_file.dimension,
        source: payload.source,
        created_at: payload.created_at,
        chunks: payload.chunks,
        vectors: vector_file.vectors,
    })
}

/// Removes an unfinished build directory unless the build is published
struct BuildGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(
                    "Failed to remove build directory {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Write `index` into a private build directory under `index_root`, then
/// rename it into place as `index_root/{identity}`. Nothing is visible under
/// the identity name until the rename succeeds.
#[inline]
pub fn publish(index_root: &Path, index: &VectorIndex) -> crate::Result<PathBuf> {
    fs::create_dir_all(index_root)?;

    let target = index_root.join(index.identity().as_str());
    let build_dir = index_root.join(format!(
        "{}{}-{}",
        BUILD_DIR_PREFIX,
        index.identity(),
        uuid::Uuid::new_v4().simple()
    ));

    fs::create_dir(&build_dir)?;
    let mut guard = BuildGuard {
        path: build_dir.clone(),
        armed: true,
    };

    write_index(&build_dir, index)?;

    if let Err(e) = fs::rename(&build_dir, &target) {
        if target.is_dir() {
            // Another process published the same identity first
            warn!(
                "Index {} was published concurrently, discarding this build",
                index.identity()
            );
            return Ok(target);
        }
        return Err(e.into());
    }
    guard.armed = false;

    info!(
        "Published index {} with {} chunks",
        index.identity(),
        index.len()
    );
    Ok(target)
}

/// Remove build directories abandoned by an interrupted process: those not
/// modified for at least `max_age`. Younger ones may belong to a live build.
#[inline]
pub fn cleanup_stale_builds(index_root: &Path, max_age: Duration) -> io::Result<usize> {
    let entries = match fs::read_dir(index_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let is_build = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(BUILD_DIR_PREFIX));
        if !is_build || !entry.file_type()?.is_dir() {
            continue;
        }

        let age = entry
            .metadata()?
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            debug!(
                "Keeping build directory {} ({}s old)",
                entry.path().display(),
                age.as_secs()
            );
            continue;
        }

        debug!("Removing stale build directory {}", entry.path().display());
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            // Finished or cleaned by another process meanwhile
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    if removed > 0 {
        info!("Removed {} stale index build directories", removed);
    }
    Ok(removed)
}

/// Describe the index for `identity` under `index_root`
#[inline]
pub fn read_info(index_root: &Path, identity: &IndexIdentity) -> IndexInfo {
    let directory = index_root.join(identity.as_str());
    let file_size = |name: &str| fs::metadata(directory.join(name)).ok().map(|m| m.len());

    let payload = fs::read(directory.join(PAYLOAD_FILE))
        .ok()
        .and_then(|bytes| serde_json::from_slice::<IndexPayload>(&bytes).ok());

    IndexInfo {
        identity: identity.clone(),
        exists: directory.is_dir(),
        vector_file_size: file_size(VECTOR_FILE),
        payload_file_size: file_size(PAYLOAD_FILE),
        chunk_count: payload.as_ref().map(|p| p.chunk_count),
        embedding_model: payload.as_ref().map(|p| p.embedding_model.clone()),
        created_at: payload.map(|p| p.created_at),
        directory,
    }
}

/// Delete a published index directory. Missing directories are fine.
#[inline]
pub fn remove_index(index_root: &Path, identity: &IndexIdentity) -> io::Result<bool> {
    match fs::remove_dir_all(index_root.join(identity.as_str())) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
