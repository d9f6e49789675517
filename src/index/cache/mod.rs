
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::storage::{self, IndexInfo};
use super::{IndexIdentity, VectorIndex};
use crate::RagError;
use crate::documents::DocumentSource;
use crate::embeddings::{ChunkingConfig, Embedder, chunk_document};

type BuildLock = Arc<tokio::sync::Mutex<()>>;
type BuildLocks = Mutex<HashMap<IndexIdentity, BuildLock>>;

/// A caller's handle on the build lock of one identity. The map entry is
/// dropped with the last handle.
struct LockLease<'a> {
    locks: &'a BuildLocks,
    identity: IndexIdentity,
    lock: BuildLock,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let tracked = locks
            .get(&self.identity)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock));
        // One reference in the map, one here: nobody else is waiting
        if tracked && Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.identity);
        }
    }
}

/// Owns the index directories under one root and the indexes loaded from them.
///
/// An index is built at most once per document: later calls load it from disk
/// or return the copy already in memory. Concurrent calls for the same
/// document wait for a single build.
pub struct IndexCacheManager {
    index_root: PathBuf,
    embedder: Arc<dyn Embedder>,
    source: Arc<dyn DocumentSource>,
    chunking: ChunkingConfig,
    loaded: Mutex<HashMap<IndexIdentity, Arc<VectorIndex>>>,
    build_locks: BuildLocks,
}

impl IndexCacheManager {
    /// Create the manager, creating the index root and clearing builds left
    /// behind by an interrupted process
    #[inline]
    pub fn new(
        index_root: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        source: Arc<dyn DocumentSource>,
        chunking: ChunkingConfig,
    ) -> crate::Result<Self> {
        let index_root = index_root.into();
        std::fs::create_dir_all(&index_root)?;

        if let Err(e) = storage::cleanup_stale_builds(&index_root, storage::STALE_BUILD_AGE) {
            warn!(
                "Could not clean stale builds in {}: {}",
                index_root.display(),
                e
            );
        }

        Ok(Self {
            index_root,
            embedder,
            source,
            chunking,
            loaded: Mutex::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    /// Embedding model new indexes are built with and loaded indexes must match
    #[inline]
    pub fn embedding_model(&self) -> &str {
        self.embedder.model_id()
    }

    /// Canonicalize a document path and derive its identity
    #[inline]
    pub async fn resolve(&self, document: &Path) -> crate::Result<(PathBuf, IndexIdentity)> {
        let canonical = tokio::fs::canonicalize(document)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RagError::NotFound(document.to_path_buf()),
                _ => RagError::Io(e),
            })?;
        let identity = IndexIdentity::from_path(&canonical);
        Ok((canonical, identity))
    }

    /// Return the index of `document`, building it on first use
    #[inline]
    pub async fn get_or_create(&self, document: &Path) -> crate::Result<Arc<VectorIndex>> {
        let (canonical, identity) = self.resolve(document).await?;

        let lease = self.build_lock(&identity);
        let _guard = lease.lock.lock().await;

        if let Some(index) = self.cached(&identity) {
            debug!("Index {} served from memory", identity);
            return Ok(index);
        }

        let directory = self.index_root.join(identity.as_str());
        let index = if tokio::fs::try_exists(&directory).await? {
            debug!("Index {} found on disk, loading", identity);
            let load_dir = directory.clone();
            tokio::task::spawn_blocking(move || storage::load_index(&load_dir))
                .await
                .map_err(|e| anyhow::anyhow!("Index load task failed: {}", e))??
        } else {
            info!("No index for {}, building {}", canonical.display(), identity);
            self.build(canonical, identity.clone()).await?
        };

        self.check_model(&index)?;

        let index = Arc::new(index);
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity, Arc::clone(&index));
        Ok(index)
    }

    /// Delete any existing index of `document` and build it again
    #[inline]
    pub async fn rebuild(&self, document: &Path) -> crate::Result<Arc<VectorIndex>> {
        let (canonical, identity) = self.resolve(document).await?;

        let lease = self.build_lock(&identity);
        let _guard = lease.lock.lock().await;

        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&identity);

        let root = self.index_root.clone();
        let remove_identity = identity.clone();
        let removed =
            tokio::task::spawn_blocking(move || storage::remove_index(&root, &remove_identity))
                .await
                .map_err(|e| anyhow::anyhow!("Index removal task failed: {}", e))??;
        if removed {
            info!("Removed existing index {}", identity);
        }

        let index = Arc::new(self.build(canonical, identity.clone()).await?);
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity, Arc::clone(&index));
        Ok(index)
    }

    /// Describe the on-disk index of `document` without loading it
    #[inline]
    pub async fn info(&self, document: &Path) -> crate::Result<IndexInfo> {
        let (_, identity) = self.resolve(document).await?;
        let root = self.index_root.clone();
        let info = tokio::task::spawn_blocking(move || storage::read_info(&root, &identity))
            .await
            .map_err(|e| anyhow::anyhow!("Index info task failed: {}", e))?;
        Ok(info)
    }

    /// Number of indexes held in memory
    #[inline]
    pub fn loaded_count(&self) -> usize {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn cached(&self, identity: &IndexIdentity) -> Option<Arc<VectorIndex>> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    fn build_lock(&self, identity: &IndexIdentity) -> LockLease<'_> {
        let mut locks = self
            .build_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        LockLease {
            locks: &self.build_locks,
            identity: identity.clone(),
            lock: Arc::clone(locks.entry(identity.clone()).or_default()),
        }
    }

    fn check_model(&self, index: &VectorIndex) -> crate::Result<()> {
        if index.embedding_model() != self.embedder.model_id() {
            warn!(
                "Index {} was built with '{}', configured model is '{}'",
                index.identity(),
                index.embedding_model(),
                self.embedder.model_id()
            );
            return Err(RagError::EmbeddingModelMismatch {
                index_model: index.embedding_model().to_string(),
                configured_model: self.embedder.model_id().to_string(),
            });
        }
        Ok(())
    }

    /// Load, chunk, embed and publish. Runs on the blocking pool.
    async fn build(
        &self,
        canonical: PathBuf,
        identity: IndexIdentity,
    ) -> crate::Result<VectorIndex> {
        let source = Arc::clone(&self.source);
        let embedder = Arc::clone(&self.embedder);
        let chunking = self.chunking.clone();
        let index_root = self.index_root.clone();

        tokio::task::spawn_blocking(move || -> crate::Result<VectorIndex> {
            let pages = source.load_text(&canonical)?;
            let chunks = chunk_document(&canonical, &pages, &chunking);

            let vectors = if chunks.is_empty() {
                warn!(
                    "{} produced no chunks, building an empty index",
                    canonical.display()
                );
                Vec::new()
            } else {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                debug!("Embedding {} chunks for {}", texts.len(), identity);
                embedder.embed(&texts)?
            };

            let index = VectorIndex::new(
                identity,
                embedder.model_id(),
                canonical,
                chunks,
                vectors,
            )?;
            storage::publish(&index_root, &index)?;
            Ok(index)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Index build task failed: {}", e))?
    }
}
