//! Persistent per-user vector index for semantic similarity lookup.
//!
//! The store never computes embeddings itself: an [`Embedder`] supplied by
//! the host maps ready-to-embed text to vectors. Lookup is brute-force
//! cosine over an in-memory map, which is fine for per-user collections up
//! to ~10k entries; the collection is persisted as JSON next to the
//! relational file and reloaded on open.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::db::{MemoryRecord, MemoryType};
use crate::error::DossierError;

/// External embedding capability. Implementations are expected to be
/// deterministic for equal input within one process lifetime.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, DossierError>;
}

/// Metadata stored alongside each embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMeta {
    #[serde(rename = "type")]
    pub kind: MemoryType,
    pub project: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VecEntry {
    id: String,
    embedding: Vec<f32>,
    #[serde(flatten)]
    meta: VectorMeta,
    #[serde(default)]
    archived: bool,
}

const COLLECTION_FILE: &str = "collection.json";

/// One user's vector collection.
pub struct VectorIndex {
    /// None in ephemeral (test) mode: nothing is persisted.
    path: Option<PathBuf>,
    embedder: Option<Arc<dyn Embedder>>,
    entries: RwLock<HashMap<String, VecEntry>>,
    cache: EmbedCache,
}

impl VectorIndex {
    /// Open (or create) the collection directory and load any persisted
    /// entries. A collection file that fails to parse is logged and treated
    /// as empty rather than blocking the store: keyword search must keep
    /// working even when the vector side is broken.
    pub fn open(
        dir: impl AsRef<Path>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self, DossierError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(COLLECTION_FILE);
        let mut entries = HashMap::new();
        if path.exists() {
            match std::fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<Vec<VecEntry>>(&bytes) {
                    Ok(list) => {
                        for e in list {
                            entries.insert(e.id.clone(), e);
                        }
                        tracing::debug!(count = entries.len(), "loaded vector collection");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "vector collection unreadable, starting empty");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "vector collection unreadable, starting empty");
                }
            }
        }
        Ok(Self {
            path: Some(path),
            embedder,
            entries: RwLock::new(entries),
            cache: EmbedCache::new(128),
        })
    }

    /// In-memory collection with no backing file.
    pub fn ephemeral(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            path: None,
            embedder,
            entries: RwLock::new(HashMap::new()),
            cache: EmbedCache::new(128),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Embed `text` and add or replace the entry for `id`. A no-op (with a
    /// warning) when no embedder is configured; the record stays reachable
    /// through keyword search.
    pub fn upsert(&self, id: &str, text: &str, meta: VectorMeta) -> Result<(), DossierError> {
        let Some(ref embedder) = self.embedder else {
            tracing::debug!(id, "no embedder configured, skipping vector upsert");
            return Ok(());
        };
        let embedding = embedder.embed(text)?;
        self.entries.write().insert(
            id.to_string(),
            VecEntry {
                id: id.to_string(),
                embedding,
                meta,
                archived: false,
            },
        );
        self.persist()
    }

    /// Semantic lookup: ids of the `limit` nearest non-archived entries with
    /// their cosine similarity, best first.
    pub fn query(&self, text: &str, limit: usize) -> Result<Vec<(String, f64)>, DossierError> {
        let Some(ref embedder) = self.embedder else {
            return Ok(Vec::new());
        };
        let query_emb = match self.cache.get(text) {
            Some(emb) => emb,
            None => {
                let emb = embedder.embed(text)?;
                self.cache.insert(text.to_string(), emb.clone());
                emb
            }
        };
        let entries = self.entries.read();
        let mut scored: Vec<(String, f64)> = entries
            .values()
            .filter(|e| !e.archived)
            .map(|e| (e.id.clone(), cosine_similarity(&query_emb, &e.embedding)))
            .filter(|(_, sim)| *sim > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Flag an entry archived so queries stop returning it. Returns whether
    /// the entry existed.
    pub fn mark_archived(&self, id: &str) -> Result<bool, DossierError> {
        let found = {
            let mut entries = self.entries.write();
            match entries.get_mut(id) {
                Some(e) => {
                    e.archived = true;
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist()?;
        }
        Ok(found)
    }

    /// Physically remove an entry.
    pub fn remove(&self, id: &str) -> Result<bool, DossierError> {
        let found = self.entries.write().remove(id).is_some();
        if found {
            self.persist()?;
        }
        Ok(found)
    }

    fn persist(&self) -> Result<(), DossierError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let list: Vec<VecEntry> = self.entries.read().values().cloned().collect();
        let json = serde_json::to_vec(&list)
            .map_err(|e| DossierError::Index(format!("serialize collection: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// The text handed to the embedder: every summary layer plus the extracted
/// lists, so semantic hits can come from any of them.
pub(crate) fn embedding_text(rec: &MemoryRecord) -> String {
    let mut parts: Vec<&str> = vec![&rec.title];
    if let Some(ref s) = rec.subtitle {
        parts.push(s);
    }
    if let Some(ref n) = rec.narrative {
        parts.push(n);
    }
    for f in &rec.facts {
        parts.push(f);
    }
    for c in &rec.concepts {
        parts.push(c);
    }
    parts.join("\n")
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for i in 0..a.len() {
        let (ai, bi) = (a[i] as f64, b[i] as f64);
        dot += ai * bi;
        na += ai * ai;
        nb += bi * bi;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Small LRU cache for query embeddings to avoid repeated embedder calls.
pub struct EmbedCache {
    inner: Mutex<EmbedCacheInner>,
}

struct EmbedCacheInner {
    cache: LruCache<String, Vec<f32>>,
    hits: u64,
    misses: u64,
}

impl EmbedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(EmbedCacheInner {
                cache: LruCache::new(
                    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(128).unwrap()),
                ),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut inner = self.inner.lock();
        let val = inner.cache.get(key).cloned();
        if val.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        val
    }

    pub fn insert(&self, key: String, value: Vec<f32>) {
        self.inner.lock().cache.put(key, value);
    }

    pub fn stats(&self) -> (usize, u64, u64) {
        let inner = self.inner.lock();
        (inner.cache.len(), inner.hits, inner.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryType;

    struct WordEmbedder;

    impl Embedder for WordEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, DossierError> {
            let mut v = vec![0.0f32; 64];
            for word in text.to_lowercase().split_whitespace() {
                let mut h: u64 = 0xcbf2_9ce4_8422_2325;
                for b in word.bytes() {
                    h ^= b as u64;
                    h = h.wrapping_mul(0x100_0000_01b3);
                }
                v[(h % 64) as usize] += 1.0;
            }
            Ok(v)
        }
    }

    fn meta() -> VectorMeta {
        VectorMeta {
            kind: MemoryType::Preference,
            project: None,
            confidence: 0.7,
        }
    }

    #[test]
    fn cosine_same_vec() {
        let v: Vec<f32> = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn cosine_perpendicular() {
        let a: Vec<f32> = vec![1.0, 0.0];
        let b: Vec<f32> = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-10);
    }

    #[test]
    fn cosine_empty() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn query_ranks_by_overlap() {
        let idx = VectorIndex::ephemeral(Some(Arc::new(WordEmbedder)));
        idx.upsert("a", "coffee in the morning", meta()).unwrap();
        idx.upsert("b", "tea in the afternoon", meta()).unwrap();
        let hits = idx.query("morning coffee routine", 10).unwrap();
        assert_eq!(hits[0].0, "a");
    }

    #[test]
    fn archived_entries_excluded() {
        let idx = VectorIndex::ephemeral(Some(Arc::new(WordEmbedder)));
        idx.upsert("a", "likes mountain hiking", meta()).unwrap();
        assert_eq!(idx.query("mountain hiking", 10).unwrap().len(), 1);
        assert!(idx.mark_archived("a").unwrap());
        assert!(idx.query("mountain hiking", 10).unwrap().is_empty());
        // entry still present, only flagged
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn remove_drops_entry_entirely() {
        let idx = VectorIndex::ephemeral(Some(Arc::new(WordEmbedder)));
        idx.upsert("a", "short lived entry", meta()).unwrap();
        assert!(idx.remove("a").unwrap());
        assert!(!idx.remove("a").unwrap());
        assert!(idx.is_empty());
    }

    #[test]
    fn no_embedder_degrades_to_empty() {
        let idx = VectorIndex::ephemeral(None);
        idx.upsert("a", "anything", meta()).unwrap();
        assert!(idx.is_empty());
        assert!(idx.query("anything", 10).unwrap().is_empty());
    }

    #[test]
    fn collection_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let idx = VectorIndex::open(dir.path(), Some(Arc::new(WordEmbedder))).unwrap();
            idx.upsert("a", "remembers across restarts", meta()).unwrap();
        }
        let idx = VectorIndex::open(dir.path(), Some(Arc::new(WordEmbedder))).unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.query("remembers restarts", 10).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_collection_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(COLLECTION_FILE), b"not json").unwrap();
        let idx = VectorIndex::open(dir.path(), Some(Arc::new(WordEmbedder))).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn embed_cache_hits() {
        let idx = VectorIndex::ephemeral(Some(Arc::new(WordEmbedder)));
        idx.upsert("a", "repeated lookups", meta()).unwrap();
        idx.query("repeated", 10).unwrap();
        idx.query("repeated", 10).unwrap();
        let (_, hits, misses) = idx.cache.stats();
        assert_eq!(misses, 1);
        assert_eq!(hits, 1);
    }
}
