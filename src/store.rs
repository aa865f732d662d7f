//! Disclosure façade: one user's store and its public operation surface.
//!
//! Everything here is a synchronous blocking call against the embedded
//! database and the vector collection. Hosts running an event loop must
//! offload these calls to a blocking thread pool; the store itself never
//! spawns background work.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::db::{
    self, new_record_id, now_ms, IndexEntry, IntegrityReport, MemoryDb, MemoryPatch,
    MemoryRecord, NewMemory, Stats, DEFAULT_CONFIDENCE,
};
use crate::error::DossierError;
use crate::search::{hybrid_search, SearchRequest};
use crate::timeline::{self, Timeline, TimelineRequest};
use crate::vec::{embedding_text, Embedder, VectorIndex, VectorMeta};

/// Layer 1 cap: search never returns more than this many index rows.
pub const MAX_SEARCH_LIMIT: usize = 100;
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
/// Layer 2 cap: timeline window depth per direction.
pub const MAX_TIMELINE_DEPTH: usize = 20;
/// Layer 3 cap: batch-get serves at most the first 20 requested ids.
pub const MAX_BATCH_GET: usize = 20;

const DB_FILE: &str = "memories.db";
const VECTOR_DIR: &str = "vectors";

/// One user's durable memory store: relational file + vector collection
/// under a single directory, created on first access.
pub struct Store {
    db: MemoryDb,
    vectors: VectorIndex,
}

impl Store {
    pub fn open(
        dir: impl AsRef<Path>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self, DossierError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let db = MemoryDb::open(&dir.join(DB_FILE).to_string_lossy())?;
        let vectors = VectorIndex::open(dir.join(VECTOR_DIR), embedder)?;
        Ok(Self { db, vectors })
    }

    /// Fully in-memory store; nothing touches disk. For tests and embedding
    /// hosts that manage their own persistence.
    pub fn in_memory(embedder: Option<Arc<dyn Embedder>>) -> Result<Self, DossierError> {
        Ok(Self {
            db: MemoryDb::open(":memory:")?,
            vectors: VectorIndex::ephemeral(embedder),
        })
    }

    /// Validate, assign id and timestamps, and write the record to the
    /// relational table, the text index, and the vector index.
    ///
    /// A vector-side failure is logged and does not fail the save: the
    /// record stays reachable through keyword search, and semantic search
    /// degrades per the search engine's contract.
    pub fn save(&self, input: NewMemory) -> Result<MemoryRecord, DossierError> {
        db::validate_new(&input)?;
        let kind = input
            .kind
            .ok_or_else(|| DossierError::Validation("type is required".into()))?;
        let now = now_ms();
        let rec = MemoryRecord {
            id: new_record_id(),
            title: input.title.trim().to_string(),
            subtitle: input.subtitle,
            narrative: input.narrative,
            kind,
            confidence: input.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            source: input.source.unwrap_or_default(),
            facts: input.facts,
            concepts: input.concepts,
            entities: input.entities,
            project: input.project,
            occurred_at: input.occurred_at,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            archived: false,
        };
        self.db.insert(&rec)?;
        self.vector_upsert(&rec);
        Ok(rec)
    }

    /// Tracking read-through (the only path that bumps access_count).
    pub fn fetch(&self, id: &str) -> Result<MemoryRecord, DossierError> {
        self.db.fetch(id)
    }

    /// Field-level partial update, mirrored into both indexes.
    pub fn patch(&self, id: &str, patch: &MemoryPatch) -> Result<MemoryRecord, DossierError> {
        let rec = self.db.patch(id, patch)?;
        if !patch.is_empty() {
            self.vector_upsert(&rec);
        }
        Ok(rec)
    }

    /// Soft delete in both indexes. Returns whether anything was archived.
    pub fn delete(&self, id: &str) -> Result<bool, DossierError> {
        let archived = self.db.archive(id)?;
        if archived {
            if let Err(e) = self.vectors.mark_archived(id) {
                warn!(error = %e, id, "vector index archive failed");
            }
        }
        Ok(archived)
    }

    /// Layer 3: full records for an explicit id list. Serves at most the
    /// first [`MAX_BATCH_GET`] ids; missing and archived ids are silently
    /// omitted.
    pub fn get_batch(&self, ids: &[String]) -> Result<Vec<MemoryRecord>, DossierError> {
        let capped = &ids[..ids.len().min(MAX_BATCH_GET)];
        self.db.batch_get(capped)
    }

    /// Layer 1: hybrid keyword/semantic index search.
    pub fn search(&self, mut req: SearchRequest) -> Vec<IndexEntry> {
        if req.limit == 0 {
            req.limit = DEFAULT_SEARCH_LIMIT;
        }
        req.limit = req.limit.min(MAX_SEARCH_LIMIT);
        hybrid_search(&self.db, &self.vectors, &req)
    }

    /// Layer 2: chronological window around an anchor.
    pub fn timeline(&self, mut req: TimelineRequest) -> Result<Timeline, DossierError> {
        req.depth_before = req.depth_before.min(MAX_TIMELINE_DEPTH);
        req.depth_after = req.depth_after.min(MAX_TIMELINE_DEPTH);
        timeline::timeline(&self.db, &self.vectors, &req)
    }

    pub fn stats(&self) -> Stats {
        self.db.stats()
    }

    pub fn integrity(&self) -> IntegrityReport {
        self.db.integrity()
    }

    fn vector_upsert(&self, rec: &MemoryRecord) {
        let meta = VectorMeta {
            kind: rec.kind,
            project: rec.project.clone(),
            confidence: rec.confidence,
        };
        if let Err(e) = self.vectors.upsert(&rec.id, &embedding_text(rec), meta) {
            warn!(error = %e, id = %rec.id, "vector index write failed");
        }
    }
}
