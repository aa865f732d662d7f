//! Hybrid search: keyword and semantic retrieval merged with keyword priority.

use std::collections::HashSet;

use tracing::warn;

use crate::db::{DateOrder, IndexEntry, KeywordQuery, MemoryDb, MemoryRecord, MemoryType};
use crate::vec::VectorIndex;

#[derive(Debug, Default, Clone)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub kind: Option<MemoryType>,
    pub project: Option<String>,
    /// Inclusive effective-time bounds, unix ms.
    pub date_start: Option<i64>,
    pub date_end: Option<i64>,
    /// Ordering for query-less searches; ranked matching wins otherwise.
    pub order: DateOrder,
    pub limit: usize,
    pub offset: usize,
}

impl SearchRequest {
    pub fn with_query(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: Some(query.into()),
            limit,
            ..Default::default()
        }
    }
}

/// Run keyword and semantic search and merge.
///
/// Keyword results come first, then semantic results; duplicates keep their
/// first (keyword) position, so an exact text match always outranks an
/// embedding neighbor of the same record. A failing branch degrades to empty
/// instead of failing the call. No confidence floor is applied here;
/// callers that want one filter the returned list.
pub fn hybrid_search(db: &MemoryDb, vectors: &VectorIndex, req: &SearchRequest) -> Vec<IndexEntry> {
    let limit = req.limit.max(1);
    // Over-fetch so pagination still works after the merge.
    let fetch_limit = req.offset + limit;

    let mut merged = db
        .keyword_search(&KeywordQuery {
            query: req.query.as_deref(),
            kind: req.kind,
            project: req.project.as_deref(),
            date_start: req.date_start,
            date_end: req.date_end,
            order: req.order,
            limit: fetch_limit,
            offset: 0,
        })
        .unwrap_or_else(|e| {
            warn!(error = %e, "keyword search failed, degrading to semantic only");
            Vec::new()
        });

    if let Some(q) = req.query.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let semantic = vectors.query(q, fetch_limit).unwrap_or_else(|e| {
            warn!(error = %e, "semantic search failed, degrading to keyword only");
            Vec::new()
        });
        let mut seen: HashSet<String> = merged.iter().map(|e| e.id.clone()).collect();
        for (id, _sim) in semantic {
            if !seen.insert(id.clone()) {
                continue;
            }
            match db.get(&id) {
                Ok(Some(rec)) if !rec.archived && passes_filters(req, &rec) => {
                    merged.push(IndexEntry::from(&rec));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, id, "semantic hit lookup failed"),
            }
        }
    }

    merged.into_iter().skip(req.offset).take(limit).collect()
}

fn passes_filters(req: &SearchRequest, rec: &MemoryRecord) -> bool {
    if let Some(k) = req.kind {
        if rec.kind != k {
            return false;
        }
    }
    if let Some(ref p) = req.project {
        if rec.project.as_deref() != Some(p.as_str()) {
            return false;
        }
    }
    let t = rec.effective_time();
    if let Some(start) = req.date_start {
        if t < start {
            return false;
        }
    }
    if let Some(end) = req.date_end {
        if t > end {
            return false;
        }
    }
    true
}
