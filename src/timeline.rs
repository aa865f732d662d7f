//! Chronological context reconstruction around an anchor record.

use serde::Serialize;

use crate::db::{MemoryDb, MemoryRecord, MemoryType};
use crate::error::DossierError;
use crate::search::{hybrid_search, SearchRequest};
use crate::vec::VectorIndex;

/// Timeline entries never carry the narrative and at most this many facts:
/// this is disclosure Layer 2.
pub const MAX_TIMELINE_FACTS: usize = 3;

#[derive(Debug, Default, Clone)]
pub struct TimelineRequest {
    /// Explicit anchor. Takes precedence over `query`.
    pub anchor_id: Option<String>,
    /// Resolved to an anchor via a one-result search when no id is given.
    pub query: Option<String>,
    pub depth_before: usize,
    pub depth_after: usize,
    /// Restrict the window to records of one project.
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(rename = "type")]
    pub kind: MemoryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Effective time: occurred_at when present, else created_at.
    pub occurred_at: i64,
    pub facts: Vec<String>,
}

impl From<&MemoryRecord> for TimelineEntry {
    fn from(rec: &MemoryRecord) -> Self {
        TimelineEntry {
            id: rec.id.clone(),
            title: rec.title.clone(),
            subtitle: rec.subtitle.clone(),
            kind: rec.kind,
            project: rec.project.clone(),
            occurred_at: rec.effective_time(),
            facts: rec.facts.iter().take(MAX_TIMELINE_FACTS).cloned().collect(),
        }
    }
}

/// `before` + `anchor` + `after` reads oldest-to-newest end to end.
#[derive(Debug, Serialize)]
pub struct Timeline {
    pub before: Vec<TimelineEntry>,
    pub anchor: TimelineEntry,
    pub after: Vec<TimelineEntry>,
}

/// Build the chronological window around an anchor.
///
/// Fails with a caller-input error when neither anchor_id nor query is
/// given, and with NotFound when the anchor does not exist (or a query
/// matches nothing).
pub fn timeline(
    db: &MemoryDb,
    vectors: &VectorIndex,
    req: &TimelineRequest,
) -> Result<Timeline, DossierError> {
    let anchor = resolve_anchor(db, vectors, req)?;
    let anchor_time = anchor.effective_time();
    let project = req.project.as_deref();

    // Window queries return nearest-to-anchor first; flip `before` so the
    // whole sequence reads chronologically.
    let mut before = db.records_before(anchor_time, project, req.depth_before)?;
    before.reverse();
    let after = db.records_after(anchor_time, project, req.depth_after)?;

    Ok(Timeline {
        before: before.iter().map(TimelineEntry::from).collect(),
        anchor: TimelineEntry::from(&anchor),
        after: after.iter().map(TimelineEntry::from).collect(),
    })
}

fn resolve_anchor(
    db: &MemoryDb,
    vectors: &VectorIndex,
    req: &TimelineRequest,
) -> Result<MemoryRecord, DossierError> {
    if let Some(ref id) = req.anchor_id {
        return match db.get(id)? {
            Some(rec) if !rec.archived => Ok(rec),
            _ => Err(DossierError::NotFound),
        };
    }
    let query = req
        .query
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            DossierError::Validation("either anchor_id or query is required".into())
        })?;

    let hits = hybrid_search(db, vectors, &SearchRequest::with_query(query, 1));
    let first = hits.first().ok_or(DossierError::NotFound)?;
    match db.get(&first.id)? {
        Some(rec) if !rec.archived => Ok(rec),
        _ => Err(DossierError::NotFound),
    }
}
