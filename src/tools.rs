//! Tool-level operation surface exposed to the agent layer.
//!
//! All five operations take the active [`Store`] as an explicit parameter
//! and return human-readable text. Caller-input problems (unknown type or
//! source, malformed date, missing id) are described back in the returned
//! string rather than raised; only storage faults propagate as `Err`.

use crate::db::{MemorySource, MemoryType, NewMemory};
use crate::error::DossierError;
use crate::search::SearchRequest;
use crate::store::{Store, MAX_BATCH_GET};
use crate::timeline::{TimelineEntry, TimelineRequest};
use crate::util::{format_date, parse_date, truncate_chars};

const DEFAULT_TIMELINE_DEPTH: usize = 5;

#[derive(Debug, Default, Clone)]
pub struct SearchArgs {
    pub query: Option<String>,
    /// Record type filter, as a string (parsed here, once).
    pub kind: Option<String>,
    pub project: Option<String>,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Clone)]
pub struct TimelineArgs {
    pub anchor_id: Option<String>,
    pub query: Option<String>,
    pub depth_before: Option<usize>,
    pub depth_after: Option<usize>,
    pub project: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct SaveArgs {
    pub title: String,
    /// Record type, as a string.
    pub kind: String,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    pub project: Option<String>,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
    pub entities: Vec<String>,
    pub occurred_at: Option<String>,
    pub confidence: Option<f64>,
    pub source: Option<String>,
}

/// Layer 1: id, type, date, confidence and title per hit, nothing more.
pub fn memory_search(store: &Store, args: &SearchArgs) -> Result<String, DossierError> {
    let kind = match parse_kind(&args.kind) {
        Ok(k) => k,
        Err(msg) => return Ok(msg),
    };
    let date_start = match parse_date_arg(&args.date_start, false) {
        Ok(v) => v,
        Err(msg) => return Ok(msg),
    };
    let date_end = match parse_date_arg(&args.date_end, true) {
        Ok(v) => v,
        Err(msg) => return Ok(msg),
    };

    let hits = store.search(SearchRequest {
        query: args.query.clone(),
        kind,
        project: args.project.clone(),
        date_start,
        date_end,
        order: Default::default(),
        limit: args.limit.unwrap_or(0),
        offset: args.offset.unwrap_or(0),
    });

    if hits.is_empty() {
        return Ok("No memories found.".into());
    }
    let mut out = format!("Found {} memor{}:\n", hits.len(), plural_y(hits.len()));
    for (i, h) in hits.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}] {} · {} · confidence {:.2} · {}\n",
            i + 1,
            h.id,
            h.kind.as_str(),
            format_date(h.timestamp),
            h.confidence,
            truncate_chars(&h.title, 120),
        ));
    }
    out.push_str("Use memory_get for full details, memory_timeline for surrounding context.");
    Ok(out)
}

/// Layer 2: chronological window around an anchor record.
pub fn memory_timeline(store: &Store, args: &TimelineArgs) -> Result<String, DossierError> {
    let req = TimelineRequest {
        anchor_id: args.anchor_id.clone(),
        query: args.query.clone(),
        depth_before: args.depth_before.unwrap_or(DEFAULT_TIMELINE_DEPTH),
        depth_after: args.depth_after.unwrap_or(DEFAULT_TIMELINE_DEPTH),
        project: args.project.clone(),
    };
    let tl = match store.timeline(req) {
        Ok(tl) => tl,
        Err(DossierError::NotFound) => {
            return Ok("No anchor memory found for the given id or query.".into())
        }
        Err(e) if e.is_storage_fault() => return Err(e),
        Err(e) => return Ok(format!("Error: {e}")),
    };

    let mut out = format!(
        "Timeline around [{}] {} ({}):\n",
        tl.anchor.id,
        truncate_chars(&tl.anchor.title, 120),
        format_date(tl.anchor.occurred_at),
    );
    out.push_str("Before:\n");
    push_entries(&mut out, &tl.before);
    out.push_str("Anchor:\n");
    out.push_str(&fmt_entry(&tl.anchor));
    out.push_str("After:\n");
    push_entries(&mut out, &tl.after);
    Ok(out)
}

/// Layer 3: full details for an explicit, capped id list.
pub fn memory_get(store: &Store, ids: &[String]) -> Result<String, DossierError> {
    if ids.is_empty() {
        return Ok("Provide at least one memory id.".into());
    }
    let recs = store.get_batch(ids)?;
    let served = ids.len().min(MAX_BATCH_GET);

    let mut out = String::new();
    if ids.len() > MAX_BATCH_GET {
        out.push_str(&format!(
            "Requested {} ids; serving the first {}.\n\n",
            ids.len(),
            MAX_BATCH_GET
        ));
    }
    if recs.is_empty() {
        out.push_str("No memories found for the given ids.");
        return Ok(out);
    }
    if recs.len() < served {
        out.push_str(&format!(
            "{} of {} ids not found (or archived).\n\n",
            served - recs.len(),
            served
        ));
    }
    for rec in &recs {
        out.push_str(&format!("[{}] {}\n", rec.id, rec.title));
        out.push_str(&format!(
            "  type: {} · source: {} · confidence {:.2}\n",
            rec.kind.as_str(),
            rec.source.as_str(),
            rec.confidence
        ));
        if let Some(ref p) = rec.project {
            out.push_str(&format!("  project: {p}\n"));
        }
        match rec.occurred_at {
            Some(ts) => out.push_str(&format!(
                "  occurred: {} · created: {}\n",
                format_date(ts),
                format_date(rec.created_at)
            )),
            None => out.push_str(&format!("  created: {}\n", format_date(rec.created_at))),
        }
        if let Some(ref s) = rec.subtitle {
            out.push_str(&format!("  subtitle: {s}\n"));
        }
        if let Some(ref n) = rec.narrative {
            out.push_str(&format!("  narrative: {n}\n"));
        }
        if !rec.facts.is_empty() {
            out.push_str(&format!("  facts: {}\n", rec.facts.join("; ")));
        }
        if !rec.concepts.is_empty() {
            out.push_str(&format!("  concepts: {}\n", rec.concepts.join("; ")));
        }
        if !rec.entities.is_empty() {
            out.push_str(&format!("  entities: {}\n", rec.entities.join("; ")));
        }
        out.push('\n');
    }
    Ok(out.trim_end().to_string())
}

/// Create a record; echoes the assigned id on success.
pub fn memory_save(store: &Store, args: SaveArgs) -> Result<String, DossierError> {
    let kind = match args.kind.parse::<MemoryType>() {
        Ok(k) => k,
        Err(e) => return Ok(format!("Error: {e}")),
    };
    let source = match args.source.as_deref() {
        Some(raw) => match raw.parse::<MemorySource>() {
            Ok(s) => Some(s),
            Err(e) => return Ok(format!("Error: {e}")),
        },
        None => None,
    };
    let occurred_at = match parse_date_arg(&args.occurred_at, false) {
        Ok(v) => v,
        Err(msg) => return Ok(msg),
    };

    let input = NewMemory {
        title: args.title,
        kind: Some(kind),
        subtitle: args.subtitle,
        narrative: args.narrative,
        confidence: args.confidence,
        source,
        facts: args.facts,
        concepts: args.concepts,
        entities: args.entities,
        project: args.project,
        occurred_at,
    };
    match store.save(input) {
        Ok(rec) => Ok(format!(
            "Saved memory {} ({}): {}",
            rec.id,
            rec.kind.as_str(),
            rec.title
        )),
        Err(e) if e.is_storage_fault() => Err(e),
        Err(e) => Ok(format!("Error: {e}")),
    }
}

/// Archive a record in both indexes.
pub fn memory_delete(store: &Store, id: &str) -> Result<String, DossierError> {
    let id = id.trim();
    if id.is_empty() {
        return Ok("Provide a memory id to delete.".into());
    }
    match store.delete(id) {
        Ok(true) => Ok(format!("Archived memory {id}.")),
        Ok(false) => Ok(format!("No memory found with id {id}.")),
        Err(e) if e.is_storage_fault() => Err(e),
        Err(e) => Ok(format!("Error: {e}")),
    }
}

fn push_entries(out: &mut String, entries: &[TimelineEntry]) {
    if entries.is_empty() {
        out.push_str("  (none)\n");
        return;
    }
    for e in entries {
        out.push_str(&fmt_entry(e));
    }
}

fn fmt_entry(e: &TimelineEntry) -> String {
    let mut line = format!(
        "  [{}] {} · {} · {}",
        e.id,
        format_date(e.occurred_at),
        e.kind.as_str(),
        truncate_chars(&e.title, 120),
    );
    if let Some(ref s) = e.subtitle {
        line.push_str(&format!(" — {}", truncate_chars(s, 160)));
    }
    if !e.facts.is_empty() {
        line.push_str(&format!(" (facts: {})", e.facts.join("; ")));
    }
    line.push('\n');
    line
}

fn plural_y(n: usize) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}

fn parse_kind(s: &Option<String>) -> Result<Option<MemoryType>, String> {
    match s.as_deref() {
        Some(raw) => raw
            .parse::<MemoryType>()
            .map(Some)
            .map_err(|e| format!("Error: {e}")),
        None => Ok(None),
    }
}

fn parse_date_arg(s: &Option<String>, end_of_day: bool) -> Result<Option<i64>, String> {
    match s.as_deref() {
        Some(raw) => parse_date(raw, end_of_day).map(Some).ok_or_else(|| {
            format!("Error: could not parse date '{raw}' (use YYYY-MM-DD or RFC 3339)")
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn store() -> Store {
        Store::in_memory(None).unwrap()
    }

    #[test]
    fn invalid_type_lists_valid_values() {
        let s = store();
        let msg = memory_save(
            &s,
            SaveArgs {
                title: "some record".into(),
                kind: "opinion".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(msg.contains("invalid type 'opinion'"));
        assert!(msg.contains("preference"));
        assert!(msg.contains("personal"));
    }

    #[test]
    fn invalid_source_lists_valid_values() {
        let s = store();
        let msg = memory_save(
            &s,
            SaveArgs {
                title: "some record".into(),
                kind: "insight".into(),
                source: Some("guessed".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(msg.contains("invalid source 'guessed'"));
        assert!(msg.contains("inferred"));
    }

    #[test]
    fn delete_missing_is_text_not_error() {
        let s = store();
        let msg = memory_delete(&s, "mem_nothere").unwrap();
        assert!(msg.contains("No memory found"));
    }

    #[test]
    fn bad_date_is_text_not_error() {
        let s = store();
        let msg = memory_search(
            &s,
            &SearchArgs {
                date_start: Some("last week".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(msg.contains("could not parse date"));
    }

    #[test]
    fn timeline_without_anchor_or_query_is_text() {
        let s = store();
        let msg = memory_timeline(&s, &TimelineArgs::default()).unwrap();
        assert!(msg.contains("anchor_id or query"));
    }
}
