//! FTS5 index maintenance and ranked keyword search.

use rusqlite::params;

use super::*;

/// Insert the FTS row for a record. Must run inside the same transaction as
/// the main-table write (see `records.rs`).
pub(super) fn fts_insert(
    conn: &rusqlite::Connection,
    rec: &MemoryRecord,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO memories_fts(id, title, subtitle, narrative, facts, concepts) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            rec.id,
            rec.title,
            rec.subtitle.as_deref().unwrap_or(""),
            rec.narrative.as_deref().unwrap_or(""),
            rec.facts.join(" "),
            rec.concepts.join(" "),
        ],
    )?;
    Ok(())
}

pub(super) fn fts_delete(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM memories_fts WHERE id = ?1", params![id])?;
    Ok(())
}

/// Sort order for query-less searches. Ranked matching takes over whenever a
/// query string is present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Default)]
pub struct KeywordQuery<'a> {
    /// FTS5 match expression; boolean/phrase syntax is passed through.
    pub query: Option<&'a str>,
    pub kind: Option<MemoryType>,
    pub project: Option<&'a str>,
    /// Inclusive effective-time bounds, unix ms.
    pub date_start: Option<i64>,
    pub date_end: Option<i64>,
    pub order: DateOrder,
    pub limit: usize,
    pub offset: usize,
}

fn push_filters(
    q: &KeywordQuery,
    alias: &str,
    params_vec: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
    clauses: &mut Vec<String>,
) {
    if let Some(k) = q.kind {
        params_vec.push(Box::new(k.as_str().to_string()));
        clauses.push(format!("{alias}kind = ?{}", params_vec.len()));
    }
    if let Some(p) = q.project {
        params_vec.push(Box::new(p.to_string()));
        clauses.push(format!("{alias}project = ?{}", params_vec.len()));
    }
    if let Some(t) = q.date_start {
        params_vec.push(Box::new(t));
        clauses.push(format!(
            "COALESCE({alias}occurred_at, {alias}created_at) >= ?{}",
            params_vec.len()
        ));
    }
    if let Some(t) = q.date_end {
        params_vec.push(Box::new(t));
        clauses.push(format!(
            "COALESCE({alias}occurred_at, {alias}created_at) <= ?{}",
            params_vec.len()
        ));
    }
}

impl MemoryDb {
    /// Ranked keyword search over title/subtitle/narrative/facts/concepts.
    ///
    /// With a query: BM25-ranked FTS5 MATCH (best match first). A query that
    /// is not valid FTS5 syntax is retried once as a quoted literal phrase
    /// instead of failing the call. Without a query: date-ordered listing.
    /// Archived records never appear.
    pub fn keyword_search(&self, q: &KeywordQuery) -> Result<Vec<IndexEntry>, DossierError> {
        match q.query.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => match self.run_match(raw, q) {
                Ok(rows) => Ok(rows),
                Err(DossierError::Database(e)) => {
                    tracing::debug!(error = %e, "FTS rejected query, retrying as literal phrase");
                    let phrase = format!("\"{}\"", raw.replace('"', "\"\""));
                    self.run_match(&phrase, q)
                }
                Err(e) => Err(e),
            },
            None => self.run_listing(q),
        }
    }

    fn run_match(&self, match_expr: &str, q: &KeywordQuery) -> Result<Vec<IndexEntry>, DossierError> {
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(match_expr.to_string())];
        let mut clauses = Vec::new();
        push_filters(q, "m.", &mut params_vec, &mut clauses);
        params_vec.push(Box::new(q.limit as i64));
        let limit_idx = params_vec.len();
        params_vec.push(Box::new(q.offset as i64));
        let offset_idx = params_vec.len();

        let mut sql = String::from(
            "SELECT m.id, m.title, m.kind, m.project, \
             COALESCE(m.occurred_at, m.created_at), m.confidence \
             FROM memories_fts f JOIN memories m ON m.id = f.id \
             WHERE f.memories_fts MATCH ?1 AND m.archived = 0",
        );
        for c in &clauses {
            sql.push_str(" AND ");
            sql.push_str(c);
        }
        sql.push_str(&format!(" ORDER BY f.rank LIMIT ?{limit_idx} OFFSET ?{offset_idx}"));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_index_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn run_listing(&self, q: &KeywordQuery) -> Result<Vec<IndexEntry>, DossierError> {
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut clauses = Vec::new();
        push_filters(q, "", &mut params_vec, &mut clauses);
        params_vec.push(Box::new(q.limit as i64));
        let limit_idx = params_vec.len();
        params_vec.push(Box::new(q.offset as i64));
        let offset_idx = params_vec.len();

        let dir = match q.order {
            DateOrder::Asc => "ASC",
            DateOrder::Desc => "DESC",
        };
        let mut sql = String::from(
            "SELECT id, title, kind, project, \
             COALESCE(occurred_at, created_at), confidence \
             FROM memories WHERE archived = 0",
        );
        for c in &clauses {
            sql.push_str(" AND ");
            sql.push_str(c);
        }
        sql.push_str(&format!(
            " ORDER BY COALESCE(occurred_at, created_at) {dir} LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        ));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_index_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_index_entry(row: &rusqlite::Row) -> rusqlite::Result<IndexEntry> {
    let kind_raw: String = row.get(2)?;
    Ok(IndexEntry {
        id: row.get(0)?,
        title: row.get(1)?,
        kind: kind_raw.parse().unwrap_or(MemoryType::Context),
        project: row.get(3)?,
        timestamp: row.get(4)?,
        confidence: row.get(5)?,
    })
}
