//! Record CRUD operations.
//!
//! Every mutation writes the main table and the FTS index inside one
//! transaction; there is no code path that touches one without the other.

use rusqlite::params;

use super::fts;
use super::*;

impl MemoryDb {
    /// Insert a fully-built record. Fails if the id is already present.
    pub fn insert(&self, rec: &MemoryRecord) -> Result<(), DossierError> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN")?;
        let result = (|| -> Result<(), DossierError> {
            conn.execute(
                "INSERT INTO memories \
                 (id, title, subtitle, narrative, kind, confidence, source, \
                  facts, concepts, entities, project, occurred_at, \
                  created_at, last_accessed, access_count, archived) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
                params![
                    rec.id,
                    rec.title,
                    rec.subtitle,
                    rec.narrative,
                    rec.kind.as_str(),
                    rec.confidence,
                    rec.source.as_str(),
                    serde_json::to_string(&rec.facts).unwrap_or_else(|_| "[]".into()),
                    serde_json::to_string(&rec.concepts).unwrap_or_else(|_| "[]".into()),
                    serde_json::to_string(&rec.entities).unwrap_or_else(|_| "[]".into()),
                    rec.project,
                    rec.occurred_at,
                    rec.created_at,
                    rec.last_accessed,
                    rec.access_count,
                    rec.archived as i64,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    DossierError::Validation(format!("memory id '{}' already exists", rec.id))
                }
                other => other.into(),
            })?;
            fts::fts_insert(&conn, rec)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Plain read, no access tracking. Returns archived records too; callers
    /// that must exclude them check the flag.
    pub fn get(&self, id: &str) -> Result<Option<MemoryRecord>, DossierError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {RECORD_COLS} FROM memories WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    /// Tracking read-through: bumps access_count and last_accessed, then
    /// returns the record. NotFound for absent or archived ids. This is the
    /// only operation that mutates the bookkeeping fields.
    pub fn fetch(&self, id: &str) -> Result<MemoryRecord, DossierError> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE memories SET last_accessed = ?1, access_count = access_count + 1 \
             WHERE id = ?2 AND archived = 0",
            params![now_ms(), id],
        )?;
        if n == 0 {
            return Err(DossierError::NotFound);
        }
        self.get(id)?.ok_or(DossierError::NotFound)
    }

    /// Partial update. An empty patch returns the current record unchanged.
    /// NotFound for absent or archived ids.
    pub fn patch(&self, id: &str, patch: &MemoryPatch) -> Result<MemoryRecord, DossierError> {
        let current = match self.get(id)? {
            Some(rec) if !rec.archived => rec,
            _ => return Err(DossierError::NotFound),
        };
        if patch.is_empty() {
            return Ok(current);
        }
        validate_patch(patch)?;

        let mut set_clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref t) = patch.title {
            set_clauses.push("title=?".into());
            values.push(Box::new(t.clone()));
        }
        if let Some(ref s) = patch.subtitle {
            set_clauses.push("subtitle=?".into());
            values.push(Box::new(s.clone()));
        }
        if let Some(ref n) = patch.narrative {
            set_clauses.push("narrative=?".into());
            values.push(Box::new(n.clone()));
        }
        if let Some(k) = patch.kind {
            set_clauses.push("kind=?".into());
            values.push(Box::new(k.as_str()));
        }
        if let Some(c) = patch.confidence {
            set_clauses.push("confidence=?".into());
            values.push(Box::new(c));
        }
        if let Some(s) = patch.source {
            set_clauses.push("source=?".into());
            values.push(Box::new(s.as_str()));
        }
        if let Some(ref f) = patch.facts {
            set_clauses.push("facts=?".into());
            values.push(Box::new(serde_json::to_string(f).unwrap_or_else(|_| "[]".into())));
        }
        if let Some(ref c) = patch.concepts {
            set_clauses.push("concepts=?".into());
            values.push(Box::new(serde_json::to_string(c).unwrap_or_else(|_| "[]".into())));
        }
        if let Some(ref e) = patch.entities {
            set_clauses.push("entities=?".into());
            values.push(Box::new(serde_json::to_string(e).unwrap_or_else(|_| "[]".into())));
        }
        if let Some(ref p) = patch.project {
            set_clauses.push("project=?".into());
            values.push(Box::new(p.clone()));
        }
        if let Some(ts) = patch.occurred_at {
            set_clauses.push("occurred_at=?".into());
            values.push(Box::new(ts));
        }

        let text_changed = patch.title.is_some()
            || patch.subtitle.is_some()
            || patch.narrative.is_some()
            || patch.facts.is_some()
            || patch.concepts.is_some();

        let conn = self.conn()?;
        conn.execute_batch("BEGIN")?;
        let result = (|| -> Result<MemoryRecord, DossierError> {
            values.push(Box::new(id.to_string()));
            let sql = format!("UPDATE memories SET {} WHERE id=?", set_clauses.join(", "));
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|v| v.as_ref()).collect();
            conn.execute(&sql, param_refs.as_slice())?;

            let mut stmt =
                conn.prepare(&format!("SELECT {RECORD_COLS} FROM memories WHERE id = ?1"))?;
            let updated = stmt
                .query_row(params![id], row_to_record)
                .map_err(DossierError::from)?;

            if text_changed {
                fts::fts_delete(&conn, id)?;
                fts::fts_insert(&conn, &updated)?;
            }
            Ok(updated)
        })();
        match result {
            Ok(rec) => {
                conn.execute_batch("COMMIT")?;
                Ok(rec)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Soft delete. Idempotent; returns whether a live row was archived.
    /// The row stays in the table, the FTS entry is removed so keyword
    /// search stops surfacing it.
    pub fn archive(&self, id: &str) -> Result<bool, DossierError> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN")?;
        let result = (|| -> Result<bool, DossierError> {
            let n = conn.execute(
                "UPDATE memories SET archived = 1 WHERE id = ?1 AND archived = 0",
                params![id],
            )?;
            if n > 0 {
                fts::fts_delete(&conn, id)?;
            }
            Ok(n > 0)
        })();
        match result {
            Ok(archived) => {
                conn.execute_batch("COMMIT")?;
                Ok(archived)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Full records for the given ids, in input order. Ids that are missing,
    /// archived, or duplicated are silently skipped; a batch read has no
    /// partial-failure error.
    pub fn batch_get(&self, ids: &[String]) -> Result<Vec<MemoryRecord>, DossierError> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if let Some(rec) = self.get(id)? {
                if !rec.archived {
                    out.push(rec);
                }
            }
        }
        Ok(out)
    }

    /// Non-archived records strictly earlier than `t`, nearest-to-anchor
    /// first (descending effective time).
    pub fn records_before(
        &self,
        t: i64,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, DossierError> {
        self.time_window(t, project, limit, true)
    }

    /// Non-archived records strictly later than `t`, nearest-to-anchor first
    /// (ascending effective time).
    pub fn records_after(
        &self,
        t: i64,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, DossierError> {
        self.time_window(t, project, limit, false)
    }

    fn time_window(
        &self,
        t: i64,
        project: Option<&str>,
        limit: usize,
        before: bool,
    ) -> Result<Vec<MemoryRecord>, DossierError> {
        let (cmp, dir) = if before { ("<", "DESC") } else { (">", "ASC") };
        let conn = self.conn()?;
        let rows = if let Some(p) = project {
            let sql = format!(
                "SELECT {RECORD_COLS} FROM memories \
                 WHERE archived = 0 AND COALESCE(occurred_at, created_at) {cmp} ?1 AND project = ?2 \
                 ORDER BY COALESCE(occurred_at, created_at) {dir} LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![t, p, limit as i64], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        } else {
            let sql = format!(
                "SELECT {RECORD_COLS} FROM memories \
                 WHERE archived = 0 AND COALESCE(occurred_at, created_at) {cmp} ?1 \
                 ORDER BY COALESCE(occurred_at, created_at) {dir} LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![t, limit as i64], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        Ok(rows)
    }

    pub fn stats(&self) -> Stats {
        let mut s = Stats::default();
        let Ok(conn) = self.conn() else { return s };
        let Ok(mut stmt) =
            conn.prepare("SELECT archived, COUNT(*) FROM memories GROUP BY archived")
        else {
            return s;
        };
        if let Ok(rows) = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize))
        }) {
            for (archived, n) in rows.flatten() {
                s.total += n;
                if archived != 0 {
                    s.archived += n;
                } else {
                    s.active += n;
                }
            }
        }
        if let Ok(mut stmt) = conn.prepare(
            "SELECT kind, COUNT(*) FROM memories WHERE archived = 0 GROUP BY kind",
        ) {
            if let Ok(rows) = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            }) {
                for (kind, n) in rows.flatten() {
                    s.by_kind.insert(kind, n);
                }
            }
        }
        s
    }

    /// Check that the FTS index and the main table have not diverged:
    /// every active row indexed, no index entries for archived/missing rows.
    pub fn integrity(&self) -> IntegrityReport {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return IntegrityReport::default(),
        };
        let active: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories WHERE archived = 0", [], |r| r.get(0))
            .unwrap_or(0);
        let fts_indexed: i64 = conn
            .query_row("SELECT COUNT(DISTINCT id) FROM memories_fts", [], |r| r.get(0))
            .unwrap_or(0);
        let orphan_fts: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories_fts WHERE id NOT IN \
                 (SELECT id FROM memories WHERE archived = 0)",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        let missing_fts: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE archived = 0 AND id NOT IN \
                 (SELECT id FROM memories_fts)",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        IntegrityReport {
            active: active as usize,
            fts_indexed: fts_indexed as usize,
            orphan_fts: orphan_fts as usize,
            missing_fts: missing_fts as usize,
            ok: orphan_fts == 0 && missing_fts == 0,
        }
    }
}
