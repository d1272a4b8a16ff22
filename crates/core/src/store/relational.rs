use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::error::{CodexError, Result};
use crate::model::Concept;

/// A read-only handle to the relational store.
///
/// Each calling thread lazily opens and caches its own `rusqlite::Connection`
/// against the same file, so concurrent reads from multiple threads never
/// contend on a shared mutex inside the core.
pub struct RelationalStore {
    path: PathBuf,
}

thread_local! {
    static CONN_CACHE: RefCell<HashMap<PathBuf, Connection>> = RefCell::new(HashMap::new());
}

impl RelationalStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Verify the file is openable read-only up front, so `initialize`
        // fails fast instead of deferring the error to the first query.
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| CodexError::StoreOpenFailed { path: path.to_path_buf(), source })?;
        Ok(Self { path: path.to_path_buf() })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        CONN_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            if !cache.contains_key(&self.path) {
                let conn = Connection::open_with_flags(
                    &self.path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                cache.insert(self.path.clone(), conn);
            }
            f(cache.get(&self.path).expect("just inserted"))
        })
    }

    pub fn fetch_concepts_by_ids(&self, ids: &[i64]) -> rusqlite::Result<Vec<Concept>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let placeholders = std::iter::repeat("?").take(ids.len()).collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT concept_id, concept_name, domain_id, vocabulary_id, concept_class_id, \
                 standard_concept, concept_code, invalid_reason FROM concept WHERE concept_id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let params = rusqlite::params_from_iter(ids.iter());
            let rows = stmt.query_map(params, row_to_concept)?;
            rows.collect()
        })
    }

    pub fn fetch_descendants(&self, ancestor_id: i64) -> rusqlite::Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT descendant_concept_id FROM concept_ancestor WHERE ancestor_concept_id = ?1",
            )?;
            let rows = stmt.query_map([ancestor_id], |row| row.get(0))?;
            rows.collect()
        })
    }

    pub fn fetch_translations(
        &self,
        source_id: i64,
        relationship: &str,
        target_vocab: Option<&str>,
    ) -> rusqlite::Result<Vec<Concept>> {
        self.with_conn(|conn| {
            let sql = if target_vocab.is_some() {
                "SELECT c.concept_id, c.concept_name, c.domain_id, c.vocabulary_id, c.concept_class_id, \
                 c.standard_concept, c.concept_code, c.invalid_reason \
                 FROM concept_relationship cr JOIN concept c ON cr.concept_id_2 = c.concept_id \
                 WHERE cr.concept_id_1 = ?1 AND cr.relationship_id = ?2 AND cr.invalid_reason IS NULL \
                 AND c.invalid_reason IS NULL AND c.vocabulary_id = ?3"
            } else {
                "SELECT c.concept_id, c.concept_name, c.domain_id, c.vocabulary_id, c.concept_class_id, \
                 c.standard_concept, c.concept_code, c.invalid_reason \
                 FROM concept_relationship cr JOIN concept c ON cr.concept_id_2 = c.concept_id \
                 WHERE cr.concept_id_1 = ?1 AND cr.relationship_id = ?2 AND cr.invalid_reason IS NULL \
                 AND c.invalid_reason IS NULL"
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = if let Some(vocab) = target_vocab {
                stmt.query_map(rusqlite::params![source_id, relationship, vocab], row_to_concept)?
            } else {
                stmt.query_map(rusqlite::params![source_id, relationship], row_to_concept)?
            };
            rows.collect()
        })
    }

    pub fn check_edge(&self, src: i64, dst: i64, relationship: &str) -> rusqlite::Result<bool> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT 1 FROM concept_relationship WHERE concept_id_1 = ?1 AND concept_id_2 = ?2 \
                 AND relationship_id = ?3 AND invalid_reason IS NULL LIMIT 1",
            )?;
            Ok(stmt.exists(rusqlite::params![src, dst, relationship])?)
        })
    }

    pub fn fetch_standard_mappings(&self, source_ids: &[i64]) -> rusqlite::Result<HashMap<i64, i64>> {
        if source_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.with_conn(|conn| {
            let placeholders = std::iter::repeat("?").take(source_ids.len()).collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT cr.concept_id_1, c.concept_id FROM concept_relationship cr \
                 JOIN concept c ON cr.concept_id_2 = c.concept_id \
                 WHERE cr.concept_id_1 IN ({placeholders}) AND cr.relationship_id = 'Maps to' \
                 AND cr.invalid_reason IS NULL AND c.invalid_reason IS NULL AND c.standard_concept = 'S'"
            );
            let mut stmt = conn.prepare(&sql)?;
            let params = rusqlite::params_from_iter(source_ids.iter());
            let rows = stmt.query_map(params, |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
            let mut map = HashMap::new();
            for row in rows {
                let (src, dst) = row?;
                // First row wins per source id; spec leaves the tie-break
                // among multiple valid "Maps to" targets unspecified.
                map.entry(src).or_insert(dst);
            }
            Ok(map)
        })
    }
}

fn row_to_concept(row: &rusqlite::Row) -> rusqlite::Result<Concept> {
    Ok(Concept {
        concept_id: row.get(0)?,
        concept_name: row.get(1)?,
        domain_id: row.get(2)?,
        vocabulary_id: row.get(3)?,
        concept_class_id: row.get(4)?,
        standard_concept: row.get(5)?,
        concept_code: row.get(6)?,
        invalid_reason: row.get(7)?,
    })
}
