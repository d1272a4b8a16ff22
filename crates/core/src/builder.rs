use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::embedder::Embedder;
use crate::error::{CodexError, Result};
use crate::manifest::{hash_directory, hash_file};
use crate::model::Manifest;
use crate::store::VectorStoreWriter;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

const REQUIRED_SOURCES: [&str; 3] = ["CONCEPT.csv", "CONCEPT_RELATIONSHIP.csv", "CONCEPT_ANCESTOR.csv"];
const RELATIONAL_FILE: &str = "vocab.db";
const VECTOR_DIR: &str = "vectors";
const MANIFEST_FILE: &str = "manifest.json";

/// Ingests raw OMOP CSVs into a relational store, streams embeddings into a
/// vector store, and emits a deterministic manifest. Stages run
/// sequentially and the builder is never run concurrently with the query
/// path.
pub struct Builder {
    source_dir: PathBuf,
    output_dir: PathBuf,
}

impl Builder {
    pub fn new(source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self { source_dir: source_dir.into(), output_dir: output_dir.into() }
    }

    pub fn build(
        &self,
        embedder: &dyn Embedder,
        version: &str,
        source_date: &str,
        batch_size: usize,
    ) -> Result<()> {
        self.verify_source_files()?;
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| CodexError::BuildFailed { stage: "setup", reason: e.to_string() })?;

        tracing::info!(source = %self.source_dir.display(), "building relational store");
        self.build_relational_store()?;
        tracing::info!(batch_size, "streaming embeddings into vector store");
        self.build_vector_store(embedder, batch_size)?;
        tracing::info!(version, source_date, "generating manifest");
        self.generate_manifest(version, source_date)?;
        tracing::info!(output = %self.output_dir.display(), "build complete");
        Ok(())
    }

    fn verify_source_files(&self) -> Result<()> {
        for name in REQUIRED_SOURCES {
            let path = self.source_dir.join(name);
            if !path.is_file() {
                return Err(CodexError::SourceMissing(path));
            }
        }
        Ok(())
    }

    fn build_relational_store(&self) -> Result<()> {
        let db_path = self.output_dir.join(RELATIONAL_FILE);
        if db_path.exists() {
            let _ = fs::remove_file(&db_path);
        }

        let result = self.try_build_relational_store(&db_path);
        if result.is_err() {
            let _ = fs::remove_file(&db_path);
        }
        result
    }

    fn try_build_relational_store(&self, db_path: &Path) -> Result<()> {
        let conn = Connection::open(db_path)
            .map_err(|source| CodexError::StoreOpenFailed { path: db_path.to_path_buf(), source })?;

        load_csv_table(&conn, &self.source_dir.join("CONCEPT.csv"), "concept")?;
        load_csv_table(&conn, &self.source_dir.join("CONCEPT_RELATIONSHIP.csv"), "concept_relationship")?;
        load_csv_table(&conn, &self.source_dir.join("CONCEPT_ANCESTOR.csv"), "concept_ancestor")?;

        let indexes = [
            "CREATE INDEX idx_concept_id ON concept(concept_id)",
            "CREATE INDEX idx_ancestor_id ON concept_ancestor(ancestor_concept_id)",
            "CREATE INDEX idx_descendant_id ON concept_ancestor(descendant_concept_id)",
            "CREATE INDEX idx_cr_concept_1 ON concept_relationship(concept_id_1)",
            "CREATE INDEX idx_cr_concept_2 ON concept_relationship(concept_id_2)",
        ];
        for stmt in indexes {
            conn.execute(stmt, [])
                .map_err(|e| CodexError::BuildFailed { stage: "build_relational_store", reason: e.to_string() })?;
        }
        Ok(())
    }

    /// Streams `concept` rows out of the relational store in `batch_size`
    /// chunks: each chunk is embedded and pushed to the vector store writer
    /// before the next chunk is pulled off the cursor, so at most one
    /// batch's rows and vectors are held in memory at a time.
    fn build_vector_store(&self, embedder: &dyn Embedder, batch_size: usize) -> Result<()> {
        let db_path = self.output_dir.join(RELATIONAL_FILE);
        let conn = Connection::open_with_flags(&db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|source| CodexError::StoreOpenFailed { path: db_path.clone(), source })?;

        let mut stmt = conn
            .prepare("SELECT concept_id, concept_name, domain_id FROM concept WHERE concept_name IS NOT NULL AND concept_name <> ''")
            .map_err(|e| CodexError::BuildFailed { stage: "build_vectors", reason: e.to_string() })?;
        let mut cursor = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(|e| CodexError::BuildFailed { stage: "build_vectors", reason: e.to_string() })?;

        let vector_dir = self.output_dir.join(VECTOR_DIR);
        let mut writer = VectorStoreWriter::new(&vector_dir);
        let batch_size = batch_size.max(1);

        loop {
            let mut batch: Vec<(i64, String, String)> = Vec::with_capacity(batch_size);
            for row in cursor.by_ref().take(batch_size) {
                batch.push(row.map_err(|e| CodexError::BuildFailed { stage: "build_vectors", reason: e.to_string() })?);
            }
            if batch.is_empty() {
                break;
            }

            let names: Vec<String> = batch.iter().map(|(_, name, _)| name.clone()).collect();
            let vectors = embedder.embed_batch(&names).map_err(CodexError::EmbedderFailure)?;
            if vectors.len() != names.len() {
                return Err(CodexError::EmbedderShape { expected: names.len(), actual: vectors.len() });
            }

            for ((concept_id, concept_name, domain_id), vector) in batch.into_iter().zip(vectors.into_iter()) {
                writer.push(vector, concept_id, concept_name, domain_id)?;
            }
        }
        writer.finish()
    }

    fn generate_manifest(&self, version: &str, source_date: &str) -> Result<()> {
        let mut checksums = BTreeMap::new();

        let db_path = self.output_dir.join(RELATIONAL_FILE);
        if db_path.exists() {
            checksums.insert(RELATIONAL_FILE.to_string(), hash_file(&db_path)?);
        }

        let vector_dir = self.output_dir.join(VECTOR_DIR);
        if vector_dir.exists() {
            checksums.insert(VECTOR_DIR.to_string(), hash_directory(&vector_dir)?);
        }

        let manifest = Manifest { version: version.to_string(), source_date: source_date.to_string(), checksums };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| CodexError::BuildFailed { stage: "generate_manifest", reason: e.to_string() })?;
        fs::write(self.output_dir.join(MANIFEST_FILE), json)
            .map_err(|e| CodexError::BuildFailed { stage: "generate_manifest", reason: e.to_string() })?;
        Ok(())
    }
}

/// Loads one CSV file into a freshly created table, inferring column types
/// from the header: identifier-shaped columns become `INTEGER`, everything
/// else `TEXT`.
fn load_csv_table(conn: &Connection, csv_path: &Path, table_name: &str) -> Result<()> {
    let file = fs::File::open(csv_path)
        .map_err(|_| CodexError::SourceMissing(csv_path.to_path_buf()))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(csv_path)?)
        .has_headers(true)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CodexError::BuildFailed { stage: "build_relational_store", reason: e.to_string() })?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let columns: Vec<String> = headers
        .iter()
        .map(|h| format!("{} {}", h, column_type(h)))
        .collect();
    let create_sql = format!("CREATE TABLE {table_name} ({})", columns.join(", "));
    conn.execute(&create_sql, [])
        .map_err(|e| CodexError::BuildFailed { stage: "build_relational_store", reason: e.to_string() })?;

    let placeholders = std::iter::repeat("?").take(headers.len()).collect::<Vec<_>>().join(",");
    let insert_sql = format!("INSERT INTO {table_name} VALUES ({placeholders})");
    let mut insert_stmt = conn
        .prepare(&insert_sql)
        .map_err(|e| CodexError::BuildFailed { stage: "build_relational_store", reason: e.to_string() })?;

    for record in reader.records() {
        let record = record.map_err(|e| CodexError::BuildFailed { stage: "build_relational_store", reason: e.to_string() })?;
        let values: Vec<rusqlite::types::Value> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let raw = record.get(i).unwrap_or("");
                if raw.is_empty() {
                    rusqlite::types::Value::Null
                } else if column_type(h) == "INTEGER" {
                    raw.parse::<i64>()
                        .map(rusqlite::types::Value::Integer)
                        .unwrap_or(rusqlite::types::Value::Text(raw.to_string()))
                } else {
                    rusqlite::types::Value::Text(raw.to_string())
                }
            })
            .collect();
        insert_stmt
            .execute(rusqlite::params_from_iter(values.iter()))
            .map_err(|e| CodexError::BuildFailed { stage: "build_relational_store", reason: e.to_string() })?;
    }
    Ok(())
}

fn column_type(header: &str) -> &'static str {
    if header == "concept_id"
        || header.ends_with("_concept_id")
        || header.ends_with("_id_1")
        || header.ends_with("_id_2")
        || header == "min_levels_of_separation"
        || header == "max_levels_of_separation"
    {
        "INTEGER"
    } else {
        "TEXT"
    }
}

fn sniff_delimiter(csv_path: &Path) -> Result<u8> {
    let contents = fs::read_to_string(csv_path)
        .map_err(|_| CodexError::SourceMissing(csv_path.to_path_buf()))?;
    let first_line = contents.lines().next().unwrap_or("");
    if first_line.contains('\t') && !first_line.contains(',') {
        Ok(b'\t')
    } else {
        Ok(b',')
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::embedder::Embedder;
    use crate::store::RelationalStore;
    use std::io::Write;

    struct StubEmbedder;
    impl Embedder for StubEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, String> {
            Ok(vec![0.0, 0.0])
        }
    }

    const CONCEPT_CSV: &str = "concept_id,concept_name,domain_id,vocabulary_id,concept_class_id,standard_concept,concept_code,invalid_reason\n\
441840,Clinical finding,Condition,SNOMED,Clinical Finding,S,441840,\n\
312327,Acute myocardial infarction,Condition,SNOMED,Clinical Finding,S,22298006,\n\
201820,Diabetes mellitus,Condition,SNOMED,Clinical Finding,S,73211009,\n\
31967,Hypertension,Condition,SNOMED,Clinical Finding,S,38341003,\n\
999999,Acute myocardial infarction unspecified,Condition,ICD10CM,Clinical Finding,,I21.9,\n\
1503297,Metformin,Drug,RxNorm,Ingredient,S,6809,\n";

    const RELATIONSHIP_CSV: &str = "concept_id_1,concept_id_2,relationship_id,invalid_reason\n\
999999,312327,Maps to,\n";

    const ANCESTOR_CSV: &str = "ancestor_concept_id,descendant_concept_id,min_levels_of_separation,max_levels_of_separation\n\
441840,441840,0,0\n\
441840,312327,1,1\n\
441840,201820,1,1\n\
441840,31967,1,1\n";

    /// Builds a small, self-contained relational store used across the
    /// hierarchy/crosswalker/normalizer unit tests.
    pub(crate) fn build_sample_store(dir: &Path) -> RelationalStore {
        let source_dir = dir.join("source");
        let output_dir = dir.join("output");
        fs::create_dir_all(&source_dir).unwrap();

        write_csv(&source_dir.join("CONCEPT.csv"), CONCEPT_CSV);
        write_csv(&source_dir.join("CONCEPT_RELATIONSHIP.csv"), RELATIONSHIP_CSV);
        write_csv(&source_dir.join("CONCEPT_ANCESTOR.csv"), ANCESTOR_CSV);

        let builder = Builder::new(&source_dir, &output_dir);
        builder.build(&StubEmbedder, "v-test", "2025-01-01", 10_000).unwrap();

        RelationalStore::open(&output_dir.join(RELATIONAL_FILE)).unwrap()
    }

    fn write_csv(path: &Path, contents: &str) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::Embedder;

    struct StubEmbedder;
    impl Embedder for StubEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, String> {
            Ok(vec![0.1, 0.2])
        }
    }

    #[test]
    fn missing_source_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let builder = Builder::new(dir.path().join("source"), dir.path().join("output"));
        let err = builder.build(&StubEmbedder, "v1", "2025-01-01", 100).unwrap_err();
        assert!(matches!(err, CodexError::SourceMissing(_)));
    }

    #[test]
    fn build_produces_manifest_and_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_support::build_sample_store(dir.path());
        drop(store);

        let manifest_path = dir.path().join("output").join(MANIFEST_FILE);
        assert!(manifest_path.is_file());
        let raw = fs::read_to_string(&manifest_path).unwrap();
        let manifest: Manifest = serde_json::from_str(&raw).unwrap();
        assert!(manifest.checksums.contains_key(RELATIONAL_FILE));
        assert!(manifest.checksums.contains_key(VECTOR_DIR));
    }
}
