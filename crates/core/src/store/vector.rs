use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CodexError, Result};

const INDEX_FILE: &str = "shards.json";
const SHARD_FILE: &str = "shard_0.bin";

/// One row as stored on disk. Carries `domain_id` internally so `nearest`
/// can push a prefilter down without widening the public `VectorRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRow {
    pub vector: Vec<f32>,
    pub concept_id: i64,
    pub concept_name: String,
    pub domain_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ShardIndex {
    dim: usize,
    shards: Vec<String>,
}

/// A nearest-neighbor result: the concept id and its cosine distance in
/// `[0, 2]`.
pub struct NearestHit {
    pub concept_id: i64,
    pub concept_name: String,
    pub distance: f32,
}

/// An optional push-down predicate on the vector store's internal
/// `domain_id` column.
pub struct Prefilter<'a> {
    pub domain_id: &'a str,
}

/// A read-only, in-memory vector index loaded from a shard directory.
pub struct VectorStore {
    dim: usize,
    concept_ids: Vec<i64>,
    concept_names: Vec<String>,
    domain_ids: Vec<String>,
    embeddings: Vec<f32>, // row-major, len == concept_ids.len() * dim
}

impl VectorStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let index_path = dir.join(INDEX_FILE);
        let raw = fs::read(&index_path).map_err(|_| CodexError::ArtifactMissing(index_path.clone()))?;
        let index: ShardIndex = serde_json::from_slice(&raw)
            .map_err(|source| CodexError::ManifestMalformed { path: index_path.clone(), source })?;

        let mut concept_ids = Vec::new();
        let mut concept_names = Vec::new();
        let mut domain_ids = Vec::new();
        let mut embeddings = Vec::new();

        for shard_name in &index.shards {
            let shard_path = dir.join(shard_name);
            let bytes = fs::read(&shard_path).map_err(|_| CodexError::ArtifactMissing(shard_path.clone()))?;
            let rows: Vec<StoredRow> = bincode::deserialize(&bytes)
                .map_err(|_| CodexError::ArtifactMissing(shard_path.clone()))?;
            for row in rows {
                if row.vector.len() != index.dim {
                    return Err(CodexError::EmbedderShape { expected: index.dim, actual: row.vector.len() });
                }
                embeddings.extend_from_slice(&row.vector);
                concept_ids.push(row.concept_id);
                concept_names.push(row.concept_name);
                domain_ids.push(row.domain_id);
            }
        }

        Ok(Self {
            dim: index.dim,
            concept_ids,
            concept_names,
            domain_ids,
            embeddings,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Returns the `k` nearest rows to `query` by ascending cosine distance,
    /// optionally restricted to rows matching `prefilter`.
    pub fn nearest(&self, query: &[f32], k: usize, prefilter: Option<Prefilter>) -> Vec<NearestHit> {
        if query.len() != self.dim {
            return Vec::new();
        }
        let query_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(self.concept_ids.len());

        for i in 0..self.concept_ids.len() {
            if let Some(pf) = &prefilter {
                if self.domain_ids[i] != pf.domain_id {
                    continue;
                }
            }
            let row = &self.embeddings[i * self.dim..(i + 1) * self.dim];
            let distance = cosine_distance(query, query_norm, row);
            scored.push((i, distance));
        }

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(i, distance)| NearestHit {
                concept_id: self.concept_ids[i],
                concept_name: self.concept_names[i].clone(),
                distance,
            })
            .collect()
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_distance(query: &[f32], query_norm: f32, row: &[f32]) -> f32 {
    let row_norm = l2_norm(row);
    if query_norm == 0.0 || row_norm == 0.0 {
        return 2.0;
    }
    let dot: f32 = query.iter().zip(row.iter()).map(|(a, b)| a * b).sum();
    let cosine_sim = (dot / (query_norm * row_norm)).clamp(-1.0, 1.0);
    1.0 - cosine_sim
}

/// Writer used by the builder: overwrites any existing shard directory.
pub struct VectorStoreWriter {
    dir: PathBuf,
    dim: Option<usize>,
    rows: Vec<StoredRow>,
}

impl VectorStoreWriter {
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf(), dim: None, rows: Vec::new() }
    }

    pub fn push(&mut self, vector: Vec<f32>, concept_id: i64, concept_name: String, domain_id: String) -> Result<()> {
        match self.dim {
            None => self.dim = Some(vector.len()),
            Some(d) if d != vector.len() => {
                return Err(CodexError::EmbedderShape { expected: d, actual: vector.len() })
            }
            Some(_) => {}
        }
        self.rows.push(StoredRow { vector, concept_id, concept_name, domain_id });
        Ok(())
    }

    /// Flushes all pushed rows to disk, replacing any prior contents of the
    /// shard directory.
    pub fn finish(self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)
                .map_err(|e| CodexError::BuildFailed { stage: "build_vectors", reason: e.to_string() })?;
        }
        fs::create_dir_all(&self.dir)
            .map_err(|e| CodexError::BuildFailed { stage: "build_vectors", reason: e.to_string() })?;

        let dim = self.dim.unwrap_or(0);
        let shard_path = self.dir.join(SHARD_FILE);
        let bytes = bincode::serialize(&self.rows)
            .map_err(|e| CodexError::BuildFailed { stage: "build_vectors", reason: e.to_string() })?;
        fs::write(&shard_path, bytes)
            .map_err(|e| CodexError::BuildFailed { stage: "build_vectors", reason: e.to_string() })?;

        let index = ShardIndex { dim, shards: vec![SHARD_FILE.to_string()] };
        let index_bytes = serde_json::to_vec_pretty(&index)
            .map_err(|e| CodexError::BuildFailed { stage: "build_vectors", reason: e.to_string() })?;
        fs::write(self.dir.join(INDEX_FILE), index_bytes)
            .map_err(|e| CodexError::BuildFailed { stage: "build_vectors", reason: e.to_string() })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_store(dir: &Path, rows: Vec<(Vec<f32>, i64, &str, &str)>) {
        let mut writer = VectorStoreWriter::new(dir);
        for (vector, concept_id, name, domain) in rows {
            writer.push(vector, concept_id, name.to_string(), domain.to_string()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn nearest_orders_by_ascending_distance() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            vec![
                (vec![1.0, 0.0], 1, "a", "Condition"),
                (vec![0.0, 1.0], 2, "b", "Condition"),
                (vec![0.9, 0.1], 3, "c", "Condition"),
            ],
        );
        let store = VectorStore::open(dir.path()).unwrap();
        let hits = store.nearest(&[1.0, 0.0], 3, None);
        assert_eq!(hits[0].concept_id, 1);
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits[1].distance <= hits[2].distance);
    }

    #[test]
    fn prefilter_excludes_other_domains() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            vec![
                (vec![1.0, 0.0], 1, "a", "Condition"),
                (vec![1.0, 0.0], 2, "b", "Drug"),
            ],
        );
        let store = VectorStore::open(dir.path()).unwrap();
        let hits = store.nearest(&[1.0, 0.0], 10, Some(Prefilter { domain_id: "Drug" }));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].concept_id, 2);
    }
}
