use std::collections::HashMap;

use regex::Regex;
use std::sync::OnceLock;

use crate::embedder::Embedder;
use crate::error::{CodexError, Result};
use crate::model::CodexMatch;
use crate::store::{Prefilter, RelationalStore, VectorStore};

fn domain_filter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static pattern"))
}

pub const DEFAULT_K: usize = 10;

/// Maps free text to zero or more `CodexMatch` results ordered by
/// descending similarity.
pub fn normalize(
    text: &str,
    k: usize,
    domain_filter: Option<&str>,
    embedder: &dyn Embedder,
    vector_store: &VectorStore,
    relational_store: &RelationalStore,
) -> Result<Vec<CodexMatch>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if let Some(filter) = domain_filter {
        if !domain_filter_pattern().is_match(filter) {
            return Err(CodexError::InvalidInput { domain_filter: filter.to_string() });
        }
    }

    let vector = embedder
        .embed(trimmed)
        .map_err(CodexError::EmbedderFailure)?;
    if vector.len() != vector_store.dim() {
        return Err(CodexError::EmbedderFailure(format!(
            "embedder produced a {}-dimensional vector, expected {}",
            vector.len(),
            vector_store.dim()
        )));
    }

    let prefilter = domain_filter.map(|domain_id| Prefilter { domain_id });
    let hits = vector_store.nearest(&vector, k, prefilter);
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    // Score keying: the vector store returns hits by ascending distance, so
    // the first occurrence of a concept_id is its best (closest) score.
    // Later duplicates (synonyms stored separately) must not overwrite it.
    let mut best_similarity: HashMap<i64, f32> = HashMap::new();
    let mut order: Vec<i64> = Vec::new();
    for hit in &hits {
        if best_similarity.contains_key(&hit.concept_id) {
            continue;
        }
        let similarity = (1.0 - hit.distance).clamp(0.0, 1.0);
        best_similarity.insert(hit.concept_id, similarity);
        order.push(hit.concept_id);
    }

    let ids: Vec<i64> = order.clone();
    let concepts = relational_store
        .fetch_concepts_by_ids(&ids)
        .unwrap_or_default();
    let mut concept_by_id: HashMap<i64, _> = concepts.into_iter().map(|c| (c.concept_id, c)).collect();

    if let Some(filter) = domain_filter {
        concept_by_id.retain(|_, c| c.domain_id == filter);
    }

    let non_standard_ids: Vec<i64> = order
        .iter()
        .filter_map(|id| concept_by_id.get(id))
        .filter(|c| !c.is_standard())
        .map(|c| c.concept_id)
        .collect();

    let mappings = if non_standard_ids.is_empty() {
        HashMap::new()
    } else {
        relational_store
            .fetch_standard_mappings(&non_standard_ids)
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "fetch_standard_mappings failed during normalize");
                HashMap::new()
            })
    };

    let mut matches: Vec<CodexMatch> = Vec::new();
    for id in &order {
        let Some(concept) = concept_by_id.get(id) else {
            continue; // orphan: vector index references a concept the relational store lacks
        };
        let is_standard = concept.is_standard();
        let mapped_standard_id = if is_standard { None } else { mappings.get(id).copied() };
        matches.push(CodexMatch {
            input_text: text.to_string(),
            match_concept: concept.clone(),
            similarity_score: best_similarity[id],
            is_standard,
            mapped_standard_id,
        });
    }

    matches.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(matches)
}
