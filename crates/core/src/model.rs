use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An OMOP vocabulary unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub concept_id: i64,
    pub concept_name: String,
    pub domain_id: String,
    pub vocabulary_id: String,
    pub concept_class_id: String,
    pub standard_concept: Option<String>,
    pub concept_code: String,
    pub invalid_reason: Option<String>,
}

impl Concept {
    pub fn is_standard(&self) -> bool {
        self.standard_concept.as_deref() == Some("S")
    }
}

/// A directed edge between two concepts, e.g. `"Maps to"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRelationship {
    pub concept_id_1: i64,
    pub concept_id_2: i64,
    pub relationship_id: String,
    pub invalid_reason: Option<String>,
}

/// One row of the pre-computed transitive closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptAncestor {
    pub ancestor_concept_id: i64,
    pub descendant_concept_id: i64,
    pub min_levels_of_separation: i64,
    pub max_levels_of_separation: i64,
}

/// One embeddable concept name and its vector, as seen by callers of the
/// vector store. The store keeps an additional `domain_id` column
/// internally for prefiltering; it is not part of this public shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub vector: Vec<f32>,
    pub concept_id: i64,
    pub concept_name: String,
}

/// Identifies a Codex Pack and seals its artifacts with checksums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub source_date: String,
    pub checksums: BTreeMap<String, String>,
}

/// One normalization result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodexMatch {
    pub input_text: String,
    pub match_concept: Concept,
    pub similarity_score: f32,
    pub is_standard: bool,
    pub mapped_standard_id: Option<i64>,
}
