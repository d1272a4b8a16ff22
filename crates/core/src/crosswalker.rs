use crate::model::Concept;
use crate::store::RelationalStore;

const DEFAULT_RELATIONSHIP: &str = "Maps to";

/// Joins `ConceptRelationship` (from `source_id`, active) with `Concept`
/// (active) where the relationship matches; optionally filters targets by
/// `vocabulary_id`. Store errors are swallowed to an empty list.
pub fn translate_code(
    relational_store: &RelationalStore,
    source_id: i64,
    relationship: Option<&str>,
    target_vocab: Option<&str>,
) -> Vec<Concept> {
    let relationship = relationship.unwrap_or(DEFAULT_RELATIONSHIP);
    match relational_store.fetch_translations(source_id, relationship, target_vocab) {
        Ok(concepts) => concepts,
        Err(err) => {
            tracing::error!(source_id, relationship, error = %err, "translate_code lookup failed");
            Vec::new()
        }
    }
}

/// True iff an active edge exists in exactly that direction with exactly
/// that `relationship_id`. Direction is strict: `check_relationship(a, b,
/// r)` and `check_relationship(b, a, r)` are independent.
pub fn check_relationship(
    relational_store: &RelationalStore,
    src: i64,
    dst: i64,
    relationship: &str,
) -> bool {
    match relational_store.check_edge(src, dst, relationship) {
        Ok(exists) => exists,
        Err(err) => {
            tracing::error!(src, dst, relationship, error = %err, "check_relationship lookup failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::test_support::build_sample_store;

    #[test]
    fn translate_filters_by_target_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let store = build_sample_store(dir.path());

        let snomed = translate_code(&store, 999999, Some("Maps to"), Some("SNOMED"));
        assert_eq!(snomed.len(), 1);
        assert_eq!(snomed[0].concept_id, 312327);

        let rxnorm = translate_code(&store, 999999, Some("Maps to"), Some("RxNorm"));
        assert!(rxnorm.is_empty());
    }

    #[test]
    fn check_relationship_is_directional() {
        let dir = tempfile::tempdir().unwrap();
        let store = build_sample_store(dir.path());
        assert!(check_relationship(&store, 999999, 312327, "Maps to"));
        assert!(!check_relationship(&store, 312327, 999999, "Maps to"));
    }
}
