use crate::store::RelationalStore;

/// Returns every `descendant_concept_id` where `ancestor_concept_id =
/// concept_id` in the closure table, including the concept itself (the
/// closure table is self-reflexive). Store errors are swallowed to an
/// empty list with a logged error — hierarchy failures must not cascade to
/// the caller.
pub fn get_descendants(relational_store: &RelationalStore, concept_id: i64) -> Vec<i64> {
    match relational_store.fetch_descendants(concept_id) {
        Ok(ids) => ids,
        Err(err) => {
            tracing::error!(concept_id, error = %err, "get_descendants lookup failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::test_support::build_sample_store;

    #[test]
    fn descendants_include_self() {
        let dir = tempfile::tempdir().unwrap();
        let store = build_sample_store(dir.path());
        let descendants = get_descendants(&store, 441840);
        assert!(descendants.contains(&441840));
        assert!(descendants.contains(&312327));
    }

    #[test]
    fn unknown_concept_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = build_sample_store(dir.path());
        assert_eq!(get_descendants(&store, 9_999_999), Vec::<i64>::new());
    }
}
