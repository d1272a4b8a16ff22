use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

use crate::embedder::Embedder;
use crate::error::{CodexError, Result};
use crate::manifest::{load_manifest, verify_integrity};
use crate::model::Manifest;
use crate::store::{RelationalStore, VectorStore};

const RELATIONAL_FILE: &str = "vocab.db";
const VECTOR_DIR: &str = "vectors";

/// Everything the query path needs, built fully before publication.
pub struct Context {
    pub manifest: Manifest,
    pub relational: RelationalStore,
    pub vector: VectorStore,
    pub embedder: Arc<dyn Embedder>,
}

static CONTEXT: OnceLock<RwLock<Option<Arc<Context>>>> = OnceLock::new();

fn slot() -> &'static RwLock<Option<Arc<Context>>> {
    CONTEXT.get_or_init(|| RwLock::new(None))
}

/// Loads, verifies, and opens a Codex Pack, then publishes it as the
/// process-wide context. Built entirely off to the side: a failing call
/// never mutates the context the last successful call published.
pub fn initialize(pack_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<()> {
    let span = tracing::info_span!("initialize", pack_dir = %pack_dir.display());
    let _enter = span.enter();

    let manifest = load_manifest(pack_dir)?;
    verify_integrity(pack_dir, &manifest)?;

    let relational_path = pack_dir.join(RELATIONAL_FILE);
    let vector_path = pack_dir.join(VECTOR_DIR);

    let relational = RelationalStore::open(&relational_path)?;
    let vector = VectorStore::open(&vector_path)?;

    let context = Arc::new(Context { manifest, relational, vector, embedder });
    let version = context.manifest.version.clone();

    let mut guard = slot().write().expect("runtime context lock poisoned");
    *guard = Some(context);
    tracing::info!(version = %version, "codex pack published");
    Ok(())
}

/// Returns the currently published context, or `NotInitialized` if
/// `initialize` has never succeeded.
pub fn get() -> Result<Arc<Context>> {
    slot()
        .read()
        .expect("runtime context lock poisoned")
        .clone()
        .ok_or(CodexError::NotInitialized)
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    let mut guard = slot().write().expect("runtime context lock poisoned");
    *guard = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::embedder::Embedder;
    use std::io::Write;

    struct StubEmbedder;
    impl Embedder for StubEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, String> {
            Ok(vec![0.1, 0.2])
        }
    }

    fn write_source(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        let concept = "concept_id,concept_name,domain_id,vocabulary_id,concept_class_id,standard_concept,concept_code,invalid_reason\n\
1,Test concept,Condition,SNOMED,Clinical Finding,S,1,\n";
        let mut f = std::fs::File::create(dir.join("CONCEPT.csv")).unwrap();
        f.write_all(concept.as_bytes()).unwrap();
        std::fs::write(
            dir.join("CONCEPT_RELATIONSHIP.csv"),
            "concept_id_1,concept_id_2,relationship_id,invalid_reason\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("CONCEPT_ANCESTOR.csv"),
            "ancestor_concept_id,descendant_concept_id,min_levels_of_separation,max_levels_of_separation\n1,1,0,0\n",
        )
        .unwrap();
    }

    #[test]
    fn failing_initialize_preserves_prior_context() {
        // Exclusive use of the process-wide slot: no other test touches it.
        reset_for_test();

        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        let pack = tmp.path().join("pack");
        write_source(&source);
        Builder::new(&source, &pack).build(&StubEmbedder, "v1", "2025-01-01", 10_000).unwrap();

        initialize(&pack, Arc::new(StubEmbedder)).unwrap();
        let first = get().unwrap();
        assert_eq!(first.manifest.version, "v1");

        let missing = tmp.path().join("does-not-exist");
        let err = initialize(&missing, Arc::new(StubEmbedder)).unwrap_err();
        assert!(matches!(err, CodexError::ManifestMissing(_)));

        let still = get().unwrap();
        assert_eq!(still.manifest.version, "v1");

        reset_for_test();
    }
}
