pub mod builder;
pub mod crosswalker;
pub mod embedder;
pub mod error;
pub mod hierarchy;
pub mod manifest;
pub mod model;
pub mod normalizer;
pub mod runtime;
pub mod store;

pub use error::{CodexError, Result};
pub use model::{CodexMatch, Concept, ConceptAncestor, ConceptRelationship, Manifest, VectorRecord};

use std::path::Path;
use std::sync::Arc;

use embedder::Embedder;

/// Loads, verifies, and publishes a Codex Pack as the process-wide runtime
/// context. See [`runtime::initialize`].
pub fn initialize(pack_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<()> {
    runtime::initialize(pack_dir, embedder)
}

/// Maps free text to zero or more [`CodexMatch`] results ordered by
/// descending similarity, against the currently published context.
pub fn normalize(text: &str, k: usize, domain_filter: Option<&str>) -> Result<Vec<CodexMatch>> {
    let ctx = runtime::get()?;
    normalizer::normalize(text, k, domain_filter, ctx.embedder.as_ref(), &ctx.vector, &ctx.relational)
}

/// Returns every descendant (including the concept itself) of
/// `concept_id` in the transitive closure table.
pub fn get_descendants(concept_id: i64) -> Result<Vec<i64>> {
    let ctx = runtime::get()?;
    Ok(hierarchy::get_descendants(&ctx.relational, concept_id))
}

/// Translates a code to its mapped concepts via the given relationship
/// (defaults to `"Maps to"`), optionally restricted to a target
/// vocabulary.
pub fn translate_code(
    source_id: i64,
    relationship: Option<&str>,
    target_vocab: Option<&str>,
) -> Result<Vec<Concept>> {
    let ctx = runtime::get()?;
    Ok(crosswalker::translate_code(&ctx.relational, source_id, relationship, target_vocab))
}

/// True iff an active edge exists from `a` to `b` with exactly
/// `relationship`.
pub fn check_relationship(a: i64, b: i64, relationship: &str) -> Result<bool> {
    let ctx = runtime::get()?;
    Ok(crosswalker::check_relationship(&ctx.relational, a, b, relationship))
}
