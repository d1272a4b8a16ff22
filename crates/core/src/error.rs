use std::path::PathBuf;

use thiserror::Error;

/// The closed set of failure kinds the core can surface across its boundary.
/// Internal causes are attached via `#[source]` for diagnostics; callers
/// should match on the variant, not the wrapped cause.
#[derive(Debug, Error)]
pub enum CodexError {
    #[error("manifest.json not found at {0}")]
    ManifestMissing(PathBuf),

    #[error("manifest.json at {path} is not valid JSON: {source}")]
    ManifestMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest.json at {0} is missing required fields")]
    ManifestSchemaInvalid(PathBuf),

    #[error("security violation: {path} escapes the pack root via path traversal")]
    PathTraversal { path: PathBuf },

    #[error("security violation: {path} is a symbolic link")]
    SymlinkRejected { path: PathBuf },

    #[error("artifact referenced by manifest is missing: {0}")]
    ArtifactMissing(PathBuf),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("failed to open store at {path}: {source}")]
    StoreOpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid domain_filter: {domain_filter:?} does not match ^[A-Za-z0-9_]+$")]
    InvalidInput { domain_filter: String },

    #[error("embedder failed: {0}")]
    EmbedderFailure(String),

    #[error("embedder returned {actual} vectors for {expected} inputs")]
    EmbedderShape { expected: usize, actual: usize },

    #[error("required source file missing: {0}")]
    SourceMissing(PathBuf),

    #[error("build failed at stage {stage}: {reason}")]
    BuildFailed { stage: &'static str, reason: String },

    #[error("runtime context has not been initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, CodexError>;
