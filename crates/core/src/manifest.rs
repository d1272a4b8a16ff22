use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{CodexError, Result};
use crate::model::Manifest;

const MANIFEST_FILE: &str = "manifest.json";

/// Reads and parses `<pack_dir>/manifest.json`.
pub fn load_manifest(pack_dir: &Path) -> Result<Manifest> {
    let path = pack_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(CodexError::ManifestMissing(path));
    }
    let raw = fs::read_to_string(&path)
        .map_err(|_| CodexError::ManifestMissing(path.clone()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|source| CodexError::ManifestMalformed { path: path.clone(), source })?;

    let version = value.get("version").and_then(|v| v.as_str());
    let source_date = value.get("source_date").and_then(|v| v.as_str());
    let checksums = value.get("checksums").and_then(|v| v.as_object());
    let (version, source_date, checksums) = match (version, source_date, checksums) {
        (Some(v), Some(d), Some(c)) => (v, d, c),
        _ => return Err(CodexError::ManifestSchemaInvalid(path)),
    };

    let mut map = std::collections::BTreeMap::new();
    for (k, v) in checksums {
        if let Some(hex) = v.as_str() {
            map.insert(k.clone(), hex.to_string());
        } else {
            return Err(CodexError::ManifestSchemaInvalid(path));
        }
    }

    Ok(Manifest {
        version: version.to_string(),
        source_date: source_date.to_string(),
        checksums: map,
    })
}

/// Verifies every checksum entry in `manifest` against `pack_dir`, in the
/// order spec'd: lexical path-traversal rejection, then symlink rejection,
/// then existence, then hash comparison. The traversal check is purely
/// lexical (component-walking, no filesystem call) so an entry that both
/// escapes the pack root *and* does not exist still fails with
/// `PathTraversal` rather than `ArtifactMissing` — `fs::canonicalize`
/// requires the target to exist and so cannot be the traversal check.
pub fn verify_integrity(pack_dir: &Path, manifest: &Manifest) -> Result<()> {
    let root = fs::canonicalize(pack_dir)
        .map_err(|_| CodexError::ArtifactMissing(pack_dir.to_path_buf()))?;

    for (rel_path, expected_hex) in &manifest.checksums {
        let candidate = pack_dir.join(rel_path);
        if path_escapes_root(rel_path) {
            tracing::error!(path = %candidate.display(), "pack entry rejected: path traversal");
            return Err(CodexError::PathTraversal { path: candidate });
        }

        let symlink_meta = fs::symlink_metadata(&candidate)
            .map_err(|_| CodexError::ArtifactMissing(candidate.clone()))?;
        if symlink_meta.file_type().is_symlink() {
            tracing::error!(path = %candidate.display(), "pack entry rejected: symbolic link");
            return Err(CodexError::SymlinkRejected { path: candidate });
        }

        // Defense in depth: the lexical check already rejected `..`/absolute
        // escapes; this catches anything left (e.g. a symlinked ancestor
        // directory) now that the entry is known to exist.
        let resolved = fs::canonicalize(&candidate)
            .map_err(|_| CodexError::ArtifactMissing(candidate.clone()))?;
        if !resolved.starts_with(&root) {
            tracing::error!(path = %candidate.display(), "pack entry rejected: path traversal");
            return Err(CodexError::PathTraversal { path: candidate });
        }

        let actual_hex = if resolved.is_dir() {
            hash_directory(&resolved)?
        } else {
            hash_file(&resolved)?
        };

        if !constant_time_eq(&actual_hex, expected_hex) {
            tracing::error!(path = %candidate.display(), expected = %expected_hex, actual = %actual_hex, "checksum mismatch");
            return Err(CodexError::IntegrityMismatch {
                path: candidate,
                expected: expected_hex.clone(),
                actual: actual_hex,
            });
        }
    }
    tracing::debug!(pack_dir = %pack_dir.display(), entries = manifest.checksums.len(), "pack integrity verified");
    Ok(())
}

/// Rejects `rel_path` lexically, without touching the filesystem: absolute
/// paths, and any relative path whose `..` components would walk above the
/// pack root at some prefix, even if later components descend back down.
fn path_escapes_root(rel_path: &str) -> bool {
    use std::path::Component;

    let path = Path::new(rel_path);
    let mut depth: i32 = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}

/// Streamed SHA-256 of a regular file's bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|_| CodexError::ArtifactMissing(path.to_path_buf()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|_| CodexError::ArtifactMissing(path.to_path_buf()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Canonical content hash of a directory artifact: sort `(rel_path,
/// file_sha256_hex)` pairs lexicographically by path, then fold
/// `update(rel_path_bytes); update(file_hex_bytes)` into one SHA-256.
///
/// Deterministic regardless of the order the filesystem enumerates entries.
pub fn hash_directory(dir: &Path) -> Result<String> {
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    collect_files(dir, dir, &mut entries)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (rel_path, full_path) in &entries {
        let file_hex = hash_file(full_path)?;
        hasher.update(rel_path.as_bytes());
        hasher.update(file_hex.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    let read_dir = fs::read_dir(dir).map_err(|_| CodexError::ArtifactMissing(dir.to_path_buf()))?;
    for entry in read_dir {
        let entry = entry.map_err(|_| CodexError::ArtifactMissing(dir.to_path_buf()))?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)
            .map_err(|_| CodexError::ArtifactMissing(path.clone()))?;
        if meta.file_type().is_symlink() {
            return Err(CodexError::SymlinkRejected { path });
        }
        if meta.is_dir() {
            collect_files(root, &path, out)?;
        } else if meta.is_file() {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push((rel, path));
        }
    }
    Ok(())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_file_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"hello world").unwrap();
        let h1 = hash_file(&path).unwrap();
        let h2 = hash_file(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn hash_directory_is_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"second").unwrap();
        fs::write(dir.path().join("a.txt"), b"first").unwrap();
        let h1 = hash_directory(dir.path()).unwrap();

        let dir2 = tempfile::tempdir().unwrap();
        fs::write(dir2.path().join("a.txt"), b"first").unwrap();
        fs::write(dir2.path().join("b.txt"), b"second").unwrap();
        let h2 = hash_directory(dir2.path()).unwrap();

        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_directory_changes_on_mutation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"first").unwrap();
        let before = hash_directory(dir.path()).unwrap();

        let mut f = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("a.txt"))
            .unwrap();
        f.write_all(b"!").unwrap();
        let after = hash_directory(dir.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn verify_integrity_rejects_path_traversal_to_a_nonexistent_target() {
        // The escape target does not exist: the traversal check must still
        // fire (and fire first), not fall through to ArtifactMissing.
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.json"), b"{}").unwrap();
        let mut checksums = std::collections::BTreeMap::new();
        checksums.insert("../escape.txt".to_string(), "a".repeat(64));
        let manifest = Manifest {
            version: "v1".into(),
            source_date: "2025-01-01".into(),
            checksums,
        };
        let err = verify_integrity(dir.path(), &manifest).unwrap_err();
        assert!(matches!(err, CodexError::PathTraversal { .. }));
    }

    #[test]
    fn verify_integrity_rejects_path_traversal_to_an_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.json"), b"{}").unwrap();
        let sibling = dir.path().parent().unwrap().join("codex_escape_target.txt");
        fs::write(&sibling, b"secret").unwrap();
        let mut checksums = std::collections::BTreeMap::new();
        checksums.insert("../codex_escape_target.txt".to_string(), "a".repeat(64));
        let manifest = Manifest {
            version: "v1".into(),
            source_date: "2025-01-01".into(),
            checksums,
        };
        let err = verify_integrity(dir.path(), &manifest).unwrap_err();
        let _ = fs::remove_file(&sibling);
        assert!(matches!(err, CodexError::PathTraversal { .. }));
    }

    #[test]
    fn verify_integrity_rejects_absolute_path_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.json"), b"{}").unwrap();
        let mut checksums = std::collections::BTreeMap::new();
        checksums.insert("/etc/passwd".to_string(), "a".repeat(64));
        let manifest = Manifest {
            version: "v1".into(),
            source_date: "2025-01-01".into(),
            checksums,
        };
        let err = verify_integrity(dir.path(), &manifest).unwrap_err();
        assert!(matches!(err, CodexError::PathTraversal { .. }));
    }

    #[test]
    fn load_manifest_requires_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.json"), b"{\"version\": \"v1\"}").unwrap();
        let err = load_manifest(dir.path()).unwrap_err();
        assert!(matches!(err, CodexError::ManifestSchemaInvalid(_)));
    }
}
