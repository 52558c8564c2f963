//! Embedded filesystem hydration.
//!
//! The Skills Runtime reads real directories, so the embedded skill tree is
//! copied to disk once per content change. A digest marker written after
//! the copy makes the operation idempotent and crash-safe: a partial copy
//! leaves a stale or absent marker and the next start re-copies.

use std::fs;
use std::path::Path;

use rust_embed::RustEmbed;
use sha2::{Digest, Sha256};

use curio_domain::error::Result;
use curio_domain::trace::TraceEvent;

/// Name of the digest marker inside the hydration directory.
pub const DIGEST_FILE: &str = ".embeddedfs.sha256";

/// Digest of the embedded tree: paths sorted lexicographically, then
/// `path || 0x00 || content || 0x00` per file.
pub fn embedded_digest<E: RustEmbed>() -> String {
    let mut paths: Vec<_> = E::iter().map(|p| p.to_string()).collect();
    paths.sort();

    let mut hasher = Sha256::new();
    for path in &paths {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        if let Some(file) = E::get(path) {
            hasher.update(&file.data);
        }
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Hydrate the embedded tree into `dir` if its digest differs from the
/// marker. Returns `true` when a copy happened.
pub fn hydrate<E: RustEmbed>(dir: &Path) -> Result<bool> {
    let digest = embedded_digest::<E>();
    let marker = dir.join(DIGEST_FILE);

    if let Ok(existing) = fs::read_to_string(&marker) {
        if existing.trim() == digest {
            return Ok(false);
        }
    }

    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;

    let mut files = 0usize;
    for path in E::iter() {
        let Some(file) = E::get(&path) else { continue };
        let target = dir.join(path.as_ref());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &file.data)?;
        files += 1;
    }

    // The marker goes in last: its presence certifies a complete copy.
    fs::write(&marker, &digest)?;
    tracing::info!(dir = %dir.display(), files, "embedded skill tree hydrated");
    TraceEvent::EmbeddedTreeHydrated { digest, files }.emit();
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuiltinSkillAssets;

    #[test]
    fn digest_is_stable() {
        assert_eq!(
            embedded_digest::<BuiltinSkillAssets>(),
            embedded_digest::<BuiltinSkillAssets>()
        );
    }

    #[test]
    fn hydrate_copies_once_then_noops() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hydrated");

        assert!(hydrate::<BuiltinSkillAssets>(&target).unwrap());
        assert!(target.join("skills/web-search/SKILL.md").exists());
        assert!(target.join(DIGEST_FILE).exists());

        assert!(!hydrate::<BuiltinSkillAssets>(&target).unwrap(), "same digest");
    }

    #[test]
    fn stale_marker_forces_recopy() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hydrated");
        hydrate::<BuiltinSkillAssets>(&target).unwrap();

        fs::write(target.join(DIGEST_FILE), "stale").unwrap();
        // Simulate local tampering that the re-copy must wipe.
        fs::write(target.join("junk.txt"), "x").unwrap();

        assert!(hydrate::<BuiltinSkillAssets>(&target).unwrap());
        assert!(!target.join("junk.txt").exists());
    }

    #[test]
    fn missing_marker_forces_recopy() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hydrated");
        hydrate::<BuiltinSkillAssets>(&target).unwrap();
        fs::remove_file(target.join(DIGEST_FILE)).unwrap();
        assert!(hydrate::<BuiltinSkillAssets>(&target).unwrap());
    }
}
