use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info};

use super::{Index, FORMAT_VERSION};
use crate::error::IndexError;
use crate::loader::{content_hash, scan_sources};

/// Directory under the knowledge dir holding the persisted artifact. Excluded
/// from source scans.
pub const ARTIFACT_DIR: &str = ".ragkit-index";
const ARTIFACT_FILE: &str = "index.json";
const LOCK_FILE: &str = ".lock";

pub fn artifact_dir(knowledge_dir: &Path) -> PathBuf {
    knowledge_dir.join(ARTIFACT_DIR)
}

/// Persist an index as a single JSON artifact. Writes to a temp file in the
/// artifact directory and renames it into place under an exclusive lock, so
/// readers never observe a partial artifact.
pub fn write_artifact(knowledge_dir: &Path, index: &Index) -> Result<(), IndexError> {
    let dir = artifact_dir(knowledge_dir);
    std::fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
    }

    let lock_file = std::fs::File::create(dir.join(LOCK_FILE))?;
    lock_file.lock_exclusive()?;

    let json = serde_json::to_string(index)?;
    let temp_path = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    std::fs::write(&temp_path, &json)?;

    let final_path = dir.join(ARTIFACT_FILE);
    if let Err(e) = std::fs::rename(&temp_path, &final_path) {
        let _ = std::fs::remove_file(&temp_path);
        let _ = lock_file.unlock();
        return Err(e.into());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&final_path, std::fs::Permissions::from_mode(0o600));
    }

    let _ = lock_file.unlock();
    info!(
        path = %final_path.display(),
        chunks = index.chunks.len(),
        terms = index.vocabulary.len(),
        "index artifact written"
    );
    Ok(())
}

/// Load the persisted artifact, if any. `Corrupt` and `Version` errors mean
/// the caller should rebuild from scratch.
pub fn load_artifact(knowledge_dir: &Path) -> Result<Option<Index>, IndexError> {
    let dir = artifact_dir(knowledge_dir);
    let path = dir.join(ARTIFACT_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let _lock = acquire_shared_lock(&dir)?;
    let json = std::fs::read_to_string(&path)?;
    let index: Index = serde_json::from_str(&json)?;

    if index.version != FORMAT_VERSION {
        return Err(IndexError::Version {
            found: index.version,
            expected: FORMAT_VERSION,
        });
    }

    debug!(path = %path.display(), chunks = index.chunks.len(), "index artifact loaded");
    Ok(Some(index))
}

fn acquire_shared_lock(dir: &Path) -> Result<Option<std::fs::File>, IndexError> {
    let lock_path = dir.join(LOCK_FILE);
    if !lock_path.exists() {
        return Ok(None);
    }
    let lock_file = std::fs::File::open(&lock_path)?;
    lock_file.lock_shared()?;
    Ok(Some(lock_file))
}

/// Hash every scanned source file under the knowledge directory. Unreadable
/// files are omitted, which registers as a difference against the recorded
/// hashes.
pub fn current_source_hashes(knowledge_dir: &Path) -> BTreeMap<String, String> {
    let mut hashes = BTreeMap::new();
    for relative in scan_sources(knowledge_dir) {
        if let Ok(bytes) = std::fs::read(knowledge_dir.join(&relative)) {
            hashes.insert(relative, content_hash(&bytes));
        }
    }
    hashes
}

/// Compare the artifact's recorded hashes against the corpus on disk. Any
/// changed, added, or removed file makes the index stale.
pub fn verify_fresh(index: &Index, knowledge_dir: &Path) -> Result<(), IndexError> {
    if index.source_hashes == current_source_hashes(knowledge_dir) {
        Ok(())
    } else {
        Err(IndexError::Stale)
    }
}
