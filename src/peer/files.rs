use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;

use crate::peer::PeerError;
use crate::peer::download::PARTIAL_PREFIX;

/// Joins `filename` onto `dir` if it names an entry directly inside `dir`.
///
/// Anything with separators, `.`/`..` or a root is refused, so a request can
/// never reach outside the shared directory.
pub fn resolve_in_dir(dir: &Path, filename: &str) -> Option<PathBuf> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == filename => Some(dir.join(name)),
        _ => None,
    }
}

/// Sorted names of the non-directory entries in `dir`, minus downloads still
/// in progress.
pub async fn scan_shared_dir(dir: &Path) -> Result<Vec<String>, PeerError> {
    let scan_err = |error| PeerError::Scan {
        path: dir.to_path_buf(),
        error,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(scan_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
        let file_type = entry.file_type().await.map_err(scan_err)?;
        if file_type.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if !name.starts_with(PARTIAL_PREFIX) => files.push(name),
            _ => {}
        }
    }
    files.sort();
    Ok(files)
}

/// Filenames this peer shares.
#[derive(Debug, Default)]
pub struct KnownFiles(RwLock<BTreeSet<String>>);

impl KnownFiles {
    /// Replaces the set with a fresh scan result.
    pub fn rebuild(&self, scanned: &[String]) {
        *self.0.write() = scanned.iter().cloned().collect();
    }

    pub fn insert(&self, filename: &str) {
        self.0.write().insert(filename.to_owned());
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.0.read().contains(filename)
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.0.read().clone()
    }
}
