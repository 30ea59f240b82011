//! Change detection for files a cache depends on.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};

/// Tracks a fixed set of files by a hash of their content and mtime.
#[derive(Debug, Clone)]
pub struct FingerprintTracker {
    paths: Vec<PathBuf>,
    hashes: HashMap<PathBuf, String>,
}

impl FingerprintTracker {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            hashes: HashMap::new(),
        }
    }

    /// Record the current state of every file as the baseline.
    pub fn prime(&mut self) {
        self.has_changed();
    }

    /// Whether any tracked file differs from its last observation.
    ///
    /// Every readable file's stored hash is refreshed. A file seen for the
    /// first time only sets a baseline; missing files are skipped.
    pub fn has_changed(&mut self) -> bool {
        let mut changed = false;
        for path in &self.paths {
            let current = match fingerprint(path) {
                Ok(hash) => hash,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable tracked file");
                    continue;
                }
            };
            if let Some(previous) = self.hashes.insert(path.clone(), current.clone())
                && previous != current
            {
                info!(path = %path.display(), "Tracked file changed");
                changed = true;
            }
        }
        changed
    }

    /// Last observed hash per path.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.hashes
            .iter()
            .map(|(path, hash)| (path.display().to_string(), hash.clone()))
            .collect()
    }
}

/// SHA-256 over the file's bytes followed by its mtime.
fn fingerprint(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let modified = fs::metadata(path)?.modified()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.update(format!("{}.{:09}", since_epoch.as_secs(), since_epoch.subsec_nanos()).as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
