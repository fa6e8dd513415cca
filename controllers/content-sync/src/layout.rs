//! On-disk layout of the content volume
//!
//! Each site is served from `<root>/<key>`, where `key` is the site's
//! generated name. Two shapes exist:
//!
//! - no subpath: the repository is cloned directly into `<root>/<key>`
//! - subpath: the clone lives in `<root>/.repos/<key>` and `<root>/<key>` is
//!   a symlink to `<root>/.repos/<key>/<subpath>`, keeping `.git` and the
//!   rest of the repository out of the served tree
//!
//! Switching a site between the shapes removes the entries of the old one.
//! A link interrupted between creation and rename leaves `<root>/.tmp-<key>`
//! behind; it counts as an entry of `key` until the next link or cleanup.

use crate::error::SyncError;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Directory holding clones of sites that serve a subpath
pub const REPO_CACHE_DIR: &str = ".repos";

const TEMP_LINK_PREFIX: &str = ".tmp-";

/// Paths of the content volume
#[derive(Debug, Clone)]
pub struct ContentLayout {
    root: PathBuf,
}

impl ContentLayout {
    /// Layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the content volume
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry the static server serves for `key`
    pub fn serving_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Hidden clone used when a subpath is served
    pub fn cache_path(&self, key: &str) -> PathBuf {
        self.root.join(REPO_CACHE_DIR).join(key)
    }

    /// Removes the entries of the other layout shape and returns the
    /// checkout directory.
    ///
    /// When switching to the subpath shape a directly cloned serving
    /// directory is kept until [`Self::link_subpath`] replaces it, so the
    /// site stays online during the first clone.
    pub fn prepare(&self, key: &str, subpath: Option<&str>) -> io::Result<PathBuf> {
        match subpath {
            None => {
                let serving = self.serving_path(key);
                if is_symlink(&serving) {
                    fs::remove_file(&serving)?;
                }
                remove_entry(&self.cache_path(key))?;
                fs::create_dir_all(&self.root)?;
                Ok(serving)
            }
            Some(_) => {
                fs::create_dir_all(self.root.join(REPO_CACHE_DIR))?;
                Ok(self.cache_path(key))
            }
        }
    }

    /// Points the serving entry at `subpath` inside the clone.
    ///
    /// The subpath must name a directory inside the clone. The link is
    /// written next to its final location and renamed over it, so readers
    /// see either the old or the new target.
    pub fn link_subpath(&self, key: &str, subpath: &str) -> Result<PathBuf, SyncError> {
        let relative = Path::new(subpath);
        if relative.as_os_str().is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(SyncError::InvalidSubpath(format!("/{subpath} must be a relative path inside the repository")));
        }

        let clone = self.cache_path(key);
        let target = clone.join(relative);
        let missing = || SyncError::InvalidSubpath(format!("/{subpath} does not exist in the repository"));
        if !target.is_dir() {
            return Err(missing());
        }
        // symlinks inside the repository must not lead out of it
        let resolved = target.canonicalize().map_err(|_| missing())?;
        if !resolved.starts_with(clone.canonicalize()?) {
            return Err(SyncError::InvalidSubpath(format!("/{subpath} resolves outside the repository")));
        }

        let serving = self.serving_path(key);
        if is_real_dir(&serving) {
            fs::remove_dir_all(&serving)?;
        }
        let temp = self.temp_link_path(key);
        remove_entry(&temp)?;
        std::os::unix::fs::symlink(&target, &temp)?;
        fs::rename(&temp, &serving)?;
        Ok(target)
    }

    fn temp_link_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{TEMP_LINK_PREFIX}{key}"))
    }

    /// Site keys present on disk, in the serving root, the clone cache or a
    /// leftover temporary link
    pub fn site_keys(&self) -> io::Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        for dir in [self.root.clone(), self.root.join(REPO_CACHE_DIR)] {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if name == REPO_CACHE_DIR {
                    continue;
                }
                match name.strip_prefix(TEMP_LINK_PREFIX) {
                    Some("") => {}
                    Some(key) => {
                        keys.insert(key.to_string());
                    }
                    None => {
                        keys.insert(name);
                    }
                }
            }
        }
        Ok(keys)
    }

    /// Site keys on disk that are not in `known`
    pub fn orphans(&self, known: &HashSet<String>) -> io::Result<BTreeSet<String>> {
        let mut keys = self.site_keys()?;
        keys.retain(|key| !known.contains(key));
        Ok(keys)
    }

    /// Removes the serving entry, the clone cache and any leftover temporary
    /// link of `key`, returning how many entries existed
    pub fn remove_site(&self, key: &str) -> io::Result<usize> {
        let mut removed = 0;
        for path in [self.serving_path(key), self.cache_path(key), self.temp_link_path(key)] {
            if remove_entry(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_dir())
}

/// Removes a file, symlink or directory tree without following symlinks.
/// Returns `false` if nothing was there.
fn remove_entry(path: &Path) -> io::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if metadata.file_type().is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}
