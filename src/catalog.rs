use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::protocol::{FileMetadata, FileTimes, FileType};
use crate::{Error, Result};

/// One scanned file: its advertised metadata plus the on-disk path used to
/// open the byte stream at download time.
pub struct CatalogEntry {
    pub metadata: FileMetadata,
    pub path: PathBuf,
}

/// Immutable id → file mapping built once before the transfer starts.
pub struct FileCatalog {
    files: BTreeMap<Uuid, CatalogEntry>,
}

impl FileCatalog {
    /// Scans the given paths. Plain files are added under their basename;
    /// directories are walked recursively without following symbolic links,
    /// each file named `<dir>/<relative path>` with forward slashes. A path
    /// that is neither is an error.
    pub fn scan(paths: &[PathBuf]) -> Result<Self> {
        let mut files = BTreeMap::new();
        for path in paths {
            let meta = std::fs::symlink_metadata(path)
                .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
            if meta.is_file() {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| Error::Config(format!("bad path: {}", path.display())))?;
                insert_entry(&mut files, name, path.clone(), meta.len(), &meta);
            } else if meta.is_dir() {
                let root_name = dir_display_name(path);
                for entry in WalkDir::new(path).follow_links(false) {
                    let entry = entry.map_err(|e| {
                        Error::Config(format!("cannot walk {}: {}", path.display(), e))
                    })?;
                    // With follow_links off a symlink never reports as a file,
                    // so links are skipped rather than traversed.
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = entry
                        .path()
                        .strip_prefix(path)
                        .expect("walked entries live under their root");
                    let name = match &root_name {
                        Some(root) => format!("{}/{}", root, forward_slashes(rel)),
                        None => forward_slashes(rel),
                    };
                    let entry_meta = entry.metadata().map_err(|e| {
                        Error::Config(format!("cannot stat {}: {}", entry.path().display(), e))
                    })?;
                    insert_entry(
                        &mut files,
                        name,
                        entry.path().to_path_buf(),
                        entry_meta.len(),
                        &entry_meta,
                    );
                }
            } else {
                return Err(Error::Config(format!(
                    "{} is neither a regular file nor a directory",
                    path.display()
                )));
            }
        }
        if files.is_empty() {
            return Err(Error::Config("no files found to send".to_string()));
        }
        debug!("Catalog holds {} file(s)", files.len());
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.files.values().map(|e| e.metadata.size).sum()
    }

    pub fn get(&self, id: &Uuid) -> Option<&CatalogEntry> {
        self.files.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &CatalogEntry)> {
        self.files.iter()
    }

    /// The manifest handed to the receiver in `/prepare-upload`.
    pub fn manifest(&self) -> BTreeMap<Uuid, FileMetadata> {
        self.files
            .iter()
            .map(|(id, entry)| (*id, entry.metadata.clone()))
            .collect()
    }
}

fn insert_entry(
    files: &mut BTreeMap<Uuid, CatalogEntry>,
    name: String,
    path: PathBuf,
    size: u64,
    meta: &std::fs::Metadata,
) {
    let id = Uuid::new_v4();
    let times = FileTimes {
        modified: unix_millis(meta.modified().ok()),
        accessed: unix_millis(meta.accessed().ok()),
    };
    let metadata = FileMetadata {
        id,
        file_type: FileType::from_name(&name),
        file_name: name,
        size,
        metadata: Some(times),
    };
    files.insert(id, CatalogEntry { metadata, path });
}

fn unix_millis(time: Option<std::time::SystemTime>) -> Option<u64> {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
}

fn forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Directory name used as the top-level prefix for its files. Paths like `.`
/// have no file name of their own, so resolve through the canonical path.
fn dir_display_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| n != ".." && n != ".")
        .or_else(|| {
            path.canonicalize()
                .ok()?
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
}
