//! Discovery of unit binaries on disk.
//!
//! A unit is any `*.wasm` file directly inside a unit directory; its name is
//! the file stem (`units/osc.wasm` → `osc`). Scanning never compiles or
//! instantiates anything.

use std::{
    collections::BTreeMap,
    ffi::OsStr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::Error;

/// A unit available for loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub name: String,
    pub path: PathBuf,
}

/// List the units in `dir`, sorted by name.
pub fn scan(dir: &Path) -> Result<Vec<UnitDescriptor>, Error> {
    let mut found = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io {
            path: e.path().unwrap_or(dir).to_path_buf(),
            source: e.into(),
        })?;

        let path = entry.path();
        if !entry.file_type().is_file() || path.extension() != Some(OsStr::new("wasm")) {
            continue;
        }

        if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
            found.push(UnitDescriptor {
                name: name.to_string(),
                path: path.to_path_buf(),
            });
        }
    }

    Ok(found)
}

/// Catalog of discovered units, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    units: BTreeMap<String, UnitDescriptor>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` and register its units. A name that is already registered
    /// keeps its first path. Returns how many units were added.
    pub fn add_dir(&mut self, dir: &Path) -> Result<usize, Error> {
        let mut added = 0;
        for unit in scan(dir)? {
            if let Some(existing) = self.units.get(&unit.name) {
                log::warn!(
                    "unit '{}' at {} shadowed by {}",
                    unit.name,
                    unit.path.display(),
                    existing.path.display()
                );
                continue;
            }
            log::debug!("registered unit '{}' ({})", unit.name, unit.path.display());
            self.units.insert(unit.name.clone(), unit);
            added += 1;
        }
        Ok(added)
    }

    pub fn insert(&mut self, descriptor: UnitDescriptor) {
        self.units.insert(descriptor.name.clone(), descriptor);
    }

    pub fn resolve(&self, name: &str) -> Option<&UnitDescriptor> {
        self.units.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnitDescriptor> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_finds_wasm_files_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("osc.wasm"), b"").unwrap();
        fs::write(dir.path().join("gain.wasm"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("deep.wasm"), b"").unwrap();

        let units = scan(dir.path()).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();

        assert_eq!(names, ["gain", "osc"]);
        assert_eq!(units[1].path, dir.path().join("osc.wasm"));
    }

    #[test]
    fn first_directory_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(first.path().join("osc.wasm"), b"").unwrap();
        fs::write(second.path().join("osc.wasm"), b"").unwrap();
        fs::write(second.path().join("lpf.wasm"), b"").unwrap();

        let mut registry = UnitRegistry::new();
        assert_eq!(registry.add_dir(first.path()).unwrap(), 1);
        assert_eq!(registry.add_dir(second.path()).unwrap(), 1);

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.resolve("osc").unwrap().path,
            first.path().join("osc.wasm")
        );
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
