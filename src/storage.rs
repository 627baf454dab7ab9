// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use tracing::info;

use crate::project::{Project, DEFAULT_USB_INTERFACE};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("project validation failed: {0}")]
    Invalid(String),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where the project lives.
pub trait ProjectStore: Send + Sync {
    /// A copy of the current project, if there is one.
    fn get(&self) -> Option<Project>;

    /// Validates and persists the project.
    fn save(&self, project: Project) -> Result<(), StorageError>;
}

/// Checks the fields that must be present and the IDs that must be unique.
pub fn validate(project: &Project) -> Result<(), StorageError> {
    if project.id.is_empty() {
        return Err(StorageError::Invalid("project ID is required".into()));
    }
    if project.name.is_empty() {
        return Err(StorageError::Invalid("project name is required".into()));
    }
    if project.usb_interface.is_empty() {
        return Err(StorageError::Invalid("USB interface is required".into()));
    }

    check_ids("fixture", project.fixtures.iter().map(|f| f.id.as_str()))?;
    check_ids("preset", project.presets.iter().map(|p| p.id.as_str()))?;
    check_ids("show", project.shows.iter().map(|s| s.id.as_str()))
}

fn check_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), StorageError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(StorageError::Invalid(format!("{} ID cannot be empty", kind)));
        }
        if !seen.insert(id) {
            return Err(StorageError::Invalid(format!(
                "duplicate {} ID: {}",
                kind, id
            )));
        }
    }
    Ok(())
}

/// A project persisted as a YAML file.
pub struct YamlStore {
    path: PathBuf,
    project: RwLock<Project>,
}

impl YamlStore {
    /// Loads an existing project file.
    pub fn open(path: &Path) -> Result<YamlStore, StorageError> {
        let contents = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
        let project: Project = serde_yml::from_str(&contents)?;
        validate(&project)?;

        Ok(YamlStore {
            path: path.to_path_buf(),
            project: RwLock::new(project),
        })
    }

    /// Loads the project file, creating a default project there if it doesn't exist yet.
    pub fn open_or_default(path: &Path) -> Result<YamlStore, StorageError> {
        if path.exists() {
            return YamlStore::open(path);
        }

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }

        let project = Project::new("Default Project", DEFAULT_USB_INTERFACE);
        write_atomically(path, &project)?;
        info!(path = ?path, id = project.id, "Created default project.");

        Ok(YamlStore {
            path: path.to_path_buf(),
            project: RwLock::new(project),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProjectStore for YamlStore {
    fn get(&self) -> Option<Project> {
        Some(self.project.read().clone())
    }

    fn save(&self, project: Project) -> Result<(), StorageError> {
        validate(&project)?;

        let mut current = self.project.write();
        write_atomically(&self.path, &project)?;
        *current = project;
        Ok(())
    }
}

/// Writes to a temporary sibling file, then renames it over the target.
fn write_atomically(path: &Path, project: &Project) -> Result<(), StorageError> {
    let serialized = serde_yml::to_string(project)?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    fs::write(&temp, serialized).map_err(|e| StorageError::io(&temp, e))?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

/// A project held only in memory.
#[derive(Default)]
pub struct MemoryStore {
    project: RwLock<Option<Project>>,
}

impl MemoryStore {
    pub fn new(project: Option<Project>) -> MemoryStore {
        MemoryStore {
            project: RwLock::new(project),
        }
    }
}

impl ProjectStore for MemoryStore {
    fn get(&self) -> Option<Project> {
        self.project.read().clone()
    }

    fn save(&self, project: Project) -> Result<(), StorageError> {
        validate(&project)?;
        *self.project.write() = Some(project);
        Ok(())
    }
}
