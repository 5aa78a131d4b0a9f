//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Access to metadata repositories.
//!
//! Storage formats live outside this crate. The planner only needs to query units from a
//! repository and to load a repository by location; both are traits here. The in-memory
//! implementations back tests and embedders that already hold their metadata.

use crate::metadata::{InstallableUnit, Queryable, UnitIndex, UnitQuery};
use miette::Diagnostic;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("repository not found at {0}")]
    #[diagnostic(
        code(prov::repository_error::not_found),
        help("Check that the repository location is registered with the manager")
    )]
    NotFound(String),

    #[error("repository {location} is unreadable: {reason}")]
    #[diagnostic(
        code(prov::repository_error::unreadable),
        help("The repository is skipped; repair or remove it to silence this warning")
    )]
    Unreadable { location: String, reason: String },
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// A queryable source of installable units.
pub trait MetadataRepository: Send + Sync {
    fn location(&self) -> &str;

    fn query(&self, query: &UnitQuery) -> Vec<Arc<InstallableUnit>>;
}

/// Resolves repository locations to loaded repositories.
pub trait RepositoryManager: Send + Sync {
    /// Every location the manager can load, in registration order.
    fn known_repositories(&self) -> Vec<String>;

    fn load_repository(&self, location: &str) -> Result<Arc<dyn MetadataRepository>>;
}

/// Repository holding its units in memory.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    location: String,
    units: UnitIndex,
}

impl MemoryRepository {
    pub fn new<I: IntoIterator<Item = Arc<InstallableUnit>>>(location: impl Into<String>, units: I) -> Self {
        MemoryRepository {
            location: location.into(),
            units: UnitIndex::new(units),
        }
    }

    /// Reads a JSON array of units.
    pub fn from_json_file<P: AsRef<Path>>(location: impl Into<String>, path: P) -> Result<Self> {
        let location = location.into();
        let unreadable = |reason: String| RepositoryError::Unreadable {
            location: location.clone(),
            reason,
        };
        let content = fs::read_to_string(path.as_ref()).map_err(|e| unreadable(e.to_string()))?;
        let units: Vec<Arc<InstallableUnit>> =
            serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;
        Ok(MemoryRepository::new(
            location.clone(),
            units.into_iter().map(InstallableUnit::normalized),
        ))
    }

    pub fn add(&mut self, unit: Arc<InstallableUnit>) {
        self.units.insert(unit);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl MetadataRepository for MemoryRepository {
    fn location(&self) -> &str {
        &self.location
    }

    fn query(&self, query: &UnitQuery) -> Vec<Arc<InstallableUnit>> {
        self.units.query(query)
    }
}

enum Entry {
    Loaded(Arc<dyn MetadataRepository>),
    File(std::path::PathBuf),
    Broken(String),
}

/// Manager over registered repositories. File entries are read lazily on every load.
#[derive(Default)]
pub struct MemoryRepositoryManager {
    entries: RwLock<Vec<(String, Entry)>>,
}

impl MemoryRepositoryManager {
    pub fn new() -> Self {
        MemoryRepositoryManager::default()
    }

    pub fn add_repository(&self, repository: Arc<dyn MetadataRepository>) {
        let location = repository.location().to_string();
        self.register(location, Entry::Loaded(repository));
    }

    /// Registers a JSON unit file under `location`.
    pub fn add_file(&self, location: impl Into<String>, path: impl AsRef<Path>) {
        self.register(location.into(), Entry::File(path.as_ref().to_path_buf()));
    }

    /// Registers a location whose loads always fail.
    pub fn add_unreadable(&self, location: impl Into<String>, reason: impl Into<String>) {
        self.register(location.into(), Entry::Broken(reason.into()));
    }

    fn register(&self, location: String, entry: Entry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|(l, _)| *l != location);
            entries.push((location, entry));
        }
    }
}

impl RepositoryManager for MemoryRepositoryManager {
    fn known_repositories(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|(l, _)| l.clone()).collect())
            .unwrap_or_default()
    }

    fn load_repository(&self, location: &str) -> Result<Arc<dyn MetadataRepository>> {
        let entries = self.entries.read().map_err(|_| RepositoryError::Unreadable {
            location: location.to_string(),
            reason: "repository registry lock poisoned".to_string(),
        })?;
        match entries.iter().find(|(l, _)| l == location) {
            None => Err(RepositoryError::NotFound(location.to_string())),
            Some((_, Entry::Loaded(repo))) => Ok(repo.clone()),
            Some((_, Entry::File(path))) => {
                let repo = MemoryRepository::from_json_file(location, path)?;
                Ok(Arc::new(repo))
            }
            Some((_, Entry::Broken(reason))) => Err(RepositoryError::Unreadable {
                location: location.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}
