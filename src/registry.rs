//! Persistent list of repositories known to the app
//!
//! Entries are created after a successful init or clone and removed after
//! the user deletes a repository. The file is a JSON array in the user's
//! data directory.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const REGISTRY_FILE: &str = "repositories.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredRepository {
    pub name: String,
    pub path: PathBuf,
    pub current_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RepositoryRegistry {
    file: PathBuf,
    repositories: Vec<RegisteredRepository>,
}

/// `<data dir>/shark/repositories.json`
pub fn default_registry_path() -> Result<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| anyhow!("No data directory on this platform"))?;
    Ok(base.join("shark").join(REGISTRY_FILE))
}

impl RepositoryRegistry {
    pub fn open_default() -> Result<Self> {
        Self::load(&default_registry_path()?)
    }

    /// Reads the registry at `file`; a missing file is an empty registry.
    pub fn load(file: &Path) -> Result<Self> {
        let repositories = if file.exists() {
            let raw = fs::read_to_string(file)
                .with_context(|| format!("Failed to read registry {}", file.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt registry {}", file.display()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            file: file.to_path_buf(),
            repositories,
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    fn position(&self, path: &Path) -> Option<usize> {
        self.repositories.iter().position(|r| r.path == path)
    }

    pub fn get(&self, path: &Path) -> Option<&RegisteredRepository> {
        self.repositories.iter().find(|r| r.path == path)
    }

    pub fn add(&mut self, path: &Path, name: &str, branch: &str) -> Result<&RegisteredRepository> {
        if self.position(path).is_some() {
            bail!("{} is already registered", path.display());
        }
        let now = Utc::now();
        self.repositories.push(RegisteredRepository {
            name: name.to_string(),
            path: path.to_path_buf(),
            current_branch: branch.to_string(),
            created_at: now,
            updated_at: now,
        });
        debug!("Registered {name} at {}", path.display());
        self.repositories
            .last()
            .ok_or_else(|| anyhow!("Registry entry vanished"))
    }

    fn entry_mut(&mut self, path: &Path) -> Result<&mut RegisteredRepository> {
        self.repositories
            .iter_mut()
            .find(|r| r.path == path)
            .ok_or_else(|| anyhow!("{} is not registered", path.display()))
    }

    /// Changes the display name; the directory on disk is left alone.
    pub fn rename(&mut self, path: &Path, new_name: &str) -> Result<()> {
        if new_name.trim().is_empty() {
            bail!("Repository name cannot be empty");
        }
        let entry = self.entry_mut(path)?;
        entry.name = new_name.trim().to_string();
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Records the branch seen on the last visit.
    pub fn touch(&mut self, path: &Path, branch: &str) -> Result<()> {
        let entry = self.entry_mut(path)?;
        branch.clone_into(&mut entry.current_branch);
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove(&mut self, path: &Path) -> Result<RegisteredRepository> {
        let index = self
            .position(path)
            .ok_or_else(|| anyhow!("{} is not registered", path.display()))?;
        Ok(self.repositories.remove(index))
    }

    /// Most recently updated first.
    pub fn list(&self) -> Vec<&RegisteredRepository> {
        let mut list: Vec<&RegisteredRepository> = self.repositories.iter().collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list
    }

    /// Writes through a temporary file so a crash never leaves half a registry.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.repositories)?;
        let tmp = self.file.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.file)
            .with_context(|| format!("Failed to replace {}", self.file.display()))?;
        debug!("Saved registry with {} entries", self.repositories.len());
        Ok(())
    }
}
