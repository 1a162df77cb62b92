use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use super::{ContentId, ContentRecord, ContentStatus};
use crate::provenance::ProvenanceRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    #[serde(flatten)]
    pub record: ContentRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<ProvenanceRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LibraryFile {
    #[serde(default)]
    items: Vec<ContentEntry>,
}

/// Content items kept in a single pretty-printed JSON file.
///
/// Every mutation re-reads the file first and writes it back immediately, so
/// two handles on the same path see each other's changes.
#[derive(Debug, Clone)]
pub struct ContentLibrary {
    path: PathBuf,
    items: Vec<ContentEntry>,
}

impl ContentLibrary {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let items = read_library(&path)?.items;
        Ok(Self { path, items })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reload(&mut self) -> anyhow::Result<()> {
        self.items = read_library(&self.path)?.items;
        Ok(())
    }

    pub fn get(&self, id: ContentId) -> Option<&ContentEntry> {
        self.items.iter().find(|entry| entry.record.id == id)
    }

    pub fn entries(&self) -> &[ContentEntry] {
        &self.items
    }

    /// Inserts or replaces the record; provenance already on file is kept.
    pub fn upsert(&mut self, record: ContentRecord) -> anyhow::Result<()> {
        self.reload()?;
        match self.items.iter_mut().find(|entry| entry.record.id == record.id) {
            Some(entry) => entry.record = record,
            None => self.items.push(ContentEntry {
                record,
                provenance: None,
            }),
        }
        self.save()
    }

    /// `None` detaches the current featured asset.
    pub fn set_featured_asset(
        &mut self,
        id: ContentId,
        asset_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.update(id, |entry| {
            entry.record.featured_asset = asset_id.map(str::to_string);
        })
    }

    pub fn write_provenance(
        &mut self,
        id: ContentId,
        provenance: &ProvenanceRecord,
    ) -> anyhow::Result<()> {
        self.update(id, |entry| {
            entry.provenance = Some(provenance.clone());
        })
    }

    /// Returns the status the item had before the change.
    pub fn set_status(
        &mut self,
        id: ContentId,
        status: ContentStatus,
    ) -> anyhow::Result<ContentStatus> {
        let mut previous = ContentStatus::Draft;
        self.update(id, |entry| {
            previous = entry.record.status;
            entry.record.status = status;
        })?;
        Ok(previous)
    }

    fn update(
        &mut self,
        id: ContentId,
        apply: impl FnOnce(&mut ContentEntry),
    ) -> anyhow::Result<()> {
        self.reload()?;
        let Some(entry) = self.items.iter_mut().find(|entry| entry.record.id == id) else {
            bail!("content item {id} not found in {}", self.path.display());
        };
        apply(entry);
        self.save()
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = LibraryFile {
            items: self.items.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

fn read_library(path: &Path) -> anyhow::Result<LibraryFile> {
    if !path.exists() {
        return Ok(LibraryFile::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(LibraryFile::default());
    }
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid content library JSON in {}", path.display()))
}
