use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::content::ContentId;

const INDEX_FILE: &str = "assets.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub id: String,
    pub owner: ContentId,
    pub filename: String,
    pub mime_type: String,
    pub url: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: String,
}

/// Media library backed by a directory: image files plus an `assets.json`
/// index keyed by asset id.
#[derive(Debug, Clone)]
pub struct DirectoryAssetStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    root: PathBuf,
    base_url: Option<String>,
    lock: Mutex<()>,
}

impl DirectoryAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_base_url(root, None)
    }

    /// `base_url` replaces the `file://` URL handed back for stored files.
    pub fn with_base_url(root: impl Into<PathBuf>, base_url: Option<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                root: root.into(),
                base_url: base_url
                    .map(|value| value.trim().trim_end_matches('/').to_string())
                    .filter(|value| !value.is_empty()),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn store(
        &self,
        owner: ContentId,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> anyhow::Result<AssetEntry> {
        let filename = Path::new(filename)
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("invalid asset filename '{filename}'"))?;
        if bytes.is_empty() {
            bail!("refusing to store empty asset {filename}");
        }

        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("asset store lock poisoned"))?;
        std::fs::create_dir_all(&self.inner.root)
            .with_context(|| format!("failed to create {}", self.inner.root.display()))?;

        let file_path = self.inner.root.join(&filename);
        if file_path.exists() {
            bail!("asset file {} already exists", file_path.display());
        }
        std::fs::write(&file_path, bytes)
            .with_context(|| format!("failed to write {}", file_path.display()))?;

        let entry = AssetEntry {
            id: Uuid::new_v4().to_string(),
            owner,
            url: self.url_for(&file_path, &filename),
            filename,
            mime_type: mime_type.to_string(),
            sha256: sha256_hex(bytes),
            size_bytes: bytes.len() as u64,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let mut index = self.read_index()?;
        index.insert(entry.id.clone(), entry.clone());
        if let Err(err) = self.write_index(&index) {
            let _ = std::fs::remove_file(&file_path);
            return Err(err);
        }
        Ok(entry)
    }

    pub fn get(&self, asset_id: &str) -> anyhow::Result<Option<AssetEntry>> {
        Ok(self.read_index()?.get(asset_id).cloned())
    }

    /// Removes the file and its index row. Returns false for unknown ids.
    pub fn discard(&self, asset_id: &str) -> anyhow::Result<bool> {
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("asset store lock poisoned"))?;
        let mut index = self.read_index()?;
        let Some(entry) = index.shift_remove(asset_id) else {
            return Ok(false);
        };
        let file_path = self.inner.root.join(&entry.filename);
        if file_path.exists() {
            std::fs::remove_file(&file_path)
                .with_context(|| format!("failed to remove {}", file_path.display()))?;
        }
        self.write_index(&index)?;
        Ok(true)
    }

    fn url_for(&self, file_path: &Path, filename: &str) -> String {
        match &self.inner.base_url {
            Some(base) => format!("{base}/{filename}"),
            None => format!("file://{}", file_path.to_string_lossy()),
        }
    }

    fn read_index(&self) -> anyhow::Result<IndexMap<String, AssetEntry>> {
        let path = self.inner.root.join(INDEX_FILE);
        if !path.exists() {
            return Ok(IndexMap::new());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid asset index JSON in {}", path.display()))
    }

    fn write_index(&self, index: &IndexMap<String, AssetEntry>) -> anyhow::Result<()> {
        let path = self.inner.root.join(INDEX_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(index)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
