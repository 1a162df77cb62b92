use std::path::PathBuf;
use std::sync::Mutex;

use headliner_contracts::assets::DirectoryAssetStore;
use headliner_contracts::content::{ContentId, ContentLibrary, ContentRecord};
use headliner_contracts::provenance::ProvenanceRecord;

use crate::error::HostError;

/// Read and write access to content items.
pub trait ContentHost: Send + Sync {
    fn load(&self, id: ContentId) -> Result<ContentRecord, HostError>;

    /// `None` detaches whatever asset is currently featured.
    fn set_featured_asset(&self, id: ContentId, asset_id: Option<&str>) -> Result<(), HostError>;

    fn write_provenance(&self, id: ContentId, record: &ProvenanceRecord) -> Result<(), HostError>;

    /// Provenance left by an earlier generation, if any.
    fn load_provenance(&self, id: ContentId) -> Result<Option<ProvenanceRecord>, HostError>;
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredAsset {
    pub id: String,
    pub url: String,
}

/// Media library that owns persisted image files.
pub trait AssetStore: Send + Sync {
    fn store(
        &self,
        owner: ContentId,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<StoredAsset, HostError>;

    fn discard(&self, asset_id: &str) -> Result<(), HostError>;
}

/// [`ContentHost`] over a JSON content library file.
pub struct LibraryHost {
    library: Mutex<ContentLibrary>,
}

impl LibraryHost {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            library: Mutex::new(ContentLibrary::open(path)?),
        })
    }

    fn with_library<T>(
        &self,
        apply: impl FnOnce(&mut ContentLibrary) -> Result<T, HostError>,
    ) -> Result<T, HostError> {
        let mut library = self
            .library
            .lock()
            .map_err(|_| HostError::Backend("content library lock poisoned".to_string()))?;
        apply(&mut library)
    }

    fn ensure_exists(library: &mut ContentLibrary, id: ContentId) -> Result<(), HostError> {
        library.reload().map_err(backend)?;
        match library.get(id) {
            Some(_) => Ok(()),
            None => Err(HostError::NotFound(id)),
        }
    }
}

impl ContentHost for LibraryHost {
    fn load(&self, id: ContentId) -> Result<ContentRecord, HostError> {
        self.with_library(|library| {
            Self::ensure_exists(library, id)?;
            library
                .get(id)
                .map(|entry| entry.record.clone())
                .ok_or(HostError::NotFound(id))
        })
    }

    fn set_featured_asset(&self, id: ContentId, asset_id: Option<&str>) -> Result<(), HostError> {
        self.with_library(|library| {
            Self::ensure_exists(library, id)?;
            library.set_featured_asset(id, asset_id).map_err(backend)
        })
    }

    fn write_provenance(&self, id: ContentId, record: &ProvenanceRecord) -> Result<(), HostError> {
        self.with_library(|library| {
            Self::ensure_exists(library, id)?;
            library.write_provenance(id, record).map_err(backend)
        })
    }

    fn load_provenance(&self, id: ContentId) -> Result<Option<ProvenanceRecord>, HostError> {
        self.with_library(|library| {
            Self::ensure_exists(library, id)?;
            Ok(library.get(id).and_then(|entry| entry.provenance.clone()))
        })
    }
}

impl AssetStore for DirectoryAssetStore {
    fn store(
        &self,
        owner: ContentId,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<StoredAsset, HostError> {
        let entry = DirectoryAssetStore::store(self, owner, filename, mime_type, bytes)
            .map_err(backend)?;
        Ok(StoredAsset {
            id: entry.id,
            url: entry.url,
        })
    }

    fn discard(&self, asset_id: &str) -> Result<(), HostError> {
        DirectoryAssetStore::discard(self, asset_id)
            .map(|_| ())
            .map_err(backend)
    }
}

fn backend(err: anyhow::Error) -> HostError {
    HostError::Backend(format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use headliner_contracts::assets::DirectoryAssetStore;
    use headliner_contracts::content::{ContentLibrary, ContentRecord};
    use headliner_contracts::provenance::ProvenanceRecord;

    use super::{AssetStore, ContentHost, LibraryHost};
    use crate::error::HostError;

    #[test]
    fn library_host_round_trips_attachment() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("content.json");
        ContentLibrary::open(&path)?.upsert(ContentRecord::new(4, "Hello"))?;

        let host = LibraryHost::open(&path)?;
        assert_eq!(host.load(4)?.title, "Hello");
        assert!(host.load_provenance(4)?.is_none());
        host.set_featured_asset(4, Some("a-1"))?;
        host.write_provenance(4, &ProvenanceRecord::new("p", "news", "auto"))?;
        assert_eq!(host.load(4)?.featured_asset.as_deref(), Some("a-1"));

        host.set_featured_asset(4, None)?;
        assert!(!host.load(4)?.has_featured_asset());
        let provenance = host.load_provenance(4)?.expect("provenance survives detach");
        assert_eq!(provenance.category, "news");
        Ok(())
    }

    #[test]
    fn library_host_reports_missing_items() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let host = LibraryHost::open(temp.path().join("content.json"))?;
        assert_eq!(host.load(77).unwrap_err(), HostError::NotFound(77));
        assert_eq!(
            host.set_featured_asset(77, Some("a")).unwrap_err(),
            HostError::NotFound(77)
        );
        Ok(())
    }

    #[test]
    fn directory_store_backs_the_asset_capability() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = DirectoryAssetStore::new(temp.path().join("assets"));
        let stored = AssetStore::store(&store, 4, "header.png", "image/png", b"not really a png")?;
        assert!(stored.url.ends_with("header.png"));
        AssetStore::discard(&store, &stored.id)?;
        assert!(store.get(&stored.id)?.is_none());
        assert!(!temp.path().join("assets/header.png").exists());
        Ok(())
    }
}
