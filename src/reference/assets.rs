//! Sources for bundled reference frame payloads

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

use super::ReferenceAsset;
use crate::{DecodeError, Result};

/// Read-only store of reference frame payloads
///
/// Returns:
/// - `Ok(Some(payload))` - Asset is bundled
/// - `Ok(None)` - Asset is not part of this bundle
/// - `Err(e)` - Asset exists but could not be read
#[async_trait::async_trait]
pub trait AssetSource: Send + Sync + 'static {
    async fn load(&self, asset: ReferenceAsset) -> Result<Option<Arc<[u8]>>>;
}

/// In-memory assets, typically compiled in with `include_bytes!`
#[derive(Debug, Clone, Default)]
pub struct StaticAssets {
    payloads: HashMap<ReferenceAsset, Arc<[u8]>>,
}

impl StaticAssets {
    pub fn with(mut self, asset: ReferenceAsset, payload: impl Into<Arc<[u8]>>) -> Self {
        self.payloads.insert(asset, payload.into());
        self
    }
}

#[async_trait::async_trait]
impl AssetSource for StaticAssets {
    async fn load(&self, asset: ReferenceAsset) -> Result<Option<Arc<[u8]>>> {
        Ok(self.payloads.get(&asset).cloned())
    }
}

/// Assets stored as `<dir>/<asset name>.h264` files
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    dir: PathBuf,
}

impl DirectoryAssets {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn path_of(&self, asset: ReferenceAsset) -> PathBuf {
        self.dir.join(format!("{}.h264", asset.name()))
    }
}

#[async_trait::async_trait]
impl AssetSource for DirectoryAssets {
    async fn load(&self, asset: ReferenceAsset) -> Result<Option<Arc<[u8]>>> {
        let path = self.path_of(asset);
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => {
                trace!(path = %path.display(), "Empty reference frame asset ignored");
                Ok(None)
            }
            Ok(bytes) => Ok(Some(bytes.into())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DecodeError::asset_error(path, e)),
        }
    }
}
