//! Synthetic reference frames for streams that start mid-GOP.
//!
//! A decoder fed only delta frames produces nothing useful. When the stream starts
//! without a key frame, the decode loop primes the decoder with a bundled black
//! IDR frame matching the device and resolution. The selection is a static table
//! keyed by device model and stream width; combinations without an asset report
//! "unavailable" and the loop waits for a genuine key frame instead.

mod assets;

pub use assets::{AssetSource, DirectoryAssets, StaticAssets};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Camera product producing the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceModel {
    #[serde(rename = "phantom3_standard")]
    Phantom3Standard,
    #[serde(rename = "phantom3_advanced")]
    Phantom3Advanced,
    #[serde(rename = "phantom3_professional")]
    Phantom3Professional,
    #[serde(rename = "phantom3_4k")]
    Phantom3_4K,
    #[serde(rename = "phantom4")]
    Phantom4,
    #[serde(rename = "inspire1")]
    Inspire1,
    #[serde(rename = "osmo")]
    Osmo,
    #[serde(rename = "osmo_pro")]
    OsmoPro,
    #[serde(rename = "other")]
    Other,
}

/// Bundled key-frame payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceAsset {
    /// 1280x720, Inspire/Phantom 3 Professional encoder
    Hd720Inspire,
    /// 1280x720, Phantom 3 Standard/Advanced/4K encoder (GDR)
    Hd720Phantom3,
    /// 960x720 photo mode, Phantom 3 Standard/Advanced (GDR)
    Photo960x720Phantom3,
    /// 1280x720, Phantom 4 encoder
    Hd720Phantom4,
    Vga640x480,
    Wide848x480,
}

impl ReferenceAsset {
    /// Stable file stem of the bundled payload
    pub fn name(&self) -> &'static str {
        match self {
            ReferenceAsset::Hd720Inspire => "iframe_1280x720_ins",
            ReferenceAsset::Hd720Phantom3 => "iframe_1280x720_3s",
            ReferenceAsset::Photo960x720Phantom3 => "iframe_960x720_3s",
            ReferenceAsset::Hd720Phantom4 => "iframe_1280x720_p4",
            ReferenceAsset::Vga640x480 => "iframe_640x480",
            ReferenceAsset::Wide848x480 => "iframe_848x480",
        }
    }

    /// Select the asset for a device and stream width.
    ///
    /// Returns `None` for devices that ship no reference frame.
    pub fn select(model: DeviceModel, width: u32) -> Option<Self> {
        match model {
            DeviceModel::Phantom3Advanced | DeviceModel::Phantom3Standard => match width {
                960 => Some(ReferenceAsset::Photo960x720Phantom3),
                _ => Some(ReferenceAsset::Hd720Phantom3),
            },
            DeviceModel::Phantom3_4K => match width {
                640 => Some(ReferenceAsset::Vga640x480),
                848 => Some(ReferenceAsset::Wide848x480),
                _ => Some(ReferenceAsset::Hd720Phantom3),
            },
            DeviceModel::Osmo | DeviceModel::OsmoPro => None,
            DeviceModel::Phantom4 => Some(ReferenceAsset::Hd720Phantom4),
            DeviceModel::Phantom3Professional | DeviceModel::Inspire1 | DeviceModel::Other => {
                Some(ReferenceAsset::Hd720Inspire)
            }
        }
    }
}

impl fmt::Display for ReferenceAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Supplies synthetic key frames for a device model
pub struct ReferenceFrameProvider {
    model: Option<DeviceModel>,
    source: Arc<dyn AssetSource>,
}

impl ReferenceFrameProvider {
    pub fn new(model: Option<DeviceModel>, source: Arc<dyn AssetSource>) -> Self {
        Self { model, source }
    }

    /// Provider for the device named in `config`
    pub fn from_config(config: &crate::DecoderConfig, source: Arc<dyn AssetSource>) -> Self {
        Self::new(config.device_model, source)
    }

    /// Provider that never has a reference frame
    pub fn unavailable() -> Self {
        Self { model: None, source: Arc::new(StaticAssets::default()) }
    }

    pub fn model(&self) -> Option<DeviceModel> {
        self.model
    }

    /// Look up the key-frame payload for a stream width.
    ///
    /// Unknown devices, missing assets and read failures all yield `None`.
    pub async fn reference_frame(&self, width: u32) -> Option<Arc<[u8]>> {
        let model = self.model?;
        let asset = ReferenceAsset::select(model, width)?;

        match self.source.load(asset).await {
            Ok(Some(payload)) => {
                debug!(%asset, ?model, width, len = payload.len(), "Loaded reference frame");
                Some(payload)
            }
            Ok(None) => {
                debug!(%asset, ?model, width, "Reference frame asset not bundled");
                None
            }
            Err(e) => {
                warn!(%asset, "Failed to read reference frame: {}", e);
                None
            }
        }
    }
}

impl fmt::Debug for ReferenceFrameProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceFrameProvider").field("model", &self.model).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phantom3_photo_mode_uses_960_asset() {
        assert_eq!(
            ReferenceAsset::select(DeviceModel::Phantom3Advanced, 960),
            Some(ReferenceAsset::Photo960x720Phantom3)
        );
        assert_eq!(
            ReferenceAsset::select(DeviceModel::Phantom3Standard, 1280),
            Some(ReferenceAsset::Hd720Phantom3)
        );
    }

    #[test]
    fn phantom3_4k_falls_back_to_720() {
        assert_eq!(ReferenceAsset::select(DeviceModel::Phantom3_4K, 640), Some(ReferenceAsset::Vga640x480));
        assert_eq!(ReferenceAsset::select(DeviceModel::Phantom3_4K, 848), Some(ReferenceAsset::Wide848x480));
        assert_eq!(ReferenceAsset::select(DeviceModel::Phantom3_4K, 1920), Some(ReferenceAsset::Hd720Phantom3));
    }

    #[test]
    fn osmo_has_no_reference() {
        assert_eq!(ReferenceAsset::select(DeviceModel::Osmo, 1280), None);
        assert_eq!(ReferenceAsset::select(DeviceModel::OsmoPro, 1280), None);
    }

    #[test]
    fn other_models_use_inspire_asset() {
        for model in [DeviceModel::Inspire1, DeviceModel::Phantom3Professional, DeviceModel::Other] {
            assert_eq!(ReferenceAsset::select(model, 1280), Some(ReferenceAsset::Hd720Inspire));
        }
        assert_eq!(ReferenceAsset::select(DeviceModel::Phantom4, 640), Some(ReferenceAsset::Hd720Phantom4));
    }

    #[tokio::test]
    async fn provider_returns_bundled_payload() {
        let assets = StaticAssets::default().with(ReferenceAsset::Hd720Phantom4, vec![0, 0, 0, 1, 0x65]);
        let provider = ReferenceFrameProvider::new(Some(DeviceModel::Phantom4), Arc::new(assets));

        let payload = provider.reference_frame(1280).await.expect("asset should be available");
        assert_eq!(&payload[..], &[0, 0, 0, 1, 0x65]);
    }

    #[tokio::test]
    async fn provider_uses_configured_device() -> anyhow::Result<()> {
        let config = crate::DecoderConfig::from_yaml("device_model: phantom3_4k")?;
        let assets = StaticAssets::default().with(ReferenceAsset::Wide848x480, vec![7u8]);
        let provider = ReferenceFrameProvider::from_config(&config, Arc::new(assets));

        assert_eq!(provider.model(), Some(DeviceModel::Phantom3_4K));
        assert_eq!(provider.reference_frame(848).await.as_deref(), Some(&[7u8][..]));
        assert!(provider.reference_frame(1280).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn provider_without_model_or_asset_is_unavailable() {
        assert!(ReferenceFrameProvider::unavailable().reference_frame(1280).await.is_none());

        let empty = ReferenceFrameProvider::new(Some(DeviceModel::Inspire1), Arc::new(StaticAssets::default()));
        assert!(empty.reference_frame(1280).await.is_none());

        let osmo = StaticAssets::default().with(ReferenceAsset::Hd720Inspire, vec![1]);
        let osmo = ReferenceFrameProvider::new(Some(DeviceModel::Osmo), Arc::new(osmo));
        assert!(osmo.reference_frame(1280).await.is_none());
    }
}
