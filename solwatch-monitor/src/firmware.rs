//! Firmware info and over-the-air upload.
//!
//! The image goes to object storage under the fixed name `firmware.bin` so
//! the gateway's download URL never changes; the OTA flag on the bus then
//! tells the gateway to fetch and flash it. The flashing protocol itself
//! lives entirely in the gateway firmware.

use rumqttc::{AsyncClient, QoS};
use tracing::info;

use crate::config::{topics, MqttConf, StorageConf};
use crate::models::FirmwareInfo;
use crate::state::{new_state, Shared};

/// Fixed object name the gateway downloads from.
const IMAGE_NAME: &str = "firmware.bin";

#[derive(Debug, thiserror::Error)]
pub enum FirmwareError {
    #[error("only .bin images are accepted")]
    NotABinary,
    #[error("no storage endpoint configured")]
    StorageUnconfigured,
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("bus unavailable: {0}")]
    Bus(String),
}

pub struct FirmwareManager {
    http: reqwest::Client,
    storage: StorageConf,
    client: AsyncClient,
    ota_topic: String,
    cache: Shared<Option<FirmwareInfo>>,
}

impl FirmwareManager {
    pub fn new(client: AsyncClient, mqtt: &MqttConf, storage: StorageConf) -> Self {
        Self {
            http: reqwest::Client::new(),
            storage,
            client,
            ota_topic: mqtt.topic(topics::FIRMWARE_OTA),
            cache: new_state(None),
        }
    }

    pub fn info(&self) -> Option<FirmwareInfo> {
        self.cache.lock().clone()
    }

    /// Called by the bus listener for every message on the info topic.
    pub fn handle_info(&self, info: FirmwareInfo) {
        *self.cache.lock() = Some(info);
    }

    /// Upload an image and trigger the OTA flag. Unlike the liveness writes
    /// this is a direct user action, so failures are returned to the caller.
    pub async fn upload(&self, file_name: &str, image: Vec<u8>) -> Result<(), FirmwareError> {
        if !file_name.ends_with(".bin") {
            return Err(FirmwareError::NotABinary);
        }
        let base = self
            .storage
            .base_url
            .as_deref()
            .ok_or(FirmwareError::StorageUnconfigured)?;

        let url = format!("{}/{}", base.trim_end_matches('/'), IMAGE_NAME);
        info!("uploading {} ({} bytes) to {}", file_name, image.len(), url);

        let response = self
            .http
            .put(&url)
            .body(image)
            .send()
            .await
            .map_err(|e| FirmwareError::Upload(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FirmwareError::Upload(format!(
                "storage returned {}",
                response.status()
            )));
        }

        self.client
            .publish(&self.ota_topic, QoS::AtLeastOnce, false, "true")
            .await
            .map_err(|e| FirmwareError::Bus(e.to_string()))?;
        info!("OTA trigger published, device will flash and restart");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::MqttOptions;

    fn manager(storage: StorageConf) -> FirmwareManager {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("t", "localhost", 1883), 10);
        FirmwareManager::new(client, &MqttConf::default(), storage)
    }

    #[tokio::test]
    async fn rejects_non_bin_files() {
        let m = manager(StorageConf { base_url: Some("http://storage".into()) });
        let err = m.upload("app.hex", vec![0u8; 4]).await.unwrap_err();
        assert!(matches!(err, FirmwareError::NotABinary));
    }

    #[tokio::test]
    async fn rejects_upload_without_storage_endpoint() {
        let m = manager(StorageConf::default());
        let err = m.upload("app.bin", vec![0u8; 4]).await.unwrap_err();
        assert!(matches!(err, FirmwareError::StorageUnconfigured));
    }

    #[test]
    fn info_cache_round_trip() {
        let m = manager(StorageConf::default());
        assert!(m.info().is_none());
        m.handle_info(FirmwareInfo {
            firmware_version: Some("1.4.2".into()),
            firmware_date: Some("2025-07-30".into()),
            chip_model: Some("ESP32-S3".into()),
            free_space: Some(1_245_184),
        });
        assert_eq!(m.info().unwrap().firmware_version.as_deref(), Some("1.4.2"));
    }
}
