//! Remote parameter configuration round-trip.
//!
//! Reads are a trigger: the monitor publishes the read flag, the gateway
//! pulls the registers over Modbus and publishes the full block retained on
//! the data topic, which the bus listener caches here. Saves publish the
//! complete validated set on the set topic; the gateway applies it and
//! re-publishes fresh data.

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tracing::info;

use crate::bridge::BridgeError;
use crate::config::{topics, MqttConf};
use crate::models::DeviceParameters;
use crate::state::{new_state, Shared};

#[derive(Debug, Serialize)]
struct SetRequest<'a> {
    #[serde(flatten)]
    params: &'a DeviceParameters,
}

pub struct ParamsBridge {
    client: AsyncClient,
    read_topic: String,
    set_topic: String,
    cache: Shared<Option<DeviceParameters>>,
}

impl ParamsBridge {
    pub fn new(client: AsyncClient, mqtt: &MqttConf) -> Self {
        Self {
            client,
            read_topic: mqtt.topic(topics::PARAMS_READ),
            set_topic: mqtt.topic(topics::PARAMS_SET),
            cache: new_state(None),
        }
    }

    pub fn cached(&self) -> Option<DeviceParameters> {
        self.cache.lock().clone()
    }

    /// Called by the bus listener for every message on the data topic.
    pub fn handle_data(&self, params: DeviceParameters) {
        info!("parameter block received from gateway");
        *self.cache.lock() = Some(params);
    }

    /// Ask the gateway to re-read the controller registers.
    pub async fn request_read(&self) -> Result<(), BridgeError> {
        self.client
            .publish(&self.read_topic, QoS::AtLeastOnce, false, "true")
            .await
            .map_err(|e| BridgeError::Bus(e.to_string()))
    }

    /// Validate and forward a full parameter set.
    pub async fn save(&self, params: &DeviceParameters) -> Result<(), BridgeError> {
        params.validate().map_err(BridgeError::Invalid)?;
        let payload = serde_json::to_string(&SetRequest { params })
            .map_err(|e| BridgeError::Gateway(e.to_string()))?;
        self.client
            .publish(&self.set_topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BridgeError::Bus(e.to_string()))?;
        info!("parameter set forwarded to gateway");
        Ok(())
    }
}
