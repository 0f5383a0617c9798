/*!
Mock MQTT client for development without a broker

Lets monitor and gateway code be developed and tested without a running
broker. Records every published message and can simulate inbound traffic.
*/

use rumqttc::QoS;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock MQTT client mirroring the rumqttc::AsyncClient surface
#[derive(Clone)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            message_sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Set up a channel to receive simulated inbound messages
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock().unwrap() = Some(sender);
        receiver
    }

    /// Record a publish (signature-compatible with AsyncClient)
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };

        self.published_messages.lock().unwrap().push(message.clone());

        log::info!("[MOCK] published to {}: {} bytes", message.topic, message.payload.len());
        Ok(())
    }

    /// Record a subscription (signature-compatible with AsyncClient)
    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        self.subscriptions.lock().unwrap().push(topic.clone());
        log::info!("[MOCK] subscribed to {}", topic);
        Ok(())
    }

    /// Drop a recorded subscription
    pub async fn unsubscribe<S: Into<String>>(&self, topic: S) -> Result<()> {
        let topic = topic.into();
        self.subscriptions.lock().unwrap().retain(|t| t != &topic);
        log::info!("[MOCK] unsubscribed from {}", topic);
        Ok(())
    }

    /// Simulate an inbound message (for tests)
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };

        if let Some(sender) = self.message_sender.lock().unwrap().as_ref() {
            sender.send(message.clone()).map_err(|e| anyhow::anyhow!("send error: {}", e))?;
        }

        log::info!("[MOCK] simulated incoming: {}", message.topic);
        Ok(())
    }

    /// All recorded publishes (for test assertions)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    /// Recorded subscriptions (for test assertions)
    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Publishes recorded for one topic
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse the latest message on a topic as JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builders for payloads conforming to the Solwatch bus contracts
pub struct SolwatchMessageBuilder;

impl SolwatchMessageBuilder {
    /// Live telemetry packet (telemetry/live@v1)
    pub fn telemetry_live_v1(
        pv_power: f64,
        batt_volt: f64,
        batt_soc: f64,
        load_power: f64,
        temp: f64,
        status_code: u16,
    ) -> Value {
        serde_json::json!({
            "pv": {
                "volt": if pv_power > 0.0 { 36.0 } else { 0.0 },
                "amps": if pv_power > 0.0 { pv_power / 36.0 } else { 0.0 },
                "power": pv_power
            },
            "batt": {
                "volt": batt_volt,
                "amps": (pv_power - load_power) / batt_volt,
                "soc": batt_soc
            },
            "load": {
                "volt": batt_volt,
                "amps": load_power / batt_volt,
                "power": load_power
            },
            "temp": temp,
            "daily_kwh": 0.0,
            "status_code": status_code,
            "timestamp": chrono::Utc::now().timestamp()
        })
    }

    /// One logged sample in gateway field names
    pub fn history_record(stamp: i64, watt: f64, volt: f64, soc: f64, code: u16) -> Value {
        serde_json::json!({
            "hStamp": stamp,
            "hPWatt": watt,
            "hBVolt": volt,
            "hBSOC": soc,
            "hCCode": code
        })
    }

    /// History answer (history/result@v1)
    pub fn history_result_v1(request_id: &str, records: Vec<Value>) -> Value {
        serde_json::json!({
            "request_id": request_id,
            "records": records
        })
    }

    /// Full parameter block (params/data@v1) with bench-battery defaults
    pub fn params_data_v1(batt_type: u8, system_voltage: &str) -> Value {
        serde_json::json!({
            "batt_type": batt_type,
            "system_voltage": system_voltage,
            "batt_capacity": 200.0,
            "temp_compensation": 3.0,
            "h_voltage_disconnect": 16.0,
            "charging_limit_voltage": 15.0,
            "overvoltage_reconnect": 15.0,
            "equalization_voltage": 14.6,
            "boost_voltage": 14.4,
            "float_voltage": 13.8,
            "boost_reconnect_voltage": 13.2,
            "low_voltage_reconnect": 12.6,
            "undervoltage_recover": 12.2,
            "undervoltage_warning": 12.0,
            "low_voltage_disconnect": 11.1,
            "discharge_limit_voltage": 10.6,
            "equalize_duration": 120.0,
            "boost_duration": 120.0
        })
    }

    /// Firmware description (firmware/info@v1)
    pub fn firmware_info_v1(version: &str, date: &str, chip: &str, free_space: u64) -> Value {
        serde_json::json!({
            "firmware_version": version,
            "firmware_date": date,
            "chip_model": chip,
            "free_space": free_space
        })
    }

    /// Retained online flag (telemetry/online@v1)
    pub fn device_online_v1(online: bool) -> Value {
        Value::Bool(online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio;

    #[tokio::test]
    async fn test_mock_client_publish_subscribe() {
        let client = MockMqttClient::new();

        client.subscribe("solwatch/telemetry/live@v1", QoS::AtLeastOnce).await.unwrap();
        assert_eq!(client.get_subscriptions(), vec!["solwatch/telemetry/live@v1"]);

        let payload = b"true";
        client
            .publish("solwatch/telemetry/online@v1", QoS::AtLeastOnce, true, payload.to_vec())
            .await
            .unwrap();

        let messages = client.get_published_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "solwatch/telemetry/online@v1");
        assert!(messages[0].retain);
        assert_eq!(messages[0].payload, payload);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_topic() {
        let client = MockMqttClient::new();
        client.subscribe("solwatch/telemetry/live@v1", QoS::AtLeastOnce).await.unwrap();
        client.unsubscribe("solwatch/telemetry/live@v1").await.unwrap();
        assert!(client.get_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_json_message_parsing() {
        let client = MockMqttClient::new();

        let packet = SolwatchMessageBuilder::telemetry_live_v1(85.0, 13.2, 90.0, 12.0, 25.0, 8);
        let payload = serde_json::to_vec(&packet).unwrap();
        client
            .publish("solwatch/telemetry/live@v1", QoS::AtLeastOnce, false, payload)
            .await
            .unwrap();

        let parsed: Option<serde_json::Value> =
            client.get_last_json_message("solwatch/telemetry/live@v1").unwrap();
        let parsed = parsed.unwrap();
        assert_eq!(parsed["pv"]["power"], 85.0);
        assert_eq!(parsed["status_code"], 8);
    }

    #[test]
    fn test_message_builders() {
        let record = SolwatchMessageBuilder::history_record(1754476200, 120.5, 13.1, 91.0, 8);
        assert_eq!(record["hStamp"], 1754476200i64);
        assert_eq!(record["hPWatt"], 120.5);

        let result = SolwatchMessageBuilder::history_result_v1("req-7", vec![record]);
        assert_eq!(result["request_id"], "req-7");
        assert_eq!(result["records"].as_array().unwrap().len(), 1);

        let params = SolwatchMessageBuilder::params_data_v1(1, "12");
        assert_eq!(params["batt_type"], 1);
        assert_eq!(params["float_voltage"], 13.8);
    }
}
