/*!
Test harness for Solwatch components

Eases writing tests for monitor and gateway code with:
- automatic MQTT mock setup
- assertions on the messages exchanged
- canned senders for the Solwatch contracts
*/

use crate::contract_helpers::ContractLoader;
use crate::mqtt_stub::{MockMqttClient, SolwatchMessageBuilder};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use anyhow::Result;

/// Complete test harness for Solwatch components
pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
    pub contract_loader: ContractLoader,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok(); // logging for tests

        Self {
            mqtt_client: MockMqttClient::new(),
            contract_loader: ContractLoader::new("contracts"),
            expectations: Vec::new(),
        }
    }

    /// Load the contract files as part of setup
    pub fn with_contracts(mut self) -> Result<Self> {
        let count = self.contract_loader.load_mqtt_contracts()?;
        log::info!("loaded {} contracts for testing", count);
        Ok(self)
    }

    /// Expect N messages on a topic by the end of the test
    pub fn expect_messages(&mut self, topic: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: topic.to_string(),
            expected_count: count,
        });
        self
    }

    /// Simulate a live telemetry packet from the gateway
    pub async fn send_telemetry(
        &self,
        pv_power: f64,
        batt_volt: f64,
        batt_soc: f64,
        status_code: u16,
    ) -> Result<()> {
        let payload = SolwatchMessageBuilder::telemetry_live_v1(
            pv_power, batt_volt, batt_soc, 0.0, 25.0, status_code,
        );
        self.mqtt_client
            .simulate_incoming("solwatch/telemetry/live@v1", serde_json::to_vec(&payload)?)
            .await?;
        log::info!("sent telemetry packet ({}W)", pv_power);
        Ok(())
    }

    /// Simulate a history answer from the gateway
    pub async fn send_history_result(&self, request_id: &str, records: Vec<Value>) -> Result<()> {
        let payload = SolwatchMessageBuilder::history_result_v1(request_id, records);
        self.mqtt_client
            .simulate_incoming("solwatch/history/result@v1", serde_json::to_vec(&payload)?)
            .await?;
        log::info!("sent history result for {}", request_id);
        Ok(())
    }

    /// Simulate the retained parameter block from the gateway
    pub async fn send_params_data(&self, batt_type: u8, system_voltage: &str) -> Result<()> {
        let payload = SolwatchMessageBuilder::params_data_v1(batt_type, system_voltage);
        self.mqtt_client
            .simulate_incoming("solwatch/params/data@v1", serde_json::to_vec(&payload)?)
            .await?;
        log::info!("sent parameter block");
        Ok(())
    }

    /// Wait until a message shows up on a topic (or time out)
    pub async fn wait_for_message(&self, topic: &str, timeout_ms: u64) -> Result<Option<Value>> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
                log::info!("received expected message on {}", topic);
                return Ok(Some(msg));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        log::warn!("timeout waiting for message on {}", topic);
        Ok(None)
    }

    /// Check every configured expectation
    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let messages = self.mqtt_client.find_messages_by_topic(&expectation.topic);
            let actual_count = messages.len();

            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic,
                    expectation.expected_count,
                    actual_count
                );
            }
        }
        Ok(())
    }

    /// Assert that a specific payload was published
    pub fn assert_message_sent(&self, topic: &str, expected_payload: &Value) -> Result<()> {
        let messages = self.mqtt_client.find_messages_by_topic(topic);

        for msg in messages {
            let payload: Value = serde_json::from_slice(&msg.payload)?;
            if payload == *expected_payload {
                return Ok(());
            }
        }

        anyhow::bail!("expected message not found on topic: {}", topic);
    }

    /// Assert a field exists in the latest message on a topic
    pub fn assert_field_exists(&self, topic: &str, field_path: &str) -> Result<()> {
        if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
            if get_nested_field(&msg, field_path).is_some() {
                return Ok(());
            }
        }

        anyhow::bail!("field '{}' not found in latest message on {}", field_path, topic);
    }

    /// Assert a field's value in the latest message on a topic
    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
            if let Some(actual) = get_nested_field(&msg, field_path) {
                if actual == expected {
                    return Ok(());
                }
                anyhow::bail!(
                    "field '{}' mismatch: expected {:?}, got {:?}",
                    field_path,
                    expected,
                    actual
                );
            }
        }

        anyhow::bail!("field '{}' not found for comparison in {}", field_path, topic);
    }

    /// Stats over the collected messages
    pub fn get_stats(&self) -> TestStats {
        let messages = self.mqtt_client.get_published_messages();
        let mut topic_counts = HashMap::new();

        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_messages: messages.len(),
            topic_counts,
            subscriptions: self.mqtt_client.get_subscriptions(),
        }
    }

    /// Reset the harness for the next test
    pub fn reset(&mut self) {
        self.mqtt_client.clear();
        self.expectations.clear();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub subscriptions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::QoS;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new();

        harness.expect_messages("solwatch/telemetry/online@v1", 1);

        let payload = Value::Bool(true);
        harness
            .mqtt_client
            .publish(
                "solwatch/telemetry/online@v1",
                QoS::AtLeastOnce,
                true,
                serde_json::to_vec(&payload).unwrap(),
            )
            .await
            .unwrap();

        harness.verify_expectations().unwrap();
        harness.assert_message_sent("solwatch/telemetry/online@v1", &payload).unwrap();

        let stats = harness.get_stats();
        assert_eq!(stats.total_messages, 1);
    }

    #[tokio::test]
    async fn test_telemetry_sender_reaches_receiver() {
        let harness = TestHarness::new();
        let mut rx = harness.mqtt_client.setup_receiver();

        harness.send_telemetry(85.0, 13.2, 90.0, 8).await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "solwatch/telemetry/live@v1");
        let value: Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(value["batt"]["soc"], 90.0);
    }

    #[tokio::test]
    async fn test_nested_field_assertions() {
        let harness = TestHarness::new();
        let packet = SolwatchMessageBuilder::telemetry_live_v1(42.0, 12.8, 77.0, 0.0, 25.0, 4);
        harness
            .mqtt_client
            .publish(
                "solwatch/telemetry/live@v1",
                QoS::AtLeastOnce,
                false,
                serde_json::to_vec(&packet).unwrap(),
            )
            .await
            .unwrap();

        harness.assert_field_exists("solwatch/telemetry/live@v1", "pv.power").unwrap();
        harness
            .assert_field_equals(
                "solwatch/telemetry/live@v1",
                "batt.soc",
                &Value::from(77.0),
            )
            .unwrap();
    }
}
