/*!
# Solwatch DevKit - Stubs and Utilities for Development

Library easing development against the Solwatch bus with:
- MQTT stubs for tests without a broker
- Payload builders for the Solwatch contracts
- Helpers for contract JSON files
- A test harness wiring the above together
*/

pub mod contract_helpers;
pub mod mqtt_stub;
pub mod test_utils;

pub use contract_helpers::{ContractLoader, EventBuilder};
pub use mqtt_stub::{MockMqttClient, SolwatchMessageBuilder};
pub use test_utils::TestHarness;
