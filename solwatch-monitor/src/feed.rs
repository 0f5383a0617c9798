//! Live telemetry feed over the bus.
//!
//! Only the high-rate live topic is session-gated; the retained bookkeeping
//! topics (parameter data, firmware info, history results) stay subscribed
//! for the whole process lifetime and cost next to nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{topics, MqttConf};
use crate::firmware::FirmwareManager;
use crate::history::HistoryBridge;
use crate::liveness::LivenessState;
use crate::models::TelemetryPacket;
use crate::params::ParamsBridge;
use crate::state::Shared;

/// What one raw payload on the live topic turned out to be.
#[derive(Debug)]
pub enum Snapshot {
    /// JSON `null` — the backend reports "no value at this path". Treated as
    /// no packet at all: does not touch liveness.
    Absent,
    /// Bytes arrived but don't decode to a packet. The device evidently sent
    /// something, so this still counts for liveness; the view ignores it.
    Unreadable,
    Packet(TelemetryPacket),
}

pub fn decode_snapshot(payload: &[u8]) -> Snapshot {
    let value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(_) => return Snapshot::Unreadable,
    };
    if value.is_null() {
        return Snapshot::Absent;
    }
    match serde_json::from_value(value) {
        Ok(packet) => Snapshot::Packet(packet),
        Err(_) => Snapshot::Unreadable,
    }
}

/// Handle on the session-gated live subscription. Open/close are idempotent;
/// the local flag flips before the network call settles, and a failed call is
/// logged and left for the state machine to continue optimistically.
#[derive(Clone)]
pub struct TelemetryFeed {
    client: AsyncClient,
    topic: String,
    open: Arc<AtomicBool>,
}

impl TelemetryFeed {
    pub fn new(client: AsyncClient, mqtt: &MqttConf) -> Self {
        Self {
            client,
            topic: mqtt.topic(topics::TELEMETRY_LIVE),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub async fn open(&self) {
        if self.open.swap(true, Ordering::SeqCst) {
            return; // already open
        }
        if let Err(e) = self.client.subscribe(&self.topic, QoS::AtLeastOnce).await {
            warn!("live feed subscribe failed: {e:?}");
        }
    }

    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return; // already closed
        }
        if let Err(e) = self.client.unsubscribe(&self.topic).await {
            warn!("live feed unsubscribe failed: {e:?}");
        }
    }
}

/// Everything the bus listener fans incoming messages out to.
pub struct FeedSinks {
    pub liveness: Shared<LivenessState>,
    pub latest: Shared<Option<TelemetryPacket>>,
    pub history: Arc<HistoryBridge>,
    pub params: Arc<ParamsBridge>,
    pub firmware: Arc<FirmwareManager>,
}

/// Owns the bus event loop: dispatches per-topic, reconnect backoff on error.
pub fn spawn_bus_listener(
    mut eventloop: EventLoop,
    mqtt: MqttConf,
    sinks: FeedSinks,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let topic_live = mqtt.topic(topics::TELEMETRY_LIVE);
        let topic_history = mqtt.topic(topics::HISTORY_RESULT);
        let topic_params = mqtt.topic(topics::PARAMS_DATA);
        let topic_firmware = mqtt.topic(topics::FIRMWARE_INFO);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    if p.topic == topic_live {
                        handle_live(&p.payload, &sinks);
                    } else if p.topic == topic_history {
                        match serde_json::from_slice(&p.payload) {
                            Ok(result) => sinks.history.handle_result(result),
                            Err(e) => warn!("invalid history result: {e}"),
                        }
                    } else if p.topic == topic_params {
                        match serde_json::from_slice(&p.payload) {
                            Ok(params) => sinks.params.handle_data(params),
                            Err(e) => warn!("invalid parameter data: {e}"),
                        }
                    } else if p.topic == topic_firmware {
                        match serde_json::from_slice(&p.payload) {
                            Ok(info) => sinks.firmware.handle_info(info),
                            Err(e) => warn!("invalid firmware info: {e}"),
                        }
                    } else {
                        debug!("ignoring message on {}", p.topic);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("bus error: {e:?}");
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    })
}

fn handle_live(payload: &[u8], sinks: &FeedSinks) {
    match decode_snapshot(payload) {
        Snapshot::Absent => {}
        Snapshot::Unreadable => {
            warn!("dropping unreadable telemetry packet ({} bytes)", payload.len());
            sinks.liveness.lock().note_packet();
        }
        Snapshot::Packet(packet) => {
            sinks.liveness.lock().note_packet();
            *sinks.latest.lock() = Some(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_snapshot_is_no_packet() {
        assert!(matches!(decode_snapshot(b"null"), Snapshot::Absent));
    }

    #[test]
    fn garbage_is_unreadable() {
        assert!(matches!(decode_snapshot(b"\x00\x01not json"), Snapshot::Unreadable));
        assert!(matches!(decode_snapshot(b"{\"pv\": 3}"), Snapshot::Unreadable));
    }

    #[test]
    fn devkit_builder_payload_decodes() {
        let payload = solwatch_devkit::SolwatchMessageBuilder::telemetry_live_v1(
            85.0, 13.2, 90.0, 12.0, 25.0, 8,
        );
        match decode_snapshot(&serde_json::to_vec(&payload).unwrap()) {
            Snapshot::Packet(p) => {
                assert_eq!(p.status_code, Some(8));
                assert!((p.batt.soc - 90.0).abs() < f64::EPSILON);
            }
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn well_formed_packet_decodes() {
        let payload = br#"{
            "pv":   {"volt": 38.1, "amps": 2.3, "power": 87.6},
            "batt": {"volt": 13.2, "amps": 6.1, "soc": 88.0},
            "load": {"volt": 12.9, "amps": 1.2, "power": 15.5},
            "temp": 24.5,
            "daily_kwh": 0.73,
            "status_code": 8,
            "timestamp": 1754400000
        }"#;
        match decode_snapshot(payload) {
            Snapshot::Packet(p) => {
                assert_eq!(p.status_code, Some(8));
                assert!((p.pv.power - 87.6).abs() < f64::EPSILON);
            }
            other => panic!("expected packet, got {other:?}"),
        }
    }
}
