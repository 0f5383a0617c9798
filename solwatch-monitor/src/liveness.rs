//! Device liveness from packet recency.
//!
//! The subscription can be healthy while the controller behind the gateway
//! has gone dark, so liveness is judged purely from how long ago the last
//! packet was observed. A periodic tick re-evaluates even when nothing
//! arrives: the absence of packets is itself the signal.

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{topics, LivenessConf, MqttConf};
use crate::session::SessionMonitor;
use crate::state::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    /// "Probably offline": past the degraded threshold but not yet written off.
    Degraded,
    Offline,
}

impl DeviceStatus {
    pub fn is_online(self) -> bool {
        matches!(self, DeviceStatus::Online)
    }
}

/// Process-wide packet-recency state. `last_packet_at` starts at monitor
/// start, not epoch, so a freshly started monitor reads Online-ish ages
/// instead of an enormous one.
#[derive(Debug)]
pub struct LivenessState {
    last_packet_at: Instant,
}

impl LivenessState {
    pub fn new() -> Self {
        Self { last_packet_at: Instant::now() }
    }

    pub fn note_packet(&mut self) {
        self.last_packet_at = Instant::now();
    }

    pub fn age(&self) -> std::time::Duration {
        self.last_packet_at.elapsed()
    }
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure classification: monotone in `age_secs` (smaller age is never a worse
/// status). `degraded_after < offline_after` is enforced by config defaults.
pub fn classify(age_secs: u64, conf: &LivenessConf) -> DeviceStatus {
    if age_secs <= conf.degraded_after_secs {
        DeviceStatus::Online
    } else if age_secs <= conf.offline_after_secs {
        DeviceStatus::Degraded
    } else {
        DeviceStatus::Offline
    }
}

/// Re-evaluates device status every `tick_secs` and mirrors the boolean
/// `online` flag to the bus (retained) so other viewers see the same status
/// without their own feed. The publish is fire-and-forget: a failure is
/// logged and the next tick tries again.
pub fn spawn_liveness_ticker(
    liveness: Shared<LivenessState>,
    session: Shared<SessionMonitor>,
    client: AsyncClient,
    mqtt: &MqttConf,
    conf: LivenessConf,
) -> JoinHandle<()> {
    let topic = mqtt.topic(topics::DEVICE_ONLINE);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(conf.tick_secs));
        loop {
            interval.tick().await;

            let age_secs = liveness.lock().age().as_secs();
            let status = classify(age_secs, &conf);
            debug!("device status {:?} (age {}s)", status, age_secs);

            // Only an authenticated viewer publishes: an idle wall display
            // must not keep asserting state it no longer observes.
            if !session.lock().is_authenticated() {
                continue;
            }
            let payload = if status.is_online() { "true" } else { "false" };
            if let Err(e) = client.try_publish(&topic, QoS::AtLeastOnce, true, payload) {
                warn!("online-flag publish failed: {e:?}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf() -> LivenessConf {
        LivenessConf {
            degraded_after_secs: 60,
            offline_after_secs: 120,
            tick_secs: 5,
        }
    }

    #[test]
    fn classification_thresholds() {
        assert_eq!(classify(30, &conf()), DeviceStatus::Online);
        assert_eq!(classify(90, &conf()), DeviceStatus::Degraded);
        assert_eq!(classify(150, &conf()), DeviceStatus::Offline);
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(classify(60, &conf()), DeviceStatus::Online);
        assert_eq!(classify(61, &conf()), DeviceStatus::Degraded);
        assert_eq!(classify(120, &conf()), DeviceStatus::Degraded);
        assert_eq!(classify(121, &conf()), DeviceStatus::Offline);
    }

    #[test]
    fn classification_is_monotone() {
        let c = conf();
        let mut last = classify(0, &c);
        for age in 0..300 {
            let s = classify(age, &c);
            // Online < Degraded < Offline in declaration order.
            assert!(s as u8 >= last as u8, "status got better as age grew");
            last = s;
        }
    }

    #[test]
    fn fresh_state_reads_small_age() {
        let state = LivenessState::new();
        assert!(state.age().as_secs() < 2);
    }

    #[test]
    fn note_packet_resets_age() {
        let mut state = LivenessState::new();
        state.note_packet();
        assert!(state.age().as_millis() < 100);
    }
}
