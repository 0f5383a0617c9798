//! Gateway simulator - stands in for the ESP32 bridge during development
//!
//! Publishes synthetic Epever telemetry on the live topic, keeps a fake
//! history log, and answers the monitor's history / parameter / OTA
//! requests, so the whole monitor stack can be driven without hardware.

use anyhow::Result;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ===== Configuration =====
const CLIENT_ID: &str = "solwatch-gateway-sim";
const TOPIC_PREFIX: &str = "solwatch";
const TELEMETRY_PERIOD: Duration = Duration::from_secs(2);
/// Minutes between synthetic history samples.
const HISTORY_STEP_SECS: i64 = 600;

fn topic(suffix: &str) -> String {
    format!("{}/{}", TOPIC_PREFIX, suffix)
}

// ===== Bus messages =====

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    request_id: String,
    start_ts: i64,
    end_ts: i64,
}

#[derive(Debug, Serialize)]
struct HistoryResult {
    request_id: String,
    records: Vec<serde_json::Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("starting gateway-sim");

    let broker = std::env::var("SOLWATCH_BROKER").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SOLWATCH_BROKER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1883);

    let mut mqttoptions = MqttOptions::new(CLIENT_ID, &broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    for suffix in ["history/query@v1", "params/read@v1", "params/set@v1", "firmware/ota@v1"] {
        client.subscribe(topic(suffix), QoS::AtLeastOnce).await?;
    }

    // Retained bookkeeping so a late-starting monitor sees something.
    let mut params = default_params();
    publish_params(&client, &params).await;
    publish_firmware_info(&client).await;

    let mut ticker = tokio::time::interval(TELEMETRY_PERIOD);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let packet = synth_packet(now_ts());
                let payload = serde_json::to_string(&packet)?;
                if let Err(e) = client.publish(topic("telemetry/live@v1"), QoS::AtLeastOnce, false, payload).await {
                    warn!("telemetry publish failed: {e:?}");
                }
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    if let Err(e) = handle_message(&publish.topic, &publish.payload, &client, &mut params).await {
                        error!("error handling message from {}: {}", publish.topic, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}. Reconnecting...", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}

async fn handle_message(
    topic_in: &str,
    payload: &[u8],
    client: &AsyncClient,
    params: &mut serde_json::Value,
) -> Result<()> {
    debug!("received message on {}", topic_in);

    if topic_in == topic("history/query@v1") {
        let query: HistoryQuery = serde_json::from_slice(payload)?;
        let result = HistoryResult {
            request_id: query.request_id.clone(),
            records: synth_history(query.start_ts, query.end_ts),
        };
        client
            .publish(
                topic("history/result@v1"),
                QoS::AtLeastOnce,
                false,
                serde_json::to_string(&result)?,
            )
            .await?;
        info!(
            "answered history query {} ({} records)",
            query.request_id,
            (query.end_ts - query.start_ts) / HISTORY_STEP_SECS
        );
    } else if topic_in == topic("params/read@v1") {
        info!("re-publishing parameter block on read request");
        publish_params(client, params).await;
    } else if topic_in == topic("params/set@v1") {
        let incoming: serde_json::Value = serde_json::from_slice(payload)?;
        info!("applying parameter set from monitor");
        *params = incoming;
        // A real gateway writes Modbus registers, re-reads, then republishes.
        publish_params(client, params).await;
    } else if topic_in == topic("firmware/ota@v1") {
        info!("OTA trigger received, pretending to download firmware.bin and flash");
        publish_firmware_info(client).await;
    } else {
        warn!("unknown topic: {}", topic_in);
    }

    Ok(())
}

async fn publish_params(client: &AsyncClient, params: &serde_json::Value) {
    match serde_json::to_string(params) {
        Ok(payload) => {
            if let Err(e) = client
                .publish(topic("params/data@v1"), QoS::AtLeastOnce, true, payload)
                .await
            {
                warn!("params publish failed: {e:?}");
            }
        }
        Err(e) => warn!("params serialize failed: {e}"),
    }
}

async fn publish_firmware_info(client: &AsyncClient) {
    let info = serde_json::json!({
        "firmware_version": "1.4.2-sim",
        "firmware_date": "2025-07-30",
        "chip_model": "ESP32-S3 (simulated)",
        "free_space": 1_245_184u64,
    });
    if let Err(e) = client
        .publish(topic("firmware/info@v1"), QoS::AtLeastOnce, true, info.to_string())
        .await
    {
        warn!("firmware info publish failed: {e:?}");
    }
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Daylight-shaped PV curve: zero at night, peaking around solar noon.
fn pv_power_at(ts: i64) -> f64 {
    let seconds_into_day = (ts % 86_400) as f64;
    let hours = seconds_into_day / 3600.0;
    if !(6.0..=18.0).contains(&hours) {
        return 0.0;
    }
    let x = (hours - 6.0) / 12.0 * std::f64::consts::PI;
    (x.sin() * 320.0 * 100.0).round() / 100.0
}

/// Charge stage follows the curve: standby at night, boost while climbing,
/// float once the battery is topped up.
fn status_code_at(pv_power: f64) -> u16 {
    if pv_power <= 0.0 {
        0b0000 // standby
    } else if pv_power > 250.0 {
        0b0100 // float
    } else {
        0b1000 // boost
    }
}

fn synth_packet(ts: i64) -> serde_json::Value {
    let pv_power = pv_power_at(ts);
    let batt_volt = 12.6 + pv_power / 320.0;
    let load_power = 18.0;
    serde_json::json!({
        "pv": {
            "volt": if pv_power > 0.0 { 36.2 } else { 0.4 },
            "amps": if pv_power > 0.0 { pv_power / 36.2 } else { 0.0 },
            "power": pv_power
        },
        "batt": {
            "volt": batt_volt,
            "amps": (pv_power - load_power) / batt_volt,
            "soc": (70.0 + 30.0 * pv_power / 320.0).min(100.0)
        },
        "load": {
            "volt": batt_volt,
            "amps": load_power / batt_volt,
            "power": load_power
        },
        "temp": 24.0 + pv_power / 64.0,
        "daily_kwh": pv_power * 8.0 / 1000.0,
        "status_code": status_code_at(pv_power),
        "timestamp": ts
    })
}

fn synth_history(start_ts: i64, end_ts: i64) -> Vec<serde_json::Value> {
    let mut records = Vec::new();
    let mut ts = start_ts;
    while ts < end_ts {
        let pv_power = pv_power_at(ts);
        records.push(serde_json::json!({
            "hStamp": ts,
            "hPWatt": pv_power,
            "hBVolt": 12.6 + pv_power / 320.0,
            "hBSOC": (70.0 + 30.0 * pv_power / 320.0).min(100.0),
            "hCCode": status_code_at(pv_power)
        }));
        ts += HISTORY_STEP_SECS;
    }
    records
}

fn default_params() -> serde_json::Value {
    serde_json::json!({
        "batt_type": 1,
        "system_voltage": "12",
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
