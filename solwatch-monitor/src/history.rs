//! Per-day history logs, fetched from the gateway over the bus.
//!
//! The backend keeps no queryable store on our side; the gateway owns the
//! log and answers range queries. One query covers one local day
//! [midnight, midnight+24h) in unix seconds.

use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::bridge::{BridgeError, PendingMap};
use crate::config::{topics, MqttConf};
use crate::models::HistoryRecord;
use crate::status::decode_status;

const TIME_OF_DAY: &[FormatItem<'static>] = format_description!("[hour]:[minute]");

#[derive(Debug, Serialize)]
pub struct HistoryQuery {
    pub request_id: String,
    pub start_ts: i64,
    pub end_ts: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResult {
    pub request_id: String,
    #[serde(default)]
    pub records: Vec<HistoryRecord>,
    pub error: Option<String>,
}

pub struct HistoryBridge {
    client: AsyncClient,
    query_topic: String,
    pending: PendingMap<HistoryResult>,
}

impl HistoryBridge {
    pub fn new(client: AsyncClient, mqtt: &MqttConf) -> Self {
        Self {
            client,
            query_topic: mqtt.topic(topics::HISTORY_QUERY),
            pending: PendingMap::new(),
        }
    }

    /// Called by the bus listener for every message on the result topic.
    pub fn handle_result(&self, result: HistoryResult) {
        let request_id = result.request_id.clone();
        if !self.pending.resolve(&request_id, result) {
            warn!("history result for unknown request {}", request_id);
        }
    }

    /// Fetch the log for one day, newest record first.
    pub async fn fetch_day(&self, day: Date) -> Result<Vec<HistoryRecord>, BridgeError> {
        let start_ts = day.midnight().assume_utc().unix_timestamp();
        let query = HistoryQuery {
            request_id: Uuid::new_v4().to_string(),
            start_ts,
            end_ts: start_ts + 86_400,
        };

        let rx = self.pending.register(&query.request_id);
        let payload =
            serde_json::to_string(&query).map_err(|e| BridgeError::Gateway(e.to_string()))?;
        self.client
            .publish(&self.query_topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BridgeError::Bus(e.to_string()))?;

        let result = self.pending.wait(&query.request_id, rx).await?;
        if let Some(error) = result.error {
            return Err(BridgeError::Gateway(error));
        }

        Ok(newest_first(result.records))
    }
}

fn newest_first(mut records: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
    records.sort_by(|a, b| b.h_stamp.cmp(&a.h_stamp));
    records
}

/// HH:MM wall-clock label for a log timestamp.
pub fn format_log_time(stamp: i64) -> String {
    OffsetDateTime::from_unix_timestamp(stamp)
        .ok()
        .and_then(|t| t.format(TIME_OF_DAY).ok())
        .unwrap_or_else(|| "--:--".into())
}

/// Render a fetched day log as CSV, same columns and newest-first order as
/// the table view.
pub fn day_log_csv(records: &[HistoryRecord]) -> String {
    let mut csv = String::from("Time,Status,Power(W),Battery(V),SOC(%)\n");
    for rec in records {
        let status = decode_status(rec.h_code);
        csv.push_str(&format!(
            "{},{},{},{},{}\n",
            format_log_time(rec.h_stamp),
            status.as_str(),
            rec.h_watt,
            rec.h_volt,
            rec.h_soc
        ));
    }
    csv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(stamp: i64, watt: f64, code: Option<u16>) -> HistoryRecord {
        HistoryRecord {
            h_stamp: stamp,
            h_watt: watt,
            h_volt: 13.1,
            h_soc: 90.0,
            h_code: code,
        }
    }

    #[test]
    fn csv_has_header_and_decoded_status() {
        // 2025-08-06 10:30:00 UTC
        let csv = day_log_csv(&[rec(1754476200, 120.5, Some(0b1000))]);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), "Time,Status,Power(W),Battery(V),SOC(%)");
        assert_eq!(lines.next().unwrap(), "10:30,Boost,120.5,13.1,90");
    }

    #[test]
    fn csv_on_empty_day_is_header_only() {
        assert_eq!(day_log_csv(&[]), "Time,Status,Power(W),Battery(V),SOC(%)\n");
    }

    #[test]
    fn unknown_code_renders_dash() {
        let csv = day_log_csv(&[rec(0, 0.0, None)]);
        assert!(csv.lines().nth(1).unwrap().contains(",-,"));
    }

    #[test]
    fn day_log_sorts_newest_first() {
        let sorted = newest_first(vec![rec(100, 1.0, None), rec(300, 3.0, None), rec(200, 2.0, None)]);
        let stamps: Vec<i64> = sorted.iter().map(|r| r.h_stamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);
    }

    #[test]
    fn format_log_time_pads() {
        // 00:05 UTC on 1970-01-01.
        assert_eq!(format_log_time(300), "00:05");
    }

    #[tokio::test]
    async fn late_result_for_unknown_request_is_dropped() {
        let (client, _eventloop) =
            AsyncClient::new(rumqttc::MqttOptions::new("t", "localhost", 1883), 10);
        let bridge = HistoryBridge::new(client, &MqttConf::default());
        // Must not panic or hang.
        bridge.handle_result(HistoryResult {
            request_id: "gone".into(),
            records: vec![],
            error: None,
        });
    }
}
