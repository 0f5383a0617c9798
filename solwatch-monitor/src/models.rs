use serde::{Deserialize, Serialize};

// Wire structures mirror what the ESP32 gateway publishes. Field names on the
// history records keep the gateway's Hungarian-ish keys via serde renames.

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PvReading {
    pub volt: f64,
    pub amps: f64,
    pub power: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BattReading {
    pub volt: f64,
    pub amps: f64,
    pub soc: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadReading {
    pub volt: f64,
    pub amps: f64,
    pub power: f64,
}

/// One snapshot of controller sensor readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPacket {
    pub pv: PvReading,
    pub batt: BattReading,
    pub load: LoadReading,
    pub temp: f64,
    pub daily_kwh: f64,
    pub status_code: Option<u16>,
    /// Gateway-side unix timestamp, when the firmware includes one.
    pub timestamp: Option<i64>,
}

/// One logged history sample as stored by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "hStamp")]
    pub h_stamp: i64,
    #[serde(rename = "hPWatt")]
    pub h_watt: f64,
    #[serde(rename = "hBVolt")]
    pub h_volt: f64,
    #[serde(rename = "hBSOC")]
    pub h_soc: f64,
    #[serde(rename = "hCCode")]
    pub h_code: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub firmware_version: Option<String>,
    pub firmware_date: Option<String>,
    pub chip_model: Option<String>,
    pub free_space: Option<u64>,
}

/// Full Epever parameter set. Every field is required on a save: a partial
/// set is rejected as a whole rather than applied piecemeal to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceParameters {
    /// Battery chemistry code, 0..=3 (User/Sealed/Gel/Flooded).
    pub batt_type: u8,
    /// "Auto", "12", "24", ...
    pub system_voltage: String,
    pub batt_capacity: f64,
    pub temp_compensation: f64,

    pub h_voltage_disconnect: f64,
    pub charging_limit_voltage: f64,
    pub overvoltage_reconnect: f64,
    pub equalization_voltage: f64,
    pub boost_voltage: f64,
    pub float_voltage: f64,
    pub boost_reconnect_voltage: f64,

    pub low_voltage_reconnect: f64,
    pub undervoltage_recover: f64,
    pub undervoltage_warning: f64,
    pub low_voltage_disconnect: f64,
    pub discharge_limit_voltage: f64,

    /// Minutes.
    pub equalize_duration: f64,
    /// Minutes.
    pub boost_duration: f64,
}

impl DeviceParameters {
    /// Sanity check before the set is forwarded to the gateway. The gateway
    /// writes these straight to Modbus holding registers, so garbage here
    /// ends up in the controller.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.batt_type > 3 {
            return Err("batt_type out of range");
        }
        let voltages = [
            self.h_voltage_disconnect,
            self.charging_limit_voltage,
            self.overvoltage_reconnect,
            self.equalization_voltage,
            self.boost_voltage,
            self.float_voltage,
            self.boost_reconnect_voltage,
            self.low_voltage_reconnect,
            self.undervoltage_recover,
            self.undervoltage_warning,
            self.low_voltage_disconnect,
            self.discharge_limit_voltage,
        ];
        if voltages.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err("voltage fields must be positive");
        }
        if self.batt_capacity <= 0.0 {
            return Err("batt_capacity must be positive");
        }
        if self.equalize_duration < 0.0 || self.boost_duration < 0.0 {
            return Err("durations must not be negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> DeviceParameters {
        DeviceParameters {
            batt_type: 1,
            system_voltage: "12".into(),
            batt_capacity: 200.0,
            temp_compensation: 3.0,
            h_voltage_disconnect: 16.0,
            charging_limit_voltage: 15.0,
            overvoltage_reconnect: 15.0,
            equalization_voltage: 14.6,
            boost_voltage: 14.4,
            float_voltage: 13.8,
            boost_reconnect_voltage: 13.2,
            low_voltage_reconnect: 12.6,
            undervoltage_recover: 12.2,
            undervoltage_warning: 12.0,
            low_voltage_disconnect: 11.1,
            discharge_limit_voltage: 10.6,
            equalize_duration: 120.0,
            boost_duration: 120.0,
        }
    }

    #[test]
    fn history_record_uses_gateway_field_names() {
        let rec: HistoryRecord = serde_json::from_str(
            r#"{"hStamp": 1754400000, "hPWatt": 85.5, "hBVolt": 13.2, "hBSOC": 91.0, "hCCode": 8}"#,
        )
        .unwrap();
        assert_eq!(rec.h_stamp, 1754400000);
        assert_eq!(rec.h_code, Some(8));
    }

    #[test]
    fn partial_parameter_set_is_rejected() {
        // Missing fields must fail deserialization, not default to zero.
        let err = serde_json::from_str::<DeviceParameters>(r#"{"batt_type": 1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn validate_accepts_sane_set() {
        assert!(sample_params().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_voltage() {
        let mut p = sample_params();
        p.float_voltage = 0.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_battery_code() {
        let mut p = sample_params();
        p.batt_type = 7;
        assert!(p.validate().is_err());
    }
}
