//! Telemetry state shape
//!
//! Values exported in bulk are normalized through this shape: decoded from
//! whatever the writer produced, then re-encoded, so consumers always see the
//! same field set. Missing fields take zero values and unknown fields are
//! dropped.

use serde::{Deserialize, Serialize};

/// `data_state`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataState {
    /// Whether the last poll returned usable data
    #[serde(rename = "isGood")]
    pub is_good: bool,
}

/// `drive_state`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveState {
    /// Current speed
    pub speed: f64,
}

/// `state`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleState {
    /// Distance from the configured home location
    #[serde(rename = "distanceFromHome")]
    pub distance_from_home: f64,
}

/// `climate_state`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateState {
    /// Outside temperature
    pub outside_temp: f64,
}

/// `charge_state`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargeState {
    /// Estimated range
    pub battery_range: f64,
    /// Current charge rate
    pub charge_rate: f64,
    /// Battery level in percent
    pub battery_level: f64,
}

/// The structured value shape of the telemetry service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryState {
    /// `data_state`
    pub data_state: DataState,
    /// `drive_state`
    pub drive_state: DriveState,
    /// `state`
    #[serde(rename = "state")]
    pub vehicle_state: VehicleState,
    /// `climate_state`
    pub climate_state: ClimateState,
    /// `charge_state`
    pub charge_state: ChargeState,
}

impl TelemetryState {
    /// Decode raw bytes and re-encode them in canonical form
    ///
    /// Returns `None` if the bytes are not a JSON object of this shape.
    pub fn normalize(raw: &[u8]) -> Option<Vec<u8>> {
        let state: TelemetryState = serde_json::from_slice(raw).ok()?;
        serde_json::to_vec(&state).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fills_missing_fields() {
        let out = TelemetryState::normalize(br#"{"drive_state":{"speed":42.5}}"#).unwrap();
        let state: TelemetryState = serde_json::from_slice(&out).unwrap();
        assert_eq!(state.drive_state.speed, 42.5);
        assert!(!state.data_state.is_good);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"isGood\":false"));
        assert!(text.contains("\"state\":{\"distanceFromHome\":0.0}"));
        assert!(text.contains("\"battery_level\":0.0"));
    }

    #[test]
    fn test_normalize_drops_unknown_fields() {
        let out =
            TelemetryState::normalize(br#"{"charge_state":{"battery_level":80,"extra":1},"x":2}"#)
                .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("extra"));
        assert!(!text.contains("\"x\""));
        assert!(text.contains("\"battery_level\":80.0"));
    }

    #[test]
    fn test_normalize_is_stable() {
        let once = TelemetryState::normalize(br#"{"data_state":{"isGood":true}}"#).unwrap();
        let twice = TelemetryState::normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_rejects_non_objects() {
        assert!(TelemetryState::normalize(b"100").is_none());
        assert!(TelemetryState::normalize(b"37.4919392,-121.9469367").is_none());
        assert!(TelemetryState::normalize(b"{not json").is_none());
        assert!(TelemetryState::normalize(b"").is_none());
    }

    #[test]
    fn test_normalize_rejects_wrong_field_types() {
        assert!(TelemetryState::normalize(br#"{"drive_state":{"speed":"fast"}}"#).is_none());
    }
}
