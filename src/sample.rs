//! Sample record types for the telemetry relay.
//!
//! A [`Sample`] is one instrument reading: a numeric checksum plus an opaque
//! payload mapping. The relay never interprets payload fields; it only stamps
//! the capture time and device identifier before queueing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Wire format for the capture timestamp (second precision).
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Modulus for the payload checksum.
const CHECKSUM_MOD: u32 = 256;

/// One instrument reading awaiting transmission.
///
/// Instances come out of a source with `chksum` and `data` populated; the
/// sampling task stamps `time`, `uid`, and `id` before enqueueing. Every
/// sample in the outgoing queue is stamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Client-generated sample ID for log correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    /// Capture timestamp, stamped at enqueue time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,

    /// Device identifier, stamped at enqueue time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Checksum over the serialized payload, set by the instrument
    pub chksum: u32,

    /// Domain payload; opaque to the relay
    pub data: Map<String, Value>,
}

impl Sample {
    /// Create an unstamped sample from a checksum and payload mapping.
    pub fn new(chksum: u32, data: Map<String, Value>) -> Self {
        Self {
            id: None,
            time: None,
            uid: None,
            chksum,
            data,
        }
    }

    /// Stamp the capture time, device identifier, and sample ID.
    ///
    /// Called exactly once by the sampling task before enqueueing.
    pub fn stamp(&mut self, uid: &str, now: DateTime<Utc>) {
        self.id = Some(Uuid::new_v4());
        self.time = Some(now.format(TIME_FORMAT).to_string());
        self.uid = Some(uid.to_string());
    }

    /// Whether both enqueue-time stamps are present.
    pub fn is_stamped(&self) -> bool {
        self.time.is_some() && self.uid.is_some()
    }

    /// Number of payload fields, reported in the relay summary line.
    pub fn payload_len(&self) -> usize {
        self.data.len()
    }

    /// Verify `chksum` against the serialized payload.
    ///
    /// Sources call this; the relay itself does not re-validate.
    pub fn checksum_ok(&self) -> bool {
        payload_checksum(&self.data) == self.chksum
    }
}

/// Checksum of a payload mapping: byte sum of its JSON serialization,
/// mod 256. Key order is stable because `serde_json::Map` is ordered.
pub fn payload_checksum(data: &Map<String, Value>) -> u32 {
    let serialized = serde_json::to_string(data).unwrap_or_default();
    serialized.bytes().map(u32::from).sum::<u32>() % CHECKSUM_MOD
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(x: i64) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("x".to_string(), json!(x));
        data
    }

    #[test]
    fn test_stamp_sets_all_fields() {
        let data = payload(1);
        let mut sample = Sample::new(payload_checksum(&data), data);
        assert!(!sample.is_stamped());

        sample.stamp("dev42", Utc::now());

        assert!(sample.is_stamped());
        assert!(sample.id.is_some());
        assert_eq!(sample.uid.as_deref(), Some("dev42"));
        assert!(!sample.time.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_time_stamp_second_precision() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T12:34:56.789Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut sample = Sample::new(0, Map::new());
        sample.stamp("dev", ts);
        assert_eq!(sample.time.as_deref(), Some("2024-03-01 12:34:56"));
    }

    #[test]
    fn test_checksum_round_trip() {
        let data = payload(7);
        let sample = Sample::new(payload_checksum(&data), data);
        assert!(sample.checksum_ok());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let data = payload(7);
        let good = payload_checksum(&data);
        let sample = Sample::new((good + 1) % 256, data);
        assert!(!sample.checksum_ok());
    }

    #[test]
    fn test_checksum_is_bounded() {
        let mut data = Map::new();
        for i in 0..50 {
            data.insert(format!("field_{}", i), json!(i * 1000));
        }
        assert!(payload_checksum(&data) < 256);
    }

    #[test]
    fn test_serialization_includes_stamps() {
        let data = payload(1);
        let mut sample = Sample::new(payload_checksum(&data), data);
        sample.stamp("dev42", Utc::now());

        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains(r#""uid":"dev42""#));
        assert!(json.contains(r#""time":""#));
        assert!(json.contains(r#""chksum":"#));
        assert!(json.contains(r#""data":{"x":1}"#));
    }

    #[test]
    fn test_unstamped_fields_omitted_from_wire() {
        let sample = Sample::new(0, payload(1));
        let json = serde_json::to_string(&sample).unwrap();
        assert!(!json.contains("time"));
        assert!(!json.contains("uid"));
        assert!(!json.contains("id"));
    }

    #[test]
    fn test_deserialization_from_instrument_line() {
        let line = r#"{"chksum":42,"data":{"ph":6.1,"ec":1.8}}"#;
        let sample: Sample = serde_json::from_str(line).unwrap();
        assert_eq!(sample.chksum, 42);
        assert_eq!(sample.payload_len(), 2);
        assert!(!sample.is_stamped());
    }
}
