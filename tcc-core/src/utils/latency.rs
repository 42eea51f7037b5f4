//! End-to-end latency from the producer's origination timestamp.

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::events::Payload;

const ORIGINATION_FIELD: &str = "start_timestamp";

/// Parse the payload's origination timestamp. Expects RFC 3339 with an
/// explicit offset, e.g. `2025-01-01T12:00:00.250Z`.
pub fn origination_time(payload: &Payload) -> Option<OffsetDateTime> {
    match payload.get(ORIGINATION_FIELD) {
        Some(Value::String(raw)) => OffsetDateTime::parse(raw, &Rfc3339).ok(),
        _ => None,
    }
}

/// Seconds between origination and `now`. Negative when the producer's
/// clock runs ahead.
pub fn end_to_end_latency(payload: &Payload, now: OffsetDateTime) -> Option<f64> {
    origination_time(payload).map(|origin| (now - origin).as_seconds_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_latency_from_utc_timestamp() {
        let now = datetime!(2025-03-01 12:00:02.5 UTC);
        let p = payload(json!({"start_timestamp": "2025-03-01T12:00:00Z"}));
        let latency = end_to_end_latency(&p, now).unwrap();
        assert!((latency - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_latency_honours_offset() {
        let now = datetime!(2025-03-01 12:00:01 UTC);
        let p = payload(json!({"start_timestamp": "2025-03-01T14:00:00+02:00"}));
        assert!((end_to_end_latency(&p, now).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_or_malformed_timestamp() {
        let now = OffsetDateTime::now_utc();
        assert!(end_to_end_latency(&payload(json!({})), now).is_none());
        assert!(end_to_end_latency(&payload(json!({"start_timestamp": "yesterday"})), now).is_none());
        assert!(end_to_end_latency(&payload(json!({"start_timestamp": 1700000000})), now).is_none());
    }
}
