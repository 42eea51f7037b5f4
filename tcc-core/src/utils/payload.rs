//! Payload normalisation and field extraction.

use serde_json::Value;
use tcc_sdk::objects::CREDENTIAL_FIELD;

use crate::events::Payload;

/// Producers cannot emit `@context` as a schema field name, so credentials
/// arrive with `context` instead.
const WIRE_CONTEXT_FIELD: &str = "context";
const JSON_LD_CONTEXT_FIELD: &str = "@context";

const TRADE_EVENT_ID_FIELD: &str = "trade_event_id";
const SUBJECT_FIELD: &str = "credentialSubject";
const SUBJECT_ID_FIELD: &str = "id";

/// Placeholder for identifiers the payload does not carry.
pub const UNKNOWN: &str = "unknown";
/// Subject identifier reported when verification is disabled.
pub const SUBJECT_NOT_CHECKED: &str = "None";

/// Restore the JSON-LD `@context` member of the embedded credential.
pub fn denormalize(mut payload: Payload) -> Payload {
    if let Some(Value::Object(credential)) = payload.get_mut(CREDENTIAL_FIELD)
        && let Some(context) = credential.remove(WIRE_CONTEXT_FIELD)
    {
        credential.insert(JSON_LD_CONTEXT_FIELD.to_string(), context);
    }
    payload
}

pub fn trade_event_id(payload: &Payload) -> String {
    payload
        .get(TRADE_EVENT_ID_FIELD)
        .and_then(display_scalar)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// The credential subject's DID, or [`SUBJECT_NOT_CHECKED`] when
/// verification is disabled.
pub fn subject_id(payload: &Payload, verification_enabled: bool) -> String {
    if !verification_enabled {
        return SUBJECT_NOT_CHECKED.to_string();
    }
    payload
        .get(CREDENTIAL_FIELD)
        .and_then(|credential| credential.get(SUBJECT_FIELD))
        .and_then(|subject| subject.get(SUBJECT_ID_FIELD))
        .and_then(display_scalar)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn display_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_denormalize_renames_context() {
        let input = payload(json!({
            "trade_event_id": "evt-1",
            "tradeCredential": {
                "context": ["https://www.w3.org/2018/credentials/v1"],
                "type": ["VerifiableCredential"]
            }
        }));

        let output = denormalize(input);
        let credential = &output["tradeCredential"];
        assert_eq!(credential["@context"], json!(["https://www.w3.org/2018/credentials/v1"]));
        assert!(credential.get("context").is_none());
        assert_eq!(credential["type"], json!(["VerifiableCredential"]));
    }

    #[test]
    fn test_denormalize_leaves_other_payloads_alone() {
        let input = payload(json!({"context": "top-level", "tradeCredential": "opaque"}));
        assert_eq!(denormalize(input.clone()), input);
    }

    #[test]
    fn test_trade_event_id() {
        assert_eq!(trade_event_id(&payload(json!({"trade_event_id": "evt-9"}))), "evt-9");
        assert_eq!(trade_event_id(&payload(json!({"trade_event_id": 42}))), "42");
        assert_eq!(trade_event_id(&payload(json!({"trade_event_id": null}))), UNKNOWN);
        assert_eq!(trade_event_id(&payload(json!({}))), UNKNOWN);
    }

    #[test]
    fn test_subject_id() {
        let with_subject = payload(json!({
            "tradeCredential": {"credentialSubject": {"id": "did:key:z6MkTrader"}}
        }));
        assert_eq!(subject_id(&with_subject, true), "did:key:z6MkTrader");
        assert_eq!(subject_id(&with_subject, false), SUBJECT_NOT_CHECKED);
        assert_eq!(subject_id(&payload(json!({"tradeCredential": {}})), true), UNKNOWN);
    }
}
