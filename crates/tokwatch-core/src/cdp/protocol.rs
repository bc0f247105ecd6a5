//! Serde types for the consumed DevTools protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Debugging-protocol version we speak, reported in session snapshots.
pub const PROTOCOL_VERSION: &str = "1.3";

/// Outgoing command envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Command<'a> {
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
    pub params: Value,
}

/// Incoming frame: either a command reply (has `id`) or an event
/// (has `method`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incoming {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<CommandError>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub session_id: Option<String>,
}

/// Error object attached to a failed command reply.
#[derive(Debug, Deserialize)]
pub struct CommandError {
    pub code: i64,
    pub message: String,
}

/// `Network.requestWillBeSent` params (the fields we read).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request: RequestInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
}

/// `Network.responseReceived` params (the fields we read).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    pub response: ResponseInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInfo {
    pub url: String,
}

/// `Target.detachedFromTarget` params.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTarget {
    pub session_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
}

/// `Target.getTargets` result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTargets {
    pub target_infos: Vec<TargetInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

/// `Target.attachToTarget` result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTarget {
    pub session_id: String,
}

/// `Network.getResponseBody` result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponseBody {
    pub body: String,
    #[serde(default)]
    pub base64_encoded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_serialization() {
        let cmd = Command {
            id: 7,
            method: "Network.getResponseBody",
            session_id: Some("SESSION"),
            params: serde_json::json!({ "requestId": "1000.2" }),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"sessionId\":\"SESSION\""));
        assert!(json.contains("\"requestId\":\"1000.2\""));
    }

    #[test]
    fn test_command_omits_session_when_absent() {
        let cmd = Command {
            id: 1,
            method: "Target.getTargets",
            session_id: None,
            params: serde_json::json!({}),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(!json.contains("sessionId"));
    }

    #[test]
    fn test_incoming_reply_and_event() {
        let reply: Incoming =
            serde_json::from_str(r#"{"id":3,"result":{"body":"x","base64Encoded":false}}"#)
                .unwrap();
        assert_eq!(reply.id, Some(3));
        assert!(reply.method.is_none());

        let event: Incoming = serde_json::from_str(
            r#"{"method":"Network.responseReceived","sessionId":"S",
                "params":{"requestId":"9.1","response":{"url":"https://x/api"}}}"#,
        )
        .unwrap();
        assert_eq!(event.method.as_deref(), Some("Network.responseReceived"));
        let params: ResponseReceived = serde_json::from_value(event.params.unwrap()).unwrap();
        assert_eq!(params.request_id, "9.1");
        assert_eq!(params.response.url, "https://x/api");
    }

    #[test]
    fn test_get_targets_deserialization() {
        let raw = r#"{"targetInfos":[
            {"targetId":"T1","type":"page","title":"Gemini","url":"https://gemini.google.com/app"},
            {"targetId":"T2","type":"service_worker","url":"https://x/sw.js"}
        ]}"#;
        let targets: GetTargets = serde_json::from_str(raw).unwrap();
        assert_eq!(targets.target_infos.len(), 2);
        assert_eq!(targets.target_infos[0].kind, "page");
        assert_eq!(targets.target_infos[1].title, "");
    }
}
