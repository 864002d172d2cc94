//! Wire protocol: the `{id, action, payload}` envelope stays exactly as
//! described on the wire, but decoding is driven through a tagged
//! `RpcRequest`/`RpcResponse` pair instead of a dynamically-typed dispatch
//! table — one decode path per action, checked by the compiler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::types::{BroadcastSnapshot, MatchListQuery, MatchRecord};
use crate::config::{BlacklistConfig, ChangeBlackPayload, Rule};
use crate::error::AppError;
use crate::resource::ResourceSnapshot;

/// Raw shape of every inbound client message, before `action` has been
/// dispatched to a typed request.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// Shape of every message sent back to a client, whether a reply or an
/// unsolicited push.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub action: String,
    pub payload: Value,
}

/// One decoded client request, payload already typed per action.
#[derive(Debug, Clone)]
pub enum RpcRequest {
    Ping,
    GetLinkType,
    GetSummary,
    GetRules,
    SetRules(Vec<Rule>),
    GetMatchList(MatchListQuery),
    GetBlackList,
    ChangeBlack(ChangeBlackPayload),
    GetSystemResourceUsage,
    ChangeBroadcastStatus(bool),
}

impl RpcRequest {
    /// Decodes `envelope.action`/`envelope.payload` into a typed request.
    /// Unknown actions are not an error here — the caller silently ignores
    /// them, per the dispatch contract.
    pub fn decode(envelope: &InboundEnvelope) -> Result<Option<RpcRequest>, AppError> {
        let payload = envelope.payload.clone();
        let request = match envelope.action.as_str() {
            "ping" => RpcRequest::Ping,
            "get_link_type" => RpcRequest::GetLinkType,
            "get_summary" => RpcRequest::GetSummary,
            "get_rules" => RpcRequest::GetRules,
            "set_rules" => RpcRequest::SetRules(decode_payload(payload)?),
            "get_match_list" => RpcRequest::GetMatchList(decode_payload(payload)?),
            "get_black_list" => RpcRequest::GetBlackList,
            "change_black" => RpcRequest::ChangeBlack(decode_payload(payload)?),
            "get_system_resource_usage" => RpcRequest::GetSystemResourceUsage,
            "change_broadcast_status" => RpcRequest::ChangeBroadcastStatus(decode_payload(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(request))
    }
}

fn decode_payload<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, AppError> {
    serde_json::from_value(payload)
        .map_err(|e| AppError::RpcValidation(format!("invalid payload: {e}")))
}

/// One typed reply, not yet wrapped in an envelope.
#[derive(Debug, Clone)]
pub enum RpcResponse {
    Pong,
    LinkType(String),
    Summary(Box<BroadcastSnapshot>),
    Rules(Vec<Rule>),
    RuleCount(usize),
    MatchList(Vec<MatchRecord>),
    BlackList(BlacklistConfig),
    Ack(bool),
    ResourceUsage(ResourceSnapshot),
    BroadcastStatus(bool),
}

impl RpcResponse {
    fn into_payload(self) -> Value {
        match self {
            RpcResponse::Pong => Value::String("pong".into()),
            RpcResponse::LinkType(s) => Value::String(s),
            RpcResponse::Summary(s) => serde_json::to_value(*s).unwrap_or(Value::Null),
            RpcResponse::Rules(r) => serde_json::to_value(r).unwrap_or(Value::Null),
            RpcResponse::RuleCount(n) => Value::from(n),
            RpcResponse::MatchList(m) => serde_json::to_value(m).unwrap_or(Value::Null),
            RpcResponse::BlackList(b) => serde_json::to_value(b).unwrap_or(Value::Null),
            RpcResponse::Ack(b) => Value::Bool(b),
            RpcResponse::ResourceUsage(r) => serde_json::to_value(r).unwrap_or(Value::Null),
            RpcResponse::BroadcastStatus(b) => Value::Bool(b),
        }
    }
}

/// Builds the `action="callback"` envelope for a successful reply.
pub fn callback(id: String, response: RpcResponse) -> OutboundEnvelope {
    OutboundEnvelope {
        id: Some(id),
        action: "callback".into(),
        payload: response.into_payload(),
    }
}

/// Builds the `action="callback-error"` envelope, payload per `AppError`'s
/// own `{kind, message}` serialization.
pub fn callback_error(id: String, err: &AppError) -> OutboundEnvelope {
    OutboundEnvelope {
        id: Some(id),
        action: "callback-error".into(),
        payload: serde_json::to_value(err).unwrap_or(Value::Null),
    }
}

/// Builds a server-initiated `broadcast-summary` push (no `id`).
pub fn broadcast_summary(snapshot: &BroadcastSnapshot) -> OutboundEnvelope {
    OutboundEnvelope {
        id: None,
        action: "broadcast-summary".into(),
        payload: serde_json::to_value(snapshot).unwrap_or(Value::Null),
    }
}

/// Builds a server-initiated `broadcast-black` push (no `id`).
pub fn broadcast_black(data: &str) -> OutboundEnvelope {
    OutboundEnvelope {
        id: None,
        action: "broadcast-black".into(),
        payload: Value::String(data.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::BlacklistKind;

    #[test]
    fn test_decode_ping_ignores_payload() {
        let envelope = InboundEnvelope {
            id: Some("1".into()),
            action: "ping".into(),
            payload: Value::Null,
        };
        assert!(matches!(RpcRequest::decode(&envelope).unwrap(), Some(RpcRequest::Ping)));
    }

    #[test]
    fn test_decode_unknown_action_returns_none() {
        let envelope = InboundEnvelope {
            id: Some("1".into()),
            action: "frobnicate".into(),
            payload: Value::Null,
        };
        assert!(RpcRequest::decode(&envelope).unwrap().is_none());
    }

    #[test]
    fn test_decode_change_black_payload() {
        let envelope = InboundEnvelope {
            id: Some("1".into()),
            action: "change_black".into(),
            payload: serde_json::json!({"inc": true, "type": "ipv4", "data": "1.2.3.4"}),
        };
        match RpcRequest::decode(&envelope).unwrap() {
            Some(RpcRequest::ChangeBlack(payload)) => {
                assert!(payload.inc);
                assert_eq!(payload.kind, BlacklistKind::Ipv4);
                assert_eq!(payload.data, "1.2.3.4");
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_invalid_set_rules_payload_errors() {
        let envelope = InboundEnvelope {
            id: Some("1".into()),
            action: "set_rules".into(),
            payload: Value::String("not a rule list".into()),
        };
        let err = RpcRequest::decode(&envelope).unwrap_err();
        assert_eq!(err.kind(), "RpcValidation");
    }

    #[test]
    fn test_callback_envelope_echoes_id() {
        let envelope = callback("42".into(), RpcResponse::Pong);
        assert_eq!(envelope.id.as_deref(), Some("42"));
        assert_eq!(envelope.action, "callback");
        assert_eq!(envelope.payload, Value::String("pong".into()));
    }

    #[test]
    fn test_broadcast_summary_has_no_id() {
        let envelope = broadcast_summary(&BroadcastSnapshot::default());
        assert!(envelope.id.is_none());
        assert_eq!(envelope.action, "broadcast-summary");
    }
}
