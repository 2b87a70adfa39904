//! Wire envelopes exchanged over `postMessage`.
//!
//! Every payload is an object `{ type, action, data, idRequest? }`. Inbound data is decoded
//! once, here, into closed enums ([`ParentEnvelope`], [`IframeMessage`]) so the transport and
//! the router can match exhaustively instead of comparing action strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::bridge::constants::*;
use crate::bridge::error::{internal_error, protocol_error, BridgeResult};

/// `data` of a `serverRequest`: the Apps Script function and its JSON-encoded argument list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRequest {
    #[serde(rename = "functionName")]
    pub function_name: String,
    /// A JSON array serialized to a string, e.g. `["hello ","world"]`.
    pub arguments: String,
}

impl ServerRequest {
    pub fn new(function_name: impl Into<String>, args: &[Value]) -> BridgeResult<Self> {
        let arguments = serde_json::to_string(args)
            .map_err(|err| internal_error(format!("failed to serialize arguments: {err}")))?;
        Ok(Self {
            function_name: function_name.into(),
            arguments,
        })
    }

    /// `{ functionName, arguments }`, the object handed to the server dispatcher.
    pub fn to_value(&self) -> Value {
        json!({ "functionName": self.function_name, "arguments": self.arguments })
    }

    /// Decodes `arguments` back into a list; a non-array payload is a protocol error.
    pub fn decode_arguments(&self) -> BridgeResult<Vec<Value>> {
        serde_json::from_str::<Vec<Value>>(&self.arguments)
            .map_err(|err| protocol_error(format!("arguments are not a JSON array: {err}")))
    }
}

/// `data` of a `serverResponse`.
///
/// A `result` key that holds `null` is still a result; only the absence of both keys is the
/// "missing result" violation.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponsePayload {
    Result(Value),
    Error(String),
    Missing,
}

impl ResponsePayload {
    pub fn from_value(data: &Value) -> Self {
        let Some(object) = data.as_object() else {
            return ResponsePayload::Missing;
        };
        if let Some(message) = object.get("error").and_then(error_message) {
            return ResponsePayload::Error(message);
        }
        match object.get("result") {
            Some(result) => ResponsePayload::Result(result.clone()),
            None => ResponsePayload::Missing,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ResponsePayload::Result(result) => json!({ "result": result }),
            ResponsePayload::Error(message) => json!({ "error": message }),
            ResponsePayload::Missing => Value::Object(Map::new()),
        }
    }
}

/// Returns the message of a truthy `error` field.
pub(crate) fn error_message(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Object(object) => Some(
            object
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| value.to_string()),
        ),
        other => Some(other.to_string()),
    }
}

/// Messages the parent page sends into the iframe.
#[derive(Clone, Debug, PartialEq)]
pub enum ParentEnvelope {
    ServerRequest {
        id_request: String,
        request: ServerRequest,
    },
    /// Sent back to the frame that announced `siteInited`, targeted at its origin.
    ValidateDomain,
}

impl ParentEnvelope {
    pub fn to_value(&self) -> Value {
        match self {
            ParentEnvelope::ServerRequest {
                id_request,
                request,
            } => json!({
                "type": TYPE_FROM_PARENT,
                "action": ACTION_SERVER_REQUEST,
                "data": request.to_value(),
                "idRequest": id_request,
            }),
            ParentEnvelope::ValidateDomain => json!({ "type": TYPE_VALIDATE_DOMAIN }),
        }
    }

    /// Decodes a parent envelope. Anything that is not a well-formed `FROM_PARENT`
    /// `serverRequest` (or `validateDomain`) is rejected.
    pub fn decode(data: &Value) -> BridgeResult<Self> {
        let object = data
            .as_object()
            .ok_or_else(|| protocol_error("message data is not an object"))?;
        match object.get("type").and_then(Value::as_str) {
            Some(TYPE_VALIDATE_DOMAIN) => return Ok(ParentEnvelope::ValidateDomain),
            Some(TYPE_FROM_PARENT) => {}
            _ => return Err(protocol_error("message is not addressed from the parent")),
        }
        if object.get("action").and_then(Value::as_str) != Some(ACTION_SERVER_REQUEST) {
            return Err(protocol_error("unsupported parent action"));
        }
        let id_request = id_request(object)
            .ok_or_else(|| protocol_error("serverRequest is missing idRequest"))?;
        let request = object
            .get("data")
            .cloned()
            .map(serde_json::from_value::<ServerRequest>)
            .transpose()
            .map_err(|err| protocol_error(format!("malformed serverRequest data: {err}")))?
            .ok_or_else(|| protocol_error("serverRequest is missing data"))?;
        Ok(ParentEnvelope::ServerRequest {
            id_request,
            request,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleChange {
    pub title: String,
    /// Replace only the text after the first `" - "` of the current title.
    #[serde(rename = "afterDash", default, skip_serializing_if = "std::ops::Not::not")]
    pub after_dash: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UrlParamChange {
    /// `null` values delete the parameter.
    #[serde(rename = "urlParams", default)]
    pub url_params: BTreeMap<String, Value>,
    /// Reload the page at the new URL instead of rewriting history.
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenUrlRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathname: Option<String>,
    /// Empty or `null` values delete the parameter.
    #[serde(default)]
    pub props: BTreeMap<String, Value>,
    #[serde(rename = "replacePage", default)]
    pub replace_page: bool,
}

/// Messages the iframe posts to the top window.
#[derive(Clone, Debug, PartialEq)]
pub enum IframeMessage {
    SiteInited(Option<Value>),
    SiteFullyLoaded,
    ServerResponse {
        id_request: String,
        payload: ResponsePayload,
    },
    TitleChange(TitleChange),
    /// `None` when `data.logs` is missing or not an array.
    Logs(Option<Vec<Value>>),
    AnalyticsEvent {
        name: String,
    },
    UrlParamChange(UrlParamChange),
    OpenUrlWithProps(OpenUrlRequest),
    ToggleFullscreen,
    Unknown {
        action: String,
    },
}

impl IframeMessage {
    pub fn action(&self) -> &str {
        match self {
            IframeMessage::SiteInited(_) => ACTION_SITE_INITED,
            IframeMessage::SiteFullyLoaded => ACTION_SITE_FULLY_LOADED,
            IframeMessage::ServerResponse { .. } => ACTION_SERVER_RESPONSE,
            IframeMessage::TitleChange(_) => ACTION_TITLE_CHANGE,
            IframeMessage::Logs(_) => ACTION_LOGS,
            IframeMessage::AnalyticsEvent { .. } => ACTION_ANALYTICS_EVENT,
            IframeMessage::UrlParamChange(_) => ACTION_URL_PARAM_CHANGE,
            IframeMessage::OpenUrlWithProps(_) => ACTION_OPEN_URL_WITH_PROPS,
            IframeMessage::ToggleFullscreen => ACTION_TOGGLE_FULLSCREEN,
            IframeMessage::Unknown { action } => action,
        }
    }

    pub fn to_value(&self) -> Value {
        let data = match self {
            IframeMessage::SiteInited(data) => data.clone().unwrap_or(Value::Null),
            IframeMessage::ServerResponse { payload, .. } => payload.to_value(),
            IframeMessage::TitleChange(change) => json!(change),
            IframeMessage::Logs(logs) => json!({ "logs": logs }),
            IframeMessage::AnalyticsEvent { name } => json!({ "name": name }),
            IframeMessage::UrlParamChange(change) => json!(change),
            IframeMessage::OpenUrlWithProps(request) => json!(request),
            IframeMessage::SiteFullyLoaded
            | IframeMessage::ToggleFullscreen
            | IframeMessage::Unknown { .. } => Value::Null,
        };
        let mut envelope = json!({
            "type": TYPE_FROM_IFRAME,
            "action": self.action(),
            "data": data,
        });
        if let IframeMessage::ServerResponse { id_request, .. } = self {
            envelope["idRequest"] = Value::String(id_request.clone());
        }
        envelope
    }

    /// Decodes a `FROM_IFRAME` envelope. Unknown actions decode to [`IframeMessage::Unknown`].
    pub fn decode(data: &Value) -> BridgeResult<Self> {
        let object = data
            .as_object()
            .ok_or_else(|| protocol_error("message data is not an object"))?;
        if object.get("type").and_then(Value::as_str) != Some(TYPE_FROM_IFRAME) {
            return Err(protocol_error("message is not addressed from the iframe"));
        }
        let action = object
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| protocol_error("message is missing an action"))?;
        let payload = object.get("data").cloned().unwrap_or(Value::Null);

        let message = match action {
            ACTION_SITE_INITED => {
                IframeMessage::SiteInited(Some(payload).filter(|value| !value.is_null()))
            }
            ACTION_SITE_FULLY_LOADED => IframeMessage::SiteFullyLoaded,
            ACTION_SERVER_RESPONSE => IframeMessage::ServerResponse {
                id_request: id_request(object)
                    .ok_or_else(|| protocol_error("serverResponse is missing idRequest"))?,
                payload: ResponsePayload::from_value(&payload),
            },
            ACTION_TITLE_CHANGE => IframeMessage::TitleChange(decode_data(action, payload)?),
            ACTION_LOGS => IframeMessage::Logs(
                payload
                    .get("logs")
                    .and_then(Value::as_array)
                    .map(|logs| logs.to_vec()),
            ),
            ACTION_ANALYTICS_EVENT => IframeMessage::AnalyticsEvent {
                name: payload
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| protocol_error("analyticsEvent is missing a name"))?
                    .to_owned(),
            },
            ACTION_URL_PARAM_CHANGE => {
                IframeMessage::UrlParamChange(decode_data(action, payload)?)
            }
            ACTION_OPEN_URL_WITH_PROPS => {
                IframeMessage::OpenUrlWithProps(decode_data(action, payload)?)
            }
            ACTION_TOGGLE_FULLSCREEN => IframeMessage::ToggleFullscreen,
            other => IframeMessage::Unknown {
                action: other.to_owned(),
            },
        };
        Ok(message)
    }
}

fn id_request(object: &Map<String, Value>) -> Option<String> {
    match object.get("idRequest")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn decode_data<T>(action: &str, payload: Value) -> BridgeResult<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(payload)
        .map_err(|err| protocol_error(format!("malformed {action} data: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_carries_json_string_arguments() {
        let request =
            ServerRequest::new("demoServerFunction", &[json!("hello "), json!("world")]).unwrap();
        let envelope = ParentEnvelope::ServerRequest {
            id_request: "abc".into(),
            request,
        }
        .to_value();

        assert_eq!(envelope["type"], "FROM_PARENT");
        assert_eq!(envelope["action"], "serverRequest");
        assert_eq!(envelope["data"]["functionName"], "demoServerFunction");
        assert_eq!(envelope["data"]["arguments"], "[\"hello \",\"world\"]");
        assert_eq!(envelope["idRequest"], "abc");
    }

    #[test]
    fn dispatcher_payload_is_the_whole_request() {
        let request = ServerRequest::new("getLesson", &[json!(7)]).unwrap();
        assert_eq!(
            request.to_value(),
            json!({ "functionName": "getLesson", "arguments": "[7]" })
        );
        assert_eq!(DEFAULT_SERVER_DISPATCHER, "processServerRequest");
    }

    #[test]
    fn response_payload_distinguishes_null_result_from_missing() {
        assert_eq!(
            ResponsePayload::from_value(&json!({ "result": null })),
            ResponsePayload::Result(Value::Null)
        );
        assert_eq!(
            ResponsePayload::from_value(&json!({})),
            ResponsePayload::Missing
        );
        assert_eq!(
            ResponsePayload::from_value(&json!({ "error": "boom", "result": 1 })),
            ResponsePayload::Error("boom".into())
        );
        assert_eq!(
            ResponsePayload::from_value(&json!({ "error": null, "result": 1 })),
            ResponsePayload::Result(json!(1))
        );
    }

    #[test]
    fn decodes_known_iframe_actions() {
        let title = IframeMessage::decode(&json!({
            "type": "FROM_IFRAME",
            "action": "titleChange",
            "data": { "title": "Lesson", "afterDash": true }
        }))
        .unwrap();
        assert_eq!(
            title,
            IframeMessage::TitleChange(TitleChange {
                title: "Lesson".into(),
                after_dash: true
            })
        );

        let response = IframeMessage::decode(&json!({
            "type": "FROM_IFRAME",
            "action": "serverResponse",
            "idRequest": "id-1",
            "data": { "result": 42 }
        }))
        .unwrap();
        assert_eq!(
            response,
            IframeMessage::ServerResponse {
                id_request: "id-1".into(),
                payload: ResponsePayload::Result(json!(42)),
            }
        );

        let logs = IframeMessage::decode(&json!({
            "type": "FROM_IFRAME",
            "action": "logs",
            "data": { "logs": "not-a-list" }
        }))
        .unwrap();
        assert_eq!(logs, IframeMessage::Logs(None));
    }

    #[test]
    fn unknown_action_is_not_an_error() {
        let message = IframeMessage::decode(&json!({
            "type": "FROM_IFRAME",
            "action": "somethingNew",
            "data": { "x": 1 }
        }))
        .unwrap();
        assert_eq!(
            message,
            IframeMessage::Unknown {
                action: "somethingNew".into()
            }
        );
    }

    #[test]
    fn rejects_wrong_type_and_missing_markers() {
        assert!(IframeMessage::decode(&json!({ "type": "FROM_PARENT", "action": "logs" })).is_err());
        assert!(IframeMessage::decode(&json!({ "type": "FROM_IFRAME" })).is_err());
        assert!(IframeMessage::decode(&json!("login-done")).is_err());
        assert!(ParentEnvelope::decode(&json!({
            "type": "FROM_PARENT",
            "action": "serverRequest",
            "data": { "functionName": "f", "arguments": "[]" }
        }))
        .is_err());
    }

    #[test]
    fn iframe_message_round_trips_through_wire_shape() {
        let message = IframeMessage::OpenUrlWithProps(OpenUrlRequest {
            pathname: Some("/page2".into()),
            props: BTreeMap::from([("lang".to_string(), json!("es"))]),
            replace_page: true,
        });
        let value = message.to_value();
        assert_eq!(value["data"]["replacePage"], true);
        assert_eq!(IframeMessage::decode(&value).unwrap(), message);
    }
}
