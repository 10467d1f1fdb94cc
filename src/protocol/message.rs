//! JSON-RPC 2.0 envelopes and their parsing rules.
//!
//! Parsing goes through an untyped [`serde_json::Map`] rather than derived
//! deserialization so that a structurally broken envelope still yields the
//! request id when one is recoverable. The error response then correlates
//! with the request the client sent.

use std::fmt::{Display, Formatter};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::error::RpcError;
use crate::Result;

/// Protocol version tag every envelope must carry.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A call expecting a response.
///
/// `id` is `None` only when the client sent an explicit `"id": null`; the
/// request is still answered, with `"id": null` on the response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Protocol version tag.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: Option<RequestId>,
    /// Method name.
    pub method: String,
    /// Positional or named parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A one-way message; never answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Protocol version tag.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Positional or named parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outcome carried by a [`Response`]; exactly one of the two.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// `result` member.
    Result(Value),
    /// `error` member.
    Error(RpcError),
}

/// Reply to a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Protocol version tag.
    pub jsonrpc: String,
    /// Id of the request being answered; `None` serializes as `null`.
    pub id: Option<RequestId>,
    /// Result or error.
    pub payload: ResponsePayload,
}

/// Any inbound or outbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// See [`Request`].
    Request(Request),
    /// See [`Notification`].
    Notification(Notification),
    /// See [`Response`].
    Response(Response),
}

/// Parse or validation failure, paired with whatever id could be recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageError {
    /// Request id, when the envelope carried a usable one.
    pub id: Option<RequestId>,
    /// Error to return to the client.
    pub error: RpcError,
}

impl MessageError {
    fn new(id: Option<RequestId>, error: RpcError) -> Self {
        Self { id, error }
    }

    /// Error response addressed to the recovered id.
    #[must_use]
    pub fn into_response(self) -> Response {
        Response::error(self.id, self.error)
    }
}

impl Display for MessageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} (id {id})", self.error),
            None => write!(f, "{} (id null)", self.error),
        }
    }
}

impl std::error::Error for MessageError {}

// ── Construction ──────────────────────────────────────────────────────────────

impl Request {
    /// Build a `2.0` request.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Check the envelope rules shared with [`Notification::validate`].
    ///
    /// # Errors
    ///
    /// Returns an `InvalidRequest` error addressed to this request's id.
    pub fn validate(&self) -> std::result::Result<(), MessageError> {
        validate_envelope(&self.jsonrpc, &self.method, self.params.as_ref())
            .map_err(|err| MessageError::new(self.id.clone(), err))
    }
}

impl Notification {
    /// Build a `2.0` notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }

    /// Check `jsonrpc`, `method` and `params` shape.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidRequest` error with a null id.
    pub fn validate(&self) -> std::result::Result<(), MessageError> {
        validate_envelope(&self.jsonrpc, &self.method, self.params.as_ref())
            .map_err(|err| MessageError::new(None, err))
    }
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    /// Error response.
    #[must_use]
    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Successful response unless `outcome` is an error.
    #[must_use]
    pub fn from_outcome(
        id: Option<RequestId>,
        outcome: std::result::Result<Value, RpcError>,
    ) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result),
            Err(error) => Self::error(id, error),
        }
    }

    /// The `result` member, if this is a success.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Result(value) => Some(value),
            ResponsePayload::Error(_) => None,
        }
    }

    /// The `error` member, if this is a failure.
    #[must_use]
    pub fn error_value(&self) -> Option<&RpcError> {
        match &self.payload {
            ResponsePayload::Result(_) => None,
            ResponsePayload::Error(err) => Some(err),
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("jsonrpc", &self.jsonrpc)?;
        map.serialize_entry("id", &self.id)?;
        match &self.payload {
            ResponsePayload::Result(value) => map.serialize_entry("result", value)?,
            ResponsePayload::Error(err) => map.serialize_entry("error", err)?,
        }
        map.end()
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

impl Message {
    /// Parse one frame into an envelope.
    ///
    /// The presence of an `id` key makes the frame a [`Request`]; an object
    /// with `result` or `error` and no `method` is a [`Response`]; anything
    /// else with a `method` is a [`Notification`]. Envelope rules are not
    /// checked here; see [`Request::validate`].
    ///
    /// # Errors
    ///
    /// `ParseError` with a null id when the frame is not a JSON object;
    /// `InvalidRequest` with the recovered id when a member has the wrong
    /// type.
    pub fn parse(frame: &str) -> std::result::Result<Self, MessageError> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|err| MessageError::new(None, RpcError::parse_error(err)))?;
        let Value::Object(mut obj) = value else {
            return Err(MessageError::new(
                None,
                RpcError::parse_error("expected a JSON object"),
            ));
        };

        let id = match obj.remove("id") {
            None => None,
            Some(raw) => Some(parse_id(raw)?),
        };
        let jsonrpc = match obj.remove("jsonrpc") {
            None => String::new(),
            Some(Value::String(v)) => v,
            Some(_) => {
                return Err(MessageError::new(
                    id.flatten(),
                    RpcError::invalid_request("jsonrpc must be a string"),
                ))
            }
        };

        let method = match obj.remove("method") {
            Some(Value::String(method)) => method,
            Some(_) => {
                return Err(MessageError::new(
                    id.flatten(),
                    RpcError::invalid_request("method must be a string"),
                ))
            }
            None => return parse_response(jsonrpc, id.flatten(), &mut obj),
        };
        let params = obj.remove("params");

        Ok(match id {
            Some(id) => Self::Request(Request {
                jsonrpc,
                id,
                method,
                params,
            }),
            None => Self::Notification(Notification {
                jsonrpc,
                method,
                params,
            }),
        })
    }

    /// Serialize as a single-line JSON string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

/// `Some(None)` for an explicit null id.
fn parse_id(raw: Value) -> std::result::Result<Option<RequestId>, MessageError> {
    match raw {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(RequestId::String(s))),
        Value::Number(n) => n.as_i64().map(|n| Some(RequestId::Number(n))).ok_or_else(|| {
            MessageError::new(None, RpcError::invalid_request("id must be an integer"))
        }),
        _ => Err(MessageError::new(
            None,
            RpcError::invalid_request("id must be a string or integer"),
        )),
    }
}

fn parse_response(
    jsonrpc: String,
    id: Option<RequestId>,
    obj: &mut Map<String, Value>,
) -> std::result::Result<Message, MessageError> {
    let payload = match (obj.remove("result"), obj.remove("error")) {
        (Some(result), None) => ResponsePayload::Result(result),
        (None, Some(error)) => {
            let error: RpcError = serde_json::from_value(error).map_err(|err| {
                MessageError::new(id.clone(), RpcError::invalid_request(err))
            })?;
            ResponsePayload::Error(error)
        }
        (Some(_), Some(_)) => {
            return Err(MessageError::new(
                id,
                RpcError::invalid_request("response carries both result and error"),
            ))
        }
        (None, None) => {
            return Err(MessageError::new(
                id,
                RpcError::invalid_request("missing method"),
            ))
        }
    };
    Ok(Message::Response(Response {
        jsonrpc,
        id,
        payload,
    }))
}

fn validate_envelope(
    jsonrpc: &str,
    method: &str,
    params: Option<&Value>,
) -> std::result::Result<(), RpcError> {
    if jsonrpc != JSONRPC_VERSION {
        return Err(RpcError::invalid_request(format!(
            "jsonrpc must be \"{JSONRPC_VERSION}\""
        )));
    }
    if method.is_empty() {
        return Err(RpcError::invalid_request("method must not be empty"));
    }
    match params {
        None | Some(Value::Object(_) | Value::Array(_)) => Ok(()),
        Some(_) => Err(RpcError::invalid_request(
            "params must be an object or an array",
        )),
    }
}
