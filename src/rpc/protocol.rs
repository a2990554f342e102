// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! JSON-RPC message shapes and Content-Length framing.

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

/// JSON-RPC error code: the requested method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// LSP error code: the request was cancelled by the client.
pub const REQUEST_CANCELLED: i64 = -32800;

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// An outbound or inbound request, correlated by [`RequestId`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// Protocol version marker, always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id echoed back in the response.
    pub id: RequestId,
    /// LSP method name.
    pub method: String,
    /// Method parameters; `null` when absent on the wire.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// A response carrying either a result or an error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Protocol version marker, always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id of the request being answered.
    pub id: Option<RequestId>,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error payload, mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A notification: a method call with no correlation id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// Protocol version marker, always `"2.0"`.
    pub jsonrpc: String,
    /// LSP method name.
    pub method: String,
    /// Method parameters; `null` when absent on the wire.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// Request correlation id. Servers may echo either form.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id, the form this client generates.
    Number(i64),
    /// String id, accepted from servers that use them.
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// JSON-RPC error object attached to a failed response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// JSON-RPC / LSP error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Encodes a message body with its `Content-Length` header.
pub fn frame_message(body: &str) -> String {
    format!("Content-Length: {}\r\n\r\n{body}", body.len())
}

/// Extracts the next complete framed message from `buffer`, if any.
///
/// Consumed bytes are removed from the buffer. Returns `Ok(None)` when
/// the buffer does not yet hold a full header plus body.
///
/// # Errors
///
/// Returns an error if the header block is not UTF-8, the
/// `Content-Length` value does not parse, or the body is not UTF-8.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>> {
    let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };

    let headers = std::str::from_utf8(&buffer[..header_end])
        .context("message headers are not valid UTF-8")?;

    let mut content_length = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            let value = line
                .split_once(':')
                .map(|(_, v)| v.trim())
                .context("malformed Content-Length header")?;
            content_length = Some(
                value
                    .parse::<usize>()
                    .context("invalid Content-Length value")?,
            );
        }
    }

    let Some(content_length) = content_length else {
        return Ok(None);
    };

    let body_start = header_end + 4;
    if buffer.len() < body_start + content_length {
        return Ok(None);
    }

    buffer.advance(body_start);
    let body = buffer.split_to(content_length);
    let message = String::from_utf8(body.to_vec()).context("message body is not valid UTF-8")?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_message() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let mut buffer = BytesMut::from(frame_message(body).as_str());

        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, Some(body.to_string()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_incomplete_header() {
        let mut buffer = BytesMut::from("Content-Length: 10\r\n");
        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_parse_incomplete_body() {
        let mut buffer = BytesMut::from("Content-Length: 100\r\n\r\n{\"partial\":");
        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_parse_multiple_messages() {
        let body1 = r#"{"jsonrpc":"2.0","id":1}"#;
        let body2 = r#"{"jsonrpc":"2.0","id":2}"#;
        let raw = format!("{}{}", frame_message(body1), frame_message(body2));
        let mut buffer = BytesMut::from(raw.as_str());

        assert_eq!(
            try_parse_message(&mut buffer).unwrap(),
            Some(body1.to_string())
        );
        assert_eq!(
            try_parse_message(&mut buffer).unwrap(),
            Some(body2.to_string())
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_case_insensitive_header() {
        let body = r#"{"test":true}"#;
        let raw = format!("content-length: {}\r\n\r\n{}", body.len(), body);
        let mut buffer = BytesMut::from(raw.as_str());

        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, Some(body.to_string()));
    }

    #[test]
    fn test_request_id_number() {
        let json = r#"{"jsonrpc":"2.0","id":42,"method":"test"}"#;
        let msg: RequestMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, RequestId::Number(42));
    }

    #[test]
    fn test_request_id_string() {
        let json = r#"{"jsonrpc":"2.0","id":"abc-123","method":"test"}"#;
        let msg: RequestMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, RequestId::String("abc-123".to_string()));
    }

    #[test]
    fn test_response_with_result() {
        let json = r#"{"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}}"#;
        let msg: ResponseMessage = serde_json::from_str(json).unwrap();
        assert!(msg.result.is_some());
        assert!(msg.error.is_none());
    }

    #[test]
    fn test_response_with_error() {
        let json =
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#;
        let msg: ResponseMessage = serde_json::from_str(json).unwrap();
        assert!(msg.result.is_none());
        assert_eq!(msg.error.unwrap().code, -32600);
    }

    #[test]
    fn test_response_null_result() {
        let json = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let msg: ResponseMessage = serde_json::from_str(json).unwrap();
        // null deserializes to None for Option<Value>
        assert!(msg.result.is_none());
    }

    #[test]
    fn test_notification_no_id() {
        let json = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        let msg: NotificationMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.method, "initialized");
    }
}
