//! Wire format between `docqa` and its embedding daemon.
//!
//! Every message is a 4-byte big-endian length followed by that many bytes of JSON.

use serde::{Deserialize, Serialize};

use crate::services::MetricsSummary;

/// Upper bound on a single message, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Shutdown,
    Status,
    Embed(EmbedRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub texts: Vec<String>,
    pub is_query: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    ShutdownAck,
    Status(StatusResponse),
    Embed(EmbedResponse),
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub pid: u32,
    pub model_id: String,
    pub dimension: usize,
    pub uptime_secs: u64,
    pub idle_secs: u64,
    pub requests_served: u64,
    pub metrics: Option<MetricsSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            message: message.into(),
        })
    }
}

pub fn encode_message(msg: &impl Serialize) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let mut buf = Vec::with_capacity(4 + json.len());
    buf.extend_from_slice(&(json.len() as u32).to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

pub fn decode_length(buf: &[u8; 4]) -> usize {
    u32::from_be_bytes(*buf) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let encoded = encode_message(&Request::Ping).unwrap();
        let len = decode_length(&[encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len, encoded.len() - 4);
        assert_eq!(&encoded[4..], br#"{"type":"ping"}"#);
    }

    #[test]
    fn test_embed_request_wire_shape() {
        let request = Request::Embed(EmbedRequest {
            texts: vec!["what is a lease?".to_string()],
            is_query: true,
        });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "embed");
        assert_eq!(json["is_query"], true);

        let decoded: Request = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_error_response() {
        let json = serde_json::to_string(&Response::error("model not loaded")).unwrap();
        assert_eq!(json, r#"{"type":"error","message":"model not loaded"}"#);
    }
}
