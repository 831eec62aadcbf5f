//! Response envelope
//!
//! Every body the API returns has the same shape:
//!
//! ```text
//! {"type":"success","data":[ ...records... ]}
//! {"type":"error","message":"..."}
//! ```

use serde::{Deserialize, Serialize};

use crate::store::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Record>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    pub fn success(records: Vec<Record>) -> Self {
        Self {
            kind: EnvelopeKind::Success,
            data: Some(records),
            message: None,
        }
    }

    /// An error envelope; an empty message is replaced so it is never blank
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: EnvelopeKind::Error,
            data: None,
            message: Some(if message.trim().is_empty() {
                "unknown error".to_string()
            } else {
                message
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == EnvelopeKind::Success
    }

    /// JSON bytes; falls back to a fixed error body if encoding fails
    pub fn render(&self) -> Vec<u8> {
        match serde_json::to_vec(self) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to encode response envelope: {}", e);
                br#"{"type":"error","message":"failed to encode response"}"#.to_vec()
            }
        }
    }
}
