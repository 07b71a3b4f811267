//! Relay message types and their text framing

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MeshtasticError, Result};

/// Marks a request
pub const REQUEST_PREFIX: &str = "HTTPREQ:";

/// Marks a whole response
pub const RESPONSE_PREFIX: &str = "HTTPRES:";

/// Marks one response chunk
pub const CHUNK_PREFIX: &str = "HTTPCHK:";

/// Synthetic status for undecodable requests
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Synthetic status for upstream timeouts and failures
pub const STATUS_BAD_GATEWAY: u16 = 502;

/// An HTTP request carried over the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Correlation id, echoed as `req_id`
    pub id: String,
    /// HTTP method
    pub method: String,
    /// Path relative to the backend base URL
    pub path: String,
    /// Request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Body media type
    #[serde(
        rename = "contentType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
}

impl RelayRequest {
    /// Body-less request
    pub fn new(id: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            path: path.into(),
            body: None,
            content_type: None,
        }
    }

    /// Attach a body
    pub fn with_body(mut self, body: impl Into<String>, content_type: Option<String>) -> Self {
        self.body = Some(body.into());
        self.content_type = content_type;
        self
    }

    /// `HTTPREQ:{json}`
    pub fn to_frame(&self) -> Result<String> {
        Ok(format!("{}{}", REQUEST_PREFIX, serde_json::to_string(self)?))
    }

    /// Check the id can be carried in a chunk frame
    pub fn validate(&self) -> Result<()> {
        if !is_chunkable_id(&self.id) {
            return Err(MeshtasticError::RelayProtocol(format!(
                "request id '{}' must be non-empty and free of ':'",
                self.id
            )));
        }
        Ok(())
    }
}

/// Whether `req_id` survives the `HTTPCHK:<req_id>:` framing
pub fn is_chunkable_id(req_id: &str) -> bool {
    !req_id.is_empty() && !req_id.contains(':')
}

/// An HTTP response carried over the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResponse {
    /// Id of the request this answers
    pub req_id: String,
    /// HTTP status
    pub status: u16,
    /// Response body
    pub body: String,
}

impl RelayResponse {
    /// Build a response
    pub fn new(req_id: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            req_id: req_id.into(),
            status,
            body: body.into(),
        }
    }

    /// Synthetic 400
    pub fn bad_request(req_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::new(req_id, STATUS_BAD_REQUEST, format!("bad request: {}", reason))
    }

    /// Synthetic 502
    pub fn bad_gateway(req_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::new(req_id, STATUS_BAD_GATEWAY, format!("upstream failure: {}", reason))
    }

    /// Response JSON without a marker
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// `HTTPRES:{json}`
    pub fn to_frame(&self) -> Result<String> {
        Ok(format!("{}{}", RESPONSE_PREFIX, self.to_json()?))
    }
}

/// One piece of a chunked response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Request id
    pub req_id: String,
    /// Zero-based position
    pub index: u32,
    /// Total chunks
    pub count: u32,
    /// Slice of the response JSON
    pub text: String,
}

impl ChunkFrame {
    /// `HTTPCHK:<req_id>:<index>/<count>:<text>`
    pub fn to_frame(&self) -> String {
        format!(
            "{}{}:{}/{}:{}",
            CHUNK_PREFIX, self.req_id, self.index, self.count, self.text
        )
    }

    fn parse(rest: &str) -> Result<Self> {
        let mut parts = rest.splitn(3, ':');
        let (Some(req_id), Some(position), Some(text)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(MeshtasticError::RelayProtocol(
                "chunk missing fields".into(),
            ));
        };
        let (index, count) = position
            .split_once('/')
            .and_then(|(i, n)| Some((i.parse().ok()?, n.parse().ok()?)))
            .ok_or_else(|| {
                MeshtasticError::RelayProtocol(format!("bad chunk position '{}'", position))
            })?;
        if req_id.is_empty() {
            return Err(MeshtasticError::RelayProtocol("chunk without req_id".into()));
        }
        Ok(Self {
            req_id: req_id.to_string(),
            index,
            count,
            text: text.to_string(),
        })
    }
}

/// A decoded relay text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// `HTTPREQ:`
    Request(RelayRequest),
    /// `HTTPRES:`
    Response(RelayResponse),
    /// `HTTPCHK:`
    Chunk(ChunkFrame),
}

impl RelayFrame {
    /// Whether `text` carries a relay marker at all
    pub fn is_relay_text(text: &str) -> bool {
        [REQUEST_PREFIX, RESPONSE_PREFIX, CHUNK_PREFIX]
            .iter()
            .any(|p| text.starts_with(p))
    }

    /// Decode a text message; `Ok(None)` for ordinary chat
    pub fn parse(text: &str) -> Result<Option<Self>> {
        if let Some(json) = text.strip_prefix(REQUEST_PREFIX) {
            let request = serde_json::from_str(json)
                .map_err(|e| MeshtasticError::RelayProtocol(format!("request: {}", e)))?;
            return Ok(Some(RelayFrame::Request(request)));
        }
        if let Some(json) = text.strip_prefix(RESPONSE_PREFIX) {
            let response = serde_json::from_str(json)
                .map_err(|e| MeshtasticError::RelayProtocol(format!("response: {}", e)))?;
            return Ok(Some(RelayFrame::Response(response)));
        }
        if let Some(rest) = text.strip_prefix(CHUNK_PREFIX) {
            return ChunkFrame::parse(rest).map(|c| Some(RelayFrame::Chunk(c)));
        }
        Ok(None)
    }
}

/// Best-effort id of a request whose JSON did not decode as a request
pub(crate) fn salvage_request_id(text: &str) -> Option<String> {
    let json = text.strip_prefix(REQUEST_PREFIX)?;
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}
