//! Wire format.
//!
//! A frame is a 4-byte big-endian length followed by one JSON document:
//!
//! ```text
//! request:  { "id": 7, "method": "/rbac.RBACService/Login", "metadata": {...}, "body": {...} }
//! response: { "id": 7, "code": "OK", "message": "", "body": {...} }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::codec::LengthDelimitedCodec;

use rbac_core::RbacError;

pub const MAX_FRAME_LEN: usize = 1024 * 1024;

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Call metadata. Keys compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn with_bearer(token: &str) -> Self {
        let mut metadata = Self::new();
        metadata.insert("authorization", format!("Bearer {token}"));
        metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub body: Value,
}

/// Status codes, named after their gRPC counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    Ok,
    NotFound,
    AlreadyExists,
    Unauthenticated,
    PermissionDenied,
    FailedPrecondition,
    InvalidArgument,
    DeadlineExceeded,
    Unimplemented,
    Internal,
}

impl From<&RbacError> for Code {
    fn from(value: &RbacError) -> Self {
        match value {
            RbacError::NotFound(_) => Code::NotFound,
            RbacError::Conflict(_) => Code::AlreadyExists,
            RbacError::Unauthenticated(_) => Code::Unauthenticated,
            RbacError::PermissionDenied(_) => Code::PermissionDenied,
            RbacError::PreconditionFailed(_) => Code::FailedPrecondition,
            RbacError::Invalid(_) => Code::InvalidArgument,
            RbacError::DeadlineExceeded(_) => Code::DeadlineExceeded,
            RbacError::Store(_) => Code::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub code: Code,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub body: Option<Value>,
}

impl RpcResponse {
    pub fn ok(id: u64, body: Value) -> Self {
        Self {
            id,
            code: Code::Ok,
            message: String::new(),
            body: Some(body),
        }
    }

    pub fn error(id: u64, code: Code, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
            body: None,
        }
    }

    pub fn from_error(id: u64, err: &RbacError) -> Self {
        if let RbacError::Store(detail) = err {
            tracing::error!(%detail, "rpc call failed in the store");
        }
        Self::error(id, Code::from(err), err.public_message())
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{code:?}: {message}")]
    Status { code: Code, message: String },

    #[error("connection closed")]
    Closed,
}

impl RpcError {
    pub fn code(&self) -> Option<Code> {
        match self {
            RpcError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}
