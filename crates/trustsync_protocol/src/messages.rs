//! Request and response messages.

use crate::codes::RespCode;
use crate::error::{ProtocolError, ProtocolResult};
use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Encodes a message to CBOR.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(message, &mut bytes)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a message from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// A command sent by the client after identification.
///
/// Encoded as a CBOR map whose `type` entry selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    /// Start the password-bootstrapped key registration.
    Register,
    /// Upload `total` chunks to the path built from `dest` segments.
    Upload {
        /// Destination path segments, relative to the served directory.
        dest: Vec<String>,
        /// Number of chunk frames that follow.
        total: u64,
    },
    /// List a directory.
    Fstree {
        /// Directory path segments; `None` lists the served directory.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<Vec<String>>,
    },
    /// Download a file.
    Fetch {
        /// File path relative to the served directory.
        path: String,
    },
    /// Any `type` this version does not know.
    #[serde(other)]
    Unknown,
}

impl Request {
    /// Returns the wire name of this request type.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Register => "register",
            Request::Upload { .. } => "upload",
            Request::Fstree { .. } => "fstree",
            Request::Fetch { .. } => "fetch",
            Request::Unknown => "unknown",
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// A server response: a status code plus an optional description.
///
/// The description carries the registration salt, the fetch chunk count,
/// an encoded [`FsListing`], or a human-readable error detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Status code.
    pub code: RespCode,
    /// Optional payload.
    #[serde(default)]
    pub desc: Option<Value>,
}

impl Response {
    /// Creates a response without description.
    pub fn new(code: RespCode) -> Self {
        Self { code, desc: None }
    }

    /// Creates an `Ok` response.
    pub fn ok() -> Self {
        Self::new(RespCode::Ok)
    }

    /// Creates an `OkButUnauthorized` response.
    pub fn ok_but_unauthorized() -> Self {
        Self::new(RespCode::OkButUnauthorized)
    }

    /// Creates a response carrying raw bytes.
    pub fn with_bytes(code: RespCode, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            desc: Some(Value::Bytes(bytes.into())),
        }
    }

    /// Creates a response carrying text.
    pub fn with_text(code: RespCode, text: impl Into<String>) -> Self {
        Self {
            code,
            desc: Some(Value::Text(text.into())),
        }
    }

    /// Creates a `Failed` response with a detail message.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::with_text(RespCode::Failed, detail)
    }

    /// Returns true if the code is a success code.
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns the description as bytes, if it is a byte string.
    pub fn desc_bytes(&self) -> Option<&[u8]> {
        match &self.desc {
            Some(Value::Bytes(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the description as text, if it is a text string.
    pub fn desc_text(&self) -> Option<&str> {
        match &self.desc {
            Some(Value::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Returns a printable form of the description, if any.
    pub fn detail(&self) -> Option<String> {
        match &self.desc {
            Some(Value::Text(text)) => Some(text.clone()),
            Some(Value::Bytes(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Some(Value::Null) | None => None,
            Some(other) => Some(format!("{other:?}")),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Directory listing returned by `fstree`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsListing {
    /// Names of regular files.
    pub files: Vec<String>,
    /// Names of sub-directories.
    pub dirs: Vec<String>,
    /// Whether the listed directory is the served directory itself.
    pub base: bool,
}
