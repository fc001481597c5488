//! Wire format of the plugin channel.
//!
//! Frames are single-line JSON documents terminated by `\n`. The plugin
//! writes one [`Hello`] frame first; after that the host writes
//! [`Request`] frames to the plugin's stdin and the plugin answers with
//! [`Response`] frames on stdout, correlated by `id` and possibly out of
//! order.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::core::options::Options;
use crate::core::types::{b64, b64_opt, BlobInfo, WrapperConfig, WrapperType};
use crate::error::{Error, ErrorKind, Result};

/// First frame written by the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u32,
    pub wrapper_type: WrapperType,
}

/// One wrapper contract call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum Call {
    SetConfig,
    Type,
    KeyId,
    Encrypt {
        #[serde(with = "b64_opt", default)]
        plaintext: Option<Vec<u8>>,
    },
    Decrypt {
        #[serde(default)]
        blob: Option<BlobInfo>,
    },
}

impl Call {
    pub fn method(&self) -> &'static str {
        match self {
            Self::SetConfig => "set_config",
            Self::Type => "type",
            Self::KeyId => "key_id",
            Self::Encrypt { .. } => "encrypt",
            Self::Decrypt { .. } => "decrypt",
        }
    }
}

/// Host → plugin frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub call: Call,
    #[serde(default)]
    pub options: Options,
    /// Deadline for the call, replacing a cancellation context.
    pub timeout_ms: u64,
}

/// Successful call results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reply {
    Config(WrapperConfig),
    Type(WrapperType),
    KeyId(String),
    Blob(BlobInfo),
    Plaintext(#[serde(with = "b64")] Vec<u8>),
}

/// Error as carried across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Reply),
    Err(WireError),
}

impl Outcome {
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Self::Ok(reply) => Ok(reply),
            Self::Err(e) => Err(Error::from_remote(e.kind, e.message)),
        }
    }
}

impl From<Result<Reply>> for Outcome {
    fn from(result: Result<Reply>) -> Self {
        match result {
            Ok(reply) => Self::Ok(reply),
            Err(e) => Self::Err(WireError::from(&e)),
        }
    }
}

/// Plugin → host frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub outcome: Outcome,
}

/// Just the id of a frame that failed to parse in full.
#[derive(Debug, Deserialize)]
pub(crate) struct FrameId {
    pub id: u64,
}

/// Write one frame and flush.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, frame: &T) -> io::Result<()> {
    let mut line = serde_json::to_vec(frame).map_err(io::Error::from)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}
