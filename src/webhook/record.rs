//! Mutation records and URL helpers shared by both notifiers
//!
//! A `MutationRecord` is one entry of a batched webhook payload:
//!
//! ```text
//! [
//!   {"method": "POST",   "path": "/a.txt",   "content": "hello"},
//!   {"method": "POST",   "path": "/b.bin",   "content": "AAH/", "encoding": "base64"},
//!   {"method": "DELETE", "path": "/old.txt"}
//! ]
//! ```

use crate::store::Contents;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Bytes attributed to the JSON envelope of one record
/// (`{"method":"DELETE","path":"","content":"","encoding":"base64"},`)
pub const RECORD_OVERHEAD_BYTES: usize = 64;

/// Build the per-path webhook URL.
///
/// The path is appended verbatim: a trailing separator on `base_url` and a
/// leading one on `path` produce `//`, and an empty path yields `base_url`.
pub fn join_url(base_url: &str, path: &str) -> String {
    let mut url = String::with_capacity(base_url.len() + path.len());
    url.push_str(base_url);
    url.push_str(path);
    url
}

/// Operation carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordMethod {
    /// Create or update
    #[serde(rename = "POST")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
}

/// Representation of `content` when it is not plain text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentEncoding {
    #[serde(rename = "base64")]
    Base64,
}

/// One coalesced store mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub method: RecordMethod,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<ContentEncoding>,
}

impl MutationRecord {
    /// Record a write. Binary content is base64-encoded.
    pub fn put(path: &str, contents: &Contents) -> Self {
        let (content, encoding) = match contents {
            Contents::Text(text) => (text.clone(), None),
            Contents::Bytes(bytes) => (BASE64.encode(bytes), Some(ContentEncoding::Base64)),
        };
        MutationRecord {
            method: RecordMethod::Put,
            path: path.to_string(),
            content: Some(content),
            encoding,
        }
    }

    pub fn delete(path: &str) -> Self {
        MutationRecord {
            method: RecordMethod::Delete,
            path: path.to_string(),
            content: None,
            encoding: None,
        }
    }

    /// Recover the original contents of a put record.
    ///
    /// Returns `None` for deletes and for base64 payloads that fail to decode.
    pub fn decoded_content(&self) -> Option<Contents> {
        let content = self.content.as_ref()?;
        match self.encoding {
            None => Some(Contents::Text(content.clone())),
            Some(ContentEncoding::Base64) => BASE64.decode(content).ok().map(Contents::Bytes),
        }
    }

    /// Estimated serialized size in bytes
    pub fn estimated_size(&self) -> usize {
        RECORD_OVERHEAD_BYTES
            + self.path.len()
            + self.content.as_ref().map(String::len).unwrap_or(0)
    }
}
