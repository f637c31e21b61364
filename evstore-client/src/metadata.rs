//! Stream metadata stored in `$$<stream>` metastreams.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type of metadata events.
pub const METADATA_EVENT_TYPE: &str = "$metadata";

/// Returns the metastream name for `stream`.
pub fn metastream_of(stream: &str) -> String {
    format!("$${}", stream)
}

/// Access control list of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAcl {
    #[serde(rename = "$r", default, skip_serializing_if = "Option::is_none")]
    pub read_roles: Option<Vec<String>>,
    #[serde(rename = "$w", default, skip_serializing_if = "Option::is_none")]
    pub write_roles: Option<Vec<String>>,
    #[serde(rename = "$d", default, skip_serializing_if = "Option::is_none")]
    pub delete_roles: Option<Vec<String>>,
    #[serde(rename = "$mr", default, skip_serializing_if = "Option::is_none")]
    pub meta_read_roles: Option<Vec<String>>,
    #[serde(rename = "$mw", default, skip_serializing_if = "Option::is_none")]
    pub meta_write_roles: Option<Vec<String>>,
}

/// Retention, caching and access settings of a stream.
///
/// Unknown properties are kept in `custom` so a read-modify-write cycle
/// does not lose them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    #[serde(rename = "$maxCount", default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,
    /// Seconds.
    #[serde(rename = "$maxAge", default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    /// Events before this number are eligible for scavenging.
    #[serde(rename = "$tb", default, skip_serializing_if = "Option::is_none")]
    pub truncate_before: Option<u64>,
    /// Seconds.
    #[serde(rename = "$cacheControl", default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<u64>,
    #[serde(rename = "$acl", default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<StreamAcl>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl StreamMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_count(mut self, count: u64) -> Self {
        self.max_count = Some(count);
        self
    }

    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_truncate_before(mut self, event_number: u64) -> Self {
        self.truncate_before = Some(event_number);
        self
    }

    pub fn with_cache_control(mut self, seconds: u64) -> Self {
        self.cache_control = Some(seconds);
        self
    }

    pub fn with_acl(mut self, acl: StreamAcl) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

/// Metadata of a stream as read from its metastream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadataResult {
    pub stream: String,
    pub is_stream_deleted: bool,
    /// Event number of the metadata event; -1 when none was written.
    pub metastream_version: i64,
    pub metadata: StreamMetadata,
}
