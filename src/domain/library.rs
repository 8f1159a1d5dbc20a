//! Shared profile library: entries uploaded by devices and their
//! validation.
//!
//! An entry is an opaque JSON document (a profile, recipe or similar)
//! plus descriptive metadata. The document is stored as canonical JSON
//! text together with its SHA-256 digest, which is unique across the
//! library.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::submission::normalize_text;
use crate::error::GatewayError;

const MAX_KIND: usize = 32;
const MAX_TAGS: usize = 10;
const MAX_TAG: usize = 32;
const MAX_APP_VERSION: usize = 50;
const MAX_DATA_BYTES: usize = 64 * 1024;
const MAX_FLAG_REASON: usize = 500;

/// Identifier of a library entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryEntryId(uuid::Uuid);

impl LibraryEntryId {
    /// Creates a new random id (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for LibraryEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LibraryEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LibraryEntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// A stored library entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    /// Server-generated identifier.
    pub id: LibraryEntryId,
    /// Client schema version of `data`.
    pub version: u32,
    /// Entry kind, lower case (e.g. `profile`).
    pub kind: String,
    /// Distinct tags, in submission order.
    pub tags: Vec<String>,
    /// Version of the uploading application.
    pub app_version: String,
    /// Canonical JSON text of the document.
    pub data: String,
    /// Lower-case hex SHA-256 of `data`.
    pub data_hash: String,
    /// Device that uploaded the entry; the only one allowed to delete it.
    pub device_id: String,
    /// Recorded downloads.
    pub downloads: u64,
    /// Times the entry was flagged for moderation.
    pub flag_count: u64,
    /// Upload time.
    pub created_at: DateTime<Utc>,
}

/// Which counter of an entry to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryCounter {
    /// [`LibraryEntry::downloads`].
    Downloads,
    /// [`LibraryEntry::flag_count`].
    Flags,
}

/// Outcome of inserting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryInsert {
    /// The entry was stored.
    Inserted,
    /// An entry with the same `data_hash` already exists.
    Duplicate(LibraryEntryId),
}

/// Entries a listing starts from, before in-memory filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySelector {
    /// Every entry.
    All,
    /// Entries of one kind.
    Kind(String),
    /// Entries uploaded by one device.
    Device(String),
}

/// Listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LibrarySort {
    /// Newest upload first.
    #[default]
    Newest,
    /// Most downloaded first.
    Popular,
}

/// Upload body for a library entry.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LibraryEntryInput {
    /// Client schema version of `data`, at least 1.
    #[serde(default)]
    pub version: Option<i64>,
    /// Entry kind.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Version of the uploading application.
    #[serde(default, alias = "appVersion")]
    pub app_version: Option<String>,
    /// The document itself; must be a JSON object.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Option<serde_json::Value>,
}

/// An upload that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLibraryEntry {
    /// Schema version.
    pub version: u32,
    /// Lower-cased kind.
    pub kind: String,
    /// Normalized, de-duplicated tags.
    pub tags: Vec<String>,
    /// Application version.
    pub app_version: String,
    /// Canonical JSON text of the document.
    pub data: String,
    /// Hex SHA-256 of `data`.
    pub data_hash: String,
}

impl ValidatedLibraryEntry {
    /// Builds the record stored for this upload.
    #[must_use]
    pub fn into_entry(self, device_id: &str, created_at: DateTime<Utc>) -> LibraryEntry {
        LibraryEntry {
            id: LibraryEntryId::new(),
            version: self.version,
            kind: self.kind,
            tags: self.tags,
            app_version: self.app_version,
            data: self.data,
            data_hash: self.data_hash,
            device_id: device_id.to_string(),
            downloads: 0,
            flag_count: 0,
            created_at,
        }
    }
}

impl LibraryEntryInput {
    /// Validates and normalizes the upload.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] listing every failing field.
    pub fn validate(self) -> Result<ValidatedLibraryEntry, GatewayError> {
        let mut errors = Vec::new();

        let version = match self.version {
            None => {
                errors.push("version: version is required".to_string());
                None
            }
            Some(v) => match u32::try_from(v) {
                Ok(v) if v >= 1 => Some(v),
                _ => {
                    errors.push("version: must be a positive integer".to_string());
                    None
                }
            },
        };

        let kind = self
            .kind
            .as_deref()
            .map(|k| k.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if kind.is_empty() {
            errors.push("type: type is required".to_string());
        } else if kind.chars().count() > MAX_KIND
            || !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            errors.push(format!(
                "type: at most {MAX_KIND} characters of [a-z0-9_-]"
            ));
        }

        let mut tags: Vec<String> = Vec::new();
        for tag in self.tags.unwrap_or_default() {
            let tag = normalize_text(&tag);
            if tag.is_empty() || tags.contains(&tag) {
                continue;
            }
            if tag.chars().count() > MAX_TAG {
                errors.push(format!("tags: each tag must be at most {MAX_TAG} characters"));
                break;
            }
            tags.push(tag);
        }
        if tags.len() > MAX_TAGS {
            errors.push(format!("tags: at most {MAX_TAGS} tags"));
        }

        let app_version = self
            .app_version
            .as_deref()
            .map(normalize_text)
            .unwrap_or_default();
        if app_version.is_empty() {
            errors.push("app_version: app_version is required".to_string());
        } else if app_version.chars().count() > MAX_APP_VERSION {
            errors.push(format!(
                "app_version: must be at most {MAX_APP_VERSION} characters"
            ));
        }

        let data = match self.data {
            Some(value @ serde_json::Value::Object(_)) => {
                let mut text = String::new();
                write_canonical(&value, &mut text);
                if text.len() > MAX_DATA_BYTES {
                    errors.push(format!("data: must be at most {} KiB", MAX_DATA_BYTES / 1024));
                    None
                } else {
                    Some(text)
                }
            }
            Some(_) => {
                errors.push("data: must be a JSON object".to_string());
                None
            }
            None => {
                errors.push("data: data is required".to_string());
                None
            }
        };

        if !errors.is_empty() {
            return Err(GatewayError::Validation(errors.join("; ")));
        }
        let data = data.unwrap_or_default();
        Ok(ValidatedLibraryEntry {
            version: version.unwrap_or(1),
            kind,
            tags,
            app_version,
            data_hash: data_hash(&data),
            data,
        })
    }
}

/// Body of a moderation flag.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LibraryFlagInput {
    /// Why the entry is being flagged.
    #[serde(default)]
    pub reason: Option<String>,
}

impl LibraryFlagInput {
    /// Returns the normalized reason.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] for a missing or oversized
    /// reason.
    pub fn validate(self) -> Result<String, GatewayError> {
        let reason = self.reason.as_deref().map(normalize_text).unwrap_or_default();
        if reason.is_empty() {
            return Err(GatewayError::Validation(
                "reason: reason is required".to_string(),
            ));
        }
        if reason.chars().count() > MAX_FLAG_REASON {
            return Err(GatewayError::Validation(format!(
                "reason: must be at most {MAX_FLAG_REASON} characters"
            )));
        }
        Ok(reason)
    }
}

/// Writes `value` as compact JSON with object keys sorted, so equal
/// documents always produce equal text.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lower-case hex SHA-256 of `data`.
#[must_use]
pub fn data_hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}
