//! Profile library DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{LibraryEntry, LibrarySort};
use crate::service::{LibraryPage, LibraryQuery};

/// Entry listed without its document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LibraryEntrySummary {
    /// Entry identifier.
    pub id: String,
    /// Client schema version.
    pub version: u32,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Tags.
    pub tags: Vec<String>,
    /// Uploading application version.
    pub app_version: String,
    /// Uploading device.
    pub device_id: String,
    /// Recorded downloads.
    pub downloads: u64,
    /// Moderation flags.
    pub flag_count: u64,
    /// Upload time.
    pub created_at: DateTime<Utc>,
}

impl From<&LibraryEntry> for LibraryEntrySummary {
    fn from(entry: &LibraryEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            version: entry.version,
            kind: entry.kind.clone(),
            tags: entry.tags.clone(),
            app_version: entry.app_version.clone(),
            device_id: entry.device_id.clone(),
            downloads: entry.downloads,
            flag_count: entry.flag_count,
            created_at: entry.created_at,
        }
    }
}

/// Entry with its document, as served by `GET /api/v1/library/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LibraryEntryResponse {
    /// Listing fields.
    #[serde(flatten)]
    pub summary: LibraryEntrySummary,
    /// The stored document.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

impl From<&LibraryEntry> for LibraryEntryResponse {
    fn from(entry: &LibraryEntry) -> Self {
        Self {
            summary: LibraryEntrySummary::from(entry),
            // stored text is always canonical JSON written by validation
            data: serde_json::from_str(&entry.data).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Response body of `POST /api/v1/library`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LibraryCreatedResponse {
    /// Identifier of the new entry.
    pub id: String,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Upload time.
    pub created_at: DateTime<Utc>,
}

/// Response body of `GET /api/v1/library`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LibraryListResponse {
    /// Entries on this page.
    pub entries: Vec<LibraryEntrySummary>,
    /// Matches across all pages.
    pub total: usize,
    /// Page served.
    pub page: usize,
    /// Page size applied.
    pub per_page: usize,
}

impl From<&LibraryPage> for LibraryListResponse {
    fn from(page: &LibraryPage) -> Self {
        Self {
            entries: page.entries.iter().map(LibraryEntrySummary::from).collect(),
            total: page.total,
            page: page.page,
            per_page: page.per_page,
        }
    }
}

/// Response body of `POST /api/v1/library/{id}/download`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LibraryDownloadResponse {
    /// Always `true`.
    pub success: bool,
    /// Downloads recorded so far.
    pub downloads: u64,
}

/// Acknowledgement of a delete or flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    /// Always `true`.
    pub success: bool,
}

/// Query parameters of `GET /api/v1/library`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct LibraryListQuery {
    /// Only entries of this type.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Comma-separated tags; every one must be present.
    pub tags: Option<String>,
    /// Only entries created after this RFC 3339 instant.
    pub since: Option<DateTime<Utc>>,
    /// Only entries of this device; `mine` reads `X-Device-Id`.
    pub device_id: Option<String>,
    /// `newest` (default) or `popular`.
    #[param(inline)]
    pub sort: Option<LibrarySort>,
    /// 1-based page. Defaults to 1.
    pub page: Option<usize>,
    /// Page size, 1..=50. Defaults to 20.
    pub per_page: Option<usize>,
}

impl From<LibraryListQuery> for LibraryQuery {
    fn from(query: LibraryListQuery) -> Self {
        Self {
            kind: query.kind,
            tags: query
                .tags
                .as_deref()
                .map(|raw| raw.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            since: query.since,
            device_id: query.device_id,
            sort: query.sort.unwrap_or_default(),
            page: query.page,
            per_page: query.per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LibraryEntryId;

    fn entry() -> LibraryEntry {
        LibraryEntry {
            id: LibraryEntryId::new(),
            version: 2,
            kind: "profile".to_string(),
            tags: vec!["light".to_string()],
            app_version: "1.4.0".to_string(),
            data: r#"{"name":"Turbo"}"#.to_string(),
            data_hash: "h".to_string(),
            device_id: "dev-1".to_string(),
            downloads: 3,
            flag_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn full_entry_inlines_document_next_to_summary() {
        let value = serde_json::to_value(LibraryEntryResponse::from(&entry())).unwrap_or_default();
        assert_eq!(value["type"], "profile");
        assert_eq!(value["data"]["name"], "Turbo");
        assert_eq!(value["downloads"], 3);
        assert!(value.get("data_hash").is_none());
    }

    #[test]
    fn comma_separated_tags_split_into_query() {
        let query = LibraryQuery::from(LibraryListQuery {
            tags: Some("light, fast".to_string()),
            ..LibraryListQuery::default()
        });
        assert_eq!(query.tags, vec!["light".to_string(), " fast".to_string()]);
        assert_eq!(query.sort, LibrarySort::Newest);
    }
}
