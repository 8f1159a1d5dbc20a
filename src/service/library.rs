//! Shared profile library: uploads, listing and moderation counters.
//!
//! Uploads are validated, then counted against the uploading device's
//! quota, then stored unless an entry with the same document hash exists.
//! Flags are counted against the caller's IP.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::rate_limiter::{RateLimitPolicy, RateLimiter};
use crate::domain::submission::normalize_text;
use crate::domain::{
    LibraryCounter, LibraryEntry, LibraryEntryId, LibraryEntryInput, LibraryFlagInput,
    LibraryInsert, LibrarySelector, LibrarySort,
};
use crate::error::GatewayError;
use crate::persistence::DurableStore;

/// Page size used when the caller names none.
pub const DEFAULT_PER_PAGE: usize = 20;

/// Largest page a caller may request.
pub const MAX_PER_PAGE: usize = 50;

/// `device_id` value standing for the caller's own device.
pub const OWN_DEVICE: &str = "mine";

/// Listing filters as received from the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryQuery {
    /// Only entries of this kind.
    pub kind: Option<String>,
    /// Every tag must be present on the entry.
    pub tags: Vec<String>,
    /// Only entries created strictly after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only entries uploaded by this device, or [`OWN_DEVICE`].
    pub device_id: Option<String>,
    /// Ordering of the result.
    pub sort: LibrarySort,
    /// 1-based page number; clamped to at least 1.
    pub page: Option<usize>,
    /// Page size; clamped to `1..=MAX_PER_PAGE`.
    pub per_page: Option<usize>,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryPage {
    /// Entries on this page.
    pub entries: Vec<LibraryEntry>,
    /// Matches across all pages.
    pub total: usize,
    /// Page number served.
    pub page: usize,
    /// Page size applied.
    pub per_page: usize,
}

/// A stored upload and the uploader's remaining quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryCreated {
    /// The stored entry.
    pub entry: LibraryEntry,
    /// Uploads left in the device's window.
    pub remaining: u32,
}

/// Result of a moderation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagOutcome {
    /// Flags recorded against the entry so far.
    pub flag_count: u64,
    /// Flags left in the caller's window.
    pub remaining: u32,
}

/// Library operations over the durable store.
#[derive(Debug, Clone)]
pub struct LibraryService {
    store: Arc<dyn DurableStore>,
    rate_limiter: RateLimiter,
    upload_policy: RateLimitPolicy,
    flag_policy: RateLimitPolicy,
}

impl LibraryService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn DurableStore>,
        rate_limiter: RateLimiter,
        upload_policy: RateLimitPolicy,
        flag_policy: RateLimitPolicy,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            upload_policy,
            flag_policy,
        }
    }

    /// Stores an upload from `device_id`.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Unauthorized`] without a device id.
    /// - [`GatewayError::Validation`] for malformed input.
    /// - [`GatewayError::RateLimited`] once the device spent its quota.
    /// - [`GatewayError::Conflict`] when the same document is already
    ///   stored; `existing_id` names it.
    pub async fn create(
        &self,
        input: LibraryEntryInput,
        device_id: Option<&str>,
    ) -> Result<LibraryCreated, GatewayError> {
        let device_id = require_device(device_id)?;
        let validated = input.validate()?;

        let decision = self
            .rate_limiter
            .check(&self.upload_policy, device_id)
            .await?
            .into_result()?;

        let entry = validated.into_entry(device_id, Utc::now());
        match self.store.insert_library_entry(&entry).await? {
            LibraryInsert::Inserted => {
                tracing::info!(entry_id = %entry.id, kind = %entry.kind, device_id, "library entry stored");
                Ok(LibraryCreated {
                    entry,
                    remaining: decision.remaining,
                })
            }
            LibraryInsert::Duplicate(existing) => Err(GatewayError::Conflict {
                message: "an identical entry already exists".to_string(),
                existing_id: Some(existing.to_string()),
            }),
        }
    }

    /// Lists entries matching `query`. `caller` is the requesting device,
    /// needed when `query.device_id` is [`OWN_DEVICE`].
    ///
    /// # Errors
    ///
    /// [`GatewayError::Unauthorized`] for [`OWN_DEVICE`] without a caller,
    /// [`GatewayError::StoreUnavailable`] on store failure.
    pub async fn list(
        &self,
        query: LibraryQuery,
        caller: Option<&str>,
    ) -> Result<LibraryPage, GatewayError> {
        let device = match query.device_id.as_deref().map(str::trim) {
            Some(OWN_DEVICE) => Some(require_device(caller).map_err(|_| {
                GatewayError::Unauthorized(format!(
                    "X-Device-Id header is required when using device_id={OWN_DEVICE}"
                ))
            })?),
            Some("") | None => None,
            Some(other) => Some(other),
        };
        let kind = query
            .kind
            .as_deref()
            .map(|k| k.trim().to_ascii_lowercase())
            .filter(|k| !k.is_empty());
        let selector = match (device, &kind) {
            (Some(device), _) => LibrarySelector::Device(device.to_string()),
            (None, Some(kind)) => LibrarySelector::Kind(kind.clone()),
            (None, None) => LibrarySelector::All,
        };

        let tags: Vec<String> = query
            .tags
            .iter()
            .map(|t| normalize_text(t))
            .filter(|t| !t.is_empty())
            .collect();
        let mut entries: Vec<LibraryEntry> = self
            .store
            .library_entries(&selector)
            .await?
            .into_iter()
            .filter(|e| kind.as_ref().is_none_or(|k| e.kind == *k))
            .filter(|e| query.since.is_none_or(|since| e.created_at > since))
            .filter(|e| tags.iter().all(|t| e.tags.contains(t)))
            .collect();

        match query.sort {
            LibrarySort::Newest => entries.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            LibrarySort::Popular => entries.sort_by(|a, b| {
                b.downloads
                    .cmp(&a.downloads)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
        }

        let page = query.page.unwrap_or(1).max(1);
        let per_page = query
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let total = entries.len();
        let entries = entries
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();
        Ok(LibraryPage {
            entries,
            total,
            page,
            per_page,
        })
    }

    /// Reads one entry.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] if it does not exist.
    pub async fn get(&self, id: &LibraryEntryId) -> Result<LibraryEntry, GatewayError> {
        self.store
            .get_library_entry(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Deletes an entry uploaded by `device_id`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Unauthorized`] without a device id,
    /// [`GatewayError::Forbidden`] when the entry is missing or belongs to
    /// another device.
    pub async fn delete(
        &self,
        id: &LibraryEntryId,
        device_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        let device_id = require_device(device_id)?;
        if self.store.delete_library_entry(id, device_id).await? {
            tracing::info!(entry_id = %id, device_id, "library entry deleted");
            Ok(())
        } else {
            Err(GatewayError::Forbidden(
                "entry not found or you are not the owner".to_string(),
            ))
        }
    }

    /// Counts one download and returns the new total.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] if the entry does not exist.
    pub async fn record_download(&self, id: &LibraryEntryId) -> Result<u64, GatewayError> {
        self.store
            .increment_library_counter(id, LibraryCounter::Downloads)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Flags an entry for moderation on behalf of `source` (the caller IP).
    ///
    /// # Errors
    ///
    /// - [`GatewayError::RateLimited`] once `source` spent its quota.
    /// - [`GatewayError::Validation`] without a reason.
    /// - [`GatewayError::NotFound`] if the entry does not exist.
    pub async fn flag(
        &self,
        id: &LibraryEntryId,
        input: LibraryFlagInput,
        source: &str,
    ) -> Result<FlagOutcome, GatewayError> {
        let decision = self
            .rate_limiter
            .check(&self.flag_policy, source)
            .await?
            .into_result()?;
        let reason = input.validate()?;
        let flag_count = self
            .store
            .increment_library_counter(id, LibraryCounter::Flags)
            .await?
            .ok_or_else(|| not_found(id))?;
        tracing::info!(entry_id = %id, flag_count, reason = %reason, source, "library entry flagged");
        Ok(FlagOutcome {
            flag_count,
            remaining: decision.remaining,
        })
    }
}

fn require_device(device_id: Option<&str>) -> Result<&str, GatewayError> {
    device_id
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| GatewayError::Unauthorized("X-Device-Id header is required".to_string()))
}

fn not_found(id: &LibraryEntryId) -> GatewayError {
    GatewayError::NotFound(format!("library entry {id} not found"))
}
