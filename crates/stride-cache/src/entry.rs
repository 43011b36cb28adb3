//! Cache entries and read results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stride_types::{Document, ResourceKey};

/// A cached document and when it was last synchronized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: ResourceKey,
    pub payload: Document,
    pub last_synced_at: DateTime<Utc>,
}

/// How a cached value relates to its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    /// Nothing cached; the payload is the empty default.
    Absent,
}

/// Result of a stale-while-revalidate load.
#[derive(Debug, Clone)]
pub struct Loaded {
    /// Cached payload, or `Document::Null` when nothing is cached.
    pub payload: Document,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub freshness: Freshness,
    /// Whether a background refresh was scheduled by this call.
    pub refresh_scheduled: bool,
}

impl Loaded {
    pub fn is_absent(&self) -> bool {
        self.freshness == Freshness::Absent
    }
}

/// `now - last_synced_at > ttl`.
pub fn is_stale(last_synced_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now - last_synced_at > ttl,
        // A TTL too large to represent never expires.
        Err(_) => false,
    }
}
