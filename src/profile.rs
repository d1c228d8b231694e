//! Profile records and the staleness-aware profile cache.
//!
//! DESIGN
//! ======
//! `ProfileCache` is the single in-process copy of the current principal's
//! office/role assignments. It is constructed explicitly and handed to the
//! orchestrator; there is no global instance. Every mutation replaces the
//! record list wholesale and publishes a fresh [`ProfileSnapshot`] on a
//! `watch` channel so any number of readers can follow along.
//!
//! INVARIANTS
//! ==========
//! - `last_fetched_at` is set iff records are non-empty and were just fetched.
//! - `last_fetched_at` is never persisted, so a fresh process is always stale.
//! - Switching the active office never fetches.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_STALE_MINUTES: u64 = 30;

// =============================================================================
// PROFILE RECORD
// =============================================================================

/// One office/role assignment for a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub user_id: String,
    pub office_id: String,
    pub office_name: String,
    #[serde(default)]
    pub office_type: String,
    #[serde(default)]
    pub office_location: String,
    pub role_id: String,
    pub role_name: String,
    #[serde(default)]
    pub role_description: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub assigned_at: String,
}

impl ProfileRecord {
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Read-only view of the cache handed to consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileSnapshot {
    pub records: Vec<ProfileRecord>,
    pub active_office_id: Option<String>,
    /// Derived "authenticated-with-profile" flag.
    pub has_profile: bool,
    pub error: Option<String>,
}

// =============================================================================
// PROFILE CACHE
// =============================================================================

#[derive(Default)]
struct CacheInner {
    records: Vec<ProfileRecord>,
    last_fetched_at: Option<Instant>,
    active_office_id: Option<String>,
    error: Option<String>,
}

impl CacheInner {
    fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            records: self.records.clone(),
            active_office_id: self.active_office_id.clone(),
            has_profile: !self.records.is_empty(),
            error: self.error.clone(),
        }
    }
}

struct CacheShared {
    inner: Mutex<CacheInner>,
    tx: watch::Sender<ProfileSnapshot>,
}

/// Cheap-to-clone handle onto one profile cache.
#[derive(Clone)]
pub struct ProfileCache {
    shared: Arc<CacheShared>,
}

impl ProfileCache {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ProfileSnapshot::default());
        Self { shared: Arc::new(CacheShared { inner: Mutex::new(CacheInner::default()), tx }) }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut CacheInner) -> R) -> R {
        let mut inner = self
            .shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut inner);
        self.shared.tx.send_replace(inner.snapshot());
        out
    }

    fn read<R>(&self, f: impl FnOnce(&CacheInner) -> R) -> R {
        let inner = self
            .shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&inner)
    }

    /// Replace the record list and stamp `last_fetched_at`.
    ///
    /// An empty list is routed to [`clear`](Self::clear). The active office
    /// survives if it is still assigned, otherwise it moves to the first record.
    pub fn set_profiles(&self, records: Vec<ProfileRecord>) {
        if records.is_empty() {
            self.clear();
            return;
        }
        let count = records.len();
        self.mutate(|inner| {
            let keep_active = inner
                .active_office_id
                .as_ref()
                .is_some_and(|id| records.iter().any(|r| &r.office_id == id));
            if !keep_active {
                inner.active_office_id = records.first().map(|r| r.office_id.clone());
            }
            inner.records = records;
            inner.last_fetched_at = Some(Instant::now());
            inner.error = None;
        });
        debug!(count, "profile cache replaced");
    }

    /// Drop every record and the fetch stamp. Idempotent.
    pub fn clear(&self) {
        self.mutate(|inner| *inner = CacheInner::default());
    }

    /// True if nothing was ever fetched or the last fetch is older than
    /// `threshold_minutes`.
    #[must_use]
    pub fn is_stale(&self, threshold_minutes: u64) -> bool {
        self.is_stale_at(threshold_minutes, Instant::now())
    }

    fn is_stale_at(&self, threshold_minutes: u64, now: Instant) -> bool {
        let threshold = Duration::from_secs(threshold_minutes.saturating_mul(60));
        self.read(|inner| match inner.last_fetched_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) > threshold,
        })
    }

    /// Point the active selection at `office_id` among loaded records.
    ///
    /// Unknown ids leave the selection unchanged, record a local error, and
    /// return `false`.
    pub fn switch_active_office(&self, office_id: &str) -> bool {
        let switched = self.mutate(|inner| {
            if inner.records.iter().any(|r| r.office_id == office_id) {
                inner.active_office_id = Some(office_id.to_owned());
                inner.error = None;
                true
            } else {
                inner.error = Some(format!("office {office_id} is not assigned to this user"));
                false
            }
        });
        if !switched {
            warn!(office_id, "switch to unassigned office ignored");
        }
        switched
    }

    /// Surface a non-fatal warning without touching the records.
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.mutate(|inner| inner.error = Some(message));
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.read(|inner| inner.error.clone())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read(|inner| inner.records.is_empty())
    }

    #[must_use]
    pub fn records(&self) -> Vec<ProfileRecord> {
        self.read(|inner| inner.records.clone())
    }

    #[must_use]
    pub fn last_fetched_at(&self) -> Option<Instant> {
        self.read(|inner| inner.last_fetched_at)
    }

    #[must_use]
    pub fn active_office_id(&self) -> Option<String> {
        self.read(|inner| inner.active_office_id.clone())
    }

    /// The active record: the selected office, or the first record.
    #[must_use]
    pub fn active_record(&self) -> Option<ProfileRecord> {
        self.read(|inner| {
            inner
                .active_office_id
                .as_ref()
                .and_then(|id| inner.records.iter().find(|r| &r.office_id == id))
                .or_else(|| inner.records.first())
                .cloned()
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> ProfileSnapshot {
        self.read(CacheInner::snapshot)
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProfileSnapshot> {
        self.shared.tx.subscribe()
    }
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "profile_test.rs"]
mod tests;
