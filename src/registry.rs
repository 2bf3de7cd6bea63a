//! Bounded in-memory registry of active filter subscriptions
//!
//! The registry is read on every auction, so the layout optimizes the
//! read path: a two-level map `account_id -> session_id -> filter` makes
//! `get_matches` O(filters-for-account), and each stored filter carries
//! a precomputed media-type mask so the match check never touches the
//! media-type list. Reads take a shared lock; register, unregister and
//! the expiry sweep take the exclusive lock.

use crate::error::{AuditError, Result};
use crate::media::MediaTypeSet;
use crate::types::{now_millis, FilterSubscription};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct StoredFilter {
    subscription: FilterSubscription,
    media_mask: MediaTypeSet,
}

impl StoredFilter {
    fn matches(&self, domain: &str, app_bundle: &str, event_media_types: MediaTypeSet) -> bool {
        if !self.subscription.domain.is_empty()
            && !self.subscription.domain.eq_ignore_ascii_case(domain)
        {
            return false;
        }

        if !self.subscription.app_bundle.is_empty()
            && !self.subscription.app_bundle.eq_ignore_ascii_case(app_bundle)
        {
            return false;
        }

        // at least one media type must be present on both sides
        if !self.media_mask.is_empty() && !self.media_mask.intersects(event_media_types) {
            return false;
        }

        true
    }
}

#[derive(Default)]
struct RegistryInner {
    by_account: HashMap<String, HashMap<i32, StoredFilter>>,
    count: usize,
}

/// Thread-safe bounded registry of filter subscriptions with TTL expiry
pub struct FilterRegistry {
    inner: RwLock<RegistryInner>,
    max_filters: usize,
    max_ttl: Duration,
}

impl FilterRegistry {
    pub fn new(max_filters: usize, max_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            max_filters,
            max_ttl,
        }
    }

    /// Register a filter subscription, replacing any existing entry with
    /// the same `(account, session)` key
    ///
    /// The account id is lower-cased and the expiry deadline clamped to
    /// `now + max_ttl` before storing. A brand-new key is rejected when
    /// the registry is at capacity; replacement always succeeds.
    pub fn register(&self, mut filter: FilterSubscription) -> Result<()> {
        if filter.session_id == 0 || filter.account_id.is_empty() {
            return Err(AuditError::InvalidFilter(
                "missing required fields (session_id, account_id)".to_string(),
            ));
        }

        let max_expiration = now_millis() + self.max_ttl.as_millis() as i64;
        if filter.expires_at_ms == 0 || filter.expires_at_ms > max_expiration {
            filter.expires_at_ms = max_expiration;
        }
        filter.account_id = filter.account_id.to_lowercase();

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let exists = inner
            .by_account
            .get(&filter.account_id)
            .is_some_and(|account| account.contains_key(&filter.session_id));

        if !exists && inner.count >= self.max_filters {
            tracing::warn!(
                account = %filter.account_id,
                session = filter.session_id,
                max = self.max_filters,
                "filter rejected: registry at max capacity"
            );
            return Err(AuditError::AtCapacity {
                max: self.max_filters,
            });
        }

        let account_id = filter.account_id.clone();
        let session_id = filter.session_id;
        let media_mask = MediaTypeSet::from_types(&filter.media_types);

        inner
            .by_account
            .entry(account_id.clone())
            .or_default()
            .insert(
                session_id,
                StoredFilter {
                    subscription: filter,
                    media_mask,
                },
            );

        if !exists {
            inner.count += 1;
            metrics::counter!("audit_filters_registered_total", "account" => account_id)
                .increment(1);
        }
        metrics::gauge!("audit_active_filters").set(inner.count as f64);
        Ok(())
    }

    /// Remove a filter subscription; a no-op if the key is absent
    pub fn unregister(&self, session_id: i32, account_id: &str) {
        let account_id = account_id.to_lowercase();

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(account_filters) = inner.by_account.get_mut(&account_id) else {
            return;
        };

        if account_filters.remove(&session_id).is_some() {
            inner.count -= 1;
            if inner
                .by_account
                .get(&account_id)
                .is_some_and(HashMap::is_empty)
            {
                inner.by_account.remove(&account_id);
            }
            metrics::gauge!("audit_active_filters").set(inner.count as f64);
        }
    }

    /// Return every non-expired filter for the account whose predicate
    /// matches the event
    ///
    /// Account lookup is case-sensitive; callers pass a lower-cased id
    /// (registration normalizes the stored side). Expired filters are
    /// skipped here even before the next sweep removes them.
    pub fn get_matches(
        &self,
        account_id: &str,
        domain: &str,
        app_bundle: &str,
        event_media_types: MediaTypeSet,
    ) -> Vec<FilterSubscription> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        let Some(account_filters) = inner.by_account.get(account_id) else {
            return Vec::new();
        };

        let now = now_millis();
        let mut matches = Vec::new();

        for filter in account_filters.values() {
            if filter.subscription.expires_at_ms > 0 && filter.subscription.expires_at_ms < now {
                continue;
            }

            if filter.matches(domain, app_bundle, event_media_types) {
                matches.push(filter.subscription.clone());
            }
        }

        matches
    }

    /// Snapshot of the current filter count
    pub fn count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .count
    }

    /// Spawn the background expiry sweep
    ///
    /// Runs until the shutdown signal flips or its sender drops.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        tracing::debug!("filter registry sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => registry.cleanup_expired(),
                }
            }
        })
    }

    pub(crate) fn cleanup_expired(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let now = now_millis();
        let mut expired = 0usize;

        inner.by_account.retain(|account_id, account_filters| {
            account_filters.retain(|session_id, filter| {
                let is_expired = filter.subscription.expires_at_ms > 0
                    && filter.subscription.expires_at_ms < now;
                if is_expired {
                    expired += 1;
                    tracing::info!(
                        account = %account_id,
                        session = session_id,
                        "filter expired"
                    );
                    metrics::counter!(
                        "audit_filters_expired_total",
                        "account" => account_id.clone()
                    )
                    .increment(1);
                }
                !is_expired
            });
            !account_filters.is_empty()
        });

        inner.count -= expired;
        metrics::gauge!("audit_active_filters").set(inner.count as f64);
    }
}
