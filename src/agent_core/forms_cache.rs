//! Per-user cache of the forms a user can fill.
//!
//! Predictions run on every new request; the access query walks every
//! context, so results are cached per user with a TTL (30 minutes by
//! default). Finalizing a submission invalidates the user's entry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::forms::AvailableForm;

struct CacheEntry {
    forms: Vec<AvailableForm>,
    cached_at: Instant,
}

/// TTL cache keyed by user id.
pub struct FormsCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl FormsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached forms for `user_id`, if present and fresh.
    pub fn get(&self, user_id: &str) -> Option<Vec<AvailableForm>> {
        self.get_at(user_id, Instant::now())
    }

    fn get_at(&self, user_id: &str, now: Instant) -> Option<Vec<AvailableForm>> {
        let mut entries = self.entries.lock().ok()?;
        let fresh = entries
            .get(user_id)
            .map(|e| now.saturating_duration_since(e.cached_at) < self.ttl)?;
        if fresh {
            entries.get(user_id).map(|e| e.forms.clone())
        } else {
            entries.remove(user_id);
            tracing::debug!(user_id = %user_id, "forms cache entry expired");
            None
        }
    }

    pub fn put(&self, user_id: &str, forms: Vec<AvailableForm>) {
        self.put_at(user_id, forms, Instant::now());
    }

    fn put_at(&self, user_id: &str, forms: Vec<AvailableForm>, now: Instant) {
        // A poisoned cache is only a missed optimisation.
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                user_id.to_string(),
                CacheEntry {
                    forms,
                    cached_at: now,
                },
            );
        }
    }

    /// Drop one user's entry. Returns `true` if something was removed.
    pub fn invalidate(&self, user_id: &str) -> bool {
        self.entries
            .lock()
            .map(|mut e| e.remove(user_id).is_some())
            .unwrap_or(false)
    }

    /// Drop every entry (after reseeding the catalogue).
    pub fn invalidate_all(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::forms::AccessLevel;

    fn form(id: &str) -> AvailableForm {
        AvailableForm {
            id: id.into(),
            title: id.to_uppercase(),
            description: String::new(),
            match_keywords: vec![],
            context_id: "c".into(),
            context_title: "C".into(),
            access_level: AccessLevel::User,
            field_count: 1,
            required_count: 1,
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = FormsCache::new(Duration::from_secs(1800));
        cache.put("u1", vec![form("a")]);
        let hit = cache.get("u1").unwrap();
        assert_eq!(hit[0].id, "a");
        assert!(cache.get("u2").is_none());
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = FormsCache::new(Duration::from_secs(1800));
        let t0 = Instant::now();
        cache.put_at("u1", vec![form("a")], t0);
        assert!(cache.get_at("u1", t0 + Duration::from_secs(1799)).is_some());
        assert!(cache.get_at("u1", t0 + Duration::from_secs(1800)).is_none());
        assert!(cache.is_empty(), "expired entry is evicted");
    }

    #[test]
    fn test_invalidate() {
        let cache = FormsCache::new(Duration::from_secs(60));
        cache.put("u1", vec![form("a")]);
        cache.put("u2", vec![form("b")]);
        assert!(cache.invalidate("u1"));
        assert!(!cache.invalidate("u1"));
        assert_eq!(cache.len(), 1);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
