//! In-memory user directory with chunked prefetch.
//!
//! Rendering and the conversation listener consult this map instead of
//! hitting the backend per lookup. Population is lazy: `prefetch`
//! checks memory, then the local cache, then the durable store, in
//! batches that bound concurrent backend load.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::{debug, warn};

use vitalink_backend::DocumentStore;
use vitalink_shared::{UserId, UserProfile};
use vitalink_store::{keys, CacheStore};

/// Shared map from user id to last-known profile.
#[derive(Clone, Default)]
pub struct UserDirectory {
    users: Arc<Mutex<HashMap<UserId, UserProfile>>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &UserId) -> Option<UserProfile> {
        self.users.lock().ok()?.get(id).cloned()
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.users
            .lock()
            .map(|users| users.contains_key(id))
            .unwrap_or(false)
    }

    pub fn display_name(&self, id: &UserId) -> Option<String> {
        self.get(id)
            .map(|p| p.display_name)
            .filter(|name| !name.is_empty())
    }

    pub fn insert(&self, profile: UserProfile) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(profile.id.clone(), profile);
        }
    }

    /// Populate the directory for every id not yet resident.
    ///
    /// Missing ids are resolved cache-first, then from the durable
    /// store, in sequential chunks of at most `chunk_size` concurrent
    /// fetches. A failure for one id is logged and skipped; it never
    /// aborts the chunk or the prefetch.
    pub async fn prefetch(
        &self,
        ids: Vec<UserId>,
        cache: &CacheStore,
        documents: &Arc<dyn DocumentStore>,
        chunk_size: usize,
    ) {
        let missing: Vec<UserId> = {
            let mut seen = std::collections::HashSet::new();
            ids.into_iter()
                .filter(|id| seen.insert(id.clone()) && !self.contains(id))
                .collect()
        };
        if missing.is_empty() {
            return;
        }
        debug!(count = missing.len(), "prefetching user profiles");

        for chunk in missing.chunks(chunk_size.max(1)) {
            let fetches = chunk.iter().map(|id| self.resolve(id, cache, documents));
            join_all(fetches).await;
        }
    }

    async fn resolve(&self, id: &UserId, cache: &CacheStore, documents: &Arc<dyn DocumentStore>) {
        if let Some(profile) = cache.get::<UserProfile>(&keys::user(id)) {
            self.insert(profile);
            return;
        }

        match documents.get_user(id).await {
            Ok(Some(profile)) => {
                cache.set(&keys::user(id), &profile);
                self.insert(profile);
            }
            Ok(None) => debug!(user = %id, "no profile document"),
            Err(e) => warn!(user = %id, error = %e, "profile fetch failed, skipping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitalink_backend::MemoryBackend;
    use vitalink_store::Database;

    fn profile(id: &str, name: &str) -> UserProfile {
        UserProfile {
            id: UserId::new(id),
            display_name: name.to_string(),
            ..UserProfile::default()
        }
    }

    fn cache() -> CacheStore {
        CacheStore::new(Database::in_memory().unwrap())
    }

    #[tokio::test]
    async fn prefetch_populates_from_store_and_caches() {
        let backend = MemoryBackend::new();
        backend.put_user(&profile("u1", "Ana")).await.unwrap();
        let documents: Arc<dyn DocumentStore> = Arc::new(backend);
        let cache = cache();

        let directory = UserDirectory::new();
        directory
            .prefetch(vec![UserId::new("u1")], &cache, &documents, 10)
            .await;

        assert_eq!(directory.display_name(&UserId::new("u1")), Some("Ana".into()));
        assert!(cache.get::<UserProfile>(&keys::user(&UserId::new("u1"))).is_some());
    }

    #[tokio::test]
    async fn prefetch_prefers_cache_over_store() {
        let documents: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
        let cache = cache();
        cache.set(&keys::user(&UserId::new("u1")), &profile("u1", "Cached"));

        let directory = UserDirectory::new();
        directory
            .prefetch(vec![UserId::new("u1")], &cache, &documents, 10)
            .await;

        assert_eq!(
            directory.display_name(&UserId::new("u1")),
            Some("Cached".into())
        );
    }

    #[tokio::test]
    async fn missing_ids_are_skipped_not_fatal() {
        let backend = MemoryBackend::new();
        backend.put_user(&profile("u2", "Bo")).await.unwrap();
        let documents: Arc<dyn DocumentStore> = Arc::new(backend);
        let cache = cache();

        let directory = UserDirectory::new();
        directory
            .prefetch(
                vec![UserId::new("ghost"), UserId::new("u2")],
                &cache,
                &documents,
                1,
            )
            .await;

        assert!(!directory.contains(&UserId::new("ghost")));
        assert!(directory.contains(&UserId::new("u2")));
    }

    #[tokio::test]
    async fn resident_ids_are_not_refetched() {
        let documents: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
        let cache = cache();
        let directory = UserDirectory::new();
        directory.insert(profile("u1", "Resident"));

        directory
            .prefetch(vec![UserId::new("u1")], &cache, &documents, 10)
            .await;

        // Still the in-memory copy; the (empty) store was never able to
        // overwrite it.
        assert_eq!(
            directory.display_name(&UserId::new("u1")),
            Some("Resident".into())
        );
    }
}
