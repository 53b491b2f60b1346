//! Local id ↔ remote key resolution with an in-memory TTL cache.
//!
//! Only hits are cached. A miss always goes back to the store, since the
//! product handler may record the mapping a moment later.

use async_trait::async_trait;
use bridge_core::EntityType;
use bridge_db::MappingRepository;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::clock::Clock;
use crate::error::SyncResult;

/// How long a cached mapping is trusted.
pub const MAPPING_CACHE_TTL: Duration = Duration::from_secs(600);

/// Maps local identifiers to remote keys and back.
#[async_trait]
pub trait EntityResolver: Send + Sync + Debug {
    async fn resolve(&self, entity_type: EntityType, local_id: &str) -> SyncResult<Option<String>>;

    async fn resolve_reverse(
        &self,
        entity_type: EntityType,
        external_key: &str,
    ) -> SyncResult<Option<String>>;

    async fn set_mapping(
        &self,
        entity_type: EntityType,
        local_id: &str,
        external_key: &str,
    ) -> SyncResult<()>;

    async fn remove_mapping(&self, entity_type: EntityType, local_id: &str) -> SyncResult<bool>;

    /// Forgets every cached entry.
    fn invalidate_cache(&self);
}

type CacheKey = (EntityType, String);

#[derive(Debug, Default)]
struct MappingCache {
    forward: HashMap<CacheKey, (String, Instant)>,
    reverse: HashMap<CacheKey, (String, Instant)>,
}

impl MappingCache {
    /// Stores a pair and drops every entry older than `ttl`.
    fn put(
        &mut self,
        entity_type: EntityType,
        local_id: &str,
        external_key: &str,
        now: Instant,
        ttl: Duration,
    ) {
        let live = |entry: &(String, Instant)| now.saturating_duration_since(entry.1) < ttl;
        self.forward.retain(|_, entry| live(entry));
        self.reverse.retain(|_, entry| live(entry));

        self.forward.insert(
            (entity_type, local_id.to_string()),
            (external_key.to_string(), now),
        );
        self.reverse.insert(
            (entity_type, external_key.to_string()),
            (local_id.to_string(), now),
        );
    }

    fn forget_local(&mut self, entity_type: EntityType, local_id: &str) {
        if let Some((key, _)) = self.forward.remove(&(entity_type, local_id.to_string())) {
            self.reverse.remove(&(entity_type, key));
        }
    }

    fn forget_external(&mut self, entity_type: EntityType, external_key: &str) {
        if let Some((id, _)) = self.reverse.remove(&(entity_type, external_key.to_string())) {
            self.forward.remove(&(entity_type, id));
        }
    }
}

fn fresh(
    map: &HashMap<CacheKey, (String, Instant)>,
    key: &CacheKey,
    now: Instant,
    ttl: Duration,
) -> Option<String> {
    map.get(key)
        .filter(|(_, at)| now.saturating_duration_since(*at) < ttl)
        .map(|(value, _)| value.clone())
}

/// [`EntityResolver`] over the `entity_mappings` table.
#[derive(Debug)]
pub struct CachedResolver {
    repo: MappingRepository,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cache: Mutex<MappingCache>,
}

impl CachedResolver {
    pub fn new(repo: MappingRepository, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(repo, clock, MAPPING_CACHE_TTL)
    }

    pub fn with_ttl(repo: MappingRepository, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            repo,
            clock,
            ttl,
            cache: Mutex::new(MappingCache::default()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, MappingCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl EntityResolver for CachedResolver {
    async fn resolve(&self, entity_type: EntityType, local_id: &str) -> SyncResult<Option<String>> {
        let now = self.clock.now();
        let key = (entity_type, local_id.to_string());

        let cached = fresh(&self.cache().forward, &key, now, self.ttl);
        if cached.is_some() {
            return Ok(cached);
        }

        let found = self.repo.get_external(entity_type, local_id).await?;
        if let Some(external_key) = &found {
            self.cache().put(entity_type, local_id, external_key, now, self.ttl);
        }

        debug!(entity_type = %entity_type, local_id, found = found.is_some(), "Resolved mapping");
        Ok(found)
    }

    async fn resolve_reverse(
        &self,
        entity_type: EntityType,
        external_key: &str,
    ) -> SyncResult<Option<String>> {
        let now = self.clock.now();
        let key = (entity_type, external_key.to_string());

        let cached = fresh(&self.cache().reverse, &key, now, self.ttl);
        if cached.is_some() {
            return Ok(cached);
        }

        let found = self.repo.get_local(entity_type, external_key).await?;
        if let Some(local_id) = &found {
            self.cache().put(entity_type, local_id, external_key, now, self.ttl);
        }

        Ok(found)
    }

    async fn set_mapping(
        &self,
        entity_type: EntityType,
        local_id: &str,
        external_key: &str,
    ) -> SyncResult<()> {
        self.repo.upsert(entity_type, local_id, external_key).await?;

        let now = self.clock.now();
        let mut cache = self.cache();
        cache.forget_local(entity_type, local_id);
        cache.forget_external(entity_type, external_key);
        cache.put(entity_type, local_id, external_key, now, self.ttl);
        Ok(())
    }

    async fn remove_mapping(&self, entity_type: EntityType, local_id: &str) -> SyncResult<bool> {
        let removed = self.repo.remove(entity_type, local_id).await?;
        self.cache().forget_local(entity_type, local_id);
        Ok(removed)
    }

    fn invalidate_cache(&self) {
        let mut cache = self.cache();
        cache.forward.clear();
        cache.reverse.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use bridge_db::{Database, DbConfig};

    async fn setup() -> (CachedResolver, MappingRepository, ManualClock) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = ManualClock::new();
        let resolver = CachedResolver::new(db.mappings(), Arc::new(clock.clone()));
        (resolver, db.mappings(), clock)
    }

    #[tokio::test]
    async fn test_resolve_both_directions() {
        let (resolver, _, _) = setup().await;

        resolver
            .set_mapping(EntityType::Product, "42", "ABC123")
            .await
            .unwrap();

        assert_eq!(
            resolver.resolve(EntityType::Product, "42").await.unwrap(),
            Some("ABC123".to_string())
        );
        assert_eq!(
            resolver
                .resolve_reverse(EntityType::Product, "ABC123")
                .await
                .unwrap(),
            Some("42".to_string())
        );
        assert_eq!(resolver.resolve(EntityType::Stock, "42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cache_serves_until_ttl() {
        let (resolver, repo, clock) = setup().await;
        repo.upsert(EntityType::Product, "42", "OLD").await.unwrap();

        assert_eq!(
            resolver.resolve(EntityType::Product, "42").await.unwrap().as_deref(),
            Some("OLD")
        );

        // Changed behind the resolver's back.
        repo.upsert(EntityType::Product, "42", "NEW").await.unwrap();
        clock.advance(Duration::from_secs(300));
        assert_eq!(
            resolver.resolve(EntityType::Product, "42").await.unwrap().as_deref(),
            Some("OLD")
        );

        clock.advance(MAPPING_CACHE_TTL);
        assert_eq!(
            resolver.resolve(EntityType::Product, "42").await.unwrap().as_deref(),
            Some("NEW")
        );
    }

    #[tokio::test]
    async fn test_misses_are_not_cached() {
        let (resolver, repo, _) = setup().await;

        assert_eq!(resolver.resolve(EntityType::Product, "7").await.unwrap(), None);
        repo.upsert(EntityType::Product, "7", "SKU-7").await.unwrap();
        assert_eq!(
            resolver.resolve(EntityType::Product, "7").await.unwrap().as_deref(),
            Some("SKU-7")
        );
    }

    #[tokio::test]
    async fn test_remapping_drops_stale_reverse_entry() {
        let (resolver, _, _) = setup().await;

        resolver.set_mapping(EntityType::Product, "42", "OLD").await.unwrap();
        resolver.set_mapping(EntityType::Product, "42", "NEW").await.unwrap();

        assert_eq!(
            resolver.resolve_reverse(EntityType::Product, "OLD").await.unwrap(),
            None
        );
        assert_eq!(
            resolver.resolve(EntityType::Product, "42").await.unwrap().as_deref(),
            Some("NEW")
        );
    }

    #[tokio::test]
    async fn test_expired_entries_are_pruned_on_insert() {
        let (resolver, repo, clock) = setup().await;
        for id in ["1", "2", "3"] {
            repo.upsert(EntityType::Product, id, &format!("SKU-{id}")).await.unwrap();
            resolver.resolve(EntityType::Product, id).await.unwrap();
        }
        assert_eq!(resolver.cache().forward.len(), 3);

        clock.advance(MAPPING_CACHE_TTL);
        repo.upsert(EntityType::Product, "4", "SKU-4").await.unwrap();
        resolver.resolve(EntityType::Product, "4").await.unwrap();

        let cache = resolver.cache();
        assert_eq!(cache.forward.len(), 1);
        assert!(cache.forward.contains_key(&(EntityType::Product, "4".to_string())));
        assert_eq!(cache.reverse.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_invalidate() {
        let (resolver, repo, _) = setup().await;

        resolver.set_mapping(EntityType::Product, "42", "ABC").await.unwrap();
        assert!(resolver.remove_mapping(EntityType::Product, "42").await.unwrap());
        assert!(!resolver.remove_mapping(EntityType::Product, "42").await.unwrap());
        assert_eq!(resolver.resolve(EntityType::Product, "42").await.unwrap(), None);

        resolver.set_mapping(EntityType::Product, "1", "A").await.unwrap();
        repo.remove(EntityType::Product, "1").await.unwrap();
        resolver.invalidate_cache();
        assert_eq!(resolver.resolve(EntityType::Product, "1").await.unwrap(), None);
    }
}
