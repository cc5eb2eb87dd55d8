/*
 * Copyright (c) 2025. Courier Contributors
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! The cache collaborator contract and its null / in-memory implementations.
//!
//! Cache and storage address entities through the same
//! [`EntityTransform`], which is what keeps read-through and write-through
//! coherent.

use std::marker::PhantomData;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::persistence::{EntityTransform, StorageResponse};

/// The cache collaborator contract.
#[async_trait]
pub trait CacheManager<K, E>: Send + Sync
where
    K: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Whether the cache participates at all.
    fn is_active(&self) -> bool;

    /// Whether the cache may only be read (never populated or invalidated).
    fn is_read_only(&self) -> bool {
        false
    }

    /// Reads an entity by key. `None` is a miss.
    async fn read(&self, transform: &EntityTransform<K, E>, key: &K) -> Option<StorageResponse<E>>;

    /// Reads an entity by reference tuple. `None` is a miss.
    async fn read_by_ref(
        &self,
        transform: &EntityTransform<K, E>,
        reference: &(String, String),
    ) -> Option<StorageResponse<E>>;

    /// Writes an entity through the transform. Returns `true` when stored.
    async fn write(&self, transform: &EntityTransform<K, E>, entity: &E) -> bool;

    /// Invalidates the entry for a key. Returns `true` when something was
    /// removed.
    async fn delete(&self, transform: &EntityTransform<K, E>, key: &K) -> bool;

    /// Reads an entity's version by key without materializing the entity.
    async fn version_read(
        &self,
        transform: &EntityTransform<K, E>,
        key: &K,
    ) -> Option<StorageResponse<E>>;

    /// Reads an entity's version by reference tuple.
    async fn version_read_by_ref(
        &self,
        transform: &EntityTransform<K, E>,
        reference: &(String, String),
    ) -> Option<StorageResponse<E>>;
}

/// The inactive cache: every read misses, every write is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCacheManager;

#[async_trait]
impl<K, E> CacheManager<K, E> for NullCacheManager
where
    K: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn is_active(&self) -> bool {
        false
    }

    async fn read(
        &self,
        _transform: &EntityTransform<K, E>,
        _key: &K,
    ) -> Option<StorageResponse<E>> {
        None
    }

    async fn read_by_ref(
        &self,
        _transform: &EntityTransform<K, E>,
        _reference: &(String, String),
    ) -> Option<StorageResponse<E>> {
        None
    }

    async fn write(&self, _transform: &EntityTransform<K, E>, _entity: &E) -> bool {
        false
    }

    async fn delete(&self, _transform: &EntityTransform<K, E>, _key: &K) -> bool {
        false
    }

    async fn version_read(
        &self,
        _transform: &EntityTransform<K, E>,
        _key: &K,
    ) -> Option<StorageResponse<E>> {
        None
    }

    async fn version_read_by_ref(
        &self,
        _transform: &EntityTransform<K, E>,
        _reference: &(String, String),
    ) -> Option<StorageResponse<E>> {
        None
    }
}

/// In-memory cache manager over concurrent maps.
pub struct MemoryCacheManager<K, E> {
    read_only: bool,
    entries: DashMap<String, (E, Option<String>)>,
    references: DashMap<String, String>,
    _key: PhantomData<fn() -> K>,
}

impl<K, E> Default for MemoryCacheManager<K, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> MemoryCacheManager<K, E> {
    /// Creates an empty writable cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            read_only: false,
            entries: DashMap::new(),
            references: DashMap::new(),
            _key: PhantomData,
        }
    }

    /// Marks the cache read-only: reads are served but the engine never
    /// populates or invalidates it.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// The number of cached entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<K, E> CacheManager<K, E> for MemoryCacheManager<K, E>
where
    K: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn is_active(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn read(&self, transform: &EntityTransform<K, E>, key: &K) -> Option<StorageResponse<E>> {
        self.entries.get(&transform.cache_key(key)).map(|entry| {
            StorageResponse::success(entry.value().0.clone())
                .with_version(entry.value().1.clone())
        })
    }

    async fn read_by_ref(
        &self,
        transform: &EntityTransform<K, E>,
        reference: &(String, String),
    ) -> Option<StorageResponse<E>> {
        let address = self
            .references
            .get(&transform.reference_cache_key(reference))
            .map(|entry| entry.value().clone())?;
        self.entries.get(&address).map(|entry| {
            StorageResponse::success(entry.value().0.clone())
                .with_version(entry.value().1.clone())
        })
    }

    async fn write(&self, transform: &EntityTransform<K, E>, entity: &E) -> bool {
        if self.read_only {
            return false;
        }
        let key = transform.key_for(entity);
        let address = transform.cache_key(&key);
        let version = transform.version().version_of(entity);
        self.entries
            .insert(address.clone(), (entity.clone(), version));
        for reference in transform.references(entity) {
            self.references
                .insert(transform.reference_cache_key(&reference), address.clone());
        }
        true
    }

    async fn delete(&self, transform: &EntityTransform<K, E>, key: &K) -> bool {
        if self.read_only {
            return false;
        }
        self.entries.remove(&transform.cache_key(key)).is_some()
    }

    async fn version_read(
        &self,
        transform: &EntityTransform<K, E>,
        key: &K,
    ) -> Option<StorageResponse<E>> {
        self.entries.get(&transform.cache_key(key)).map(|entry| {
            StorageResponse::key_success(transform.key_to_string(key), entry.value().1.clone())
        })
    }

    async fn version_read_by_ref(
        &self,
        transform: &EntityTransform<K, E>,
        reference: &(String, String),
    ) -> Option<StorageResponse<E>> {
        let address = self
            .references
            .get(&transform.reference_cache_key(reference))
            .map(|entry| entry.value().clone())?;
        self.entries.get(&address).map(|entry| {
            let key = transform.key_for(&entry.value().0);
            StorageResponse::key_success(transform.key_to_string(&key), entry.value().1.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct Account {
        id: u64,
        email: String,
    }

    fn transform() -> EntityTransform<u64, Account> {
        EntityTransform::new("account", |account: &Account| account.id).with_reference_maker(
            |account: &Account| vec![("email".to_string(), account.email.clone())],
        )
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let cache = MemoryCacheManager::new();
        let transform = transform();
        let account = Account {
            id: 7,
            email: "a@b.c".into(),
        };

        assert!(cache.write(&transform, &account).await);
        let hit = cache.read(&transform, &7).await.unwrap();
        assert_eq!(hit.entity, Some(account.clone()));

        let by_ref = cache
            .read_by_ref(&transform, &("email".into(), "a@b.c".into()))
            .await
            .unwrap();
        assert_eq!(by_ref.entity, Some(account));
    }

    #[tokio::test]
    async fn delete_invalidates_the_entry() {
        let cache = MemoryCacheManager::new();
        let transform = transform();
        let account = Account {
            id: 7,
            email: "a@b.c".into(),
        };

        cache.write(&transform, &account).await;
        assert!(cache.delete(&transform, &7).await);
        assert!(cache.read(&transform, &7).await.is_none());
    }

    #[tokio::test]
    async fn read_only_cache_rejects_writes() {
        let cache = MemoryCacheManager::new().read_only();
        let transform = transform();
        let account = Account {
            id: 7,
            email: "a@b.c".into(),
        };

        assert!(!cache.write(&transform, &account).await);
        assert!(CacheManager::<u64, Account>::is_read_only(&cache));
        assert!(cache.is_empty());
    }
}
