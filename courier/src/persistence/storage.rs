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

//! The storage collaborator contract consumed by the persistence engine,
//! and the in-memory reference implementation.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use courier_core::error::PersistenceError;

use crate::persistence::EntityTransform;

/// The response a storage collaborator returns for one action.
#[derive(Debug, Clone)]
pub struct StorageResponse<E> {
    /// HTTP-style status of the action.
    pub status_code: u16,
    /// Whether the action succeeded.
    pub is_success: bool,
    /// Whether the action timed out. Timeouts are ambiguous: the write may
    /// have landed despite the missing acknowledgment.
    pub is_timeout: bool,
    /// Whether the collaborator asks for a retry without having timed out.
    /// Such retries do not count against the retry ceiling.
    pub should_retry: bool,
    /// The entity, for entity-shaped results.
    pub entity: Option<E>,
    /// The serialized entity, when the collaborator returns content instead
    /// of a typed entity.
    pub content: Option<String>,
    /// The entity version, for key-shaped results.
    pub version_id: Option<String>,
    /// The serialized key the result refers to.
    pub id: Option<String>,
    /// Collaborator-side error text. Stays in local logs; never reaches the
    /// caller.
    pub error: Option<String>,
}

impl<E> Default for StorageResponse<E> {
    fn default() -> Self {
        Self {
            status_code: 0,
            is_success: false,
            is_timeout: false,
            should_retry: false,
            entity: None,
            content: None,
            version_id: None,
            id: None,
            error: None,
        }
    }
}

impl<E> StorageResponse<E> {
    /// A 200 response carrying the entity.
    #[must_use]
    pub fn success(entity: E) -> Self {
        Self {
            status_code: 200,
            is_success: true,
            entity: Some(entity),
            ..Self::default()
        }
    }

    /// A 200 response for a key-shaped action (delete/version).
    #[must_use]
    pub fn key_success(id: impl Into<String>, version_id: Option<String>) -> Self {
        Self {
            status_code: 200,
            is_success: true,
            id: Some(id.into()),
            version_id,
            ..Self::default()
        }
    }

    /// A 404 response.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            status_code: 404,
            ..Self::default()
        }
    }

    /// A 408 timeout response.
    #[must_use]
    pub fn timeout() -> Self {
        Self {
            status_code: 408,
            is_timeout: true,
            ..Self::default()
        }
    }

    /// A 409 conflict response.
    #[must_use]
    pub fn conflict() -> Self {
        Self {
            status_code: 409,
            ..Self::default()
        }
    }

    /// The default 501 response for actions a collaborator does not
    /// override.
    #[must_use]
    pub fn not_implemented() -> Self {
        Self {
            status_code: 501,
            ..Self::default()
        }
    }

    /// A retry request that is not a timeout; exempt from the retry ceiling.
    #[must_use]
    pub fn retry_requested() -> Self {
        Self {
            status_code: 503,
            should_retry: true,
            ..Self::default()
        }
    }

    /// Attaches a version id.
    #[must_use]
    pub fn with_version(mut self, version_id: Option<String>) -> Self {
        self.version_id = version_id;
        self
    }
}

/// Per-attempt context handed to the storage collaborator.
#[derive(Debug, Clone, Copy)]
pub struct OperationContext {
    /// The request timeout budget.
    pub timeout: Duration,
    /// Whether this attempt is a retry of an earlier one.
    pub is_retry: bool,
    /// How many ceiling-counted retries have happened so far.
    pub retry: u32,
}

/// The storage collaborator contract.
///
/// Every action has a default body answering 501, so a collaborator only
/// implements the operations it supports. Faults outside the response
/// contract are returned as errors and redacted by the engine before any
/// response leaves the process.
#[async_trait]
pub trait StorageProvider<K, E>: Send + Sync
where
    K: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Persists a new entity.
    async fn create(
        &self,
        entity: E,
        context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let _ = (entity, context);
        Ok(StorageResponse::not_implemented())
    }

    /// Reads an entity by key.
    async fn read(
        &self,
        key: &K,
        context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let _ = (key, context);
        Ok(StorageResponse::not_implemented())
    }

    /// Reads an entity by reference tuple.
    async fn read_by_ref(
        &self,
        reference: &(String, String),
        context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let _ = (reference, context);
        Ok(StorageResponse::not_implemented())
    }

    /// Replaces an existing entity.
    async fn update(
        &self,
        entity: E,
        context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let _ = (entity, context);
        Ok(StorageResponse::not_implemented())
    }

    /// Deletes an entity by key.
    async fn delete(
        &self,
        key: &K,
        context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let _ = (key, context);
        Ok(StorageResponse::not_implemented())
    }

    /// Deletes an entity by reference tuple.
    async fn delete_by_ref(
        &self,
        reference: &(String, String),
        context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let _ = (reference, context);
        Ok(StorageResponse::not_implemented())
    }

    /// Reads an entity's version by key.
    async fn version(
        &self,
        key: &K,
        context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let _ = (key, context);
        Ok(StorageResponse::not_implemented())
    }

    /// Reads an entity's version by reference tuple.
    async fn version_by_ref(
        &self,
        reference: &(String, String),
        context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let _ = (reference, context);
        Ok(StorageResponse::not_implemented())
    }
}

/// In-memory storage collaborator, keyed through the entity transform.
///
/// The reference implementation for tests and co-located deployments:
/// entities and their reference tuples live in concurrent maps addressed by
/// the same key transform the cache uses.
pub struct MemoryStorageProvider<K, E> {
    transform: EntityTransform<K, E>,
    entities: DashMap<String, (E, Option<String>)>,
    references: DashMap<String, String>,
    _key: PhantomData<fn() -> K>,
}

impl<K, E> MemoryStorageProvider<K, E>
where
    K: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates an empty provider addressing entities through `transform`.
    #[must_use]
    pub fn new(transform: EntityTransform<K, E>) -> Self {
        Self {
            transform,
            entities: DashMap::new(),
            references: DashMap::new(),
            _key: PhantomData,
        }
    }

    /// The number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the provider is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn store(&self, entity: &E) -> (String, Option<String>) {
        let key = self.transform.key_for(entity);
        let address = self.transform.cache_key(&key);
        let version = self.transform.version().version_of(entity);
        self.entities
            .insert(address.clone(), (entity.clone(), version.clone()));
        for reference in self.transform.references(entity) {
            self.references
                .insert(self.transform.reference_cache_key(&reference), address.clone());
        }
        (self.transform.key_to_string(&key), version)
    }

    fn address_of_reference(&self, reference: &(String, String)) -> Option<String> {
        self.references
            .get(&self.transform.reference_cache_key(reference))
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl<K, E> StorageProvider<K, E> for MemoryStorageProvider<K, E>
where
    K: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn create(
        &self,
        entity: E,
        _context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let key = self.transform.key_for(&entity);
        if self.entities.contains_key(&self.transform.cache_key(&key)) {
            return Ok(StorageResponse::conflict());
        }
        self.store(&entity);
        Ok(StorageResponse::success(entity))
    }

    async fn read(
        &self,
        key: &K,
        _context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        match self.entities.get(&self.transform.cache_key(key)) {
            Some(entry) => Ok(StorageResponse::success(entry.value().0.clone())),
            None => Ok(StorageResponse::not_found()),
        }
    }

    async fn read_by_ref(
        &self,
        reference: &(String, String),
        _context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let Some(address) = self.address_of_reference(reference) else {
            return Ok(StorageResponse::not_found());
        };
        match self.entities.get(&address) {
            Some(entry) => Ok(StorageResponse::success(entry.value().0.clone())),
            None => Ok(StorageResponse::not_found()),
        }
    }

    async fn update(
        &self,
        entity: E,
        _context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let key = self.transform.key_for(&entity);
        if !self.entities.contains_key(&self.transform.cache_key(&key)) {
            return Ok(StorageResponse::not_found());
        }
        self.store(&entity);
        Ok(StorageResponse::success(entity))
    }

    async fn delete(
        &self,
        key: &K,
        _context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        match self.entities.remove(&self.transform.cache_key(key)) {
            Some((_, (_, version))) => Ok(StorageResponse::key_success(
                self.transform.key_to_string(key),
                version,
            )),
            None => Ok(StorageResponse::not_found()),
        }
    }

    async fn delete_by_ref(
        &self,
        reference: &(String, String),
        _context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let Some(address) = self.address_of_reference(reference) else {
            return Ok(StorageResponse::not_found());
        };
        match self.entities.remove(&address) {
            Some((_, (entity, version))) => {
                let key = self.transform.key_for(&entity);
                Ok(StorageResponse::key_success(
                    self.transform.key_to_string(&key),
                    version,
                ))
            }
            None => Ok(StorageResponse::not_found()),
        }
    }

    async fn version(
        &self,
        key: &K,
        _context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        match self.entities.get(&self.transform.cache_key(key)) {
            Some(entry) => Ok(StorageResponse::key_success(
                self.transform.key_to_string(key),
                entry.value().1.clone(),
            )),
            None => Ok(StorageResponse::not_found()),
        }
    }

    async fn version_by_ref(
        &self,
        reference: &(String, String),
        _context: &OperationContext,
    ) -> Result<StorageResponse<E>, PersistenceError> {
        let Some(address) = self.address_of_reference(reference) else {
            return Ok(StorageResponse::not_found());
        };
        match self.entities.get(&address) {
            Some(entry) => {
                let key = self.transform.key_for(&entry.value().0);
                Ok(StorageResponse::key_success(
                    self.transform.key_to_string(&key),
                    entry.value().1.clone(),
                ))
            }
            None => Ok(StorageResponse::not_found()),
        }
    }
}
