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

use std::sync::Arc;

/// Extracts an entity's version string, when the entity type is versioned.
pub struct VersionPolicy<E> {
    supports_versioning: bool,
    entity_version: Option<Arc<dyn Fn(&E) -> String + Send + Sync>>,
}

impl<E> Default for VersionPolicy<E> {
    fn default() -> Self {
        Self {
            supports_versioning: false,
            entity_version: None,
        }
    }
}

impl<E> Clone for VersionPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            supports_versioning: self.supports_versioning,
            entity_version: self.entity_version.clone(),
        }
    }
}

impl<E> VersionPolicy<E> {
    /// Creates a versioning policy around the given extractor.
    pub fn new(entity_version: impl Fn(&E) -> String + Send + Sync + 'static) -> Self {
        Self {
            supports_versioning: true,
            entity_version: Some(Arc::new(entity_version)),
        }
    }

    /// Whether this entity type carries versions at all.
    #[must_use]
    pub fn supports_versioning(&self) -> bool {
        self.supports_versioning
    }

    /// The entity's version string, when versioning is supported.
    #[must_use]
    pub fn version_of(&self, entity: &E) -> Option<String> {
        self.entity_version.as_ref().map(|extract| extract(entity))
    }
}

/// Manages the key and reference transforms for one entity type.
///
/// The transform names the entity, derives its key, serializes keys for
/// storage and cache addressing, and extracts the reference tuples used by
/// the by-reference operations. Storage and cache collaborators address
/// entities through the same transform, which is what keeps them coherent.
pub struct EntityTransform<K, E> {
    entity_name: String,
    key_maker: Arc<dyn Fn(&E) -> K + Send + Sync>,
    key_serializer: Arc<dyn Fn(&K) -> String + Send + Sync>,
    key_deserializer: Option<Arc<dyn Fn(&str) -> Option<K> + Send + Sync>>,
    reference_maker: Arc<dyn Fn(&E) -> Vec<(String, String)> + Send + Sync>,
    version: VersionPolicy<E>,
}

impl<K, E> Clone for EntityTransform<K, E> {
    fn clone(&self) -> Self {
        Self {
            entity_name: self.entity_name.clone(),
            key_maker: self.key_maker.clone(),
            key_serializer: self.key_serializer.clone(),
            key_deserializer: self.key_deserializer.clone(),
            reference_maker: self.reference_maker.clone(),
            version: self.version.clone(),
        }
    }
}

impl<K, E> EntityTransform<K, E>
where
    K: std::fmt::Display,
{
    /// Creates a transform with the default key serializer (`Display`),
    /// no key deserializer, no references and no versioning.
    pub fn new(
        entity_name: impl Into<String>,
        key_maker: impl Fn(&E) -> K + Send + Sync + 'static,
    ) -> Self {
        Self {
            entity_name: entity_name.into().to_lowercase(),
            key_maker: Arc::new(key_maker),
            key_serializer: Arc::new(|key: &K| key.to_string()),
            key_deserializer: None,
            reference_maker: Arc::new(|_| Vec::new()),
            version: VersionPolicy::default(),
        }
    }
}

impl<K, E> EntityTransform<K, E> {
    /// Overrides the key serializer.
    #[must_use]
    pub fn with_key_serializer(
        mut self,
        key_serializer: impl Fn(&K) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_serializer = Arc::new(key_serializer);
        self
    }

    /// Sets the key deserializer used to invalidate cache entries from a
    /// by-reference delete.
    #[must_use]
    pub fn with_key_deserializer(
        mut self,
        key_deserializer: impl Fn(&str) -> Option<K> + Send + Sync + 'static,
    ) -> Self {
        self.key_deserializer = Some(Arc::new(key_deserializer));
        self
    }

    /// Sets the reference maker returning the entity's reference tuples.
    #[must_use]
    pub fn with_reference_maker(
        mut self,
        reference_maker: impl Fn(&E) -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        self.reference_maker = Arc::new(reference_maker);
        self
    }

    /// Sets the version policy.
    #[must_use]
    pub fn with_version_policy(mut self, version: VersionPolicy<E>) -> Self {
        self.version = version;
        self
    }

    /// The lowercased entity name, used for dispatch and cache addressing.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Derives the key for an entity.
    #[must_use]
    pub fn key_for(&self, entity: &E) -> K {
        (self.key_maker)(entity)
    }

    /// Serializes a key.
    #[must_use]
    pub fn key_to_string(&self, key: &K) -> String {
        (self.key_serializer)(key)
    }

    /// Deserializes a key, when a deserializer is configured.
    #[must_use]
    pub fn key_from_string(&self, raw: &str) -> Option<K> {
        self.key_deserializer
            .as_ref()
            .and_then(|deserialize| deserialize(raw))
    }

    /// The entity's reference tuples.
    #[must_use]
    pub fn references(&self, entity: &E) -> Vec<(String, String)> {
        (self.reference_maker)(entity)
    }

    /// The version policy.
    #[must_use]
    pub fn version(&self) -> &VersionPolicy<E> {
        &self.version
    }

    /// The storage/cache address of a key: `entity:key`.
    #[must_use]
    pub fn cache_key(&self, key: &K) -> String {
        format!("{}:{}", self.entity_name, (self.key_serializer)(key))
    }

    /// The storage/cache address of a reference tuple:
    /// `entity:ref:type=value`. Reference types compare case-insensitively.
    #[must_use]
    pub fn reference_cache_key(&self, reference: &(String, String)) -> String {
        format!(
            "{}:ref:{}={}",
            self.entity_name,
            reference.0.to_lowercase(),
            reference.1
        )
    }
}

impl<K, E> std::fmt::Debug for EntityTransform<K, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityTransform")
            .field("entity_name", &self.entity_name)
            .field("supports_versioning", &self.version.supports_versioning())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Account {
        id: u64,
        email: String,
        revision: u32,
    }

    fn transform() -> EntityTransform<u64, Account> {
        EntityTransform::new("Account", |account: &Account| account.id)
            .with_key_deserializer(|raw| raw.parse().ok())
            .with_reference_maker(|account: &Account| {
                vec![("email".to_string(), account.email.clone())]
            })
            .with_version_policy(VersionPolicy::new(|account: &Account| {
                account.revision.to_string()
            }))
    }

    #[test]
    fn entity_name_is_lowercased() {
        assert_eq!(transform().entity_name(), "account");
    }

    #[test]
    fn cache_keys_combine_entity_and_key() {
        let transform = transform();
        assert_eq!(transform.cache_key(&42), "account:42");
        assert_eq!(
            transform.reference_cache_key(&("Email".into(), "a@b.c".into())),
            "account:ref:email=a@b.c"
        );
    }

    #[test]
    fn version_policy_extracts_the_revision() {
        let account = Account {
            id: 1,
            email: "a@b.c".into(),
            revision: 9,
        };
        let transform = transform();
        assert_eq!(transform.version().version_of(&account).as_deref(), Some("9"));
        assert_eq!(transform.key_from_string("17"), Some(17));
    }
}
