//! Transactional resources
//!
//! A resource is any participant that buffered writes for a transaction and
//! must be told once that transaction is durably committed. The coordinator
//! only knows resources by [`ResourceId`]; a [`ResourceDirectory`] turns ids
//! into callable handles at checkpoint time.

use dashmap::DashMap;
use meridian_core::{ResourceId, Result, TransactionId};
use std::sync::Arc;

/// A participant that receives commit notifications
///
/// `commit` may be called more than once for the same transaction id (after
/// a failed checkpoint or a restart) and must be idempotent. It is also
/// called with the highest committed id touching the resource in a batch,
/// which covers every lower id in that batch.
pub trait TransactionalResource: Send + Sync {
    /// Make the effects of every transaction up to `transaction_id` final
    fn commit(&self, transaction_id: TransactionId) -> Result<()>;
}

/// Resolves resource ids to live resources
pub trait ResourceDirectory: Send + Sync {
    /// `None` if no resource is registered under `resource`
    fn resolve(&self, resource: &ResourceId) -> Option<Arc<dyn TransactionalResource>>;
}

/// Concurrent registry of resources, the default [`ResourceDirectory`]
#[derive(Default)]
pub struct ResourceRegistry {
    resources: DashMap<ResourceId, Arc<dyn TransactionalResource>>,
}

impl ResourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the resource under `id`
    pub fn register(
        &self,
        id: impl Into<ResourceId>,
        resource: Arc<dyn TransactionalResource>,
    ) -> Option<Arc<dyn TransactionalResource>> {
        self.resources.insert(id.into(), resource)
    }

    /// Remove the resource under `id`
    pub fn unregister(&self, id: &ResourceId) -> Option<Arc<dyn TransactionalResource>> {
        self.resources.remove(id).map(|(_, resource)| resource)
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceDirectory for ResourceRegistry {
    fn resolve(&self, resource: &ResourceId) -> Option<Arc<dyn TransactionalResource>> {
        self.resources
            .get(resource)
            .map(|entry| Arc::clone(entry.value()))
    }
}
