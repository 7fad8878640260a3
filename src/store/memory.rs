//! In-process record store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::security::identity::Identity;
use crate::store::query::{compare_values, Direction, Patch, ScopedQuery};
use crate::store::resource::{Resource, ResourceId};
use crate::store::{RecordStore, StoreError};

/// Vector-backed store; insertion order is the natural order.
///
/// A single `RwLock` makes every call atomic, including the owner check
/// inside `update_owned` and `delete_owned`.
#[derive(Debug)]
pub struct InMemoryStore<R> {
    records: RwLock<Vec<R>>,
    available: AtomicBool,
}

impl<R: Resource> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> InMemoryStore<R> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage; every call fails with `Unavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Unscoped snapshot for tests and fixtures.
    pub fn snapshot(&self) -> Vec<R> {
        self.records.read().clone()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} store offline", R::KIND)))
        }
    }
}

fn is_owned<R: Resource>(record: &R, owner: &Identity, id: &ResourceId) -> bool {
    record.id() == id && record.owner() == owner
}

#[async_trait]
impl<R: Resource> RecordStore<R> for InMemoryStore<R> {
    async fn select(&self, query: ScopedQuery<'_>) -> Result<Vec<R>, StoreError> {
        self.ensure_available()?;

        let records = self.records.read();
        let mut rows = Vec::new();
        for record in records.iter() {
            let value = serde_json::to_value(record).map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
            if query.matches(&value) {
                rows.push((value, record.clone()));
            }
        }
        drop(records);

        if let Some(order) = &query.filter().order {
            rows.sort_by(|(a, _), (b, _)| {
                let ord = compare_values(
                    a.get(&order.field).unwrap_or(&serde_json::Value::Null),
                    b.get(&order.field).unwrap_or(&serde_json::Value::Null),
                );
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        let limit = query.filter().limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().take(limit).map(|(_, r)| r).collect())
    }

    async fn select_one(&self, owner: &Identity, id: &ResourceId) -> Result<Option<R>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .records
            .read()
            .iter()
            .find(|r| is_owned(*r, owner, id))
            .cloned())
    }

    async fn insert(&self, record: R) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut records = self.records.write();
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(StoreError::Conflict(record.id().clone()));
        }
        records.push(record);
        Ok(())
    }

    async fn update_owned(
        &self,
        owner: &Identity,
        id: &ResourceId,
        patch: &Patch,
        now: DateTime<Utc>,
    ) -> Result<Option<R>, StoreError> {
        self.ensure_available()?;
        let mut records = self.records.write();
        let Some(slot) = records.iter_mut().find(|r| is_owned(&**r, owner, id)) else {
            return Ok(None);
        };
        let updated = slot.patched(patch, now)?;
        *slot = updated.clone();
        Ok(Some(updated))
    }

    async fn delete_owned(&self, owner: &Identity, id: &ResourceId) -> Result<Option<R>, StoreError> {
        self.ensure_available()?;
        let mut records = self.records.write();
        let position = records.iter().position(|r| is_owned(r, owner, id));
        Ok(position.map(|i| records.remove(i)))
    }

    async fn owner_of(&self, id: &ResourceId) -> Result<Option<Identity>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .records
            .read()
            .iter()
            .find(|r| r.id() == id)
            .map(|r| r.owner().clone()))
    }
}
