//! Tenant-isolated data access.
//!
//! # Data Flow
//! ```text
//! handler (holds SecurityContext)
//!     → secure.rs (SecureStore: owner predicate injected, ownership
//!                  re-affirmed inside every mutation, outcome audited)
//!     → RecordStore<R> (persistence collaborator; memory.rs in-process)
//! ```
//!
//! # Design Decisions
//! - Stores only ever receive owner-scoped requests (`ScopedQuery`,
//!   `*_owned` mutations); there is no unscoped read returning records
//! - "Missing" and "owned by someone else" collapse into one not-found
//!   signal at the `SecureStore` boundary
//! - No cross-kind joins at this layer

pub mod memory;
pub mod query;
pub mod resource;
pub mod secure;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::security::identity::Identity;

pub use memory::InMemoryStore;
pub use query::{Condition, Direction, Filter, OrderBy, Patch, ScopedQuery};
pub use resource::{
    JobDraft, JobStatus, ProcessingJob, Resource, ResourceId, StoreRegistry, Upload, UploadDraft,
    UploadStatus, Video, VideoDraft, VideoStatus,
};
pub use secure::{QueryError, SecureStore};

/// Errors raised by a persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Transient; the caller may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record {0} already exists")]
    Conflict(ResourceId),

    #[error("record could not be (de)serialized: {0}")]
    InvalidRecord(String),
}

/// Persistence collaborator for one resource kind.
///
/// Every method is owner-scoped except [`RecordStore::owner_of`], which
/// reveals only the owner of an id and is used to classify denials for the
/// audit trail. Each call must be atomic in the backing store; in
/// particular `update_owned`/`delete_owned` must check the owner in the
/// same operation that mutates the row.
#[async_trait]
pub trait RecordStore<R: Resource>: Send + Sync {
    async fn select(&self, query: ScopedQuery<'_>) -> Result<Vec<R>, StoreError>;

    async fn select_one(&self, owner: &Identity, id: &ResourceId) -> Result<Option<R>, StoreError>;

    async fn insert(&self, record: R) -> Result<(), StoreError>;

    async fn update_owned(
        &self,
        owner: &Identity,
        id: &ResourceId,
        patch: &Patch,
        now: DateTime<Utc>,
    ) -> Result<Option<R>, StoreError>;

    async fn delete_owned(&self, owner: &Identity, id: &ResourceId) -> Result<Option<R>, StoreError>;

    async fn owner_of(&self, id: &ResourceId) -> Result<Option<Identity>, StoreError>;
}
