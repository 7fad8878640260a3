//! Tenant-owned business records.
//!
//! Each kind implements [`Resource`] once; the implementation names its
//! kind tag, its owner, which fields callers may patch and where its
//! backing store lives in the [`StoreRegistry`]. Adding a kind means adding
//! a type here and a registry slot, both checked by the compiler.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::security::context::ResourceKind;
use crate::security::identity::Identity;
use crate::store::memory::InMemoryStore;
use crate::store::query::Patch;
use crate::store::{RecordStore, StoreError};

/// Serialized name of the owner field on every record.
pub const OWNER_FIELD: &str = "owner_id";

/// Serialized name of the id field on every record.
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ResourceKind;

    /// Fields a caller-supplied [`Patch`] may set.
    const MUTABLE_FIELDS: &'static [&'static str];

    /// Client payload for creation.
    type Draft: DeserializeOwned + Send + 'static;

    fn id(&self) -> &ResourceId;

    fn owner(&self) -> &Identity;

    fn created_at(&self) -> DateTime<Utc>;

    fn from_draft(id: ResourceId, owner: Identity, draft: Self::Draft, now: DateTime<Utc>) -> Self;

    fn set_updated_at(&mut self, now: DateTime<Utc>);

    /// Backing store for this kind.
    fn store(registry: &StoreRegistry) -> &Arc<dyn RecordStore<Self>>;

    /// Returns a copy with `patch` applied and `updated_at` bumped.
    ///
    /// Field names must already have been checked against `MUTABLE_FIELDS`.
    fn patched(&self, patch: &Patch, now: DateTime<Utc>) -> Result<Self, StoreError> {
        let mut value = serde_json::to_value(self).map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
        if let Some(object) = value.as_object_mut() {
            for (field, new_value) in patch.fields() {
                object.insert(field.clone(), new_value.clone());
            }
        }
        let mut updated: Self =
            serde_json::from_value(value).map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
        updated.set_updated_at(now);
        Ok(updated)
    }
}

/// One store per resource kind, wired at startup.
#[derive(Clone)]
pub struct StoreRegistry {
    pub videos: Arc<dyn RecordStore<Video>>,
    pub uploads: Arc<dyn RecordStore<Upload>>,
    pub jobs: Arc<dyn RecordStore<ProcessingJob>>,
}

impl StoreRegistry {
    pub fn in_memory() -> Self {
        Self {
            videos: Arc::new(InMemoryStore::<Video>::new()),
            uploads: Arc::new(InMemoryStore::<Upload>::new()),
            jobs: Arc::new(InMemoryStore::<ProcessingJob>::new()),
        }
    }
}

// =============================================================================
// Video
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Draft,
    Ready,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: ResourceId,
    #[serde(rename = "owner_id")]
    pub owner: Identity,
    pub title: String,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub duration_secs: Option<u32>,
    pub status: VideoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
}

impl Resource for Video {
    const KIND: ResourceKind = ResourceKind::Video;
    const MUTABLE_FIELDS: &'static [&'static str] =
        &["title", "description", "source_url", "duration_secs", "status"];
    type Draft = VideoDraft;

    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn owner(&self) -> &Identity {
        &self.owner
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn from_draft(id: ResourceId, owner: Identity, draft: VideoDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            title: draft.title,
            description: draft.description,
            source_url: draft.source_url,
            duration_secs: draft.duration_secs,
            status: VideoStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    fn set_updated_at(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn store(registry: &StoreRegistry) -> &Arc<dyn RecordStore<Self>> {
        &registry.videos
    }
}

// =============================================================================
// Upload
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: ResourceId,
    #[serde(rename = "owner_id")]
    pub owner: Identity,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadDraft {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl Resource for Upload {
    const KIND: ResourceKind = ResourceKind::Upload;
    const MUTABLE_FIELDS: &'static [&'static str] = &["file_name", "status"];
    type Draft = UploadDraft;

    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn owner(&self) -> &Identity {
        &self.owner
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn from_draft(id: ResourceId, owner: Identity, draft: UploadDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            file_name: draft.file_name,
            content_type: draft.content_type,
            size_bytes: draft.size_bytes,
            status: UploadStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn set_updated_at(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn store(registry: &StoreRegistry) -> &Arc<dyn RecordStore<Self>> {
        &registry.uploads
    }
}

// =============================================================================
// Processing job
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// A transcoding run handed to the external workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: ResourceId,
    #[serde(rename = "owner_id")]
    pub owner: Identity,
    pub video_id: Option<ResourceId>,
    pub preset: String,
    pub status: JobStatus,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobDraft {
    #[serde(default)]
    pub video_id: Option<ResourceId>,
    pub preset: String,
}

impl Resource for ProcessingJob {
    const KIND: ResourceKind = ResourceKind::Job;
    const MUTABLE_FIELDS: &'static [&'static str] = &["status", "output_url", "error"];
    type Draft = JobDraft;

    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn owner(&self) -> &Identity {
        &self.owner
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn from_draft(id: ResourceId, owner: Identity, draft: JobDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            video_id: draft.video_id,
            preset: draft.preset,
            status: JobStatus::Queued,
            output_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn set_updated_at(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn store(registry: &StoreRegistry) -> &Arc<dyn RecordStore<Self>> {
        &registry.jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn video() -> Video {
        Video::from_draft(
            ResourceId::new("v1"),
            Identity::new("u1"),
            VideoDraft {
                title: "Launch".into(),
                description: None,
                source_url: None,
                duration_secs: Some(90),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_owner_serialized_as_owner_id() {
        let value = serde_json::to_value(video()).unwrap();
        assert_eq!(value[OWNER_FIELD], json!("u1"));
        assert_eq!(value[ID_FIELD], json!("v1"));
    }

    #[test]
    fn test_patched_applies_fields() {
        let original = video();
        let later = original.created_at + chrono::Duration::seconds(5);
        let patch = Patch::new().set("title", json!("Relaunch")).set("status", json!("ready"));

        let updated = original.patched(&patch, later).unwrap();
        assert_eq!(updated.title, "Relaunch");
        assert_eq!(updated.status, VideoStatus::Ready);
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.owner, original.owner);
    }

    #[test]
    fn test_patched_rejects_wrong_types() {
        let patch = Patch::new().set("duration_secs", json!("long"));
        assert!(matches!(video().patched(&patch, Utc::now()), Err(StoreError::InvalidRecord(_))));
    }
}
