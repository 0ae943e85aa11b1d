use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Which resource a request addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub project_name: String,
    pub resource_name: String,
}

impl ResourceInfo {
    pub fn new(project_name: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            resource_name: resource_name.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub resource_info: ResourceInfo,
    pub document: Value,
    /// Used only when the upsert inserts a new document.
    pub document_uuid: Uuid,
    pub trace_id: String,
}

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub resource_info: ResourceInfo,
    pub document_uuid: Uuid,
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub resource_info: ResourceInfo,
    pub document_uuid: Uuid,
    pub document: Value,
    pub trace_id: String,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub resource_info: ResourceInfo,
    pub document_uuid: Uuid,
    pub trace_id: String,
}

/// Exact-match filters on top-level document fields, with paging.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub resource_info: ResourceInfo,
    pub filters: Vec<(String, String)>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub total_count: bool,
}

impl QueryRequest {
    pub fn new(resource_info: ResourceInfo) -> Self {
        Self {
            resource_info,
            filters: Vec::new(),
            offset: None,
            limit: None,
            total_count: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UpsertResult {
    InsertSuccess { document_uuid: Uuid },
    UpdateSuccess { document_uuid: Uuid },
    /// Names of the resources whose references could not be resolved.
    UpsertFailureReference { invalid_references: Vec<String> },
    UpsertFailureIdentityConflict { resource_name: String, identity: String },
    UpsertFailureWriteConflict,
    UnknownFailure { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GetResult {
    GetSuccess {
        document_uuid: Uuid,
        document: Value,
        last_modified_date: DateTime<Utc>,
    },
    GetFailureNotExists,
    UnknownFailure { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UpdateResult {
    UpdateSuccess { document_uuid: Uuid },
    UpdateFailureNotExists,
    UpdateFailureReference { invalid_references: Vec<String> },
    UpdateFailureIdentityConflict { resource_name: String, identity: String },
    UpdateFailureWriteConflict,
    UpdateFailureImmutableIdentity { message: String },
    UnknownFailure { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeleteResult {
    DeleteSuccess,
    DeleteFailureNotExists,
    DeleteFailureReference { referencing_resource_names: Vec<String> },
    DeleteFailureWriteConflict,
    UnknownFailure { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryResult {
    QuerySuccess {
        documents: Vec<Value>,
        total_count: Option<u64>,
    },
    UnknownFailure { message: String },
}

/// Result variants the store may ask to retry.
pub trait StoreOutcome {
    fn is_write_conflict(&self) -> bool;
}

impl StoreOutcome for UpsertResult {
    fn is_write_conflict(&self) -> bool {
        matches!(self, UpsertResult::UpsertFailureWriteConflict)
    }
}

impl StoreOutcome for GetResult {
    fn is_write_conflict(&self) -> bool {
        false
    }
}

impl StoreOutcome for UpdateResult {
    fn is_write_conflict(&self) -> bool {
        matches!(self, UpdateResult::UpdateFailureWriteConflict)
    }
}

impl StoreOutcome for DeleteResult {
    fn is_write_conflict(&self) -> bool {
        matches!(self, DeleteResult::DeleteFailureWriteConflict)
    }
}

impl StoreOutcome for QueryResult {
    fn is_write_conflict(&self) -> bool {
        false
    }
}

/// Backend operations on documents. Expected failures are result variants;
/// `Err` is reserved for unexpected backend errors.
#[async_trait]
pub trait DocumentStoreRepository: Send + Sync {
    async fn upsert_document(&self, request: &UpsertRequest) -> Result<UpsertResult>;
    async fn get_document_by_id(&self, request: &GetRequest) -> Result<GetResult>;
    async fn update_document_by_id(&self, request: &UpdateRequest) -> Result<UpdateResult>;
    async fn delete_document_by_id(&self, request: &DeleteRequest) -> Result<DeleteResult>;
    async fn query_documents(&self, request: &QueryRequest) -> Result<QueryResult>;
}
