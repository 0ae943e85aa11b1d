use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authorization::{AuthorizationRepository, DocumentSecurityElements};
use crate::cascade::{CascadeRequest, UpdateCascadeHandler};
use crate::error::{DmsError, Result};
use crate::schema::{
    extract_document_identity, extract_document_references, referential_ids_for, ApiSchemaDocuments,
    DocumentIdentity, DocumentReference, ReferentialId, ResourceRef, SchemaProvider,
};

use super::repository::{
    DeleteRequest, DeleteResult, DocumentStoreRepository, GetRequest, GetResult, QueryRequest, QueryResult,
    ResourceInfo, UpdateRequest, UpdateResult, UpsertRequest, UpsertResult,
};

const DOCUMENT_COLUMNS: &str =
    "d.id, d.partition_key, d.document_uuid, d.project_name, d.resource_name, d.edfi_doc, d.last_modified_at";

/// Document store on SQLite. Also answers relationship lookups for the
/// relationship-based authorization strategies, from rows derived as
/// documents are written.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    schemas: Arc<SchemaProvider>,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool, schemas: Arc<SchemaProvider>) -> Self {
        Self { pool, schemas }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upsert(&self, request: &UpsertRequest) -> Result<UpsertResult> {
        let snapshot = self.schemas.current();
        let schemas = snapshot.documents.as_ref();
        let info = &request.resource_info;
        let Some(resource) = schemas.find_resource(&info.project_name, &info.resource_name) else {
            return Ok(UpsertResult::UnknownFailure {
                message: unknown_resource(info),
            });
        };

        let body = without_id(&request.document);
        let prepared = match PreparedDocument::new(schemas, &resource, &body) {
            Ok(prepared) => prepared,
            Err(DmsError::Schema(message)) => return Ok(UpsertResult::UnknownFailure { message }),
            Err(e) => return Err(e),
        };

        let mut tx = self.pool.begin().await?;

        let invalid_references = unresolved_references(&mut tx, &prepared.references).await?;
        if !invalid_references.is_empty() {
            return Ok(UpsertResult::UpsertFailureReference { invalid_references });
        }

        let now = Utc::now();
        let result = match find_by_referential_id(&mut tx, &prepared.own_referential_id()).await? {
            Some(existing) => {
                write_document(&mut tx, existing.id, &body, now, &request.trace_id).await?;
                write_references(&mut tx, existing.id, &prepared.references).await?;
                write_relationships(&mut tx, existing.id, &prepared.relationships).await?;
                UpsertResult::UpdateSuccess {
                    document_uuid: existing.document_uuid,
                }
            }
            None => {
                for (referential_id, _) in &prepared.aliases {
                    if alias_owner(&mut tx, referential_id).await?.is_some() {
                        return Ok(UpsertResult::UpsertFailureIdentityConflict {
                            resource_name: info.resource_name.clone(),
                            identity: prepared.identity.to_string(),
                        });
                    }
                }

                let document_id = sqlx::query(
                    "INSERT INTO documents (partition_key, document_uuid, project_name, resource_name, is_descriptor, edfi_doc, created_at, last_modified_at, last_modified_trace_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
                )
                .bind(i64::from(partition_key(&request.document_uuid)))
                .bind(request.document_uuid.to_string())
                .bind(&info.project_name)
                .bind(&info.resource_name)
                .bind(resource.schema.is_descriptor)
                .bind(body.to_string())
                .bind(now.to_rfc3339())
                .bind(&request.trace_id)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();

                write_aliases(&mut tx, document_id, &prepared.aliases).await?;
                write_references(&mut tx, document_id, &prepared.references).await?;
                write_relationships(&mut tx, document_id, &prepared.relationships).await?;
                UpsertResult::InsertSuccess {
                    document_uuid: request.document_uuid,
                }
            }
        };

        tx.commit().await?;
        debug!(
            resource = %info.resource_name,
            trace_id = %request.trace_id,
            ?result,
            "upserted document"
        );
        Ok(result)
    }

    async fn get(&self, request: &GetRequest) -> Result<GetResult> {
        let mut conn = self.pool.acquire().await?;
        match find_by_uuid(&mut conn, request.document_uuid).await? {
            Some(stored) if stored.is(&request.resource_info) => Ok(GetResult::GetSuccess {
                document_uuid: stored.document_uuid,
                document: with_id(stored.document, stored.document_uuid),
                last_modified_date: stored.last_modified_at,
            }),
            _ => Ok(GetResult::GetFailureNotExists),
        }
    }

    async fn update(&self, request: &UpdateRequest) -> Result<UpdateResult> {
        let snapshot = self.schemas.current();
        let schemas = &snapshot.documents;
        let info = &request.resource_info;
        let Some(resource) = schemas.find_resource(&info.project_name, &info.resource_name) else {
            return Ok(UpdateResult::UnknownFailure {
                message: unknown_resource(info),
            });
        };

        let body = without_id(&request.document);
        let prepared = match PreparedDocument::new(schemas, &resource, &body) {
            Ok(prepared) => prepared,
            Err(DmsError::Schema(message)) => return Ok(UpdateResult::UnknownFailure { message }),
            Err(e) => return Err(e),
        };

        let mut tx = self.pool.begin().await?;

        let existing = match find_by_uuid(&mut tx, request.document_uuid).await? {
            Some(existing) if existing.is(info) => existing,
            _ => return Ok(UpdateResult::UpdateFailureNotExists),
        };

        let invalid_references = unresolved_references(&mut tx, &prepared.references).await?;
        if !invalid_references.is_empty() {
            return Ok(UpdateResult::UpdateFailureReference { invalid_references });
        }

        let original_identity = extract_document_identity(&resource, &existing.document)?;
        let identity_changed = original_identity != prepared.identity;
        if identity_changed {
            if !resource.schema.allow_identity_updates {
                return Ok(UpdateResult::UpdateFailureImmutableIdentity {
                    message: format!(
                        "Identifying values for the {} resource cannot be changed. Delete and recreate the resource item instead.",
                        info.resource_name
                    ),
                });
            }
            for (referential_id, _) in &prepared.aliases {
                match alias_owner(&mut tx, referential_id).await? {
                    Some(owner) if owner != existing.id => {
                        return Ok(UpdateResult::UpdateFailureIdentityConflict {
                            resource_name: info.resource_name.clone(),
                            identity: prepared.identity.to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }

        let now = Utc::now();
        write_document(&mut tx, existing.id, &body, now, &request.trace_id).await?;
        write_references(&mut tx, existing.id, &prepared.references).await?;
        write_relationships(&mut tx, existing.id, &prepared.relationships).await?;

        if identity_changed {
            write_aliases(&mut tx, existing.id, &prepared.aliases).await?;
            let change = IdentityChange {
                project_name: info.project_name.clone(),
                resource_name: info.resource_name.clone(),
                old_referential_ids: referential_ids_for(&resource, &original_identity)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect(),
                original: existing.document,
                modified: body,
            };
            let cascaded = cascade_identity_change(&mut tx, schemas, change, now, &request.trace_id).await?;
            info!(
                resource = %info.resource_name,
                document_uuid = %request.document_uuid,
                cascaded,
                "identity updated"
            );
        }

        tx.commit().await?;
        Ok(UpdateResult::UpdateSuccess {
            document_uuid: request.document_uuid,
        })
    }

    async fn delete(&self, request: &DeleteRequest) -> Result<DeleteResult> {
        let mut tx = self.pool.begin().await?;

        let existing = match find_by_uuid(&mut tx, request.document_uuid).await? {
            Some(existing) if existing.is(&request.resource_info) => existing,
            _ => return Ok(DeleteResult::DeleteFailureNotExists),
        };

        let rows = sqlx::query(
            "SELECT DISTINCT d.resource_name FROM aliases a
             JOIN document_references r ON r.referenced_referential_id = a.referential_id
             JOIN documents d ON d.id = r.referencing_document_id
             WHERE a.document_id = ?1 AND d.id != ?1
             ORDER BY d.resource_name",
        )
        .bind(existing.id)
        .fetch_all(&mut *tx)
        .await?;
        if !rows.is_empty() {
            return Ok(DeleteResult::DeleteFailureReference {
                referencing_resource_names: rows.iter().map(|r| r.get("resource_name")).collect(),
            });
        }

        for statement in [
            "DELETE FROM edorg_relationships WHERE source_document_id = ?1",
            "DELETE FROM document_references WHERE referencing_document_id = ?1",
            "DELETE FROM aliases WHERE document_id = ?1",
            "DELETE FROM documents WHERE id = ?1",
        ] {
            sqlx::query(statement).bind(existing.id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(
            resource = %request.resource_info.resource_name,
            document_uuid = %request.document_uuid,
            trace_id = %request.trace_id,
            "deleted document"
        );
        Ok(DeleteResult::DeleteSuccess)
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryResult> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents d
             WHERE d.project_name = ?1 AND d.resource_name = ?2
             ORDER BY d.id"
        ))
        .bind(&request.resource_info.project_name)
        .bind(&request.resource_info.resource_name)
        .fetch_all(&self.pool)
        .await?;

        let mut matching = Vec::new();
        for row in &rows {
            let stored = row_to_document(row)?;
            if request
                .filters
                .iter()
                .all(|(field, expected)| field_matches(&stored.document, field, expected))
            {
                matching.push(with_id(stored.document, stored.document_uuid));
            }
        }

        let total_count = request.total_count.then_some(matching.len() as u64);
        let offset = request.offset.unwrap_or(0) as usize;
        let limit = request.limit.map_or(usize::MAX, |l| l as usize);
        let documents = matching.into_iter().skip(offset).take(limit).collect();
        Ok(QueryResult::QuerySuccess { documents, total_count })
    }

    async fn education_organizations_for(&self, person_type: &str, unique_id: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT DISTINCT education_organization_id FROM edorg_relationships
             WHERE person_type = ?1 AND unique_id = ?2
             ORDER BY education_organization_id",
        )
        .bind(person_type)
        .bind(unique_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("education_organization_id")).collect())
    }
}

#[async_trait]
impl DocumentStoreRepository for SqliteDocumentStore {
    async fn upsert_document(&self, request: &UpsertRequest) -> Result<UpsertResult> {
        match self.upsert(request).await {
            Err(e) if is_write_conflict(&e) => {
                warn!(trace_id = %request.trace_id, error = %e, "upsert write conflict");
                Ok(UpsertResult::UpsertFailureWriteConflict)
            }
            other => other,
        }
    }

    async fn get_document_by_id(&self, request: &GetRequest) -> Result<GetResult> {
        self.get(request).await
    }

    async fn update_document_by_id(&self, request: &UpdateRequest) -> Result<UpdateResult> {
        match self.update(request).await {
            Err(e) if is_write_conflict(&e) => {
                warn!(trace_id = %request.trace_id, error = %e, "update write conflict");
                Ok(UpdateResult::UpdateFailureWriteConflict)
            }
            other => other,
        }
    }

    async fn delete_document_by_id(&self, request: &DeleteRequest) -> Result<DeleteResult> {
        match self.delete(request).await {
            Err(e) if is_write_conflict(&e) => {
                warn!(trace_id = %request.trace_id, error = %e, "delete write conflict");
                Ok(DeleteResult::DeleteFailureWriteConflict)
            }
            other => other,
        }
    }

    async fn query_documents(&self, request: &QueryRequest) -> Result<QueryResult> {
        self.query(request).await
    }
}

#[async_trait]
impl AuthorizationRepository for SqliteDocumentStore {
    async fn get_education_organizations_for_student(&self, student_unique_id: &str) -> Result<Vec<i64>> {
        self.education_organizations_for("Student", student_unique_id).await
    }

    async fn get_education_organizations_for_contact(&self, contact_unique_id: &str) -> Result<Vec<i64>> {
        self.education_organizations_for("Contact", contact_unique_id).await
    }

    async fn get_education_organizations_for_staff(&self, staff_unique_id: &str) -> Result<Vec<i64>> {
        self.education_organizations_for("Staff", staff_unique_id).await
    }
}

// -- Derived document data --

struct Relationship {
    person_type: &'static str,
    unique_id: String,
    education_organization_id: i64,
}

/// Everything a write derives from the document body.
struct PreparedDocument {
    identity: DocumentIdentity,
    aliases: Vec<(ReferentialId, String)>,
    references: Vec<DocumentReference>,
    relationships: Vec<Relationship>,
}

impl PreparedDocument {
    fn new(schemas: &ApiSchemaDocuments, resource: &ResourceRef<'_>, document: &Value) -> Result<Self> {
        let identity = extract_document_identity(resource, document)?;
        Ok(Self {
            aliases: referential_ids_for(resource, &identity),
            references: extract_document_references(schemas, resource, document)?,
            relationships: relationships_of(resource, document)?,
            identity,
        })
    }

    fn own_referential_id(&self) -> ReferentialId {
        self.aliases[0].0
    }
}

/// Person to education organization pairs a document establishes, e.g. a
/// StudentSchoolAssociation relates its student to its school.
fn relationships_of(resource: &ResourceRef<'_>, document: &Value) -> Result<Vec<Relationship>> {
    let elements = DocumentSecurityElements::extract(resource.schema, document)?;
    let mut relationships = Vec::new();
    for edorg in &elements.education_organization {
        for (person_type, unique_ids) in [
            ("Student", &elements.student),
            ("Contact", &elements.contact),
            ("Staff", &elements.staff),
        ] {
            relationships.extend(unique_ids.iter().map(|unique_id| Relationship {
                person_type,
                unique_id: unique_id.clone(),
                education_organization_id: edorg.id,
            }));
        }
    }
    Ok(relationships)
}

/// An identity change whose referencing documents still need rewriting.
struct IdentityChange {
    project_name: String,
    resource_name: String,
    old_referential_ids: Vec<ReferentialId>,
    original: Value,
    modified: Value,
}

/// Rewrite every document referencing the changed identity, following
/// referencing documents whose own identity changed as a result.
async fn cascade_identity_change(
    conn: &mut SqliteConnection,
    schemas: &Arc<ApiSchemaDocuments>,
    first: IdentityChange,
    now: DateTime<Utc>,
    trace_id: &str,
) -> Result<usize> {
    let handler = UpdateCascadeHandler::new(schemas.clone());
    let mut queue = VecDeque::from([first]);
    let mut updated = 0;

    while let Some(change) = queue.pop_front() {
        for dependent in referencing_documents(conn, &change.old_referential_ids).await? {
            let result = handler.cascade(&CascadeRequest {
                original_document: &change.original,
                original_project_name: &change.project_name,
                original_resource_name: &change.resource_name,
                modified_document: &change.modified,
                referencing_document: &dependent.document,
                referencing_document_id: dependent.id,
                referencing_partition_key: dependent.partition_key,
                referencing_document_uuid: dependent.document_uuid,
                referencing_project_name: &dependent.project_name,
                referencing_resource_name: &dependent.resource_name,
            })?;

            let referencing = schemas.require_resource(&dependent.project_name, &dependent.resource_name)?;
            let references = extract_document_references(schemas, &referencing, &result.updated_document)?;
            let relationships = relationships_of(&referencing, &result.updated_document)?;

            write_document(conn, dependent.id, &result.updated_document, now, trace_id).await?;
            write_references(conn, dependent.id, &references).await?;
            write_relationships(conn, dependent.id, &relationships).await?;
            updated += 1;

            if result.is_identity_update {
                let old_identity = extract_document_identity(&referencing, &dependent.document)?;
                let new_identity = extract_document_identity(&referencing, &result.updated_document)?;
                if old_identity != new_identity {
                    write_aliases(conn, dependent.id, &referential_ids_for(&referencing, &new_identity)).await?;
                    queue.push_back(IdentityChange {
                        project_name: dependent.project_name,
                        resource_name: dependent.resource_name,
                        old_referential_ids: referential_ids_for(&referencing, &old_identity)
                            .into_iter()
                            .map(|(id, _)| id)
                            .collect(),
                        original: dependent.document,
                        modified: result.updated_document,
                    });
                }
            }
        }
    }
    Ok(updated)
}

// -- Row access --

struct StoredDocument {
    id: i64,
    partition_key: i16,
    document_uuid: Uuid,
    project_name: String,
    resource_name: String,
    document: Value,
    last_modified_at: DateTime<Utc>,
}

impl StoredDocument {
    fn is(&self, info: &ResourceInfo) -> bool {
        self.project_name == info.project_name && self.resource_name == info.resource_name
    }
}

fn row_to_document(r: &SqliteRow) -> Result<StoredDocument> {
    let partition_key: i64 = r.get("partition_key");
    let document_uuid: String = r.get("document_uuid");
    let edfi_doc: String = r.get("edfi_doc");
    Ok(StoredDocument {
        id: r.get("id"),
        partition_key: partition_key as i16,
        document_uuid: Uuid::parse_str(&document_uuid).map_err(|e| DmsError::Serialization(e.to_string()))?,
        project_name: r.get("project_name"),
        resource_name: r.get("resource_name"),
        document: serde_json::from_str(&edfi_doc)?,
        last_modified_at: parse_datetime(r.get("last_modified_at")),
    })
}

async fn find_by_uuid(conn: &mut SqliteConnection, document_uuid: Uuid) -> Result<Option<StoredDocument>> {
    let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.document_uuid = ?1"))
        .bind(document_uuid.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(row_to_document).transpose()
}

async fn find_by_referential_id(
    conn: &mut SqliteConnection,
    referential_id: &ReferentialId,
) -> Result<Option<StoredDocument>> {
    let row = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM aliases a JOIN documents d ON d.id = a.document_id
         WHERE a.referential_id = ?1"
    ))
    .bind(referential_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(row_to_document).transpose()
}

/// Documents holding a reference to any of `referential_ids`, by document id.
async fn referencing_documents(
    conn: &mut SqliteConnection,
    referential_ids: &[ReferentialId],
) -> Result<Vec<StoredDocument>> {
    let mut found = BTreeMap::new();
    for referential_id in referential_ids {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT {DOCUMENT_COLUMNS} FROM document_references r
             JOIN documents d ON d.id = r.referencing_document_id
             WHERE r.referenced_referential_id = ?1"
        ))
        .bind(referential_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
        for row in &rows {
            let stored = row_to_document(row)?;
            found.entry(stored.id).or_insert(stored);
        }
    }
    Ok(found.into_values().collect())
}

async fn alias_owner(conn: &mut SqliteConnection, referential_id: &ReferentialId) -> Result<Option<i64>> {
    let row = sqlx::query("SELECT document_id FROM aliases WHERE referential_id = ?1")
        .bind(referential_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| r.get("document_id")))
}

/// Resource names of references that resolve to no stored document.
async fn unresolved_references(conn: &mut SqliteConnection, references: &[DocumentReference]) -> Result<Vec<String>> {
    let mut missing = BTreeSet::new();
    for reference in references {
        if alias_owner(conn, &reference.referential_id).await?.is_none() {
            missing.insert(reference.resource_name.clone());
        }
    }
    Ok(missing.into_iter().collect())
}

async fn write_document(
    conn: &mut SqliteConnection,
    document_id: i64,
    document: &Value,
    now: DateTime<Utc>,
    trace_id: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE documents SET edfi_doc = ?1, last_modified_at = ?2, last_modified_trace_id = ?3
         WHERE id = ?4",
    )
    .bind(document.to_string())
    .bind(now.to_rfc3339())
    .bind(trace_id)
    .bind(document_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_aliases(conn: &mut SqliteConnection, document_id: i64, aliases: &[(ReferentialId, String)]) -> Result<()> {
    sqlx::query("DELETE FROM aliases WHERE document_id = ?1")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;
    for (referential_id, _) in aliases {
        sqlx::query("INSERT INTO aliases (referential_id, document_id) VALUES (?1, ?2)")
            .bind(referential_id.to_string())
            .bind(document_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn write_references(
    conn: &mut SqliteConnection,
    document_id: i64,
    references: &[DocumentReference],
) -> Result<()> {
    sqlx::query("DELETE FROM document_references WHERE referencing_document_id = ?1")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;
    for reference in references {
        sqlx::query(
            "INSERT INTO document_references (referencing_document_id, referenced_referential_id, referenced_resource_name)
             VALUES (?1, ?2, ?3)",
        )
        .bind(document_id)
        .bind(reference.referential_id.to_string())
        .bind(&reference.resource_name)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn write_relationships(
    conn: &mut SqliteConnection,
    document_id: i64,
    relationships: &[Relationship],
) -> Result<()> {
    sqlx::query("DELETE FROM edorg_relationships WHERE source_document_id = ?1")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;
    for relationship in relationships {
        sqlx::query(
            "INSERT INTO edorg_relationships (person_type, unique_id, education_organization_id, source_document_id)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(relationship.person_type)
        .bind(&relationship.unique_id)
        .bind(relationship.education_organization_id)
        .bind(document_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

// -- Helpers --

/// Spreads documents across 16 partitions by the low byte of their uuid.
fn partition_key(document_uuid: &Uuid) -> i16 {
    i16::from(document_uuid.as_bytes()[15] % 16)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn unknown_resource(info: &ResourceInfo) -> String {
    format!(
        "resource '{}.{}' is not defined by the loaded schema",
        info.project_name, info.resource_name
    )
}

fn without_id(document: &Value) -> Value {
    let mut document = document.clone();
    if let Some(object) = document.as_object_mut() {
        object.remove("id");
    }
    document
}

fn with_id(mut document: Value, document_uuid: Uuid) -> Value {
    if let Some(object) = document.as_object_mut() {
        object.insert("id".to_string(), Value::String(document_uuid.to_string()));
    }
    document
}

fn field_matches(document: &Value, field: &str, expected: &str) -> bool {
    match document.get(field) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

/// SQLite busy and locked errors (including their extended codes) surface
/// as write conflicts for the caller to retry.
pub(crate) fn is_write_conflict(err: &DmsError) -> bool {
    match err {
        DmsError::Database(sqlx::Error::Database(db)) => {
            matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabasePool;
    use crate::schema::fixtures;
    use serde_json::json;

    async fn setup() -> SqliteDocumentStore {
        let pool = DatabasePool::new_sqlite_memory().await.unwrap();
        let schemas = Arc::new(SchemaProvider::new(fixtures::api_schema()).unwrap());
        match pool {
            DatabasePool::Sqlite(p) => SqliteDocumentStore::new(p, schemas),
        }
    }

    fn info(resource_name: &str) -> ResourceInfo {
        ResourceInfo::new("Ed-Fi", resource_name)
    }

    async fn insert(store: &SqliteDocumentStore, resource_name: &str, document: Value) -> Uuid {
        let request = UpsertRequest {
            resource_info: info(resource_name),
            document,
            document_uuid: Uuid::new_v4(),
            trace_id: "test".into(),
        };
        match store.upsert_document(&request).await.unwrap() {
            UpsertResult::InsertSuccess { document_uuid } => document_uuid,
            other => panic!("unexpected upsert result for {resource_name}: {other:?}"),
        }
    }

    async fn get(store: &SqliteDocumentStore, resource_name: &str, document_uuid: Uuid) -> Value {
        let request = GetRequest {
            resource_info: info(resource_name),
            document_uuid,
        };
        match store.get_document_by_id(&request).await.unwrap() {
            GetResult::GetSuccess { document, .. } => document,
            other => panic!("unexpected get result: {other:?}"),
        }
    }

    async fn update(store: &SqliteDocumentStore, resource_name: &str, document_uuid: Uuid, document: Value) -> UpdateResult {
        store
            .update_document_by_id(&UpdateRequest {
                resource_info: info(resource_name),
                document_uuid,
                document,
                trace_id: "test".into(),
            })
            .await
            .unwrap()
    }

    async fn delete(store: &SqliteDocumentStore, resource_name: &str, document_uuid: Uuid) -> DeleteResult {
        store
            .delete_document_by_id(&DeleteRequest {
                resource_info: info(resource_name),
                document_uuid,
                trace_id: "test".into(),
            })
            .await
            .unwrap()
    }

    fn school() -> Value {
        json!({ "schoolId": 255901, "nameOfInstitution": "Grand Bend High School" })
    }

    fn student(id: &str, first_name: &str) -> Value {
        json!({ "studentUniqueId": id, "firstName": first_name })
    }

    fn student_school_association(student_id: &str) -> Value {
        json!({
            "studentReference": { "studentUniqueId": student_id },
            "schoolReference": { "schoolId": 255901 },
            "entryDate": "2024-08-20"
        })
    }

    fn course_offering(code: &str) -> Value {
        json!({
            "localCourseCode": code,
            "courseReference": { "courseCode": "ALG-1", "educationOrganizationId": 255901 },
            "schoolReference": { "schoolId": 255901 },
            "sessionReference": { "schoolId": 255901, "schoolYear": 2025, "sessionName": "Fall" }
        })
    }

    fn section(code: &str) -> Value {
        json!({
            "sectionIdentifier": "S-1",
            "courseOfferingReference": {
                "localCourseCode": code,
                "schoolId": 255901,
                "schoolYear": 2025,
                "sessionName": "Fall"
            },
            "classPeriods": [
                { "classPeriodReference": { "classPeriodName": "P1", "schoolId": 255901 } },
                { "classPeriodReference": { "classPeriodName": "P2", "schoolId": 255901 } }
            ]
        })
    }

    fn student_section_association(code: &str) -> Value {
        json!({
            "beginDate": "2024-08-21",
            "sectionReference": {
                "sectionIdentifier": "S-1",
                "localCourseCode": code,
                "schoolId": 255901,
                "schoolYear": 2025,
                "sessionName": "Fall"
            },
            "studentReference": { "studentUniqueId": "604822" }
        })
    }

    struct Sections {
        course_offering: Uuid,
        class_period: Uuid,
        section: Uuid,
        student_section_association: Uuid,
    }

    /// School through StudentSectionAssociation, every reference resolvable.
    async fn seed_sections(store: &SqliteDocumentStore) -> Sections {
        insert(store, "SchoolYearType", json!({ "schoolYear": 2025 })).await;
        insert(store, "School", school()).await;
        insert(store, "Student", student("604822", "Ada")).await;
        insert(
            store,
            "Session",
            json!({
                "schoolReference": { "schoolId": 255901 },
                "schoolYearTypeReference": { "schoolYear": 2025 },
                "sessionName": "Fall"
            }),
        )
        .await;
        insert(
            store,
            "Course",
            json!({
                "courseCode": "ALG-1",
                "educationOrganizationReference": { "educationOrganizationId": 255901 }
            }),
        )
        .await;
        let course_offering = insert(store, "CourseOffering", course_offering("abc")).await;
        insert(
            store,
            "ClassPeriod",
            json!({ "classPeriodName": "P1", "schoolReference": { "schoolId": 255901 } }),
        )
        .await;
        let class_period = insert(
            store,
            "ClassPeriod",
            json!({ "classPeriodName": "P2", "schoolReference": { "schoolId": 255901 } }),
        )
        .await;
        let section = insert(store, "Section", section("abc")).await;
        let student_section_association =
            insert(store, "StudentSectionAssociation", student_section_association("abc")).await;
        Sections {
            course_offering,
            class_period,
            section,
            student_section_association,
        }
    }

    #[tokio::test]
    async fn insert_then_get_returns_document_with_id() {
        let store = setup().await;
        let uuid = insert(&store, "School", school()).await;

        let doc = get(&store, "School", uuid).await;
        assert_eq!(doc["nameOfInstitution"], json!("Grand Bend High School"));
        assert_eq!(doc["id"], json!(uuid.to_string()));
    }

    #[tokio::test]
    async fn get_unknown_or_wrong_resource_is_not_found() {
        let store = setup().await;
        let uuid = insert(&store, "School", school()).await;

        for (resource_name, document_uuid) in [("School", Uuid::new_v4()), ("Student", uuid)] {
            let result = store
                .get_document_by_id(&GetRequest {
                    resource_info: info(resource_name),
                    document_uuid,
                })
                .await
                .unwrap();
            assert_eq!(result, GetResult::GetFailureNotExists);
        }
    }

    #[tokio::test]
    async fn upsert_with_same_identity_updates_existing() {
        let store = setup().await;
        let uuid = insert(&store, "Student", student("604822", "Ada")).await;

        let result = store
            .upsert_document(&UpsertRequest {
                resource_info: info("Student"),
                document: student("604822", "Grace"),
                document_uuid: Uuid::new_v4(),
                trace_id: "test".into(),
            })
            .await
            .unwrap();
        assert_eq!(result, UpsertResult::UpdateSuccess { document_uuid: uuid });
        assert_eq!(get(&store, "Student", uuid).await["firstName"], json!("Grace"));
    }

    #[tokio::test]
    async fn upsert_with_unresolved_references_fails() {
        let store = setup().await;
        let result = store
            .upsert_document(&UpsertRequest {
                resource_info: info("StudentSchoolAssociation"),
                document: student_school_association("604822"),
                document_uuid: Uuid::new_v4(),
                trace_id: "test".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            result,
            UpsertResult::UpsertFailureReference {
                invalid_references: vec!["School".into(), "Student".into()]
            }
        );
    }

    #[tokio::test]
    async fn subclass_resolves_superclass_reference() {
        let store = setup().await;
        insert(&store, "School", school()).await;
        insert(
            &store,
            "Course",
            json!({
                "courseCode": "ALG-1",
                "educationOrganizationReference": { "educationOrganizationId": 255901 }
            }),
        )
        .await;
    }

    #[tokio::test]
    async fn superclass_identity_collision_is_a_conflict() {
        let store = setup().await;
        insert(&store, "School", school()).await;

        let result = store
            .upsert_document(&UpsertRequest {
                resource_info: info("LocalEducationAgency"),
                document: json!({ "localEducationAgencyId": 255901 }),
                document_uuid: Uuid::new_v4(),
                trace_id: "test".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            result,
            UpsertResult::UpsertFailureIdentityConflict { ref resource_name, .. } if resource_name == "LocalEducationAgency"
        ));
    }

    #[tokio::test]
    async fn upsert_of_unknown_resource_is_unknown_failure() {
        let store = setup().await;
        let result = store
            .upsert_document(&UpsertRequest {
                resource_info: info("Nope"),
                document: json!({}),
                document_uuid: Uuid::new_v4(),
                trace_id: "test".into(),
            })
            .await
            .unwrap();
        assert!(matches!(result, UpsertResult::UnknownFailure { .. }));
    }

    #[tokio::test]
    async fn immutable_identity_cannot_change() {
        let store = setup().await;
        let uuid = insert(&store, "Student", student("604822", "Ada")).await;

        let result = update(&store, "Student", uuid, student("999999", "Ada")).await;
        assert_eq!(
            result,
            UpdateResult::UpdateFailureImmutableIdentity {
                message: "Identifying values for the Student resource cannot be changed. Delete and recreate the resource item instead."
                    .into()
            }
        );
    }

    #[tokio::test]
    async fn update_of_missing_document_is_not_found() {
        let store = setup().await;
        let result = update(&store, "Student", Uuid::new_v4(), student("1", "Ada")).await;
        assert_eq!(result, UpdateResult::UpdateFailureNotExists);
    }

    #[tokio::test]
    async fn update_without_identity_change_keeps_aliases() {
        let store = setup().await;
        let uuid = insert(&store, "Student", student("604822", "Ada")).await;

        let result = update(&store, "Student", uuid, student("604822", "Grace")).await;
        assert_eq!(result, UpdateResult::UpdateSuccess { document_uuid: uuid });

        // Still resolvable under the same identity.
        insert(&store, "School", school()).await;
        insert(&store, "StudentSchoolAssociation", student_school_association("604822")).await;
    }

    #[tokio::test]
    async fn identity_update_cascades_transitively() {
        let store = setup().await;
        let seeded = seed_sections(&store).await;

        let result = update(&store, "CourseOffering", seeded.course_offering, course_offering("xyz")).await;
        assert_eq!(
            result,
            UpdateResult::UpdateSuccess {
                document_uuid: seeded.course_offering
            }
        );

        let section = get(&store, "Section", seeded.section).await;
        assert_eq!(section["courseOfferingReference"]["localCourseCode"], json!("xyz"));
        assert_eq!(section["courseOfferingReference"]["schoolYear"], json!(2025));

        let association = get(&store, "StudentSectionAssociation", seeded.student_section_association).await;
        assert_eq!(association["sectionReference"]["localCourseCode"], json!("xyz"));

        // New identities resolve, the old ones are gone.
        insert(
            &store,
            "StudentSectionAssociation",
            json!({
                "beginDate": "2024-09-01",
                "sectionReference": {
                    "sectionIdentifier": "S-1", "localCourseCode": "xyz", "schoolId": 255901,
                    "schoolYear": 2025, "sessionName": "Fall"
                },
                "studentReference": { "studentUniqueId": "604822" }
            }),
        )
        .await;
        let stale = store
            .upsert_document(&UpsertRequest {
                resource_info: info("StudentSectionAssociation"),
                document: student_section_association("abc"),
                document_uuid: Uuid::new_v4(),
                trace_id: "test".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            stale,
            UpsertResult::UpsertFailureReference {
                invalid_references: vec!["Section".into()]
            }
        );
    }

    #[tokio::test]
    async fn identity_update_rewrites_matching_array_entry() {
        let store = setup().await;
        let seeded = seed_sections(&store).await;

        let result = update(
            &store,
            "ClassPeriod",
            seeded.class_period,
            json!({ "classPeriodName": "P2-renamed", "schoolReference": { "schoolId": 255901 } }),
        )
        .await;
        assert!(matches!(result, UpdateResult::UpdateSuccess { .. }));

        let section = get(&store, "Section", seeded.section).await;
        assert_eq!(section["classPeriods"][0]["classPeriodReference"]["classPeriodName"], json!("P1"));
        assert_eq!(
            section["classPeriods"][1]["classPeriodReference"]["classPeriodName"],
            json!("P2-renamed")
        );
        // Section identity untouched, so its association still points at it.
        let association = get(&store, "StudentSectionAssociation", seeded.student_section_association).await;
        assert_eq!(association["sectionReference"]["localCourseCode"], json!("abc"));
    }

    #[tokio::test]
    async fn delete_refuses_while_referenced() {
        let store = setup().await;
        let seeded = seed_sections(&store).await;

        assert_eq!(
            delete(&store, "Section", seeded.section).await,
            DeleteResult::DeleteFailureReference {
                referencing_resource_names: vec!["StudentSectionAssociation".into()]
            }
        );

        assert_eq!(
            delete(&store, "StudentSectionAssociation", seeded.student_section_association).await,
            DeleteResult::DeleteSuccess
        );
        assert_eq!(delete(&store, "Section", seeded.section).await, DeleteResult::DeleteSuccess);
        assert_eq!(
            delete(&store, "Section", seeded.section).await,
            DeleteResult::DeleteFailureNotExists
        );
    }

    #[tokio::test]
    async fn delete_reports_every_referencing_resource() {
        let store = setup().await;
        insert(&store, "SchoolYearType", json!({ "schoolYear": 2025 })).await;
        let school_uuid = insert(&store, "School", school()).await;
        insert(
            &store,
            "ClassPeriod",
            json!({ "classPeriodName": "P1", "schoolReference": { "schoolId": 255901 } }),
        )
        .await;
        insert(
            &store,
            "Course",
            json!({
                "courseCode": "ALG-1",
                "educationOrganizationReference": { "educationOrganizationId": 255901 }
            }),
        )
        .await;

        assert_eq!(
            delete(&store, "School", school_uuid).await,
            DeleteResult::DeleteFailureReference {
                referencing_resource_names: vec!["ClassPeriod".into(), "Course".into()]
            }
        );
    }

    #[tokio::test]
    async fn query_filters_and_pages() {
        let store = setup().await;
        insert(&store, "Student", student("1", "Ada")).await;
        insert(&store, "Student", student("2", "Grace")).await;
        insert(&store, "Student", student("3", "Ada")).await;

        let mut request = QueryRequest::new(info("Student"));
        request.filters = vec![("firstName".into(), "Ada".into())];
        request.total_count = true;
        request.limit = Some(1);
        request.offset = Some(1);

        match store.query_documents(&request).await.unwrap() {
            QueryResult::QuerySuccess { documents, total_count } => {
                assert_eq!(total_count, Some(2));
                assert_eq!(documents.len(), 1);
                assert_eq!(documents[0]["studentUniqueId"], json!("3"));
                assert!(documents[0]["id"].is_string());
            }
            other => panic!("unexpected query result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_matches_numeric_fields() {
        let store = setup().await;
        insert(&store, "School", school()).await;

        let mut request = QueryRequest::new(info("School"));
        request.filters = vec![("schoolId".into(), "255901".into())];
        match store.query_documents(&request).await.unwrap() {
            QueryResult::QuerySuccess { documents, total_count } => {
                assert_eq!(documents.len(), 1);
                assert_eq!(total_count, None);
            }
            other => panic!("unexpected query result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn relationships_follow_association_lifecycle() {
        let store = setup().await;
        insert(&store, "School", school()).await;
        insert(&store, "Student", student("604822", "Ada")).await;
        assert!(store
            .get_education_organizations_for_student("604822")
            .await
            .unwrap()
            .is_empty());

        let association = insert(&store, "StudentSchoolAssociation", student_school_association("604822")).await;
        assert_eq!(
            store.get_education_organizations_for_student("604822").await.unwrap(),
            vec![255901]
        );

        delete(&store, "StudentSchoolAssociation", association).await;
        assert!(store
            .get_education_organizations_for_student("604822")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn staff_relationships_come_from_staff_associations() {
        let store = setup().await;
        insert(&store, "School", school()).await;
        insert(&store, "Staff", json!({ "staffUniqueId": "S-7" })).await;
        insert(
            &store,
            "StaffEducationOrganizationAssignmentAssociation",
            json!({
                "educationOrganizationReference": { "educationOrganizationId": 255901 },
                "staffReference": { "staffUniqueId": "S-7" },
                "beginDate": "2024-08-01"
            }),
        )
        .await;

        assert_eq!(store.get_education_organizations_for_staff("S-7").await.unwrap(), vec![255901]);
        assert!(store.get_education_organizations_for_contact("S-7").await.unwrap().is_empty());
    }

    #[test]
    fn partition_key_is_within_range() {
        for _ in 0..64 {
            assert!((0..16).contains(&partition_key(&Uuid::new_v4())));
        }
        assert_eq!(partition_key(&Uuid::nil()), 0);
    }

    #[test]
    fn non_database_errors_are_not_write_conflicts() {
        assert!(!is_write_conflict(&DmsError::CircuitOpen));
        assert!(!is_write_conflict(&DmsError::Database(sqlx::Error::PoolTimedOut)));
    }
}
