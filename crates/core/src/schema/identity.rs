//! Natural-key identity extraction and referential ids.
//!
//! A document's identity is the ordered list of values found at its
//! resource's identity JSONPaths. The referential id is a UUIDv5 over the
//! resource name and that identity, so any document that embeds the same
//! identity values in a reference resolves to the same id.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DmsError, Result};
use crate::jsonpath::JsonPath;

use super::documents::{ApiSchemaDocuments, ResourceRef};
use super::model::DocumentPath;

const REFERENTIAL_ID_NAMESPACE: Uuid = Uuid::from_u128(0xedf1edf1_3df1_3df1_3df1_3df1edf1edf1);

/// One component of a natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityElement {
    pub identity_json_path: String,
    pub value: Value,
}

/// A document's natural key, in identity-path order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentIdentity(pub Vec<IdentityElement>);

impl DocumentIdentity {
    pub fn elements(&self) -> &[IdentityElement] {
        &self.0
    }

    pub fn value_of(&self, identity_json_path: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|e| e.identity_json_path == identity_json_path)
            .map(|e| &e.value)
    }

    /// Rename one identity path, used to express a subclass identity under
    /// its superclass.
    pub fn with_renamed_path(&self, from: &str, to: &str) -> Self {
        DocumentIdentity(
            self.0
                .iter()
                .map(|e| IdentityElement {
                    identity_json_path: if e.identity_json_path == from {
                        to.to_string()
                    } else {
                        e.identity_json_path.clone()
                    },
                    value: e.value.clone(),
                })
                .collect(),
        )
    }
}

impl fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "#{}={}", element.identity_json_path, value_text(&element.value))?;
        }
        Ok(())
    }
}

/// Text of an identity value as it enters a referential id; `2025` and
/// `"2025"` are the same identity.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Deterministic id of a resource identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferentialId(pub Uuid);

impl ReferentialId {
    pub fn new(project_name: &str, resource_name: &str, identity: &DocumentIdentity) -> Self {
        let name = format!("{project_name}{resource_name}{identity}");
        ReferentialId(Uuid::new_v5(&REFERENTIAL_ID_NAMESPACE, name.as_bytes()))
    }
}

impl fmt::Display for ReferentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A reference found in a document body.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReference {
    pub project_name: String,
    pub resource_name: String,
    pub identity: DocumentIdentity,
    pub referential_id: ReferentialId,
}

/// Read the identity of `document` according to its resource schema.
pub fn extract_document_identity(resource: &ResourceRef<'_>, document: &Value) -> Result<DocumentIdentity> {
    let mut elements = Vec::with_capacity(resource.schema.identity_json_paths.len());
    for identity_json_path in &resource.schema.identity_json_paths {
        let path = JsonPath::parse(identity_json_path)?;
        let value = path.select_first(document).ok_or_else(|| {
            DmsError::Schema(format!(
                "{} document has no identity value at {identity_json_path}",
                resource.resource_name()
            ))
        })?;
        elements.push(IdentityElement {
            identity_json_path: identity_json_path.clone(),
            value: value.clone(),
        });
    }
    Ok(DocumentIdentity(elements))
}

/// Referential ids a document answers to: its own, plus its superclass alias
/// when the resource is a subclass (a School is also an EducationOrganization).
pub fn referential_ids_for(
    resource: &ResourceRef<'_>,
    identity: &DocumentIdentity,
) -> Vec<(ReferentialId, String)> {
    let mut ids = vec![(
        ReferentialId::new(resource.project_name(), resource.resource_name(), identity),
        resource.resource_name().to_string(),
    )];

    if let (true, Some(superclass), Some(superclass_path)) = (
        resource.schema.is_subclass,
        resource.schema.superclass_resource_name.as_deref(),
        resource.schema.superclass_identity_json_path.as_deref(),
    ) {
        if let Some(own_path) = resource.schema.identity_json_paths.first() {
            let superclass_project = resource
                .schema
                .superclass_project_name
                .as_deref()
                .unwrap_or(resource.project_name());
            let aliased = identity.with_renamed_path(own_path, superclass_path);
            ids.push((
                ReferentialId::new(superclass_project, superclass, &aliased),
                superclass.to_string(),
            ));
        }
    }
    ids
}

/// Every resource reference embedded in `document`. Array references yield
/// one entry per array element.
pub fn extract_document_references(
    schemas: &ApiSchemaDocuments,
    resource: &ResourceRef<'_>,
    document: &Value,
) -> Result<Vec<DocumentReference>> {
    let mut references = Vec::new();
    for (_, document_path) in resource.schema.references() {
        if !document_path.is_resource_reference() {
            continue;
        }
        references.extend(references_for_path(schemas, resource, document_path, document)?);
    }
    Ok(references)
}

fn references_for_path(
    schemas: &ApiSchemaDocuments,
    resource: &ResourceRef<'_>,
    document_path: &DocumentPath,
    document: &Value,
) -> Result<Vec<DocumentReference>> {
    let project_name = document_path.target_project(resource.project_name()).to_string();
    let resource_name = document_path.resource_name.clone().unwrap_or_default();

    // Identity element order follows the target's identity paths, so the
    // referential id matches the one computed from the target document.
    let target_identity_order = schemas
        .identity_json_paths(&project_name, &resource_name)
        .map(|paths| paths.to_vec())
        .unwrap_or_default();

    let mut columns = Vec::with_capacity(document_path.reference_json_paths.len());
    for pair in &document_path.reference_json_paths {
        let path = JsonPath::parse(&pair.reference_json_path)?;
        let values: Vec<Value> = path.select_values(document).into_iter().cloned().collect();
        columns.push((pair.identity_json_path.clone(), values));
    }

    let count = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    if columns.iter().any(|(_, v)| v.len() != count) {
        return Err(DmsError::Schema(format!(
            "{} document has an incomplete {resource_name} reference",
            resource.resource_name()
        )));
    }

    let mut references = Vec::with_capacity(count);
    for i in 0..count {
        let mut elements: Vec<IdentityElement> = columns
            .iter()
            .map(|(identity_json_path, values)| IdentityElement {
                identity_json_path: identity_json_path.clone(),
                value: values[i].clone(),
            })
            .collect();
        elements.sort_by_key(|e| {
            target_identity_order
                .iter()
                .position(|p| *p == e.identity_json_path)
                .unwrap_or(usize::MAX)
        });
        let identity = DocumentIdentity(elements);
        references.push(DocumentReference {
            referential_id: ReferentialId::new(&project_name, &resource_name, &identity),
            project_name: project_name.clone(),
            resource_name: resource_name.clone(),
            identity,
        });
    }
    Ok(references)
}
