//! Update cascade.
//!
//! When a document's identity changes, every document that embeds a
//! reference to the old identity has to be rewritten to the new one. This
//! module performs that rewrite for a single referencing document; the store
//! finds the referencing documents and recurses while the rewrite changed the
//! referencing document's own identity.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DmsError, Result};
use crate::jsonpath::{filter_expression, set_at, FilterValue, JsonPath, PathStep};
use crate::schema::identity::value_text;
use crate::schema::{ApiSchemaDocuments, DocumentPath, ReferenceJsonPath, ResourceRef};

/// Inputs of one cascade step.
#[derive(Debug, Clone, Copy)]
pub struct CascadeRequest<'a> {
    pub original_document: &'a Value,
    pub original_project_name: &'a str,
    pub original_resource_name: &'a str,
    pub modified_document: &'a Value,
    pub referencing_document: &'a Value,
    pub referencing_document_id: i64,
    pub referencing_partition_key: i16,
    pub referencing_document_uuid: Uuid,
    pub referencing_project_name: &'a str,
    pub referencing_resource_name: &'a str,
}

/// The rewritten referencing document and where it lives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCascadeResult {
    pub updated_document: Value,
    pub referencing_document_id: i64,
    pub partition_key: i16,
    pub document_uuid: Uuid,
    pub project_name: String,
    pub resource_name: String,
    /// The referencing document's own identity changed, so its referencing
    /// documents must be cascaded in turn.
    pub is_identity_update: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateCascadeHandler {
    schemas: Arc<ApiSchemaDocuments>,
}

/// A reference mapping of the referencing resource that points at the
/// original resource.
struct MatchedReference<'s> {
    path_name: &'s str,
    document_path: &'s DocumentPath,
    via_superclass: bool,
}

impl UpdateCascadeHandler {
    pub fn new(schemas: Arc<ApiSchemaDocuments>) -> Self {
        Self { schemas }
    }

    pub fn cascade(&self, request: &CascadeRequest<'_>) -> Result<UpdateCascadeResult> {
        let original = self.resource(request.original_project_name, request.original_resource_name)?;
        let referencing = self.resource(request.referencing_project_name, request.referencing_resource_name)?;

        let matched = matched_references(&original, &referencing);
        if matched.is_empty() {
            return Err(DmsError::Cascade(format!(
                "'{}' has no reference to '{}'",
                referencing.resource_name(),
                original.resource_name()
            )));
        }

        // True iff an original identity path, or a matched reference path, is
        // one of the referencing resource's identity paths.
        let referencing_identity = &referencing.schema.identity_json_paths;
        let is_identity_update = original
            .schema
            .identity_json_paths
            .iter()
            .chain(
                matched
                    .iter()
                    .flat_map(|m| m.document_path.reference_json_paths.iter())
                    .map(|pair| &pair.reference_json_path),
            )
            .any(|path| referencing_identity.contains(path));

        let mut updated = request.referencing_document.clone();
        let mut applied = 0;
        for reference in &matched {
            let rewritten = if reference
                .document_path
                .reference_json_paths
                .iter()
                .any(|pair| pair.reference_json_path.contains("[*]"))
            {
                rewrite_array_reference(&original, reference, request, &mut updated)?
            } else {
                rewrite_scalar_reference(&original, reference, request, &mut updated)?
            };
            if rewritten {
                debug!(
                    referencing = referencing.resource_name(),
                    reference = reference.path_name,
                    document_id = request.referencing_document_id,
                    "cascaded identity change into reference"
                );
                applied += 1;
            }
        }

        if applied == 0 {
            return Err(DmsError::Cascade(format!(
                "no '{}' reference in '{}' document {} embeds the original identity",
                original.resource_name(),
                referencing.resource_name(),
                request.referencing_document_uuid
            )));
        }

        Ok(UpdateCascadeResult {
            updated_document: updated,
            referencing_document_id: request.referencing_document_id,
            partition_key: request.referencing_partition_key,
            document_uuid: request.referencing_document_uuid,
            project_name: request.referencing_project_name.to_string(),
            resource_name: request.referencing_resource_name.to_string(),
            is_identity_update,
        })
    }

    fn resource(&self, project_name: &str, resource_name: &str) -> Result<ResourceRef<'_>> {
        self.schemas
            .find_resource(project_name, resource_name)
            .ok_or_else(|| {
                DmsError::Cascade(format!(
                    "resource '{project_name}.{resource_name}' not found in schema"
                ))
            })
    }
}

fn matched_references<'s>(original: &ResourceRef<'_>, referencing: &ResourceRef<'s>) -> Vec<MatchedReference<'s>> {
    let superclass = match (
        original.schema.is_subclass,
        original.schema.superclass_resource_name.as_deref(),
    ) {
        (true, Some(name)) => Some((
            original
                .schema
                .superclass_project_name
                .as_deref()
                .unwrap_or(original.project_name()),
            name,
        )),
        _ => None,
    };

    referencing
        .schema
        .references()
        .filter(|(_, p)| p.is_resource_reference())
        .filter_map(|(path_name, document_path)| {
            if document_path.targets(referencing.project_name(), original.project_name(), original.resource_name()) {
                Some(MatchedReference {
                    path_name: path_name.as_str(),
                    document_path,
                    via_superclass: false,
                })
            } else {
                match superclass {
                    Some((project, name)) if document_path.targets(referencing.project_name(), project, name) => Some(MatchedReference {
                        path_name: path_name.as_str(),
                        document_path,
                        via_superclass: true,
                    }),
                    _ => None,
                }
            }
        })
        .collect()
}

/// Where the original document holds the value a reference pair copies.
/// A reference through the superclass names the superclass identity path,
/// which the subclass stores under its own identity path.
fn source_path<'a>(original: &'a ResourceRef<'_>, reference: &MatchedReference<'_>, pair: &'a ReferenceJsonPath) -> &'a str {
    if reference.via_superclass
        && original.schema.superclass_identity_json_path.as_deref() == Some(pair.identity_json_path.as_str())
    {
        if let Some(own) = original.schema.identity_json_paths.first() {
            return own;
        }
    }
    &pair.identity_json_path
}

fn value_at(document: &Value, path: &str, which: &str) -> Result<Value> {
    JsonPath::parse(path)?
        .select_first(document)
        .cloned()
        .ok_or_else(|| DmsError::Cascade(format!("{which} document has no value at {path}")))
}

/// Numbers stay numbers; anything else is written as a string.
fn normalized(value: Value) -> Value {
    match value {
        Value::Number(_) | Value::String(_) => value,
        other => Value::String(other.to_string()),
    }
}

fn rewrite_scalar_reference(
    original: &ResourceRef<'_>,
    reference: &MatchedReference<'_>,
    request: &CascadeRequest<'_>,
    updated: &mut Value,
) -> Result<bool> {
    let pairs = &reference.document_path.reference_json_paths;
    let mut writes = Vec::with_capacity(pairs.len());

    for pair in pairs {
        let source = source_path(original, reference, pair);
        let old_value = value_at(request.original_document, source, "original")?;
        let reference_path = JsonPath::parse(&pair.reference_json_path)?;
        match reference_path.select_first(updated) {
            Some(current) if value_text(current) == value_text(&old_value) => {}
            _ => return Ok(false),
        }
        let new_value = value_at(request.modified_document, source, "modified")?;
        writes.push((reference_path, normalized(new_value)));
    }

    for (path, value) in writes {
        path.set(updated, value)?;
    }
    Ok(true)
}

fn rewrite_array_reference(
    original: &ResourceRef<'_>,
    reference: &MatchedReference<'_>,
    request: &CascadeRequest<'_>,
    updated: &mut Value,
) -> Result<bool> {
    let mut array_path: Option<JsonPath> = None;
    let mut conditions = Vec::new();
    let mut members = Vec::new();

    for pair in &reference.document_path.reference_json_paths {
        let path = JsonPath::parse(&pair.reference_json_path)?;
        let (prefix, fields) = path.split_at_wildcard().ok_or_else(|| {
            DmsError::Cascade(format!(
                "reference path {} must contain a single [*] followed by member names",
                pair.reference_json_path
            ))
        })?;
        match &array_path {
            Some(existing) if existing.as_str() != prefix.as_str() => {
                return Err(DmsError::Cascade(format!(
                    "reference '{}' spans more than one array",
                    reference.path_name
                )));
            }
            Some(_) => {}
            None => array_path = Some(prefix),
        }

        let source = source_path(original, reference, pair);
        let old_value = value_at(request.original_document, source, "original")?;
        let new_value = value_at(request.modified_document, source, "modified")?;
        conditions.push((fields.clone(), FilterValue::from_json(&old_value)));
        members.push((fields, normalized(new_value)));
    }

    let Some(array_path) = array_path else {
        return Ok(false);
    };
    let filter = filter_expression(&array_path, &conditions);
    let matches: Vec<_> = JsonPath::parse(&filter)?
        .select(updated)
        .into_iter()
        .map(|m| m.path)
        .collect();

    let [element] = matches.as_slice() else {
        return Err(DmsError::Cascade(format!(
            "expected exactly one array element to match {filter}, found {}",
            matches.len()
        )));
    };

    for (fields, value) in members {
        let mut target = element.clone();
        target.0.extend(fields.into_iter().map(PathStep::Key));
        set_at(updated, &target, value).map_err(|reason| DmsError::JsonPath {
            path: target.to_string(),
            reason,
        })?;
    }
    Ok(true)
}
