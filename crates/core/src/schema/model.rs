//! Typed views over the resource schema document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One project (the core data standard or an extension).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSchema {
    pub project_name: String,
    pub project_endpoint_name: String,
    #[serde(default)]
    pub project_version: String,
    #[serde(default)]
    pub is_extension_project: bool,
    #[serde(default)]
    pub abstract_resources: BTreeMap<String, AbstractResource>,
    /// Keyed by endpoint name, e.g. `students`.
    #[serde(default)]
    pub resource_schemas: BTreeMap<String, ResourceSchema>,
}

/// An abstract resource such as `EducationOrganization`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractResource {
    #[serde(default)]
    pub identity_json_paths: Vec<String>,
}

/// Schema of a single resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSchema {
    pub resource_name: String,
    #[serde(default)]
    pub is_descriptor: bool,
    #[serde(default)]
    pub is_school_year_enumeration: bool,
    #[serde(default)]
    pub is_subclass: bool,
    #[serde(default)]
    pub is_resource_extension: bool,
    #[serde(default)]
    pub allow_identity_updates: bool,
    #[serde(default)]
    pub superclass_resource_name: Option<String>,
    #[serde(default)]
    pub superclass_project_name: Option<String>,
    /// Where a subclass's identity lives under the superclass name,
    /// e.g. `$.educationOrganizationId` for `School`.
    #[serde(default)]
    pub superclass_identity_json_path: Option<String>,
    #[serde(default)]
    pub identity_json_paths: Vec<String>,
    #[serde(default)]
    pub document_paths_mapping: BTreeMap<String, DocumentPath>,
    #[serde(default)]
    pub securable_elements: SecurableElements,
}

impl ResourceSchema {
    /// All reference document paths, in mapping-key order.
    pub fn references(&self) -> impl Iterator<Item = (&String, &DocumentPath)> {
        self.document_paths_mapping
            .iter()
            .filter(|(_, p)| p.is_reference)
    }

    pub fn has_identity_path(&self, path: &str) -> bool {
        self.identity_json_paths.iter().any(|p| p == path)
    }
}

/// What a document path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPathKind {
    Reference,
    Descriptor,
    Scalar,
}

/// A named mapping from the resource's JSON shape to a scalar, descriptor,
/// or resource reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPath {
    #[serde(default)]
    pub is_reference: bool,
    #[serde(default)]
    pub is_descriptor: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub reference_json_paths: Vec<ReferenceJsonPath>,
    /// Scalar and descriptor paths carry their location here.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, rename = "type")]
    pub path_type: Option<String>,
}

impl DocumentPath {
    pub fn kind(&self) -> DocumentPathKind {
        if self.is_descriptor {
            DocumentPathKind::Descriptor
        } else if self.is_reference {
            DocumentPathKind::Reference
        } else {
            DocumentPathKind::Scalar
        }
    }

    /// A resource reference (not a descriptor) with a known target.
    pub fn is_resource_reference(&self) -> bool {
        self.kind() == DocumentPathKind::Reference && self.resource_name.is_some()
    }

    /// Project of the referenced resource; an omitted `projectName` means the
    /// referencing resource's own project.
    pub fn target_project<'a>(&'a self, referencing_project: &'a str) -> &'a str {
        self.project_name.as_deref().unwrap_or(referencing_project)
    }

    pub fn targets(&self, referencing_project: &str, project_name: &str, resource_name: &str) -> bool {
        self.resource_name.as_deref() == Some(resource_name)
            && self.target_project(referencing_project) == project_name
    }
}

/// Links a referenced resource's identity component to where it is embedded
/// in the referencing document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceJsonPath {
    pub identity_json_path: String,
    pub reference_json_path: String,
}

/// JSONPaths of the fields each authorization strategy inspects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurableElements {
    #[serde(default, rename = "Namespace")]
    pub namespace: Vec<String>,
    #[serde(default, rename = "EducationOrganization")]
    pub education_organization: Vec<EdOrgSecurableElement>,
    #[serde(default, rename = "Student")]
    pub student: Vec<String>,
    #[serde(default, rename = "Contact")]
    pub contact: Vec<String>,
    #[serde(default, rename = "Staff")]
    pub staff: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdOrgSecurableElement {
    pub meta_ed_name: String,
    pub json_path: String,
}
