//! The loaded set of project schemas and the lookups the core runs against it.

use std::path::Path;

use serde_json::Value;

use crate::error::{DmsError, Result};

use super::model::{ProjectSchema, ResourceSchema};

/// A resource schema together with the project it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ResourceRef<'a> {
    pub project: &'a ProjectSchema,
    pub endpoint_name: &'a str,
    pub schema: &'a ResourceSchema,
}

impl<'a> ResourceRef<'a> {
    pub fn project_name(&self) -> &'a str {
        &self.project.project_name
    }

    pub fn resource_name(&self) -> &'a str {
        &self.schema.resource_name
    }

    /// `/{projectEndpointName}/{endpointName}`, e.g. `/ed-fi/students`.
    pub fn endpoint_path(&self) -> String {
        format!(
            "/{}/{}",
            self.project.project_endpoint_name, self.endpoint_name
        )
    }

    /// True when this resource is `resource_name` itself or one of its subclasses.
    pub fn is_or_extends(&self, project_name: &str, resource_name: &str) -> bool {
        (self.project_name() == project_name && self.resource_name() == resource_name)
            || (self.schema.is_subclass
                && self.schema.superclass_resource_name.as_deref() == Some(resource_name)
                && self
                    .schema
                    .superclass_project_name
                    .as_deref()
                    .unwrap_or(self.project_name())
                    == project_name)
    }
}

/// The core project schema plus any extension project schemas.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSchemaDocuments {
    core: ProjectSchema,
    extensions: Vec<ProjectSchema>,
}

impl ApiSchemaDocuments {
    pub fn new(core: ProjectSchema, extensions: Vec<ProjectSchema>) -> Self {
        Self { core, extensions }
    }

    /// Build from raw schema documents, each holding a `projectSchema` node.
    pub fn from_json(core: &Value, extensions: &[Value]) -> Result<Self> {
        let core = project_schema_from(core)?;
        let extensions = extensions
            .iter()
            .map(project_schema_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(core, extensions))
    }

    /// Read the core schema file and any extension schema files.
    pub fn load(core_path: &Path, extension_paths: &[impl AsRef<Path>]) -> Result<Self> {
        let core: Value = serde_json::from_str(&std::fs::read_to_string(core_path)?)?;
        let extensions = extension_paths
            .iter()
            .map(|p| -> Result<Value> {
                Ok(serde_json::from_str(&std::fs::read_to_string(p.as_ref())?)?)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_json(&core, &extensions)
    }

    pub fn core(&self) -> &ProjectSchema {
        &self.core
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectSchema> {
        std::iter::once(&self.core).chain(self.extensions.iter())
    }

    /// Every resource schema of every project, in project then endpoint order.
    pub fn resources(&self) -> impl Iterator<Item = ResourceRef<'_>> {
        self.projects().flat_map(|project| {
            project
                .resource_schemas
                .iter()
                .map(move |(endpoint_name, schema)| ResourceRef {
                    project,
                    endpoint_name: endpoint_name.as_str(),
                    schema,
                })
        })
    }

    /// Find the concrete (non-extension) schema of a resource.
    pub fn find_resource(&self, project_name: &str, resource_name: &str) -> Option<ResourceRef<'_>> {
        self.resources().find(|r| {
            r.project_name() == project_name
                && r.resource_name() == resource_name
                && !r.schema.is_resource_extension
        })
    }

    /// Like [`find_resource`](Self::find_resource) but missing resources are a
    /// schema inconsistency.
    pub fn require_resource(&self, project_name: &str, resource_name: &str) -> Result<ResourceRef<'_>> {
        self.find_resource(project_name, resource_name).ok_or_else(|| {
            DmsError::Configuration(format!(
                "resource '{project_name}.{resource_name}' not found in schema"
            ))
        })
    }

    pub fn is_abstract(&self, project_name: &str, resource_name: &str) -> bool {
        self.projects().any(|p| {
            p.project_name == project_name && p.abstract_resources.contains_key(resource_name)
        })
    }

    /// Identity paths of a concrete or abstract resource.
    pub fn identity_json_paths(&self, project_name: &str, resource_name: &str) -> Option<&[String]> {
        if let Some(resource) = self.find_resource(project_name, resource_name) {
            return Some(&resource.schema.identity_json_paths);
        }
        self.projects()
            .filter(|p| p.project_name == project_name)
            .find_map(|p| p.abstract_resources.get(resource_name))
            .map(|a| a.identity_json_paths.as_slice())
    }

    /// Concrete subclasses of an abstract resource.
    pub fn subclasses_of(&self, project_name: &str, abstract_name: &str) -> Vec<ResourceRef<'_>> {
        self.resources()
            .filter(|r| !r.schema.is_resource_extension)
            .filter(|r| r.schema.is_subclass && r.is_or_extends(project_name, abstract_name))
            .collect()
    }

    /// Check that every reference's identity path matches one of the target
    /// resource's identity paths. All violations are reported together.
    pub fn validate_reference_consistency(&self) -> Result<()> {
        let mut violations = Vec::new();

        for resource in self.resources() {
            for (path_name, document_path) in resource.schema.references() {
                if !document_path.is_resource_reference() {
                    continue;
                }
                let target_project = document_path.target_project(resource.project_name());
                let target_resource = document_path.resource_name.as_deref().unwrap_or_default();

                let Some(target_identity) = self.identity_json_paths(target_project, target_resource)
                else {
                    violations.push(format!(
                        "{}.{} references unknown resource '{target_project}.{target_resource}'",
                        resource.resource_name(),
                        path_name
                    ));
                    continue;
                };

                for pair in &document_path.reference_json_paths {
                    if !target_identity.contains(&pair.identity_json_path) {
                        violations.push(format!(
                            "{}.{}: '{}' is not an identity path of '{target_resource}'",
                            resource.resource_name(),
                            path_name,
                            pair.identity_json_path
                        ));
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(DmsError::Configuration(violations.join("; ")))
        }
    }
}

fn project_schema_from(document: &Value) -> Result<ProjectSchema> {
    let node = document
        .get("projectSchema")
        .ok_or_else(|| DmsError::Schema("schema document has no 'projectSchema' node".into()))?;
    serde_json::from_value(node.clone())
        .map_err(|e| DmsError::Schema(format!("invalid project schema: {e}")))
}
