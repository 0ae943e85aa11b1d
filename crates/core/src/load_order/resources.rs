//! The resource dependency graph built from the loaded schemas.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DmsError, Result};
use crate::schema::{ApiSchemaDocuments, DocumentPath, ResourceRef};

use super::graph::{Cycle, Graph, VertexId};

/// A resource as seen by the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceVertex {
    pub project_name: String,
    pub resource_name: String,
    pub endpoint_path: String,
    pub is_school_year_enumeration: bool,
}

impl ResourceVertex {
    fn from_resource(resource: &ResourceRef<'_>) -> Self {
        Self {
            project_name: resource.project_name().to_string(),
            resource_name: resource.resource_name().to_string(),
            endpoint_path: resource.endpoint_path(),
            is_school_year_enumeration: resource.schema.is_school_year_enumeration,
        }
    }
}

/// Edge from a referenced resource to the resource that references it.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyEdge {
    pub path_name: String,
    pub document_path: DocumentPath,
}

impl DependencyEdge {
    /// Optional references may be dropped to break a cycle.
    pub fn is_removable(&self) -> bool {
        !self.document_path.is_required
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: Graph<ResourceVertex, DependencyEdge>,
}

impl ResourceGraph {
    /// Build the dependency graph of every non-extension resource.
    ///
    /// References to an abstract resource fan out to each of its concrete
    /// subclasses. Self references are skipped and school year enumeration
    /// vertices are removed once all edges are in place.
    pub fn build(schemas: &ApiSchemaDocuments) -> Result<Self> {
        let mut resources: Vec<ResourceRef<'_>> = schemas
            .resources()
            .filter(|r| !r.schema.is_resource_extension)
            .collect();
        resources.sort_by_key(|r| r.endpoint_path());

        let mut graph = Graph::new();
        let ids: Vec<VertexId> = resources
            .iter()
            .map(|r| graph.add_vertex(ResourceVertex::from_resource(r)))
            .collect();
        let mut resource_graph = ResourceGraph { graph };

        for (referencing, target_id) in resources.iter().zip(ids.iter().copied()) {
            for (path_name, document_path) in &referencing.schema.document_paths_mapping {
                if !document_path.is_reference {
                    continue;
                }
                let Some(referenced_name) = document_path.resource_name.as_deref() else {
                    continue;
                };
                let referenced_project = document_path.target_project(referencing.project_name());

                let sources: Vec<VertexId> = if schemas.is_abstract(referenced_project, referenced_name) {
                    schemas
                        .subclasses_of(referenced_project, referenced_name)
                        .iter()
                        .filter_map(|r| resource_graph.find(r.project_name(), r.resource_name()))
                        .collect()
                } else {
                    let source = resource_graph
                        .find(referenced_project, referenced_name)
                        .ok_or_else(|| {
                            DmsError::Configuration(format!(
                                "'{}' references '{referenced_project}.{referenced_name}' which is not a known resource",
                                referencing.resource_name()
                            ))
                        })?;
                    vec![source]
                };

                for source in sources {
                    if source == target_id {
                        continue;
                    }
                    resource_graph.graph.add_edge(
                        source,
                        target_id,
                        DependencyEdge {
                            path_name: path_name.clone(),
                            document_path: document_path.clone(),
                        },
                    );
                }
            }
        }

        let school_years: Vec<VertexId> = resource_graph
            .graph
            .vertices()
            .filter(|(_, v)| v.is_school_year_enumeration)
            .map(|(id, _)| id)
            .collect();
        for id in school_years {
            resource_graph.graph.remove_vertex(id);
        }

        debug!(
            vertices = resource_graph.graph.vertex_count(),
            edges = resource_graph.graph.edge_count(),
            "built resource dependency graph"
        );
        Ok(resource_graph)
    }

    pub fn graph(&self) -> &Graph<ResourceVertex, DependencyEdge> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph<ResourceVertex, DependencyEdge> {
        &mut self.graph
    }

    pub fn find(&self, project_name: &str, resource_name: &str) -> Option<VertexId> {
        self.graph
            .vertices()
            .find(|(_, v)| v.project_name == project_name && v.resource_name == resource_name)
            .map(|(id, _)| id)
    }

    pub fn vertex(&self, id: VertexId) -> Option<&ResourceVertex> {
        self.graph.vertex(id)
    }

    /// Remove optional edges until no cycle remains. Returns how many edges
    /// were dropped.
    pub fn break_cycles(&mut self) -> Result<usize> {
        match self.graph.break_cycles(DependencyEdge::is_removable) {
            Ok(removed) => {
                for edge in &removed {
                    warn!(
                        source = self.endpoint_of(edge.source),
                        target = self.endpoint_of(edge.target),
                        path = %edge.data.path_name,
                        "removed optional reference to break dependency cycle"
                    );
                }
                Ok(removed.len())
            }
            Err(cycle) => Err(DmsError::NonAcyclicGraph {
                cycle: self.describe_cycle(&cycle),
            }),
        }
    }

    /// Dependency levels, each sorted by endpoint path.
    pub fn groups(&self) -> Result<Vec<Vec<&ResourceVertex>>> {
        let groups = self
            .graph
            .grouped(|v| v.endpoint_path.clone())
            .map_err(|unplaced| DmsError::NonAcyclicGraph {
                cycle: unplaced
                    .iter()
                    .map(|id| self.endpoint_of(*id))
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        Ok(groups
            .into_iter()
            .map(|group| group.into_iter().filter_map(|id| self.graph.vertex(id)).collect())
            .collect())
    }

    /// `/a/x -> /a/y -> /a/x`
    pub fn describe_cycle(&self, cycle: &Cycle) -> String {
        let mut names: Vec<&str> = cycle.path.iter().map(|id| self.endpoint_of(*id)).collect();
        if let Some(first) = names.first().copied() {
            names.push(first);
        }
        names.join(" -> ")
    }

    fn endpoint_of(&self, id: VertexId) -> &str {
        self.graph
            .vertex(id)
            .map(|v| v.endpoint_path.as_str())
            .unwrap_or("<removed>")
    }
}
