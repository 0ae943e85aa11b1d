//! Resource load order.
//!
//! Builds the resource dependency graph from the loaded schemas, applies the
//! graph transformers, breaks cycles on optional references and groups the
//! result into numbered levels. Resources in the same level have no
//! dependencies on one another; every level only depends on earlier ones.

pub mod graph;
pub mod graphml;
pub mod resources;
pub mod transform;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::schema::ApiSchemaDocuments;

pub use graphml::to_graphml;
pub use resources::{DependencyEdge, ResourceGraph, ResourceVertex};
pub use transform::{GraphTransformer, OrderTransformer, PersonRule, PERSON_RULES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
}

/// One entry of the load order, e.g.
/// `{"resource":"/ed-fi/schools","order":2,"operations":["Create","Update"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrder {
    pub resource: String,
    pub order: u32,
    pub operations: Vec<Operation>,
}

impl LoadOrder {
    pub fn new(resource: impl Into<String>, order: u32) -> Self {
        Self {
            resource: resource.into(),
            order,
            operations: vec![Operation::Create, Operation::Update],
        }
    }
}

/// Computes load orders with a configurable set of transformers.
#[derive(Debug, Clone)]
pub struct LoadOrderCalculator {
    graph_transformers: Vec<GraphTransformer>,
    order_transformers: Vec<OrderTransformer>,
}

impl Default for LoadOrderCalculator {
    fn default() -> Self {
        Self {
            graph_transformers: vec![GraphTransformer::PersonAuthorization],
            order_transformers: vec![OrderTransformer::PersonAuthorization],
        }
    }
}

impl LoadOrderCalculator {
    pub fn new(
        graph_transformers: Vec<GraphTransformer>,
        order_transformers: Vec<OrderTransformer>,
    ) -> Self {
        Self {
            graph_transformers,
            order_transformers,
        }
    }

    /// The transformed, acyclic dependency graph.
    pub fn dependency_graph(&self, schemas: &ApiSchemaDocuments) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::build(schemas)?;
        let project_name = &schemas.core().project_name;
        for transformer in &self.graph_transformers {
            transformer.apply(&mut graph, project_name)?;
        }
        graph.break_cycles()?;
        Ok(graph)
    }

    pub fn calculate(&self, schemas: &ApiSchemaDocuments) -> Result<Vec<LoadOrder>> {
        let graph = self.dependency_graph(schemas)?;

        let mut orders = Vec::new();
        for (index, group) in graph.groups()?.into_iter().enumerate() {
            let order = index as u32 + 1;
            orders.extend(group.into_iter().map(|v| LoadOrder::new(v.endpoint_path.clone(), order)));
        }

        let project_name = &schemas.core().project_name;
        for transformer in &self.order_transformers {
            transformer.apply(&graph, project_name, &mut orders)?;
        }
        orders.sort_by(|a, b| (a.order, &a.resource).cmp(&(b.order, &b.resource)));

        info!(
            resources = graph.graph().vertex_count(),
            groups = orders.iter().map(|o| o.order).max().unwrap_or(0),
            "calculated resource load order"
        );
        Ok(orders)
    }
}

/// Load order with the default person transformers.
pub fn grouped_load_order(schemas: &ApiSchemaDocuments) -> Result<Vec<LoadOrder>> {
    LoadOrderCalculator::default().calculate(schemas)
}
