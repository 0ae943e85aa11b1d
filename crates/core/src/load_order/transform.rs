//! Graph and order transformations applied around the topological sort.
//!
//! Person resources (students, staff, contacts, parents) can only be read
//! back by a client once the association that ties them to an education
//! organization exists. Loading therefore creates the person first, routes
//! everything that depends on the person through the association, and
//! defers updates of the person until after the association is loaded.

use tracing::debug;

use crate::error::{DmsError, Result};

use super::resources::ResourceGraph;
use super::{LoadOrder, Operation};

/// A person resource and the associations that authorize access to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonRule {
    pub person: &'static str,
    pub associations: &'static [&'static str],
}

pub const PERSON_RULES: [PersonRule; 4] = [
    PersonRule {
        person: "Student",
        associations: &["StudentSchoolAssociation"],
    },
    PersonRule {
        person: "Staff",
        associations: &[
            "StaffEducationOrganizationEmploymentAssociation",
            "StaffEducationOrganizationAssignmentAssociation",
        ],
    },
    PersonRule {
        person: "Contact",
        associations: &["StudentContactAssociation"],
    },
    PersonRule {
        person: "Parent",
        associations: &["StudentParentAssociation"],
    },
];

/// Rewrites applied to the dependency graph before cycles are broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphTransformer {
    PersonAuthorization,
}

impl GraphTransformer {
    pub fn apply(&self, graph: &mut ResourceGraph, project_name: &str) -> Result<()> {
        match self {
            GraphTransformer::PersonAuthorization => {
                for rule in &PERSON_RULES {
                    reroute_person_dependents(graph, project_name, rule)?;
                }
                Ok(())
            }
        }
    }
}

/// Rewrites applied to the grouped load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransformer {
    PersonAuthorization,
}

impl OrderTransformer {
    pub fn apply(
        &self,
        graph: &ResourceGraph,
        project_name: &str,
        orders: &mut Vec<LoadOrder>,
    ) -> Result<()> {
        match self {
            OrderTransformer::PersonAuthorization => {
                for rule in &PERSON_RULES {
                    defer_person_update(graph, project_name, rule, orders)?;
                }
                Ok(())
            }
        }
    }
}

fn missing_association(rule: &PersonRule, association: &str) -> DmsError {
    DmsError::Configuration(format!(
        "'{association}' is required to order '{}' resources but was not found",
        rule.person
    ))
}

fn reroute_person_dependents(graph: &mut ResourceGraph, project_name: &str, rule: &PersonRule) -> Result<()> {
    let Some(person) = graph.find(project_name, rule.person) else {
        return Ok(());
    };
    let associations = rule
        .associations
        .iter()
        .map(|name| {
            graph
                .find(project_name, name)
                .ok_or_else(|| missing_association(rule, name))
        })
        .collect::<Result<Vec<_>>>()?;

    let rerouted: Vec<_> = graph
        .graph()
        .out_edges(person)
        .filter(|(_, e)| !associations.contains(&e.target))
        .map(|(id, _)| id)
        .collect();

    for edge_id in rerouted {
        let Some(edge) = graph.graph_mut().remove_edge(edge_id) else {
            continue;
        };
        for association in &associations {
            if *association == edge.target || graph.graph().has_edge(*association, edge.target) {
                continue;
            }
            graph
                .graph_mut()
                .add_edge(*association, edge.target, edge.data.clone());
        }
    }

    debug!(person = rule.person, "rerouted person dependents through associations");
    Ok(())
}

fn defer_person_update(
    graph: &ResourceGraph,
    project_name: &str,
    rule: &PersonRule,
    orders: &mut Vec<LoadOrder>,
) -> Result<()> {
    let Some(person) = graph.find(project_name, rule.person).and_then(|id| graph.vertex(id)) else {
        return Ok(());
    };
    let Some(index) = orders.iter().position(|o| o.resource == person.endpoint_path) else {
        return Ok(());
    };

    let mut latest = 0;
    for name in rule.associations {
        let endpoint = graph
            .find(project_name, name)
            .and_then(|id| graph.vertex(id))
            .map(|v| v.endpoint_path.as_str())
            .ok_or_else(|| missing_association(rule, name))?;
        let order = orders
            .iter()
            .find(|o| o.resource == endpoint)
            .map(|o| o.order)
            .ok_or_else(|| missing_association(rule, name))?;
        latest = latest.max(order);
    }

    if !orders[index].operations.contains(&Operation::Update) {
        return Ok(());
    }
    orders[index].operations.retain(|op| *op != Operation::Update);
    orders.push(LoadOrder {
        resource: person.endpoint_path.clone(),
        order: latest + 1,
        operations: vec![Operation::Update],
    });
    Ok(())
}
