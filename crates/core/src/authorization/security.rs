//! Per-request security inputs and the authorization verdict.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::jsonpath::JsonPath;
use crate::schema::ResourceSchema;

/// An education organization id found in a document, with the schema
/// property it was read from (e.g. `SchoolId`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EducationOrganizationElement {
    pub property_name: String,
    pub id: i64,
}

/// Security-relevant values extracted from one document body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSecurityElements {
    pub namespace: Vec<String>,
    pub education_organization: Vec<EducationOrganizationElement>,
    pub student: Vec<String>,
    pub contact: Vec<String>,
    pub staff: Vec<String>,
}

impl DocumentSecurityElements {
    /// Evaluate the resource's securable element paths against `document`.
    ///
    /// Missing values are simply absent from the result; deciding whether
    /// that is acceptable is left to the strategies.
    pub fn extract(schema: &ResourceSchema, document: &Value) -> Result<Self> {
        let elements = &schema.securable_elements;
        let mut extracted = DocumentSecurityElements::default();

        for path in &elements.namespace {
            extracted.namespace.extend(strings_at(path, document)?);
        }
        for element in &elements.education_organization {
            let path = JsonPath::parse(&element.json_path)?;
            for value in path.select_values(document) {
                let id = match value {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                };
                if let Some(id) = id {
                    extracted.education_organization.push(EducationOrganizationElement {
                        property_name: element.meta_ed_name.clone(),
                        id,
                    });
                }
            }
        }
        for path in &elements.student {
            extracted.student.extend(strings_at(path, document)?);
        }
        for path in &elements.contact {
            extracted.contact.extend(strings_at(path, document)?);
        }
        for path in &elements.staff {
            extracted.staff.extend(strings_at(path, document)?);
        }
        Ok(extracted)
    }
}

fn strings_at(path: &str, document: &Value) -> Result<Vec<String>> {
    let path = JsonPath::parse(path)?;
    Ok(path
        .select_values(document)
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

/// A value the caller's claims restrict access to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AuthorizationFilter {
    NamespacePrefix(String),
    EducationOrganization(i64),
}

/// The kinds of securable element a resource declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorizationSecurableInfo {
    Namespace,
    EducationOrganization,
    Student,
    Contact,
    Staff,
}

impl AuthorizationSecurableInfo {
    /// The securable kinds `schema` declares, in evaluation order.
    pub fn for_resource(schema: &ResourceSchema) -> Vec<Self> {
        let elements = &schema.securable_elements;
        let mut info = Vec::new();
        if !elements.namespace.is_empty() {
            info.push(Self::Namespace);
        }
        if !elements.education_organization.is_empty() {
            info.push(Self::EducationOrganization);
        }
        if !elements.student.is_empty() {
            info.push(Self::Student);
        }
        if !elements.contact.is_empty() {
            info.push(Self::Contact);
        }
        if !elements.staff.is_empty() {
            info.push(Self::Staff);
        }
        info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Create => "Create",
            OperationType::Read => "Read",
            OperationType::Update => "Update",
            OperationType::Delete => "Delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result")]
pub enum ResourceAuthorizationResult {
    Authorized,
    NotAuthorized {
        error_messages: Vec<String>,
        hints: Vec<String>,
    },
}

impl ResourceAuthorizationResult {
    pub fn denied(message: impl Into<String>) -> Self {
        ResourceAuthorizationResult::NotAuthorized {
            error_messages: vec![message.into()],
            hints: Vec::new(),
        }
    }

    pub fn denied_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        ResourceAuthorizationResult::NotAuthorized {
            error_messages: vec![message.into()],
            hints: vec![hint.into()],
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, ResourceAuthorizationResult::Authorized)
    }

    pub fn error_messages(&self) -> &[String] {
        match self {
            ResourceAuthorizationResult::Authorized => &[],
            ResourceAuthorizationResult::NotAuthorized { error_messages, .. } => error_messages,
        }
    }

    pub fn hints(&self) -> &[String] {
        match self {
            ResourceAuthorizationResult::Authorized => &[],
            ResourceAuthorizationResult::NotAuthorized { hints, .. } => hints,
        }
    }
}

/// What an authenticated API client is allowed to see, as carried by its
/// token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAuthorizations {
    pub token_id: String,
    pub claim_set_name: String,
    #[serde(default)]
    pub education_organization_ids: Vec<i64>,
    #[serde(default)]
    pub namespace_prefixes: Vec<String>,
}

impl ClientAuthorizations {
    pub fn filters(&self) -> Vec<AuthorizationFilter> {
        self.namespace_prefixes
            .iter()
            .cloned()
            .map(AuthorizationFilter::NamespacePrefix)
            .chain(
                self.education_organization_ids
                    .iter()
                    .copied()
                    .map(AuthorizationFilter::EducationOrganization),
            )
            .collect()
    }
}
