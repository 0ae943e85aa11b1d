//! Authorization strategies.
//!
//! Each strategy is a pure decision over the document's security elements
//! and the caller's filters. Relationship strategies additionally look up
//! which education organizations a person is associated with.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DmsError, Result};

use super::repository::AuthorizationRepository;
use super::security::{
    AuthorizationFilter, AuthorizationSecurableInfo, DocumentSecurityElements, OperationType,
    ResourceAuthorizationResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorizationStrategy {
    NoFurtherAuthorizationRequired,
    NamespaceBased,
    RelationshipsWithEdOrgsOnly,
    RelationshipsWithEdOrgsAndPeople,
    RelationshipsWithStudentsOnly,
}

impl AuthorizationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            AuthorizationStrategy::NoFurtherAuthorizationRequired => "NoFurtherAuthorizationRequired",
            AuthorizationStrategy::NamespaceBased => "NamespaceBased",
            AuthorizationStrategy::RelationshipsWithEdOrgsOnly => "RelationshipsWithEdOrgsOnly",
            AuthorizationStrategy::RelationshipsWithEdOrgsAndPeople => "RelationshipsWithEdOrgsAndPeople",
            AuthorizationStrategy::RelationshipsWithStudentsOnly => "RelationshipsWithStudentsOnly",
        }
    }

    /// True for strategies that consult the [`AuthorizationRepository`].
    pub fn needs_relationships(&self) -> bool {
        matches!(
            self,
            AuthorizationStrategy::RelationshipsWithEdOrgsAndPeople
                | AuthorizationStrategy::RelationshipsWithStudentsOnly
        )
    }

    pub async fn validate(
        &self,
        elements: &DocumentSecurityElements,
        filters: &[AuthorizationFilter],
        securable_info: &[AuthorizationSecurableInfo],
        operation: OperationType,
        repository: &dyn AuthorizationRepository,
    ) -> Result<ResourceAuthorizationResult> {
        match self {
            AuthorizationStrategy::NoFurtherAuthorizationRequired => {
                Ok(ResourceAuthorizationResult::Authorized)
            }
            AuthorizationStrategy::NamespaceBased => {
                Ok(validate_namespace_based(elements, filters, securable_info, operation))
            }
            AuthorizationStrategy::RelationshipsWithEdOrgsOnly => {
                Ok(validate_edorgs_only(elements, filters, securable_info, operation))
            }
            AuthorizationStrategy::RelationshipsWithStudentsOnly => {
                if !securable_info.contains(&AuthorizationSecurableInfo::Student) {
                    return Ok(ResourceAuthorizationResult::Authorized);
                }
                validate_person(*self, &STUDENT, &elements.student, filters, repository).await
            }
            AuthorizationStrategy::RelationshipsWithEdOrgsAndPeople => {
                validate_edorgs_and_people(elements, filters, securable_info, repository).await
            }
        }
    }
}

impl fmt::Display for AuthorizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthorizationStrategy {
    type Err = DmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NoFurtherAuthorizationRequired" => Ok(AuthorizationStrategy::NoFurtherAuthorizationRequired),
            "NamespaceBased" => Ok(AuthorizationStrategy::NamespaceBased),
            "RelationshipsWithEdOrgsOnly" => Ok(AuthorizationStrategy::RelationshipsWithEdOrgsOnly),
            "RelationshipsWithEdOrgsAndPeople" => Ok(AuthorizationStrategy::RelationshipsWithEdOrgsAndPeople),
            "RelationshipsWithStudentsOnly" => Ok(AuthorizationStrategy::RelationshipsWithStudentsOnly),
            other => Err(DmsError::Configuration(format!(
                "unknown authorization strategy '{other}'"
            ))),
        }
    }
}

fn quoted_list<T: fmt::Display>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn no_property(property: &str) -> String {
    format!(
        "No '{property}' property could be found on the resource in order to perform authorization. Should a different authorization strategy be used?"
    )
}

fn no_edorgs_assigned(strategy: AuthorizationStrategy) -> String {
    format!(
        "The API client has been given permissions on a resource that uses the '{strategy}' authorization strategy but the client doesn't have any education organizations assigned."
    )
}

fn caller_edorgs(filters: &[AuthorizationFilter]) -> Vec<i64> {
    filters
        .iter()
        .filter_map(|f| match f {
            AuthorizationFilter::EducationOrganization(id) => Some(*id),
            AuthorizationFilter::NamespacePrefix(_) => None,
        })
        .collect()
}

/// The document must carry a namespace that starts with one of the caller's
/// namespace prefixes.
pub fn validate_namespace_based(
    elements: &DocumentSecurityElements,
    filters: &[AuthorizationFilter],
    _securable_info: &[AuthorizationSecurableInfo],
    _operation: OperationType,
) -> ResourceAuthorizationResult {
    if elements.namespace.is_empty() {
        return ResourceAuthorizationResult::denied(
            "No 'Namespace' (or Namespace-suffixed) property could be found on the resource in order to perform authorization. Should a different authorization strategy be used?",
        );
    }

    let prefixes: Vec<&str> = filters
        .iter()
        .filter_map(|f| match f {
            AuthorizationFilter::NamespacePrefix(prefix) => Some(prefix.as_str()),
            AuthorizationFilter::EducationOrganization(_) => None,
        })
        .collect();
    if prefixes.is_empty() {
        return ResourceAuthorizationResult::denied(
            "The API client has been given permissions on a resource that uses the 'NamespaceBased' authorization strategy but the client doesn't have any namespace prefixes assigned.",
        );
    }

    let matched = elements
        .namespace
        .iter()
        .any(|namespace| prefixes.iter().any(|prefix| namespace.starts_with(prefix)));
    if matched {
        ResourceAuthorizationResult::Authorized
    } else {
        ResourceAuthorizationResult::denied(format!(
            "The 'Namespace' value of the data does not start with any of the caller's associated namespace prefixes ({}).",
            quoted_list(&prefixes)
        ))
    }
}

/// Both the caller and the document must have education organizations.
/// The ids themselves are not compared.
pub fn validate_edorgs_only(
    elements: &DocumentSecurityElements,
    filters: &[AuthorizationFilter],
    _securable_info: &[AuthorizationSecurableInfo],
    _operation: OperationType,
) -> ResourceAuthorizationResult {
    edorg_presence(AuthorizationStrategy::RelationshipsWithEdOrgsOnly, elements, filters)
}

fn edorg_presence(
    strategy: AuthorizationStrategy,
    elements: &DocumentSecurityElements,
    filters: &[AuthorizationFilter],
) -> ResourceAuthorizationResult {
    if caller_edorgs(filters).is_empty() {
        return ResourceAuthorizationResult::denied(no_edorgs_assigned(strategy));
    }
    if elements.education_organization.is_empty() {
        return ResourceAuthorizationResult::denied(no_property("EducationOrganization"));
    }
    ResourceAuthorizationResult::Authorized
}

/// A person kind checked by the relationship strategies.
struct PersonCheck {
    property: &'static str,
    hint: &'static str,
    kind: AuthorizationSecurableInfo,
}

const STUDENT: PersonCheck = PersonCheck {
    property: "StudentUniqueId",
    hint: "You may need to create a corresponding 'StudentSchoolAssociation' item.",
    kind: AuthorizationSecurableInfo::Student,
};

const CONTACT: PersonCheck = PersonCheck {
    property: "ContactUniqueId",
    hint: "You may need to create a corresponding 'StudentContactAssociation' item.",
    kind: AuthorizationSecurableInfo::Contact,
};

const STAFF: PersonCheck = PersonCheck {
    property: "StaffUniqueId",
    hint: "You may need to create a corresponding 'StaffEducationOrganizationAssignmentAssociation' or 'StaffEducationOrganizationEmploymentAssociation' item.",
    kind: AuthorizationSecurableInfo::Staff,
};

async fn validate_person(
    strategy: AuthorizationStrategy,
    check: &PersonCheck,
    unique_ids: &[String],
    filters: &[AuthorizationFilter],
    repository: &dyn AuthorizationRepository,
) -> Result<ResourceAuthorizationResult> {
    if unique_ids.is_empty() {
        return Ok(ResourceAuthorizationResult::denied(no_property(check.property)));
    }
    let caller = caller_edorgs(filters);
    if caller.is_empty() {
        return Ok(ResourceAuthorizationResult::denied(no_edorgs_assigned(strategy)));
    }

    let distinct: BTreeSet<&str> = unique_ids.iter().map(String::as_str).collect();
    for unique_id in distinct {
        let related = match check.kind {
            AuthorizationSecurableInfo::Contact => {
                repository.get_education_organizations_for_contact(unique_id).await?
            }
            AuthorizationSecurableInfo::Staff => {
                repository.get_education_organizations_for_staff(unique_id).await?
            }
            _ => repository.get_education_organizations_for_student(unique_id).await?,
        };
        if !related.iter().any(|id| caller.contains(id)) {
            return Ok(ResourceAuthorizationResult::denied_with_hint(
                format!(
                    "No relationships have been established between the caller's education organization id claims ({}) and the resource item's {} value.",
                    quoted_list(&caller),
                    check.property
                ),
                check.hint,
            ));
        }
    }
    Ok(ResourceAuthorizationResult::Authorized)
}

async fn validate_edorgs_and_people(
    elements: &DocumentSecurityElements,
    filters: &[AuthorizationFilter],
    securable_info: &[AuthorizationSecurableInfo],
    repository: &dyn AuthorizationRepository,
) -> Result<ResourceAuthorizationResult> {
    let strategy = AuthorizationStrategy::RelationshipsWithEdOrgsAndPeople;

    if securable_info.contains(&AuthorizationSecurableInfo::EducationOrganization) {
        let result = edorg_presence(strategy, elements, filters);
        if !result.is_authorized() {
            return Ok(result);
        }
    }

    let people = [
        (&STUDENT, &elements.student),
        (&CONTACT, &elements.contact),
        (&STAFF, &elements.staff),
    ];
    for (check, unique_ids) in people {
        if !securable_info.contains(&check.kind) {
            continue;
        }
        let result = validate_person(strategy, check, unique_ids, filters, repository).await?;
        if !result.is_authorized() {
            return Ok(result);
        }
    }
    Ok(ResourceAuthorizationResult::Authorized)
}
