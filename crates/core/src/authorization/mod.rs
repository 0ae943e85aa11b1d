//! Authorization: security element extraction, strategies, claim sets and
//! the per-request authorization handler.

pub mod claims;
pub mod handler;
pub mod repository;
pub mod security;
pub mod strategies;

use serde_json::Value;

use crate::error::Result;
use crate::schema::ResourceSchema;

pub use claims::{
    ClaimSet, ClaimSetCache, ClaimSetProvider, ClaimSetResolver, ResourceAction, ResourceClaim,
    StaticClaimSetProvider,
};
pub use handler::ResourceAuthorizationHandler;
pub use repository::AuthorizationRepository;
pub use security::{
    AuthorizationFilter, AuthorizationSecurableInfo, ClientAuthorizations, DocumentSecurityElements,
    EducationOrganizationElement, OperationType, ResourceAuthorizationResult,
};
pub use strategies::{validate_edorgs_only, validate_namespace_based, AuthorizationStrategy};

/// Security elements of `document` according to `schema`.
pub fn extract_security_elements(schema: &ResourceSchema, document: &Value) -> Result<DocumentSecurityElements> {
    DocumentSecurityElements::extract(schema, document)
}
