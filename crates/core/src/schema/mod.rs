//! Schema graph model: project and resource schemas, identities, and the
//! reloadable schema snapshot shared by request handling.

pub mod documents;
pub mod identity;
pub mod model;
pub mod provider;

#[cfg(test)]
pub(crate) mod fixtures;

pub use documents::{ApiSchemaDocuments, ResourceRef};
pub use identity::{
    extract_document_identity, extract_document_references, referential_ids_for, DocumentIdentity,
    DocumentReference, IdentityElement, ReferentialId,
};
pub use model::{
    AbstractResource, DocumentPath, DocumentPathKind, EdOrgSecurableElement, ProjectSchema,
    ReferenceJsonPath, ResourceSchema, SecurableElements,
};
pub use provider::{SchemaProvider, SchemaSnapshot};
