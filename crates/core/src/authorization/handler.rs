use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::schema::ResourceRef;

use super::claims::ClaimSetResolver;
use super::repository::AuthorizationRepository;
use super::security::{
    AuthorizationSecurableInfo, ClientAuthorizations, DocumentSecurityElements, OperationType,
    ResourceAuthorizationResult,
};

/// Authorizes one request against the caller's claim set.
///
/// Every strategy the claim set attaches to the resource action must
/// authorize; the first denial is returned.
pub struct ResourceAuthorizationHandler {
    claim_sets: ClaimSetResolver,
    repository: Arc<dyn AuthorizationRepository>,
}

impl ResourceAuthorizationHandler {
    pub fn new(claim_sets: ClaimSetResolver, repository: Arc<dyn AuthorizationRepository>) -> Self {
        Self {
            claim_sets,
            repository,
        }
    }

    pub fn claim_sets(&self) -> &ClaimSetResolver {
        &self.claim_sets
    }

    pub async fn authorize(
        &self,
        client: &ClientAuthorizations,
        resource: &ResourceRef<'_>,
        operation: OperationType,
        document: &Value,
    ) -> Result<ResourceAuthorizationResult> {
        let Some(claim_set) = self.claim_sets.resolve(&client.claim_set_name).await? else {
            return Ok(ResourceAuthorizationResult::denied(format!(
                "The API client's assigned claim set (currently '{}') could not be found.",
                client.claim_set_name
            )));
        };

        let Some(strategies) = claim_set.strategies_for(resource.resource_name(), operation) else {
            return Ok(ResourceAuthorizationResult::denied(format!(
                "The API client's assigned claim set (currently '{}') does not grant permission of the '{operation}' action on the '{}' resource.",
                client.claim_set_name,
                resource.resource_name()
            )));
        };

        let elements = DocumentSecurityElements::extract(resource.schema, document)?;
        let securable_info = AuthorizationSecurableInfo::for_resource(resource.schema);
        let filters = client.filters();

        for strategy in strategies {
            let result = strategy
                .validate(&elements, &filters, &securable_info, operation, self.repository.as_ref())
                .await?;
            if !result.is_authorized() {
                info!(
                    token_id = %client.token_id,
                    resource = resource.resource_name(),
                    %operation,
                    %strategy,
                    "authorization denied"
                );
                return Ok(result);
            }
        }
        Ok(ResourceAuthorizationResult::Authorized)
    }
}
