//! Claim sets: which actions a client may take on which resources, and
//! through which authorization strategies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::LruCache;
use crate::error::Result;

use super::security::OperationType;
use super::strategies::AuthorizationStrategy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAction {
    pub name: OperationType,
    #[serde(default)]
    pub authorization_strategies: Vec<AuthorizationStrategy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaim {
    /// Resource name, e.g. `StudentSchoolAssociation`.
    pub name: String,
    pub actions: Vec<ResourceAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSet {
    pub name: String,
    pub resource_claims: Vec<ResourceClaim>,
}

impl ClaimSet {
    /// Strategies guarding `operation` on `resource_name`, or `None` when the
    /// claim set does not grant the action at all.
    pub fn strategies_for(&self, resource_name: &str, operation: OperationType) -> Option<&[AuthorizationStrategy]> {
        self.resource_claims
            .iter()
            .find(|c| c.name == resource_name)?
            .actions
            .iter()
            .find(|a| a.name == operation)
            .map(|a| a.authorization_strategies.as_slice())
    }
}

/// Source of claim sets, typically the configuration service.
#[async_trait]
pub trait ClaimSetProvider: Send + Sync {
    async fn get_claim_set(&self, name: &str) -> Result<Option<ClaimSet>>;
}

/// Claim sets held in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticClaimSetProvider {
    claim_sets: HashMap<String, ClaimSet>,
}

impl StaticClaimSetProvider {
    pub fn new(claim_sets: impl IntoIterator<Item = ClaimSet>) -> Self {
        Self {
            claim_sets: claim_sets.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    /// Parse a JSON array of claim sets.
    pub fn from_json(json: &str) -> Result<Self> {
        let claim_sets: Vec<ClaimSet> = serde_json::from_str(json)?;
        Ok(Self::new(claim_sets))
    }
}

#[async_trait]
impl ClaimSetProvider for StaticClaimSetProvider {
    async fn get_claim_set(&self, name: &str) -> Result<Option<ClaimSet>> {
        Ok(self.claim_sets.get(name).cloned())
    }
}

/// Bounded cache of resolved claim sets keyed by claim-set name.
pub type ClaimSetCache = LruCache<String, Arc<ClaimSet>>;

/// Looks claim sets up through an injected cache before asking the provider.
pub struct ClaimSetResolver {
    provider: Arc<dyn ClaimSetProvider>,
    cache: Arc<ClaimSetCache>,
}

impl ClaimSetResolver {
    pub fn new(provider: Arc<dyn ClaimSetProvider>, cache: Arc<ClaimSetCache>) -> Self {
        Self { provider, cache }
    }

    pub async fn resolve(&self, name: &str) -> Result<Option<Arc<ClaimSet>>> {
        if let Some(claim_set) = self.cache.get(&name.to_string()) {
            return Ok(Some(claim_set));
        }
        debug!(claim_set = name, "claim set cache miss");
        let Some(claim_set) = self.provider.get_claim_set(name).await? else {
            return Ok(None);
        };
        let claim_set = Arc::new(claim_set);
        self.cache.insert(name.to_string(), claim_set.clone());
        Ok(Some(claim_set))
    }

    pub fn invalidate(&self, name: &str) {
        self.cache.remove(&name.to_string());
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }
}
