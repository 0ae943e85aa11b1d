use async_trait::async_trait;

use crate::error::Result;

/// Read-only relationship lookups used by the relationship-based
/// authorization strategies.
#[async_trait]
pub trait AuthorizationRepository: Send + Sync {
    /// Education organizations a student is associated with.
    async fn get_education_organizations_for_student(&self, student_unique_id: &str) -> Result<Vec<i64>>;

    async fn get_education_organizations_for_contact(&self, contact_unique_id: &str) -> Result<Vec<i64>>;

    async fn get_education_organizations_for_staff(&self, staff_unique_id: &str) -> Result<Vec<i64>>;
}
