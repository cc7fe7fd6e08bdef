//! Organization boundary. The engine only ever reads the `graph_enabled`
//! gate; administration lives elsewhere.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::{OrgId, OrganizationConfig};

#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn get(&self, id: OrgId) -> Result<Option<OrganizationConfig>>;
    async fn list(&self) -> Result<Vec<OrganizationConfig>>;
}

/// Whether the graph adapter may run for this scope: true iff at least one
/// in-scope organization has `graph_enabled`. `None` scope means every
/// visible organization.
pub async fn graph_allowed(
    directory: &dyn OrganizationDirectory,
    org_ids: Option<&[OrgId]>,
) -> Result<bool> {
    match org_ids {
        Some(ids) => {
            for id in ids {
                if let Some(org) = directory.get(*id).await? {
                    if org.graph_enabled {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        None => Ok(directory.list().await?.iter().any(|org| org.graph_enabled)),
    }
}

/// Fixed in-memory directory, used by tests and single-tenant embeddings of
/// the engine.
pub struct StaticOrgDirectory {
    orgs: HashMap<OrgId, OrganizationConfig>,
}

impl StaticOrgDirectory {
    pub fn new(orgs: impl IntoIterator<Item = OrganizationConfig>) -> Self {
        Self {
            orgs: orgs.into_iter().map(|org| (org.id, org)).collect(),
        }
    }
}

#[async_trait]
impl OrganizationDirectory for StaticOrgDirectory {
    async fn get(&self, id: OrgId) -> Result<Option<OrganizationConfig>> {
        Ok(self.orgs.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<OrganizationConfig>> {
        let mut orgs: Vec<_> = self.orgs.values().cloned().collect();
        orgs.sort_by_key(|org| org.id);
        Ok(orgs)
    }
}
