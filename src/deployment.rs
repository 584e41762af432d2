//! Deployment resolution — merges the two parallel deployment registries
//! (primary "fleet" and legacy "instance") into one identity.
//!
//! Deployments can be provisioned through two different code paths, so the
//! same physical host may appear in both registries under different
//! identifiers. Callers only ever see the merged result; a `NotFound`
//! resolution means "operate in local-only mode", never an error.

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{FleetRecord, InstanceRecord, Registry};
use crate::error::Result;
use crate::store::ControlStore;

/// The merged identity of the currently active compute target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDeployment {
    pub deployment_id: String,
    pub provider: Option<String>,
    pub ip_address: Option<String>,
    /// Registry row whose status column tracks this deployment, when one
    /// of the registries produced the candidate.
    pub status_row: Option<(Registry, Uuid)>,
}

/// Outcome of a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedDeployment {
    Found(ActiveDeployment),
    NotFound,
}

impl ResolvedDeployment {
    pub fn found(&self) -> Option<&ActiveDeployment> {
        match self {
            Self::Found(deployment) => Some(deployment),
            Self::NotFound => None,
        }
    }
}

/// Pure fallback merge over the two optional registry rows.
///
/// Identity precedence, first non-null wins: fleet deployment id, fleet
/// secondary (droplet) id, the legacy row's deployment link, the legacy
/// row's own key. Provider and IP resolve primary-before-legacy.
pub fn merge_candidates(
    fleet: Option<&FleetRecord>,
    instance: Option<&InstanceRecord>,
) -> ResolvedDeployment {
    let deployment_id = fleet
        .and_then(|f| f.deployment_id.clone())
        .or_else(|| fleet.and_then(|f| f.droplet_id.clone()))
        .or_else(|| instance.and_then(|i| i.linked_deployment_id.clone()))
        .or_else(|| instance.map(|i| i.row_id.to_string()));

    let Some(deployment_id) = deployment_id else {
        return ResolvedDeployment::NotFound;
    };

    let provider = fleet
        .and_then(|f| f.provider.clone())
        .or_else(|| instance.and_then(|i| i.provider.clone()));

    let ip_address = fleet
        .and_then(|f| f.ip_address.clone())
        .or_else(|| instance.and_then(|i| i.ip_address.clone()));

    let status_row = fleet
        .map(|f| (Registry::Fleet, f.row_id))
        .or_else(|| instance.map(|i| (Registry::Instance, i.row_id)));

    ResolvedDeployment::Found(ActiveDeployment {
        deployment_id,
        provider,
        ip_address,
        status_row,
    })
}

/// Resolves the active compute target against both registries.
pub struct DeploymentResolver {
    store: Arc<dyn ControlStore>,
}

impl DeploymentResolver {
    pub fn new(store: Arc<dyn ControlStore>) -> Self {
        Self { store }
    }

    /// Query both registries and merge. A lookup failure on either side is
    /// "no candidate from that registry", logged and degraded, never fatal.
    pub async fn resolve_active(&self) -> Result<ResolvedDeployment> {
        let fleet = match self.store.fetch_active_fleet_deployment().await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "fleet registry lookup failed, continuing without it");
                None
            }
        };

        let instance = match self.store.fetch_running_instance().await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "instance registry lookup failed, continuing without it");
                None
            }
        };

        let resolved = merge_candidates(fleet.as_ref(), instance.as_ref());
        match &resolved {
            ResolvedDeployment::Found(deployment) => {
                debug!(
                    deployment_id = %deployment.deployment_id,
                    provider = deployment.provider.as_deref().unwrap_or("unknown"),
                    "resolved active deployment"
                );
            }
            ResolvedDeployment::NotFound => {
                debug!("no active deployment, operating in local-only mode");
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeploymentStatus;
    use crate::store::{MemoryControlStore, WatchedTable};
    use chrono::Utc;

    fn fleet(deployment_id: Option<&str>, droplet_id: Option<&str>) -> FleetRecord {
        FleetRecord {
            row_id: Uuid::new_v4(),
            deployment_id: deployment_id.map(String::from),
            droplet_id: droplet_id.map(String::from),
            provider: Some("vultr".into()),
            ip_address: Some("203.0.113.7".into()),
            status: DeploymentStatus::Active,
            updated_at: Utc::now(),
        }
    }

    fn instance(link: Option<&str>) -> InstanceRecord {
        InstanceRecord {
            row_id: Uuid::new_v4(),
            linked_deployment_id: link.map(String::from),
            provider: Some("digitalocean".into()),
            ip_address: Some("198.51.100.4".into()),
            status: DeploymentStatus::Running,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fleet_id_wins_over_everything() {
        let f = fleet(Some("dep-1"), Some("droplet-9"));
        let i = instance(Some("dep-legacy"));
        let resolved = merge_candidates(Some(&f), Some(&i));
        let active = resolved.found().expect("should resolve");
        assert_eq!(active.deployment_id, "dep-1");
        assert_eq!(active.provider.as_deref(), Some("vultr"));
        assert_eq!(active.status_row, Some((Registry::Fleet, f.row_id)));
    }

    #[test]
    fn secondary_id_then_legacy_link_then_legacy_key() {
        let f = fleet(None, Some("droplet-9"));
        let i = instance(Some("dep-legacy"));
        assert_eq!(
            merge_candidates(Some(&f), Some(&i))
                .found()
                .expect("resolve")
                .deployment_id,
            "droplet-9"
        );

        let f = fleet(None, None);
        assert_eq!(
            merge_candidates(Some(&f), Some(&i))
                .found()
                .expect("resolve")
                .deployment_id,
            "dep-legacy"
        );

        let i = instance(None);
        let resolved = merge_candidates(None, Some(&i));
        let active = resolved.found().expect("resolve");
        assert_eq!(active.deployment_id, i.row_id.to_string());
        assert_eq!(active.provider.as_deref(), Some("digitalocean"));
    }

    #[test]
    fn nothing_resolves_to_not_found() {
        assert_eq!(merge_candidates(None, None), ResolvedDeployment::NotFound);
        // A fleet row with no identifiers and no legacy fallback is NotFound too.
        let f = FleetRecord {
            deployment_id: None,
            droplet_id: None,
            provider: None,
            ip_address: None,
            ..fleet(None, None)
        };
        assert_eq!(
            merge_candidates(Some(&f), None),
            ResolvedDeployment::NotFound
        );
    }

    #[tokio::test]
    async fn resolution_is_idempotent_without_writes() {
        let store = Arc::new(MemoryControlStore::new());
        store.seed_fleet(fleet(Some("dep-7"), None)).await;
        store.seed_instance(instance(None)).await;

        let resolver = DeploymentResolver::new(store);
        let first = resolver.resolve_active().await.expect("first resolve");
        let second = resolver.resolve_active().await.expect("second resolve");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn registry_failures_degrade_to_the_other_side() {
        let store = Arc::new(MemoryControlStore::new());
        store.seed_instance(instance(Some("dep-legacy"))).await;
        store.fail_reads(WatchedTable::Fleet, true);

        let resolver = DeploymentResolver::new(store);
        let resolved = resolver.resolve_active().await.expect("resolve");
        assert_eq!(
            resolved.found().expect("legacy candidate").deployment_id,
            "dep-legacy"
        );
    }
}
