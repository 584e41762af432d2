//! Health/status aggregation — the three indicator lights (VPS, exchanges,
//! AI service) shown in the control panel header.
//!
//! Classification is pure and first-match-wins; the poller only gathers
//! observations and hands them to the classifiers. Unknown deployment
//! statuses fail open to `Warning` rather than guessing a hard state.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::domain::DeploymentStatus;
use crate::gateway::FunctionGateway;
use crate::store::ControlStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorColor {
    Connected,
    Warning,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorId {
    Vps,
    Exchanges,
    Ai,
}

/// One indicator light. Derived on every poll, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthIndicator {
    pub id: IndicatorId,
    pub color: IndicatorColor,
    pub is_deploying: bool,
}

/// Classify the VPS light from the registry status, the resolved IP and an
/// optional active probe result. Precedence, first match wins:
/// 1. explicit error status, or inactive with no IP, is disconnected
/// 2. deploying (or starting) is a warning
/// 3. any resolved IP counts as connected
/// 4. everything else (including unknown statuses) is a warning
pub fn classify_vps(
    status: Option<&DeploymentStatus>,
    ip: Option<&str>,
    health_check: Option<bool>,
) -> IndicatorColor {
    let has_ip = ip.is_some_and(|ip| !ip.trim().is_empty());

    if matches!(status, Some(DeploymentStatus::Error)) {
        return IndicatorColor::Disconnected;
    }
    if !has_ip && matches!(status, Some(DeploymentStatus::Inactive)) {
        return IndicatorColor::Disconnected;
    }
    if is_coming_up(status) {
        return IndicatorColor::Warning;
    }
    if has_ip && matches!(status, Some(DeploymentStatus::Running)) {
        return IndicatorColor::Connected;
    }
    if has_ip && health_check == Some(true) {
        return IndicatorColor::Connected;
    }
    if has_ip {
        return IndicatorColor::Connected;
    }
    IndicatorColor::Warning
}

fn is_coming_up(status: Option<&DeploymentStatus>) -> bool {
    match status {
        Some(DeploymentStatus::Deploying) => true,
        Some(DeploymentStatus::Unknown(raw)) => raw.eq_ignore_ascii_case("starting"),
        _ => false,
    }
}

/// Exchanges light: any live connection is enough.
pub fn classify_exchanges(connected_count: usize) -> IndicatorColor {
    if connected_count > 0 {
        IndicatorColor::Connected
    } else {
        IndicatorColor::Disconnected
    }
}

/// AI service light from its raw status string. A missing row is
/// disconnected; an unrecognized status fails open to a warning.
pub fn classify_ai(status: Option<&str>) -> IndicatorColor {
    let Some(status) = status else {
        return IndicatorColor::Disconnected;
    };
    match status.trim().to_ascii_lowercase().as_str() {
        "active" | "online" | "running" => IndicatorColor::Connected,
        "error" | "offline" | "stopped" => IndicatorColor::Disconnected,
        _ => IndicatorColor::Warning,
    }
}

/// Published view of the last poll.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub indicators: Vec<HealthIndicator>,
    pub checked_at: DateTime<Utc>,
}

impl HealthSnapshot {
    fn unknown(now: DateTime<Utc>) -> Self {
        let indicator = |id| HealthIndicator {
            id,
            color: IndicatorColor::Warning,
            is_deploying: false,
        };
        Self {
            indicators: vec![
                indicator(IndicatorId::Vps),
                indicator(IndicatorId::Exchanges),
                indicator(IndicatorId::Ai),
            ],
            checked_at: now,
        }
    }
}

/// Cloneable read handle over the latest health snapshot.
#[derive(Clone)]
pub struct HealthHandle {
    inner: Arc<RwLock<HealthSnapshot>>,
}

impl HealthHandle {
    fn read(&self) -> RwLockReadGuard<'_, HealthSnapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.read().clone()
    }

    pub fn indicator(&self, id: IndicatorId) -> Option<HealthIndicator> {
        self.read().indicators.iter().find(|i| i.id == id).cloned()
    }
}

/// Guard over the poller task; dropping it stops polling.
pub struct HealthRunner {
    task: Option<JoinHandle<()>>,
}

impl HealthRunner {
    pub fn shutdown(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HealthRunner {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Polls the registries, the exchange table and the AI status row, probing
/// the VPS when configured, and publishes classified indicators. Runs
/// independently of the SSOT store.
pub struct HealthMonitor;

impl HealthMonitor {
    pub fn spawn(
        store: Arc<dyn ControlStore>,
        gateway: Arc<dyn FunctionGateway>,
        config: &HealthConfig,
    ) -> (HealthHandle, HealthRunner) {
        let handle = HealthHandle {
            inner: Arc::new(RwLock::new(HealthSnapshot::unknown(Utc::now()))),
        };
        let probe_vps = config.probe_vps;
        let interval = std::time::Duration::from_secs(config.poll_interval_secs.max(1));

        let poller = {
            let handle = handle.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    let snapshot = poll_once(store.as_ref(), gateway.as_ref(), probe_vps).await;
                    *handle.inner.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
                }
            })
        };

        (handle, HealthRunner { task: Some(poller) })
    }
}

async fn poll_once(
    store: &dyn ControlStore,
    gateway: &dyn FunctionGateway,
    probe_vps: bool,
) -> HealthSnapshot {
    // Registry reads degrade to "no observation from that side", same as
    // the deployment resolver.
    let fleet = store.fetch_active_fleet_deployment().await.unwrap_or_else(|e| {
        warn!(error = %e, "health: fleet registry read failed");
        None
    });
    let instance = store.fetch_running_instance().await.unwrap_or_else(|e| {
        warn!(error = %e, "health: instance registry read failed");
        None
    });

    let status = fleet
        .as_ref()
        .map(|f| f.status.clone())
        .or_else(|| instance.as_ref().map(|i| i.status.clone()));
    let ip = fleet
        .as_ref()
        .and_then(|f| f.ip_address.clone())
        .or_else(|| instance.as_ref().and_then(|i| i.ip_address.clone()));
    let provider = fleet
        .as_ref()
        .and_then(|f| f.provider.clone())
        .or_else(|| instance.as_ref().and_then(|i| i.provider.clone()));

    let health_check = match (&ip, probe_vps) {
        (Some(ip), true) => match gateway.check_vps_health(ip, provider.as_deref()).await {
            Ok(response) => Some(response.healthy),
            Err(e) => {
                debug!(error = %e, "health: vps probe failed");
                Some(false)
            }
        },
        _ => None,
    };

    let vps_color = classify_vps(status.as_ref(), ip.as_deref(), health_check);
    let is_deploying = is_coming_up(status.as_ref());

    let connected_count = match store.fetch_exchange_connections().await {
        Ok(rows) => rows.iter().filter(|r| r.is_connected).count(),
        Err(e) => {
            warn!(error = %e, "health: exchange connections read failed");
            0
        }
    };

    let ai_status = store.fetch_ai_status().await.unwrap_or_else(|e| {
        warn!(error = %e, "health: ai status read failed");
        None
    });

    HealthSnapshot {
        indicators: vec![
            HealthIndicator {
                id: IndicatorId::Vps,
                color: vps_color,
                is_deploying,
            },
            HealthIndicator {
                id: IndicatorId::Exchanges,
                color: classify_exchanges(connected_count),
                is_deploying: false,
            },
            HealthIndicator {
                id: IndicatorId::Ai,
                color: classify_ai(ai_status.as_ref().map(|r| r.status.as_str())),
                is_deploying: false,
            },
        ],
        checked_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AiStatusRecord, ExchangeConnectionRecord, FleetRecord};
    use crate::gateway::NoopFunctionGateway;
    use crate::store::MemoryControlStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn error_status_is_disconnected_even_with_ip() {
        assert_eq!(
            classify_vps(
                Some(&DeploymentStatus::Error),
                Some("203.0.113.7"),
                Some(true)
            ),
            IndicatorColor::Disconnected
        );
    }

    #[test]
    fn deploying_is_a_warning_regardless_of_ip() {
        assert_eq!(
            classify_vps(Some(&DeploymentStatus::Deploying), Some("203.0.113.7"), None),
            IndicatorColor::Warning
        );
        assert_eq!(
            classify_vps(Some(&DeploymentStatus::Deploying), None, None),
            IndicatorColor::Warning
        );
        // The legacy registry reports "starting" while a host boots.
        let starting = DeploymentStatus::Unknown("starting".into());
        assert_eq!(
            classify_vps(Some(&starting), Some("203.0.113.7"), None),
            IndicatorColor::Warning
        );
    }

    #[test]
    fn any_resolved_ip_counts_as_connected() {
        assert_eq!(
            classify_vps(Some(&DeploymentStatus::Running), Some("203.0.113.7"), None),
            IndicatorColor::Connected
        );
        // Even an unhealthy probe does not outrank a resolved address.
        assert_eq!(
            classify_vps(Some(&DeploymentStatus::Active), Some("203.0.113.7"), Some(false)),
            IndicatorColor::Connected
        );
        assert_eq!(
            classify_vps(None, Some("203.0.113.7"), None),
            IndicatorColor::Connected
        );
    }

    #[test]
    fn inactive_without_ip_is_disconnected() {
        assert_eq!(
            classify_vps(Some(&DeploymentStatus::Inactive), None, None),
            IndicatorColor::Disconnected
        );
    }

    #[test]
    fn unknown_status_fails_open_to_warning() {
        let unknown = DeploymentStatus::Unknown("provisioning".into());
        assert_eq!(classify_vps(Some(&unknown), None, None), IndicatorColor::Warning);
        assert_eq!(classify_vps(None, None, None), IndicatorColor::Warning);
    }

    #[test]
    fn classifiers_for_exchanges_and_ai() {
        assert_eq!(classify_exchanges(0), IndicatorColor::Disconnected);
        assert_eq!(classify_exchanges(2), IndicatorColor::Connected);

        assert_eq!(classify_ai(Some("active")), IndicatorColor::Connected);
        assert_eq!(classify_ai(Some("OFFLINE")), IndicatorColor::Disconnected);
        assert_eq!(classify_ai(Some("retraining")), IndicatorColor::Warning);
        assert_eq!(classify_ai(None), IndicatorColor::Disconnected);
    }

    #[tokio::test]
    async fn monitor_publishes_classified_indicators() {
        let store = Arc::new(MemoryControlStore::new());
        store
            .seed_fleet(FleetRecord {
                row_id: Uuid::new_v4(),
                deployment_id: Some("dep-1".into()),
                droplet_id: None,
                provider: Some("vultr".into()),
                ip_address: Some("203.0.113.7".into()),
                status: DeploymentStatus::Active,
                updated_at: Utc::now(),
            })
            .await;
        store
            .seed_exchange(ExchangeConnectionRecord {
                exchange: "binance".into(),
                is_connected: true,
                total_balance: dec!(100),
                updated_at: Utc::now(),
            })
            .await;
        store
            .seed_ai_status(AiStatusRecord {
                status: "active".into(),
                updated_at: Utc::now(),
            })
            .await;

        let config = HealthConfig {
            poll_interval_secs: 3600,
            probe_vps: true,
        };
        let (handle, runner) =
            HealthMonitor::spawn(store, Arc::new(NoopFunctionGateway), &config);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let vps = handle.indicator(IndicatorId::Vps).expect("vps indicator");
        assert_eq!(vps.color, IndicatorColor::Connected);
        assert!(!vps.is_deploying);
        assert_eq!(
            handle
                .indicator(IndicatorId::Exchanges)
                .expect("exchanges indicator")
                .color,
            IndicatorColor::Connected
        );
        assert_eq!(
            handle.indicator(IndicatorId::Ai).expect("ai indicator").color,
            IndicatorColor::Connected
        );

        runner.shutdown();
    }
}
