//! Bot lifecycle control — start, stop, error recovery and the global kill
//! switch.
//!
//! Every flow is an ordered sequence of steps with an explicit severity:
//! `Critical` steps abort the flow on failure, `BestEffort` steps record a
//! warning and keep going. Ordering is load-bearing on start: the
//! kill-switch flag is cleared before the remote process is signalled, and
//! the status row is only marked running after the signal step has run, so
//! a freshly signalled bot can never observe an engaged kill switch.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ControlConfig;
use crate::deployment::{ActiveDeployment, DeploymentResolver, ResolvedDeployment};
use crate::domain::{BotStatus, DeploymentStatus, NewNotification, NotificationKind, TradingConfigPatch};
use crate::error::{PitbossError, Result};
use crate::gateway::{AlertLevel, BotControlAction, FunctionGateway, TelegramAlerter, TradeEngineAction};
use crate::store::ControlStore;
use crate::sync::StateHandle;

/// How a start was requested. Live-mode starts move real funds, so they
/// require the caller to pass the equity figure it showed the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Paper,
    LiveConfirmed { acknowledged_equity: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSeverity {
    /// Failure aborts the flow.
    Critical,
    /// Failure is recorded and the flow continues.
    BestEffort,
}

/// Outcome of one step of a lifecycle flow.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: &'static str,
    pub severity: StepSeverity,
    pub error: Option<String>,
}

impl StepReport {
    fn ok(name: &'static str, severity: StepSeverity) -> Self {
        Self {
            name,
            severity,
            error: None,
        }
    }

    fn failed(name: &'static str, severity: StepSeverity, error: &PitbossError) -> Self {
        Self {
            name,
            severity,
            error: Some(error.to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Step-by-step account of a lifecycle flow, in execution order.
#[derive(Debug, Clone, Default)]
pub struct LifecycleReport {
    pub steps: Vec<StepReport>,
}

impl LifecycleReport {
    pub fn fully_succeeded(&self) -> bool {
        self.steps.iter().all(StepReport::succeeded)
    }

    /// Best-effort steps that failed.
    pub fn warnings(&self) -> Vec<&StepReport> {
        self.steps
            .iter()
            .filter(|s| !s.succeeded() && s.severity == StepSeverity::BestEffort)
            .collect()
    }

    fn push_ok(&mut self, name: &'static str, severity: StepSeverity) {
        self.steps.push(StepReport::ok(name, severity));
    }

    fn push_failed(&mut self, name: &'static str, severity: StepSeverity, error: &PitbossError) {
        warn!(step = name, %error, "lifecycle step failed");
        self.steps.push(StepReport::failed(name, severity, error));
    }
}

/// Validate a kill-switch confirmation code before anything leaves the
/// process. Non-digit characters are stripped (the input field does the
/// same as the user types); what remains must be exactly `expected_len`
/// digits.
pub fn sanitize_code(raw: &str, expected_len: usize) -> Result<String> {
    let code: String = raw.chars().filter(char::is_ascii_digit).collect();
    if code.len() != expected_len {
        return Err(PitbossError::Validation(format!(
            "confirmation code must be exactly {expected_len} digits"
        )));
    }
    Ok(code)
}

/// Drives every bot state transition. Owns no state of its own; reads the
/// snapshot through the state handle and writes through the store.
pub struct BotLifecycleController {
    store: Arc<dyn ControlStore>,
    gateway: Arc<dyn FunctionGateway>,
    state: StateHandle,
    resolver: DeploymentResolver,
    alerts: TelegramAlerter,
    kill_code_length: usize,
}

impl BotLifecycleController {
    pub fn new(
        store: Arc<dyn ControlStore>,
        gateway: Arc<dyn FunctionGateway>,
        state: StateHandle,
        alerts: TelegramAlerter,
        config: &ControlConfig,
    ) -> Self {
        let resolver = DeploymentResolver::new(Arc::clone(&store));
        Self {
            store,
            gateway,
            state,
            resolver,
            alerts,
            kill_code_length: config.kill_code_length,
        }
    }

    /// Start the bot.
    ///
    /// Sequence: confirmation gate, kill-switch clear (critical), remote
    /// start signal (best effort), status row write (critical), registry
    /// status update (best effort), optimistic local apply.
    pub async fn start(&self, mode: StartMode) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();

        // Confirmation gate. Paper mode needs no acknowledgement; live mode
        // requires the caller to have shown the user the equity at stake.
        if !self.state.paper_trading_mode() {
            match mode {
                StartMode::LiveConfirmed { acknowledged_equity } => {
                    let current = self.state.total_equity();
                    if acknowledged_equity != current {
                        info!(
                            %acknowledged_equity,
                            %current,
                            "equity moved since confirmation was shown"
                        );
                    }
                }
                StartMode::Paper => {
                    return Err(PitbossError::ConfirmationRequired {
                        total_equity: self.state.total_equity(),
                    });
                }
            }
        }

        // Kill-switch clear. Must complete before any signal reaches the
        // remote process.
        if let Err(e) = self
            .store
            .update_trading_config(TradingConfigPatch::default().kill_switch(false))
            .await
        {
            report.push_failed("clear_kill_switch", StepSeverity::Critical, &e);
            return Err(e);
        }
        report.push_ok("clear_kill_switch", StepSeverity::Critical);

        // Remote start signal. A resolved deployment that cannot be reached
        // degrades to a local start with a warning, not a failure.
        let deployment = self.resolve_for_signal(&mut report).await;
        if let Some(deployment) = &deployment {
            match self
                .gateway
                .bot_control(BotControlAction::Start, &deployment.deployment_id)
                .await
            {
                Ok(response) if response.success => {
                    report.push_ok("signal_start", StepSeverity::BestEffort);
                }
                Ok(_) => {
                    let e = PitbossError::Gateway {
                        function: "bot-control".into(),
                        reason: "remote host reported failure".into(),
                    };
                    report.push_failed("signal_start", StepSeverity::BestEffort, &e);
                    self.alerts
                        .notify(
                            AlertLevel::Warning,
                            "Bot start signal rejected by remote host; running locally",
                        )
                        .await;
                }
                Err(e) => {
                    report.push_failed("signal_start", StepSeverity::BestEffort, &e);
                    self.alerts
                        .notify(
                            AlertLevel::Warning,
                            "Bot start signal failed to reach remote host; running locally",
                        )
                        .await;
                }
            }
        }

        // Status row write. This is the transition itself; on failure the
        // bot may already be running remotely with a store that disagrees,
        // so surface it loudly and mark the local state as errored.
        if let Err(e) = self
            .store
            .update_trading_config(
                TradingConfigPatch::default()
                    .bot_status(BotStatus::Running)
                    .trading_enabled(true),
            )
            .await
        {
            report.push_failed("mark_running", StepSeverity::Critical, &e);
            self.state.apply_bot_status(BotStatus::Error);
            return Err(e);
        }
        report.push_ok("mark_running", StepSeverity::Critical);

        self.update_registry(&deployment, DeploymentStatus::Running, &mut report)
            .await;

        self.state.apply_bot_status(BotStatus::Running);
        info!(mode = ?mode, warnings = report.warnings().len(), "bot started");
        Ok(report)
    }

    /// Stop the bot: remote stop signal (best effort), status row write
    /// (critical), registry status update (best effort), local apply.
    pub async fn stop(&self) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();

        let deployment = self.resolve_for_signal(&mut report).await;
        if let Some(deployment) = &deployment {
            match self
                .gateway
                .bot_control(BotControlAction::Stop, &deployment.deployment_id)
                .await
            {
                Ok(_) => report.push_ok("signal_stop", StepSeverity::BestEffort),
                Err(e) => {
                    report.push_failed("signal_stop", StepSeverity::BestEffort, &e);
                    self.alerts
                        .notify(
                            AlertLevel::Warning,
                            "Bot stop signal failed to reach remote host",
                        )
                        .await;
                }
            }
        }

        if let Err(e) = self
            .store
            .update_trading_config(
                TradingConfigPatch::default()
                    .bot_status(BotStatus::Stopped)
                    .trading_enabled(false),
            )
            .await
        {
            report.push_failed("mark_stopped", StepSeverity::Critical, &e);
            return Err(e);
        }
        report.push_ok("mark_stopped", StepSeverity::Critical);

        self.update_registry(&deployment, DeploymentStatus::Inactive, &mut report)
            .await;

        self.state.apply_bot_status(BotStatus::Stopped);
        info!("bot stopped");
        Ok(report)
    }

    /// Recover from the error state back to stopped.
    pub async fn clear_error(&self) -> Result<()> {
        self.store
            .update_trading_config(TradingConfigPatch::default().bot_status(BotStatus::Stopped))
            .await?;
        self.state.apply_bot_status(BotStatus::Stopped);
        info!("error state cleared");
        Ok(())
    }

    /// Engage the global kill switch.
    ///
    /// The code is validated locally; nothing is invoked remotely for a bad
    /// code. Once validated, every halt step runs regardless of earlier
    /// failures: a broken trade-engine call must not prevent the stop
    /// signal from going out. The flag write itself is still critical: if
    /// it fails, the halt steps are attempted anyway but the call returns
    /// the error and local state is left untouched, because a snapshot
    /// saying stopped with the remote flag never engaged is the one lie
    /// this path must not tell.
    pub async fn activate_kill_switch(&self, code: &str) -> Result<LifecycleReport> {
        sanitize_code(code, self.kill_code_length)?;
        warn!("kill switch engaged");

        let mut report = LifecycleReport::default();

        let engage = self
            .store
            .update_trading_config(
                TradingConfigPatch::default()
                    .kill_switch(true)
                    .trading_enabled(false)
                    .bot_status(BotStatus::Stopped),
            )
            .await;
        match &engage {
            Ok(()) => report.push_ok("engage_kill_switch", StepSeverity::Critical),
            Err(e) => report.push_failed("engage_kill_switch", StepSeverity::Critical, e),
        }

        for (name, action) in [
            ("close_all_positions", TradeEngineAction::CloseAllPositions),
            ("cancel_open_orders", TradeEngineAction::CancelOpenOrders),
            ("stop_copier", TradeEngineAction::StopCopier),
        ] {
            match self.gateway.trade_engine(action).await {
                Ok(_) => report.push_ok(name, StepSeverity::BestEffort),
                Err(e) => report.push_failed(name, StepSeverity::BestEffort, &e),
            }
        }

        let deployment = self.resolve_for_signal(&mut report).await;
        if let Some(deployment) = &deployment {
            match self
                .gateway
                .bot_control(BotControlAction::Stop, &deployment.deployment_id)
                .await
            {
                Ok(_) => report.push_ok("signal_stop", StepSeverity::BestEffort),
                Err(e) => report.push_failed("signal_stop", StepSeverity::BestEffort, &e),
            }
        }
        self.update_registry(&deployment, DeploymentStatus::Inactive, &mut report)
            .await;

        self.alerts
            .notify(AlertLevel::Critical, "KILL SWITCH ACTIVATED: all trading halted")
            .await;
        if let Err(e) = self
            .store
            .insert_notification(NewNotification::new(
                NotificationKind::Error,
                "Kill switch activated",
                "All trading halted, positions closed, open orders cancelled",
            ))
            .await
        {
            report.push_failed("record_notification", StepSeverity::BestEffort, &e);
        } else {
            report.push_ok("record_notification", StepSeverity::BestEffort);
        }

        engage?;
        self.state.apply_bot_status(BotStatus::Stopped);
        Ok(report)
    }

    /// Resolve the deployment target for a control signal. No deployment is
    /// local-only mode; resolution failures already degrade inside the
    /// resolver.
    async fn resolve_for_signal(&self, report: &mut LifecycleReport) -> Option<ActiveDeployment> {
        match self.resolver.resolve_active().await {
            Ok(ResolvedDeployment::Found(deployment)) => {
                report.push_ok("resolve_deployment", StepSeverity::BestEffort);
                Some(deployment)
            }
            Ok(ResolvedDeployment::NotFound) => {
                report.push_ok("resolve_deployment", StepSeverity::BestEffort);
                None
            }
            Err(e) => {
                report.push_failed("resolve_deployment", StepSeverity::BestEffort, &e);
                None
            }
        }
    }

    async fn update_registry(
        &self,
        deployment: &Option<ActiveDeployment>,
        status: DeploymentStatus,
        report: &mut LifecycleReport,
    ) {
        let Some((registry, row_id)) = deployment.as_ref().and_then(|d| d.status_row) else {
            return;
        };
        match self
            .store
            .update_registry_status(registry, row_id, status)
            .await
        {
            Ok(()) => report.push_ok("update_registry_status", StepSeverity::BestEffort),
            Err(e) => report.push_failed("update_registry_status", StepSeverity::BestEffort, &e),
        }
    }
}
