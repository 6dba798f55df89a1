//! The orchestration loop.
//!
//! Owns the periodic cycles (analysis, position management, heartbeat),
//! the queue worker that drains durable work items, and the lifecycle
//! state machine. All trading flows through here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::broker::BrokerClient;
use crate::config::{AppConfig, DailyLossBasis, OrchestratorConfig};
use crate::domain::{
    ExecutionAction, ExecutionHistory, ExecutionResult, MarketSnapshot, OrderRequest, OrderSide,
    OrderStatus, Position, SignalAction,
};
use crate::engine::DecisionEngine;
use crate::error::{Result, StewardError};
use crate::execution::OrderExecutor;
use crate::persistence::PostgresStore;
use crate::position::{PositionAction, PositionRulesEngine, Rebalancer};
use crate::queue::{derive_idempotency_key, EnqueueResult, JobOutcome, JobStore, JobType, WorkItem};
use crate::risk::{self, ProposedTrade, RiskDecision, RiskLimits};

use super::state::{AgentStatus, OperatingMode, RunState};

/// Everything the orchestrator needs besides its collaborators
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub loop_config: OrchestratorConfig,
    pub symbols: Vec<String>,
    pub min_confidence: f64,
    pub daily_loss_basis: DailyLossBasis,
    pub fixed_baseline: Decimal,
    pub limits: RiskLimits,
    pub rules: crate::config::PositionRulesConfig,
    pub rebalance: crate::config::RebalanceConfig,
    pub mode: OperatingMode,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            loop_config: config.orchestrator.clone(),
            symbols: config.engine.symbols.clone(),
            min_confidence: config.engine.min_confidence,
            daily_loss_basis: config.risk.daily_loss_basis,
            fixed_baseline: config.risk.fixed_baseline,
            limits: config.risk.to_limits(),
            rules: config.rules.clone(),
            rebalance: config.rebalance.clone(),
            mode: OperatingMode::Autonomous,
        }
    }
}

/// What one heartbeat observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub running: bool,
    pub stale: bool,
    pub consecutive_errors: u32,
    pub healed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitOrderPayload {
    pub request: OrderRequest,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClosePositionPayload {
    pub symbol: String,
    /// Partial close quantity; full close when absent.
    pub qty: Option<Decimal>,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelOrderPayload {
    pub broker_order_id: String,
}

struct Inner {
    broker: Arc<dyn BrokerClient>,
    engine: Arc<dyn DecisionEngine>,
    jobs: Arc<dyn JobStore>,
    executor: Arc<OrderExecutor>,
    store: Option<Arc<PostgresStore>>,
    rules: PositionRulesEngine,
    rebalancer: Rebalancer,
    settings: OrchestratorSettings,

    limits: RwLock<RiskLimits>,
    mode: RwLock<OperatingMode>,
    /// Mode that was active before a pause, restored by `resume`.
    paused_from: RwLock<Option<OperatingMode>>,
    positions: RwLock<HashMap<String, Position>>,
    history: RwLock<ExecutionHistory>,
    rebalance_targets: RwLock<HashMap<String, Decimal>>,

    running: AtomicBool,
    auto_start: AtomicBool,
    analysis_busy: AtomicBool,
    position_busy: AtomicBool,
    heal_in_flight: AtomicBool,
    consecutive_errors: AtomicU32,
    /// Bumped on every start; loops from earlier generations exit at
    /// their next tick instead of being aborted, so a loop healing
    /// itself is never cancelled mid-heal.
    generation: AtomicU64,
    last_analysis_at: RwLock<Option<DateTime<Utc>>>,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        engine: Arc<dyn DecisionEngine>,
        jobs: Arc<dyn JobStore>,
        executor: Arc<OrderExecutor>,
        store: Option<Arc<PostgresStore>>,
        settings: OrchestratorSettings,
    ) -> Self {
        let auto_start = settings.loop_config.auto_start;
        Self {
            inner: Arc::new(Inner {
                broker,
                engine,
                jobs,
                executor,
                store,
                rules: PositionRulesEngine::new(settings.rules.clone()),
                rebalancer: Rebalancer::new(settings.rebalance.clone()),
                limits: RwLock::new(settings.limits.clone()),
                mode: RwLock::new(settings.mode),
                paused_from: RwLock::new(None),
                positions: RwLock::new(HashMap::new()),
                history: RwLock::new(ExecutionHistory::default()),
                rebalance_targets: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                auto_start: AtomicBool::new(auto_start),
                analysis_busy: AtomicBool::new(false),
                position_busy: AtomicBool::new(false),
                heal_in_flight: AtomicBool::new(false),
                consecutive_errors: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                last_analysis_at: RwLock::new(None),
                last_heartbeat: RwLock::new(None),
                settings,
            }),
        }
    }

    // ---- lifecycle -------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the periodic cycles. Idempotent while already running;
    /// refused while the kill switch is latched.
    pub async fn start(&self) -> Result<()> {
        if self.inner.limits.read().await.kill_switch_active {
            return Err(StewardError::KillSwitchActive(
                "deactivate the kill switch before starting".to_string(),
            ));
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("start requested while already running");
            return Ok(());
        }

        // Fresh start gets a staleness grace period.
        *self.inner.last_analysis_at.write().await = Some(Utc::now());
        self.inner.consecutive_errors.store(0, Ordering::SeqCst);

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_analysis_loop(generation);
        self.spawn_position_loop(generation);
        self.spawn_worker_loop(generation);
        self.spawn_heartbeat_loop(generation);

        info!(
            "orchestrator started in {} mode, {} symbols on watch",
            self.inner.mode.read().await,
            self.inner.settings.symbols.len()
        );
        if let Err(e) = self.persist_status().await {
            warn!("could not persist agent status: {}", e);
        }
        Ok(())
    }

    /// Stop the cycles. In-flight cycle work finishes and the loops
    /// exit cooperatively at their next tick; nothing new starts.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("orchestrator stopped");
        if let Err(e) = self.persist_status().await {
            warn!("could not persist agent status: {}", e);
        }
    }

    /// Latch the kill switch and halt. The latch outlives the stop: a
    /// plain start is refused until the switch is cleared.
    pub async fn activate_kill_switch(&self, reason: &str) {
        {
            let mut limits = self.inner.limits.write().await;
            if limits.kill_switch_active {
                return;
            }
            limits.kill_switch_active = true;
        }
        error!("KILL SWITCH ACTIVATED: {}", reason);
        self.stop().await;
    }

    pub async fn deactivate_kill_switch(&self) {
        let mut limits = self.inner.limits.write().await;
        if limits.kill_switch_active {
            limits.kill_switch_active = false;
            warn!("kill switch deactivated by operator");
        }
    }

    pub async fn set_mode(&self, mode: OperatingMode) {
        {
            let mut current = self.inner.mode.write().await;
            if *current != mode {
                info!("operating mode {} -> {}", current, mode);
                *current = mode;
            }
        }
        // An explicit mode change supersedes any pending pause.
        *self.inner.paused_from.write().await = None;
    }

    /// Idle the cycles without tearing the loops down. They keep ticking
    /// in manual mode until `resume` restores the previous mode.
    pub async fn pause(&self) {
        let previous = {
            let mut current = self.inner.mode.write().await;
            if *current == OperatingMode::Manual {
                return;
            }
            let previous = *current;
            *current = OperatingMode::Manual;
            previous
        };
        *self.inner.paused_from.write().await = Some(previous);
        info!("orchestrator paused, {} mode on hold", previous);
    }

    /// Restore the mode that was active before `pause`. No-op when the
    /// agent is not paused.
    pub async fn resume(&self) {
        if let Some(previous) = self.inner.paused_from.write().await.take() {
            *self.inner.mode.write().await = previous;
            info!("orchestrator resumed in {} mode", previous);
        }
    }

    pub async fn mode(&self) -> OperatingMode {
        *self.inner.mode.read().await
    }

    pub async fn limits(&self) -> RiskLimits {
        self.inner.limits.read().await.clone()
    }

    pub async fn update_limits(&self, limits: RiskLimits) -> Result<()> {
        limits
            .validate()
            .map_err(StewardError::Validation)?;
        let mut current = self.inner.limits.write().await;
        // The latch is owned by the kill switch endpoints, not by limit
        // updates.
        let latched = current.kill_switch_active;
        *current = limits;
        current.kill_switch_active = latched;
        info!("risk limits updated");
        Ok(())
    }

    pub async fn set_rebalance_targets(&self, targets: HashMap<String, Decimal>) {
        *self.inner.rebalance_targets.write().await = targets;
    }

    /// Restore state persisted by a previous run: operating mode and the
    /// kill-switch latch. A latch that was set when the process died must
    /// survive the restart, not silently clear.
    pub async fn restore_status(&self, status: &AgentStatus) {
        self.set_mode(status.mode).await;
        if status.kill_switch_active {
            warn!("kill switch was latched at last shutdown, keeping it latched");
            self.inner.limits.write().await.kill_switch_active = true;
        }
    }

    /// Seed the position cache from the persisted snapshot so protective
    /// stops and targets survive a restart. The next sync reconciles
    /// quantities against the broker as usual.
    pub async fn restore_positions(&self, positions: Vec<Position>) {
        let mut cache = self.inner.positions.write().await;
        for mut position in positions {
            if position.is_closed() {
                continue;
            }
            self.inner.rules.apply_hard_floor(&mut position);
            cache.insert(position.symbol.clone(), position);
        }
        if !cache.is_empty() {
            info!("restored {} positions from the last run", cache.len());
        }
    }

    /// Operator retry of a specific broker order. Only unfilled terminal
    /// orders qualify; the parameters are resubmitted through the queue
    /// under a fresh client id.
    pub async fn retry_order(&self, broker_order_id: &str) -> Result<EnqueueResult> {
        let order = self.inner.broker.get_order(broker_order_id).await?;
        if !order.status.is_terminal_without_fill() {
            return Err(StewardError::Validation(format!(
                "order {} is {}, only unfilled terminal orders can be retried",
                broker_order_id, order.status
            )));
        }

        let request = match (order.qty, order.notional) {
            (Some(qty), _) if qty > Decimal::ZERO => {
                OrderRequest::market(&order.symbol, order.side, qty)
            }
            (_, Some(notional)) if notional > Decimal::ZERO => {
                OrderRequest::market_notional(&order.symbol, order.side, notional)
            }
            _ => {
                return Err(StewardError::Validation(format!(
                    "order {} carries neither a quantity nor a notional",
                    broker_order_id
                )))
            }
        };

        let payload = serde_json::to_value(SubmitOrderPayload {
            request,
            reason: format!("operator retry of order {}", broker_order_id),
        })?;
        self.inner
            .jobs
            .enqueue(
                JobType::SubmitOrder,
                payload,
                Some(format!("retry:{}", broker_order_id)),
            )
            .await
    }

    pub async fn recent_history(&self, limit: usize) -> Vec<ExecutionResult> {
        self.inner.history.read().await.recent(limit)
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.inner.positions.read().await.values().cloned().collect()
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.inner.jobs)
    }

    pub fn executor(&self) -> Arc<OrderExecutor> {
        Arc::clone(&self.inner.executor)
    }

    pub async fn status(&self) -> AgentStatus {
        AgentStatus {
            state: if self.is_running() {
                RunState::Running
            } else {
                RunState::Stopped
            },
            mode: *self.inner.mode.read().await,
            kill_switch_active: self.inner.limits.read().await.kill_switch_active,
            consecutive_errors: self.inner.consecutive_errors.load(Ordering::SeqCst),
            last_heartbeat: *self.inner.last_heartbeat.read().await,
            last_analysis_at: *self.inner.last_analysis_at.read().await,
            updated_at: Utc::now(),
        }
    }

    async fn persist_status(&self) -> Result<()> {
        if let Some(store) = &self.inner.store {
            let status = self.status().await;
            store.save_status(&status).await?;
        }
        Ok(())
    }

    // ---- background loops ------------------------------------------------

    fn loop_expired(&self, generation: u64) -> bool {
        !self.is_running() || self.inner.generation.load(Ordering::SeqCst) != generation
    }

    fn spawn_analysis_loop(&self, generation: u64) {
        let this = self.clone();
        let interval_secs = this.inner.settings.loop_config.analysis_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if this.loop_expired(generation) {
                    break;
                }
                if let Err(e) = this.run_analysis_cycle().await {
                    error!("analysis cycle failed: {}", e);
                }
            }
        });
    }

    fn spawn_position_loop(&self, generation: u64) {
        let this = self.clone();
        let interval_secs = this.inner.settings.loop_config.position_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if this.loop_expired(generation) {
                    break;
                }
                if let Err(e) = this.run_position_cycle().await {
                    error!("position cycle failed: {}", e);
                }
            }
        });
    }

    fn spawn_worker_loop(&self, generation: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                if this.loop_expired(generation) {
                    break;
                }
                match this.process_next_job().await {
                    Ok(true) => {} // keep draining
                    Ok(false) => tokio::time::sleep(Duration::from_millis(500)).await,
                    Err(e) => {
                        warn!("queue worker error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    fn spawn_heartbeat_loop(&self, generation: u64) {
        let this = self.clone();
        let interval_secs = this.inner.settings.loop_config.heartbeat_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if this.loop_expired(generation) {
                    break;
                }
                this.heartbeat_tick().await;
            }
        });
    }

    // ---- analysis cycle --------------------------------------------------

    /// One analysis pass over the watchlist.
    ///
    /// Re-entrancy is guarded: a slow cycle is never overlapped by the
    /// next tick, the tick is dropped instead.
    pub async fn run_analysis_cycle(&self) -> Result<()> {
        if self
            .inner
            .analysis_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("analysis cycle still in flight, skipping tick");
            return Ok(());
        }
        let result = self.analysis_cycle_inner().await;
        self.inner.analysis_busy.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => {
                *self.inner.last_analysis_at.write().await = Some(Utc::now());
            }
            // Cycle faults count toward the heartbeat ceiling; only
            // clean heartbeats work the counter back down.
            Err(_) => {
                self.inner.consecutive_errors.fetch_add(1, Ordering::SeqCst);
            }
        }
        result
    }

    async fn analysis_cycle_inner(&self) -> Result<()> {
        if *self.inner.mode.read().await == OperatingMode::Manual {
            debug!("manual mode, analysis idle");
            return Ok(());
        }

        let account = self.inner.broker.get_account().await?;

        // A daily loss past the limit halts everything, trade or no trade.
        {
            let limits = self.inner.limits.read().await;
            let loss_pct = risk::daily_loss_pct(
                &account,
                self.inner.settings.daily_loss_basis,
                self.inner.settings.fixed_baseline,
            );
            if loss_pct >= limits.daily_loss_limit_pct {
                drop(limits);
                self.activate_kill_switch(&format!(
                    "daily loss {}% breached limit",
                    loss_pct.round_dp(2)
                ))
                .await;
                return Ok(());
            }
        }

        let symbols = self.inner.settings.symbols.clone();
        for symbol in &symbols {
            // A kill switch tripped mid-cycle halts the rest of the pass.
            if self.inner.limits.read().await.kill_switch_active {
                break;
            }
            if let Err(e) = self.analyze_symbol(symbol, &account).await {
                warn!("analysis of {} failed: {}", symbol, e);
                self.record(ExecutionResult::failed(
                    symbol.clone(),
                    ExecutionAction::Skip,
                    "analysis error",
                    e.to_string(),
                ))
                .await;
            }
        }
        Ok(())
    }

    async fn analyze_symbol(
        &self,
        symbol: &str,
        account: &crate::domain::AccountSnapshot,
    ) -> Result<()> {
        let quote = self.inner.broker.get_latest_quote(symbol).await?;
        let mut snapshot = MarketSnapshot::new(symbol, quote.mark());
        snapshot.bid = Some(quote.bid);
        snapshot.ask = Some(quote.ask);

        let signal = self
            .inner
            .engine
            .analyze_opportunity(symbol, &snapshot, None, None)
            .await?;

        if !signal.is_actionable(self.inner.settings.min_confidence) {
            self.record(ExecutionResult::skipped(
                symbol,
                format!(
                    "signal {} at confidence {:.2} below threshold",
                    signal.action, signal.confidence
                ),
            ))
            .await;
            return Ok(());
        }

        let notional =
            (account.equity * signal.suggested_qty_pct / Decimal::from(100)).round_dp(2);
        if notional <= Decimal::ZERO {
            self.record(ExecutionResult::skipped(symbol, "zero-notional signal"))
                .await;
            return Ok(());
        }

        match signal.action {
            SignalAction::Buy => self.propose_entry(symbol, notional, &signal.reasoning, account).await,
            SignalAction::Sell => self.propose_exit(symbol, &signal.reasoning).await,
            SignalAction::Hold => Ok(()),
        }
    }

    async fn propose_entry(
        &self,
        symbol: &str,
        notional: Decimal,
        reasoning: &str,
        account: &crate::domain::AccountSnapshot,
    ) -> Result<()> {
        let positions: Vec<Position> =
            self.inner.positions.read().await.values().cloned().collect();
        let limits = self.inner.limits.read().await.clone();
        let proposed = ProposedTrade {
            symbol: symbol.to_string(),
            notional,
        };

        let decision = risk::evaluate(
            &proposed,
            &positions,
            account,
            &limits,
            self.inner.settings.daily_loss_basis,
            self.inner.settings.fixed_baseline,
        );

        match decision {
            RiskDecision::Allow => {}
            RiskDecision::Reject {
                reason,
                trip_kill_switch,
            } => {
                self.record(ExecutionResult::skipped(
                    symbol,
                    format!("risk gate: {}", reason),
                ))
                .await;
                if trip_kill_switch {
                    self.activate_kill_switch(&reason).await;
                }
                return Ok(());
            }
        }

        if *self.inner.mode.read().await == OperatingMode::SemiAuto {
            self.record(ExecutionResult::skipped(
                symbol,
                format!("awaiting operator approval: {}", reasoning),
            ))
            .await;
            return Ok(());
        }

        let request = OrderRequest::market_notional(symbol, OrderSide::Buy, notional);
        self.enqueue_submit(request, reasoning.to_string()).await?;
        Ok(())
    }

    async fn propose_exit(&self, symbol: &str, reasoning: &str) -> Result<()> {
        let held = self.inner.positions.read().await.get(symbol).cloned();
        let Some(position) = held else {
            self.record(ExecutionResult::skipped(
                symbol,
                "sell signal without a position",
            ))
            .await;
            return Ok(());
        };

        if *self.inner.mode.read().await == OperatingMode::SemiAuto {
            self.record(ExecutionResult::skipped(
                symbol,
                format!("awaiting operator approval: {}", reasoning),
            ))
            .await;
            return Ok(());
        }

        if position.available_qty <= Decimal::ZERO {
            self.record(ExecutionResult::skipped(
                symbol,
                "position fully reserved by open orders",
            ))
            .await;
            return Ok(());
        }

        self.enqueue_close(symbol, None, reasoning.to_string()).await?;
        Ok(())
    }

    // ---- position cycle --------------------------------------------------

    /// One position-management pass: sync from the broker, enforce the
    /// protective rules, then trim allocation drift.
    pub async fn run_position_cycle(&self) -> Result<()> {
        if self
            .inner
            .position_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("position cycle still in flight, skipping tick");
            return Ok(());
        }
        let result = self.position_cycle_inner().await;
        self.inner.position_busy.store(false, Ordering::SeqCst);
        if result.is_err() {
            self.inner.consecutive_errors.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn position_cycle_inner(&self) -> Result<()> {
        let fresh = self.inner.broker.get_positions().await?;
        let synced = self.sync_positions(fresh).await;

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.replace_positions(&synced).await {
                warn!("could not persist positions: {}", e);
            }
        }

        if *self.inner.mode.read().await == OperatingMode::Manual {
            return Ok(());
        }

        for position in &synced {
            match self.inner.rules.evaluate(position) {
                PositionAction::Hold => {}
                PositionAction::RaiseStop { new_stop } => {
                    info!(
                        "trailing stop for {} ratcheted to {}",
                        position.symbol,
                        new_stop.round_dp(4)
                    );
                    if let Some(p) =
                        self.inner.positions.write().await.get_mut(&position.symbol)
                    {
                        p.stop_loss_price = Some(new_stop);
                    }
                }
                PositionAction::ClosePosition { fraction, reason } => {
                    let qty = if fraction >= Decimal::ONE {
                        None
                    } else {
                        let target = (position.qty * fraction).round_dp(4);
                        Some(target.min(position.available_qty))
                    };
                    if matches!(qty, Some(q) if q <= Decimal::ZERO) {
                        warn!(
                            "{} close wanted but nothing available to sell",
                            position.symbol
                        );
                        continue;
                    }
                    self.enqueue_close(&position.symbol, qty, reason).await?;
                }
            }
        }

        let portfolio_value: Decimal = synced.iter().map(|p| p.market_value()).sum();
        let targets = self.inner.rebalance_targets.read().await.clone();
        for instruction in self
            .inner
            .rebalancer
            .plan(&synced, portfolio_value, &targets)
        {
            self.enqueue_close(
                &instruction.symbol,
                Some(instruction.sell_qty),
                instruction.reason,
            )
            .await?;
        }

        Ok(())
    }

    /// Merge broker truth with our protective annotations. The broker
    /// wins on quantities and prices; stops, targets, and trailing
    /// settings survive the sync.
    async fn sync_positions(&self, fresh: Vec<Position>) -> Vec<Position> {
        let mut cache = self.inner.positions.write().await;
        let mut merged = Vec::with_capacity(fresh.len());
        let mut seen: HashMap<String, ()> = HashMap::new();

        for mut position in fresh {
            if position.is_closed() {
                continue;
            }
            if let Some(known) = cache.get(&position.symbol) {
                position.stop_loss_price = known.stop_loss_price;
                position.take_profit_price = known.take_profit_price;
                position.trailing_stop_pct = known.trailing_stop_pct;
                position.strategy_id = known.strategy_id.clone();
                position.opened_at = known.opened_at;
            }
            self.inner.rules.apply_hard_floor(&mut position);
            seen.insert(position.symbol.clone(), ());
            merged.push(position);
        }

        cache.retain(|symbol, _| seen.contains_key(symbol));
        for position in &merged {
            cache.insert(position.symbol.clone(), position.clone());
        }
        merged
    }

    // ---- queue worker ----------------------------------------------------

    async fn enqueue_submit(&self, request: OrderRequest, reason: String) -> Result<()> {
        let payload = serde_json::to_value(SubmitOrderPayload { request, reason })?;
        let key = derive_idempotency_key(JobType::SubmitOrder, &payload);
        let result = self
            .inner
            .jobs
            .enqueue(JobType::SubmitOrder, payload, Some(key))
            .await?;
        if result.is_duplicate() {
            debug!("submit already queued as {}", result.item().id);
        }
        Ok(())
    }

    async fn enqueue_close(
        &self,
        symbol: &str,
        qty: Option<Decimal>,
        reason: String,
    ) -> Result<()> {
        let payload = serde_json::to_value(ClosePositionPayload {
            symbol: symbol.to_string(),
            qty,
            reason,
        })?;
        // One close intent per symbol in flight at a time.
        let key = format!("close:{}", symbol);
        let result = self
            .inner
            .jobs
            .enqueue(JobType::ClosePosition, payload, Some(key))
            .await?;
        if result.is_duplicate() {
            debug!("close of {} already queued", symbol);
        }
        Ok(())
    }

    /// Claim and execute one work item. Returns whether an item was
    /// processed. Public so tests and the admin surface can drain the
    /// queue deterministically.
    pub async fn process_next_job(&self) -> Result<bool> {
        let Some(item) = self.inner.jobs.claim_next(None).await? else {
            return Ok(false);
        };

        debug!(
            "processing work item {} ({}, attempt {})",
            item.id, item.job_type, item.attempts
        );
        let outcome = match self.dispatch_job(&item).await {
            Ok(()) => JobOutcome::Success,
            Err(e) => JobOutcome::Failure(e.to_string()),
        };
        self.inner.jobs.complete(item.id, outcome).await?;
        Ok(true)
    }

    async fn dispatch_job(&self, item: &WorkItem) -> Result<()> {
        match item.job_type {
            JobType::SubmitOrder => {
                let payload: SubmitOrderPayload = serde_json::from_value(item.payload.clone())?;
                self.execute_submit(payload).await
            }
            JobType::ClosePosition => {
                let payload: ClosePositionPayload =
                    serde_json::from_value(item.payload.clone())?;
                self.execute_close(payload).await
            }
            JobType::CancelOrder => {
                let payload: CancelOrderPayload = serde_json::from_value(item.payload.clone())?;
                self.inner
                    .broker
                    .cancel_order(&payload.broker_order_id)
                    .await?;
                Ok(())
            }
            // Through the guarded entry point so a queued sync never
            // overlaps a timer-driven position cycle.
            JobType::SyncPositions => self.run_position_cycle().await,
        }
    }

    async fn execute_submit(&self, payload: SubmitOrderPayload) -> Result<()> {
        let symbol = payload.request.symbol.clone();
        let action = match payload.request.side {
            OrderSide::Buy => ExecutionAction::Buy,
            OrderSide::Sell => ExecutionAction::Sell,
        };

        match self.inner.executor.execute(&payload.request).await {
            Ok(outcome) => {
                if let Some(store) = &self.inner.store {
                    if let Err(e) = store.upsert_order(&outcome.order).await {
                        warn!("could not mirror order: {}", e);
                    }
                }
                if outcome.is_fully_filled() {
                    self.record(ExecutionResult::traded(
                        symbol,
                        action,
                        payload.reason,
                        outcome.order.broker_order_id.clone(),
                        Some(outcome.order.filled_qty),
                        Some(outcome.order.filled_avg_price),
                    ))
                    .await;
                    Ok(())
                } else if outcome.timed_out {
                    self.record(ExecutionResult::failed(
                        symbol.clone(),
                        action,
                        payload.reason,
                        "fill timeout",
                    ))
                    .await;
                    Err(StewardError::OrderTimeout(symbol))
                } else {
                    if outcome.order.status == OrderStatus::Filled {
                        // Filled status with no fill data is never
                        // trusted; resync positions from the broker
                        // instead of guessing.
                        if let Err(e) = self
                            .inner
                            .jobs
                            .enqueue(
                                JobType::SyncPositions,
                                serde_json::json!({}),
                                Some("sync:positions".to_string()),
                            )
                            .await
                        {
                            warn!("could not queue position resync: {}", e);
                        }
                    }
                    self.record(ExecutionResult::failed(
                        symbol.clone(),
                        action,
                        payload.reason,
                        format!("order ended {}", outcome.order.status),
                    ))
                    .await;
                    Err(StewardError::OrderSubmission(format!(
                        "{} ended {} unfilled",
                        symbol, outcome.order.status
                    )))
                }
            }
            Err(e) => {
                self.record(ExecutionResult::failed(
                    symbol,
                    action,
                    payload.reason,
                    e.to_string(),
                ))
                .await;
                Err(e)
            }
        }
    }

    async fn execute_close(&self, payload: ClosePositionPayload) -> Result<()> {
        let result = match payload.qty {
            // Partial close goes through the executor as a market sell.
            Some(qty) => {
                let request = OrderRequest::market(&payload.symbol, OrderSide::Sell, qty);
                self.inner.executor.execute(&request).await.map(|o| o.order)
            }
            None => self.inner.broker.close_position(&payload.symbol).await,
        };

        match result {
            Ok(order) => {
                if let Some(store) = &self.inner.store {
                    if let Err(e) = store.upsert_order(&order).await {
                        warn!("could not mirror order: {}", e);
                    }
                }
                self.record(ExecutionResult::traded(
                    payload.symbol,
                    ExecutionAction::Sell,
                    payload.reason,
                    order.broker_order_id.clone(),
                    payload.qty,
                    None,
                ))
                .await;
                Ok(())
            }
            Err(e) => {
                self.record(ExecutionResult::failed(
                    payload.symbol,
                    ExecutionAction::Sell,
                    payload.reason,
                    e.to_string(),
                ))
                .await;
                Err(e)
            }
        }
    }

    async fn record(&self, result: ExecutionResult) {
        self.inner.history.write().await.push(result);
    }

    // ---- heartbeat and self-heal ----------------------------------------

    /// One heartbeat: stamp liveness, persist status, and check health.
    ///
    /// Health failures are a stale analysis loop or the consecutive
    /// error ceiling; either triggers exactly one self-heal even when
    /// heartbeats overlap.
    pub async fn heartbeat_tick(&self) -> HeartbeatReport {
        *self.inner.last_heartbeat.write().await = Some(Utc::now());

        // A tick that fails its own work adds one to the error streak; a
        // clean beat takes one back off, down to zero.
        match self.persist_status().await {
            Ok(()) => {
                let _ = self.inner.consecutive_errors.fetch_update(
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                    |n| n.checked_sub(1),
                );
            }
            Err(e) => {
                warn!("heartbeat could not persist status: {}", e);
                self.inner.consecutive_errors.fetch_add(1, Ordering::SeqCst);
            }
        }

        if !self.is_running() {
            return HeartbeatReport {
                running: false,
                stale: false,
                consecutive_errors: self.inner.consecutive_errors.load(Ordering::SeqCst),
                healed: false,
            };
        }

        let stale_after = self.inner.settings.loop_config.stale_threshold_secs as i64;
        let manual = *self.inner.mode.read().await == OperatingMode::Manual;
        let stale = if manual {
            // No analysis expected in manual mode.
            false
        } else {
            match *self.inner.last_analysis_at.read().await {
                Some(at) => (Utc::now() - at).num_seconds() > stale_after,
                None => false,
            }
        };

        let errors = self.inner.consecutive_errors.load(Ordering::SeqCst);
        let ceiling = self.inner.settings.loop_config.max_consecutive_errors;

        let mut healed = false;
        if stale {
            warn!(
                "analysis loop stale (last completed cycle over {}s ago)",
                stale_after
            );
            healed = self.self_heal("stale analysis loop").await;
        } else if errors >= ceiling {
            warn!("{} consecutive cycle errors (ceiling {})", errors, ceiling);
            healed = self.self_heal("consecutive error ceiling").await;
        }

        HeartbeatReport {
            running: self.is_running(),
            stale,
            consecutive_errors: self.inner.consecutive_errors.load(Ordering::SeqCst),
            healed,
        }
    }

    /// Stop, cool down, and restart if configured to. Returns whether
    /// this call performed the heal; concurrent callers get `false`.
    pub async fn self_heal(&self, cause: &str) -> bool {
        if self
            .inner
            .heal_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("self-heal already in flight");
            return false;
        }

        warn!("self-heal: restarting orchestrator ({})", cause);
        self.stop().await;
        self.inner.consecutive_errors.store(0, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(
            self.inner.settings.loop_config.heal_cooldown_secs,
        ))
        .await;

        if self.inner.auto_start.load(Ordering::SeqCst) {
            if let Err(e) = self.start().await {
                error!("self-heal restart refused: {}", e);
            }
        } else {
            info!("self-heal complete, auto start disabled, staying stopped");
        }

        self.inner.heal_in_flight.store(false, Ordering::SeqCst);
        true
    }
}
