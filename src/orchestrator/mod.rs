// Polling loop
//
// One cycle: snapshot every tracked symbol, score it, size and submit
// approved orders, then run one guardian pass over all open positions.
// A failure stays inside the symbol (or the pass) it happened in.
pub mod control;

pub use control::{ControlHandle, RunState};

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::api::{notify, AiValidator, Broker, MarketDataProvider, Notifier};
use crate::clock::Clock;
use crate::config::Settings;
use crate::execution::{BrokerSession, OrderSubmitter, PriceObserver, Submission};
use crate::gateway::{BudgetUsage, DataGateway};
use crate::guardian::{GuardianReport, MarketContext, PositionGuardian};
use crate::journal::{EquitySnapshot, TradeJournal, TradeRecord};
use crate::models::{AccountInfo, MarketSnapshot, OrderRequest, Position, Signal, Timeframe};
use crate::risk::{
    CircuitBreakerTrip, CircuitBreakers, Rejection, RiskSizer, SizingContext, TradeStats, TradingState,
};
use crate::strategy::{SignalEngine, ValidationPolicy};
use crate::{Error, Result};

/// What happened to one symbol in one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    /// Not a tracked symbol; snapshot taken for the guardian only
    Monitored,
    NoSignal { strength: f64 },
    LowConfidence { confidence: f64 },
    StaleData,
    BrokerUnavailable,
    Halted(CircuitBreakerTrip),
    Rejected(Rejection),
    Ordered { ticket: u64, volume: f64 },
    OrderFailed { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub broker_connected: bool,
    pub signals: Vec<Signal>,
    pub outcomes: Vec<(String, SymbolOutcome)>,
    /// `None` when the pass was skipped or failed
    pub guardian: Option<GuardianReport>,
    pub usage: BudgetUsage,
}

impl CycleReport {
    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes.iter().find(|(s, _)| s == symbol).map(|(_, o)| o)
    }

    pub fn orders(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SymbolOutcome::Ordered { .. }))
            .count()
    }
}

/// External collaborators the loop is wired to
pub struct Services {
    pub provider: Arc<dyn MarketDataProvider>,
    pub broker: Arc<dyn Broker>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub validator: Option<Arc<dyn AiValidator>>,
    pub journal: TradeJournal,
}

pub struct Orchestrator {
    symbols: Vec<String>,
    timeframe: Timeframe,
    history_length: usize,
    cycle_interval: Duration,
    equity_every: u64,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    gateway: DataGateway,
    engine: SignalEngine,
    sizer: RiskSizer,
    breakers: CircuitBreakers,
    session: BrokerSession,
    submitter: OrderSubmitter,
    guardian: PositionGuardian,
    journal: TradeJournal,
    price_feed: Option<Arc<dyn PriceObserver>>,
    trading_state: Option<TradingState>,
    account: Option<AccountInfo>,
    halted: Option<CircuitBreakerTrip>,
    cycles: u64,
    control: ControlHandle,
    control_rx: watch::Receiver<RunState>,
}

impl Orchestrator {
    pub fn new(settings: &Settings, services: Services) -> Self {
        let Services {
            provider,
            broker,
            clock,
            notifier,
            validator,
            journal,
        } = services;

        let gateway = DataGateway::new(
            provider,
            clock.clone(),
            settings.gateway.clone(),
            settings.indicators.clone(),
        );

        let mut engine = SignalEngine::new(settings.signals.clone(), clock.clone());
        if let Some(validator) = validator {
            let policy = ValidationPolicy {
                rejection_weight: settings.ai.rejection_weight,
                failure_factor: settings.ai.failure_factor,
            };
            engine = engine.with_validator(validator, policy);
        }

        let session = BrokerSession::new(broker.clone(), clock.clone(), notifier.clone(), settings.broker.clone());
        let submitter = OrderSubmitter::new(
            broker,
            clock.clone(),
            notifier.clone(),
            settings.broker.order_max_attempts,
            Duration::from_millis(settings.broker.order_retry_delay_ms),
        );
        let guardian = PositionGuardian::new(settings.guardian.clone(), clock.clone(), notifier.clone());
        let (control, control_rx) = ControlHandle::new();

        Self {
            symbols: settings.general.symbols.clone(),
            timeframe: settings.general.timeframe,
            history_length: settings.general.history_length,
            cycle_interval: Duration::from_secs(settings.general.cycle_interval_secs),
            equity_every: settings.journal.equity_every.max(1),
            clock,
            notifier,
            gateway,
            engine,
            sizer: RiskSizer::new(settings.risk.clone()),
            breakers: settings.breakers.clone(),
            session,
            submitter,
            guardian,
            journal,
            price_feed: None,
            trading_state: None,
            account: None,
            halted: None,
            cycles: 0,
            control,
            control_rx,
        }
    }

    /// Forward each cycle's latest prices (paper trading marks to market)
    pub fn with_price_feed(mut self, feed: Arc<dyn PriceObserver>) -> Self {
        self.price_feed = Some(feed);
        self
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn guardian(&self) -> &PositionGuardian {
        &self.guardian
    }

    pub fn journal(&self) -> &TradeJournal {
        &self.journal
    }

    pub fn session(&self) -> &BrokerSession {
        &self.session
    }

    pub fn trading_state(&self) -> Option<&TradingState> {
        self.trading_state.as_ref()
    }

    /// Loop until stopped; returns the number of completed cycles
    pub async fn run(&mut self) -> u64 {
        tracing::info!(
            "🚀 Monitoring {} symbol(s) on {} every {:?}",
            self.symbols.len(),
            self.timeframe,
            self.cycle_interval
        );

        let mut completed = 0;
        loop {
            let state = *self.control_rx.borrow_and_update();
            match state {
                RunState::Stopped => break,
                RunState::Paused => {
                    tracing::info!("⏸️ Paused");
                    if self.control_rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                RunState::Running => {}
            }

            self.run_cycle().await;
            completed += 1;

            tokio::select! {
                _ = self.clock.sleep(self.cycle_interval) => {}
                changed = self.control_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("🛑 Stopped after {} cycle(s)", completed);
        completed
    }

    /// One full cycle. Never fails: errors are logged and reported per
    /// symbol or for the guardian pass.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let started_at = self.clock.now();
        let broker = self.session.broker().clone();

        let mut open_positions = Vec::new();
        if self.session.ensure_connected().await {
            match self.refresh_account(broker.as_ref(), started_at).await {
                Ok(positions) => open_positions = positions,
                Err(e) => self.on_broker_error("account refresh", &e),
            }
        } else {
            tracing::warn!("Broker unavailable, order submission suspended");
        }

        let trip = self.trading_state.as_ref().and_then(|state| self.breakers.check(state).err());
        self.note_trip(trip).await;

        let mut market = HashMap::new();
        let mut signals = Vec::new();
        let mut outcomes = Vec::new();

        for symbol in self.symbols.clone() {
            let outcome = match self.gateway.snapshot(&symbol, self.timeframe, self.history_length).await {
                Ok(snapshot) => {
                    self.observe(&snapshot, &mut market);
                    let signal = self.engine.generate(&snapshot).await;
                    let outcome = self.act_on_signal(&snapshot, &signal, trip, &mut open_positions).await;
                    signals.push(signal);
                    outcome
                }
                Err(e) => {
                    log_symbol_error(&symbol, &e);
                    SymbolOutcome::Failed { error: e.to_string() }
                }
            };
            tracing::debug!(symbol = %symbol, "Outcome: {:?}", outcome);
            outcomes.push((symbol, outcome));
        }

        // Positions on untracked symbols still need current ATR
        let extra: BTreeSet<String> = self
            .guardian
            .symbols()
            .into_iter()
            .chain(open_positions.iter().map(|p| p.symbol.clone()))
            .filter(|s| !self.symbols.contains(s))
            .collect();
        for symbol in extra {
            let outcome = match self.gateway.snapshot(&symbol, self.timeframe, self.history_length).await {
                Ok(snapshot) => {
                    self.observe(&snapshot, &mut market);
                    SymbolOutcome::Monitored
                }
                Err(e) => {
                    log_symbol_error(&symbol, &e);
                    SymbolOutcome::Failed { error: e.to_string() }
                }
            };
            outcomes.push((symbol, outcome));
        }

        let guardian = self.guard(broker.as_ref(), &market, started_at).await;

        if self.cycles % self.equity_every == 0 {
            self.snapshot_equity(started_at);
        }

        let report = CycleReport {
            cycle: self.cycles,
            started_at,
            broker_connected: self.session.is_connected(),
            signals,
            outcomes,
            guardian,
            usage: self.gateway.usage(),
        };

        tracing::info!(
            "📊 Cycle {} done: {} symbol(s), {} order(s), {} guardian action(s), budget {}/{} daily",
            report.cycle,
            report.outcomes.len(),
            report.orders(),
            report.guardian.as_ref().map_or(0, |g| g.actions.len()),
            report.usage.daily_used,
            report.usage.daily_limit
        );

        report
    }

    async fn refresh_account(&mut self, broker: &dyn Broker, now: DateTime<Utc>) -> Result<Vec<Position>> {
        let account = broker.account_info().await?;
        let state = self
            .trading_state
            .get_or_insert_with(|| TradingState::new(account.equity, now));
        state.roll_day(now);
        state.update_equity(account.equity);
        self.account = Some(account);

        broker.positions().await
    }

    fn on_broker_error(&mut self, context: &str, e: &Error) {
        if matches!(e, Error::BrokerDisconnected(_)) {
            self.session.mark_disconnected();
        }
        tracing::warn!("Broker error during {}: {}", context, e);
    }

    async fn note_trip(&mut self, trip: Option<CircuitBreakerTrip>) {
        if trip == self.halted {
            return;
        }
        match trip {
            Some(trip) => {
                tracing::warn!("🛑 Circuit breaker tripped: {}", trip);
                notify(
                    self.notifier.as_ref(),
                    &format!("🛑 New entries suspended: {} (open positions stay guarded)", trip),
                )
                .await;
            }
            None => {
                tracing::info!("✅ Circuit breakers clear");
                notify(self.notifier.as_ref(), "✅ New entries resumed").await;
            }
        }
        self.halted = trip;
    }

    fn observe(&self, snapshot: &MarketSnapshot, market: &mut HashMap<String, MarketContext>) {
        if let (Some(feed), Some(price)) = (&self.price_feed, snapshot.last_price()) {
            feed.observe_price(&snapshot.symbol, price);
        }
        market.insert(
            snapshot.symbol.clone(),
            MarketContext::from_indicators(&snapshot.indicators, self.gateway.indicator_params()),
        );
    }

    fn kelly_stats(&self) -> Option<TradeStats> {
        let config = self.sizer.config();
        if !config.use_kelly {
            return None;
        }
        let pnls = self.journal.recent_pnls(config.kelly_lookback);
        (!pnls.is_empty()).then(|| TradeStats::from_pnls(&pnls))
    }

    async fn act_on_signal(
        &mut self,
        snapshot: &MarketSnapshot,
        signal: &Signal,
        trip: Option<CircuitBreakerTrip>,
        open_positions: &mut Vec<Position>,
    ) -> SymbolOutcome {
        if !signal.is_actionable() {
            return SymbolOutcome::NoSignal {
                strength: signal.strength,
            };
        }
        if signal.confidence < self.engine.config().min_confidence {
            return SymbolOutcome::LowConfidence {
                confidence: signal.confidence,
            };
        }
        if snapshot.stale {
            tracing::info!(symbol = %signal.symbol, "Signal on stale data, not trading it");
            return SymbolOutcome::StaleData;
        }
        if let Some(trip) = trip {
            return SymbolOutcome::Halted(trip);
        }
        let equity = match &self.trading_state {
            Some(state) if self.session.is_connected() => state.equity,
            _ => return SymbolOutcome::BrokerUnavailable,
        };

        let broker = self.session.broker().clone();
        let spec = match broker.instrument(&signal.symbol).await {
            Ok(spec) => spec,
            Err(e) => return self.broker_failure(&signal.symbol, e),
        };

        let ctx = SizingContext {
            open_positions: open_positions.as_slice(),
            stats: self.kelly_stats(),
        };
        let decision = self.sizer.size(signal, equity, &spec, &ctx);

        let side = match (decision.approved, decision.side) {
            (true, Some(side)) => side,
            _ => {
                let reason = decision.rejection.unwrap_or(Rejection::NeutralSignal);
                tracing::info!(symbol = %signal.symbol, "Signal {:?} not traded: {}", signal.direction, reason);
                return SymbolOutcome::Rejected(reason);
            }
        };

        tracing::info!(
            symbol = %signal.symbol,
            "🎯 {} signal strength {:.0} confidence {:.0}: {:.2} lots, risking {:.2}",
            side,
            signal.strength,
            signal.confidence,
            decision.volume,
            decision.max_risk_amount
        );

        let order = OrderRequest {
            client_id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            side,
            volume: decision.volume,
            stop_loss: decision.stop_loss,
            take_profit: decision.take_profit,
            comment: format!("tradeguard s{:.0} c{:.0}", signal.strength, signal.confidence),
        };

        match self.submitter.submit(&order).await {
            Ok(Submission::Filled(receipt)) => {
                let position = Position {
                    ticket: receipt.ticket,
                    symbol: order.symbol.clone(),
                    side,
                    volume: order.volume,
                    entry_price: receipt.price,
                    stop_loss: order.stop_loss,
                    take_profit: order.take_profit,
                    current_price: receipt.price,
                    profit: 0.0,
                    opened_at: self.clock.now(),
                };

                if let Err(e) = self.journal.record_trade(TradeRecord::opened(&position)) {
                    tracing::warn!("Failed to journal opened trade #{}: {}", receipt.ticket, e);
                }
                if let Some(state) = self.trading_state.as_mut() {
                    state.record_entry();
                }
                notify(
                    self.notifier.as_ref(),
                    &format!(
                        "📈 Opened {} {} {:.2} @ {:.5} (SL {:.5} TP {:.5})",
                        side, order.symbol, order.volume, receipt.price, order.stop_loss, order.take_profit
                    ),
                )
                .await;

                open_positions.push(position);
                SymbolOutcome::Ordered {
                    ticket: receipt.ticket,
                    volume: order.volume,
                }
            }
            Ok(Submission::Exhausted { last_reason, .. }) => SymbolOutcome::OrderFailed { reason: last_reason },
            Err(e) => self.broker_failure(&signal.symbol, e),
        }
    }

    fn broker_failure(&mut self, symbol: &str, e: Error) -> SymbolOutcome {
        self.on_broker_error(symbol, &e);
        SymbolOutcome::Failed { error: e.to_string() }
    }

    async fn guard(
        &mut self,
        broker: &dyn Broker,
        market: &HashMap<String, MarketContext>,
        now: DateTime<Utc>,
    ) -> Option<GuardianReport> {
        if !self.session.is_connected() {
            tracing::warn!(
                "Guardian pass skipped, broker not connected ({} position(s) kept)",
                self.guardian.tracked().count()
            );
            return None;
        }

        match self.guardian.run_pass(broker, market).await {
            Ok(report) => {
                for position in &report.closed {
                    if let Err(e) = self.journal.record_trade(TradeRecord::closed(position, now)) {
                        tracing::warn!("Failed to journal closed trade #{}: {}", position.ticket, e);
                    }
                    if let Some(state) = self.trading_state.as_mut() {
                        state.record_close(position.profit);
                    }
                }
                Some(report)
            }
            Err(e) => {
                self.on_broker_error("guardian pass", &e);
                None
            }
        }
    }

    fn snapshot_equity(&mut self, now: DateTime<Utc>) {
        let Some(account) = &self.account else {
            return;
        };
        let snapshot = EquitySnapshot {
            timestamp: now,
            balance: account.balance,
            equity: account.equity,
            open_positions: self.guardian.tracked().count(),
        };
        if let Err(e) = self.journal.record_equity(snapshot) {
            tracing::warn!("Failed to journal equity snapshot: {}", e);
        }
    }
}

fn log_symbol_error(symbol: &str, e: &Error) {
    if e.is_transient() {
        tracing::warn!(symbol = %symbol, "⚠️ Skipping this cycle: {}", e);
    } else {
        tracing::error!(symbol = %symbol, "❌ Pipeline failed: {}", e);
    }
}
