use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::{GuardianConfig, MarketContext};
use crate::api::{notify, Broker, Notifier};
use crate::clock::Clock;
use crate::models::{Position, ProtectionState};
use crate::{Error, Result};

/// A position the guardian owns for its open lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPosition {
    pub position: Position,     // last broker report
    pub state: ProtectionState,
    pub failures: u32,          // consecutive failed modify calls
    pub first_seen: DateTime<Utc>,
    /// Stop last in force; once locked at breakeven, the tightest seen
    pub applied_stop: Option<f64>,
}

impl TrackedPosition {
    fn note_stop(&mut self, stop: f64) {
        if stop <= 0.0 {
            return;
        }
        let sign = self.position.side.sign();
        self.applied_stop = match self.applied_stop {
            Some(prev) if self.state.stop_locked() && (stop - prev) * sign < 0.0 => Some(prev),
            _ => Some(stop),
        };
    }
}

/// One applied modification
#[derive(Debug, Clone, PartialEq)]
pub struct GuardianAction {
    pub ticket: u64,
    pub symbol: String,
    pub from: ProtectionState,
    pub to: ProtectionState,
    pub stop_loss: f64,
    pub take_profit: f64,
}

#[derive(Debug, Clone, Default)]
pub struct GuardianReport {
    pub checked: usize,
    pub actions: Vec<GuardianAction>,
    /// Tickets whose modify call failed this pass
    pub failed: Vec<u64>,
    /// Positions the broker no longer reports, as last observed
    pub closed: Vec<Position>,
    pub alerts: usize,
}

impl GuardianReport {
    pub fn broker_calls(&self) -> usize {
        self.actions.len() + self.failed.len()
    }
}

/// Levels to send and the state reached once the broker accepts them
struct Plan {
    stop_loss: f64,
    take_profit: f64,
    next: ProtectionState,
    reason: &'static str,
}

/// Protection state machine over every open broker position
///
/// Targets are re-derived from the current price and ATR each pass, so a
/// pass over unchanged positions makes no broker calls.
pub struct PositionGuardian {
    config: GuardianConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    tracked: BTreeMap<u64, TrackedPosition>,
}

impl PositionGuardian {
    pub fn new(config: GuardianConfig, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            clock,
            notifier,
            tracked: BTreeMap::new(),
        }
    }

    pub fn tracked(&self) -> impl Iterator<Item = &TrackedPosition> {
        self.tracked.values()
    }

    pub fn get(&self, ticket: u64) -> Option<&TrackedPosition> {
        self.tracked.get(&ticket)
    }

    pub fn state_of(&self, ticket: u64) -> Option<ProtectionState> {
        self.tracked.get(&ticket).map(|t| t.state)
    }

    /// Symbols with a tracked open position
    pub fn symbols(&self) -> HashSet<String> {
        self.tracked.values().map(|t| t.position.symbol.clone()).collect()
    }

    /// Classify a position seen for the first time from its broker levels
    fn classify(position: &Position) -> ProtectionState {
        match (position.has_stop_loss(), position.has_take_profit()) {
            (false, false) => ProtectionState::Unprotected,
            (true, false) => ProtectionState::SlOnly,
            (false, true) => ProtectionState::TpOnly,
            (true, true) if Self::stop_secures_entry(position) => ProtectionState::BreakevenApplied,
            (true, true) => ProtectionState::Protected,
        }
    }

    fn stop_secures_entry(position: &Position) -> bool {
        position.has_stop_loss() && (position.stop_loss - position.entry_price) * position.side.sign() >= 0.0
    }

    fn resolve_atr(&self, position: &Position, ctx: Option<&MarketContext>) -> f64 {
        ctx.and_then(|c| c.atr)
            .filter(|atr| *atr > 0.0 && atr.is_finite())
            .unwrap_or(position.entry_price * self.config.fallback_atr_pct)
    }

    fn current_price(position: &Position, ctx: Option<&MarketContext>) -> f64 {
        if position.current_price > 0.0 {
            position.current_price
        } else {
            ctx.and_then(|c| c.price).unwrap_or(position.entry_price)
        }
    }

    /// Levels a position should carry when it has none. Anchored on entry;
    /// re-anchored on current price if entry-based levels would already be
    /// on the wrong side of the market.
    fn initial_levels(&self, position: &Position, price: f64, atr: f64) -> (f64, f64) {
        let sign = position.side.sign();
        let stop_distance = self.config.stop_atr * atr;
        let target_distance = self.config.target_atr * atr;

        let mut stop = position.entry_price - sign * stop_distance;
        if (price - stop) * sign <= 0.0 {
            stop = price - sign * stop_distance;
        }

        let mut target = position.entry_price + sign * target_distance;
        if (target - price) * sign <= 0.0 {
            target = price + sign * target_distance;
        }

        (stop, target)
    }

    /// Stop to put back after someone removed it. The last stop in force is
    /// reused while price still allows it; a locked stop price has already
    /// crossed is replaced by the tightest level the broker accepts.
    fn restored_stop(&self, tracked: &TrackedPosition, price: f64, atr: f64) -> Option<f64> {
        let sign = tracked.position.side.sign();
        let last = tracked.applied_stop?;
        if (price - last) * sign > 0.0 {
            return Some(last);
        }
        if tracked.state.stop_locked() {
            return Some(price - sign * self.config.min_step_atr * atr);
        }
        None
    }

    fn plan(&self, tracked: &TrackedPosition, ctx: Option<&MarketContext>) -> Option<Plan> {
        let position = &tracked.position;
        let sign = position.side.sign();
        let atr = self.resolve_atr(position, ctx);
        let price = Self::current_price(position, ctx);
        let profit = (price - position.entry_price) * sign;

        match tracked.state {
            ProtectionState::Closed => None,

            ProtectionState::Unprotected | ProtectionState::SlOnly | ProtectionState::TpOnly => {
                let (stop, target) = self.initial_levels(position, price, atr);
                Some(Plan {
                    stop_loss: if position.has_stop_loss() { position.stop_loss } else { stop },
                    take_profit: if position.has_take_profit() { position.take_profit } else { target },
                    next: ProtectionState::Protected,
                    reason: "missing protection",
                })
            }

            // Someone removed a level after protection was applied
            state if !position.has_stop_loss() || !position.has_take_profit() => {
                let (stop, target) = self.initial_levels(position, price, atr);
                let stop = if position.has_stop_loss() {
                    position.stop_loss
                } else {
                    self.restored_stop(tracked, price, atr).unwrap_or(stop)
                };
                Some(Plan {
                    stop_loss: stop,
                    take_profit: if position.has_take_profit() { position.take_profit } else { target },
                    next: state,
                    reason: "protection removed",
                })
            }

            ProtectionState::Protected => {
                if profit <= self.config.breakeven_trigger_atr * atr {
                    return None;
                }
                let breakeven = position.entry_price + sign * self.config.breakeven_offset_atr * atr;
                // Never move a stop backwards
                if (breakeven - position.stop_loss) * sign <= 0.0 {
                    return None;
                }
                // Broker refuses a stop on the wrong side of price
                if (price - breakeven) * sign <= 0.0 {
                    return None;
                }
                Some(Plan {
                    stop_loss: breakeven,
                    take_profit: position.take_profit,
                    next: ProtectionState::BreakevenApplied,
                    reason: "breakeven",
                })
            }

            ProtectionState::BreakevenApplied | ProtectionState::TrailingActive => {
                if profit <= self.config.trailing_activation_atr * atr {
                    return None;
                }
                let candidate = self
                    .config
                    .trailing
                    .stop_level(position.side, price, profit, atr, ctx.unwrap_or(&MarketContext::default()))?;

                let improvement = (candidate - position.stop_loss) * sign;
                if improvement < self.config.min_step_atr * atr || (price - candidate) * sign <= 0.0 {
                    return None;
                }
                Some(Plan {
                    stop_loss: candidate,
                    take_profit: position.take_profit,
                    next: ProtectionState::TrailingActive,
                    reason: "trailing",
                })
            }
        }
    }

    /// Require `connectivity_checks` live probes in a row
    async fn confirm_connectivity(&self, broker: &dyn Broker) -> Result<()> {
        let checks = self.config.connectivity_checks.max(1);
        for attempt in 1..=checks {
            if !broker.is_connected().await {
                return Err(Error::BrokerDisconnected(format!(
                    "connectivity probe {}/{} failed",
                    attempt, checks
                )));
            }
        }
        Ok(())
    }

    /// One guardian pass over the broker's open positions
    ///
    /// On a connectivity or listing failure the error is returned and all
    /// tracked state is kept as it was.
    pub async fn run_pass(
        &mut self,
        broker: &dyn Broker,
        market: &HashMap<String, MarketContext>,
    ) -> Result<GuardianReport> {
        self.confirm_connectivity(broker).await?;
        let positions = broker.positions().await?;
        let now = self.clock.now();

        let mut report = GuardianReport {
            checked: positions.len(),
            ..Default::default()
        };

        // Closure: tracked tickets the broker no longer reports
        let open: HashSet<u64> = positions.iter().map(|p| p.ticket).collect();
        let gone: Vec<u64> = self.tracked.keys().filter(|t| !open.contains(t)).copied().collect();
        for ticket in gone {
            if let Some(mut tracked) = self.tracked.remove(&ticket) {
                tracing::info!(
                    ticket,
                    symbol = %tracked.position.symbol,
                    "🏁 Position closed ({} -> {})",
                    tracked.state,
                    ProtectionState::Closed
                );
                tracked.state = ProtectionState::Closed;
                report.closed.push(tracked.position);
            }
        }

        for position in positions {
            let ticket = position.ticket;
            let tracked = self.tracked.entry(ticket).or_insert_with(|| {
                let state = Self::classify(&position);
                tracing::info!(
                    ticket,
                    symbol = %position.symbol,
                    "👀 Tracking {} {:.2} @ {:.5} as {}",
                    position.side,
                    position.volume,
                    position.entry_price,
                    state
                );
                TrackedPosition {
                    position: position.clone(),
                    state,
                    failures: 0,
                    first_seen: now,
                    applied_stop: None,
                }
            });
            tracked.position = position;

            // Levels repaired outside the engine
            if tracked.state.needs_repair() && tracked.position.has_stop_loss() && tracked.position.has_take_profit() {
                tracked.state = ProtectionState::Protected;
            }
            // Stop already secures entry (e.g. moved by hand)
            if tracked.state == ProtectionState::Protected && Self::stop_secures_entry(&tracked.position) {
                tracked.state = ProtectionState::BreakevenApplied;
            }
            if !tracked.state.needs_repair() {
                let stop = tracked.position.stop_loss;
                tracked.note_stop(stop);
            }
        }

        let tickets: Vec<u64> = self.tracked.keys().copied().collect();
        for ticket in tickets {
            let Some(tracked) = self.tracked.get(&ticket) else {
                continue;
            };
            let ctx = market.get(&tracked.position.symbol);
            let Some(plan) = self.plan(tracked, ctx) else {
                continue;
            };

            let from = tracked.state;
            if from != plan.next && !from.can_transition_to(plan.next) {
                tracing::error!(ticket, "Refusing transition {} -> {}", from, plan.next);
                continue;
            }

            match broker.modify_order(ticket, plan.stop_loss, plan.take_profit).await {
                Ok(()) => {
                    let Some(tracked) = self.tracked.get_mut(&ticket) else {
                        continue;
                    };
                    tracked.position.stop_loss = plan.stop_loss;
                    tracked.position.take_profit = plan.take_profit;
                    tracked.state = plan.next;
                    tracked.failures = 0;
                    tracked.note_stop(plan.stop_loss);

                    let symbol = tracked.position.symbol.clone();
                    tracing::info!(
                        ticket,
                        symbol = %symbol,
                        "🛡️ {}: SL {:.5} TP {:.5} ({} -> {})",
                        plan.reason,
                        plan.stop_loss,
                        plan.take_profit,
                        from,
                        plan.next
                    );

                    if from.needs_repair() {
                        notify(
                            self.notifier.as_ref(),
                            &format!(
                                "🛡️ Protection applied to #{} {}: SL {:.5} TP {:.5}",
                                ticket, symbol, plan.stop_loss, plan.take_profit
                            ),
                        )
                        .await;
                    }

                    report.actions.push(GuardianAction {
                        ticket,
                        symbol,
                        from,
                        to: plan.next,
                        stop_loss: plan.stop_loss,
                        take_profit: plan.take_profit,
                    });
                }
                Err(e) => {
                    report.failed.push(ticket);
                    let Some(tracked) = self.tracked.get_mut(&ticket) else {
                        continue;
                    };
                    tracked.failures += 1;
                    let failures = tracked.failures;
                    let symbol = tracked.position.symbol.clone();

                    tracing::warn!(
                        ticket,
                        symbol = %symbol,
                        "⚠️ {} failed (attempt {}): {}",
                        plan.reason,
                        failures,
                        e
                    );

                    if failures == self.config.alert_after_failures {
                        report.alerts += 1;
                        notify(
                            self.notifier.as_ref(),
                            &format!(
                                "🚨 Position #{} {} still {} after {} failed attempts: {}",
                                ticket, symbol, from, failures, e
                            ),
                        )
                        .await;
                    }
                }
            }
        }

        Ok(report)
    }
}
