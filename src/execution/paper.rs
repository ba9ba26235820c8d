use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::api::Broker;
use crate::clock::{Clock, SystemClock};
use crate::models::{AccountInfo, InstrumentSpec, OrderReceipt, OrderRequest, Position, Side};
use crate::{Error, Result};

/// Realized exit recorded by the paper broker
#[derive(Debug, Clone, PartialEq)]
pub struct PaperFill {
    pub ticket: u64,
    pub symbol: String,
    pub exit_price: f64,
    pub pnl: f64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_connects: u32,
    drop_probes: u32,
    fail_modifies: u32,
    reject_orders: u32,
}

#[derive(Debug)]
struct PaperState {
    connected: bool,
    balance: f64,
    next_ticket: u64,
    positions: BTreeMap<u64, Position>,
    instruments: HashMap<String, InstrumentSpec>,
    prices: HashMap<String, f64>,
    fills: HashMap<Uuid, OrderReceipt>,
    faults: Faults,
    connect_attempts: u32,
    modify_calls: Vec<(u64, f64, f64)>,
    closed: Vec<PaperFill>,
}

/// In-memory broker for `--paper` runs and tests
///
/// Positions are marked to market by `set_price`, which also fills
/// stop-loss and take-profit levels. Faults can be injected to exercise
/// reconnects, rejected orders and failed modifications.
pub struct PaperBroker {
    state: Mutex<PaperState>,
    clock: Arc<dyn Clock>,
}

impl PaperBroker {
    pub fn new(balance: f64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                connected: false,
                balance,
                next_ticket: 1,
                positions: BTreeMap::new(),
                instruments: HashMap::new(),
                prices: HashMap::new(),
                fills: HashMap::new(),
                faults: Faults::default(),
                connect_attempts: 0,
                modify_calls: Vec::new(),
                closed: Vec::new(),
            }),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_instrument(self, spec: InstrumentSpec) -> Self {
        self.lock().instruments.insert(spec.symbol.clone(), spec);
        self
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn default_spec(symbol: &str) -> InstrumentSpec {
        InstrumentSpec {
            symbol: symbol.to_string(),
            tick_size: 0.01,
            tick_value: 0.01,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
        }
    }

    fn spec_for(state: &PaperState, symbol: &str) -> InstrumentSpec {
        state
            .instruments
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Self::default_spec(symbol))
    }

    fn mark(position: &mut Position, price: f64, spec: &InstrumentSpec) {
        position.current_price = price;
        position.profit = (price - position.entry_price) * position.side.sign() * position.volume * spec.pip_value();
    }

    /// Update the market price, marking positions and filling hit levels
    pub fn set_price(&self, symbol: &str, price: f64) {
        let mut state = self.lock();
        state.prices.insert(symbol.to_string(), price);
        let spec = Self::spec_for(&state, symbol);

        let mut hit = Vec::new();
        for position in state.positions.values_mut().filter(|p| p.symbol == symbol) {
            Self::mark(position, price, &spec);

            let stop_hit = position.has_stop_loss()
                && match position.side {
                    Side::Buy => price <= position.stop_loss,
                    Side::Sell => price >= position.stop_loss,
                };
            let target_hit = position.has_take_profit()
                && match position.side {
                    Side::Buy => price >= position.take_profit,
                    Side::Sell => price <= position.take_profit,
                };

            if stop_hit {
                hit.push((position.ticket, position.stop_loss));
            } else if target_hit {
                hit.push((position.ticket, position.take_profit));
            }
        }

        for (ticket, level) in hit {
            Self::close_locked(&mut state, ticket, level);
        }
    }

    fn close_locked(state: &mut PaperState, ticket: u64, exit_price: f64) -> Option<PaperFill> {
        let mut position = state.positions.remove(&ticket)?;
        let spec = Self::spec_for(state, &position.symbol);
        Self::mark(&mut position, exit_price, &spec);
        state.balance += position.profit;

        tracing::info!(ticket, symbol = %position.symbol, "📄 Paper position closed at {:.5} ({:+.2})", exit_price, position.profit);

        let fill = PaperFill {
            ticket,
            symbol: position.symbol,
            exit_price,
            pnl: position.profit,
        };
        state.closed.push(fill.clone());
        Some(fill)
    }

    /// Close at the current price, as if done by hand on the terminal
    pub fn close(&self, ticket: u64) -> Option<PaperFill> {
        let mut state = self.lock();
        let price = state
            .positions
            .get(&ticket)
            .map(|p| p.current_price)?;
        Self::close_locked(&mut state, ticket, price)
    }

    /// Open a position directly, bypassing order flow (a manual trade)
    pub fn open_manual(&self, symbol: &str, side: Side, volume: f64, entry: f64, stop_loss: f64, take_profit: f64) -> u64 {
        let now = self.clock.now();
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.prices.entry(symbol.to_string()).or_insert(entry);

        state.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: symbol.to_string(),
                side,
                volume,
                entry_price: entry,
                stop_loss,
                take_profit,
                current_price: entry,
                profit: 0.0,
                opened_at: now,
            },
        );
        ticket
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.lock().prices.get(symbol).copied()
    }

    pub fn position(&self, ticket: u64) -> Option<Position> {
        self.lock().positions.get(&ticket).cloned()
    }

    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.lock().faults.fail_connects = n;
    }

    /// Make the next `n` connectivity probes report a dead session
    pub fn drop_next_probes(&self, n: u32) {
        self.lock().faults.drop_probes = n;
    }

    pub fn fail_next_modifies(&self, n: u32) {
        self.lock().faults.fail_modifies = n;
    }

    pub fn reject_next_orders(&self, n: u32) {
        self.lock().faults.reject_orders = n;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn modify_calls(&self) -> Vec<(u64, f64, f64)> {
        self.lock().modify_calls.clone()
    }

    pub fn closed(&self) -> Vec<PaperFill> {
        self.lock().closed.clone()
    }

    fn require_connection(state: &PaperState) -> Result<()> {
        if state.connected {
            Ok(())
        } else {
            Err(Error::BrokerDisconnected("paper session not connected".to_string()))
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&self) -> Result<()> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.faults.fail_connects > 0 {
            state.faults.fail_connects -= 1;
            return Err(Error::BrokerDisconnected("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let mut state = self.lock();
        if state.faults.drop_probes > 0 {
            state.faults.drop_probes -= 1;
            return false;
        }
        state.connected
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        let state = self.lock();
        Self::require_connection(&state)?;
        Ok(state.positions.values().cloned().collect())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderReceipt> {
        let now = self.clock.now();
        let mut state = self.lock();
        Self::require_connection(&state)?;

        if let Some(receipt) = state.fills.get(&order.client_id) {
            return Ok(receipt.clone());
        }

        if state.faults.reject_orders > 0 {
            state.faults.reject_orders -= 1;
            return Err(Error::OrderRejected {
                symbol: order.symbol.clone(),
                reason: "requote".to_string(),
            });
        }

        let price = match state.prices.get(&order.symbol) {
            Some(price) => *price,
            None => {
                return Err(Error::OrderRejected {
                    symbol: order.symbol.clone(),
                    reason: "no price".to_string(),
                })
            }
        };

        let spec = Self::spec_for(&state, &order.symbol);
        if order.volume < spec.volume_min || order.volume > spec.volume_max {
            return Err(Error::OrderRejected {
                symbol: order.symbol.clone(),
                reason: format!("invalid volume {}", order.volume),
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: order.symbol.clone(),
                side: order.side,
                volume: order.volume,
                entry_price: price,
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
                current_price: price,
                profit: 0.0,
                opened_at: now,
            },
        );

        let receipt = OrderReceipt { ticket, price };
        state.fills.insert(order.client_id, receipt.clone());
        Ok(receipt)
    }

    async fn modify_order(&self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        let mut state = self.lock();
        Self::require_connection(&state)?;
        state.modify_calls.push((ticket, stop_loss, take_profit));

        let symbol = match state.positions.get(&ticket) {
            Some(p) => p.symbol.clone(),
            None => {
                return Err(Error::OrderRejected {
                    symbol: String::new(),
                    reason: format!("unknown ticket {}", ticket),
                })
            }
        };

        if state.faults.fail_modifies > 0 {
            state.faults.fail_modifies -= 1;
            return Err(Error::OrderRejected {
                symbol,
                reason: "trade context busy".to_string(),
            });
        }

        if let Some(position) = state.positions.get_mut(&ticket) {
            position.stop_loss = stop_loss;
            position.take_profit = take_profit;
        }
        Ok(())
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let state = self.lock();
        Self::require_connection(&state)?;
        let floating: f64 = state.positions.values().map(|p| p.profit).sum();
        Ok(AccountInfo {
            balance: state.balance,
            equity: state.balance + floating,
            margin: 0.0,
            free_margin: state.balance + floating,
            currency: "USD".to_string(),
        })
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec> {
        let state = self.lock();
        Ok(Self::spec_for(&state, symbol))
    }
}
