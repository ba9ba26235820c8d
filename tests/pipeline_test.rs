use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tradeguard::api::{Broker, LogNotifier, MarketDataProvider, MarketScenario, SyntheticProvider};
use tradeguard::clock::ManualClock;
use tradeguard::config::{ProviderKind, Settings};
use tradeguard::execution::PaperBroker;
use tradeguard::indicators::{compute_series, IndicatorKind, IndicatorSeries};
use tradeguard::journal::{TradeEvent, TradeJournal};
use tradeguard::orchestrator::{Orchestrator, Services, SymbolOutcome};
use tradeguard::risk::Rejection;
use tradeguard::*;

/// Provider serving a fixed, editable candle history
struct FixedProvider {
    candles: Mutex<Vec<Candle>>,
}

impl FixedProvider {
    fn push(&self, candle: Candle) {
        self.candles.lock().unwrap().push(candle);
    }

    fn last(&self) -> Candle {
        self.candles.lock().unwrap().last().cloned().unwrap()
    }

    fn window(&self, size: usize) -> Vec<Candle> {
        let candles = self.candles.lock().unwrap();
        let start = candles.len().saturating_sub(size);
        candles[start..].to_vec()
    }
}

#[async_trait]
impl MarketDataProvider for FixedProvider {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let last = self.last();
        Ok(Quote {
            symbol: symbol.to_string(),
            price: last.close,
            timestamp: last.timestamp,
        })
    }

    async fn time_series(&self, _symbol: &str, _interval: Timeframe, size: usize) -> Result<Vec<Candle>> {
        Ok(self.window(size))
    }

    async fn indicator(
        &self,
        _symbol: &str,
        kind: IndicatorKind,
        _interval: Timeframe,
        size: usize,
    ) -> Result<IndicatorSeries> {
        Ok(compute_series(kind, &self.window(size)))
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap()
}

fn bar(i: usize, close: f64, volume: f64) -> Candle {
    Candle {
        symbol: "XAU/USD".to_string(),
        timestamp: start() - chrono::Duration::hours(120) + chrono::Duration::hours(i as i64),
        open: close - 0.3,
        high: close + 0.2,
        low: close - 0.2,
        close,
        volume,
    }
}

/// Steady climb of 0.5 per bar ending in a high-volume breakout bar
fn uptrend() -> Vec<Candle> {
    (0..120)
        .map(|i| {
            let volume = if i == 119 { 5000.0 } else { 1000.0 };
            bar(i, 100.0 + 0.5 * i as f64, volume)
        })
        .collect()
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.data.provider = ProviderKind::Synthetic;
    settings.general.symbols = vec!["XAU/USD".to_string()];
    settings.general.history_length = 120;
    settings.signals.threshold = 50.0;
    settings.signals.min_confidence = 50.0;
    settings
}

fn build(
    settings: &Settings,
    provider: Arc<dyn MarketDataProvider>,
) -> (ManualClock, Arc<PaperBroker>, Orchestrator) {
    let clock = ManualClock::new(start());
    let broker = Arc::new(PaperBroker::new(10_000.0).with_clock(Arc::new(clock.clone())));
    let orchestrator = Orchestrator::new(
        settings,
        Services {
            provider,
            broker: broker.clone(),
            clock: Arc::new(clock.clone()),
            notifier: Arc::new(LogNotifier),
            validator: None,
            journal: TradeJournal::in_memory(),
        },
    )
    .with_price_feed(broker.clone());
    (clock, broker, orchestrator)
}

#[tokio::test]
async fn test_signal_to_protected_position() {
    let _ = tracing_subscriber::fmt::try_init();
    let settings = settings();
    let provider = Arc::new(FixedProvider {
        candles: Mutex::new(uptrend()),
    });
    let (clock, broker, mut orchestrator) = build(&settings, provider.clone());

    println!("1. Uptrend breakout produces a BUY and an order");
    let report = orchestrator.run_cycle().await;
    let signal = &report.signals[0];
    println!(
        "   ✓ {:?} strength {:.1} confidence {:.1}",
        signal.direction, signal.strength, signal.confidence
    );
    assert_eq!(signal.direction, Direction::Buy);
    assert!(signal.strength >= settings.signals.threshold);

    let ticket = match report.outcome("XAU/USD") {
        Some(SymbolOutcome::Ordered { ticket, .. }) => *ticket,
        other => panic!("expected an order, got {:?}", other),
    };

    println!("2. The fill carries risk-bounded protection");
    let position = broker.position(ticket).unwrap();
    let equity = 10_000.0;
    let stop_distance = position.entry_price - position.stop_loss;
    assert!(position.stop_loss < position.entry_price);
    assert!(position.take_profit > position.entry_price);
    // Paper instrument: 1.0 account currency per 1.0 price move per lot
    assert!(position.volume * stop_distance <= equity * settings.risk.risk_fraction + 1e-9);
    println!("   ✓ {:.2} lots, SL {:.2}, TP {:.2}", position.volume, position.stop_loss, position.take_profit);

    println!("3. Guardian adopts it as PROTECTED without extra calls");
    let guardian = report.guardian.as_ref().unwrap();
    assert_eq!(guardian.broker_calls(), 0);
    assert_eq!(orchestrator.guardian().state_of(ticket), Some(ProtectionState::Protected));
    assert_eq!(orchestrator.journal().trades().len(), 1);
    assert_eq!(orchestrator.journal().trades()[0].event, TradeEvent::Open);

    println!("4. Same signal next cycle is not pyramided");
    let report = orchestrator.run_cycle().await;
    assert_eq!(
        report.outcome("XAU/USD"),
        Some(&SymbolOutcome::Rejected(Rejection::PositionAlreadyOpen))
    );
    assert_eq!(broker.positions().await.unwrap().len(), 1);

    println!("5. Price runs in our favour: stop moves to breakeven");
    let entry = position.entry_price;
    provider.push(bar(120, entry + 1.2, 1000.0));
    clock.advance(Duration::from_secs(settings.gateway.history_ttl_secs + 1));
    orchestrator.run_cycle().await;

    assert_eq!(
        orchestrator.guardian().state_of(ticket),
        Some(ProtectionState::BreakevenApplied)
    );
    let stop = broker.position(ticket).unwrap().stop_loss;
    assert!(stop > entry);
    println!("   ✓ stop now {:.3} (entry {:.3})", stop, entry);

    println!("6. Position closed at the broker leaves a trade record");
    broker.close(ticket);
    let report = orchestrator.run_cycle().await;
    assert_eq!(report.guardian.unwrap().closed.len(), 1);
    assert!(orchestrator.guardian().get(ticket).is_none());
    let closes: Vec<_> = orchestrator
        .journal()
        .trades()
        .iter()
        .filter(|t| t.event == TradeEvent::Close)
        .collect();
    assert_eq!(closes.len(), 1);
    assert!(closes[0].realized_pnl.unwrap() > 0.0);

    println!("\n=== Pipeline OK ===");
}

#[tokio::test]
async fn test_no_genuine_volume_means_volume_strategy_abstains() {
    let mut settings = settings();
    settings.general.history_length = 200;
    let provider = SyntheticProvider::new(11, MarketScenario::Trending { drift: 0.002 })
        .starting_at(start() - chrono::Duration::days(30))
        .without_volume();
    let (_clock, _broker, mut orchestrator) = build(&settings, Arc::new(provider));

    let report = orchestrator.run_cycle().await;
    let signal = &report.signals[0];

    assert!(signal.abstained.iter().any(|s| s == "volume_spike"));
    assert!(signal.votes.iter().all(|v| v.strategy != "volume_spike"));
}

#[tokio::test]
async fn test_circuit_breaker_blocks_entries_not_protection() {
    let mut settings = settings();
    settings.breakers.max_daily_trades = 0;
    let provider = Arc::new(FixedProvider {
        candles: Mutex::new(uptrend()),
    });
    let (_clock, broker, mut orchestrator) = build(&settings, provider);
    broker.connect().await.unwrap();
    let manual = broker.open_manual("XAU/USD", Side::Sell, 1.0, 159.5, 0.0, 0.0);

    let report = orchestrator.run_cycle().await;

    assert!(matches!(report.outcome("XAU/USD"), Some(SymbolOutcome::Halted(_))));
    assert_eq!(report.orders(), 0);
    assert_eq!(
        orchestrator.guardian().state_of(manual),
        Some(ProtectionState::Protected)
    );
}
