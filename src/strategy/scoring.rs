use std::sync::Arc;

use super::{apply_validation, SignalConfig, Strategy, ValidationPolicy};
use crate::api::AiValidator;
use crate::clock::Clock;
use crate::indicators::IndicatorSet;
use crate::models::{Direction, MarketSnapshot, Signal, Vote};

/// Net below this is treated as an exact BUY/SELL tie
const TIE_EPSILON: f64 = 1e-9;

/// Aggregated opinion of the active votes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub direction: Direction,
    pub strength: f64,   // 0 - 100
    pub confidence: f64, // 0 - 100
}

/// Runs the strategy voters and aggregates them into one signal
pub struct SignalEngine {
    config: SignalConfig,
    clock: Arc<dyn Clock>,
    validator: Option<Arc<dyn AiValidator>>,
    policy: ValidationPolicy,
}

impl SignalEngine {
    pub fn new(config: SignalConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            validator: None,
            policy: ValidationPolicy::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn AiValidator>, policy: ValidationPolicy) -> Self {
        self.validator = Some(validator);
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Votes of the enabled strategies plus the names of those abstaining
    pub fn votes(&self, indicators: &IndicatorSet) -> (Vec<Vote>, Vec<String>) {
        let mut votes = Vec::new();
        let mut abstained = Vec::new();

        for strategy in Strategy::ALL {
            if self.config.weights.weight(strategy) <= 0.0 {
                continue;
            }
            match strategy.evaluate(indicators, &self.config.params) {
                Some(vote) => votes.push(vote),
                None => abstained.push(strategy.name().to_string()),
            }
        }

        (votes, abstained)
    }

    /// Weighted average of signed strengths over the active votes
    ///
    /// NEUTRAL votes count with zero strength but still dilute the average.
    /// Below the threshold, or on an exact tie, the result is NEUTRAL.
    pub fn aggregate(&self, votes: &[Vote]) -> Aggregate {
        let weighted: Vec<(f64, &Vote)> = votes
            .iter()
            .map(|v| (self.config.weights.weight_by_name(&v.strategy), v))
            .filter(|(w, _)| *w > 0.0)
            .collect();

        let total: f64 = weighted.iter().map(|(w, _)| w).sum();
        if total <= 0.0 {
            return Aggregate {
                direction: Direction::Neutral,
                strength: 0.0,
                confidence: 0.0,
            };
        }

        let net = weighted
            .iter()
            .map(|(w, v)| w * v.direction.sign() * v.strength)
            .sum::<f64>()
            / total;

        let leaning = if net > TIE_EPSILON {
            Direction::Buy
        } else if net < -TIE_EPSILON {
            Direction::Sell
        } else {
            Direction::Neutral
        };

        let strength = (net.abs() * 100.0).min(100.0);
        let confidence = if leaning == Direction::Neutral {
            0.0
        } else {
            weighted
                .iter()
                .filter(|(_, v)| v.direction == leaning)
                .map(|(w, _)| w)
                .sum::<f64>()
                / total
                * 100.0
        };

        let direction = if strength >= self.config.threshold {
            leaning
        } else {
            Direction::Neutral
        };

        Aggregate {
            direction,
            strength,
            confidence,
        }
    }

    /// Score one snapshot without any external calls
    pub fn score(&self, snapshot: &MarketSnapshot) -> Signal {
        let indicators = &snapshot.indicators;
        let (votes, abstained) = self.votes(indicators);
        let aggregate = self.aggregate(&votes);

        let price = indicators.close.or_else(|| snapshot.last_price()).unwrap_or(0.0);
        let atr = indicators.atr.filter(|a| *a > 0.0);

        let (stop_loss, take_profit) = match (aggregate.direction.side(), atr) {
            (Some(side), Some(atr)) => (
                Some(price - side.sign() * self.config.stop_atr * atr),
                Some(price + side.sign() * self.config.target_atr * atr),
            ),
            _ => (None, None),
        };

        tracing::debug!(
            symbol = %snapshot.symbol,
            "Votes: [{}] abstained: [{}] -> {:?} strength {:.1} confidence {:.1}",
            votes
                .iter()
                .map(|v| format!("{}={:?}:{:.2}", v.strategy, v.direction, v.strength))
                .collect::<Vec<_>>()
                .join(", "),
            abstained.join(", "),
            aggregate.direction,
            aggregate.strength,
            aggregate.confidence
        );

        Signal {
            symbol: snapshot.symbol.clone(),
            timeframe: snapshot.timeframe,
            direction: aggregate.direction,
            strength: aggregate.strength,
            confidence: aggregate.confidence,
            votes,
            abstained,
            price,
            atr,
            stop_loss,
            take_profit,
            generated_at: self.clock.now(),
        }
    }

    /// Score the snapshot and, for actionable signals, ask the AI reviewer
    ///
    /// The review can only lower confidence; its failure never blocks.
    pub async fn generate(&self, snapshot: &MarketSnapshot) -> Signal {
        let mut signal = self.score(snapshot);

        if !signal.is_actionable() {
            return signal;
        }

        if let Some(validator) = &self.validator {
            let outcome = validator.validate(snapshot, &signal).await;
            match &outcome {
                Ok(review) => tracing::info!(
                    symbol = %signal.symbol,
                    "🤖 AI review: validated={} confidence={:.0} ({})",
                    review.validated,
                    review.confidence,
                    review.comment
                ),
                Err(e) => tracing::warn!(symbol = %signal.symbol, "AI review failed: {}", e),
            }
            apply_validation(&mut signal, Some(&outcome), &self.policy);
        }

        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Validation;
    use crate::clock::ManualClock;
    use crate::indicators::{Bands, MacdValue};
    use crate::models::Timeframe;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    fn engine(config: SignalConfig) -> SignalEngine {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap());
        SignalEngine::new(config, Arc::new(clock))
    }

    fn vote(strategy: Strategy, direction: Direction, strength: f64) -> Vote {
        Vote {
            strategy: strategy.name().to_string(),
            direction,
            strength,
        }
    }

    #[test]
    fn test_mixed_votes_below_threshold_are_neutral() {
        let votes = vec![
            vote(Strategy::Trend, Direction::Buy, 0.8),
            vote(Strategy::Momentum, Direction::Buy, 0.6),
            vote(Strategy::MeanReversion, Direction::Sell, 0.3),
            vote(Strategy::Breakout, Direction::Neutral, 0.0),
            vote(Strategy::MultiIndicator, Direction::Buy, 0.7),
            // volume_spike abstained: no vote
        ];

        let agg = engine(SignalConfig::default()).aggregate(&votes);

        assert!((agg.strength - 36.0).abs() < 1e-9);
        assert_eq!(agg.direction, Direction::Neutral);
        assert!((agg.confidence - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_tie_is_neutral() {
        let votes = vec![
            vote(Strategy::Trend, Direction::Buy, 0.9),
            vote(Strategy::Momentum, Direction::Sell, 0.9),
        ];
        let config = SignalConfig {
            threshold: 0.0,
            ..Default::default()
        };

        let agg = engine(config).aggregate(&votes);
        assert_eq!(agg.direction, Direction::Neutral);
        assert_eq!(agg.strength, 0.0);
    }

    #[test]
    fn test_strong_agreement_passes_threshold() {
        let votes = vec![
            vote(Strategy::Trend, Direction::Sell, 0.9),
            vote(Strategy::Momentum, Direction::Sell, 0.8),
            vote(Strategy::Breakout, Direction::Sell, 0.7),
        ];

        let agg = engine(SignalConfig::default()).aggregate(&votes);
        assert_eq!(agg.direction, Direction::Sell);
        assert!((agg.strength - 80.0).abs() < 1e-9);
        assert_eq!(agg.confidence, 100.0);
    }

    #[test]
    fn test_weights_shift_the_average() {
        let mut config = SignalConfig {
            threshold: 0.0,
            ..Default::default()
        };
        config.weights.trend = 3.0;
        let votes = vec![
            vote(Strategy::Trend, Direction::Buy, 1.0),
            vote(Strategy::Momentum, Direction::Sell, 1.0),
        ];

        let agg = engine(config).aggregate(&votes);
        assert_eq!(agg.direction, Direction::Buy);
        assert!((agg.strength - 50.0).abs() < 1e-9);
        assert!((agg.confidence - 75.0).abs() < 1e-9);
    }

    fn bullish_snapshot(genuine_volume: bool) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "XAU/USD".to_string(),
            timeframe: Timeframe::H1,
            candles: Vec::new(),
            indicators: IndicatorSet {
                close: Some(110.0),
                open: Some(105.0),
                rsi: Some(68.0),
                macd: Some(MacdValue {
                    macd: 1.2,
                    signal: 0.6,
                    histogram: 0.6,
                }),
                prev_macd_histogram: Some(0.4),
                bollinger: Some(Bands {
                    upper: 111.0,
                    middle: 104.0,
                    lower: 97.0,
                }),
                atr: Some(2.0),
                sma_fast: Some(104.0),
                sma_slow: Some(100.0),
                ema_fast: Some(106.0),
                ema_slow: Some(103.0),
                relative_volume: Some(if genuine_volume { 4.0 } else { 0.0 }),
                genuine_volume,
                highest_high: Some(108.0),
                lowest_low: Some(96.0),
                volatility: Some(1.0),
                prev_close: Some(105.0),
            },
            fetched_at: Utc::now(),
            stale: false,
        }
    }

    #[test]
    fn test_volume_strategy_abstains_without_genuine_volume() {
        let engine = engine(SignalConfig::default());
        let (votes, abstained) = engine.votes(&bullish_snapshot(false).indicators);

        assert_eq!(abstained, vec!["volume_spike".to_string()]);
        assert_eq!(votes.len(), 5);
        assert!(votes.iter().all(|v| v.strategy != "volume_spike"));
    }

    #[test]
    fn test_score_proposes_atr_levels() {
        let engine = engine(SignalConfig::default());
        let signal = engine.score(&bullish_snapshot(true));

        assert_eq!(signal.direction, Direction::Buy);
        assert!(signal.strength >= 70.0);
        assert!(signal.abstained.is_empty());
        assert_eq!(signal.stop_loss, Some(110.0 - 1.5 * 2.0));
        assert_eq!(signal.take_profit, Some(110.0 + 2.5 * 2.0));
    }

    struct Rejecting;

    #[async_trait]
    impl AiValidator for Rejecting {
        async fn validate(&self, _snapshot: &MarketSnapshot, _signal: &Signal) -> Result<Validation> {
            Ok(Validation {
                validated: false,
                confidence: 100.0,
                comment: "divergence".into(),
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl AiValidator for Broken {
        async fn validate(&self, _snapshot: &MarketSnapshot, _signal: &Signal) -> Result<Validation> {
            Err(Error::Validation("503".into()))
        }
    }

    #[tokio::test]
    async fn test_review_only_lowers_confidence() {
        let snapshot = bullish_snapshot(true);
        let plain = engine(SignalConfig::default()).generate(&snapshot).await;

        let rejected = engine(SignalConfig::default())
            .with_validator(Arc::new(Rejecting), ValidationPolicy::default())
            .generate(&snapshot)
            .await;
        assert_eq!(rejected.direction, plain.direction);
        assert!((rejected.confidence - plain.confidence * 0.5).abs() < 1e-9);

        let failed = engine(SignalConfig::default())
            .with_validator(Arc::new(Broken), ValidationPolicy::default())
            .generate(&snapshot)
            .await;
        assert!((failed.confidence - plain.confidence * 0.9).abs() < 1e-9);
    }
}
