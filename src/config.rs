// Layered settings
//
// defaults -> optional TOML file -> TRADEGUARD__SECTION__KEY environment
// variables. Every section has serde defaults so a missing file is fine;
// `validate()` is the only place startup is allowed to fail.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::execution::SessionConfig;
use crate::gateway::GatewayConfig;
use crate::guardian::GuardianConfig;
use crate::indicators::IndicatorParams;
use crate::models::Timeframe;
use crate::risk::{CircuitBreakers, RiskConfig};
use crate::strategy::SignalConfig;
use crate::{Error, Result};

const DEFAULT_CONFIG_FILE: &str = "tradeguard";
const ENV_PREFIX: &str = "TRADEGUARD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub data: DataSettings,
    pub gateway: GatewayConfig,
    pub indicators: IndicatorParams,
    pub signals: SignalConfig,
    pub risk: RiskConfig,
    pub guardian: GuardianConfig,
    pub broker: SessionConfig,
    pub breakers: CircuitBreakers,
    pub notify: NotifySettings,
    pub ai: AiSettings,
    pub journal: JournalSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub history_length: usize,
    pub cycle_interval_secs: u64,
    pub paper: bool,
    pub paper_equity: f64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["EUR/USD".to_string()],
            timeframe: Timeframe::H1,
            history_length: 200,
            cycle_interval_secs: 60,
            paper: false,
            paper_equity: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    TwelveData,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// HTTP pacing inside the client, independent of the gateway budget
    pub http_requests_per_minute: u32,
    pub synthetic_seed: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::TwelveData,
            api_key: None,
            base_url: None,
            http_requests_per_minute: 8,
            synthetic_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Share of the AI's own confidence removed from a rejected signal
    pub rejection_weight: f64,
    /// Confidence multiplier when the validator call fails
    pub failure_factor: f64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: None,
            url: None,
            timeout_secs: 20,
            rejection_weight: 0.5,
            failure_factor: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    pub equity_every: u64, // cycles
    /// Records of each kind kept in memory; the files keep everything
    pub retain: usize,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("journal"),
            equity_every: 10,
            retain: 500,
        }
    }
}

impl Settings {
    /// Load and validate settings. `path` overrides the default
    /// `tradeguard.toml` lookup and must exist when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = Self::read(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Layer the sources without validating, for callers that still
    /// apply command-line overrides
    pub fn read(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("general.symbols"),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Configuration(msg.to_string()));

        if self.general.symbols.is_empty() {
            return fail("general.symbols must list at least one symbol");
        }
        if self.general.cycle_interval_secs == 0 {
            return fail("general.cycle_interval_secs must be positive");
        }
        if self.general.history_length < self.indicators.warmup_bars() {
            return Err(Error::Configuration(format!(
                "general.history_length {} is shorter than the {} bars indicators need",
                self.general.history_length,
                self.indicators.warmup_bars()
            )));
        }
        if self.data.provider == ProviderKind::TwelveData
            && self.data.api_key.as_deref().map_or(true, str::is_empty)
        {
            return fail("data.api_key is required for the twelvedata provider");
        }
        if self.data.http_requests_per_minute == 0 {
            return fail("data.http_requests_per_minute must be positive");
        }
        if self.gateway.requests_per_window == 0 || self.gateway.daily_limit == 0 {
            return fail("gateway quotas must be positive");
        }
        if self.gateway.window_secs == 0 {
            return fail("gateway.window_secs must be positive");
        }
        if !(self.risk.risk_fraction > 0.0 && self.risk.risk_fraction < 1.0) {
            return fail("risk.risk_fraction must be in (0, 1)");
        }
        if !(0.5..=5.0).contains(&self.risk.stop_multiplier) {
            return fail("risk.stop_multiplier must be within [0.5, 5.0]");
        }
        if !(0.0..=100.0).contains(&self.signals.threshold) {
            return fail("signals.threshold must be within [0, 100]");
        }
        if self.guardian.stop_atr <= 0.0 || self.guardian.target_atr <= 0.0 {
            return fail("guardian ATR multiples must be positive");
        }
        if self.guardian.connectivity_checks == 0 {
            return fail("guardian.connectivity_checks must be at least 1");
        }
        if self.notify.telegram_token.is_some() != self.notify.telegram_chat_id.is_some() {
            return fail("notify.telegram_token and notify.telegram_chat_id go together");
        }
        if self.ai.enabled && self.ai.api_key.as_deref().map_or(true, str::is_empty) {
            return fail("ai.api_key is required when ai.enabled is set");
        }
        if !(0.0..=1.0).contains(&self.ai.rejection_weight) || !(0.0..=1.0).contains(&self.ai.failure_factor) {
            return fail("ai.rejection_weight and ai.failure_factor must be within [0, 1]");
        }

        Ok(())
    }
}
