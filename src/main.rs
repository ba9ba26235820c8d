use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tradeguard::api::{
    AiValidator, LogNotifier, MarketDataProvider, MarketScenario, Notifier, OpenAiValidator,
    SyntheticProvider, TelegramNotifier, TwelveDataClient,
};
use tradeguard::clock::{Clock, SystemClock};
use tradeguard::config::{ProviderKind, Settings};
use tradeguard::execution::PaperBroker;
use tradeguard::journal::TradeJournal;
use tradeguard::orchestrator::{Orchestrator, Services};

const DEFAULT_LOG_FILTER: &str = "tradeguard=info";

#[derive(Parser)]
#[command(name = "tradeguard", about = "Market monitoring and position protection engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitoring loop
    Run {
        /// TOML config file (defaults to ./tradeguard.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Trade against the in-memory paper broker
        #[arg(long, default_value_t = false)]
        paper: bool,

        /// Run a single cycle and exit
        #[arg(long, default_value_t = false)]
        once: bool,

        /// tracing filter, overrides RUST_LOG
        #[arg(long)]
        log_filter: Option<String>,
    },
    /// Load and validate the configuration, then print it
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            paper,
            once,
            log_filter,
        } => {
            setup_logging(log_filter.as_deref());
            let settings = load_settings(config, paper)?;
            run(settings, once).await
        }
        Commands::CheckConfig { config } => {
            setup_logging(None);
            let settings = Settings::load(config.as_deref()).context("invalid configuration")?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            println!("\n✅ Configuration OK");
            Ok(())
        }
    }
}

fn setup_logging(filter: Option<&str>) {
    let filter = filter
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_settings(path: Option<PathBuf>, paper: bool) -> Result<Settings> {
    let mut settings = Settings::read(path.as_deref()).context("failed to read configuration")?;

    if paper {
        settings.general.paper = true;
        let has_key = settings.data.api_key.as_deref().map_or(false, |k| !k.is_empty());
        if settings.data.provider == ProviderKind::TwelveData && !has_key {
            tracing::info!("No market data API key, paper run uses the synthetic feed");
            settings.data.provider = ProviderKind::Synthetic;
        }
    }

    settings.validate().context("invalid configuration")?;

    if !settings.general.paper {
        bail!("no live broker adapter is built in; start with --paper or set general.paper = true");
    }

    Ok(settings)
}

fn build_provider(settings: &Settings) -> Result<Arc<dyn MarketDataProvider>> {
    let provider: Arc<dyn MarketDataProvider> = match settings.data.provider {
        ProviderKind::TwelveData => {
            let api_key = settings.data.api_key.clone().unwrap_or_default();
            let rpm = settings.data.http_requests_per_minute;
            let client = match &settings.data.base_url {
                Some(url) => TwelveDataClient::with_base_url(api_key, rpm, url)?,
                None => TwelveDataClient::new(api_key, rpm)?,
            };
            Arc::new(client)
        }
        ProviderKind::Synthetic => Arc::new(SyntheticProvider::new(
            settings.data.synthetic_seed,
            MarketScenario::Trending { drift: 0.0005 },
        )),
    };
    Ok(provider)
}

fn build_notifier(settings: &Settings) -> Result<Arc<dyn Notifier>> {
    match (&settings.notify.telegram_token, &settings.notify.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            tracing::info!("📣 Telegram notifications enabled");
            Ok(Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone())?))
        }
        _ => Ok(Arc::new(LogNotifier)),
    }
}

fn build_validator(settings: &Settings) -> Result<Option<Arc<dyn AiValidator>>> {
    if !settings.ai.enabled {
        return Ok(None);
    }
    let api_key = settings.ai.api_key.clone().unwrap_or_default();
    let mut validator = OpenAiValidator::new(
        api_key,
        settings.ai.model.clone(),
        Duration::from_secs(settings.ai.timeout_secs),
    )?;
    if let Some(url) = &settings.ai.url {
        validator = validator.with_url(url);
    }
    tracing::info!("🤖 AI signal review enabled");
    Ok(Some(Arc::new(validator)))
}

async fn run(settings: Settings, once: bool) -> Result<()> {
    tracing::info!("🚀 tradeguard starting");
    tracing::info!("  Symbols: {}", settings.general.symbols.join(", "));
    tracing::info!("  Timeframe: {}", settings.general.timeframe);
    tracing::info!("  Risk per trade: {}%", settings.risk.risk_fraction * 100.0);
    tracing::info!("  Max daily loss: {}%", settings.breakers.max_daily_loss_pct * 100.0);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let broker = Arc::new(PaperBroker::new(settings.general.paper_equity).with_clock(clock.clone()));

    // Open and close records per trade, enough for the Kelly lookback
    let retain = settings.journal.retain.max(2 * settings.risk.kelly_lookback);
    let journal = if settings.journal.enabled {
        TradeJournal::open_with_retention(&settings.journal.dir, retain)
            .with_context(|| format!("failed to open journal at {}", settings.journal.dir.display()))?
    } else {
        TradeJournal::in_memory().with_retention(retain)
    };

    let services = Services {
        provider: build_provider(&settings)?,
        broker: broker.clone(),
        clock,
        notifier: build_notifier(&settings)?,
        validator: build_validator(&settings)?,
        journal,
    };
    let mut orchestrator = Orchestrator::new(&settings, services).with_price_feed(broker);

    if once {
        let report = orchestrator.run_cycle().await;
        for (symbol, outcome) in &report.outcomes {
            println!("{:<12} {:?}", symbol, outcome);
        }
        return Ok(());
    }

    let control = orchestrator.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping after the current cycle");
            control.stop();
        }
    });

    orchestrator.run().await;
    Ok(())
}
