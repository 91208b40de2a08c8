use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use trendbot::config::AppConfig;
use trendbot::engine::{EngineParts, EngineSettings, PositionPhase, PositionStateMachine, StatusSnapshot};
use trendbot::exchange::{BinanceClient, Broker, PaperBroker};
use trendbot::market_data::{CandleBuffer, KlineStream};
use trendbot::notify::{Alert, LogNotifier, Notifier, TelegramNotifier};
use trendbot::persistence::{StateStore, TradeLedger};
use trendbot::risk::RiskManager;
use trendbot::strategy::{SignalEvaluator, TrendMomentumStrategy};

const STREAM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "trendbot", about = "Trend-following spot trading bot")]
struct Cli {
    /// Config file, replaces config/default + config/local
    #[arg(short, long)]
    config: Option<String>,

    /// Paper trading regardless of configuration
    #[arg(long)]
    dry_run: bool,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.bot.dry_run = true;
    }
    config.validate()?;

    let pair = config.bot.pair()?;
    tracing::info!("🚀 trendbot starting for {}", pair);
    log_configuration(&config);

    // ========================================================================
    // Exchange + persistence
    // ========================================================================

    let binance = Arc::new(BinanceClient::new(
        &config.exchange.rest_url,
        config.exchange.credentials(),
        config.exchange.requests_per_minute,
        Duration::from_secs(config.exchange.http_timeout_secs),
        config.exchange.recv_window_ms,
    )?);

    let store = StateStore::new(&config.persistence.data_dir, &config.bot.symbol)?;
    let ledger = TradeLedger::new(&config.persistence.data_dir, &config.bot.symbol)?;
    let loaded = store.load()?;

    let broker: Arc<dyn Broker> = if config.bot.dry_run {
        // Paper wallet starts out holding the persisted position, if any
        let held = loaded.state.position.as_ref().map_or(0.0, |p| p.size);
        tracing::info!(
            "📝 Paper trading with {:.2} {}",
            config.exchange.paper_initial_quote,
            pair.quote
        );
        Arc::new(
            PaperBroker::new(
                binance.clone(),
                &pair,
                config.exchange.paper_initial_quote,
                config.risk.fee_rate,
                config.risk.slippage_pct,
            )
            .with_base_balance(&pair, held),
        )
    } else {
        tracing::warn!("💸 LIVE trading enabled on {}", config.exchange.rest_url);
        binance.clone()
    };

    let notifier = create_notifier(&config)?;

    // ========================================================================
    // Market data
    // ========================================================================

    let strategy = TrendMomentumStrategy::new(config.strategy.clone());
    let timeframes = strategy
        .required_windows()
        .into_iter()
        .map(|(timeframe, _)| timeframe)
        .collect();
    let evaluator: Arc<dyn SignalEvaluator> = Arc::new(strategy);

    let buffer = CandleBuffer::new(config.bot.buffer_size);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let stream = KlineStream::new(&config.exchange.ws_url, pair.clone(), timeframes, buffer.clone())
        .with_backfill(binance.clone())
        .with_backoff(
            Duration::from_secs(config.exchange.reconnect_base_secs),
            Duration::from_secs(config.exchange.reconnect_max_secs),
        );
    let connected = stream.connected_flag();
    let stream_task = tokio::spawn(stream.run(shutdown_rx));

    // ========================================================================
    // Engine
    // ========================================================================

    let settings = EngineSettings::new(
        pair.clone(),
        &config.bot,
        config.strategy.indicators.atr_period,
    );
    let parts = EngineParts {
        evaluator,
        risk: RiskManager::new(config.risk.clone()),
        breakers: config.circuit_breakers.clone(),
        broker,
        market_data: binance,
        buffer,
        store,
        ledger,
        notifier: notifier.clone(),
    };
    let mut engine = PositionStateMachine::new(settings, parts, loaded).with_stream_health(connected);
    let status_task = tokio::spawn(status_reporter(engine.subscribe()));

    if cli.once {
        let outcome = engine.tick().await;
        tracing::info!("Single tick finished in {} ({} transitions)", outcome.state, outcome.transitions.len());
        shutdown(shutdown_tx, stream_task, status_task).await;
        return Ok(());
    }

    let mode = if config.bot.dry_run { "paper" } else { "live" };
    if let Err(e) = notifier
        .notify(&Alert::info("trendbot started", format!("{} ({}), state {}", pair, mode, engine.phase())))
        .await
    {
        tracing::warn!("Startup alert not delivered: {}", e);
    }

    tracing::info!(
        "🔄 Ticking every {}s. Press Ctrl+C to stop...",
        config.bot.poll_interval_secs
    );

    let mut ticker = interval(Duration::from_secs(config.bot.poll_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                // A tick always runs to completion before shutdown is observed
                let outcome = engine.tick().await;
                for transition in &outcome.transitions {
                    tracing::info!("➡️  {:?}", transition);
                }
            }
        }
    }

    shutdown(shutdown_tx, stream_task, status_task).await;
    tracing::info!("👋 trendbot stopped in {}", engine.phase());
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trendbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_configuration(config: &AppConfig) {
    tracing::info!("📊 Configuration:");
    tracing::info!("  Mode: {}", if config.bot.dry_run { "paper" } else { "LIVE" });
    tracing::info!(
        "  Symbol: {} ({} quote per entry)",
        config.bot.symbol,
        config.bot.trade_amount_quote
    );
    tracing::info!(
        "  Timeframes: {} fast, {:?} confirm",
        config.strategy.fast_timeframe,
        config.strategy.confirm_timeframes
    );
    tracing::info!(
        "  Risk: SL {}x / TP {}x / trail {}x after {}x ATR",
        config.risk.sl_multiplier,
        config.risk.tp_multiplier,
        config.risk.trailing_multiplier,
        config.risk.trailing_activation_multiplier
    );
    tracing::info!("  Data dir: {}", config.persistence.data_dir);
}

fn create_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>> {
    match (
        &config.notify.telegram_bot_token,
        &config.notify.telegram_chat_id,
    ) {
        (Some(token), Some(chat_id)) if config.notify.telegram_enabled() => {
            tracing::info!("📨 Telegram alerts enabled");
            Ok(Arc::new(TelegramNotifier::new(
                &config.notify.telegram_api_url,
                token,
                chat_id,
                Duration::from_secs(config.notify.timeout_secs),
            )?))
        }
        _ => {
            tracing::info!("Telegram not configured, alerts go to the log only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

// ============================================================================
// Background tasks
// ============================================================================

async fn status_reporter(mut status: watch::Receiver<StatusSnapshot>) {
    let mut last_phase: Option<PositionPhase> = None;

    while status.changed().await.is_ok() {
        let snapshot = status.borrow_and_update().clone();
        if last_phase != Some(snapshot.phase) {
            tracing::info!("📊 {}", snapshot.summary());
            last_phase = Some(snapshot.phase);
        } else {
            tracing::debug!("📊 {}", snapshot.summary());
        }
    }
}

async fn shutdown(
    shutdown_tx: watch::Sender<bool>,
    stream_task: tokio::task::JoinHandle<()>,
    status_task: tokio::task::JoinHandle<()>,
) {
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(STREAM_SHUTDOWN_TIMEOUT, stream_task)
        .await
        .is_err()
    {
        tracing::warn!("Kline stream did not stop within {:?}", STREAM_SHUTDOWN_TIMEOUT);
    }
    status_task.abort();
}
