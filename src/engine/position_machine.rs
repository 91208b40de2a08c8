use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::reconcile::{self, ReconcileAction};
use super::status::{PositionStatus, StatusSnapshot};
use super::PositionPhase;
use crate::config::BotSettings;
use crate::exchange::{bounded, Broker};
use crate::indicators::{calculate_atr, closed_only};
use crate::market_data::{CandleBuffer, MarketDataSource};
use crate::models::{
    BotState, Candle, ExitReason, OrderResult, PendingEntry, Position, TradeRecord, TradingPair,
};
use crate::notify::{Alert, Notifier};
use crate::persistence::{LoadedState, StateStore, TradeLedger};
use crate::risk::{CircuitBreakers, RiskManager};
use crate::strategy::{SignalEvaluator, WindowSet};
use crate::BotError;

/// Knobs of the lifecycle engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub pair: TradingPair,
    pub trade_amount_quote: f64,
    pub pending_timeout: ChronoDuration,
    pub dust_threshold: f64,
    pub reconcile_ratio: f64,
    pub trade_lookback: usize,
    pub failure_alert_threshold: u32,
    pub call_timeout: Duration,
    pub atr_period: usize,
}

impl EngineSettings {
    pub fn new(pair: TradingPair, bot: &BotSettings, atr_period: usize) -> Self {
        Self {
            pair,
            trade_amount_quote: bot.trade_amount_quote,
            pending_timeout: ChronoDuration::seconds(bot.pending_timeout_secs as i64),
            dust_threshold: bot.dust_threshold,
            reconcile_ratio: bot.reconcile_ratio,
            trade_lookback: bot.trade_lookback,
            failure_alert_threshold: bot.failure_alert_threshold,
            call_timeout: bot.call_timeout(),
            atr_period,
        }
    }
}

/// Collaborators injected into the engine
pub struct EngineParts {
    pub evaluator: Arc<dyn SignalEvaluator>,
    pub risk: RiskManager,
    pub breakers: CircuitBreakers,
    pub broker: Arc<dyn Broker>,
    pub market_data: Arc<dyn MarketDataSource>,
    pub buffer: CandleBuffer,
    pub store: StateStore,
    pub ledger: TradeLedger,
    pub notifier: Arc<dyn Notifier>,
}

/// State change applied during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    EnteredPending { candle_open_time: DateTime<Utc> },
    PendingCancelled,
    PendingExpired,
    PendingRejected { reason: String },
    EntryFailed { error: String },
    Opened { entry_price: f64, size: f64 },
    TrailingActivated { stop: f64 },
    Closed {
        reason: ExitReason,
        exit_price: f64,
        pnl_percent: f64,
    },
    ExitFailed { reason: ExitReason, error: String },
    ForcedFlat { cause: String },
    Reconstructed {
        entry_price: f64,
        size: f64,
        approximated: bool,
    },
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub state: PositionPhase,
    pub transitions: Vec<Transition>,
}

/// Everything gathered and decided during one tick
struct TickContext {
    now: DateTime<Utc>,
    windows: WindowSet,
    fast: Vec<Candle>,
    price: Option<f64>,
    atr: Option<f64>,
    base_balance: Option<f64>,
    entry_signal: bool,
    rationale: String,
    failures: Vec<String>,
    transitions: Vec<Transition>,
    alerts: Vec<Alert>,
}

impl TickContext {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            windows: WindowSet::new(),
            fast: Vec::new(),
            price: None,
            atr: None,
            base_balance: None,
            entry_signal: false,
            rationale: String::new(),
            failures: Vec::new(),
            transitions: Vec::new(),
            alerts: Vec::new(),
        }
    }

    fn fail(&mut self, error: &BotError) {
        if error.is_routine() {
            self.failures.push(error.to_string());
        }
    }
}

/// FLAT -> PENDING_ENTRY -> OPEN -> FLAT, one tick at a time
///
/// Each tick reconciles against the exchange, evaluates, acts, persists and
/// publishes a status snapshot. Ticks never overlap: the caller awaits one
/// before starting the next.
pub struct PositionStateMachine {
    settings: EngineSettings,
    evaluator: Arc<dyn SignalEvaluator>,
    risk: RiskManager,
    breakers: CircuitBreakers,
    broker: Arc<dyn Broker>,
    market_data: Arc<dyn MarketDataSource>,
    buffer: CandleBuffer,
    store: StateStore,
    ledger: TradeLedger,
    notifier: Arc<dyn Notifier>,
    state: BotState,
    // In-memory only
    last_entry_signal: bool,
    pending_exit: Option<ExitReason>,
    failure_streak: u32,
    failure_alerted: bool,
    last_error: Option<String>,
    unsaved: bool,
    save_failing: bool,
    startup_corruption: Option<String>,
    stream_connected: Option<Arc<AtomicBool>>,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl PositionStateMachine {
    pub fn new(settings: EngineSettings, parts: EngineParts, loaded: LoadedState) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot {
            symbol: settings.pair.to_string(),
            phase: PositionPhase::of(&loaded.state),
            ..Default::default()
        });

        tracing::info!(
            phase = %PositionPhase::of(&loaded.state),
            "📂 Engine state loaded for {}",
            settings.pair
        );

        Self {
            settings,
            evaluator: parts.evaluator,
            risk: parts.risk,
            breakers: parts.breakers,
            broker: parts.broker,
            market_data: parts.market_data,
            buffer: parts.buffer,
            store: parts.store,
            ledger: parts.ledger,
            notifier: parts.notifier,
            state: loaded.state,
            last_entry_signal: false,
            pending_exit: None,
            failure_streak: 0,
            failure_alerted: false,
            last_error: None,
            unsaved: false,
            save_failing: false,
            startup_corruption: loaded.corruption,
            stream_connected: None,
            status_tx,
        }
    }

    /// Report stream health in the status snapshot
    pub fn with_stream_health(mut self, connected: Arc<AtomicBool>) -> Self {
        self.stream_connected = Some(connected);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    pub fn phase(&self) -> PositionPhase {
        PositionPhase::of(&self.state)
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Exit whose sell failed and is retried every tick
    pub fn pending_exit(&self) -> Option<ExitReason> {
        self.pending_exit
    }

    pub async fn tick(&mut self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as of `now`
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let before = self.state.clone();
        let mut ctx = TickContext::new(now);

        self.check_integrity(&mut ctx);
        self.load_market(&mut ctx).await;
        let reconciled = self.reconcile(&mut ctx).await;

        if self.state.has_position() {
            self.manage_open(&mut ctx).await;
        } else {
            self.manage_entry(&mut ctx, reconciled).await;
        }

        self.persist(&before, &mut ctx);
        self.track_failures(&mut ctx);
        self.publish(&ctx);

        let alerts = std::mem::take(&mut ctx.alerts);
        self.dispatch(alerts).await;

        TickOutcome {
            state: self.phase(),
            transitions: ctx.transitions,
        }
    }

    // ========================================================================
    // Integrity + inputs
    // ========================================================================

    fn check_integrity(&mut self, ctx: &mut TickContext) {
        let cause = self.startup_corruption.take().or_else(|| {
            self.state
                .position
                .as_ref()
                .and_then(|position| position.validate().err())
        });

        if let Some(cause) = cause {
            let error = BotError::StateCorruption(cause);
            tracing::error!("🚨 {} - forcing FLAT", error);

            self.state.position = None;
            self.state.pending = None;
            self.pending_exit = None;
            self.unsaved = true;

            ctx.transitions.push(Transition::ForcedFlat {
                cause: error.to_string(),
            });
            ctx.alerts.push(Alert::critical(
                "State corrupted, forced FLAT",
                format!("{}: {}", self.settings.pair, error),
            ));
        }
    }

    async fn load_market(&mut self, ctx: &mut TickContext) {
        let timeout = self.settings.call_timeout;

        for (timeframe, min_length) in self.evaluator.required_windows() {
            let window = self
                .buffer
                .get_window(
                    self.market_data.as_ref(),
                    &self.settings.pair,
                    timeframe,
                    min_length,
                    timeout,
                )
                .await;

            if window.insufficient {
                ctx.fail(&BotError::DataUnavailable(format!(
                    "{} window has {} candles, needs {}",
                    timeframe,
                    window.candles.len(),
                    min_length
                )));
            }
            ctx.windows.insert(timeframe, window.candles);
        }

        ctx.fast = ctx
            .windows
            .get(&self.evaluator.fast_timeframe())
            .cloned()
            .unwrap_or_default();
        ctx.atr = calculate_atr(closed_only(&ctx.fast), self.settings.atr_period);

        let live_close = ctx.fast.last().map(|c| c.close);
        ctx.price = match bounded(
            "get_current_price",
            timeout,
            self.broker.get_current_price(&self.settings.pair),
        )
        .await
        {
            Ok(price) if price.is_finite() && price > 0.0 => Some(price),
            Ok(price) => {
                ctx.fail(&BotError::DataUnavailable(format!("invalid price {}", price)));
                live_close
            }
            Err(e) => {
                ctx.fail(&e);
                live_close
            }
        };
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Returns whether local state is known to match the exchange
    async fn reconcile(&mut self, ctx: &mut TickContext) -> bool {
        let balances = match bounded(
            "get_balance",
            self.settings.call_timeout,
            self.broker.get_balance(),
        )
        .await
        {
            Ok(balances) => balances,
            Err(e) => {
                ctx.fail(&e);
                return false;
            }
        };

        let base = balances
            .get(&self.settings.pair.base)
            .copied()
            .unwrap_or(0.0);
        ctx.base_balance = Some(base);

        match reconcile::assess(
            &self.state,
            base,
            self.settings.dust_threshold,
            self.settings.reconcile_ratio,
        ) {
            ReconcileAction::InSync => true,
            ReconcileAction::ClearPosition { expected, observed } => {
                let error = BotError::ReconciliationMismatch {
                    expected: format!("{:.8} {}", expected, self.settings.pair.base),
                    observed: format!("{:.8} {}", observed, self.settings.pair.base),
                };
                tracing::warn!("⚠️ {} - position closed outside the bot, clearing", error);

                self.state.position = None;
                self.pending_exit = None;

                ctx.transitions.push(Transition::ForcedFlat {
                    cause: error.to_string(),
                });
                ctx.alerts.push(Alert::warning(
                    "Position closed externally",
                    format!("{}: {}", self.settings.pair, error),
                ));
                true
            }
            ReconcileAction::Rebuild { observed } => self.rebuild_position(ctx, observed).await,
        }
    }

    async fn rebuild_position(&mut self, ctx: &mut TickContext, observed: f64) -> bool {
        let Some(atr) = ctx.atr else {
            tracing::warn!(
                "Holding {:.8} {} without local position, ATR unavailable - rebuild deferred",
                observed,
                self.settings.pair.base
            );
            return false;
        };

        let trades = bounded(
            "get_last_trades",
            self.settings.call_timeout,
            self.broker
                .get_last_trades(&self.settings.pair, self.settings.trade_lookback),
        )
        .await;

        let from_buy = match &trades {
            Ok(trades) => reconcile::last_buy(trades).map(|buy| (buy.price, buy.timestamp)),
            Err(e) if e.is_transient() => {
                ctx.fail(e);
                return false;
            }
            Err(e) => {
                ctx.fail(e);
                None
            }
        };

        let (entry_price, entry_time, approximated) = match (from_buy, ctx.price) {
            (Some((price, time)), _) => (price, time, false),
            (None, Some(price)) => (price, ctx.now, true),
            (None, None) => return false,
        };

        let mut position = self.risk.open_position(entry_price, observed, entry_time, atr);
        position.entry_approximated = approximated;

        tracing::warn!(
            entry_price,
            size = observed,
            approximated,
            "🔧 Rebuilt position from exchange balance"
        );
        ctx.alerts.push(Alert::warning(
            "Position rebuilt from exchange balance",
            format!(
                "{}: {:.8} {} at {:.6}{}\nSL {:.6} TP {:.6}",
                self.settings.pair,
                observed,
                self.settings.pair.base,
                entry_price,
                if approximated {
                    " (approximated from current price)"
                } else {
                    ""
                },
                position.sl_price,
                position.tp_price
            ),
        ));

        self.state.pending = None;
        self.state.position = Some(position);
        ctx.transitions.push(Transition::Reconstructed {
            entry_price,
            size: observed,
            approximated,
        });
        true
    }

    // ========================================================================
    // OPEN
    // ========================================================================

    async fn manage_open(&mut self, ctx: &mut TickContext) {
        let Some(mut position) = self.state.position.clone() else {
            return;
        };
        // A remembered exit is retried even without a price this tick
        let exit = if let Some(reason) = self.pending_exit {
            ctx.rationale = format!("retrying {} sell", reason);
            Some(reason)
        } else {
            let Some(price) = ctx.price else {
                tracing::warn!("No price this tick, risk checks skipped");
                return;
            };

            if let Some(atr) = ctx.atr {
                let updated = self.risk.update_trailing(&position, price, atr);
                if updated.trailing_activated && !position.trailing_activated {
                    ctx.transitions.push(Transition::TrailingActivated {
                        stop: updated.trailing_sl_price,
                    });
                }
                position = updated;
                self.state.position = Some(position.clone());
            }

            if let Some(reason) = self.risk.check_exit(price, &position) {
                ctx.rationale = format!("{} at {:.6}", reason, price);
                Some(reason)
            } else {
                let decision = self.evaluator.evaluate_exit(&ctx.fast);
                if decision.is_insufficient() {
                    ctx.fail(&BotError::DataUnavailable(decision.rationale.clone()));
                }
                ctx.rationale = decision.rationale;
                decision.fired.then_some(ExitReason::Signal)
            }
        };

        let Some(reason) = exit else {
            return;
        };

        // Never sell more than the exchange says we hold
        let amount = match ctx.base_balance {
            Some(balance) if balance < position.size => balance,
            _ => position.size,
        };

        tracing::info!(
            reason = %reason,
            price = ?ctx.price,
            amount,
            "📉 Exit triggered: {}",
            ctx.rationale
        );

        match bounded(
            "place_market_sell",
            self.settings.call_timeout,
            self.broker.place_market_sell(&self.settings.pair, amount),
        )
        .await
        {
            Ok(order) => self.close_position(ctx, &position, reason, order),
            Err(e) => {
                ctx.fail(&e);
                let error = BotError::OrderExecution(format!("{} sell failed: {}", reason, e));
                tracing::warn!("{} - position kept, retrying next tick", error);

                if self.pending_exit.is_none() {
                    ctx.alerts.push(Alert::warning(
                        "Exit sell failed",
                        format!("{}: {}", self.settings.pair, error),
                    ));
                }
                self.pending_exit = Some(reason);
                ctx.transitions.push(Transition::ExitFailed {
                    reason,
                    error: e.to_string(),
                });
            }
        }
    }

    fn close_position(
        &mut self,
        ctx: &mut TickContext,
        position: &Position,
        reason: ExitReason,
        order: OrderResult,
    ) {
        let exit_price = if order.average_price > 0.0 {
            order.average_price
        } else {
            ctx.price.unwrap_or(position.entry_price)
        };
        let pnl_percent = position.pnl_percent(exit_price);

        let record = TradeRecord {
            entry_price: position.entry_price,
            exit_price,
            size: if order.filled_base > 0.0 {
                order.filled_base
            } else {
                position.size
            },
            pnl_percent,
            reason,
            timestamp: ctx.now,
        };
        if let Err(e) = self.ledger.append(&record) {
            tracing::error!("Failed to record trade: {}", e);
            ctx.alerts.push(Alert::critical(
                "Trade ledger write failed",
                format!("{}: {} ({:?})", self.settings.pair, e, record),
            ));
        }

        if pnl_percent < 0.0 {
            self.state.last_realized_loss_time = Some(ctx.now);
        }
        self.state.position = None;
        self.pending_exit = None;

        let icon = if pnl_percent >= 0.0 { "💰" } else { "🔻" };
        tracing::info!(
            "{} Position closed ({}) at {:.6}, P&L {:+.2}%",
            icon,
            reason,
            exit_price,
            pnl_percent
        );
        ctx.alerts.push(Alert::info(
            format!("{} Position closed: {}", icon, reason),
            format!(
                "{}: entry {:.6} exit {:.6} P&L {:+.2}%",
                self.settings.pair, position.entry_price, exit_price, pnl_percent
            ),
        ));
        ctx.transitions.push(Transition::Closed {
            reason,
            exit_price,
            pnl_percent,
        });
    }

    // ========================================================================
    // FLAT / PENDING_ENTRY
    // ========================================================================

    async fn manage_entry(&mut self, ctx: &mut TickContext, reconciled: bool) {
        let decision = self.evaluator.evaluate_entry(&ctx.windows);
        ctx.entry_signal = decision.fired;
        ctx.rationale = decision.rationale.clone();

        let expired = self
            .state
            .pending
            .as_ref()
            .is_some_and(|p| ctx.now - p.signal_time > self.settings.pending_timeout);
        if expired {
            tracing::info!(
                "⏱️ Pending entry expired after {}s",
                self.settings.pending_timeout.num_seconds()
            );
            self.state.pending = None;
            if !decision.is_insufficient() {
                self.last_entry_signal = decision.fired;
            }
            ctx.transitions.push(Transition::PendingExpired);
            return;
        }

        // No data is not a falling edge
        if decision.is_insufficient() {
            ctx.fail(&BotError::DataUnavailable(decision.rationale));
            return;
        }

        let rising = decision.fired && !self.last_entry_signal;
        if rising && self.state.pending.is_none() && !reconciled {
            tracing::warn!("Entry signal held back, exchange balance unknown this tick");
            return;
        }
        self.last_entry_signal = decision.fired;

        match self.state.pending.clone() {
            Some(pending) => {
                if !decision.fired {
                    tracing::info!("↩️ Entry signal dropped before confirmation: {}", decision.rationale);
                    self.state.pending = None;
                    ctx.transitions.push(Transition::PendingCancelled);
                    return;
                }
                if self.originating_candle_open(&pending, ctx) {
                    tracing::debug!("Waiting for signal candle to close");
                    return;
                }
                // An earlier buy may have filled without a response
                if !reconciled {
                    tracing::warn!("Confirmation held back, exchange balance unknown this tick");
                    return;
                }
                self.confirm_entry(ctx).await;
            }
            None if rising => {
                if let Err(trip) = self.breakers.check(&self.state, ctx.now) {
                    tracing::info!("🛑 Circuit breaker tripped: {:?}, entry skipped", trip);
                    return;
                }
                let Some(candle) = ctx.fast.last() else {
                    return;
                };

                let candle_open_time = candle.open_time;
                tracing::info!("🔔 Entry signal, awaiting candle close: {}", decision.rationale);
                self.state.pending = Some(PendingEntry {
                    signal_time: ctx.now,
                    candle_open_time,
                });
                ctx.transitions.push(Transition::EnteredPending { candle_open_time });
            }
            None => {}
        }
    }

    fn originating_candle_open(&self, pending: &PendingEntry, ctx: &TickContext) -> bool {
        let timeframe = self.evaluator.fast_timeframe();
        if ctx.now >= pending.candle_open_time + timeframe.duration() {
            return false;
        }

        let closed = ctx.fast.iter().any(|c| {
            c.open_time > pending.candle_open_time
                || (c.open_time == pending.candle_open_time && c.is_closed)
        });
        !closed
    }

    async fn confirm_entry(&mut self, ctx: &mut TickContext) {
        let (Some(price), Some(atr)) = (ctx.price, ctx.atr) else {
            tracing::debug!("Confirmation waits for price and ATR");
            return;
        };

        let (profitable, detail) = self.risk.passes_profitability(price, atr);
        if !profitable {
            tracing::info!("❌ Entry rejected at confirmation: {}", detail);
            self.state.pending = None;
            ctx.transitions.push(Transition::PendingRejected { reason: detail });
            return;
        }

        tracing::info!(
            "✅ Entry confirmed ({}), buying {} {}",
            detail,
            self.settings.trade_amount_quote,
            self.settings.pair.quote
        );

        let result = bounded(
            "place_market_buy",
            self.settings.call_timeout,
            self.broker
                .place_market_buy(&self.settings.pair, self.settings.trade_amount_quote),
        )
        .await
        .and_then(|order| {
            if order.filled_base > 0.0 && order.average_price > 0.0 {
                Ok(order)
            } else {
                Err(BotError::OrderExecution(format!(
                    "order {} returned no fill",
                    order.order_id
                )))
            }
        });

        match result {
            Ok(order) => {
                let position =
                    self.risk
                        .open_position(order.average_price, order.filled_base, ctx.now, atr);

                tracing::info!(
                    "🚀 Position opened: {:.8} {} at {:.6} (SL {:.6}, TP {:.6})",
                    position.size,
                    self.settings.pair.base,
                    position.entry_price,
                    position.sl_price,
                    position.tp_price
                );
                ctx.alerts.push(Alert::info(
                    "🚀 Position opened",
                    format!(
                        "{}: {:.8} at {:.6}\nSL {:.6} TP {:.6}",
                        self.settings.pair,
                        position.size,
                        position.entry_price,
                        position.sl_price,
                        position.tp_price
                    ),
                ));
                ctx.transitions.push(Transition::Opened {
                    entry_price: position.entry_price,
                    size: position.size,
                });

                self.state.pending = None;
                self.state.position = Some(position);
            }
            Err(e) => {
                ctx.fail(&e);
                tracing::warn!("Buy failed, entry stays pending: {}", e);
                ctx.transitions.push(Transition::EntryFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    fn persist(&mut self, before: &BotState, ctx: &mut TickContext) {
        if self.state != *before {
            self.state.touch(ctx.now);
            self.unsaved = true;
        }
        if !self.unsaved {
            return;
        }

        match self.store.save(&self.state) {
            Ok(()) => {
                self.unsaved = false;
                self.save_failing = false;
            }
            Err(e) => {
                tracing::error!("💾 Failed to persist state: {}", e);
                if !self.save_failing {
                    ctx.alerts.push(Alert::critical(
                        "State not persisted",
                        format!("{}: {}", self.settings.pair, e),
                    ));
                }
                self.save_failing = true;
            }
        }
    }

    fn track_failures(&mut self, ctx: &mut TickContext) {
        if ctx.failures.is_empty() {
            if self.failure_alerted {
                ctx.alerts.push(Alert::info(
                    "Recovered",
                    format!(
                        "{}: ticks healthy again after {} failures",
                        self.settings.pair, self.failure_streak
                    ),
                ));
            }
            self.failure_streak = 0;
            self.failure_alerted = false;
            self.last_error = None;
            return;
        }

        self.failure_streak += 1;
        let summary = ctx.failures.join("; ");
        tracing::warn!(streak = self.failure_streak, "Tick degraded: {}", summary);
        self.last_error = Some(summary.clone());

        let threshold = self.settings.failure_alert_threshold;
        if threshold > 0 && !self.failure_alerted && self.failure_streak >= threshold {
            self.failure_alerted = true;
            ctx.alerts.push(Alert::warning(
                format!("{} consecutive failed ticks", self.failure_streak),
                format!("{}: {}", self.settings.pair, summary),
            ));
        }
    }

    fn publish(&self, ctx: &TickContext) {
        let snapshot = StatusSnapshot {
            symbol: self.settings.pair.to_string(),
            phase: self.phase(),
            updated_at: Some(ctx.now),
            last_price: ctx.price,
            entry_signal: ctx.entry_signal,
            rationale: ctx.rationale.clone(),
            position: self
                .state
                .position
                .as_ref()
                .map(|p| PositionStatus::new(p, ctx.price)),
            stream_connected: self
                .stream_connected
                .as_ref()
                .map(|flag| flag.load(Ordering::SeqCst))
                .unwrap_or(false),
            failure_streak: self.failure_streak,
            last_error: self.last_error.clone(),
        };
        self.status_tx.send_replace(snapshot);
    }

    async fn dispatch(&self, alerts: Vec<Alert>) {
        for alert in alerts {
            if bounded(
                "notify",
                self.settings.call_timeout,
                self.notifier.notify(&alert),
            )
            .await
            .is_err()
            {
                tracing::warn!(title = %alert.title, "Alert not delivered");
            }
        }
    }
}
