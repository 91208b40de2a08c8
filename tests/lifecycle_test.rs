use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use trendbot::engine::{
    EngineParts, EngineSettings, PositionPhase, PositionStateMachine, TickOutcome, Transition,
};
use trendbot::exchange::Broker;
use trendbot::market_data::{CandleBuffer, MarketDataSource};
use trendbot::notify::{Alert, AlertLevel, Notifier};
use trendbot::persistence::{StateStore, TradeLedger};
use trendbot::risk::{CircuitBreakers, RiskConfig, RiskManager};
use trendbot::strategy::{SignalDecision, SignalEvaluator, WindowSet};
use trendbot::*;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct Book {
    price: f64,
    balances: HashMap<String, f64>,
    trades: Vec<AccountTrade>,
    buys: Vec<f64>,
    sells: Vec<f64>,
    failing_sells: u32,
    fail_buys: bool,
    /// Fill the next buys but answer with a timeout
    lost_buy_responses: u32,
    offline: bool,
    price_offline: bool,
}

struct MockBroker {
    book: Mutex<Book>,
}

impl MockBroker {
    fn new(price: f64) -> Arc<Self> {
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), 1000.0);
        balances.insert("XLM".to_string(), 0.0);
        Arc::new(Self {
            book: Mutex::new(Book {
                price,
                balances,
                ..Default::default()
            }),
        })
    }

    fn set_price(&self, price: f64) {
        self.book.lock().unwrap().price = price;
    }

    fn set_base_balance(&self, amount: f64) {
        self.book
            .lock()
            .unwrap()
            .balances
            .insert("XLM".to_string(), amount);
    }

    fn offline(&self) -> BotError {
        BotError::external("mock", "exchange unreachable", true)
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn get_balance(&self) -> Result<HashMap<String, f64>> {
        let book = self.book.lock().unwrap();
        if book.offline {
            return Err(self.offline());
        }
        Ok(book.balances.clone())
    }

    async fn get_last_trades(&self, _: &TradingPair, _: usize) -> Result<Vec<AccountTrade>> {
        Ok(self.book.lock().unwrap().trades.clone())
    }

    async fn place_market_buy(&self, _: &TradingPair, quote_amount: f64) -> Result<OrderResult> {
        let mut book = self.book.lock().unwrap();
        if book.fail_buys {
            return Err(BotError::external("place_market_buy", "HTTP 503", true));
        }
        let filled = quote_amount / book.price;
        let price = book.price;
        *book.balances.entry("XLM".to_string()).or_default() += filled;
        book.buys.push(quote_amount);
        book.trades.push(AccountTrade {
            side: TradeSide::Buy,
            price,
            quantity: filled,
            timestamp: Utc::now(),
        });
        if book.lost_buy_responses > 0 {
            book.lost_buy_responses -= 1;
            return Err(BotError::external("place_market_buy", "timed out", true));
        }
        Ok(OrderResult {
            order_id: format!("buy-{}", book.buys.len()),
            side: TradeSide::Buy,
            filled_base: filled,
            average_price: book.price,
            timestamp: Utc::now(),
        })
    }

    async fn place_market_sell(&self, _: &TradingPair, base_amount: f64) -> Result<OrderResult> {
        let mut book = self.book.lock().unwrap();
        if book.failing_sells > 0 {
            book.failing_sells -= 1;
            return Err(BotError::external("place_market_sell", "HTTP 503", true));
        }
        *book.balances.entry("XLM".to_string()).or_default() -= base_amount;
        book.sells.push(base_amount);
        Ok(OrderResult {
            order_id: format!("sell-{}", book.sells.len()),
            side: TradeSide::Sell,
            filled_base: base_amount,
            average_price: book.price,
            timestamp: Utc::now(),
        })
    }

    async fn get_current_price(&self, _: &TradingPair) -> Result<f64> {
        let book = self.book.lock().unwrap();
        if book.offline || book.price_offline {
            return Err(self.offline());
        }
        Ok(book.price)
    }
}

/// Replays a fixed sequence of entry signals, then repeats the last one
struct ScriptedEvaluator {
    entries: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
    exit: Mutex<bool>,
    fast: Mutex<Timeframe>,
}

impl ScriptedEvaluator {
    fn new(entries: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(entries.iter().copied().collect()),
            last: Mutex::new(false),
            exit: Mutex::new(false),
            fast: Mutex::new(Timeframe::Min15),
        })
    }

    fn set_exit(&self, fired: bool) {
        *self.exit.lock().unwrap() = fired;
    }

    /// Point the evaluator at a timeframe the buffer may not hold
    fn set_fast(&self, timeframe: Timeframe) {
        *self.fast.lock().unwrap() = timeframe;
    }
}

impl SignalEvaluator for ScriptedEvaluator {
    fn evaluate_entry(&self, _: &WindowSet) -> SignalDecision {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.entries.lock().unwrap().pop_front() {
            *last = next;
        }
        SignalDecision::new(*last, if *last { "ENTRY YES" } else { "ENTRY NO" })
    }

    fn evaluate_exit(&self, _: &[Candle]) -> SignalDecision {
        let fired = *self.exit.lock().unwrap();
        SignalDecision::new(fired, if fired { "EXIT YES" } else { "EXIT NO" })
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn fast_timeframe(&self) -> Timeframe {
        *self.fast.lock().unwrap()
    }

    fn required_windows(&self) -> Vec<(Timeframe, usize)> {
        vec![(self.fast_timeframe(), 20)]
    }
}

struct NoHistory;

#[async_trait]
impl MarketDataSource for NoHistory {
    async fn fetch_history(&self, _: &TradingPair, _: Timeframe, _: usize) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    fn titles(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.title.clone())
            .collect()
    }

    fn count(&self, level: AlertLevel) -> usize {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.level == level)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Open time of the live 15m candle in every fixture window
fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
}

/// 40 flat candles with a constant 0.02 range (ATR 0.02), last one still open
fn fixture_candles() -> Vec<Candle> {
    (0..40)
        .map(|i| Candle {
            open_time: t0() - Duration::minutes(15 * (39 - i)),
            open: 1.0,
            high: 1.01,
            low: 0.99,
            close: 1.0,
            volume: 1000.0,
            is_closed: i < 39,
        })
        .collect()
}

fn seeded_buffer() -> CandleBuffer {
    let buffer = CandleBuffer::new(500);
    buffer
        .merge_history(Timeframe::Min15, fixture_candles())
        .unwrap();
    buffer
}

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("trendbot_lifecycle_{}", uuid::Uuid::new_v4()))
}

fn pair() -> TradingPair {
    "XLM/USDT".parse().unwrap()
}

fn settings() -> EngineSettings {
    EngineSettings {
        pair: pair(),
        trade_amount_quote: 10.0,
        pending_timeout: Duration::seconds(1200),
        dust_threshold: 1.0,
        reconcile_ratio: 0.9,
        trade_lookback: 25,
        failure_alert_threshold: 3,
        call_timeout: std::time::Duration::from_secs(1),
        atr_period: 14,
    }
}

struct Harness {
    engine: PositionStateMachine,
    notifier: Arc<RecordingNotifier>,
    ledger: TradeLedger,
    dir: PathBuf,
}

fn build(
    dir: PathBuf,
    broker: Arc<MockBroker>,
    evaluator: Arc<ScriptedEvaluator>,
    breakers: CircuitBreakers,
) -> Harness {
    build_with_buffer(dir, broker, evaluator, breakers, seeded_buffer())
}

fn build_with_buffer(
    dir: PathBuf,
    broker: Arc<MockBroker>,
    evaluator: Arc<ScriptedEvaluator>,
    breakers: CircuitBreakers,
    buffer: CandleBuffer,
) -> Harness {
    let store = StateStore::new(&dir, "XLM/USDT").unwrap();
    let ledger = TradeLedger::new(&dir, "XLM/USDT").unwrap();
    let loaded = store.load().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());

    let parts = EngineParts {
        evaluator,
        risk: RiskManager::new(RiskConfig::default()),
        breakers,
        broker,
        market_data: Arc::new(NoHistory),
        buffer,
        store,
        ledger: ledger.clone(),
        notifier: notifier.clone(),
    };

    Harness {
        engine: PositionStateMachine::new(settings(), parts, loaded),
        notifier,
        ledger,
        dir,
    }
}

fn harness(broker: Arc<MockBroker>, evaluator: Arc<ScriptedEvaluator>) -> Harness {
    build(temp_dir(), broker, evaluator, CircuitBreakers::default())
}

fn assert_consistent(engine: &PositionStateMachine) {
    let state = engine.state();
    assert!(
        !(state.has_position() && state.pending_confirmation()),
        "open position with a pending entry: {:?}",
        state
    );
}

/// Drive FLAT -> PENDING_ENTRY -> OPEN at price 1.0
async fn open_position(h: &mut Harness) {
    let first = h.engine.tick_at(t0() + Duration::minutes(1)).await;
    assert_eq!(first.state, PositionPhase::PendingEntry);

    let second = h.engine.tick_at(t0() + Duration::minutes(16)).await;
    assert_eq!(second.state, PositionPhase::Open, "{:?}", second.transitions);
}

fn has(outcome: &TickOutcome, matcher: impl Fn(&Transition) -> bool) -> bool {
    outcome.transitions.iter().any(matcher)
}

// ============================================================================
// Entry edge + confirmation
// ============================================================================

#[tokio::test]
async fn test_pending_entry_only_on_rising_edge() {
    let _ = tracing_subscriber::fmt::try_init();

    let broker = MockBroker::new(1.0);
    let evaluator = ScriptedEvaluator::new(&[false, false, true, true, false, true]);
    let mut h = harness(broker.clone(), evaluator);

    let mut pending_ticks = Vec::new();
    let mut phases = Vec::new();
    for i in 0..6 {
        let outcome = h.engine.tick_at(t0() + Duration::seconds(10 * i)).await;
        if has(&outcome, |t| matches!(t, Transition::EnteredPending { .. })) {
            pending_ticks.push(i);
        }
        phases.push(outcome.state);
        assert_consistent(&h.engine);
    }

    assert_eq!(pending_ticks, vec![2, 5]);
    assert_eq!(
        phases,
        vec![
            PositionPhase::Flat,
            PositionPhase::Flat,
            PositionPhase::PendingEntry,
            PositionPhase::PendingEntry,
            PositionPhase::Flat,
            PositionPhase::PendingEntry,
        ]
    );
    // Candle never closed, so nothing was bought
    assert!(broker.book.lock().unwrap().buys.is_empty());
}

#[tokio::test]
async fn test_constant_signal_enters_pending_once() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker, ScriptedEvaluator::new(&[true; 5]));

    let mut entered = 0;
    for i in 0..5 {
        let outcome = h.engine.tick_at(t0() + Duration::seconds(30 * i)).await;
        entered += outcome
            .transitions
            .iter()
            .filter(|t| matches!(t, Transition::EnteredPending { .. }))
            .count();
    }
    assert_eq!(entered, 1);
    assert_eq!(h.engine.phase(), PositionPhase::PendingEntry);
}

#[tokio::test]
async fn test_confirmation_after_candle_close_opens_position() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[true]));

    let first = h.engine.tick_at(t0() + Duration::minutes(1)).await;
    assert!(has(&first, |t| *t
        == Transition::EnteredPending {
            candle_open_time: t0()
        }));

    // Still inside the signal candle
    let waiting = h.engine.tick_at(t0() + Duration::minutes(5)).await;
    assert_eq!(waiting.state, PositionPhase::PendingEntry);
    assert!(waiting.transitions.is_empty());

    let opened = h.engine.tick_at(t0() + Duration::minutes(16)).await;
    assert_eq!(opened.state, PositionPhase::Open);

    let position = h.engine.state().position.clone().unwrap();
    assert!((position.entry_price - 1.0).abs() < 1e-9);
    assert!((position.size - 10.0).abs() < 1e-9);
    assert!((position.sl_price - 0.97).abs() < 1e-6);
    assert!((position.tp_price - 1.06).abs() < 1e-6);
    assert!(h.engine.state().pending.is_none());
    assert_eq!(broker.book.lock().unwrap().buys, vec![10.0]);
    assert!(h.notifier.titles().iter().any(|t| t.contains("Position opened")));
}

#[tokio::test]
async fn test_pending_entry_expires() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[true]));
    // Keep the buy failing so the pending entry outlives its candle
    broker.book.lock().unwrap().fail_buys = true;

    h.engine.tick_at(t0() + Duration::minutes(1)).await;
    let failed = h.engine.tick_at(t0() + Duration::minutes(16)).await;
    assert_eq!(failed.state, PositionPhase::PendingEntry);
    assert!(has(&failed, |t| matches!(t, Transition::EntryFailed { .. })));

    let expired = h.engine.tick_at(t0() + Duration::minutes(22)).await;
    assert_eq!(expired.state, PositionPhase::Flat);
    assert!(has(&expired, |t| *t == Transition::PendingExpired));

    // The signal is still up: no new pending entry without a falling edge
    let later = h.engine.tick_at(t0() + Duration::minutes(23)).await;
    assert_eq!(later.state, PositionPhase::Flat);
}

#[tokio::test]
async fn test_unprofitable_entry_is_rejected() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[true]));

    h.engine.tick_at(t0() + Duration::minutes(1)).await;
    // ATR 0.02 * 3 at a price of 100 projects 0.06%, below round-trip costs
    broker.set_price(100.0);
    let outcome = h.engine.tick_at(t0() + Duration::minutes(16)).await;

    assert_eq!(outcome.state, PositionPhase::Flat);
    assert!(has(&outcome, |t| matches!(t, Transition::PendingRejected { .. })));
    assert!(broker.book.lock().unwrap().buys.is_empty());
}

#[tokio::test]
async fn test_entry_sized_from_backfilled_window() {
    let clean = fixture_candles();
    let buffer = CandleBuffer::new(500);
    for candle in &clean[..31] {
        buffer.upsert(Timeframe::Min15, candle.clone()).unwrap();
    }
    // Feed drops mid-candle, then resumes at the live bar
    let mut stale = clean[31].clone();
    stale.high = 1.5;
    stale.low = 0.5;
    stale.is_closed = false;
    buffer.upsert(Timeframe::Min15, stale).unwrap();
    buffer
        .upsert(Timeframe::Min15, clean[39].clone())
        .unwrap();
    buffer.merge_history(Timeframe::Min15, clean).unwrap();

    let broker = MockBroker::new(1.0);
    let mut h = build_with_buffer(
        temp_dir(),
        broker.clone(),
        ScriptedEvaluator::new(&[true]),
        CircuitBreakers::default(),
        buffer,
    );
    open_position(&mut h).await;

    let position = h.engine.state().position.clone().unwrap();
    assert!((position.sl_price - 0.97).abs() < 1e-6);
    assert!((position.tp_price - 1.06).abs() < 1e-6);
    assert_eq!(broker.book.lock().unwrap().buys, vec![10.0]);
}

#[tokio::test]
async fn test_loss_cooldown_blocks_new_entries() {
    let broker = MockBroker::new(1.0);
    let evaluator = ScriptedEvaluator::new(&[true]);
    let breakers = CircuitBreakers {
        loss_cooldown_secs: 3600,
    };
    let mut h = build(temp_dir(), broker.clone(), evaluator.clone(), breakers);

    open_position(&mut h).await;
    broker.set_price(0.96);
    let closed = h.engine.tick_at(t0() + Duration::minutes(17)).await;
    assert!(has(&closed, |t| matches!(
        t,
        Transition::Closed {
            reason: ExitReason::StopLoss,
            ..
        }
    )));
    assert!(h.engine.state().last_realized_loss_time.is_some());

    // Fresh rising edge inside the cooldown
    *evaluator.last.lock().unwrap() = false;
    evaluator.entries.lock().unwrap().extend([false, true]);
    broker.set_price(1.0);
    h.engine.tick_at(t0() + Duration::minutes(18)).await;
    let blocked = h.engine.tick_at(t0() + Duration::minutes(19)).await;
    assert_eq!(blocked.state, PositionPhase::Flat);
}

// ============================================================================
// OPEN: trailing, exits, retries
// ============================================================================

#[tokio::test]
async fn test_trailing_stop_exit_records_trade() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[true]));
    open_position(&mut h).await;

    broker.set_price(1.07);
    let activated = h.engine.tick_at(t0() + Duration::minutes(17)).await;
    assert_eq!(activated.state, PositionPhase::Open);
    let stop = activated
        .transitions
        .iter()
        .find_map(|t| match t {
            Transition::TrailingActivated { stop } => Some(*stop),
            _ => None,
        })
        .unwrap();
    assert!((stop - 1.05).abs() < 1e-6);

    broker.set_price(1.04);
    let closed = h.engine.tick_at(t0() + Duration::minutes(18)).await;
    assert_eq!(closed.state, PositionPhase::Flat);
    assert!(has(&closed, |t| matches!(
        t,
        Transition::Closed {
            reason: ExitReason::TrailingStop,
            ..
        }
    )));

    let trades = h.ledger.load_all().unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].reason, ExitReason::TrailingStop);
    assert!((trades[0].pnl_percent - 4.0).abs() < 1e-6);
    assert!(h.engine.state().last_realized_loss_time.is_none());
}

#[tokio::test]
async fn test_signal_exit_sells_full_position() {
    let broker = MockBroker::new(1.0);
    let evaluator = ScriptedEvaluator::new(&[true]);
    let mut h = harness(broker.clone(), evaluator.clone());
    open_position(&mut h).await;

    evaluator.set_exit(true);
    let closed = h.engine.tick_at(t0() + Duration::minutes(17)).await;
    assert!(has(&closed, |t| matches!(
        t,
        Transition::Closed {
            reason: ExitReason::Signal,
            ..
        }
    )));
    let sells = broker.book.lock().unwrap().sells.clone();
    assert_eq!(sells.len(), 1);
    assert!((sells[0] - 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_failed_sell_keeps_position_and_retries() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[true]));
    open_position(&mut h).await;

    broker.book.lock().unwrap().failing_sells = 2;
    broker.set_price(0.96);

    let first = h.engine.tick_at(t0() + Duration::minutes(17)).await;
    assert_eq!(first.state, PositionPhase::Open);
    assert_eq!(h.engine.pending_exit(), Some(ExitReason::StopLoss));

    // Price recovers, the remembered exit is still executed
    broker.set_price(1.0);
    let second = h.engine.tick_at(t0() + Duration::minutes(18)).await;
    assert_eq!(second.state, PositionPhase::Open);
    let third = h.engine.tick_at(t0() + Duration::minutes(19)).await;
    assert_eq!(third.state, PositionPhase::Flat);
    assert!(has(&third, |t| matches!(
        t,
        Transition::Closed {
            reason: ExitReason::StopLoss,
            ..
        }
    )));
    assert_eq!(h.engine.pending_exit(), None);

    let sell_alerts = h
        .notifier
        .titles()
        .iter()
        .filter(|t| t.contains("Exit sell failed"))
        .count();
    assert_eq!(sell_alerts, 1);
}

#[tokio::test]
async fn test_pending_sell_retried_without_price() {
    let broker = MockBroker::new(1.0);
    let evaluator = ScriptedEvaluator::new(&[true]);
    let mut h = harness(broker.clone(), evaluator.clone());
    open_position(&mut h).await;

    // No quote and no live candle: nothing to check against
    broker.book.lock().unwrap().price_offline = true;
    evaluator.set_fast(Timeframe::Hour1);
    let blind = h.engine.tick_at(t0() + Duration::minutes(17)).await;
    assert_eq!(blind.state, PositionPhase::Open);
    assert!(blind.transitions.is_empty());

    broker.book.lock().unwrap().price_offline = false;
    evaluator.set_fast(Timeframe::Min15);
    broker.book.lock().unwrap().failing_sells = 1;
    broker.set_price(0.96);
    let failed = h.engine.tick_at(t0() + Duration::minutes(18)).await;
    assert!(has(&failed, |t| matches!(t, Transition::ExitFailed { .. })));
    assert_eq!(h.engine.pending_exit(), Some(ExitReason::StopLoss));

    broker.book.lock().unwrap().price_offline = true;
    evaluator.set_fast(Timeframe::Hour1);
    let retried = h.engine.tick_at(t0() + Duration::minutes(19)).await;
    assert_eq!(retried.state, PositionPhase::Flat);
    assert!(has(&retried, |t| matches!(
        t,
        Transition::Closed {
            reason: ExitReason::StopLoss,
            ..
        }
    )));
    assert_eq!(broker.book.lock().unwrap().sells.len(), 1);
    assert_eq!(h.ledger.load_all().unwrap().len(), 1);
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_external_close_clears_position_without_trade() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[true]));
    open_position(&mut h).await;

    // 10 XLM recorded, 8.5 left is below the 0.9 ratio
    broker.set_base_balance(8.5);
    let outcome = h.engine.tick_at(t0() + Duration::minutes(17)).await;

    assert_eq!(outcome.state, PositionPhase::Flat);
    assert!(has(&outcome, |t| matches!(t, Transition::ForcedFlat { .. })));
    assert!(h.ledger.load_all().unwrap().is_empty());
    assert!(broker.book.lock().unwrap().sells.is_empty());
    assert!(h.notifier.titles().iter().any(|t| t.contains("closed externally")));
}

#[tokio::test]
async fn test_fee_sized_shortfall_is_not_a_mismatch() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[true]));
    open_position(&mut h).await;

    broker.set_base_balance(9.99);
    let outcome = h.engine.tick_at(t0() + Duration::minutes(17)).await;
    assert_eq!(outcome.state, PositionPhase::Open);
}

#[tokio::test]
async fn test_holdings_rebuild_position_from_last_buy() {
    let broker = MockBroker::new(1.0);
    broker.set_base_balance(50.0);
    broker.book.lock().unwrap().trades = vec![AccountTrade {
        side: TradeSide::Buy,
        price: 0.95,
        quantity: 50.0,
        timestamp: t0() - Duration::hours(2),
    }];
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[false]));

    let outcome = h.engine.tick_at(t0() + Duration::minutes(1)).await;
    assert_eq!(outcome.state, PositionPhase::Open);
    assert!(has(&outcome, |t| *t
        == Transition::Reconstructed {
            entry_price: 0.95,
            size: 50.0,
            approximated: false
        }));

    let position = h.engine.state().position.clone().unwrap();
    assert_eq!(position.entry_time, t0() - Duration::hours(2));
    assert!(!position.entry_approximated);
    assert!((position.sl_price - 0.92).abs() < 1e-6);
}

#[tokio::test]
async fn test_holdings_without_buy_history_use_current_price() {
    let broker = MockBroker::new(1.0);
    broker.set_base_balance(50.0);
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[false]));

    let outcome = h.engine.tick_at(t0() + Duration::minutes(1)).await;
    assert!(has(&outcome, |t| *t
        == Transition::Reconstructed {
            entry_price: 1.0,
            size: 50.0,
            approximated: true
        }));
    assert!(h.engine.state().position.as_ref().unwrap().entry_approximated);
    assert_consistent(&h.engine);
}

#[tokio::test]
async fn test_buy_without_response_is_not_repeated() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[true]));

    h.engine.tick_at(t0() + Duration::minutes(1)).await;
    broker.book.lock().unwrap().lost_buy_responses = 1;
    let lost = h.engine.tick_at(t0() + Duration::minutes(16)).await;
    assert_eq!(lost.state, PositionPhase::PendingEntry);
    assert!(has(&lost, |t| matches!(t, Transition::EntryFailed { .. })));

    // Balance unknown: the filled order cannot be seen, so no second buy
    broker.book.lock().unwrap().offline = true;
    let blind = h.engine.tick_at(t0() + Duration::minutes(17)).await;
    assert_eq!(blind.state, PositionPhase::PendingEntry);
    assert!(!has(&blind, |t| matches!(t, Transition::Opened { .. })));
    assert_eq!(broker.book.lock().unwrap().buys.len(), 1);

    broker.book.lock().unwrap().offline = false;
    let synced = h.engine.tick_at(t0() + Duration::minutes(18)).await;
    assert_eq!(synced.state, PositionPhase::Open);
    assert!(has(&synced, |t| *t
        == Transition::Reconstructed {
            entry_price: 1.0,
            size: 10.0,
            approximated: false
        }));
    assert!(!has(&synced, |t| matches!(t, Transition::Opened { .. })));
    assert_consistent(&h.engine);

    let book = broker.book.lock().unwrap();
    assert_eq!(book.buys, vec![10.0]);
    assert_eq!(book.balances["XLM"], 10.0);
    assert_eq!(h.engine.state().position.as_ref().unwrap().size, 10.0);
}

#[tokio::test]
async fn test_dust_is_ignored() {
    let broker = MockBroker::new(1.0);
    broker.set_base_balance(0.4);
    let mut h = harness(broker, ScriptedEvaluator::new(&[false]));

    let outcome = h.engine.tick_at(t0() + Duration::minutes(1)).await;
    assert_eq!(outcome.state, PositionPhase::Flat);
    assert!(outcome.transitions.is_empty());
}

// ============================================================================
// Persistence + failures
// ============================================================================

#[tokio::test]
async fn test_open_position_survives_restart() {
    let broker = MockBroker::new(1.0);
    let dir = temp_dir();
    let mut h = build(
        dir.clone(),
        broker.clone(),
        ScriptedEvaluator::new(&[true]),
        CircuitBreakers::default(),
    );
    open_position(&mut h).await;
    let before = h.engine.state().clone();
    drop(h);

    let mut restarted = build(
        dir,
        broker.clone(),
        ScriptedEvaluator::new(&[false]),
        CircuitBreakers::default(),
    );
    assert_eq!(restarted.engine.state().position, before.position);
    assert_eq!(restarted.engine.phase(), PositionPhase::Open);

    let outcome = restarted.engine.tick_at(t0() + Duration::minutes(17)).await;
    assert_eq!(outcome.state, PositionPhase::Open);
    assert!(outcome.transitions.is_empty());
    assert_eq!(broker.book.lock().unwrap().buys.len(), 1);
}

#[tokio::test]
async fn test_corrupt_state_forces_flat_with_alert() {
    let dir = temp_dir();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("state_XLMUSDT.json"),
        r#"{"symbol":"XLM/USDT","has_position":true,"position":{"entry_price":1.0}}"#,
    )
    .unwrap();

    let mut h = build(
        dir,
        MockBroker::new(1.0),
        ScriptedEvaluator::new(&[false]),
        CircuitBreakers::default(),
    );
    let outcome = h.engine.tick_at(t0() + Duration::minutes(1)).await;

    assert_eq!(outcome.state, PositionPhase::Flat);
    assert!(has(&outcome, |t| matches!(t, Transition::ForcedFlat { .. })));
    assert_eq!(h.notifier.count(AlertLevel::Critical), 1);

    // The reset is persisted
    let reloaded = tokio_test::assert_ok!(StateStore::new(&h.dir, "XLM/USDT").unwrap().load());
    assert!(reloaded.corruption.is_none());
    assert!(!reloaded.state.has_position());
}

#[tokio::test]
async fn test_failure_streak_alerts_once_and_recovers() {
    let broker = MockBroker::new(1.0);
    broker.book.lock().unwrap().offline = true;
    let mut h = harness(broker.clone(), ScriptedEvaluator::new(&[false]));

    for i in 0..5 {
        h.engine.tick_at(t0() + Duration::seconds(10 * i)).await;
    }
    assert_eq!(h.engine.failure_streak(), 5);
    let streak_alerts = h
        .notifier
        .titles()
        .iter()
        .filter(|t| t.contains("consecutive failed ticks"))
        .count();
    assert_eq!(streak_alerts, 1);

    broker.book.lock().unwrap().offline = false;
    h.engine.tick_at(t0() + Duration::seconds(60)).await;
    assert_eq!(h.engine.failure_streak(), 0);
    assert!(h.notifier.titles().iter().any(|t| t == "Recovered"));
}

#[tokio::test]
async fn test_status_snapshot_follows_ticks() {
    let broker = MockBroker::new(1.0);
    let mut h = harness(broker, ScriptedEvaluator::new(&[true]));
    let status = h.engine.subscribe();

    open_position(&mut h).await;

    let snapshot = status.borrow().clone();
    assert_eq!(snapshot.symbol, "XLM/USDT");
    assert_eq!(snapshot.phase, PositionPhase::Open);
    assert_eq!(snapshot.last_price, Some(1.0));
    assert!(snapshot.position.is_some());
    assert_eq!(snapshot.failure_streak, 0);
    assert!(!snapshot.stream_connected);
}
