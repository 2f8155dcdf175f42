//! End-to-end scan: config → orchestrator → aggregator → report → notifier.

use std::sync::Arc;

use multiscan::config::AppConfig;
use multiscan::engine::scanner::ScanOrchestrator;
use multiscan::engine::{report, run_and_deliver};
use multiscan::sources::universe::StaticUniverse;
use multiscan::sources::SourceRouter;
use multiscan::types::*;

use crate::mock_sources::*;

const CONFIG: &str = r#"
    [scan]
    universe_size = 50
    timeframes = ["15m", "1h"]
    bar_limit = 150
    warmup_bars = 80
    worker_count = 3
    fetch_retry_count = 3
    fetch_retry_delay_ms = 1
    fetch_timeout_secs = 5
    run_deadline_secs = 30
    top_k_per_side = 10

    [rules]
    min_turnover = 100000.0

    [universe]
    provider = "static"
    symbols = [
        { symbol = "AAAUSDT", source = "binance" },
        { symbol = "BBBUSDT", source = "binance" },
        { symbol = "CCCUSDT", source = "binance" },
        { symbol = "DDDUSDT", source = "binance" },
        { symbol = "EEEUSDT", source = "binance" },
        { symbol = "FFFUSDT", source = "binance" },
        { symbol = "GGGUSDT", source = "mexc" },
    ]
"#;

fn config() -> AppConfig {
    let cfg = AppConfig::parse(CONFIG).unwrap();
    cfg.validate().unwrap();
    cfg
}

fn source() -> ScriptedSource {
    ScriptedSource::new()
        .with_series("AAAUSDT", uptrend())
        .with_series("BBBUSDT", downtrend())
        .with_series("CCCUSDT", flat())
        .with_series("DDDUSDT", series(120, 0.4, 10_000.0, 2.5))
        .with_flaky("EEEUSDT", 2, uptrend())
        .with_error("FFFUSDT", FetchError::MalformedResponse("unexpected token".into()))
}

fn orchestrator(cfg: &AppConfig, source: &ScriptedSource) -> ScanOrchestrator {
    // "mexc" is deliberately not registered.
    let router = SourceRouter::new().with("binance", Arc::new(source.clone()));
    let universe = Arc::new(StaticUniverse::new(cfg.universe.symbols.clone()));
    ScanOrchestrator::from_config(cfg, universe, router)
}

#[tokio::test]
async fn test_full_scan_classifies_and_counts() {
    let cfg = config();
    let src = source();
    let run = orchestrator(&cfg, &src).run().await.unwrap();

    assert_eq!(run.universe_size, 7);
    assert_eq!(run.task_count, 14);

    let buys: Vec<(&str, Timeframe)> =
        run.buys.iter().map(|r| (r.symbol.as_str(), r.timeframe)).collect();
    assert_eq!(
        buys,
        vec![
            ("AAAUSDT", Timeframe::M15),
            ("AAAUSDT", Timeframe::H1),
            ("EEEUSDT", Timeframe::M15),
            ("EEEUSDT", Timeframe::H1),
        ]
    );
    assert_eq!(run.sells.len(), 2);
    assert!(run.sells.iter().all(|r| r.symbol == "BBBUSDT"));
    assert!(run
        .buys
        .iter()
        .chain(&run.sells)
        .all(|r| matches!(r.confidence, Some(c) if (0.0..=100.0).contains(&c))));

    let count = |r: RejectionReason| run.rejection_counts.get(&r).copied().unwrap_or(0);
    assert_eq!(count(RejectionReason::NoTrend), 2);
    assert_eq!(count(RejectionReason::LowLiquidity), 2);
    assert_eq!(count(RejectionReason::BadResponse), 2);
    assert_eq!(count(RejectionReason::UnknownSource), 2);
    assert_eq!(count(RejectionReason::TransientFetchError), 0);
    assert_eq!(run.rejected_total(), 8);

    // Flaky symbol: two failures absorbed by retries, one success per timeframe.
    assert_eq!(src.calls("EEEUSDT"), 4);
    // Malformed responses are not retried.
    assert_eq!(src.calls("FFFUSDT"), 2);
    assert_eq!(src.calls("GGGUSDT"), 0);
}

#[tokio::test]
async fn test_report_delivered() {
    let cfg = config();
    let notifier = RecordingNotifier::new();
    let delivery = run_and_deliver(&orchestrator(&cfg, &source()), &notifier).await;

    assert!(delivery.delivered);
    assert_eq!(delivery.run.map(|r| r.signal_count()), Some(6));
    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    let text = &messages[0];
    assert!(text.contains("*BUY*"));
    assert!(text.contains("*SELL*"));
    assert!(text.contains("`AAAUSDT` (binance) 15m"));
    assert!(text.contains("Signals: BUY 4 | SELL 2 | tasks 14"));
    assert!(text.contains("bad_response=2"));
    assert!(text.contains("unknown_source=2"));
    assert!(!text.contains("Market:"));
}

#[tokio::test]
async fn test_confirmation_and_market_header() {
    let mut cfg = AppConfig::parse(&format!(
        "{CONFIG}
    [confirmation]
    source = \"binance\"
    symbols = [\"BTCUSDT\", \"ETHUSDT\"]
    timeframes = [\"1h\", \"4h\"]
    gate_symbol = \"BTCUSDT\"
    gate_timeframe = \"4h\"
"
    ))
    .unwrap();
    cfg.validate().unwrap();
    cfg.scan.timeframes = vec![Timeframe::H1];

    // BTC falling gates BUY off; ETH has no script and reads as unavailable.
    let src = source().with_series("BTCUSDT", downtrend());
    let orch = orchestrator(&cfg, &src).with_overview(Arc::new(FixedOverview(Some(
        MarketOverview {
            total_cap_change_pct: -2.0,
            btc_dominance_pct: 55.0,
            usdt_dominance_pct: 7.4,
            btc_change_pct: Some(-1.0),
        },
    ))));
    let notifier = RecordingNotifier::new();
    let run = run_and_deliver(&orch, &notifier).await.run.unwrap();

    assert_eq!(src.calls("BTCUSDT"), 2);
    assert_eq!(src.calls("ETHUSDT"), 2);
    assert!(run.buys.is_empty());
    assert_eq!(run.sells.len(), 1);
    assert_eq!(run.gate.as_ref().map(|g| g.state), Some(MarketState::Weak));

    let text = &notifier.messages()[0];
    assert!(text.contains(
        "Trend: BTCUSDT 1h WEAK | BTCUSDT 4h WEAK | ETHUSDT 1h UNAVAILABLE | ETHUSDT 4h UNAVAILABLE"
    ));
    assert!(text.contains("Gate: BTCUSDT 4h WEAK (BUY off | SELL on)"));
    assert!(text.contains("Market: BTC ↓ + BTC.D ↑ (BTC.D 55.0%) | Total: -2.0% | Total2: ↓ | USDT.D: 7.4% (risk-off)"));
}

#[tokio::test]
async fn test_market_overview_failure_keeps_report() {
    let cfg = config();
    let orch = orchestrator(&cfg, &source()).with_overview(Arc::new(FixedOverview(None)));
    let notifier = RecordingNotifier::new();
    let delivery = run_and_deliver(&orch, &notifier).await;

    assert!(delivery.delivered);
    assert_eq!(delivery.run.map(|r| r.buys.len()), Some(4));
    let text = &notifier.messages()[0];
    assert!(text.contains("Market: data unavailable"));
    assert!(text.contains("Signals: BUY 4 | SELL 2 | tasks 14"));
}

#[tokio::test]
async fn test_best_per_symbol_mode() {
    let mut cfg = config();
    cfg.scan.dedup = multiscan::engine::aggregator::DedupMode::BestPerSymbol;
    let run = orchestrator(&cfg, &source()).run().await.unwrap();

    let symbols: Vec<&str> = run.buys.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAAUSDT", "EEEUSDT"]);
    assert_eq!(run.sells.len(), 1);
}

#[tokio::test]
async fn test_repeated_scans_are_identical() {
    let cfg = config();
    let a = orchestrator(&cfg, &source()).run().await.unwrap();
    let b = orchestrator(&cfg, &source()).run().await.unwrap();

    assert_eq!(a.buys, b.buys);
    assert_eq!(a.sells, b.sells);
    assert_eq!(a.rejection_counts, b.rejection_counts);
    assert_ne!(a.run_id, b.run_id);
}

#[tokio::test]
async fn test_quiet_market_reports_no_signals() {
    let cfg = config();
    let src = cfg
        .universe
        .symbols
        .iter()
        .fold(ScriptedSource::new(), |s, e| s.with_series(&e.symbol, flat()));
    let run = orchestrator(&cfg, &src).run().await.unwrap();

    assert_eq!(run.signal_count(), 0);
    let text = report::render(&run);
    assert!(text.contains("No signals this run."));
    assert!(text.contains("no_trend=12"));
}

#[tokio::test]
async fn test_universe_unavailable_is_reported() {
    let cfg = config();
    let router = SourceRouter::new().with("binance", Arc::new(source()));
    let orch = ScanOrchestrator::from_config(&cfg, Arc::new(DownUniverse), router);

    let notifier = RecordingNotifier::new();
    let delivery = run_and_deliver(&orch, &notifier).await;

    assert!(delivery.run.is_none());
    assert!(delivery.delivered);
    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("universe unavailable"));
    assert!(messages[0].contains("no provider responded"));
}

#[tokio::test]
async fn test_notifier_failure_still_completes() {
    let cfg = config();
    let notifier = RecordingNotifier::failing();
    let delivery = run_and_deliver(&orchestrator(&cfg, &source()), &notifier).await;

    assert!(!delivery.delivered);
    let run = delivery.run.unwrap();
    assert_eq!(run.signal_count(), 6);
    assert_eq!(notifier.messages().len(), 1);
}

#[tokio::test]
async fn test_notifier_failure_on_universe_notice() {
    let cfg = config();
    let router = SourceRouter::new().with("binance", Arc::new(source()));
    let orch = ScanOrchestrator::from_config(&cfg, Arc::new(DownUniverse), router);

    let notifier = RecordingNotifier::failing();
    let delivery = run_and_deliver(&orch, &notifier).await;

    assert!(delivery.run.is_none());
    assert!(!delivery.delivered);
    assert!(notifier.messages()[0].contains("no provider responded"));
}

#[test]
fn test_shipped_config_is_valid() {
    let cfg = AppConfig::load("config.toml").unwrap();
    cfg.validate().unwrap();
    assert!(cfg.confirmation.is_some());
}
