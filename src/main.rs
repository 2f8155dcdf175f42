//! MULTISCAN: multi-timeframe technical signal scanner
//!
//! Entry point. Loads and validates configuration, initialises structured
//! logging, wires the exchange clients, runs one scan and delivers the
//! report.

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use multiscan::config::{self, UniverseKind};
use multiscan::engine::run_and_deliver;
use multiscan::engine::scanner::ScanOrchestrator;
use multiscan::notify::telegram::TelegramNotifier;
use multiscan::notify::{LogNotifier, Notifier};
use multiscan::sources::binance::{self, BinanceSource};
use multiscan::sources::bybit::{self, BybitSource};
use multiscan::sources::market::CoinGeckoOverview;
use multiscan::sources::mexc::{self, MexcSource};
use multiscan::sources::universe::{CoinGeckoUniverse, ListingSource, StaticUniverse};
use multiscan::sources::{SourceRouter, SymbolUniverseProvider};

const DEFAULT_CONFIG: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = config::AppConfig::load(&path)?;

    init_logging(&cfg);

    // Invalid thresholds are fatal before any fetch.
    cfg.validate()?;

    info!(
        config = %path,
        universe_size = cfg.scan.universe_size,
        timeframes = ?cfg.scan.timeframes,
        workers = cfg.scan.worker_count,
        "MULTISCAN starting up"
    );

    // -- Initialise components -------------------------------------------

    let http_timeout = Duration::from_secs(cfg.sources.http_timeout_secs);
    let (router, listings) = build_sources(&cfg, http_timeout)?;
    let universe = build_universe(&cfg, listings, http_timeout)?;
    let notifier = build_notifier(&cfg, http_timeout)?;

    let mut orchestrator = ScanOrchestrator::from_config(&cfg, universe, router);
    if cfg.market.overview {
        orchestrator = orchestrator.with_overview(Arc::new(CoinGeckoOverview::new(
            &cfg.sources.coingecko_url,
            &cfg.sources.binance_url,
            http_timeout,
        )?));
    }

    // -- Scan and deliver ------------------------------------------------

    let delivery = run_and_deliver(&orchestrator, notifier.as_ref()).await;
    info!(
        scanned = delivery.run.is_some(),
        delivered = delivery.delivered,
        "Scan cycle complete"
    );

    info!("MULTISCAN shut down.");
    Ok(())
}

/// Register enabled exchanges as candle sources and, in the same
/// priority order, as listing sources for universe resolution.
fn build_sources(
    cfg: &config::AppConfig,
    timeout: Duration,
) -> Result<(SourceRouter, Vec<Arc<dyn ListingSource>>)> {
    let mut router = SourceRouter::new();
    let mut listings: Vec<Arc<dyn ListingSource>> = Vec::new();

    for id in &cfg.sources.enabled {
        match id.as_str() {
            binance::SOURCE_ID => {
                let src = Arc::new(BinanceSource::new(&cfg.sources.binance_url, timeout)?);
                router.register(binance::SOURCE_ID, src.clone());
                listings.push(src);
            }
            mexc::SOURCE_ID => {
                let src = Arc::new(MexcSource::new(&cfg.sources.mexc_url, timeout)?);
                router.register(mexc::SOURCE_ID, src.clone());
                listings.push(src);
            }
            bybit::SOURCE_ID => {
                let src = Arc::new(BybitSource::new(&cfg.sources.bybit_url, timeout)?);
                router.register(bybit::SOURCE_ID, src.clone());
                listings.push(src);
            }
            other => warn!(source = other, "Unknown source in config, ignoring"),
        }
    }

    info!(sources = ?router.ids(), "Candle sources registered");
    Ok((router, listings))
}

fn build_universe(
    cfg: &config::AppConfig,
    listings: Vec<Arc<dyn ListingSource>>,
    timeout: Duration,
) -> Result<Arc<dyn SymbolUniverseProvider>> {
    Ok(match cfg.universe.provider {
        UniverseKind::Static => Arc::new(StaticUniverse::new(cfg.universe.symbols.clone())),
        UniverseKind::Coingecko => Arc::new(CoinGeckoUniverse::new(
            &cfg.sources.coingecko_url,
            timeout,
            listings,
        )?),
    })
}

/// Telegram when both credentials resolve, otherwise the log.
fn build_notifier(cfg: &config::AppConfig, timeout: Duration) -> Result<Box<dyn Notifier>> {
    let token = cfg
        .alerts
        .telegram_bot_token_env
        .as_deref()
        .and_then(|env| config::AppConfig::resolve_env(env).ok());
    let chat_id = cfg
        .alerts
        .telegram_chat_id_env
        .as_deref()
        .and_then(|env| config::AppConfig::resolve_env(env).ok());

    match (token, chat_id) {
        (Some(token), Some(chat_id)) => {
            info!("Telegram notifier enabled");
            Ok(Box::new(TelegramNotifier::new(
                SecretString::new(token),
                chat_id,
                timeout,
            )?))
        }
        _ => {
            warn!("Telegram credentials not configured, report goes to the log");
            Ok(Box::new(LogNotifier))
        }
    }
}

fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.filter));

    if cfg.logging.json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
