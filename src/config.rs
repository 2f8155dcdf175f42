//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. The
//! resulting [`AppConfig`] is built once at startup, validated once, and
//! passed explicitly to every component. Secrets (the Telegram token) are
//! referenced by env-var name in the config and resolved by the binary.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tracing::warn;

use crate::engine::aggregator::DedupMode;
use crate::engine::scanner::RetryBackoff;
use crate::indicators::{self, ClusterParams, IndicatorParams};
use crate::sources::MAX_BAR_LIMIT;
use crate::strategy::confidence::ScoringConfig;
use crate::strategy::rules::{RuleSet, SideRules};
use crate::types::{ScanError, SymbolEntry, Timeframe};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub indicators: IndicatorParams,
    #[serde(default)]
    pub rules: RuleSet,
    /// Sustained-volume confirmation; disabled when absent.
    #[serde(default)]
    pub cluster: Option<ClusterParams>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Reference trend states and the scan-wide gate; disabled when absent.
    #[serde(default)]
    pub confirmation: Option<ConfirmationConfig>,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub universe: UniverseConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum number of symbols taken from the universe provider.
    pub universe_size: usize,
    pub timeframes: Vec<Timeframe>,
    /// Bars requested per fetch.
    pub bar_limit: usize,
    pub warmup_bars: usize,
    /// Concurrent fetch+evaluate tasks.
    pub worker_count: usize,
    /// Retries after the first failed attempt.
    pub fetch_retry_count: u32,
    pub fetch_retry_delay_ms: u64,
    pub retry_backoff: RetryBackoff,
    pub fetch_timeout_secs: u64,
    pub run_deadline_secs: u64,
    pub top_k_per_side: usize,
    pub dedup: DedupMode,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            universe_size: 200,
            timeframes: vec![Timeframe::M15, Timeframe::H1],
            bar_limit: 200,
            warmup_bars: 80,
            worker_count: 10,
            fetch_retry_count: 3,
            fetch_retry_delay_ms: 350,
            retry_backoff: RetryBackoff::Linear,
            fetch_timeout_secs: 10,
            run_deadline_secs: 600,
            top_k_per_side: 20,
            dedup: DedupMode::PerTimeframe,
        }
    }
}

impl ScanConfig {
    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }
}

/// Reference symbols whose trend states are computed once per scan.
/// Every symbol is evaluated on every timeframe; the `gate_symbol` /
/// `gate_timeframe` pair gates BUY/SELL for the whole scan.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ConfirmationConfig {
    pub source: String,
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub gate_symbol: String,
    pub gate_timeframe: Timeframe,
}

impl ConfirmationConfig {
    /// Reference pairs in report order: symbol-major, timeframes as listed.
    pub fn pairs(&self) -> Vec<(String, Timeframe)> {
        self.symbols
            .iter()
            .flat_map(|s| self.timeframes.iter().map(move |tf| (s.clone(), *tf)))
            .collect()
    }

    pub fn is_gate(&self, symbol: &str, timeframe: Timeframe) -> bool {
        symbol == self.gate_symbol && timeframe == self.gate_timeframe
    }
}

/// Market-wide header figures (CoinGecko global stats).
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MarketConfig {
    pub overview: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UniverseKind {
    /// The `symbols` list below, in order.
    #[default]
    Static,
    /// Top coins by market cap resolved against exchange listings.
    Coingecko,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UniverseConfig {
    pub provider: UniverseKind,
    pub symbols: Vec<SymbolEntry>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    /// Candle sources to register, also the CoinGecko routing priority.
    pub enabled: Vec<String>,
    pub binance_url: String,
    pub mexc_url: String,
    pub bybit_url: String,
    pub coingecko_url: String,
    pub http_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["mexc".to_string(), "binance".to_string(), "bybit".to_string()],
            binance_url: "https://api.binance.com".to_string(),
            mexc_url: "https://api.mexc.com".to_string(),
            bybit_url: "https://api.bybit.com".to_string(),
            coingecko_url: "https://api.coingecko.com/api/v3".to_string(),
            http_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "multiscan=info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Reject threshold combinations that cannot produce a meaningful
    /// scan. Runs before any fetch.
    pub fn validate(&self) -> Result<(), ScanError> {
        let scan = &self.scan;
        let invalid = |msg: String| Err(ScanError::Config(msg));

        if scan.timeframes.is_empty() {
            return invalid("scan.timeframes must not be empty".into());
        }
        if scan.universe_size == 0 {
            return invalid("scan.universe_size must be positive".into());
        }
        if scan.worker_count == 0 {
            return invalid("scan.worker_count must be positive".into());
        }
        if scan.top_k_per_side == 0 {
            return invalid("scan.top_k_per_side must be positive".into());
        }
        if scan.fetch_timeout_secs == 0 || scan.run_deadline_secs == 0 {
            return invalid("scan timeouts must be positive".into());
        }

        let ind = &self.indicators;
        if [ind.ema_fast, ind.ema_slow, ind.rsi_period, ind.adx_period, ind.volume_ema_span]
            .contains(&0)
        {
            return invalid("indicator periods must be positive".into());
        }
        if ind.ema_fast >= ind.ema_slow {
            return invalid(format!(
                "indicators.ema_fast ({}) must be shorter than ema_slow ({})",
                ind.ema_fast, ind.ema_slow
            ));
        }

        let required = indicators::required_warmup(ind, self.cluster.as_ref());
        if scan.warmup_bars < required {
            return invalid(format!(
                "scan.warmup_bars ({}) below indicator requirement ({required})",
                scan.warmup_bars
            ));
        }
        if scan.bar_limit < scan.warmup_bars {
            return invalid(format!(
                "scan.bar_limit ({}) below warmup_bars ({})",
                scan.bar_limit, scan.warmup_bars
            ));
        }
        if scan.bar_limit > MAX_BAR_LIMIT {
            return invalid(format!(
                "scan.bar_limit ({}) above the exchange cap of {MAX_BAR_LIMIT} bars",
                scan.bar_limit
            ));
        }

        validate_side("buy", &self.rules.buy)?;
        validate_side("sell", &self.rules.sell)?;
        if self.rules.min_turnover < 0.0 {
            return invalid("rules.min_turnover must not be negative".into());
        }
        for (label, floor) in &self.rules.min_turnover_per_timeframe {
            if label.parse::<Timeframe>().is_err() {
                return invalid(format!("rules.min_turnover_per_timeframe: unknown timeframe {label}"));
            }
            if *floor < 0.0 {
                return invalid(format!("rules.min_turnover_per_timeframe.{label} must not be negative"));
            }
        }
        if let Some(gap) = self.rules.max_gap_pct {
            if gap <= 0.0 {
                return invalid("rules.max_gap_pct must be positive".into());
            }
        }
        if self.rules.rsi_bands_overlap() {
            warn!(
                buy_floor = self.rules.buy.rsi_bound,
                sell_ceiling = self.rules.sell.rsi_bound,
                "BUY and SELL RSI bands overlap; simultaneous matches will be forced to NONE"
            );
        }

        if let Some(cluster) = &self.cluster {
            if cluster.lookback == 0 || cluster.min_hits > cluster.lookback {
                return invalid(format!(
                    "cluster.min_hits ({}) must be within lookback ({})",
                    cluster.min_hits, cluster.lookback
                ));
            }
        } else if self.rules.buy.require_cluster || self.rules.sell.require_cluster {
            return invalid("require_cluster set but no [cluster] section configured".into());
        }

        let tiers = &self.scoring.whale_tiers;
        if tiers.windows(2).any(|w| w[0].min_turnover >= w[1].min_turnover) {
            return invalid("scoring.whale_tiers must be sorted by ascending min_turnover".into());
        }

        let enabled: HashSet<&str> = self.sources.enabled.iter().map(String::as_str).collect();
        for source in &self.sources.enabled {
            if !matches!(source.as_str(), "binance" | "mexc" | "bybit") {
                return invalid(format!("sources.enabled: unknown source {source}"));
            }
        }
        if let Some(conf) = &self.confirmation {
            if !enabled.contains(conf.source.as_str()) {
                return invalid(format!("confirmation.source {} is not enabled", conf.source));
            }
            if conf.symbols.is_empty() || conf.timeframes.is_empty() {
                return invalid("confirmation.symbols and confirmation.timeframes must not be empty".into());
            }
            if !conf.symbols.contains(&conf.gate_symbol)
                || !conf.timeframes.contains(&conf.gate_timeframe)
            {
                return invalid(format!(
                    "confirmation gate {} {} is not among the reference pairs",
                    conf.gate_symbol, conf.gate_timeframe
                ));
            }
        }
        match self.universe.provider {
            UniverseKind::Static => {
                if self.universe.symbols.is_empty() {
                    return invalid("universe.symbols must not be empty for the static provider".into());
                }
                if let Some(bad) = self
                    .universe
                    .symbols
                    .iter()
                    .find(|e| !enabled.contains(e.source.as_str()))
                {
                    return invalid(format!("universe symbol {bad} uses a source that is not enabled"));
                }
            }
            UniverseKind::Coingecko => {
                if enabled.is_empty() {
                    return invalid("sources.enabled must not be empty".into());
                }
            }
        }

        Ok(())
    }
}

fn validate_side(name: &str, side: &SideRules) -> Result<(), ScanError> {
    if !(0.0..=100.0).contains(&side.rsi_bound) {
        return Err(ScanError::Config(format!(
            "rules.{name}.rsi_bound ({}) must be within [0, 100]",
            side.rsi_bound
        )));
    }
    if side.volume_ratio_floor < 0.0 {
        return Err(ScanError::Config(format!(
            "rules.{name}.volume_ratio_floor must not be negative"
        )));
    }
    if let Some(adx) = side.adx_floor {
        if !(0.0..=100.0).contains(&adx) {
            return Err(ScanError::Config(format!(
                "rules.{name}.adx_floor ({adx}) must be within [0, 100]"
            )));
        }
    }
    Ok(())
}
