//! Scan orchestrator: bounded-parallel fetch → evaluate over the
//! symbol × timeframe space.
//!
//! One scan, all of it under one run deadline:
//! 1. Resolve the symbol universe (stop with `UniverseUnavailable` if empty).
//! 2. Compute the reference trend states and the market overview once;
//!    the gate reference decides which sides may fire.
//! 3. Run one task per (symbol, timeframe) on a fixed worker budget, each
//!    fetch under its own timeout and retry budget.
//! 4. Hand every outcome to the aggregator.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, ConfirmationConfig, ScanConfig};
use crate::engine::aggregator::{ResultAggregator, RunHeader};
use crate::sources::market::MarketOverviewProvider;
use crate::sources::{CandleSource, SourceRouter, SymbolUniverseProvider};
use crate::strategy::SignalPipeline;
use crate::types::{
    CandleSeries, ConfirmationGate, FetchError, MarketNote, MarketState, ReferenceState,
    RejectionReason, ScanError, ScanRun, SymbolEntry, TaskOutcome, Timeframe,
};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Delay growth between fetch retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    Fixed,
    #[default]
    Linear,
}

impl RetryBackoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        match self {
            RetryBackoff::Fixed => base,
            RetryBackoff::Linear => base * attempt.max(1),
        }
    }
}

/// Runtime knobs of one scan, resolved from `[scan]`.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub universe_size: usize,
    pub timeframes: Vec<Timeframe>,
    pub bar_limit: usize,
    pub worker_count: usize,
    /// Retries after the first attempt.
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub backoff: RetryBackoff,
    pub fetch_timeout: Duration,
    pub run_deadline: Duration,
}

impl ScanSettings {
    pub fn from_config(scan: &ScanConfig) -> Self {
        Self {
            universe_size: scan.universe_size,
            timeframes: scan.timeframes.clone(),
            bar_limit: scan.bar_limit,
            worker_count: scan.worker_count,
            retry_count: scan.fetch_retry_count,
            retry_delay: scan.fetch_retry_delay(),
            backoff: scan.retry_backoff,
            fetch_timeout: scan.fetch_timeout(),
            run_deadline: scan.run_deadline(),
        }
    }
}

/// Everything computed once before fan-out, read-only afterwards.
struct MarketContext {
    gate: ConfirmationGate,
    references: Vec<ReferenceState>,
    gate_state: Option<ReferenceState>,
    market_note: Option<MarketNote>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ScanOrchestrator {
    universe: Arc<dyn SymbolUniverseProvider>,
    sources: SourceRouter,
    pipeline: Arc<SignalPipeline>,
    aggregator: ResultAggregator,
    settings: ScanSettings,
    confirmation: Option<ConfirmationConfig>,
    overview: Option<Arc<dyn MarketOverviewProvider>>,
}

impl ScanOrchestrator {
    pub fn new(
        universe: Arc<dyn SymbolUniverseProvider>,
        sources: SourceRouter,
        pipeline: Arc<SignalPipeline>,
        aggregator: ResultAggregator,
        settings: ScanSettings,
        confirmation: Option<ConfirmationConfig>,
    ) -> Self {
        Self {
            universe,
            sources,
            pipeline,
            aggregator,
            settings,
            confirmation,
            overview: None,
        }
    }

    /// Attach a market overview provider for the report header.
    pub fn with_overview(mut self, provider: Arc<dyn MarketOverviewProvider>) -> Self {
        self.overview = Some(provider);
        self
    }

    /// Wire an orchestrator from the application config.
    pub fn from_config(
        cfg: &AppConfig,
        universe: Arc<dyn SymbolUniverseProvider>,
        sources: SourceRouter,
    ) -> Self {
        Self::new(
            universe,
            sources,
            Arc::new(SignalPipeline::from_config(cfg)),
            ResultAggregator::new(cfg.scan.dedup, cfg.scan.top_k_per_side),
            ScanSettings::from_config(&cfg.scan),
            cfg.confirmation.clone(),
        )
    }

    /// Run one complete scan.
    ///
    /// Only an unavailable universe is an error; every per-task failure
    /// becomes a counted rejection in the returned run.
    pub async fn run(&self) -> Result<ScanRun, ScanError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.run_deadline;

        let listing = tokio::time::timeout_at(deadline, self.universe.list(self.settings.universe_size));
        let mut universe = match listing.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScanError::UniverseUnavailable(
                    "run deadline reached while listing symbols".into(),
                ))
            }
        };
        if universe.is_empty() {
            return Err(ScanError::UniverseUnavailable("provider returned no symbols".into()));
        }
        universe.truncate(self.settings.universe_size);

        let context = match tokio::time::timeout_at(deadline, self.market_context()).await {
            Ok(context) => context,
            Err(_) => {
                warn!("Run deadline reached before market context was ready, gate left open");
                self.unavailable_context()
            }
        };

        let tasks: Vec<(SymbolEntry, Timeframe)> = universe
            .iter()
            .flat_map(|entry| {
                self.settings
                    .timeframes
                    .iter()
                    .map(move |tf| (entry.clone(), *tf))
            })
            .collect();

        info!(
            %run_id,
            universe = universe.len(),
            timeframes = self.settings.timeframes.len(),
            tasks = tasks.len(),
            workers = self.settings.worker_count,
            "Scan started"
        );

        let outcomes = self.execute(&tasks, &context.gate, deadline).await;

        let header = RunHeader {
            run_id,
            started_at,
            universe_size: universe.len(),
            timeframes: self.settings.timeframes.clone(),
            task_count: tasks.len(),
            elapsed: clock.elapsed(),
            references: context.references,
            gate: context.gate_state,
            market_note: context.market_note,
        };
        let run = self.aggregator.aggregate(header, outcomes);

        info!(
            %run_id,
            buys = run.buys.len(),
            sells = run.sells.len(),
            rejected = run.rejected_total(),
            elapsed_secs = run.elapsed.as_secs_f64(),
            "Scan complete"
        );
        Ok(run)
    }

    /// Run every task on the worker budget. Tasks still pending at the
    /// deadline are reported as `deadline_exceeded`.
    async fn execute(
        &self,
        tasks: &[(SymbolEntry, Timeframe)],
        gate: &ConfirmationGate,
        deadline: tokio::time::Instant,
    ) -> Vec<TaskOutcome> {
        let mut slots: Vec<Option<TaskOutcome>> = vec![None; tasks.len()];

        let mut pending = stream::iter(tasks.iter().enumerate())
            .map(|(i, (entry, tf))| async move { (i, self.run_task(entry, *tf, gate).await) })
            .buffer_unordered(self.settings.worker_count.max(1));

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((i, outcome))) => slots[i] = Some(outcome),
                Ok(None) => break,
                Err(_) => {
                    let unfinished = slots.iter().filter(|s| s.is_none()).count();
                    warn!(unfinished, "Run deadline reached, abandoning pending tasks");
                    break;
                }
            }
        }
        drop(pending);

        slots
            .into_iter()
            .zip(tasks)
            .map(|(slot, (entry, tf))| {
                slot.unwrap_or_else(|| {
                    TaskOutcome::skipped(&entry.symbol, *tf, RejectionReason::DeadlineExceeded)
                })
            })
            .collect()
    }

    /// Fetch → evaluate for one (symbol, timeframe). Never fails.
    async fn run_task(
        &self,
        entry: &SymbolEntry,
        timeframe: Timeframe,
        gate: &ConfirmationGate,
    ) -> TaskOutcome {
        let Some(source) = self.sources.get(&entry.source) else {
            warn!(symbol = %entry.symbol, source = %entry.source, "No candle source registered");
            return TaskOutcome::skipped(&entry.symbol, timeframe, RejectionReason::UnknownSource);
        };

        match self.fetch_with_retry(source.as_ref(), &entry.symbol, timeframe).await {
            Ok(series) => self.pipeline.evaluate(entry, timeframe, &series, gate),
            Err(err) => {
                let reason = match &err {
                    ScanError::TransientFetch { last, .. } if !last.is_retryable() => {
                        RejectionReason::BadResponse
                    }
                    _ => RejectionReason::TransientFetchError,
                };
                debug!(symbol = %entry.symbol, %timeframe, error = %err, %reason, "Task skipped");
                TaskOutcome::skipped(&entry.symbol, timeframe, reason)
            }
        }
    }

    /// Fetch with a per-attempt timeout and a bounded retry budget.
    /// Non-retryable failures stop immediately.
    pub async fn fetch_with_retry(
        &self,
        source: &dyn CandleSource,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<CandleSeries, ScanError> {
        let max_attempts = self.settings.retry_count + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                self.settings.fetch_timeout,
                source.fetch(symbol, timeframe, self.settings.bar_limit),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout),
            };

            match result {
                Ok(series) => return Ok(series),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.settings.backoff.delay(self.settings.retry_delay, attempt);
                    warn!(
                        symbol,
                        %timeframe,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(ScanError::TransientFetch {
                        symbol: symbol.to_string(),
                        timeframe,
                        attempts: attempt,
                        last: e,
                    })
                }
            }
        }
    }

    // -- Market context ----------------------------------------------------

    /// Reference states and market overview, fetched concurrently.
    /// Nothing here can fail the run: an unavailable gate reference leaves
    /// both sides open.
    async fn market_context(&self) -> MarketContext {
        let (references, market_note) = tokio::join!(self.reference_states(), self.market_note());

        let gate_state = self.confirmation.as_ref().map(|conf| {
            references
                .iter()
                .find(|r| conf.is_gate(&r.symbol, r.timeframe))
                .cloned()
                .unwrap_or_else(|| ReferenceState {
                    symbol: conf.gate_symbol.clone(),
                    timeframe: conf.gate_timeframe,
                    state: MarketState::Unavailable,
                })
        });
        let gate = gate_state
            .as_ref()
            .map(|r| ConfirmationGate::from_state(r.state))
            .unwrap_or(ConfirmationGate::OPEN);

        if let Some(reference) = &gate_state {
            info!(
                symbol = %reference.symbol,
                timeframe = %reference.timeframe,
                state = %reference.state,
                buy = gate.buy,
                sell = gate.sell,
                references = references.len(),
                "Confirmation gate computed"
            );
        }

        MarketContext {
            gate,
            references,
            gate_state,
            market_note,
        }
    }

    /// Context used when the deadline cuts the upfront work short.
    fn unavailable_context(&self) -> MarketContext {
        let unavailable = |symbol: String, timeframe: Timeframe| ReferenceState {
            symbol,
            timeframe,
            state: MarketState::Unavailable,
        };
        let references = self
            .confirmation
            .as_ref()
            .map(|conf| {
                conf.pairs()
                    .into_iter()
                    .map(|(symbol, tf)| unavailable(symbol, tf))
                    .collect()
            })
            .unwrap_or_default();

        MarketContext {
            gate: ConfirmationGate::OPEN,
            references,
            gate_state: self
                .confirmation
                .as_ref()
                .map(|conf| unavailable(conf.gate_symbol.clone(), conf.gate_timeframe)),
            market_note: self.overview.as_ref().map(|_| MarketNote::Unavailable),
        }
    }

    /// Trend state of every configured reference pair.
    async fn reference_states(&self) -> Vec<ReferenceState> {
        let Some(conf) = &self.confirmation else {
            return Vec::new();
        };
        let source = self.sources.get(&conf.source);
        if source.is_none() {
            warn!(source = %conf.source, "Confirmation source not registered");
        }

        let lookups = conf.pairs().into_iter().map(|(symbol, timeframe)| {
            let source = source.clone();
            async move {
                let state = match source {
                    Some(source) => self
                        .reference_state(source.as_ref(), &symbol, timeframe)
                        .await
                        .unwrap_or_else(|e| {
                            warn!(symbol = %symbol, %timeframe, error = %e, "Reference state unavailable");
                            MarketState::Unavailable
                        }),
                    None => MarketState::Unavailable,
                };
                ReferenceState {
                    symbol,
                    timeframe,
                    state,
                }
            }
        });
        futures::future::join_all(lookups).await
    }

    async fn reference_state(
        &self,
        source: &dyn CandleSource,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<MarketState, ScanError> {
        let series = self.fetch_with_retry(source, symbol, timeframe).await?;
        Ok(self.pipeline.market_state(&series)?)
    }

    async fn market_note(&self) -> Option<MarketNote> {
        let provider = self.overview.as_ref()?;
        Some(match provider.overview().await {
            Ok(overview) => MarketNote::Overview(overview),
            Err(e) => {
                warn!(error = %e, "Market overview unavailable");
                MarketNote::Unavailable
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
