//! Markdown rendering of a scan run for the notifier.

use std::fmt::Write;

use crate::types::{ConfirmationGate, MarketNote, MarketOverview, ScanRun, SignalResult};

/// Render the full report: header, BUY/SELL sections, summary.
pub fn render(run: &ScanRun) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "*MULTISCAN* {}",
        run.started_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(
        out,
        "Universe: {} | Timeframes: {} | Elapsed: {:.1}s",
        run.universe_size,
        run.timeframes.len(),
        run.elapsed.as_secs_f64()
    );
    if !run.references.is_empty() {
        let states: Vec<String> = run
            .references
            .iter()
            .map(|r| format!("{} {} {}", r.symbol, r.timeframe, r.state))
            .collect();
        let _ = writeln!(out, "Trend: {}", states.join(" | "));
    }
    if let Some(gate) = &run.gate {
        let sides = ConfirmationGate::from_state(gate.state);
        let _ = writeln!(
            out,
            "Gate: {} {} {} (BUY {} | SELL {})",
            gate.symbol,
            gate.timeframe,
            gate.state,
            on_off(sides.buy),
            on_off(sides.sell)
        );
    }
    match &run.market_note {
        Some(MarketNote::Overview(o)) => {
            let _ = writeln!(out, "{}", market_line(o));
        }
        Some(MarketNote::Unavailable) => out.push_str("Market: data unavailable\n"),
        None => {}
    }

    if run.buys.is_empty() && run.sells.is_empty() {
        out.push_str("\nNo signals this run.\n");
    } else {
        section(&mut out, "BUY", &run.buys);
        section(&mut out, "SELL", &run.sells);
    }

    let _ = write!(
        out,
        "\nSignals: BUY {} | SELL {} | tasks {}",
        run.buys.len(),
        run.sells.len(),
        run.task_count
    );
    if !run.rejection_counts.is_empty() {
        let counts: Vec<String> = run
            .rejection_counts
            .iter()
            .map(|(reason, n)| format!("{reason}={n}"))
            .collect();
        // Labels contain underscores, which Markdown would read as italics.
        let _ = write!(out, "\nRejected: `{}`", counts.join(" "));
    }
    out.push('\n');
    out
}

fn on_off(allowed: bool) -> &'static str {
    if allowed {
        "on"
    } else {
        "off"
    }
}

/// e.g. `Market: BTC ↑ + BTC.D ↓ (BTC.D 54.2%) | Total: +1.2% | Total2: ↑ | USDT.D: 4.9% (risk-on)`
fn market_line(o: &MarketOverview) -> String {
    let mut s = format!(
        "Market: BTC {} + BTC.D {} (BTC.D {:.1}%) | Total: {:+.1}% | Total2: {} | USDT.D: {:.1}%",
        o.btc_direction(),
        o.dominance_direction(),
        o.btc_dominance_pct,
        o.total_cap_change_pct,
        o.total2_direction(),
        o.usdt_dominance_pct
    );
    if let Some(sentiment) = o.usdt_sentiment() {
        let _ = write!(s, " ({sentiment})");
    }
    s
}

fn section(out: &mut String, title: &str, results: &[SignalResult]) {
    if results.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n*{title}*");
    for r in results {
        let _ = writeln!(out, "{}", line(r));
    }
}

fn line(r: &SignalResult) -> String {
    let mut s = format!(
        "`{}` ({}) {} | RSI:{:.0} ADX:{:.0} Volx:{:.2}",
        r.symbol, r.source, r.timeframe, r.snapshot.rsi, r.snapshot.adx, r.snapshot.volume_ratio
    );
    if let Some(conf) = r.confidence {
        let _ = write!(s, " | Conf:{conf:.0}");
    }
    if let Some(tier) = &r.whale_tier {
        let _ = write!(s, " | Whale:{tier}");
    }
    s
}

/// Short notice sent when no symbol universe could be resolved.
pub fn universe_unavailable(reason: &str) -> String {
    format!("*MULTISCAN* scan skipped: symbol universe unavailable.\n`{reason}`")
}
