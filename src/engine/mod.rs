//! Core engine: scan orchestration, result aggregation and reporting.

pub mod aggregator;
pub mod report;
pub mod scanner;

use tracing::{error, info};

use crate::notify::Notifier;
use crate::types::{ScanError, ScanRun};
use scanner::ScanOrchestrator;

/// What one scan-and-report cycle produced.
#[derive(Debug)]
pub struct Delivery {
    /// `None` when the scan stopped before fan-out.
    pub run: Option<ScanRun>,
    pub delivered: bool,
}

/// Scan, render, send and log. A failed scan becomes the short
/// universe notice; a failed send is logged and reported through
/// `delivered`, never as an error.
pub async fn run_and_deliver(orchestrator: &ScanOrchestrator, notifier: &dyn Notifier) -> Delivery {
    let (run, text) = match orchestrator.run().await {
        Ok(run) => {
            info!(%run, "Scan finished");
            let text = report::render(&run);
            (Some(run), text)
        }
        Err(e) => {
            error!(error = %e, "Scan aborted before fan-out");
            let reason = match &e {
                ScanError::UniverseUnavailable(reason) => reason.clone(),
                other => other.to_string(),
            };
            (None, report::universe_unavailable(&reason))
        }
    };

    let delivered = match notifier.send(&text).await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Report delivery failed");
            false
        }
    };

    Delivery { run, delivered }
}
