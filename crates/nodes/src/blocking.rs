//! Synchronous facade.
//!
//! Callers without an async context drive the same orchestrator — the same
//! retry, admission, and fan-out code — on a private current-thread
//! runtime. Semantics are identical to the async path; only the suspension
//! backend differs.

use pipeline::artifact::Asset;

use crate::aggregator::RunReport;
use crate::orchestrator::AnalysisOrchestrator;

/// Runs a full analysis to completion on the calling thread.
pub fn run_blocking(
    orchestrator: &AnalysisOrchestrator,
    assets: Vec<Asset>,
) -> std::io::Result<RunReport> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(orchestrator.run(assets)))
}
