//! taraflow orchestration layer.
//!
//! Sequences the analysis stages over the [`pipeline`] domain: stage
//! processors build requests from branch records, the orchestrator fans
//! branches out and back in under two concurrency budgets, and the
//! aggregator merges per-root outcomes into the final run report.
//!
//! ## Architectural Layer
//!
//! **Orchestration.** Nodes sequence calls between business logic in the
//! [`pipeline`] crate and the request-layer port; they contain no domain
//! rules of their own and depend only on [`pipeline::provider::LlmProvider`],
//! never on a concrete backend.

pub mod aggregator;
pub mod blocking;
pub mod orchestrator;
pub mod stages;

pub use aggregator::{RootSummary, RunReport, RunTotals};
pub use blocking::run_blocking;
pub use orchestrator::{
    AnalysisOrchestrator, BranchOutcome, ConcurrencyLimits, OrchestratorOptions, RootOutcome,
    RootReport,
};
pub use stages::{StageContext, StageError};
