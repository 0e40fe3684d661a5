//! Result aggregation: merges per-root outcomes into the final run report.
//!
//! Purely structural concatenation — deduplication only ever happens inside
//! the per-root summarisation step, never across roots.

use tracing::{info, warn};

use pipeline::artifact::{RequirementDigest, TaraRecord};
use pipeline::identifiers::{AnalysisRunId, AssetId};
use pipeline::types::Timestamp;

use crate::orchestrator::RootOutcome;

/// Per-root counts for observability.
#[derive(Debug, Clone)]
pub struct RootSummary {
    pub asset_id: AssetId,
    pub asset_name: String,
    pub completed: usize,
    pub failed: usize,
    pub terminated: usize,
    /// Seeding failed; the root produced nothing.
    pub aborted: bool,
    pub summary_error: Option<String>,
}

/// Whole-run counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub roots: usize,
    pub roots_aborted: usize,
    pub branches_completed: usize,
    pub branches_failed: usize,
    pub branches_terminated: usize,
    pub digests: usize,
}

/// The merged result of one analysis run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: AnalysisRunId,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Completed records across all roots, concatenated in root order of
    /// completion; no cross-root deduplication.
    pub rows: Vec<TaraRecord>,
    /// Requirement digests across all roots.
    pub digests: Vec<RequirementDigest>,
    pub roots: Vec<RootSummary>,
    pub totals: RunTotals,
}

/// Merges the per-root outcomes and emits per-root and per-run counts.
pub fn merge(
    run_id: AnalysisRunId,
    started_at: Timestamp,
    outcomes: Vec<RootOutcome>,
) -> RunReport {
    let mut rows = Vec::new();
    let mut digests = Vec::new();
    let mut roots = Vec::new();
    let mut totals = RunTotals::default();

    for outcome in outcomes {
        totals.roots += 1;
        match outcome {
            RootOutcome::Report(report) => {
                let summary = RootSummary {
                    asset_id: report.asset.id.clone(),
                    asset_name: report.asset.name.clone(),
                    completed: report.completed.len(),
                    failed: report.failed,
                    terminated: report.terminated,
                    aborted: false,
                    summary_error: report.summary_error.clone(),
                };
                info!(
                    asset = %summary.asset_id,
                    completed = summary.completed,
                    failed = summary.failed,
                    terminated = summary.terminated,
                    digests = report.digests.len(),
                    "root merged"
                );
                totals.branches_completed += summary.completed;
                totals.branches_failed += summary.failed;
                totals.branches_terminated += summary.terminated;
                totals.digests += report.digests.len();
                rows.extend(report.completed);
                digests.extend(report.digests);
                roots.push(summary);
            }
            RootOutcome::Aborted { asset, error } => {
                warn!(asset = %asset.id, %error, "root aborted, nothing to merge");
                totals.roots_aborted += 1;
                roots.push(RootSummary {
                    asset_id: asset.id.clone(),
                    asset_name: asset.name.clone(),
                    completed: 0,
                    failed: 0,
                    terminated: 0,
                    aborted: true,
                    summary_error: Some(error.to_string()),
                });
            }
        }
    }

    info!(
        %run_id,
        roots = totals.roots,
        roots_aborted = totals.roots_aborted,
        completed = totals.branches_completed,
        failed = totals.branches_failed,
        terminated = totals.branches_terminated,
        digests = totals.digests,
        "run merged"
    );
    RunReport {
        run_id,
        started_at,
        finished_at: Timestamp::now(),
        rows,
        digests,
        roots,
        totals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RootReport;
    use crate::stages::StageError;
    use pipeline::artifact::Asset;
    use pipeline::directives::Stage;
    use pipeline::provider::LlmError;
    use pipeline::types::{AssetKind, SecurityProperty};
    use pipeline::TaraRecord;

    fn asset(id: &str) -> Asset {
        Asset {
            id: AssetId::new(id).unwrap(),
            name: format!("asset {id}"),
            kind: AssetKind::Hardware,
            protocol: String::new(),
            remarks: String::new(),
        }
    }

    fn record(id: &str) -> TaraRecord {
        TaraRecord::seed(asset(id), SecurityProperty::Integrity)
    }

    #[test]
    fn merge_concatenates_without_cross_root_deduplication() {
        let outcomes = vec![
            RootOutcome::Report(RootReport {
                asset: asset("A-1"),
                completed: vec![record("A-1"), record("A-1")],
                terminated: 1,
                failed: 1,
                digests: Vec::new(),
                summary_error: None,
            }),
            RootOutcome::Report(RootReport {
                asset: asset("A-2"),
                // Identical content to a root-1 record stays duplicated.
                completed: vec![record("A-1")],
                terminated: 0,
                failed: 0,
                digests: Vec::new(),
                summary_error: None,
            }),
            RootOutcome::Aborted {
                asset: asset("A-3"),
                error: StageError::Request {
                    stage: Stage::PropertySelection,
                    source: LlmError::Rejected {
                        status: 400,
                        message: "refused".into(),
                    },
                },
            },
        ];

        let report = merge(AnalysisRunId::new_random(), Timestamp::now(), outcomes);
        assert_eq!(report.totals.roots, 3);
        assert_eq!(report.totals.roots_aborted, 1);
        assert_eq!(report.totals.branches_completed, 3);
        assert_eq!(report.totals.branches_failed, 1);
        assert_eq!(report.totals.branches_terminated, 1);
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.roots.len(), 3);
        assert!(report.roots.iter().any(|root| root.aborted));
    }
}
