//! The concurrent fan-out/fan-in orchestrator.
//!
//! Each asset fans out into property branches, damage scenarios, threat
//! scenarios, and attack paths; every level spawns its children as
//! independent tasks and joins them with gather semantics, so one branch's
//! failure never cancels or corrupts its siblings. A branch moves through
//! `Pending → Running(stage) → Completed | Terminated | Failed`; failures
//! are caught at the branch boundary, logged with their ancestry, and
//! converted into outcomes.
//!
//! Two independent budgets bound the run: root permits cap concurrently
//! active assets, step permits cap concurrently in-flight requests. A step
//! permit is held only for the duration of a single request — never across
//! a child await — so exhaustion makes branches wait instead of deadlock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use pipeline::artifact::{Asset, RequirementDigest, TaraRecord};
use pipeline::directives::Stage;
use pipeline::provider::{LlmProvider, SamplingOptions};

use crate::aggregator::{self, RunReport};
use crate::stages::{self, StageContext, StageError};

/// Concurrency widths for one run.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimits {
    /// Concurrently active root items (assets).
    pub max_concurrent_roots: usize,
    /// Concurrently in-flight requests across the whole run.
    pub max_concurrent_steps: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            max_concurrent_roots: 2,
            max_concurrent_steps: 3,
        }
    }
}

/// Orchestrator construction options.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub limits: ConcurrencyLimits,
    /// Extra attempts for the terminal treatment→control tail, beyond the
    /// request layer's own retry budget.
    pub tail_retries: u32,
    /// Backoff unit between tail attempts (doubles per attempt).
    pub tail_backoff_base: Duration,
    /// System persona sent with every request.
    pub system: String,
    /// Sampling options sent with every request.
    pub sampling: SamplingOptions,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            limits: ConcurrencyLimits::default(),
            tail_retries: 2,
            tail_backoff_base: Duration::from_secs(1),
            system: pipeline::directives::DEFAULT_SYSTEM_PERSONA.to_owned(),
            sampling: SamplingOptions::default(),
        }
    }
}

/// Terminal state of one branch.
#[derive(Debug)]
pub enum BranchOutcome {
    /// The branch ran the full chain; its record carries every section.
    Completed(Box<TaraRecord>),
    /// A fan-out stage produced no usable entries: a valid zero-result
    /// business state, counted but never aggregated.
    Terminated {
        stage: Stage,
        record: Box<TaraRecord>,
    },
    /// The branch failed; the partial ancestry is retained for diagnostics.
    Failed {
        error: StageError,
        record: Box<TaraRecord>,
    },
}

/// Everything one root item produced.
#[derive(Debug)]
pub struct RootReport {
    pub asset: Asset,
    pub completed: Vec<TaraRecord>,
    pub terminated: usize,
    pub failed: usize,
    pub digests: Vec<RequirementDigest>,
    /// Set when the per-root summarisation failed; branch results are kept.
    pub summary_error: Option<String>,
}

/// Outcome of one root item: a report, or a root-level failure (seeding
/// failed before any branch existed).
#[derive(Debug)]
pub enum RootOutcome {
    Report(RootReport),
    Aborted { asset: Asset, error: StageError },
}

/// Supervises the staged fan-out/fan-in execution for a set of assets.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    provider: Arc<dyn LlmProvider>,
    root_permits: Arc<Semaphore>,
    step_permits: Arc<Semaphore>,
    context: StageContext,
    tail_retries: u32,
    tail_backoff_base: Duration,
}

impl AnalysisOrchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, options: OrchestratorOptions) -> Self {
        Self {
            provider,
            root_permits: Arc::new(Semaphore::new(options.limits.max_concurrent_roots.max(1))),
            step_permits: Arc::new(Semaphore::new(options.limits.max_concurrent_steps.max(1))),
            context: StageContext {
                system: options.system,
                sampling: options.sampling,
            },
            tail_retries: options.tail_retries,
            tail_backoff_base: options.tail_backoff_base,
        }
    }

    /// Runs the pipeline for every asset and merges the per-root outcomes.
    ///
    /// Always completes: per-branch and per-root failures are isolated,
    /// counted, and reported.
    pub async fn run(&self, assets: Vec<Asset>) -> RunReport {
        let started = pipeline::Timestamp::now();
        let run_id = pipeline::AnalysisRunId::new_random();
        info!(%run_id, assets = assets.len(), "starting analysis run");

        let mut tasks: JoinSet<RootOutcome> = JoinSet::new();
        for asset in assets {
            let orchestrator = self.clone();
            tasks.spawn(async move {
                let _permit = acquire(&orchestrator.root_permits).await;
                let outcome = orchestrator.process_asset(asset.clone()).await;
                match outcome {
                    Ok(report) => RootOutcome::Report(report),
                    Err(error) => {
                        error!(asset = %asset.id, %error, "asset analysis aborted");
                        RootOutcome::Aborted { asset, error }
                    }
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => error!(%join_error, "root task panicked"),
            }
        }
        aggregator::merge(run_id, started, outcomes)
    }

    // ── Root level ─────────────────────────────────────────────────────

    async fn process_asset(&self, asset: Asset) -> Result<RootReport, StageError> {
        info!(asset = %asset.id, name = %asset.name, "analysing asset");
        let seeds = self
            .gated(stages::select_properties(
                self.provider.as_ref(),
                &self.context,
                &asset,
            ))
            .await?;
        info!(asset = %asset.id, properties = seeds.len(), "properties selected");

        let mut tasks: JoinSet<Vec<BranchOutcome>> = JoinSet::new();
        for seed in seeds {
            let orchestrator = self.clone();
            tasks.spawn(async move { orchestrator.expand_property(seed).await });
        }
        let (outcomes, panicked) = gather(tasks).await;

        let mut completed = Vec::new();
        let mut terminated = 0usize;
        let mut failed = panicked;
        for outcome in outcomes {
            match outcome {
                BranchOutcome::Completed(record) => completed.push(*record),
                BranchOutcome::Terminated { stage, record } => {
                    debug!(
                        asset = %record.asset.id,
                        property = %record.property,
                        %stage,
                        "branch terminated without entries"
                    );
                    terminated += 1;
                }
                BranchOutcome::Failed { error, record } => {
                    warn!(
                        asset = %record.asset.id,
                        property = %record.property,
                        damage = record.damage.as_ref().map(|d| d.label.as_str()),
                        threat = record.threat.as_ref().map(|t| t.label.as_str()),
                        %error,
                        "branch failed"
                    );
                    failed += 1;
                }
            }
        }

        let (digests, summary_error) = match self
            .gated(stages::summarise_requirements(
                self.provider.as_ref(),
                &self.context,
                &asset,
                &completed,
            ))
            .await
        {
            Ok(digests) => (digests, None),
            Err(error) => {
                warn!(asset = %asset.id, %error, "requirement summarisation failed");
                (Vec::new(), Some(error.to_string()))
            }
        };

        info!(
            asset = %asset.id,
            completed = completed.len(),
            failed,
            terminated,
            digests = digests.len(),
            "asset analysis finished"
        );
        Ok(RootReport {
            asset,
            completed,
            terminated,
            failed,
            digests,
            summary_error,
        })
    }

    // ── Branch levels ──────────────────────────────────────────────────

    async fn expand_property(&self, record: TaraRecord) -> Vec<BranchOutcome> {
        let children = match self
            .gated(stages::expand_damage_scenarios(
                self.provider.as_ref(),
                &self.context,
                &record,
            ))
            .await
        {
            Ok(children) => children,
            Err(error) => return vec![failed(error, record)],
        };
        if children.is_empty() {
            return vec![terminated(Stage::DamageScenarios, record)];
        }

        let mut tasks: JoinSet<Vec<BranchOutcome>> = JoinSet::new();
        for child in children {
            let orchestrator = self.clone();
            tasks.spawn(async move { orchestrator.expand_damage(child).await });
        }
        let (outcomes, _) = gather(tasks).await;
        outcomes
    }

    async fn expand_damage(&self, record: TaraRecord) -> Vec<BranchOutcome> {
        let record = match self
            .gated(stages::appraise_impact(
                self.provider.as_ref(),
                &self.context,
                &record,
            ))
            .await
        {
            Ok(rated) => rated,
            Err(error) => return vec![failed(error, record)],
        };

        let children = match self
            .gated(stages::expand_threat_scenarios(
                self.provider.as_ref(),
                &self.context,
                &record,
            ))
            .await
        {
            Ok(children) => children,
            Err(error) => return vec![failed(error, record)],
        };
        if children.is_empty() {
            return vec![terminated(Stage::ThreatScenarios, record)];
        }

        let mut tasks: JoinSet<Vec<BranchOutcome>> = JoinSet::new();
        for child in children {
            let orchestrator = self.clone();
            tasks.spawn(async move { orchestrator.expand_threat(child).await });
        }
        let (outcomes, _) = gather(tasks).await;
        outcomes
    }

    async fn expand_threat(&self, record: TaraRecord) -> Vec<BranchOutcome> {
        let children = match self
            .gated(stages::expand_attack_paths(
                self.provider.as_ref(),
                &self.context,
                &record,
            ))
            .await
        {
            Ok(children) => children,
            Err(error) => return vec![failed(error, record)],
        };
        if children.is_empty() {
            return vec![terminated(Stage::AttackPaths, record)];
        }

        let mut tasks: JoinSet<Vec<BranchOutcome>> = JoinSet::new();
        for child in children {
            let orchestrator = self.clone();
            tasks.spawn(async move { vec![orchestrator.finish_path(child).await] });
        }
        let (outcomes, _) = gather(tasks).await;
        outcomes
    }

    async fn finish_path(&self, record: TaraRecord) -> BranchOutcome {
        let record = match self
            .gated(stages::appraise_feasibility(
                self.provider.as_ref(),
                &self.context,
                &record,
            ))
            .await
        {
            Ok(rated) => rated,
            Err(error) => return failed(error, record),
        };

        // Bounded retry around the terminal tail only; everything upstream
        // relies on the request layer's own budget.
        let mut attempt = 0u32;
        loop {
            match self.run_tail(&record).await {
                Ok(done) => return BranchOutcome::Completed(Box::new(done)),
                Err(error) => {
                    if attempt >= self.tail_retries {
                        return failed(error, record);
                    }
                    attempt += 1;
                    let delay = self
                        .tail_backoff_base
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        asset = %record.asset.id,
                        attempt,
                        max_attempts = self.tail_retries,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "terminal stages failed, retrying tail"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn run_tail(&self, record: &TaraRecord) -> Result<TaraRecord, StageError> {
        let decided = self
            .gated(stages::decide_treatment(
                self.provider.as_ref(),
                &self.context,
                record,
            ))
            .await?;
        self.gated(stages::derive_control(
            self.provider.as_ref(),
            &self.context,
            &decided,
        ))
        .await
    }

    /// Wraps one stage invocation in a step permit: the permit is held for
    /// the single request only, never across child awaits.
    async fn gated<T>(
        &self,
        stage_call: impl std::future::Future<Output = Result<T, StageError>>,
    ) -> Result<T, StageError> {
        let _permit = acquire(&self.step_permits).await;
        stage_call.await
    }
}

async fn acquire(semaphore: &Arc<Semaphore>) -> OwnedSemaphorePermit {
    semaphore
        .clone()
        .acquire_owned()
        .await
        .expect("semaphore is never closed")
}

async fn gather(mut tasks: JoinSet<Vec<BranchOutcome>>) -> (Vec<BranchOutcome>, usize) {
    let mut outcomes = Vec::new();
    let mut panicked = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(list) => outcomes.extend(list),
            Err(join_error) => {
                error!(%join_error, "branch task panicked");
                panicked += 1;
            }
        }
    }
    (outcomes, panicked)
}

fn failed(error: StageError, record: TaraRecord) -> BranchOutcome {
    BranchOutcome::Failed {
        error,
        record: Box::new(record),
    }
}

fn terminated(stage: Stage, record: TaraRecord) -> BranchOutcome {
    BranchOutcome::Terminated {
        stage,
        record: Box::new(record),
    }
}
