//! Expands the benchmark plan into the trial matrix and runs it under a
//! bounded worker pool. One worker owns one trial for its whole lifetime;
//! results stream to the collector in completion order and are returned
//! sorted by trial id for deterministic artifacts.

use crate::executor::TrialExecutor;
use crate::methods::EditMethod;
use crate::model::{
    ComparisonMode, CorpusFile, ModelSpec, Query, TrialResult, TrialSpec, TrialStatus,
};
use crate::report::BenchArtifacts;
use crate::verify::Verifier;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One corpus file with its edit requests.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub file: Arc<CorpusFile>,
    pub queries: Vec<Query>,
}

/// Validated inputs for one run. The core never re-parses configuration;
/// the loader hands these over ready to use.
#[derive(Debug, Clone)]
pub struct BenchPlan {
    pub models: Vec<ModelSpec>,
    pub files: Vec<PlanFile>,
    pub mode: ComparisonMode,
    pub max_iterations: u32,
    /// Worker pool size. Independent of provider count: one slow provider
    /// cannot starve trials against another, because admission control is
    /// per-provider and orthogonal to pool concurrency.
    pub parallel: usize,
    pub global_timeout: Option<Duration>,
}

impl BenchPlan {
    /// Cross-product of models, files, queries and the mode's method pair.
    pub fn expand(&self) -> Vec<TrialSpec> {
        let mut trials = Vec::new();
        for plan_file in &self.files {
            for model in &self.models {
                for query in &plan_file.queries {
                    for method in self.mode.method_pair() {
                        trials.push(TrialSpec {
                            model: model.clone(),
                            file: plan_file.file.clone(),
                            query: query.clone(),
                            mode: self.mode,
                            method,
                        });
                    }
                }
            }
        }
        trials
    }
}

/// Maps a trial to the edit method instance that serves it. The production
/// resolver wires gated clients per provider; tests inject stubs.
pub trait MethodResolver: Send + Sync {
    fn resolve(&self, spec: &TrialSpec) -> Arc<dyn EditMethod>;
}

/// Called once per completed trial, in completion order. Mirrors the
/// single-writer append contract of the results collector.
pub type ResultSink = Arc<dyn Fn(TrialResult) + Send + Sync>;

pub struct Scheduler {
    plan: BenchPlan,
    resolver: Arc<dyn MethodResolver>,
    verifier: Arc<dyn Verifier>,
}

impl Scheduler {
    pub fn new(plan: BenchPlan, resolver: Arc<dyn MethodResolver>, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            plan,
            resolver,
            verifier,
        }
    }

    pub fn expand(&self) -> Vec<TrialSpec> {
        self.plan.expand()
    }

    /// Run every trial to a terminal state. Results are emitted to `sink`
    /// as they complete and returned sorted by trial id. Fails only when
    /// zero trials can be scheduled.
    pub async fn run(&self, sink: Option<ResultSink>) -> anyhow::Result<BenchArtifacts> {
        let trials = self.expand();
        if trials.is_empty() {
            anyhow::bail!("no trials to schedule: empty models, files or queries");
        }
        let total = trials.len();
        tracing::info!(
            total,
            parallel = self.plan.parallel,
            mode = self.plan.mode.as_str(),
            "scheduling trials"
        );

        let deadline = self
            .plan
            .global_timeout
            .map(|t| tokio::time::Instant::now() + t);
        let sem = Arc::new(Semaphore::new(self.plan.parallel.max(1)));
        let mut join_set = JoinSet::new();

        // Every trial is spawned up front; admission control happens inside
        // the task. Dispatch never blocks, so completed trials stream out
        // while later ones are still queued on the semaphore.
        for spec in trials {
            let sem = sem.clone();
            let method = self.resolver.resolve(&spec);
            let executor =
                TrialExecutor::new(method, self.verifier.clone(), self.plan.max_iterations, deadline);
            join_set.spawn(async move {
                // Holding the Ok permit bounds concurrency; the semaphore is
                // never closed, so an Err leaves the trial unthrottled rather
                // than lost.
                let _permit = sem.acquire_owned().await;
                executor.run(&spec).await
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = join_set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                // A panicked worker still yields a row; siblings continue.
                Err(e) => panicked_trial_row(&e, self.plan.mode),
            };
            tracing::debug!(
                trial = %result.trial_id,
                status = result.status.as_str(),
                done = results.len() + 1,
                total,
                "trial finished"
            );
            if let Some(ref sink) = sink {
                sink(result.clone());
            }
            results.push(result);
        }

        // Deterministic order for artifacts and golden comparisons.
        results.sort_by(|a, b| a.trial_id.cmp(&b.trial_id));

        Ok(BenchArtifacts {
            run_id: uuid::Uuid::new_v4().to_string(),
            mode: self.plan.mode,
            started_at: Utc::now(),
            results,
        })
    }
}

fn panicked_trial_row(e: &tokio::task::JoinError, mode: ComparisonMode) -> TrialResult {
    TrialResult {
        trial_id: "unknown".into(),
        model: "unknown".into(),
        file: "unknown".into(),
        query_id: "unknown".into(),
        method: mode.method_pair()[0],
        mode,
        status: TrialStatus::Error,
        iterations: Vec::new(),
        total_tokens: 0,
        total_cost: 0.0,
        wall_time_ms: 0.0,
        rate_limit_delay_ms: 0.0,
        retries: 0,
        final_content: None,
        error: Some(format!("join error: {e}")),
        finished_at: Utc::now(),
    }
}
