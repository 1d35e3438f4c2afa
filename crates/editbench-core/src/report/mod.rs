pub mod csv;
pub mod json;
pub mod summary;
pub mod workspace;

use crate::model::{ComparisonMode, TrialResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Everything one benchmark run produced, ready for the writers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchArtifacts {
    pub run_id: String,
    pub mode: ComparisonMode,
    pub started_at: DateTime<Utc>,
    pub results: Vec<TrialResult>,
}

/// Thread-safe accumulator for streaming results. Appending never fails;
/// a row is stored verbatim even when its trial errored, so partial runs
/// still produce complete artifacts.
#[derive(Default, Clone)]
pub struct Collector {
    rows: Arc<Mutex<Vec<TrialResult>>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: TrialResult) {
        if let Ok(mut rows) = self.rows.lock() {
            rows.push(result);
        }
    }

    /// A sink closure bound to this collector, for the scheduler.
    pub fn sink(&self) -> crate::scheduler::ResultSink {
        let me = self.clone();
        Arc::new(move |r| me.push(r))
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<TrialResult> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MethodKind, TrialStatus};

    fn row(id: &str) -> TrialResult {
        TrialResult {
            trial_id: id.into(),
            model: "m".into(),
            file: "f".into(),
            query_id: "q".into(),
            method: MethodKind::Morph,
            mode: ComparisonMode::SingleTurn,
            status: TrialStatus::Success,
            iterations: Vec::new(),
            total_tokens: 10,
            total_cost: 0.0,
            wall_time_ms: 1.0,
            rate_limit_delay_ms: 0.0,
            retries: 0,
            final_content: None,
            error: None,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn collector_accumulates_through_its_sink() {
        let collector = Collector::new();
        let sink = collector.sink();
        sink(row("a"));
        sink(row("b"));
        assert_eq!(collector.len(), 2);
        assert_eq!(collector.snapshot()[0].trial_id, "a");
    }

    #[test]
    fn concurrent_pushes_all_land() {
        let collector = Collector::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let c = collector.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        c.push(row(&format!("{i}-{j}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(collector.len(), 400);
    }
}
