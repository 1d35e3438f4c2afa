//! YAML run configuration: models under test, provider endpoints, the
//! corpus files with their edit queries, and run-level knobs. Validation
//! happens up front so a bad config fails before any provider is called.

use crate::model::{ComparisonMode, CorpusFile, ModelSpec, Query};
use crate::scheduler::{BenchPlan, PlanFile};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn default_max_iterations() -> u32 {
    10
}

fn default_parallel() -> usize {
    4
}

fn default_output_dir() -> String {
    "results".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    pub mode: ComparisonMode,

    /// Edit/verify cycle budget per multi-turn trial.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Worker pool size.
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Whole-run deadline; outstanding trials are marked timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    pub models: Vec<ModelSpec>,

    /// Keyed by the provider names that `models`, `morph` and `judge` use.
    pub providers: BTreeMap<String, ProviderConfig>,

    /// The dedicated merge model behind morph edits.
    pub morph: EndpointRef,

    /// The model that judges whether a multi-turn edit satisfied its query.
    pub judge: EndpointRef,

    pub files: Vec<FileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Environment variable holding the API key. The key itself never
    /// appears in config files.
    pub api_key_env: String,
    /// Request budget per minute; omit for no admission control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
}

/// A (provider, model) pair for auxiliary roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRef {
    pub provider: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Path relative to the config file's directory.
    pub path: String,
    pub queries: Vec<Query>,
}

impl BenchConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            bail!("config needs at least one model");
        }
        if self.files.is_empty() {
            bail!("config needs at least one file");
        }
        for f in &self.files {
            if f.queries.is_empty() {
                bail!("file '{}' has no queries", f.path);
            }
        }
        if self.max_iterations == 0 {
            bail!("max_iterations must be at least 1");
        }
        if self.parallel == 0 {
            bail!("parallel must be at least 1");
        }
        let mut used: Vec<(&str, &str)> = self
            .models
            .iter()
            .map(|m| (m.name.as_str(), m.provider.as_str()))
            .collect();
        used.push(("morph", self.morph.provider.as_str()));
        used.push(("judge", self.judge.provider.as_str()));
        for (who, provider) in used {
            if !self.providers.contains_key(provider) {
                bail!("'{who}' references unconfigured provider '{provider}'");
            }
        }
        Ok(())
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Load corpus files from disk and assemble the trial inputs.
    /// `root` is the directory file paths are resolved against.
    pub fn into_plan(&self, root: &Path) -> Result<BenchPlan> {
        let mut files = Vec::with_capacity(self.files.len());
        for f in &self.files {
            let full = root.join(&f.path);
            let content = std::fs::read_to_string(&full)
                .with_context(|| format!("failed to read corpus file: {}", full.display()))?;
            let name = Path::new(&f.path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| f.path.clone());
            files.push(PlanFile {
                file: Arc::new(CorpusFile {
                    path: f.path.clone(),
                    name,
                    content,
                }),
                queries: f.queries.clone(),
            });
        }
        Ok(BenchPlan {
            models: self.models.clone(),
            files,
            mode: self.mode,
            max_iterations: self.max_iterations,
            parallel: self.parallel,
            global_timeout: self.global_timeout(),
        })
    }
}
