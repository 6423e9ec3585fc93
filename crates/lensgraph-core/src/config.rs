use crate::error::{LensGraphError, Result};
use crate::features::DatasetConfig;
use crate::fetch::FetchConfig;
use crate::probe::ProbeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the upstream API lives and how to authenticate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// GraphQL endpoint URL.
    pub endpoint: String,

    /// Name of the environment variable holding a bearer token, if any.
    pub bearer_env: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.lens.dev/graphql".to_string(),
            bearer_env: Some("LENSGRAPH_TOKEN".to_string()),
        }
    }
}

/// Bounds on one collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Accounts fetched from the account listing. Default: 500.
    pub max_accounts: usize,

    /// Posts fetched from the post listing. Default: 2000.
    pub max_posts: usize,

    /// Following edges fetched per collected account. Default: 1000.
    pub follows_per_account: usize,

    /// Posts (in listing order) used as probe seeds. Zero skips probing.
    pub probe_seed_posts: usize,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            max_accounts: 500,
            max_posts: 2000,
            follows_per_account: 1000,
            probe_seed_posts: 100,
        }
    }
}

impl CollectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_accounts(mut self, max: usize) -> Self {
        self.max_accounts = max;
        self
    }

    pub fn with_max_posts(mut self, max: usize) -> Self {
        self.max_posts = max;
        self
    }

    pub fn with_follows_per_account(mut self, max: usize) -> Self {
        self.follows_per_account = max;
        self
    }

    pub fn with_probe_seed_posts(mut self, count: usize) -> Self {
        self.probe_seed_posts = count;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, cap) in [
            ("max_accounts", self.max_accounts),
            ("max_posts", self.max_posts),
            ("follows_per_account", self.follows_per_account),
        ] {
            if cap == 0 {
                return Err(LensGraphError::Validation(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

/// Everything a pipeline run needs. Every section falls back to defaults, so
/// an empty TOML file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root for snapshots, checkpoints, graphs and datasets.
    pub data_dir: PathBuf,
    pub upstream: UpstreamConfig,
    pub fetch: FetchConfig,
    pub probe: ProbeConfig,
    pub collect: CollectConfig,
    pub dataset: DatasetConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            upstream: UpstreamConfig::default(),
            fetch: FetchConfig::default(),
            probe: ProbeConfig::default(),
            collect: CollectConfig::default(),
            dataset: DatasetConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn graph_dir(&self) -> PathBuf {
        self.data_dir.join("graph")
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.data_dir.join("dataset")
    }

    pub fn sink_path(&self) -> PathBuf {
        self.data_dir.join("sink.redb")
    }

    /// Every problem found, one message per section.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.upstream.endpoint.trim().is_empty() {
            problems.push("upstream.endpoint must not be empty".to_string());
        }
        if is_blank(&self.data_dir) {
            problems.push("data_dir must not be empty".to_string());
        }
        for (section, result) in [
            ("fetch", self.fetch.validate()),
            ("probe", self.probe.validate()),
            ("collect", self.collect.validate()),
            ("dataset", self.dataset.validate()),
        ] {
            if let Err(e) = result {
                problems.push(format!("{}: {}", section, e));
            }
        }
        problems
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(LensGraphError::Config(problems.join("; ")))
        }
    }
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchPolicy;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_paths_live_under_data_dir() {
        let config = PipelineConfig::new().with_data_dir("/tmp/lg");
        assert_eq!(config.snapshots_dir(), PathBuf::from("/tmp/lg/snapshots"));
        assert_eq!(config.graph_dir(), PathBuf::from("/tmp/lg/graph"));
    }

    #[test]
    fn test_problems_are_collected_per_section() {
        let mut config = PipelineConfig::default();
        config.fetch = config.fetch.with_page_size(0);
        config.probe = config.probe.with_workers(0);
        config.dataset.test_ratio = 1.5;

        let problems = config.problems();
        assert_eq!(problems.len(), 3);
        assert!(problems[0].starts_with("fetch:"));
        assert!(matches!(config.validate(), Err(LensGraphError::Config(_))));
    }

    #[test]
    fn test_zero_collection_cap_is_a_problem() {
        let mut config = PipelineConfig::default();
        config.collect = config.collect.with_max_posts(0).with_probe_seed_posts(0);

        let problems = config.problems();
        assert_eq!(problems, vec!["collect: Validation error: max_posts must be > 0".to_string()]);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"collect": {"max_accounts": 7}, "fetch": {"shapes": {"following": {"max_retries": 1}}}}"#,
        )
        .unwrap();
        assert_eq!(config.collect.max_accounts, 7);
        assert_eq!(config.collect.max_posts, 2000);
        assert_eq!(config.fetch.shapes["following"].max_retries, 1);
        assert_eq!(config.fetch.shapes["following"].min_interval_ms, FetchPolicy::default().min_interval_ms);
        assert!(config.validate().is_ok());
    }
}
