// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Evaluation Configuration
//!
//! Typed configuration of an evaluation run, loadable from TOML, YAML or
//! JSON. Every section has defaults, so a file only lists what it changes:
//!
//! ```toml
//! swap_policy = "drain_old_tree"
//!
//! [storage]
//! sort_storage = true
//!
//! [optimizer]
//! kind = "statistics_deviation"
//! deviation_threshold = 0.3
//!
//! [parallel]
//! units = 4
//!
//! [parallel.strategy]
//! type = "interval"
//! interval_ms = 600000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{CepError, CepResult};
use crate::core::event::Timestamp;
use crate::core::tree::storage::StorageParams;
use crate::query_api::transformation::TransformationRule;

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub swap_policy: SwapPolicy,
    /// Rewrites applied to every pattern before its tree is built.
    pub pattern_rules: Vec<TransformationRule>,
    pub storage: StorageParams,
    pub statistics: StatisticsConfig,
    pub optimizer: OptimizerConfig,
    pub parallel: ParallelConfig,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            swap_policy: SwapPolicy::default(),
            pattern_rules: TransformationRule::DEFAULT.to_vec(),
            storage: StorageParams::default(),
            statistics: StatisticsConfig::default(),
            optimizer: OptimizerConfig::default(),
            parallel: ParallelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Event-time span between two optimizer consultations.
    pub update_window_ms: Timestamp,
    /// Event-time span arrival rates are measured over. Defaults to the
    /// update window.
    pub horizon_ms: Option<Timestamp>,
    /// Recent events kept per leaf for selectivity sampling.
    pub sample_size: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            update_window_ms: 60_000,
            horizon_ms: None,
            sample_size: 64,
        }
    }
}

impl StatisticsConfig {
    pub fn horizon(&self) -> Timestamp {
        self.horizon_ms.unwrap_or(self.update_window_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Static,
    Trivial,
    StatisticsDeviation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanBuilderKind {
    TrivialLeftDeep,
    #[default]
    AscendingFrequency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub plan_builder: PlanBuilderKind,
    /// Relative change that triggers a rebuild (`statistics_deviation` only).
    pub deviation_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Static,
            plan_builder: PlanBuilderKind::AscendingFrequency,
            deviation_threshold: 0.5,
        }
    }
}

/// What happens to in-flight partial matches when the tree is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPolicy {
    /// The new tree starts empty; matches spanning the swap may be lost.
    #[default]
    DropOnSwap,
    /// The old tree keeps running until its window drains and contributes
    /// the matches that started before the swap.
    DrainOldTree,
}

/// How interval slots are mapped onto units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotAssignment {
    /// Slot `j` runs on unit `j mod N`.
    #[default]
    Modulo,
    /// Slots claim an idle unit and release it when they close.
    FreePool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingAttribute {
    pub event_type: String,
    pub attribute: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionStrategyConfig {
    KeyHash {
        key: String,
    },
    Interval {
        interval_ms: Timestamp,
        #[serde(default)]
        assignment: SlotAssignment,
    },
    /// One grid dimension per listed event type, in order.
    Grouping {
        attributes: Vec<GroupingAttribute>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub units: usize,
    pub inbox_capacity: usize,
    pub strategy: Option<PartitionStrategyConfig>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            units: num_cpus::get(),
            inbox_capacity: 1024,
            strategy: None,
        }
    }
}

impl EvaluationConfig {
    pub fn from_toml_str(content: &str) -> CepResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CepError::configuration(format!("invalid TOML configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> CepResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| CepError::configuration(format!("invalid YAML configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> CepResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| CepError::configuration(format!("invalid JSON configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> CepResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        log::info!("Loading evaluation configuration from {}", path.display());
        match extension.as_deref() {
            Some("toml") => Self::from_toml_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(CepError::configuration(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    pub fn to_toml_string(&self) -> CepResult<String> {
        toml::to_string(self)
            .map_err(|e| CepError::format_with_source("cannot serialize configuration", Box::new(e)))
    }

    pub fn validate(&self) -> CepResult<()> {
        if self.statistics.update_window_ms <= 0 {
            return Err(CepError::configuration_with_key(
                "statistics update window must be positive",
                "statistics.update_window_ms",
            ));
        }
        if self.statistics.horizon() <= 0 {
            return Err(CepError::configuration_with_key(
                "statistics horizon must be positive",
                "statistics.horizon_ms",
            ));
        }
        if self.statistics.sample_size == 0 {
            return Err(CepError::configuration_with_key(
                "statistics sample size must be at least 1",
                "statistics.sample_size",
            ));
        }
        let threshold = self.optimizer.deviation_threshold;
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(CepError::configuration_with_key(
                format!("deviation threshold must be a non-negative number, got {threshold}"),
                "optimizer.deviation_threshold",
            ));
        }
        self.parallel.validate()
    }
}

impl ParallelConfig {
    pub fn validate(&self) -> CepResult<()> {
        if self.units == 0 {
            return Err(CepError::configuration_with_key(
                "at least one execution unit is required",
                "parallel.units",
            ));
        }
        if self.inbox_capacity == 0 {
            return Err(CepError::configuration_with_key(
                "inbox capacity must be at least 1",
                "parallel.inbox_capacity",
            ));
        }
        match &self.strategy {
            None => Ok(()),
            Some(PartitionStrategyConfig::KeyHash { key }) if key.is_empty() => {
                Err(CepError::configuration_with_key(
                    "partition key must not be empty",
                    "parallel.strategy.key",
                ))
            }
            Some(PartitionStrategyConfig::Interval { interval_ms, .. }) if *interval_ms <= 0 => {
                Err(CepError::configuration_with_key(
                    "interval must be positive",
                    "parallel.strategy.interval_ms",
                ))
            }
            Some(PartitionStrategyConfig::Grouping { attributes }) => {
                if attributes.is_empty() {
                    return Err(CepError::configuration_with_key(
                        "grouping needs at least one attribute",
                        "parallel.strategy.attributes",
                    ));
                }
                for (i, a) in attributes.iter().enumerate() {
                    if attributes[..i].iter().any(|b| b.event_type == a.event_type) {
                        return Err(CepError::configuration_with_key(
                            format!("event type '{}' is grouped twice", a.event_type),
                            "parallel.strategy.attributes",
                        ));
                    }
                }
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }
}
