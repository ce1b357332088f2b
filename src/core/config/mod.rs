// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration of evaluation runs.

pub mod evaluation_config;

pub use evaluation_config::{
    EvaluationConfig, GroupingAttribute, OptimizerConfig, OptimizerKind, ParallelConfig,
    PartitionStrategyConfig, PlanBuilderKind, SlotAssignment, StatisticsConfig, SwapPolicy,
};
