// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tree-based incremental matching
//!
//! - [`Tree`]: the matching tree of one pattern
//! - [`MultiPatternTree`]: static evaluation of several patterns
//! - [`TreePlan`] and [`TreePlanBuilder`]: join shapes the trees are built from

pub mod matching_tree;
pub mod multi_pattern;
mod negation;
mod node;
pub mod partial_match;
pub mod plan;
pub mod storage;

pub use matching_tree::Tree;
pub use multi_pattern::MultiPatternTree;
pub use partial_match::{MatchIdentity, PartialMatch, PatternMatch};
pub use plan::{AscendingFrequencyBuilder, TreePlan, TreePlanBuilder, TrivialLeftDeepBuilder};
pub use storage::{PartialMatchStorage, StorageParams};
