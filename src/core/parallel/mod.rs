// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod classifier;
pub mod data_parallel;
pub mod dedup;
pub mod execution_unit;
pub mod grouping;
pub mod interval;
pub mod key_hash;

pub use classifier::{Admission, EventClassifier, SlotId, SlotScope, UnitMessage};
pub use data_parallel::DataParallelEvaluation;
pub use dedup::{MergeSummary, TaggedMatch, ToggleDeduplicator};
pub use execution_unit::{UnitMetrics, UnitMetricsSnapshot};
pub use grouping::{GroupingClassifier, GroupingGrid};
pub use interval::{IntervalClassifier, IntervalScope};
pub use key_hash::KeyHashClassifier;
