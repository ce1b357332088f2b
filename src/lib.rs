// SPDX-License-Identifier: MIT OR Apache-2.0

//! # PatternFlux
//!
//! Tree-based complex event processing. Patterns built from sequences,
//! conjunctions, disjunctions and negations over typed events are matched
//! incrementally against a stream, either on a single thread
//! ([`TreeBasedEvaluationMechanism`]) or across N units that partition the
//! stream by key, by time interval or by attribute groups
//! ([`DataParallelEvaluation`]).
//!
//! ```no_run
//! use patternflux_rust::prelude::*;
//! use std::time::Duration;
//!
//! let pattern = Pattern::new(
//!     PatternStructure::seq(vec![
//!         PatternStructure::primitive("AAPL", "a"),
//!         PatternStructure::primitive("AMZN", "b"),
//!     ]),
//!     Condition::smaller(Operand::attr("a", "PeakPrice"), Operand::attr("b", "PeakPrice")),
//!     Duration::from_secs(300),
//! );
//! let mut mechanism = MechanismFactory::single(pattern, EvaluationConfig::default())?.build()?;
//! let input = InputStream::from_items("input", Vec::<String>::new());
//! let output = OutputStream::new("output");
//! mechanism.evaluate(&input, &output, &CsvDataFormatter::metastock())?;
//! # Ok::<(), CepError>(())
//! ```

pub mod core;
pub mod query_api;

pub use crate::core::config::EvaluationConfig;
pub use crate::core::error::{CepError, CepResult};
pub use crate::core::evaluation::{MechanismFactory, TreeBasedEvaluationMechanism};
pub use crate::core::parallel::DataParallelEvaluation;

pub mod prelude {
    pub use crate::core::config::{
        EvaluationConfig, GroupingAttribute, OptimizerKind, ParallelConfig,
        PartitionStrategyConfig, PlanBuilderKind, SlotAssignment, SwapPolicy,
    };
    pub use crate::core::error::{CepError, CepResult};
    pub use crate::core::evaluation::{MechanismFactory, TreeBasedEvaluationMechanism};
    pub use crate::core::event::{
        AttributeValue, CsvDataFormatter, DataFormatter, Event, JsonDataFormatter, Payload,
        Timestamp,
    };
    pub use crate::core::parallel::DataParallelEvaluation;
    pub use crate::core::stream::{InputStream, OutputStream, Stream};
    pub use crate::core::tree::PatternMatch;
    pub use crate::query_api::{
        Condition, ConsumptionPolicy, Operand, Pattern, PatternStructure, TransformationRule,
    };
}
