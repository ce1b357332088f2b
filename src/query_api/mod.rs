// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pattern Query API
//!
//! Declarative side of the engine: operator trees, conditions over binding
//! names and the structural rewrites applied before a tree is built.

pub mod condition;
pub mod pattern;
pub mod transformation;

pub use condition::{Bindings, CompareOp, Condition, Operand, PredicateFn};
pub use pattern::{ConsumptionPolicy, NegationRange, Pattern, PatternStructure, PrimitiveLeaf};
pub use transformation::{PatternTransformation, TransformationRule};
