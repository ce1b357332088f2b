// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod factory;
pub mod freeze;
pub mod mechanism;

pub use factory::MechanismFactory;
pub use freeze::{build_freeze_map, FreezeGuard, FreezeMap};
pub use mechanism::{
    AdaptiveSinglePattern, EvaluationVariant, StaticMultiPattern, TreeBasedEvaluationMechanism,
};
