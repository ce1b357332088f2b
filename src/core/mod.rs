// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod config;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod optimizer;
pub mod parallel;
pub mod statistics;
pub mod stream;
pub mod tree;
