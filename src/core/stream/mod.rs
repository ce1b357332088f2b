// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod stream_channel;

pub use self::stream_channel::{Stream, StreamIter};

use crate::core::tree::PatternMatch;

/// Raw records fed to an evaluation.
pub type InputStream = Stream<String>;

/// Completed matches produced by an evaluation.
pub type OutputStream = Stream<PatternMatch>;
