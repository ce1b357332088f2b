// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use super::matching_tree::Tree;
use super::partial_match::PatternMatch;
use super::plan::TreePlanBuilder;
use super::storage::StorageParams;
use crate::core::error::{CepError, CepResult};
use crate::core::event::Event;
use crate::query_api::pattern::Pattern;

/// One statically planned tree per pattern. Matches carry the index of the
/// pattern in the order given at construction.
#[derive(Debug)]
pub struct MultiPatternTree {
    trees: Vec<Tree>,
}

impl MultiPatternTree {
    pub fn new(
        patterns: &[Pattern],
        builder: &dyn TreePlanBuilder,
        storage: &StorageParams,
    ) -> CepResult<Self> {
        if patterns.is_empty() {
            return Err(CepError::configuration("no pattern to evaluate"));
        }
        let trees = patterns
            .iter()
            .enumerate()
            .map(|(index, pattern)| {
                let plan = builder.build_plan(pattern, pattern.statistics())?;
                Tree::new(pattern, &plan, index, storage)
            })
            .collect::<CepResult<Vec<_>>>()?;
        Ok(Self { trees })
    }

    pub fn handle_event(&mut self, event: &Arc<Event>) -> CepResult<()> {
        for tree in &mut self.trees {
            tree.handle_event(event)?;
        }
        Ok(())
    }

    pub fn get_matches(&mut self) -> Vec<PatternMatch> {
        self.trees.iter_mut().flat_map(|t| t.get_matches()).collect()
    }

    pub fn get_last_matches(&mut self) -> Vec<PatternMatch> {
        self.trees
            .iter_mut()
            .flat_map(|t| t.get_last_matches())
            .collect()
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn structure_summary(&self) -> String {
        self.trees
            .iter()
            .map(Tree::structure_summary)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Payload;
    use crate::core::tree::plan::TrivialLeftDeepBuilder;
    use crate::query_api::condition::Condition;
    use crate::query_api::pattern::PatternStructure as S;

    #[test]
    fn test_matches_are_tagged_with_pattern_index() {
        let patterns = vec![
            Pattern::with_window_millis(
                S::seq(vec![S::primitive("A", "a"), S::primitive("B", "b")]),
                Condition::True,
                100,
            ),
            Pattern::with_window_millis(S::primitive("B", "b"), Condition::True, 100),
        ];
        let mut forest =
            MultiPatternTree::new(&patterns, &TrivialLeftDeepBuilder, &StorageParams::default())
                .unwrap();
        for (seq, (t, ts)) in [("A", 0), ("B", 1)].into_iter().enumerate() {
            forest
                .handle_event(&Arc::new(Event::new(t, ts, Payload::new(), seq as u64)))
                .unwrap();
        }
        let mut indices: Vec<usize> = forest
            .get_last_matches()
            .iter()
            .map(|m| m.pattern_index)
            .collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(forest.structure_summary(), "Seq(a, b); b");
    }

    #[test]
    fn test_empty_pattern_list_is_rejected() {
        assert!(
            MultiPatternTree::new(&[], &TrivialLeftDeepBuilder, &StorageParams::default()).is_err()
        );
    }
}
