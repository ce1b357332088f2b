// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structural rewrites applied to a pattern before its tree is built.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::pattern::{Pattern, PatternStructure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationRule {
    /// `And(a, And(b, c))` becomes `And(a, b, c)`
    AndAnd,
    /// `Seq(a, Seq(b, c))` becomes `Seq(a, b, c)`
    SeqSeq,
    /// `Not(Not(a))` becomes `a`
    NotNot,
    /// `Not(And(a, b))` becomes `Or(Not(a), Not(b))`
    NotAnd,
    /// `Not(Or(a, b))` becomes `And(Not(a), Not(b))`
    NotOr,
    /// A pattern with nested disjunctions is split into one pattern per
    /// alternative.
    InnerOr,
    /// A disjunction nested inside Seq/And is lifted to the root.
    TopmostOr,
}

impl TransformationRule {
    pub const DEFAULT: [TransformationRule; 3] = [
        TransformationRule::AndAnd,
        TransformationRule::SeqSeq,
        TransformationRule::NotNot,
    ];
}

/// Applies an ordered rule set until the structure stops changing.
#[derive(Debug, Clone)]
pub struct PatternTransformation {
    rules: Vec<TransformationRule>,
}

impl Default for PatternTransformation {
    fn default() -> Self {
        Self::new(TransformationRule::DEFAULT.to_vec())
    }
}

impl PatternTransformation {
    pub fn new(rules: Vec<TransformationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TransformationRule] {
        &self.rules
    }

    fn enabled(&self, rule: TransformationRule) -> bool {
        self.rules.contains(&rule)
    }

    /// Rewrite a pattern. Returns more than one pattern only when
    /// [`TransformationRule::InnerOr`] split it.
    pub fn transform(&self, pattern: &Pattern) -> Vec<Pattern> {
        let structure = self.rewrite(pattern.structure.clone());

        if self.enabled(TransformationRule::InnerOr) {
            let alternatives = alternatives(&structure);
            if alternatives.len() > 1 {
                log::debug!(
                    "Split pattern {} into {} alternatives",
                    pattern.structure,
                    alternatives.len()
                );
                return alternatives
                    .into_iter()
                    .map(|alt| {
                        let alt = self.rewrite(alt);
                        let names: BTreeSet<String> = alt
                            .positive_leaves()
                            .into_iter()
                            .chain(alt.negative_leaves())
                            .map(|l| l.name)
                            .collect();
                        let mut split = pattern.clone();
                        split.condition = pattern.condition.condition_of(&names);
                        split.structure = alt;
                        split
                    })
                    .collect();
            }
        }

        let structure = if self.enabled(TransformationRule::TopmostOr) {
            let alternatives = alternatives(&structure);
            if alternatives.len() > 1 {
                self.rewrite(PatternStructure::Or(alternatives))
            } else {
                structure
            }
        } else {
            structure
        };

        let mut transformed = pattern.clone();
        transformed.structure = structure;
        vec![transformed]
    }

    /// Local rules, applied bottom-up to a fixpoint.
    pub fn rewrite(&self, structure: PatternStructure) -> PatternStructure {
        let mut current = structure;
        loop {
            let next = self.rewrite_once(current.clone());
            if next == current {
                return next;
            }
            current = next;
        }
    }

    fn rewrite_once(&self, structure: PatternStructure) -> PatternStructure {
        use PatternStructure::*;
        match structure {
            Primitive { .. } => structure,
            Seq(args) => {
                let args = args.into_iter().map(|a| self.rewrite_once(a));
                if self.enabled(TransformationRule::SeqSeq) {
                    Seq(args
                        .flat_map(|a| match a {
                            Seq(inner) => inner,
                            other => vec![other],
                        })
                        .collect())
                } else {
                    Seq(args.collect())
                }
            }
            And(args) => {
                let args = args.into_iter().map(|a| self.rewrite_once(a));
                if self.enabled(TransformationRule::AndAnd) {
                    And(args
                        .flat_map(|a| match a {
                            And(inner) => inner,
                            other => vec![other],
                        })
                        .collect())
                } else {
                    And(args.collect())
                }
            }
            Or(args) => Or(args.into_iter().map(|a| self.rewrite_once(a)).collect()),
            Not(inner) => match *inner {
                Not(x) if self.enabled(TransformationRule::NotNot) => self.rewrite_once(*x),
                And(xs) if self.enabled(TransformationRule::NotAnd) => Or(xs
                    .into_iter()
                    .map(|x| Not(Box::new(self.rewrite_once(x))))
                    .collect()),
                Or(xs) if self.enabled(TransformationRule::NotOr) => And(xs
                    .into_iter()
                    .map(|x| Not(Box::new(self.rewrite_once(x))))
                    .collect()),
                other => Not(Box::new(self.rewrite_once(other))),
            },
        }
    }
}

// Disjunctive normal form over Seq/And/Or; negated parts are kept opaque.
fn alternatives(structure: &PatternStructure) -> Vec<PatternStructure> {
    match structure {
        PatternStructure::Primitive { .. } | PatternStructure::Not(_) => vec![structure.clone()],
        PatternStructure::Or(args) => args.iter().flat_map(alternatives).collect(),
        PatternStructure::Seq(args) | PatternStructure::And(args) => {
            let mut combos: Vec<Vec<PatternStructure>> = vec![Vec::new()];
            for arg in args {
                let options = alternatives(arg);
                combos = combos
                    .into_iter()
                    .flat_map(|prefix| {
                        options.iter().map(move |option| {
                            let mut combo = prefix.clone();
                            combo.push(option.clone());
                            combo
                        })
                    })
                    .collect();
            }
            combos
                .into_iter()
                .map(|children| match structure {
                    PatternStructure::Seq(_) => PatternStructure::Seq(children),
                    _ => PatternStructure::And(children),
                })
                .collect()
        }
    }
}
