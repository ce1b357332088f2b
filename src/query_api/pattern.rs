// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pattern definitions
//!
//! A [`Pattern`] is an operator tree ([`PatternStructure`]) over primitive
//! leaves, one [`Condition`] over the leaf binding names and a time window.
//!
//! Positive leaves are numbered `0..n` in declaration order (depth first,
//! negated primitives skipped). The matching tree, the statistics collectors
//! and the optimizers all refer to leaves by that index.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::Duration;

use super::condition::Condition;
use crate::core::error::{CepError, CepResult};
use crate::core::event::{EventTypeId, Timestamp};
use crate::core::statistics::StatisticsSnapshot;

/// Operator tree of a pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternStructure {
    Primitive { event_type: EventTypeId, name: String },
    Seq(Vec<PatternStructure>),
    And(Vec<PatternStructure>),
    Or(Vec<PatternStructure>),
    Not(Box<PatternStructure>),
}

/// A primitive leaf of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimitiveLeaf {
    pub event_type: EventTypeId,
    pub name: String,
}

/// Where a negated primitive must not appear, relative to the positive leaves
/// of the same match.
#[derive(Debug, Clone, PartialEq)]
pub struct NegationRange {
    pub leaf: PrimitiveLeaf,
    /// The negated event only counts after every one of these leaves.
    /// Empty: from `latest - window`.
    pub after: Vec<usize>,
    /// The negated event only counts before every one of these leaves.
    /// Empty: until `earliest + window`, so the verdict waits for the window.
    pub before: Vec<usize>,
}

impl NegationRange {
    #[inline]
    pub fn is_trailing(&self) -> bool {
        self.before.is_empty()
    }
}

impl PatternStructure {
    pub fn primitive(event_type: impl Into<EventTypeId>, name: impl Into<String>) -> Self {
        PatternStructure::Primitive {
            event_type: event_type.into(),
            name: name.into(),
        }
    }

    pub fn seq(args: Vec<PatternStructure>) -> Self {
        PatternStructure::Seq(args)
    }

    pub fn and(args: Vec<PatternStructure>) -> Self {
        PatternStructure::And(args)
    }

    pub fn or(args: Vec<PatternStructure>) -> Self {
        PatternStructure::Or(args)
    }

    pub fn not(arg: PatternStructure) -> Self {
        PatternStructure::Not(Box::new(arg))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, PatternStructure::Primitive { .. })
    }

    pub fn children(&self) -> &[PatternStructure] {
        match self {
            PatternStructure::Seq(args)
            | PatternStructure::And(args)
            | PatternStructure::Or(args) => args,
            PatternStructure::Not(inner) => std::slice::from_ref(inner.as_ref()),
            PatternStructure::Primitive { .. } => &[],
        }
    }

    /// Positive primitives in declaration order.
    pub fn positive_leaves(&self) -> Vec<PrimitiveLeaf> {
        let mut leaves = Vec::new();
        self.collect_leaves(false, &mut leaves);
        leaves
    }

    /// Negated primitives in declaration order.
    pub fn negative_leaves(&self) -> Vec<PrimitiveLeaf> {
        let mut leaves = Vec::new();
        self.collect_leaves(true, &mut leaves);
        leaves
    }

    fn collect_leaves(&self, negated: bool, out: &mut Vec<PrimitiveLeaf>) {
        match self {
            PatternStructure::Primitive { event_type, name } => {
                if !negated {
                    out.push(PrimitiveLeaf {
                        event_type: event_type.clone(),
                        name: name.clone(),
                    })
                }
            }
            PatternStructure::Not(inner) => {
                if negated {
                    inner.collect_all(out)
                }
            }
            other => other
                .children()
                .iter()
                .for_each(|c| c.collect_leaves(negated, out)),
        }
    }

    fn collect_all(&self, out: &mut Vec<PrimitiveLeaf>) {
        match self {
            PatternStructure::Primitive { event_type, name } => out.push(PrimitiveLeaf {
                event_type: event_type.clone(),
                name: name.clone(),
            }),
            other => other.children().iter().for_each(|c| c.collect_all(out)),
        }
    }

    pub fn contains_negation(&self) -> bool {
        match self {
            PatternStructure::Not(_) => true,
            other => other.children().iter().any(|c| c.contains_negation()),
        }
    }

    pub fn contains_or(&self) -> bool {
        match self {
            PatternStructure::Or(_) => true,
            other => other.children().iter().any(|c| c.contains_or()),
        }
    }

    /// The structure with every negated sub-structure removed; `None` if
    /// nothing positive is left.
    pub fn positive_structure(&self) -> Option<PatternStructure> {
        match self {
            PatternStructure::Primitive { .. } => Some(self.clone()),
            PatternStructure::Not(_) => None,
            PatternStructure::Seq(args) | PatternStructure::And(args) | PatternStructure::Or(args) => {
                let mut kept: Vec<PatternStructure> =
                    args.iter().filter_map(|a| a.positive_structure()).collect();
                match kept.len() {
                    0 => None,
                    1 => kept.pop(),
                    _ => Some(match self {
                        PatternStructure::Seq(_) => PatternStructure::Seq(kept),
                        PatternStructure::And(_) => PatternStructure::And(kept),
                        _ => PatternStructure::Or(kept),
                    }),
                }
            }
        }
    }

    /// Flattened linear sequences of binding names: a Seq concatenates its
    /// children's sequences (cartesian over alternatives), And/Or contribute
    /// each child's sequences separately, negations contribute nothing.
    pub fn flat_sequences(&self) -> Vec<Vec<String>> {
        match self {
            PatternStructure::Primitive { name, .. } => vec![vec![name.clone()]],
            PatternStructure::Not(_) => Vec::new(),
            PatternStructure::And(args) | PatternStructure::Or(args) => {
                args.iter().flat_map(|a| a.flat_sequences()).collect()
            }
            PatternStructure::Seq(args) => {
                let mut acc: Vec<Vec<String>> = vec![Vec::new()];
                for arg in args {
                    let parts = arg.flat_sequences();
                    if parts.is_empty() {
                        continue;
                    }
                    acc = acc
                        .iter()
                        .flat_map(|prefix| {
                            parts.iter().map(move |part| {
                                let mut seq = prefix.clone();
                                seq.extend(part.iter().cloned());
                                seq
                            })
                        })
                        .collect();
                }
                acc.retain(|s| !s.is_empty());
                acc
            }
        }
    }

    /// Pairs `(i, j)` of positive leaf indices where leaf `i` must occur
    /// before leaf `j`.
    pub fn precedence_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        let mut next = 0usize;
        self.collect_precedence(&mut next, &mut pairs);
        pairs
    }

    // Returns the positive leaf indices below `self`.
    fn collect_precedence(&self, next: &mut usize, pairs: &mut Vec<(usize, usize)>) -> Vec<usize> {
        match self {
            PatternStructure::Primitive { .. } => {
                let index = *next;
                *next += 1;
                vec![index]
            }
            PatternStructure::Not(_) => Vec::new(),
            PatternStructure::Seq(args) => {
                let groups: Vec<Vec<usize>> = args
                    .iter()
                    .map(|a| a.collect_precedence(next, pairs))
                    .collect();
                for (k, earlier) in groups.iter().enumerate() {
                    for later in &groups[k + 1..] {
                        for &i in earlier {
                            for &j in later {
                                pairs.push((i, j));
                            }
                        }
                    }
                }
                groups.into_iter().flatten().collect()
            }
            PatternStructure::And(args) | PatternStructure::Or(args) => args
                .iter()
                .flat_map(|a| a.collect_precedence(next, pairs))
                .collect(),
        }
    }

    /// Time range of every negated primitive.
    pub fn negation_ranges(&self) -> CepResult<Vec<NegationRange>> {
        let mut ranges = Vec::new();
        let mut next = 0usize;
        self.collect_negations(&[], &[], false, &mut next, &mut ranges)?;
        Ok(ranges)
    }

    fn collect_negations(
        &self,
        after: &[usize],
        before: &[usize],
        under_or: bool,
        next: &mut usize,
        out: &mut Vec<NegationRange>,
    ) -> CepResult<Vec<usize>> {
        match self {
            PatternStructure::Primitive { .. } => {
                let index = *next;
                *next += 1;
                Ok(vec![index])
            }
            PatternStructure::Not(inner) => {
                if under_or {
                    return Err(CepError::unsupported_pattern(format!(
                        "negation inside a disjunction: {self}"
                    )));
                }
                match inner.as_ref() {
                    PatternStructure::Primitive { event_type, name } => {
                        out.push(NegationRange {
                            leaf: PrimitiveLeaf {
                                event_type: event_type.clone(),
                                name: name.clone(),
                            },
                            after: after.to_vec(),
                            before: before.to_vec(),
                        });
                        Ok(Vec::new())
                    }
                    other => Err(CepError::unsupported_pattern(format!(
                        "only primitive events can be negated, found {other}"
                    ))),
                }
            }
            PatternStructure::Seq(args) => {
                // Leaf indices are assigned in declaration order, so compute
                // every child's positive leaves before resolving neighbours.
                let start = *next;
                let mut spans = Vec::with_capacity(args.len());
                let mut cursor = start;
                for arg in args {
                    let count = arg.positive_leaves().len();
                    spans.push((cursor..cursor + count).collect::<Vec<usize>>());
                    cursor += count;
                }
                let mut all = Vec::new();
                for (k, arg) in args.iter().enumerate() {
                    let prev = spans[..k]
                        .iter()
                        .rev()
                        .find(|s| !s.is_empty())
                        .map(Vec::as_slice)
                        .unwrap_or(after);
                    let following = spans[k + 1..]
                        .iter()
                        .find(|s| !s.is_empty())
                        .map(Vec::as_slice)
                        .unwrap_or(before);
                    all.extend(arg.collect_negations(prev, following, under_or, next, out)?);
                }
                Ok(all)
            }
            PatternStructure::And(args) => {
                let mut all = Vec::new();
                for arg in args {
                    all.extend(arg.collect_negations(after, before, under_or, next, out)?);
                }
                Ok(all)
            }
            PatternStructure::Or(args) => {
                let mut all = Vec::new();
                for arg in args {
                    all.extend(arg.collect_negations(after, before, true, next, out)?);
                }
                Ok(all)
            }
        }
    }
}

impl fmt::Display for PatternStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, args) = match self {
            PatternStructure::Primitive { event_type, name } => {
                return write!(f, "{event_type} {name}")
            }
            PatternStructure::Not(inner) => return write!(f, "Not({inner})"),
            PatternStructure::Seq(args) => ("Seq", args),
            PatternStructure::And(args) => ("And", args),
            PatternStructure::Or(args) => ("Or", args),
        };
        write!(f, "{label}(")?;
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

/// Consumption policy of a pattern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumptionPolicy {
    /// Binding names whose arrival freezes the start of new sequences until
    /// the freezer is matched or expires.
    pub freeze_names: Vec<String>,
}

impl ConsumptionPolicy {
    pub fn freeze(names: &[&str]) -> Self {
        Self {
            freeze_names: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// A pattern to be matched.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub structure: PatternStructure,
    pub condition: Condition,
    /// Window in milliseconds
    pub window: Timestamp,
    pub consumption_policy: Option<ConsumptionPolicy>,
    statistics: Option<StatisticsSnapshot>,
}

impl Pattern {
    pub fn new(structure: PatternStructure, condition: Condition, window: Duration) -> Self {
        Self::with_window_millis(structure, condition, window.as_millis() as Timestamp)
    }

    pub fn with_window_millis(
        structure: PatternStructure,
        condition: Condition,
        window: Timestamp,
    ) -> Self {
        Self {
            structure,
            condition,
            window,
            consumption_policy: None,
            statistics: None,
        }
    }

    pub fn with_consumption_policy(mut self, policy: ConsumptionPolicy) -> Self {
        self.consumption_policy = Some(policy);
        self
    }

    /// Attach (or refresh) externally computed statistics.
    pub fn set_statistics(&mut self, statistics: StatisticsSnapshot) {
        self.statistics = Some(statistics);
    }

    pub fn statistics(&self) -> Option<&StatisticsSnapshot> {
        self.statistics.as_ref()
    }

    pub fn positive_leaves(&self) -> Vec<PrimitiveLeaf> {
        self.structure.positive_leaves()
    }

    /// True if some negated event is only bounded by `first + window`, so
    /// a match cannot be confirmed before a full window after its start.
    pub fn has_trailing_negation(&self) -> bool {
        self.structure
            .negation_ranges()
            .map(|ranges| ranges.iter().any(NegationRange::is_trailing))
            .unwrap_or(false)
    }

    /// True if some negated event is only bounded by `last - window`, so
    /// a blocker may precede every positive event of the match.
    pub fn has_leading_negation(&self) -> bool {
        self.structure
            .negation_ranges()
            .map(|ranges| ranges.iter().any(|r| r.after.is_empty()))
            .unwrap_or(false)
    }

    pub fn freeze_names(&self) -> &[String] {
        self.consumption_policy
            .as_ref()
            .map(|p| p.freeze_names.as_slice())
            .unwrap_or(&[])
    }

    pub fn validate_window(&self) -> CepResult<()> {
        if self.window <= 0 {
            return Err(CepError::configuration_with_key(
                format!("pattern window must be positive, got {}ms", self.window),
                "pattern.window",
            ));
        }
        Ok(())
    }

    /// Structural checks performed before a tree is built for the pattern.
    pub fn validate(&self) -> CepResult<()> {
        self.validate_window()?;
        let positive = self.structure.positive_leaves();
        if positive.is_empty() {
            return Err(CepError::unsupported_pattern(format!(
                "pattern has no positive event: {}",
                self.structure
            )));
        }
        let negative = self.structure.negative_leaves();
        let mut seen = HashSet::new();
        for leaf in positive.iter().chain(negative.iter()) {
            if !seen.insert(leaf.name.as_str()) {
                return Err(CepError::unsupported_pattern(format!(
                    "binding name '{}' is used twice",
                    leaf.name
                )));
            }
        }
        // Reports misplaced negations.
        self.structure.negation_ranges()?;

        let negative_names: BTreeSet<String> = negative.iter().map(|l| l.name.clone()).collect();
        for name in self.condition.names() {
            if !seen.contains(name.as_str()) {
                return Err(CepError::unsupported_pattern(format!(
                    "condition references unknown binding '{name}'"
                )));
            }
        }
        for conjunct in self.condition.conjuncts() {
            let negated = conjunct.names().intersection(&negative_names).count();
            if negated > 1 {
                return Err(CepError::unsupported_pattern(format!(
                    "condition '{conjunct}' relates two negated events"
                )));
            }
        }
        for freezer in self.freeze_names() {
            if !positive.iter().any(|l| &l.name == freezer) {
                return Err(CepError::configuration_with_key(
                    format!("freeze name '{freezer}' is not a positive binding"),
                    "pattern.consumption_policy",
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PATTERN {} WHERE {} WITHIN {}ms",
            self.structure, self.condition, self.window
        )
    }
}
