// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offline statistics over a finite event slice.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::core::error::CepResult;
use crate::core::event::{Event, Payload};
use crate::query_api::condition::Condition;
use crate::query_api::pattern::{Pattern, PrimitiveLeaf};

/// Fraction of candidate events (one leaf) or event pairs (two leaves)
/// satisfying `condition`. `True` and an empty candidate set give 1.0.
pub fn condition_selectivity(
    left: &PrimitiveLeaf,
    right: &PrimitiveLeaf,
    condition: &Condition,
    events: &[Arc<Event>],
) -> CepResult<f64> {
    if condition.is_true() {
        return Ok(1.0);
    }
    let mut trials = 0u64;
    let mut hits = 0u64;

    if left == right {
        for event in events.iter().filter(|e| e.event_type == left.event_type) {
            trials += 1;
            let bindings = HashMap::from([(left.name.as_str(), &event.payload)]);
            if condition.eval(&bindings)? {
                hits += 1;
            }
        }
    } else {
        let lefts: Vec<&Payload> = of_type(events, &left.event_type);
        let rights: Vec<&Payload> = of_type(events, &right.event_type);
        let same_type = left.event_type == right.event_type;
        for (i, l) in lefts.iter().enumerate() {
            // Same type: unordered pairs of distinct events
            let candidates = if same_type { &rights[i + 1..] } else { &rights[..] };
            for r in candidates {
                trials += 1;
                let bindings = HashMap::from([(left.name.as_str(), *l), (right.name.as_str(), *r)]);
                if condition.eval(&bindings)? {
                    hits += 1;
                }
            }
        }
    }

    if trials == 0 {
        return Ok(1.0);
    }
    Ok(hits as f64 / trials as f64)
}

fn of_type<'a>(events: &'a [Arc<Event>], event_type: &str) -> Vec<&'a Payload> {
    events
        .iter()
        .filter(|e| e.event_type == event_type)
        .map(|e| &e.payload)
        .collect()
}

/// Symmetric matrix of pairwise selectivities between positive leaves; the
/// diagonal holds the unary selectivities.
pub fn selectivity_matrix(pattern: &Pattern, events: &[Arc<Event>]) -> CepResult<Vec<Vec<f64>>> {
    let leaves = pattern.positive_leaves();
    let n = leaves.len();
    let mut matrix = vec![vec![1.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let names = BTreeSet::from([leaves[i].name.clone(), leaves[j].name.clone()]);
            let condition = pattern.condition.condition_of(&names);
            let selectivity = condition_selectivity(&leaves[i], &leaves[j], &condition, events)?;
            matrix[i][j] = selectivity;
            matrix[j][i] = selectivity;
        }
    }
    Ok(matrix)
}

/// Events per second of every positive leaf's type over the slice.
pub fn arrival_rates(pattern: &Pattern, events: &[Arc<Event>]) -> Vec<f64> {
    let leaves = pattern.positive_leaves();
    let (Some(first), Some(last)) = (events.first(), events.last()) else {
        return vec![0.0; leaves.len()];
    };
    let seconds = (last.timestamp - first.timestamp) as f64 / 1000.0;
    if seconds <= 0.0 {
        return vec![0.0; leaves.len()];
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for event in events {
        *counts.entry(event.event_type.as_str()).or_default() += 1;
    }
    leaves
        .iter()
        .map(|leaf| counts.get(leaf.event_type.as_str()).copied().unwrap_or(0) as f64 / seconds)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::AttributeValue;
    use crate::query_api::condition::Operand;
    use crate::query_api::pattern::PatternStructure as S;

    fn ev(t: &str, ts: i64, x: i64, seq: u64) -> Arc<Event> {
        let mut payload = Payload::new();
        payload.insert("x".to_string(), AttributeValue::Long(x));
        Arc::new(Event::new(t, ts, payload, seq))
    }

    fn leaf(t: &str, n: &str) -> PrimitiveLeaf {
        PrimitiveLeaf {
            event_type: t.to_string(),
            name: n.to_string(),
        }
    }

    #[test]
    fn test_true_condition_and_empty_input_are_neutral() {
        let a = leaf("A", "a");
        assert_eq!(condition_selectivity(&a, &a, &Condition::True, &[]).unwrap(), 1.0);
        let cond = Condition::greater(Operand::attr("a", "x"), Operand::constant(1));
        assert_eq!(condition_selectivity(&a, &a, &cond, &[]).unwrap(), 1.0);
    }

    #[test]
    fn test_pairwise_selectivity_is_a_fraction() {
        let (a, b) = (leaf("A", "a"), leaf("B", "b"));
        let cond = Condition::smaller(Operand::attr("a", "x"), Operand::attr("b", "x"));
        let events = vec![ev("A", 0, 1, 0), ev("A", 1, 3, 1), ev("B", 2, 2, 2)];
        let s = condition_selectivity(&a, &b, &cond, &events).unwrap();
        assert!((s - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_matrix_and_rates() {
        let pattern = Pattern::with_window_millis(
            S::seq(vec![S::primitive("A", "a"), S::primitive("B", "b")]),
            Condition::greater(Operand::attr("a", "x"), Operand::constant(1)),
            1000,
        );
        let events = vec![ev("A", 0, 1, 0), ev("A", 1000, 2, 1), ev("B", 2000, 2, 2)];
        let matrix = selectivity_matrix(&pattern, &events).unwrap();
        assert!((matrix[0][0] - 0.5).abs() < 1e-9);
        assert_eq!(matrix[1][1], 1.0);
        assert_eq!(matrix[0][1], matrix[1][0]);
        for row in &matrix {
            assert!(row.iter().all(|s| (0.0..=1.0).contains(s)));
        }
        assert_eq!(arrival_rates(&pattern, &events), vec![1.0, 0.5]);
        assert_eq!(arrival_rates(&pattern, &[]), vec![0.0, 0.0]);
    }
}
