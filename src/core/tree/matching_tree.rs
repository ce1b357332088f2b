// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental matching tree
//!
//! The tree is an arena of nodes built from a [`TreePlan`]. Leaves accept
//! events of one type, join nodes combine partial matches from their two
//! children, union nodes forward either side. Partial matches reaching the
//! root pass through the negation filters and become [`PatternMatch`]es.
//!
//! Every stored partial match satisfies `latest - earliest <= window`; stores
//! are pruned once per incoming event.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use super::negation::NegationNode;
use super::node::{Node, NodeCondition, NodeId, NodeKind};
use super::partial_match::{MatchBindings, PartialMatch, PatternMatch};
use super::plan::TreePlan;
use super::storage::StorageParams;
use crate::core::error::CepResult;
use crate::core::event::{Event, EventTypeId, Timestamp};
use crate::query_api::pattern::{Pattern, PrimitiveLeaf};

#[derive(Debug)]
struct PendingMatch {
    deadline: Timestamp,
    partial: PartialMatch,
}

/// Matching tree for one pattern.
#[derive(Debug)]
pub struct Tree {
    pattern_index: usize,
    window: Timestamp,
    plan: TreePlan,
    nodes: Vec<Node>,
    root: NodeId,
    /// Node of every positive leaf, by leaf index.
    leaf_nodes: Vec<NodeId>,
    leaves: Vec<PrimitiveLeaf>,
    leaves_by_type: HashMap<EventTypeId, Vec<usize>>,
    name_index: HashMap<String, usize>,
    must_precede: Vec<Vec<bool>>,
    negations: Vec<NegationNode>,
    negations_by_type: HashMap<EventTypeId, Vec<usize>>,
    pending: Vec<PendingMatch>,
    matches: VecDeque<PatternMatch>,
}

impl Tree {
    pub fn new(
        pattern: &Pattern,
        plan: &TreePlan,
        pattern_index: usize,
        storage: &StorageParams,
    ) -> CepResult<Self> {
        pattern.validate()?;
        let leaves = pattern.positive_leaves();
        plan.validate(leaves.len())?;

        let name_index: HashMap<String, usize> = leaves
            .iter()
            .enumerate()
            .map(|(i, l)| (l.name.clone(), i))
            .collect();
        let mut leaves_by_type: HashMap<EventTypeId, Vec<usize>> = HashMap::new();
        for (i, leaf) in leaves.iter().enumerate() {
            leaves_by_type
                .entry(leaf.event_type.clone())
                .or_default()
                .push(i);
        }
        let mut must_precede = vec![vec![false; leaves.len()]; leaves.len()];
        for (i, j) in pattern.structure.precedence_pairs() {
            must_precede[i][j] = true;
        }

        let mut nodes = Vec::new();
        let mut leaf_nodes = vec![0; leaves.len()];
        let root = add_plan(
            &mut nodes,
            &mut leaf_nodes,
            plan,
            &leaves,
            &must_precede,
            storage,
        );

        let positive_names: BTreeSet<String> = leaves.iter().map(|l| l.name.clone()).collect();
        for conjunct in pattern.condition.conjuncts() {
            let names = conjunct.names();
            if !names.is_subset(&positive_names) {
                // Reads a negated name; owned by a negation node.
                continue;
            }
            let target = lowest_covering_node(&nodes, root, &names);
            nodes[target].conditions.push(NodeCondition {
                condition: conjunct.clone(),
                names,
            });
        }

        let mut negations = Vec::new();
        let mut negations_by_type: HashMap<EventTypeId, Vec<usize>> = HashMap::new();
        for range in pattern.structure.negation_ranges()? {
            negations_by_type
                .entry(range.leaf.event_type.clone())
                .or_default()
                .push(negations.len());
            negations.push(NegationNode::new(range, &pattern.condition, &positive_names));
        }

        let tree = Self {
            pattern_index,
            window: pattern.window,
            plan: plan.clone(),
            nodes,
            root,
            leaf_nodes,
            leaves,
            leaves_by_type,
            name_index,
            must_precede,
            negations,
            negations_by_type,
            pending: Vec::new(),
            matches: VecDeque::new(),
        };
        log::debug!(
            "Built tree for pattern {} with plan {}: {}",
            pattern_index,
            tree.plan,
            tree.structure_summary()
        );
        Ok(tree)
    }

    #[inline]
    pub fn pattern_index(&self) -> usize {
        self.pattern_index
    }

    #[inline]
    pub fn plan(&self) -> &TreePlan {
        &self.plan
    }

    #[inline]
    pub fn window(&self) -> Timestamp {
        self.window
    }

    /// Feed one event to every leaf and negation node of its type.
    pub fn handle_event(&mut self, event: &Arc<Event>) -> CepResult<()> {
        self.handle_event_with(event, |_| false)
    }

    /// Like [`Tree::handle_event`], skipping positive leaves whose binding
    /// name `suppressed` reports. Negation nodes always see the event.
    pub fn handle_event_with<F>(&mut self, event: &Arc<Event>, suppressed: F) -> CepResult<()>
    where
        F: Fn(&str) -> bool,
    {
        self.advance_time(event.timestamp);
        self.play_negative(event)?;
        for leaf in self.leaves_for_type(&event.event_type) {
            if suppressed(self.leaf_name(leaf)) {
                continue;
            }
            self.play_on_leaf(leaf, event)?;
        }
        Ok(())
    }

    /// Positive leaf indices accepting `event_type`.
    pub fn leaves_for_type(&self, event_type: &str) -> Vec<usize> {
        self.leaves_by_type
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn leaf_name(&self, leaf: usize) -> &str {
        &self.leaves[leaf].name
    }

    /// Prune expired partial matches and negation history, and release
    /// pending matches whose negation deadline has passed.
    pub fn advance_time(&mut self, now: Timestamp) {
        let window = self.window;
        for node in &mut self.nodes {
            node.storage.prune(now, window);
        }
        for negation in &mut self.negations {
            negation.prune(now, window);
        }
        if self.pending.iter().any(|p| p.deadline < now) {
            let (due, waiting): (Vec<_>, Vec<_>) =
                self.pending.drain(..).partition(|p| p.deadline < now);
            self.pending = waiting;
            for pending in due {
                let matched = self.to_match(&pending.partial);
                self.matches.push_back(matched);
            }
        }
    }

    /// Offer an event to the negation nodes of its type.
    pub fn play_negative(&mut self, event: &Arc<Event>) -> CepResult<()> {
        let Some(indices) = self.negations_by_type.get(&event.event_type) else {
            return Ok(());
        };
        for &index in indices {
            let negation = &self.negations[index];
            let mut kept = Vec::with_capacity(self.pending.len());
            for pending in self.pending.drain(..) {
                if !negation.invalidates(&pending.partial, event, &self.name_index, self.window)? {
                    kept.push(pending);
                }
            }
            self.pending = kept;
            self.negations[index].record(Arc::clone(event));
        }
        Ok(())
    }

    /// Bind `event` to one positive leaf and propagate the new partial match
    /// towards the root.
    pub fn play_on_leaf(&mut self, leaf: usize, event: &Arc<Event>) -> CepResult<()> {
        let node_id = self.leaf_nodes[leaf];
        let pm = PartialMatch::single(leaf, Arc::clone(event));
        if !self.node_accepts(node_id, &pm)? {
            return Ok(());
        }
        let mut queue = VecDeque::from([(node_id, pm)]);
        while let Some((id, pm)) = queue.pop_front() {
            let Some(parent) = self.nodes[id].parent else {
                self.complete(pm)?;
                continue;
            };
            let extended = self.extend_at(parent, id, &pm)?;
            self.nodes[id].store(pm);
            queue.extend(extended.into_iter().map(|m| (parent, m)));
        }
        Ok(())
    }

    fn extend_at(
        &self,
        node_id: NodeId,
        from: NodeId,
        pm: &PartialMatch,
    ) -> CepResult<Vec<PartialMatch>> {
        let mut out = Vec::new();
        match &self.nodes[node_id].kind {
            NodeKind::Join { left, right, .. } => {
                let sibling = if *left == from { *right } else { *left };
                for other in self.nodes[sibling].storage.iter() {
                    if !self.compatible(pm, other) {
                        continue;
                    }
                    let merged = pm.merge(other);
                    if self.node_accepts(node_id, &merged)? {
                        out.push(merged);
                    }
                }
            }
            NodeKind::Union { .. } => {
                if self.node_accepts(node_id, pm)? {
                    out.push(pm.clone());
                }
            }
            NodeKind::Leaf { .. } => {}
        }
        Ok(out)
    }

    fn compatible(&self, a: &PartialMatch, b: &PartialMatch) -> bool {
        if a.span_with(b) > self.window || a.shares_event(b) {
            return false;
        }
        for (i, ea) in a.events() {
            for (j, eb) in b.events() {
                if self.must_precede[*i][*j] && !ea.precedes(eb) {
                    return false;
                }
                if self.must_precede[*j][*i] && !eb.precedes(ea) {
                    return false;
                }
            }
        }
        true
    }

    fn node_accepts(&self, node_id: NodeId, pm: &PartialMatch) -> CepResult<bool> {
        let bindings = MatchBindings {
            names: &self.name_index,
            partial: pm,
            extra: None,
        };
        self.nodes[node_id].accepts(&bindings)
    }

    // A partial match reached the root.
    fn complete(&mut self, pm: PartialMatch) -> CepResult<()> {
        let mut trailing = false;
        for negation in &self.negations {
            if negation.invalidated_by_history(&pm, &self.name_index, self.window)? {
                return Ok(());
            }
            trailing |= negation.is_trailing();
        }
        if trailing {
            self.pending.push(PendingMatch {
                deadline: pm.first_timestamp() + self.window,
                partial: pm,
            });
        } else {
            let matched = self.to_match(&pm);
            self.matches.push_back(matched);
        }
        Ok(())
    }

    fn to_match(&self, pm: &PartialMatch) -> PatternMatch {
        let bindings = pm
            .events()
            .iter()
            .map(|(leaf, event)| (self.leaves[*leaf].name.clone(), Arc::clone(event)))
            .collect();
        PatternMatch::new(self.pattern_index, bindings)
    }

    /// Drain the matches completed so far.
    pub fn get_matches(&mut self) -> Vec<PatternMatch> {
        self.matches.drain(..).collect()
    }

    /// Release every pending match as if all windows expired, then drain.
    pub fn get_last_matches(&mut self) -> Vec<PatternMatch> {
        for pending in std::mem::take(&mut self.pending) {
            let matched = self.to_match(&pending.partial);
            self.matches.push_back(matched);
        }
        self.get_matches()
    }

    /// Partial matches currently stored across all nodes.
    pub fn partial_match_count(&self) -> usize {
        self.nodes.iter().map(|n| n.storage.len()).sum()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Nested descriptor of the tree shape, e.g. `Negate(Seq(a, b), ~n)`.
    pub fn structure_summary(&self) -> String {
        let mut summary = self.describe(self.root);
        for negation in &self.negations {
            summary = format!("Negate({summary}, ~{})", negation.name());
        }
        summary
    }

    fn describe(&self, id: NodeId) -> String {
        match &self.nodes[id].kind {
            NodeKind::Leaf { name, .. } => name.clone(),
            NodeKind::Join {
                left,
                right,
                ordered,
            } => {
                let label = if *ordered { "Seq" } else { "And" };
                format!("{label}({}, {})", self.describe(*left), self.describe(*right))
            }
            NodeKind::Union { left, right } => {
                format!("Or({}, {})", self.describe(*left), self.describe(*right))
            }
        }
    }
}

fn add_plan(
    nodes: &mut Vec<Node>,
    leaf_nodes: &mut [NodeId],
    plan: &TreePlan,
    leaves: &[PrimitiveLeaf],
    must_precede: &[Vec<bool>],
    storage: &StorageParams,
) -> NodeId {
    match plan {
        TreePlan::Leaf(leaf) => {
            let primitive = &leaves[*leaf];
            let names = BTreeSet::from([primitive.name.clone()]);
            let kind = NodeKind::Leaf {
                name: primitive.name.clone(),
            };
            nodes.push(Node::new(kind, names, storage));
            let id = nodes.len() - 1;
            leaf_nodes[*leaf] = id;
            id
        }
        TreePlan::Join(l, r) | TreePlan::Union(l, r) => {
            let left = add_plan(nodes, leaf_nodes, l, leaves, must_precede, storage);
            let right = add_plan(nodes, leaf_nodes, r, leaves, must_precede, storage);
            let names: BTreeSet<String> = nodes[left]
                .names
                .union(&nodes[right].names)
                .cloned()
                .collect();
            let kind = if matches!(plan, TreePlan::Join(..)) {
                let (ll, rl) = (l.leaves(), r.leaves());
                let ordered = ll
                    .iter()
                    .any(|&i| rl.iter().any(|&j| must_precede[i][j] || must_precede[j][i]));
                NodeKind::Join {
                    left,
                    right,
                    ordered,
                }
            } else {
                NodeKind::Union { left, right }
            };
            nodes.push(Node::new(kind, names, storage));
            let id = nodes.len() - 1;
            nodes[left].parent = Some(id);
            nodes[right].parent = Some(id);
            id
        }
    }
}

// Deepest node whose names cover `names`; conjuncts without names go to the root.
fn lowest_covering_node(nodes: &[Node], root: NodeId, names: &BTreeSet<String>) -> NodeId {
    if names.is_empty() {
        return root;
    }
    let mut current = root;
    loop {
        let next = match &nodes[current].kind {
            NodeKind::Join { left, right, .. } | NodeKind::Union { left, right } => [*left, *right]
                .into_iter()
                .find(|c| names.is_subset(&nodes[*c].names)),
            NodeKind::Leaf { .. } => None,
        };
        match next {
            Some(child) => current = child,
            None => return current,
        }
    }
}
