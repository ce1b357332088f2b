// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

use super::partial_match::{MatchBindings, PartialMatch};
use super::storage::{PartialMatchStorage, StorageParams};
use crate::core::error::CepResult;
use crate::query_api::condition::{Bindings, Condition};

pub(crate) type NodeId = usize;

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Leaf {
        name: String,
    },
    Join {
        left: NodeId,
        right: NodeId,
        /// Some precedence constraint crosses the two sides.
        ordered: bool,
    },
    Union {
        left: NodeId,
        right: NodeId,
    },
}

/// One conjunct attached to a node, with the names it reads.
#[derive(Debug, Clone)]
pub(crate) struct NodeCondition {
    pub(crate) condition: Condition,
    pub(crate) names: BTreeSet<String>,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    /// Binding names of the positive leaves below this node.
    pub(crate) names: BTreeSet<String>,
    pub(crate) conditions: Vec<NodeCondition>,
    pub(crate) storage: PartialMatchStorage,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, names: BTreeSet<String>, params: &StorageParams) -> Self {
        Self {
            kind,
            parent: None,
            names,
            conditions: Vec::new(),
            storage: PartialMatchStorage::new(params),
        }
    }

    pub(crate) fn accepts(&self, bindings: &MatchBindings<'_>) -> CepResult<bool> {
        conjuncts_hold(&self.conditions, bindings)
    }

    pub(crate) fn store(&mut self, pm: PartialMatch) {
        if self.parent.is_some() {
            self.storage.add(pm);
        }
    }
}

/// Evaluate a list of conjuncts. A conjunct reading a name the bindings do
/// not bind (the other side of a disjunction) does not apply.
pub(crate) fn conjuncts_hold(conjuncts: &[NodeCondition], bindings: &dyn Bindings) -> CepResult<bool> {
    for conjunct in conjuncts {
        if !conjunct.names.iter().all(|n| bindings.payload(n).is_some()) {
            continue;
        }
        if !conjunct.condition.eval(bindings)? {
            return Ok(false);
        }
    }
    Ok(true)
}
