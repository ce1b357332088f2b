// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pattern conditions
//!
//! A [`Condition`] is a boolean predicate over a partial assignment of binding
//! names to event payloads. It may only be evaluated once every name it
//! references is bound; the matching tree uses [`Condition::condition_of`] to
//! attach to each node exactly the conjuncts it can decide.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::core::error::{CepError, CepResult};
use crate::core::event::{AttributeValue, Payload};

/// Read access to bound payloads by binding name.
pub trait Bindings {
    fn payload(&self, name: &str) -> Option<&Payload>;
}

impl Bindings for HashMap<String, Payload> {
    fn payload(&self, name: &str) -> Option<&Payload> {
        self.get(name)
    }
}

impl Bindings for HashMap<&str, &Payload> {
    fn payload(&self, name: &str) -> Option<&Payload> {
        self.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Greater,
    GreaterEq,
    Smaller,
    SmallerEq,
}

impl CompareOp {
    #[inline]
    fn accepts(&self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (CompareOp::NotEq, None) => true,
            (_, None) => false,
            (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
            (CompareOp::NotEq, Some(o)) => o != Ordering::Equal,
            (CompareOp::Greater, Some(o)) => o == Ordering::Greater,
            (CompareOp::GreaterEq, Some(o)) => o != Ordering::Less,
            (CompareOp::Smaller, Some(o)) => o == Ordering::Less,
            (CompareOp::SmallerEq, Some(o)) => o != Ordering::Greater,
        }
    }

    pub const fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEq => ">=",
            CompareOp::Smaller => "<",
            CompareOp::SmallerEq => "<=",
        }
    }
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `name.attribute`
    Attribute { name: String, attribute: String },
    Constant(AttributeValue),
}

impl Operand {
    pub fn attr(name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Operand::Attribute {
            name: name.into(),
            attribute: attribute.into(),
        }
    }

    pub fn constant(value: impl Into<AttributeValue>) -> Self {
        Operand::Constant(value.into())
    }

    fn resolve<'a>(&'a self, bindings: &'a dyn Bindings) -> CepResult<&'a AttributeValue> {
        match self {
            Operand::Constant(value) => Ok(value),
            Operand::Attribute { name, attribute } => {
                let payload = bindings.payload(name).ok_or_else(|| {
                    CepError::precondition(format!(
                        "condition evaluated before '{name}' was bound"
                    ))
                })?;
                payload
                    .get(attribute)
                    .ok_or_else(|| CepError::attribute_not_found(name.as_str(), attribute.as_str()))
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Attribute { name, attribute } => write!(f, "{name}.{attribute}"),
            Operand::Constant(value) => write!(f, "{value}"),
        }
    }
}

pub type PredicateFn = Arc<dyn Fn(&dyn Bindings) -> CepResult<bool> + Send + Sync>;

/// Boolean condition over bound names.
#[derive(Clone)]
pub enum Condition {
    True,
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// Opaque user predicate; `names` must list every binding it reads.
    Predicate {
        names: Vec<String>,
        description: String,
        predicate: PredicateFn,
    },
}

impl Condition {
    pub fn compare(left: Operand, op: CompareOp, right: Operand) -> Self {
        Condition::Compare { left, op, right }
    }

    pub fn greater(left: Operand, right: Operand) -> Self {
        Self::compare(left, CompareOp::Greater, right)
    }

    pub fn smaller(left: Operand, right: Operand) -> Self {
        Self::compare(left, CompareOp::Smaller, right)
    }

    pub fn equal(left: Operand, right: Operand) -> Self {
        Self::compare(left, CompareOp::Eq, right)
    }

    pub fn predicate<F>(names: &[&str], description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&dyn Bindings) -> CepResult<bool> + Send + Sync + 'static,
    {
        Condition::Predicate {
            names: names.iter().map(|n| n.to_string()).collect(),
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Conjunction, collapsing `True` operands.
    pub fn and(self, other: Condition) -> Condition {
        let mut parts: Vec<Condition> = self.into_conjuncts();
        parts.extend(other.into_conjuncts());
        Self::from_conjuncts(parts)
    }

    pub fn is_true(&self) -> bool {
        match self {
            Condition::True => true,
            Condition::And(parts) => parts.iter().all(Condition::is_true),
            _ => false,
        }
    }

    /// Every binding name referenced by the condition.
    pub fn names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut BTreeSet<String>) {
        match self {
            Condition::True => {}
            Condition::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if let Operand::Attribute { name, .. } = operand {
                        names.insert(name.clone());
                    }
                }
            }
            Condition::And(parts) | Condition::Or(parts) => {
                parts.iter().for_each(|p| p.collect_names(names))
            }
            Condition::Not(inner) => inner.collect_names(names),
            Condition::Predicate { names: used, .. } => names.extend(used.iter().cloned()),
        }
    }

    /// Evaluate against the bindings. Every referenced name must be bound.
    pub fn eval(&self, bindings: &dyn Bindings) -> CepResult<bool> {
        match self {
            Condition::True => Ok(true),
            Condition::Compare { left, op, right } => {
                let l = left.resolve(bindings)?;
                let r = right.resolve(bindings)?;
                Ok(op.accepts(l.compare(r)))
            }
            Condition::And(parts) => {
                for part in parts {
                    if !part.eval(bindings)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(parts) => {
                for part in parts {
                    if part.eval(bindings)? {
                        return Ok(true);
                    }
                }
                Ok(parts.is_empty())
            }
            Condition::Not(inner) => Ok(!inner.eval(bindings)?),
            Condition::Predicate { predicate, .. } => predicate(bindings),
        }
    }

    /// Top-level conjuncts; `True` contributes none.
    pub fn conjuncts(&self) -> Vec<&Condition> {
        match self {
            Condition::True => Vec::new(),
            Condition::And(parts) => parts.iter().flat_map(|p| p.conjuncts()).collect(),
            other => vec![other],
        }
    }

    fn into_conjuncts(self) -> Vec<Condition> {
        match self {
            Condition::True => Vec::new(),
            Condition::And(parts) => parts.into_iter().flat_map(|p| p.into_conjuncts()).collect(),
            other => vec![other],
        }
    }

    fn from_conjuncts(mut parts: Vec<Condition>) -> Condition {
        match parts.len() {
            0 => Condition::True,
            1 => parts.remove(0),
            _ => Condition::And(parts),
        }
    }

    /// Conjunction of the conjuncts whose names are all inside `names`.
    pub fn condition_of(&self, names: &BTreeSet<String>) -> Condition {
        self.filter_conjuncts(|c| c.names().is_subset(names))
    }

    /// Conjunction of the conjuncts accepted by `keep`.
    pub fn filter_conjuncts<F>(&self, keep: F) -> Condition
    where
        F: Fn(&Condition) -> bool,
    {
        let parts = self
            .conjuncts()
            .into_iter()
            .filter(|c| keep(c))
            .cloned()
            .collect();
        Self::from_conjuncts(parts)
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::True
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Condition], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, " {sep} ")?;
        }
        write!(f, "{part}")?;
    }
    write!(f, ")")
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::True => write!(f, "true"),
            Condition::Compare { left, op, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            Condition::And(parts) => write_joined(f, parts, "and"),
            Condition::Or(parts) => write_joined(f, parts, "or"),
            Condition::Not(inner) => write!(f, "not {inner}"),
            Condition::Predicate { description, .. } => write!(f, "{description}"),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Condition({self})")
    }
}
