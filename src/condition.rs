//! Condition Translation
//!
//! Translates pushed-down SQL predicates into MongoDB filter documents.
//! Translation is all-or-nothing: any part the translator cannot express
//! rejects the whole condition, and the caller falls back to an unfiltered
//! scan with server-side evaluation.

use mongodb::bson::{Bson, Document};
use tracing::debug;

/// Comparison operators the translator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn mongo_operator(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Lt => "$lt",
            CompareOp::Le => "$lte",
            CompareOp::Gt => "$gt",
            CompareOp::Ge => "$gte",
        }
    }
}

/// A condition tree offered for pushdown.
#[derive(Debug, Clone)]
pub enum Condition {
    Compare {
        field: String,
        op: CompareOp,
        value: Bson,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    In {
        field: String,
        values: Vec<Bson>,
    },
    /// A node the SQL layer produced that has no MongoDB equivalent.
    /// Carries a description for diagnostics.
    Unrecognized(String),
}

/// Marker for a condition that cannot be expressed as a MongoDB filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotRepresentable;

/// Translate a condition tree into a MongoDB filter document.
///
/// Returns `Err(NotRepresentable)` if any node of the tree cannot be
/// expressed; a partially translated filter is never produced.
pub fn translate(condition: &Condition) -> Result<Document, NotRepresentable> {
    match condition {
        Condition::Compare { field, op, value } => {
            let mut filter = Document::new();
            match op {
                // Plain equality uses the implicit form
                CompareOp::Eq => {
                    filter.insert(field.clone(), value.clone());
                }
                _ => {
                    let mut inner = Document::new();
                    inner.insert(op.mongo_operator(), value.clone());
                    filter.insert(field.clone(), inner);
                }
            }
            Ok(filter)
        }
        Condition::And(children) => {
            let mut merged = Document::new();
            for child in children {
                let translated = translate(child)?;
                for (key, value) in translated {
                    // Two constraints on the same field cannot be merged at
                    // the top level without changing semantics
                    if merged.contains_key(&key) {
                        debug!(key, "conflicting AND constraints, rejecting pushdown");
                        return Err(NotRepresentable);
                    }
                    merged.insert(key, value);
                }
            }
            Ok(merged)
        }
        Condition::Or(children) => {
            if children.is_empty() {
                return Err(NotRepresentable);
            }
            let mut branches = Vec::with_capacity(children.len());
            for child in children {
                branches.push(Bson::Document(translate(child)?));
            }
            let mut filter = Document::new();
            filter.insert("$or", Bson::Array(branches));
            Ok(filter)
        }
        Condition::In { field, values } => {
            let mut inner = Document::new();
            inner.insert("$in", Bson::Array(values.clone()));
            let mut filter = Document::new();
            filter.insert(field.clone(), inner);
            Ok(filter)
        }
        Condition::Unrecognized(what) => {
            debug!(what, "condition node not translatable");
            Err(NotRepresentable)
        }
    }
}
