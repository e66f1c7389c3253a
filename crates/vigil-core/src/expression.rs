//! Compiled expressions and their evaluator.
//!
//! An `Expression` is a named tree built once per asset and evaluated many
//! times, once per event. Leaves are `Term`s: closures over a single event
//! that return an `Outcome` with trace text fixed at build time. Inner
//! nodes are combinators that decide which operands run:
//!
//! | Combinator    | Runs                                   | Succeeds when              |
//! |---------------|----------------------------------------|----------------------------|
//! | `And`         | operands in order, stops at a failure  | every operand succeeded    |
//! | `Or`          | operands in order, stops at a success  | any operand succeeded      |
//! | `Chain`       | every operand                          | always                     |
//! | `Broadcast`   | every operand                          | always                     |
//! | `Implication` | consequence only if condition succeeds | the condition succeeded    |
//!
//! `Chain` and `Broadcast` share semantics; they are kept apart so a
//! rendered tree shows sequencing of stages versus fan-out to independent
//! graph branches.

use std::fmt;
use std::sync::Arc;

use vigil_contracts::{Event, Outcome, Trace};

/// The closure a `Term` wraps.
pub type TermFn = dyn Fn(&mut Event) -> Outcome + Send + Sync;

/// A named, callable unit over one event.
#[derive(Clone)]
pub enum Expression {
    Term {
        name: String,
        op: Arc<TermFn>,
    },
    And {
        name: String,
        operands: Vec<Expression>,
    },
    Or {
        name: String,
        operands: Vec<Expression>,
    },
    Chain {
        name: String,
        operands: Vec<Expression>,
    },
    Broadcast {
        name: String,
        operands: Vec<Expression>,
    },
    Implication {
        name: String,
        condition: Box<Expression>,
        consequence: Box<Expression>,
    },
}

impl Expression {
    pub fn term<F>(name: impl Into<String>, op: F) -> Self
    where
        F: Fn(&mut Event) -> Outcome + Send + Sync + 'static,
    {
        Expression::Term {
            name: name.into(),
            op: Arc::new(op),
        }
    }

    pub fn and(name: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::And {
            name: name.into(),
            operands,
        }
    }

    pub fn or(name: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::Or {
            name: name.into(),
            operands,
        }
    }

    pub fn chain(name: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::Chain {
            name: name.into(),
            operands,
        }
    }

    pub fn broadcast(name: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::Broadcast {
            name: name.into(),
            operands,
        }
    }

    pub fn implication(name: impl Into<String>, condition: Expression, consequence: Expression) -> Self {
        Expression::Implication {
            name: name.into(),
            condition: Box::new(condition),
            consequence: Box::new(consequence),
        }
    }

    /// An expression that always succeeds and records nothing.
    pub fn noop(name: impl Into<String>) -> Self {
        Expression::and(name, Vec::new())
    }

    pub fn name(&self) -> &str {
        match self {
            Expression::Term { name, .. }
            | Expression::And { name, .. }
            | Expression::Or { name, .. }
            | Expression::Chain { name, .. }
            | Expression::Broadcast { name, .. }
            | Expression::Implication { name, .. } => name,
        }
    }

    /// Short tag for the variant, used in logs and rendered trees.
    pub fn kind(&self) -> &'static str {
        match self {
            Expression::Term { .. } => "term",
            Expression::And { .. } => "and",
            Expression::Or { .. } => "or",
            Expression::Chain { .. } => "chain",
            Expression::Broadcast { .. } => "broadcast",
            Expression::Implication { .. } => "implication",
        }
    }

    /// Direct children in evaluation order.
    pub fn operands(&self) -> Vec<&Expression> {
        match self {
            Expression::Term { .. } => Vec::new(),
            Expression::And { operands, .. }
            | Expression::Or { operands, .. }
            | Expression::Chain { operands, .. }
            | Expression::Broadcast { operands, .. } => operands.iter().collect(),
            Expression::Implication {
                condition,
                consequence,
                ..
            } => vec![condition.as_ref(), consequence.as_ref()],
        }
    }

    /// Number of terms in the tree.
    pub fn term_count(&self) -> usize {
        match self {
            Expression::Term { .. } => 1,
            _ => self.operands().iter().map(|e| e.term_count()).sum(),
        }
    }

    /// Evaluate the tree against `event`, appending one trace entry per
    /// term that runs. Returns the success flag of this expression.
    ///
    /// Evaluation never fails: an operator that cannot do its work reports
    /// a failure outcome, which only prunes the branch it belongs to.
    pub fn evaluate(&self, event: &mut Event, trace: &mut Trace) -> bool {
        match self {
            Expression::Term { name, op } => {
                let outcome = op(event);
                tracing::trace!(expression = %name, success = outcome.success, "term evaluated");
                trace.record(name, &outcome);
                outcome.success
            }

            Expression::And { operands, .. } => {
                operands.iter().all(|operand| operand.evaluate(event, trace))
            }

            Expression::Or { operands, .. } => {
                operands.iter().any(|operand| operand.evaluate(event, trace))
            }

            Expression::Chain { operands, .. } | Expression::Broadcast { operands, .. } => {
                for operand in operands {
                    operand.evaluate(event, trace);
                }
                true
            }

            Expression::Implication {
                condition,
                consequence,
                ..
            } => {
                if condition.evaluate(event, trace) {
                    consequence.evaluate(event, trace);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{} <{}>", "", self.name(), self.kind(), indent = depth * 2)?;
        for operand in self.operands() {
            operand.fmt_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Term { name, .. } => f.debug_struct("Term").field("name", name).finish(),
            _ => f
                .debug_struct("Expression")
                .field("kind", &self.kind())
                .field("name", &self.name())
                .field("operands", &self.operands())
                .finish(),
        }
    }
}

/// Renders the tree one node per line, indented by depth.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}
