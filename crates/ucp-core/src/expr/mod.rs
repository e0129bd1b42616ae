//! Condition expressions
//!
//! A small, bounded grammar for `run_condition`, `skip_condition` and
//! `Conditional.condition`:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := operand ( ("=="|"!="|">"|">="|"<"|"<="|"contains"|"in") operand )?
//! operand := literal | path | "(" expr ")" | "exists" "(" path ")"
//! literal := number | 'text' | "text" | true | false | null
//! ```
//!
//! There are no function calls, assignments or loops; evaluation always
//! terminates in time linear in the expression size.

mod eval;
mod lexer;
mod parser;

use serde_json::Value;

use crate::errors::UcpError;
use crate::model::Condition;
use crate::path::{RefPath, Scope};

pub use eval::{is_truthy, values_equal};

/// Longest accepted expression unless the caller configures otherwise
pub const DEFAULT_MAX_EXPRESSION_LEN: usize = 4096;

/// Deepest accepted nesting of `(`, `!` and binary chains
pub const MAX_EXPRESSION_NESTING: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    In,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(RefPath),
    Exists(RefPath),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parse an expression, rejecting inputs longer than `max_len` bytes.
    ///
    /// ## Errors
    ///
    /// Returns `UcpError::ConditionSyntax` on lexical or grammatical errors,
    /// over-long input, or nesting deeper than `MAX_EXPRESSION_NESTING`.
    pub fn parse(source: &str, max_len: usize) -> Result<Self, UcpError> {
        let syntax = |reason: String| UcpError::ConditionSyntax {
            expression: truncate(source),
            reason,
        };
        if source.len() > max_len {
            return Err(syntax(format!(
                "expression is {} bytes, limit is {}",
                source.len(),
                max_len
            )));
        }
        let tokens = lexer::tokenize(source).map_err(syntax)?;
        parser::parse(tokens).map_err(syntax)
    }

    /// Evaluate to a JSON value
    pub fn evaluate(&self, scope: &dyn Scope) -> Value {
        eval::evaluate(self, scope)
    }

    /// Evaluate and apply truthiness
    pub fn test(&self, scope: &dyn Scope) -> bool {
        is_truthy(&self.evaluate(scope))
    }
}

/// Evaluate a packet condition
///
/// ## Errors
///
/// Returns `UcpError::ConditionSyntax` if an expression string does not
/// parse. Validated packets never hit this path.
pub fn evaluate_condition(
    condition: &Condition,
    scope: &dyn Scope,
    max_len: usize,
) -> Result<bool, UcpError> {
    match condition {
        Condition::Literal(b) => Ok(*b),
        Condition::Expression(source) => Ok(Expr::parse(source, max_len)?.test(scope)),
    }
}

fn truncate(source: &str) -> String {
    const SHOWN: usize = 80;
    if source.len() <= SHOWN {
        return source.to_string();
    }
    let mut end = SHOWN;
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &source[..end])
}
