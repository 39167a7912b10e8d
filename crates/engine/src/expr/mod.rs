//! Sandboxed expression language for inline bindings and mapping transforms.
//!
//! Supports literals, array/object literals, identifiers, member and index
//! access, unary `! - +`, arithmetic, comparison, equality (loose and strict),
//! `&& || ??`, the ternary operator, and a fixed set of `Math.*`/`Date.*`
//! calls. There is no assignment, no looping and no user-defined function.
//!
//! ```rust
//! use serde_json::json;
//! use tessera_engine::expr::Expression;
//!
//! let context = json!({ "data": [1, 2, 3] });
//! let value = Expression::parse("data.length > 2 ? 'many' : 'few'")?.evaluate(&context)?;
//! assert_eq!(value, Some(json!("many")));
//! # Ok::<(), tessera_engine::expr::ExprError>(())
//! ```

mod eval;
mod lexer;
mod parser;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::scope::Scope;

pub use parser::Expr;

/// Maximum nesting the parser accepts.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("unterminated string starting at {position}")]
    UnterminatedString { position: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected token '{found}' at {position}")]
    UnexpectedToken { found: String, position: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("'{0}' is not defined")]
    UnknownIdentifier(String),

    #[error("call to '{0}' is not allowed")]
    UnsupportedCall(String),

    #[error("expression nesting exceeds {MAX_EXPRESSION_DEPTH}")]
    TooDeep,
}

/// Identifier source for evaluation.
pub trait ExprContext {
    /// Value bound to a top-level identifier, or `None` when unbound.
    fn lookup(&self, name: &str) -> Option<Value>;
}

impl ExprContext for Scope {
    fn lookup(&self, name: &str) -> Option<Value> {
        Scope::lookup(self, name).cloned()
    }
}

impl ExprContext for Map<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl ExprContext for Value {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|map| map.get(name)).cloned()
    }
}

/// A parsed expression, reusable across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    ast: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = lexer::tokenize(source)?;
        let ast = parser::Parser::new(tokens).parse()?;
        Ok(Self { ast })
    }

    /// Evaluates against `context`; `Ok(None)` is the `undefined` result.
    pub fn evaluate(&self, context: &dyn ExprContext) -> Result<Option<Value>, ExprError> {
        eval::evaluate(&self.ast, context)
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }
}

/// Parses and evaluates `source` in one step.
pub fn evaluate(source: &str, context: &dyn ExprContext) -> Result<Option<Value>, ExprError> {
    Expression::parse(source)?.evaluate(context)
}
