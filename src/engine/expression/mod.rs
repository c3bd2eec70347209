//! Answer-logic DSL: parser, evaluator, and piping
//!
//! Expressions are shared by reference from pages, groups, questions,
//! options, jumps, and quota buckets. Evaluation never errors toward
//! callers; faults collapse to false.

pub mod ast;
pub mod eval;
pub mod parser;
pub mod piping;

pub use ast::Expr;
pub use eval::{evaluate, evaluate_bool, EvalContext};
pub use parser::{parse, ParseError};
pub use piping::interpolate;
