//! Expression AST
//!
//! The DSL is small and total: literals, references, calls, and arrays.
//! References resolve against answers and loop context at evaluation time.

/// A parsed expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Num(f64),
    Bool(bool),
    Array(Vec<Expr>),
    /// A bare identifier: a question variable, a `loop.` path, or a plain
    /// string form if neither resolves.
    Ref(String),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// The identifier behind a reference-like node, used by calls that take a
    /// question rather than a value (`answer`, `anySelected`, ...).
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ref(name) => Some(name),
            Expr::Str(s) => Some(s),
            _ => None,
        }
    }
}
