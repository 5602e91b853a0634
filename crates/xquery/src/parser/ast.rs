//! Syntax tree produced by the parser, before ids and pragmas are resolved.

use xmldb_core::{AtomicValue, Axis, ComparisonOp};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Path(PathExpr),
    Comparison { op: ComparisonOp, left: Box<Expr>, right: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Sequence(Vec<Expr>),
    Literal(AtomicValue),
    VarRef(String),
    FunctionCall { name: String, args: Vec<Expr> },
    Pragma { pragmas: Vec<PragmaDecl>, inner: Option<Box<Expr>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStart {
    /// `/`
    Root,
    /// `//`
    RootDescendant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub start: Option<PathStart>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Preceded by `//` rather than `/`.
    pub descendant: bool,
    pub kind: StepKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Axis { axis: Axis, test: NodeTest, predicates: Vec<Expr> },
    Filter { primary: Box<Expr>, predicates: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    Name(String),
    Wildcard,
    AnyNode,
    Text,
}

/// `(# name contents #)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaDecl {
    pub name: String,
    pub contents: String,
}
