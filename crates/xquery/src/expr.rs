//! Compiled expression tree.

use core::fmt;
use std::sync::Arc;

use xmldb_core::{AtomicValue, Axis, ComparisonOp, ContextId, QName};

use crate::optimizable::{IndexProbe, Optimizable};
use crate::pragma::Pragma;

/// Stable identifier of an expression node, assigned by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ExprId(pub u32);

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    Name(QName),
    /// `*`
    Wildcard,
    /// `node()`
    AnyNode,
    /// `text()`
    Text,
}

impl NodeTest {
    /// Anything but a name test.
    pub fn is_wildcard(&self) -> bool {
        !matches!(self, NodeTest::Name(_))
    }

    pub fn name(&self) -> Option<&QName> {
        match self {
            NodeTest::Name(q) => Some(q),
            _ => None,
        }
    }
}

/// How a predicate is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateMode {
    /// Always yields a boolean or nodes, so it filters a whole set at once.
    Boolean,
    /// May yield a number and select by position.
    Positional,
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub id: ExprId,
    pub expr: Expr,
    pub mode: PredicateMode,
}

#[derive(Debug, Clone)]
pub struct LocationStep {
    pub id: ExprId,
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Predicate>,
    /// Set inside `exist:no-index`: navigate the tree instead of asking the
    /// structural index.
    pub tree_traversal: bool,
}

#[derive(Debug, Clone)]
pub struct PathExpr {
    pub id: ExprId,
    pub steps: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct FilterExpr {
    pub id: ExprId,
    pub base: Box<Expr>,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GeneralComparison {
    pub id: ExprId,
    pub op: ComparisonOp,
    pub left: Expr,
    pub right: Expr,
    /// Range index access path, filled in by analysis.
    pub probe: Option<IndexProbe>,
    pub tree_traversal: bool,
    pub context_id: ContextId,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub id: ExprId,
    pub name: String,
    pub args: Vec<Expr>,
    pub probe: Option<IndexProbe>,
    pub tree_traversal: bool,
    pub context_id: ContextId,
}

/// A pragma-annotated expression: `(# name contents #) { inner }`.
#[derive(Debug, Clone)]
pub struct ExtensionExpr {
    pub id: ExprId,
    pub pragmas: Vec<Pragma>,
    pub inner: Box<Expr>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Path(PathExpr),
    Step(LocationStep),
    /// Leading `/`: the document node of the context node.
    Root,
    Filter(FilterExpr),
    Comparison(Arc<GeneralComparison>),
    Function(Arc<FunctionCall>),
    VarRef(VarRef),
    Literal(AtomicValue),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Sequence(Vec<Expr>),
    Extension(ExtensionExpr),
}

impl FunctionCall {
    /// Builtins that may be answered from a range index.
    pub fn reports_index_use(&self) -> bool {
        self.name == "starts-with"
    }
}

impl Expr {
    /// The expression's index capability, if it has one in its analyzed form.
    pub fn as_optimizable(&self) -> Option<Arc<dyn Optimizable>> {
        match self {
            Expr::Comparison(cmp) if cmp.probe.is_some() && !cmp.tree_traversal => {
                Some(cmp.clone() as Arc<dyn Optimizable>)
            }
            Expr::Function(f) if f.probe.is_some() && !f.tree_traversal => Some(f.clone() as Arc<dyn Optimizable>),
            _ => None,
        }
    }

    /// Probe usable for set-at-a-time predicate evaluation.
    pub fn index_probe(&self) -> Option<(&IndexProbe, ExprId, ContextId)> {
        match self {
            Expr::Comparison(cmp) if !cmp.tree_traversal => cmp.probe.as_ref().map(|p| (p, cmp.id, cmp.context_id)),
            Expr::Function(f) if !f.tree_traversal => f.probe.as_ref().map(|p| (p, f.id, f.context_id)),
            _ => None,
        }
    }

    /// Expressions that evaluate to a boolean or to nodes, never to a number.
    pub fn is_boolean_valued(&self) -> bool {
        match self {
            Expr::Comparison(_) | Expr::And(..) | Expr::Or(..) | Expr::Path(_) | Expr::Step(_) | Expr::Root => true,
            Expr::Filter(f) => f.base.is_boolean_valued(),
            Expr::Function(f) => {
                matches!(f.name.as_str(), "exists" | "empty" | "not" | "contains" | "starts-with" | "true" | "false")
            }
            Expr::Literal(v) => !v.is_numeric(),
            Expr::Extension(e) => e.inner.is_boolean_valued(),
            Expr::VarRef(_) | Expr::Sequence(_) => false,
        }
    }
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTest::Name(q) => write!(f, "{q}"),
            NodeTest::Wildcard => f.write_str("*"),
            NodeTest::AnyNode => f.write_str("node()"),
            NodeTest::Text => f.write_str("text()"),
        }
    }
}

fn write_predicates(f: &mut fmt::Formatter<'_>, predicates: &[Predicate]) -> fmt::Result {
    for p in predicates {
        write!(f, "[{}]", p.expr)?;
    }
    Ok(())
}

impl fmt::Display for LocationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.axis, self.test)?;
        write_predicates(f, &self.predicates)
    }
}

impl fmt::Display for GeneralComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Path(path) => {
                let rooted = matches!(path.steps.first(), Some(Expr::Root));
                for (i, step) in path.steps.iter().enumerate() {
                    match i {
                        0 => write!(f, "{step}")?,
                        1 if rooted => write!(f, "{step}")?,
                        _ => write!(f, "/{step}")?,
                    }
                }
                Ok(())
            }
            Expr::Step(step) => write!(f, "{step}"),
            Expr::Root => f.write_str("/"),
            Expr::Filter(filter) => {
                write!(f, "{}", filter.base)?;
                write_predicates(f, &filter.predicates)
            }
            Expr::Comparison(cmp) => write!(f, "{cmp}"),
            Expr::Function(call) => write!(f, "{call}"),
            Expr::VarRef(v) => write!(f, "${}", v.name),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::And(a, b) => write!(f, "({a} and {b})"),
            Expr::Or(a, b) => write!(f, "({a} or {b})"),
            Expr::Sequence(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Expr::Extension(ext) => {
                for pragma in &ext.pragmas {
                    write!(f, "{pragma} ")?;
                }
                write!(f, "{{ {} }}", ext.inner)
            }
        }
    }
}
