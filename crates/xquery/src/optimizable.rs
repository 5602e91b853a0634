//! Index capability of comparisons and functions.
//!
//! An expression that compares a simple relative path with a literal can be
//! answered by a range index lookup on the path's last name. The lookup
//! result (the indexed nodes) is then related back to the context: either by
//! the optimize pragma, which narrows its context before evaluating, or by a
//! predicate evaluating set-at-a-time.

use core::fmt;
use std::sync::Arc;

use tracing::trace;
use xmldb_core::{
    AtomicValue, Axis, ComparisonOp, ContextId, DocumentSet, IndexType, NameType, NarrowMode, NodeSet, QName, RangeOp,
    RangeQuery,
};

use crate::context::QueryContext;
use crate::error::Result;
use crate::expr::{Expr, ExprId, FunctionCall, GeneralComparison, LocationStep, NodeTest};
use crate::resolver::get_qname_index_type;
use crate::sequence::Sequence;

/// Capability of evaluating through an index instead of tree traversal.
pub trait Optimizable: fmt::Debug + fmt::Display + Send + Sync {
    fn expr_id(&self) -> ExprId;

    /// Axis along which the indexed nodes are reached from the context.
    fn optimize_axis(&self) -> Option<Axis>;

    /// The indexed node is the context node itself (`title[. = "x"]`).
    fn optimize_on_self(&self) -> bool;

    /// The indexed node is a child or attribute of the context node.
    fn optimize_on_child(&self) -> bool;

    /// The part of `sequence` this expression can answer from an index.
    /// `None` means nothing can be optimized.
    fn can_optimize_sequence(&self, ctx: &QueryContext, sequence: Option<&Sequence>) -> Result<Option<Arc<NodeSet>>>;

    /// Indexed nodes matching the expression within the documents of
    /// `context`; with `use_context` only those below a context node.
    fn pre_select(&self, ctx: &mut QueryContext, context: &NodeSet, use_context: bool) -> Result<NodeSet>;
}

/// Expressions that report whether their last evaluation used an index.
pub trait IndexUseReporter {
    fn has_used_index(&self, ctx: &QueryContext) -> bool;
}

/// How an indexed node relates to the context item it qualifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Identity,
    ParentChild,
    Ancestor { include_self: bool },
}

/// Context step information available while analyzing a predicate.
#[derive(Debug, Clone)]
pub struct OuterStep {
    pub name: Option<QName>,
    pub axis: Axis,
}

/// Range index access path of an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexProbe {
    pub qname: QName,
    pub name_type: NameType,
    pub axis: Axis,
    pub optimize_self: bool,
    pub optimize_child: bool,
    pub op: RangeOp,
    pub key: AtomicValue,
    /// Relation usable for set-at-a-time filtering; `None` for multi-step
    /// paths whose hits cannot be related exactly.
    pub relation: Option<Relation>,
}

struct Target {
    qname: QName,
    name_type: NameType,
    axis: Axis,
    optimize_self: bool,
    optimize_child: bool,
    relation: Option<Relation>,
}

fn simple_steps(expr: &Expr) -> Option<Vec<&LocationStep>> {
    let steps = match expr {
        Expr::Step(step) => vec![step],
        Expr::Path(path) => path
            .steps
            .iter()
            .map(|s| match s {
                Expr::Step(step) => Some(step),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?,
        _ => return None,
    };
    if steps.is_empty() || steps.iter().any(|s| !s.predicates.is_empty()) {
        return None;
    }
    Some(steps)
}

fn name_type_for(axis: Axis) -> NameType {
    if axis.is_attribute_axis() { NameType::Attribute } else { NameType::Element }
}

fn target(path: &Expr, outer: Option<&OuterStep>) -> Option<Target> {
    let steps = simple_steps(path)?;
    let first = steps[0];
    if steps.len() == 1 && first.axis == Axis::SelfAxis {
        let outer = outer?;
        let qname = outer.name.clone()?;
        if let NodeTest::Name(own) = &first.test
            && *own != qname
        {
            return None;
        }
        if !matches!(first.test, NodeTest::Name(_) | NodeTest::AnyNode) {
            return None;
        }
        return Some(Target {
            qname,
            name_type: name_type_for(outer.axis),
            axis: outer.axis,
            optimize_self: true,
            optimize_child: false,
            relation: Some(Relation::Identity),
        });
    }

    let last = steps[steps.len() - 1];
    let qname = last.test.name()?.clone();
    let mut axis = first.axis;
    if axis == Axis::SelfAxis && steps.len() > 1 {
        axis = steps[1].axis;
    }
    let relation = if steps.len() == 1 {
        match axis {
            Axis::Child | Axis::Attribute => Some(Relation::ParentChild),
            Axis::Descendant | Axis::DescendantAttribute => Some(Relation::Ancestor { include_self: false }),
            Axis::DescendantOrSelf => Some(Relation::Ancestor { include_self: true }),
            _ => None,
        }
    } else {
        None
    };
    Some(Target {
        qname,
        name_type: name_type_for(last.axis),
        axis,
        optimize_self: false,
        optimize_child: steps.len() == 1 && matches!(axis, Axis::Child | Axis::Attribute),
        relation,
    })
}

fn literal_key(expr: &Expr) -> Option<AtomicValue> {
    match expr {
        Expr::Literal(v @ (AtomicValue::String(_) | AtomicValue::Integer(_) | AtomicValue::Double(_))) => Some(v.clone()),
        _ => None,
    }
}

fn mirrored(op: ComparisonOp) -> ComparisonOp {
    match op {
        ComparisonOp::Lt => ComparisonOp::Gt,
        ComparisonOp::Le => ComparisonOp::Ge,
        ComparisonOp::Gt => ComparisonOp::Lt,
        ComparisonOp::Ge => ComparisonOp::Le,
        other => other,
    }
}

impl IndexProbe {
    fn from_target(t: Target, op: RangeOp, key: AtomicValue) -> Self {
        Self {
            qname: t.qname,
            name_type: t.name_type,
            axis: t.axis,
            optimize_self: t.optimize_self,
            optimize_child: t.optimize_child,
            op,
            key,
            relation: t.relation,
        }
    }

    /// `path op literal` or `literal op path`.
    pub fn for_comparison(
        op: ComparisonOp,
        left: &Expr,
        right: &Expr,
        outer: Option<&OuterStep>,
    ) -> Option<IndexProbe> {
        if let (Some(t), Some(key)) = (target(left, outer), literal_key(right)) {
            return Some(Self::from_target(t, RangeOp::Cmp(op), key));
        }
        if let (Some(key), Some(t)) = (literal_key(left), target(right, outer)) {
            return Some(Self::from_target(t, RangeOp::Cmp(mirrored(op)), key));
        }
        None
    }

    /// `starts-with(path, "literal")`.
    pub fn for_function(name: &str, args: &[Expr], outer: Option<&OuterStep>) -> Option<IndexProbe> {
        if name != "starts-with" || args.len() != 2 {
            return None;
        }
        let key = match literal_key(&args[1])? {
            v @ AtomicValue::String(_) => v,
            _ => return None,
        };
        target(&args[0], outer).map(|t| Self::from_target(t, RangeOp::StartsWith, key))
    }

    fn key_fits(&self, index_type: IndexType) -> bool {
        match self.op {
            RangeOp::StartsWith => index_type == IndexType::String,
            RangeOp::Cmp(_) => index_type.key_from_value(&self.key).is_some(),
        }
    }

    /// Nodes of `sequence` whose collection indexes this probe's name with
    /// the resolved type.
    pub fn covered_subset(&self, ctx: &QueryContext, sequence: Option<&Sequence>) -> Result<Option<Arc<NodeSet>>> {
        let Some(Sequence::Nodes(set)) = sequence else {
            return Ok(None);
        };
        let Some(index_type) = get_qname_index_type(ctx, sequence, &self.qname, self.name_type)? else {
            return Ok(None);
        };
        if !self.key_fits(index_type) {
            trace!(name = %self.qname, %index_type, key = %self.key, "key does not fit index type");
            return Ok(None);
        }
        let mut covered = DocumentSet::new();
        for doc in set.document_set().iter() {
            let collection = ctx.db().collection_of(doc)?;
            if !collection.is_system() && collection.range_index(&self.qname, self.name_type) == Some(index_type) {
                covered.insert(doc);
            }
        }
        if covered.len() == set.document_set().len() {
            return Ok(Some(set.clone()));
        }
        let subset = NodeSet::from_parts(
            set.iter().filter(|n| covered.contains(n.doc)).cloned(),
            set.generation().cloned(),
        );
        Ok(Some(Arc::new(subset)))
    }

    /// Range index lookup within the documents of `context`.
    pub fn lookup(&self, ctx: &QueryContext, context: &NodeSet, use_context: bool) -> Result<NodeSet> {
        let docs = context.document_set();
        let query = RangeQuery {
            name: &self.qname,
            name_type: self.name_type,
            op: self.op,
            key: &self.key,
            docs: &docs,
            context: use_context.then_some(context),
        };
        Ok(ctx.db().find_by_value(&query)?)
    }

    /// Set-at-a-time filtering of `candidates`; `None` if the index cannot
    /// answer for all of them.
    pub fn filter(&self, ctx: &QueryContext, candidates: &Arc<NodeSet>, context_id: ContextId) -> Result<Option<NodeSet>> {
        let Some(relation) = self.relation else {
            return Ok(None);
        };
        let sequence = Sequence::Nodes(candidates.clone());
        match self.covered_subset(ctx, Some(&sequence))? {
            Some(subset) if subset.len() == candidates.len() && !candidates.is_empty() => {}
            _ => return Ok(None),
        }
        let hits = self.lookup(ctx, candidates, true)?;
        let kept = match relation {
            Relation::Identity => candidates.intersect(&hits),
            Relation::ParentChild => hits.select_parent_child(candidates, NarrowMode::Ancestor),
            Relation::Ancestor { include_self } => {
                hits.select_ancestor_descendant(candidates, NarrowMode::Ancestor, include_self, context_id)
            }
        };
        Ok(Some(kept))
    }
}

impl fmt::Display for IndexProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.name_type == NameType::Attribute { "@" } else { "" };
        write!(f, "{}::{prefix}{} {} {}", self.axis, self.qname, self.op, self.key)
    }
}

macro_rules! impl_optimizable {
    ($ty:ty) => {
        impl Optimizable for $ty {
            fn expr_id(&self) -> ExprId {
                self.id
            }

            fn optimize_axis(&self) -> Option<Axis> {
                self.probe.as_ref().map(|p| p.axis)
            }

            fn optimize_on_self(&self) -> bool {
                self.probe.as_ref().is_some_and(|p| p.optimize_self)
            }

            fn optimize_on_child(&self) -> bool {
                self.probe.as_ref().is_some_and(|p| p.optimize_child)
            }

            fn can_optimize_sequence(
                &self,
                ctx: &QueryContext,
                sequence: Option<&Sequence>,
            ) -> Result<Option<Arc<NodeSet>>> {
                match &self.probe {
                    Some(probe) => probe.covered_subset(ctx, sequence),
                    None => Ok(None),
                }
            }

            fn pre_select(&self, ctx: &mut QueryContext, context: &NodeSet, use_context: bool) -> Result<NodeSet> {
                let Some(probe) = &self.probe else {
                    return Ok(NodeSet::empty());
                };
                let selection = probe.lookup(ctx, context, use_context)?;
                ctx.record_index_use(self.id, true);
                trace!(expr = %self.id, %probe, use_context, selected = selection.len(), "pre-selection");
                Ok(selection)
            }
        }

        impl IndexUseReporter for $ty {
            fn has_used_index(&self, ctx: &QueryContext) -> bool {
                ctx.has_used_index(self.id)
            }
        }
    };
}

impl_optimizable!(GeneralComparison);
impl_optimizable!(FunctionCall);
