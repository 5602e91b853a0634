//! Tree evaluation of compiled expressions.

use core::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;
use xmldb_core::{
    AtomicValue, Axis, ComparisonOp, ContextId, NameType, NarrowMode, NodeKind, NodeProxy, NodeSet, parse_double,
};

use crate::context::QueryContext;
use crate::error::{Error, ErrorCode, Result};
use crate::expr::{Expr, GeneralComparison, LocationStep, NodeTest, Predicate, PredicateMode};
use crate::functions;
use crate::pragma;
use crate::sequence::{Item, Sequence};

/// Evaluates `expr` against a context sequence. A context item, when
/// given, takes precedence over the sequence.
pub fn eval(expr: &Expr, ctx: &mut QueryContext, context: Option<&Sequence>, item: Option<&Item>) -> Result<Sequence> {
    match expr {
        Expr::Path(path) => {
            let mut current: Option<Sequence> = None;
            for step in &path.steps {
                let next = match &current {
                    None => eval(step, ctx, context, item)?,
                    Some(seq) => {
                        if seq.is_empty() {
                            return Ok(Sequence::empty());
                        }
                        let nodes = seq.to_node_set()?;
                        eval(step, ctx, Some(&Sequence::Nodes(nodes)), None)?
                    }
                };
                current = Some(next);
            }
            Ok(current.unwrap_or_default())
        }
        Expr::Root => {
            let nodes = context_nodes(ctx, context, item)?;
            let roots = nodes.iter().map(|n| NodeProxy::document_node(n.doc));
            Ok(Sequence::from_nodes(NodeSet::from_parts(roots, nodes.generation().cloned())))
        }
        Expr::Step(step) => eval_step(step, ctx, context, item),
        Expr::Filter(filter) => {
            let mut seq = eval(&filter.base, ctx, context, item)?;
            for predicate in &filter.predicates {
                seq = apply_predicate(ctx, seq, predicate, false)?;
            }
            Ok(seq)
        }
        Expr::Comparison(cmp) => general_comparison(cmp, ctx, context, item),
        Expr::Function(call) => functions::call(call, ctx, context, item),
        Expr::VarRef(var) => Ok(ctx.variable(&var.name)?.clone()),
        Expr::Literal(value) => Ok(Sequence::singleton(value.clone())),
        Expr::And(a, b) => {
            let result = effective_boolean_value(&eval(a, ctx, context, item)?)?
                && effective_boolean_value(&eval(b, ctx, context, item)?)?;
            Ok(Sequence::boolean(result))
        }
        Expr::Or(a, b) => {
            let result = effective_boolean_value(&eval(a, ctx, context, item)?)?
                || effective_boolean_value(&eval(b, ctx, context, item)?)?;
            Ok(Sequence::boolean(result))
        }
        Expr::Sequence(items) => {
            let mut result = Sequence::empty();
            for e in items {
                result = result.concat(eval(e, ctx, context, item)?);
            }
            Ok(result)
        }
        Expr::Extension(ext) => pragma::eval_extension(ext, ctx, context, item),
    }
}

/// The focus as a node set; atomic context items are a type error.
pub(crate) fn context_nodes(ctx: &QueryContext, context: Option<&Sequence>, item: Option<&Item>) -> Result<Arc<NodeSet>> {
    match (item, context) {
        (Some(Item::Node(node)), _) => Ok(Arc::new(NodeSet::persistent([node.clone()], ctx.db().generation()))),
        (Some(Item::Atomic(value)), _) => {
            Err(Error::type_error(format!("context item is not a node: {}", value.type_name())))
        }
        (None, Some(seq)) => seq.to_node_set(),
        (None, None) => Err(Error::from_code(ErrorCode::XPDY0002, "context item is undefined")),
    }
}

fn eval_step(step: &LocationStep, ctx: &mut QueryContext, context: Option<&Sequence>, item: Option<&Item>) -> Result<Sequence> {
    let context = context_nodes(ctx, context, item)?;
    let positional = step.predicates.iter().any(|p| p.mode == PredicateMode::Positional);
    if !positional {
        let mut seq = Sequence::from_nodes(select_axis(step, ctx, &context)?);
        for predicate in &step.predicates {
            seq = apply_predicate(ctx, seq, predicate, false)?;
        }
        return Ok(seq);
    }

    // Positions are counted per context node.
    let mut result = NodeSet::empty();
    for node in context.iter() {
        let single = NodeSet::from_parts([node.clone()], context.generation().cloned());
        let mut seq = Sequence::from_nodes(select_axis(step, ctx, &single)?);
        for predicate in &step.predicates {
            seq = apply_predicate(ctx, seq, predicate, step.axis.is_reverse())?;
        }
        let nodes = seq.to_node_set()?;
        result = result.union(&nodes);
    }
    Ok(Sequence::from_nodes(result))
}

fn select_axis(step: &LocationStep, ctx: &mut QueryContext, context: &NodeSet) -> Result<NodeSet> {
    if let Some(preloaded) = ctx.preloaded(step.id).cloned()
        && let Some(related) = relate_preloaded(step, &preloaded, context)
    {
        trace!(step = %step.id, preloaded = preloaded.len(), selected = related.len(), "using preloaded nodes");
        return Ok(related);
    }

    if let (NodeTest::Name(qname), false) = (&step.test, step.tree_traversal) {
        let docs = context.document_set();
        let context_id = ContextId(step.id.0);
        let db = ctx.db();
        match step.axis {
            Axis::Child | Axis::Attribute | Axis::Descendant | Axis::DescendantOrSelf | Axis::DescendantAttribute => {
                let name_type = if step.axis.is_attribute_axis() { NameType::Attribute } else { NameType::Element };
                return Ok(db.find_descendants_by_tag_name(name_type, qname, step.axis, &docs, context, context_id)?);
            }
            Axis::Parent | Axis::Ancestor => {
                return Ok(db.find_ancestors_by_tag_name(
                    NameType::Element,
                    qname,
                    step.axis,
                    &docs,
                    context,
                    context_id,
                )?);
            }
            _ => {}
        }
    }

    navigate(step, ctx, context)
}

/// Narrows optimizer-supplied candidates to those reachable from `context`.
fn relate_preloaded(step: &LocationStep, preloaded: &NodeSet, context: &NodeSet) -> Option<NodeSet> {
    let context_id = ContextId(step.id.0);
    match step.axis {
        Axis::Child | Axis::Attribute => Some(preloaded.select_parent_child(context, NarrowMode::Descendant)),
        Axis::Descendant | Axis::DescendantAttribute => {
            Some(preloaded.select_ancestor_descendant(context, NarrowMode::Descendant, false, context_id))
        }
        Axis::DescendantOrSelf => {
            Some(preloaded.select_ancestor_descendant(context, NarrowMode::Descendant, true, context_id))
        }
        Axis::SelfAxis => Some(preloaded.intersect(context)),
        _ => None,
    }
}

fn navigate(step: &LocationStep, ctx: &QueryContext, context: &NodeSet) -> Result<NodeSet> {
    let db = ctx.db();
    let mut found = Vec::new();
    for node in context.iter() {
        let candidates: Vec<NodeProxy> = match step.axis {
            Axis::Child => db.children(node)?,
            Axis::Attribute => db.attributes(node)?,
            Axis::SelfAxis => vec![node.clone()],
            Axis::Parent => node.parent().into_iter().collect(),
            Axis::Ancestor => node.ancestors().collect(),
            Axis::AncestorOrSelf => std::iter::once(node.clone()).chain(node.ancestors()).collect(),
            Axis::Descendant | Axis::DescendantOrSelf | Axis::DescendantAttribute => {
                let mut out = Vec::new();
                if step.axis == Axis::DescendantOrSelf {
                    out.push(node.clone());
                }
                collect_descendants(ctx, node, step.axis == Axis::DescendantAttribute, &mut out)?;
                out
            }
            Axis::FollowingSibling | Axis::PrecedingSibling => match node.parent() {
                Some(parent) if db.node_kind(node)? != NodeKind::Attribute => db
                    .children(&parent)?
                    .into_iter()
                    .filter(|s| match step.axis {
                        Axis::FollowingSibling => s > node,
                        _ => s < node,
                    })
                    .collect(),
                _ => Vec::new(),
            },
        };
        for candidate in candidates {
            if matches_test(ctx, &candidate, &step.test, step.axis)? {
                found.push(candidate);
            }
        }
    }
    Ok(NodeSet::persistent(found, db.generation()))
}

fn collect_descendants(ctx: &QueryContext, node: &NodeProxy, attributes: bool, out: &mut Vec<NodeProxy>) -> Result<()> {
    let db = ctx.db();
    if attributes {
        out.extend(db.attributes(node)?);
    }
    for child in db.children(node)? {
        if !attributes {
            out.push(child.clone());
        }
        collect_descendants(ctx, &child, attributes, out)?;
    }
    Ok(())
}

fn matches_test(ctx: &QueryContext, node: &NodeProxy, test: &NodeTest, axis: Axis) -> Result<bool> {
    let db = ctx.db();
    let principal = if axis.is_attribute_axis() { NodeKind::Attribute } else { NodeKind::Element };
    Ok(match test {
        NodeTest::AnyNode => true,
        NodeTest::Text => db.node_kind(node)? == NodeKind::Text,
        NodeTest::Wildcard => db.node_kind(node)? == principal,
        NodeTest::Name(qname) => {
            db.node_kind(node)? == principal && db.node_name(node)?.is_some_and(|name| name == *qname)
        }
    })
}

/// Filters `seq` by one predicate.
///
/// Index-capable boolean predicates over a node set are first tried
/// set-at-a-time through the range index; otherwise the predicate is
/// evaluated once per item with that item as focus.
pub(crate) fn apply_predicate(
    ctx: &mut QueryContext,
    seq: Sequence,
    predicate: &Predicate,
    reverse: bool,
) -> Result<Sequence> {
    if predicate.mode == PredicateMode::Boolean
        && let (Some((probe, expr_id, context_id)), Some(set)) = (predicate.expr.index_probe(), seq.node_set())
        && let Some(kept) = probe.filter(ctx, set, context_id)?
    {
        ctx.record_index_use(expr_id, true);
        trace!(expr = %expr_id, %context_id, %probe, candidates = set.len(), kept = kept.len(), "set-at-a-time predicate");
        return Ok(Sequence::from_nodes(kept));
    }

    let generation = seq.node_set().and_then(|s| s.generation().cloned());
    let is_node_set = seq.node_set().is_some();
    let items = seq.items();
    let last = items.len();
    let mut kept = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let position = if reverse { last - i } else { i + 1 };
        let focus = match &item {
            Item::Node(node) => Sequence::from_nodes(NodeSet::from_parts([node.clone()], generation.clone())),
            Item::Atomic(value) => Sequence::singleton(value.clone()),
        };
        let result = eval(&predicate.expr, ctx, Some(&focus), Some(&item))?;
        if predicate_truth(&result, position)? {
            kept.push(item);
        }
    }
    if is_node_set {
        let nodes = kept.into_iter().filter_map(|i| match i {
            Item::Node(n) => Some(n),
            Item::Atomic(_) => None,
        });
        return Ok(Sequence::from_nodes(NodeSet::from_parts(nodes, generation)));
    }
    Ok(Sequence::Items(kept))
}

#[allow(clippy::cast_precision_loss)]
fn predicate_truth(result: &Sequence, position: usize) -> Result<bool> {
    if let Sequence::Items(items) = result
        && let [Item::Atomic(value)] = items.as_slice()
        && value.is_numeric()
    {
        return Ok(value.as_f64() == Some(position as f64));
    }
    effective_boolean_value(result)
}

pub fn effective_boolean_value(seq: &Sequence) -> Result<bool> {
    match seq {
        Sequence::Nodes(set) => Ok(!set.is_empty()),
        Sequence::Items(items) => match items.as_slice() {
            [] => Ok(false),
            [Item::Node(_), ..] => Ok(true),
            [Item::Atomic(value)] => match value {
                AtomicValue::Boolean(b) => Ok(*b),
                AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => Ok(!s.is_empty()),
                AtomicValue::Integer(i) => Ok(*i != 0),
                AtomicValue::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
            },
            _ => Err(Error::from_code(
                ErrorCode::FORG0006,
                "effective boolean value is not defined for a sequence of several atomic values",
            )),
        },
    }
}

/// Atomized values of a sequence; nodes yield their string value as
/// `xs:untypedAtomic`.
pub(crate) fn atomize(ctx: &QueryContext, seq: &Sequence) -> Result<Vec<AtomicValue>> {
    seq.items()
        .into_iter()
        .map(|item| match item {
            Item::Node(node) => Ok(AtomicValue::UntypedAtomic(ctx.db().string_value(&node)?)),
            Item::Atomic(value) => Ok(value),
        })
        .collect()
}

fn general_comparison(
    cmp: &GeneralComparison,
    ctx: &mut QueryContext,
    context: Option<&Sequence>,
    item: Option<&Item>,
) -> Result<Sequence> {
    let left = eval(&cmp.left, ctx, context, item)?;
    let right = eval(&cmp.right, ctx, context, item)?;
    let left = atomize(ctx, &left)?;
    let right = atomize(ctx, &right)?;
    for a in &left {
        for b in &right {
            if compare_atomic(cmp.op, a, b)? {
                return Ok(Sequence::boolean(true));
            }
        }
    }
    Ok(Sequence::boolean(false))
}

fn cast_to_double(value: &str) -> Result<f64> {
    parse_double(value)
        .ok_or_else(|| Error::from_code(ErrorCode::FORG0001, format!("cannot cast \"{value}\" to xs:double")))
}

fn cast_to_boolean(value: &str) -> Result<bool> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::from_code(ErrorCode::FORG0001, format!("cannot cast \"{other}\" to xs:boolean"))),
    }
}

fn number(value: &AtomicValue) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}

/// Value comparison of two atomics after the general comparison casts.
pub(crate) fn compare_atomic(op: ComparisonOp, a: &AtomicValue, b: &AtomicValue) -> Result<bool> {
    use AtomicValue::{Boolean, Double, Integer, String as Str, UntypedAtomic};

    let ordering: Option<Ordering> = match (a, b) {
        (Integer(x), Integer(y)) => Some(x.cmp(y)),
        (Integer(_) | Double(_), Integer(_) | Double(_)) => number(a).partial_cmp(&number(b)),
        (UntypedAtomic(s), Integer(_) | Double(_)) => cast_to_double(s)?.partial_cmp(&number(b)),
        (Integer(_) | Double(_), UntypedAtomic(s)) => number(a).partial_cmp(&cast_to_double(s)?),
        (Str(x) | UntypedAtomic(x), Str(y) | UntypedAtomic(y)) => Some(x.cmp(y)),
        (Boolean(x), Boolean(y)) => Some(x.cmp(y)),
        (UntypedAtomic(s), Boolean(y)) => Some(cast_to_boolean(s)?.cmp(y)),
        (Boolean(x), UntypedAtomic(s)) => Some(x.cmp(&cast_to_boolean(s)?)),
        _ => {
            return Err(Error::type_error(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            )));
        }
    };
    Ok(op.holds_partial(ordering))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn untyped(s: &str) -> AtomicValue {
        AtomicValue::UntypedAtomic(s.into())
    }

    #[rstest]
    #[case(ComparisonOp::Eq, untyped("1965"), AtomicValue::Integer(1965), true)]
    #[case(ComparisonOp::Gt, untyped("1973"), AtomicValue::Integer(1965), true)]
    #[case(ComparisonOp::Eq, untyped("Dune"), AtomicValue::String("Dune".into()), true)]
    #[case(ComparisonOp::Lt, untyped("Dune"), untyped("Momo"), true)]
    #[case(ComparisonOp::Eq, AtomicValue::Double(f64::NAN), AtomicValue::Double(f64::NAN), false)]
    #[case(ComparisonOp::Ne, AtomicValue::Double(f64::NAN), AtomicValue::Integer(1), true)]
    #[case(ComparisonOp::Eq, untyped("true"), AtomicValue::Boolean(true), true)]
    fn general_comparison_casts(
        #[case] op: ComparisonOp,
        #[case] a: AtomicValue,
        #[case] b: AtomicValue,
        #[case] expected: bool,
    ) {
        assert_eq!(compare_atomic(op, &a, &b).unwrap(), expected);
    }

    #[rstest]
    #[case(untyped("abc"), AtomicValue::Integer(1), ErrorCode::FORG0001)]
    #[case(AtomicValue::String("1".into()), AtomicValue::Integer(1), ErrorCode::XPTY0004)]
    #[case(AtomicValue::Boolean(true), AtomicValue::Integer(1), ErrorCode::XPTY0004)]
    fn comparison_errors(#[case] a: AtomicValue, #[case] b: AtomicValue, #[case] code: ErrorCode) {
        assert_eq!(compare_atomic(ComparisonOp::Eq, &a, &b).unwrap_err().code, code);
    }

    #[rstest]
    #[case(Sequence::empty(), false)]
    #[case(Sequence::singleton(AtomicValue::String(String::new())), false)]
    #[case(Sequence::singleton(AtomicValue::Integer(2)), true)]
    #[case(Sequence::singleton(AtomicValue::Double(f64::NAN)), false)]
    #[case(Sequence::boolean(true), true)]
    fn effective_boolean_values(#[case] seq: Sequence, #[case] expected: bool) {
        assert_eq!(effective_boolean_value(&seq).unwrap(), expected);
    }

    #[test]
    fn several_atomics_have_no_boolean_value() {
        let seq = Sequence::Items(vec![Item::Atomic(AtomicValue::Integer(1)), Item::Atomic(AtomicValue::Integer(2))]);
        assert_eq!(effective_boolean_value(&seq).unwrap_err().code, ErrorCode::FORG0006);
    }
}
