//! `exist:optimize`: narrows the context of a path through range index
//! lookups before the path is evaluated.
//!
//! On activation the decorated expression is searched for index-capable
//! comparisons and functions. Each evaluation then asks all of them whether
//! the current context is fully covered by their indexes. If so, every one
//! pre-selects its matches and the matches are mapped back to candidate
//! ancestors, round after round, each round using the previous round's
//! ancestors as context. The final candidates are handed to the first step
//! of the path as preloaded data and the path is evaluated as usual, so
//! predicates still decide the exact result.

use core::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};
use xmldb_core::{Axis, Configuration, ContextId, NameType, NarrowMode, NodeSet, QName};

use crate::analyze::AnalyzeContextInfo;
use crate::context::QueryContext;
use crate::error::Result;
use crate::evaluator::eval;
use crate::expr::{Expr, ExprId, FilterExpr, LocationStep, Predicate, PredicateMode};
use crate::optimizable::Optimizable;
use crate::pragma::parse_options;
use crate::sequence::{Item, Sequence};
use crate::visitor::{ExpressionVisitor, find_first_step, walk_expr};

/// Axes along which an optimizable may reach its indexed nodes.
const OPTIMIZABLE_AXES: [Axis; 6] = [
    Axis::Child,
    Axis::SelfAxis,
    Axis::Descendant,
    Axis::DescendantOrSelf,
    Axis::Attribute,
    Axis::DescendantAttribute,
];

#[derive(Debug, Clone)]
pub struct OptimizePragma {
    /// Written by the user rather than inserted by the compiler.
    pub explicit: bool,
    pub enabled: bool,
    /// Context the pragma was analyzed in.
    pub context_id: ContextId,
}

impl OptimizePragma {
    pub fn new(name: &QName, contents: &str, config: &Configuration, explicit: bool) -> Result<Self> {
        let mut enabled = explicit || config.optimizations_enabled;
        for (key, value) in parse_options(name, contents)? {
            if key == "enable" {
                enabled = value == "yes";
            } else {
                debug!(pragma = %name, option = %key, "ignoring unknown option");
            }
        }
        Ok(Self { explicit, enabled, context_id: ContextId::NONE })
    }

    pub(crate) fn analyze(&mut self, info: &AnalyzeContextInfo) {
        self.context_id = info.context_id;
    }

    /// Binds to `inner` and runs discovery, once per query context.
    pub(crate) fn before(&self, id: ExprId, ctx: &mut QueryContext, inner: &Expr) {
        if ctx.optimize_state(id).is_some() {
            return;
        }
        let state = if self.enabled { OptimizeState::discover(id, inner) } else { OptimizeState::default() };
        ctx.bind_optimize_state(id, state);
    }

    pub(crate) fn eval(
        &self,
        id: ExprId,
        ctx: &mut QueryContext,
        inner: &Expr,
        context: Option<&Sequence>,
        item: Option<&Item>,
    ) -> Result<Sequence> {
        let Some(state) = ctx.optimize_state(id) else {
            return eval(inner, ctx, context, item);
        };
        let optimizables = state.optimizables.clone();
        let context_step = state.context_step.clone();
        let context_var = state.context_var.clone();
        let cache = state.cache.clone();

        let item_context = item.map(|i| match i {
            Item::Node(node) => Sequence::from_nodes(NodeSet::persistent([node.clone()], ctx.db().generation())),
            Item::Atomic(_) => Sequence::Items(vec![i.clone()]),
        });
        let context = item_context.as_ref().or(context);

        let mut original: Option<Arc<NodeSet>> = None;
        let mut working: Option<Sequence> = None;
        let mut optimize = false;
        let mut cache_hit = false;
        let mut recomputed = false;
        if context.is_none_or(Sequence::is_persistent_set) {
            original = context.map(Sequence::to_node_set).transpose()?;
            if let (Some(cached), Some(current)) = (&cache, &original)
                && Arc::ptr_eq(&cached.context, current)
            {
                cache_hit = !current.has_changed(cached.state);
            }
            working = match &context_var {
                Some(var) => Some(eval(var, ctx, context, None)?),
                None => context.cloned(),
            };
            if cache_hit {
                optimize = cache.as_ref().is_some_and(|c| c.optimize);
                trace!(pragma = %id, optimize, "reusing cached verdict");
            } else {
                recomputed = true;
                optimize = verdict(ctx, &optimizables, working.as_ref())?;
                trace!(pragma = %id, optimize, optimizables = optimizables.len(), "computed verdict");
            }
        }

        if let Some(state) = ctx.optimize_state_mut(id) {
            state.stats.evaluations += 1;
            state.stats.cache_hits += u64::from(cache_hit);
            state.stats.verdict_recomputations += u64::from(recomputed);
        }

        if !optimize {
            debug!(pragma = %id, "cannot optimize expression, evaluating directly");
            if let Some(state) = ctx.optimize_state_mut(id) {
                state.stats.fallbacks += 1;
            }
            let fallback = original.map(Sequence::Nodes).or(working);
            return eval(inner, ctx, fallback.as_ref().or(context), item);
        }

        let mut trace_rounds = Vec::with_capacity(optimizables.len());
        let mut current = working.unwrap_or_default();
        let mut result = Arc::new(NodeSet::empty());
        for (i, optimizable) in optimizables.iter().enumerate() {
            let started = Instant::now();
            let context_set = current.to_node_set()?;
            let selection = optimizable.pre_select(ctx, &context_set, i > 0)?;
            let ancestors = match &context_step {
                _ if selection.is_empty() => selection.clone(),
                Some(step) if i == 0 => {
                    let axis = if optimizable.optimize_on_self() {
                        Axis::SelfAxis
                    } else if optimizable.optimize_on_child() {
                        Axis::Parent
                    } else {
                        Axis::AncestorOrSelf
                    };
                    ctx.db().find_ancestors_by_tag_name(
                        step.name_type,
                        &step.qname,
                        axis,
                        &selection.document_set(),
                        &selection,
                        self.context_id,
                    )?
                }
                _ => selection.select_ancestor_descendant(&context_set, NarrowMode::Ancestor, true, self.context_id),
            };
            trace!(
                pragma = %id,
                round = i,
                expr = %optimizable.expr_id(),
                selection = selection.len(),
                ancestors = ancestors.len(),
                elapsed = ?started.elapsed(),
                "narrowing round"
            );
            trace_rounds.push(NarrowingRound { optimizable: optimizable.expr_id(), selection, ancestors: ancestors.clone() });
            result = Arc::new(ancestors);
            current = Sequence::Nodes(result.clone());
        }

        if let Some(state) = ctx.optimize_state_mut(id) {
            state.cache = original.clone().map(|context| {
                let state = context.state();
                CacheEntry { context, state, optimize: true }
            });
            state.stats.optimized += 1;
            state.stats.pre_selections += trace_rounds.iter().map(|_| 1).sum::<u64>();
            state.last_trace = trace_rounds;
        }

        let Some(step) = context_step else {
            return eval(inner, ctx, Some(&Sequence::Nodes(result)), None);
        };
        debug!(pragma = %id, step = %step.id, candidates = result.len(), "evaluating with preloaded candidates");
        let narrowed = original.map(|o| Sequence::from_nodes(o.filter_documents(&result)));
        ctx.set_preloaded(step.id, result);
        let evaluated = eval(inner, ctx, narrowed.as_ref(), None);
        ctx.clear_preloaded(step.id);
        evaluated
    }
}

/// Every optimizable must cover the whole sequence; an empty list never
/// optimizes.
fn verdict(ctx: &QueryContext, optimizables: &[Arc<dyn Optimizable>], working: Option<&Sequence>) -> Result<bool> {
    let mut optimize = false;
    for optimizable in optimizables {
        let Some(covered) = optimizable.can_optimize_sequence(ctx, working)? else {
            return Ok(false);
        };
        if Some(covered.len()) == working.map(Sequence::len) {
            optimize = true;
        } else {
            trace!(expr = %optimizable.expr_id(), covered = covered.len(), "partially covered by index");
            return Ok(false);
        }
    }
    Ok(optimize)
}

/// First step targeted by structural ancestor queries.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextStep {
    pub id: ExprId,
    pub qname: QName,
    pub name_type: NameType,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    context: Arc<NodeSet>,
    state: u64,
    optimize: bool,
}

/// Counters of one optimize pragma within a query context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub evaluations: u64,
    pub optimized: u64,
    pub fallbacks: u64,
    pub cache_hits: u64,
    pub verdict_recomputations: u64,
    pub pre_selections: u64,
}

impl fmt::Display for OptimizeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "evaluations={} optimized={} fallbacks={} cache_hits={} verdicts={} pre_selections={}",
            self.evaluations,
            self.optimized,
            self.fallbacks,
            self.cache_hits,
            self.verdict_recomputations,
            self.pre_selections
        )
    }
}

/// One round of the narrowing loop.
#[derive(Debug, Clone)]
pub struct NarrowingRound {
    pub optimizable: ExprId,
    pub selection: NodeSet,
    pub ancestors: NodeSet,
}

/// Runtime state of an optimize pragma, kept in the query context.
#[derive(Debug, Default)]
pub struct OptimizeState {
    optimizables: Vec<Arc<dyn Optimizable>>,
    context_step: Option<ContextStep>,
    context_var: Option<Expr>,
    cache: Option<CacheEntry>,
    stats: OptimizeStats,
    last_trace: Vec<NarrowingRound>,
}

impl OptimizeState {
    fn discover(pragma: ExprId, inner: &Expr) -> Self {
        let mut discovery = Discovery::default();
        discovery.visit_expr(inner);

        let first_step = find_first_step(inner);
        let mut context_step = first_step.and_then(context_step_of);
        // The structural query must target the step owning the first
        // optimizable, otherwise the generic narrowing is used.
        if let Some(step) = &context_step
            && discovery.found.first().is_some_and(|(_, owner)| owner.map(|(id, _)| id) != Some(step.id))
        {
            debug!(%pragma, step = %step.id, "first optimizable is not a predicate of the context step");
            context_step = None;
        }
        // Preloaded candidates would shift positions counted before the
        // owning predicate.
        if let (Some(step), Some(location)) = (&context_step, first_step)
            && let Some((_, Some((_, owner_index)))) = discovery.found.first()
            && location.predicates[..*owner_index].iter().any(|p| p.mode == PredicateMode::Positional)
        {
            debug!(%pragma, step = %step.id, "positional predicate precedes the first optimizable");
            context_step = None;
        }

        let optimizables: Vec<_> = discovery.found.into_iter().map(|(o, _)| o).collect();
        debug!(
            %pragma,
            optimizables = optimizables.len(),
            context_step = ?context_step.as_ref().map(|s| s.qname.to_string()),
            context_var = ?discovery.context_var.as_ref().map(ToString::to_string),
            "discovery"
        );
        Self { optimizables, context_step, context_var: discovery.context_var, ..Self::default() }
    }

    pub fn optimizables(&self) -> &[Arc<dyn Optimizable>] {
        &self.optimizables
    }

    pub fn context_step(&self) -> Option<&ContextStep> {
        self.context_step.as_ref()
    }

    pub fn context_var(&self) -> Option<&Expr> {
        self.context_var.as_ref()
    }

    /// Cached verdict, if any.
    pub fn cached_verdict(&self) -> Option<bool> {
        self.cache.as_ref().map(|c| c.optimize)
    }

    pub fn stats(&self) -> OptimizeStats {
        self.stats
    }

    pub fn last_trace(&self) -> &[NarrowingRound] {
        &self.last_trace
    }

    pub(crate) fn reset(&mut self) {
        self.cache = None;
    }
}

/// Wildcard steps cannot be looked up by name.
fn context_step_of(step: &LocationStep) -> Option<ContextStep> {
    let qname = step.test.name()?.clone();
    let name_type = if step.axis.is_attribute_axis() { NameType::Attribute } else { NameType::Element };
    Some(ContextStep { id: step.id, qname, name_type })
}

/// Collects optimizables through paths, step and filter predicates.
/// Boolean operators and function arguments are not searched.
#[derive(Default)]
struct Discovery {
    found: Vec<(Arc<dyn Optimizable>, Option<(ExprId, usize)>)>,
    context_var: Option<Expr>,
    /// Step and predicate index being searched.
    owner: Option<(ExprId, usize)>,
}

impl Discovery {
    fn add(&mut self, expr: &Expr) {
        let Some(optimizable) = expr.as_optimizable() else {
            return;
        };
        match optimizable.optimize_axis() {
            Some(axis) if OPTIMIZABLE_AXES.contains(&axis) => {
                trace!(expr = %optimizable.expr_id(), %axis, "found optimizable");
                self.found.push((optimizable, self.owner));
            }
            axis => trace!(expr = %optimizable.expr_id(), ?axis, "skipping optimizable on unsupported axis"),
        }
    }

    fn visit_predicates(&mut self, owner: Option<ExprId>, predicates: &[Predicate]) {
        let saved = self.owner;
        for (index, predicate) in predicates.iter().enumerate() {
            self.owner = owner.map(|id| (id, index));
            self.visit_predicate(predicate);
        }
        self.owner = saved;
    }
}

impl ExpressionVisitor for Discovery {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Path(_) | Expr::Step(_) | Expr::Filter(_) => walk_expr(self, expr),
            Expr::Comparison(_) | Expr::Function(_) => self.add(expr),
            _ => {}
        }
    }

    fn visit_step(&mut self, step: &LocationStep) {
        self.visit_predicates(Some(step.id), &step.predicates);
    }

    fn visit_filter(&mut self, filter: &FilterExpr) {
        if let Expr::VarRef(_) = filter.base.as_ref() {
            self.context_var = Some(filter.base.as_ref().clone());
        }
        self.visit_predicates(None, &filter.predicates);
    }
}
