//! Static analysis pass run once by the compiler.
//!
//! Computes the index access path of every comparison and function call,
//! propagates the tree traversal flag set by `exist:no-index` and lets each
//! pragma record the context it was analyzed in.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::trace;
use xmldb_core::ContextId;

use crate::expr::{Expr, Predicate};
use crate::optimizable::{IndexProbe, OuterStep};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AnalyzeFlags: u32 {
        /// Evaluate by tree traversal, never through an index.
        const USE_TREE_TRAVERSAL = 1 << 0;
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeContextInfo {
    pub context_id: ContextId,
    pub flags: AnalyzeFlags,
    /// The location step whose predicate is being analyzed.
    pub outer: Option<OuterStep>,
}

impl AnalyzeContextInfo {
    fn for_predicate(&self, context_id: ContextId, outer: Option<OuterStep>) -> Self {
        Self { context_id, flags: self.flags, outer }
    }

    fn without_outer(&self) -> Self {
        Self { outer: None, ..self.clone() }
    }
}

pub fn analyze(expr: &mut Expr, info: &AnalyzeContextInfo) {
    match expr {
        Expr::Path(path) => {
            let nested = info.without_outer();
            for (i, step) in path.steps.iter_mut().enumerate() {
                // The first step still sees the enclosing focus.
                analyze(step, if i == 0 { info } else { &nested });
            }
        }
        Expr::Step(step) => {
            step.tree_traversal = info.flags.contains(AnalyzeFlags::USE_TREE_TRAVERSAL);
            let outer = OuterStep { name: step.test.name().cloned(), axis: step.axis };
            let inner = info.for_predicate(ContextId(step.id.0), Some(outer));
            analyze_predicates(&mut step.predicates, &inner);
        }
        Expr::Filter(filter) => {
            analyze(&mut filter.base, info);
            let inner = info.for_predicate(ContextId(filter.id.0), None);
            analyze_predicates(&mut filter.predicates, &inner);
        }
        Expr::Comparison(cmp) => {
            let cmp = Arc::make_mut(cmp);
            analyze(&mut cmp.left, info);
            analyze(&mut cmp.right, info);
            cmp.tree_traversal = info.flags.contains(AnalyzeFlags::USE_TREE_TRAVERSAL);
            cmp.context_id = info.context_id;
            cmp.probe = IndexProbe::for_comparison(cmp.op, &cmp.left, &cmp.right, info.outer.as_ref());
            trace!(expr = %cmp.id, probe = ?cmp.probe.as_ref().map(ToString::to_string), "analyzed comparison");
        }
        Expr::Function(call) => {
            let call = Arc::make_mut(call);
            for arg in &mut call.args {
                analyze(arg, info);
            }
            call.tree_traversal = info.flags.contains(AnalyzeFlags::USE_TREE_TRAVERSAL);
            call.context_id = info.context_id;
            call.probe = IndexProbe::for_function(&call.name, &call.args, info.outer.as_ref());
        }
        Expr::And(a, b) | Expr::Or(a, b) => {
            analyze(a, info);
            analyze(b, info);
        }
        Expr::Sequence(items) => {
            for item in items {
                analyze(item, info);
            }
        }
        Expr::Extension(ext) => {
            let mut inner = info.clone();
            for pragma in &mut ext.pragmas {
                pragma.analyze(&mut inner);
            }
            analyze(&mut ext.inner, &inner);
        }
        Expr::Root | Expr::VarRef(_) | Expr::Literal(_) => {}
    }
}

fn analyze_predicates(predicates: &mut [Predicate], info: &AnalyzeContextInfo) {
    for predicate in predicates {
        analyze(&mut predicate.expr, info);
    }
}
