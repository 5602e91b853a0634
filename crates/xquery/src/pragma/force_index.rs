//! `exist:force-index-use`: turns a failure to use an index into an error.

use tracing::{debug, warn};

use crate::context::QueryContext;
use crate::error::{Error, ErrorCode, Result};
use crate::expr::{Expr, ExprId, FunctionCall, GeneralComparison};
use crate::optimizable::IndexUseReporter;
use crate::visitor::{ExpressionVisitor, index_reporters};

/// Forgets index use reports left over from earlier evaluations.
pub(crate) fn before(ctx: &mut QueryContext, inner: &Expr) {
    ctx.clear_index_use(index_reporters(inner));
}

/// Fails unless every comparison and index-capable function below `inner`
/// used an index during the evaluation that just finished.
pub(crate) fn after(ctx: &QueryContext, inner: &Expr) -> Result<()> {
    let mut check = UsageCheck { ctx, checked: 0, unused: Vec::new() };
    check.visit_expr(inner);
    if check.checked == 0 || !check.unused.is_empty() {
        warn!(expr = %inner, checked = check.checked, unused = ?check.unused, "index not used");
        return Err(Error::from_code(
            ErrorCode::EXXQDY0004,
            format!("cannot use index on expression '{inner}'"),
        ));
    }
    debug!(checked = check.checked, "all expressions used an index");
    Ok(())
}

struct UsageCheck<'a> {
    ctx: &'a QueryContext,
    checked: usize,
    unused: Vec<ExprId>,
}

impl UsageCheck<'_> {
    fn report(&mut self, id: ExprId, reporter: &dyn IndexUseReporter) {
        self.checked += 1;
        if !reporter.has_used_index(self.ctx) {
            self.unused.push(id);
        }
    }
}

impl ExpressionVisitor for UsageCheck<'_> {
    fn visit_comparison(&mut self, cmp: &GeneralComparison) {
        self.report(cmp.id, cmp);
        self.visit_expr(&cmp.left);
        self.visit_expr(&cmp.right);
    }

    fn visit_function(&mut self, call: &FunctionCall) {
        if call.reports_index_use() {
            self.report(call.id, call);
        }
        for arg in &call.args {
            self.visit_expr(arg);
        }
    }
}
