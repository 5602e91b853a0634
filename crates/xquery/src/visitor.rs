//! Read-only traversal of expression trees.
//!
//! [`ExpressionVisitor`] has one method per expression kind. The default of
//! every method descends into all children through the matching `walk_*`
//! function, so a visitor only overrides the kinds it cares about and calls
//! the `walk_*` function itself when it still wants the descent.

use crate::expr::{
    Expr, ExprId, ExtensionExpr, FilterExpr, FunctionCall, GeneralComparison, LocationStep, PathExpr, Predicate,
};

pub trait ExpressionVisitor {
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_path(&mut self, path: &PathExpr) {
        walk_path(self, path);
    }

    fn visit_step(&mut self, step: &LocationStep) {
        walk_step(self, step);
    }

    fn visit_filter(&mut self, filter: &FilterExpr) {
        walk_filter(self, filter);
    }

    fn visit_predicate(&mut self, predicate: &Predicate) {
        self.visit_expr(&predicate.expr);
    }

    fn visit_comparison(&mut self, cmp: &GeneralComparison) {
        self.visit_expr(&cmp.left);
        self.visit_expr(&cmp.right);
    }

    fn visit_function(&mut self, call: &FunctionCall) {
        for arg in &call.args {
            self.visit_expr(arg);
        }
    }

    fn visit_extension(&mut self, ext: &ExtensionExpr) {
        self.visit_expr(&ext.inner);
    }
}

pub fn walk_expr<V: ExpressionVisitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::Path(path) => visitor.visit_path(path),
        Expr::Step(step) => visitor.visit_step(step),
        Expr::Filter(filter) => visitor.visit_filter(filter),
        Expr::Comparison(cmp) => visitor.visit_comparison(cmp),
        Expr::Function(call) => visitor.visit_function(call),
        Expr::Extension(ext) => visitor.visit_extension(ext),
        Expr::And(a, b) | Expr::Or(a, b) => {
            visitor.visit_expr(a);
            visitor.visit_expr(b);
        }
        Expr::Sequence(items) => {
            for item in items {
                visitor.visit_expr(item);
            }
        }
        Expr::Root | Expr::VarRef(_) | Expr::Literal(_) => {}
    }
}

pub fn walk_path<V: ExpressionVisitor + ?Sized>(visitor: &mut V, path: &PathExpr) {
    for step in &path.steps {
        visitor.visit_expr(step);
    }
}

pub fn walk_step<V: ExpressionVisitor + ?Sized>(visitor: &mut V, step: &LocationStep) {
    for predicate in &step.predicates {
        visitor.visit_predicate(predicate);
    }
}

pub fn walk_filter<V: ExpressionVisitor + ?Sized>(visitor: &mut V, filter: &FilterExpr) {
    visitor.visit_expr(&filter.base);
    for predicate in &filter.predicates {
        visitor.visit_predicate(predicate);
    }
}

/// The first location step of a path, looking through a leading `/`.
pub fn find_first_step(expr: &Expr) -> Option<&LocationStep> {
    match expr {
        Expr::Step(step) => Some(step),
        Expr::Path(path) => path.steps.iter().find_map(|s| match s {
            Expr::Root => None,
            other => Some(find_first_step(other)),
        })?,
        Expr::Extension(ext) => find_first_step(&ext.inner),
        _ => None,
    }
}

/// Ids of every expression in a subtree that can report index use.
pub fn index_reporters(expr: &Expr) -> Vec<ExprId> {
    #[derive(Default)]
    struct Collect(Vec<ExprId>);

    impl ExpressionVisitor for Collect {
        fn visit_comparison(&mut self, cmp: &GeneralComparison) {
            self.0.push(cmp.id);
            self.visit_expr(&cmp.left);
            self.visit_expr(&cmp.right);
        }

        fn visit_function(&mut self, call: &FunctionCall) {
            if call.reports_index_use() {
                self.0.push(call.id);
            }
            for arg in &call.args {
                self.visit_expr(arg);
            }
        }
    }

    let mut collect = Collect::default();
    collect.visit_expr(expr);
    collect.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use xmldb_core::Configuration;

    #[test]
    fn first_step_skips_root() {
        let query = compile("/book/title", &Configuration::default()).unwrap();
        let step = find_first_step(query.root()).unwrap();
        assert_eq!(step.test.to_string(), "book");
    }

    #[test]
    fn first_step_of_filter_is_none() {
        let query = compile("$books[title = 'x']", &Configuration::default()).unwrap();
        assert!(find_first_step(query.root()).is_none());
    }

    #[test]
    fn reporters_include_comparisons_and_starts_with() {
        let query =
            compile("//book[title = 'x' and starts-with(@lang, 'e')][count(year) > 1]", &Configuration::default())
                .unwrap();
        // title = 'x', starts-with(...), count(year) > 1
        assert_eq!(index_reporters(query.root()).len(), 3);
    }
}
