//! Lowers the syntax tree into the expression tree and runs analysis.
//!
//! Besides assigning expression ids the compiler resolves pragma names,
//! rewrites `//name` into a single `descendant::name` step where that does
//! not change positions, decides how predicates are applied and, with
//! `auto_optimize`, wraps top-level paths in an implicit optimize pragma.

use core::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;
use tracing::debug;
use xmldb_core::{Axis, Configuration, ContextId, QName};

use crate::analyze::{AnalyzeContextInfo, analyze};
use crate::context::QueryContext;
use crate::error::Result;
use crate::evaluator::eval;
use crate::expr::{
    Expr, ExprId, ExtensionExpr, FilterExpr, FunctionCall, GeneralComparison, LocationStep, NodeTest, PathExpr,
    Predicate, PredicateMode, VarRef,
};
use crate::functions::check_signature;
use crate::parser::{QueryParser, ast};
use crate::pragma::{EXIST_NS, EXIST_PREFIX, OPTIMIZE, Pragma};
use crate::sequence::Sequence;
use crate::visitor::{ExpressionVisitor, walk_expr};

/// A parsed and analyzed query, ready to be evaluated any number of times.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    root: Expr,
    source: String,
}

/// Compiles `source` with the settings of `config`.
pub fn compile(source: &str, config: &Configuration) -> Result<CompiledQuery> {
    let started = Instant::now();
    let ast = QueryParser::parse_query(source)?;
    let mut compiler = Compiler { config, last_id: 0 };
    let mut root = compiler.lower(ast)?;
    if config.auto_optimize {
        root = compiler.auto_optimize(root)?;
    }
    analyze(&mut root, &AnalyzeContextInfo::default());
    debug!(query = %root, expressions = compiler.last_id, elapsed = ?started.elapsed(), "compiled");
    Ok(CompiledQuery { root, source: source.to_owned() })
}

impl CompiledQuery {
    pub fn root(&self) -> &Expr {
        &self.root
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the query. `context` is the initial context sequence, if any.
    pub fn evaluate(&self, ctx: &mut QueryContext, context: Option<&Sequence>) -> Result<Sequence> {
        let started = Instant::now();
        let result = eval(&self.root, ctx, context, None)?;
        debug!(items = result.len(), elapsed = ?started.elapsed(), "evaluated");
        Ok(result)
    }

    /// Every pragma of the query, outermost first.
    pub fn pragmas(&self) -> Vec<&Pragma> {
        struct Collect<'a>(Vec<&'a Pragma>);

        impl<'a> Collect<'a> {
            fn visit(&mut self, expr: &'a Expr) {
                if let Expr::Extension(ext) = expr {
                    self.0.extend(ext.pragmas.iter());
                }
                for child in children(expr) {
                    self.visit(child);
                }
            }
        }

        let mut collect = Collect(Vec::new());
        collect.visit(&self.root);
        collect.0
    }

    /// Clears per-run state kept in `ctx` for this query.
    pub fn reset_state(&self, ctx: &mut QueryContext) {
        ctx.reset_state();
    }

    /// Indented dump of the expression tree with analysis results.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = write_tree(&mut out, &self.root, 0);
        out
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

struct Compiler<'a> {
    config: &'a Configuration,
    last_id: u32,
}

impl Compiler<'_> {
    fn next_id(&mut self) -> ExprId {
        self.last_id += 1;
        ExprId(self.last_id)
    }

    fn lower(&mut self, expr: ast::Expr) -> Result<Expr> {
        Ok(match expr {
            ast::Expr::Path(path) => self.lower_path(path)?,
            ast::Expr::Comparison { op, left, right } => {
                let id = self.next_id();
                let left = self.lower(*left)?;
                let right = self.lower(*right)?;
                Expr::Comparison(Arc::new(GeneralComparison {
                    id,
                    op,
                    left,
                    right,
                    probe: None,
                    tree_traversal: false,
                    context_id: ContextId::NONE,
                }))
            }
            ast::Expr::And(a, b) => Expr::And(Box::new(self.lower(*a)?), Box::new(self.lower(*b)?)),
            ast::Expr::Or(a, b) => Expr::Or(Box::new(self.lower(*a)?), Box::new(self.lower(*b)?)),
            ast::Expr::Sequence(items) => {
                Expr::Sequence(items.into_iter().map(|e| self.lower(e)).collect::<Result<Vec<_>>>()?)
            }
            ast::Expr::Literal(value) => Expr::Literal(value),
            ast::Expr::VarRef(name) => Expr::VarRef(VarRef { name }),
            ast::Expr::FunctionCall { name, args } => {
                let name = if name.starts_with("fn:") { name["fn:".len()..].to_owned() } else { name };
                check_signature(&name, args.len())?;
                let id = self.next_id();
                let args = args.into_iter().map(|e| self.lower(e)).collect::<Result<Vec<_>>>()?;
                Expr::Function(Arc::new(FunctionCall {
                    id,
                    name,
                    args,
                    probe: None,
                    tree_traversal: false,
                    context_id: ContextId::NONE,
                }))
            }
            ast::Expr::Pragma { pragmas, inner } => self.lower_pragma(pragmas, inner)?,
        })
    }

    fn lower_pragma(&mut self, decls: Vec<ast::PragmaDecl>, inner: Option<Box<ast::Expr>>) -> Result<Expr> {
        let id = self.next_id();
        let mut pragmas: SmallVec<[Pragma; 2]> = SmallVec::new();
        for decl in decls {
            let name = pragma_name(&decl.name);
            if let Some(pragma) = Pragma::create(self.next_id(), name, &decl.contents, self.config, true)? {
                pragmas.push(pragma);
            }
        }
        let inner = match inner {
            Some(expr) => self.lower(*expr)?,
            None => Expr::Sequence(Vec::new()),
        };
        if pragmas.is_empty() {
            return Ok(inner);
        }
        Ok(Expr::Extension(ExtensionExpr { id, pragmas: pragmas.into_vec(), inner: Box::new(inner) }))
    }

    fn lower_path(&mut self, path: ast::PathExpr) -> Result<Expr> {
        let mut steps = Vec::with_capacity(path.steps.len() + 1);
        if path.start.is_some() {
            steps.push(Expr::Root);
        }
        for step in path.steps {
            match step.kind {
                ast::StepKind::Axis { axis, test, predicates } => {
                    let predicates = self.lower_predicates(predicates)?;
                    let positional = predicates.iter().any(|p| p.mode == PredicateMode::Positional);
                    let axis = match (step.descendant, axis) {
                        (false, axis) => axis,
                        (true, Axis::Child) if !positional => Axis::Descendant,
                        (true, Axis::Attribute) if !positional => Axis::DescendantAttribute,
                        (true, axis) => {
                            steps.push(self.descendant_or_self());
                            axis
                        }
                    };
                    let id = self.next_id();
                    steps.push(Expr::Step(LocationStep {
                        id,
                        axis,
                        test: node_test(test),
                        predicates,
                        tree_traversal: false,
                    }));
                }
                ast::StepKind::Filter { primary, predicates } => {
                    if step.descendant {
                        steps.push(self.descendant_or_self());
                    }
                    let id = self.next_id();
                    let base = self.lower(*primary)?;
                    let predicates = self.lower_predicates(predicates)?;
                    steps.push(if predicates.is_empty() {
                        base
                    } else {
                        Expr::Filter(FilterExpr { id, base: Box::new(base), predicates })
                    });
                }
            }
        }
        if steps.len() == 1 {
            return Ok(steps.remove(0));
        }
        Ok(Expr::Path(PathExpr { id: self.next_id(), steps }))
    }

    fn descendant_or_self(&mut self) -> Expr {
        Expr::Step(LocationStep {
            id: self.next_id(),
            axis: Axis::DescendantOrSelf,
            test: NodeTest::AnyNode,
            predicates: Vec::new(),
            tree_traversal: false,
        })
    }

    fn lower_predicates(&mut self, predicates: Vec<ast::Expr>) -> Result<Vec<Predicate>> {
        predicates
            .into_iter()
            .map(|p| {
                let id = self.next_id();
                let expr = self.lower(p)?;
                let mode = if expr.is_boolean_valued() { PredicateMode::Boolean } else { PredicateMode::Positional };
                Ok(Predicate { id, expr, mode })
            })
            .collect()
    }

    /// Wraps paths with index-capable predicates in an implicit
    /// `exist:optimize`.
    fn auto_optimize(&mut self, root: Expr) -> Result<Expr> {
        match root {
            Expr::Sequence(items) => {
                Ok(Expr::Sequence(items.into_iter().map(|e| self.auto_optimize(e)).collect::<Result<Vec<_>>>()?))
            }
            expr @ (Expr::Path(_) | Expr::Step(_) | Expr::Filter(_)) if has_candidate_predicate(&expr) => {
                let id = self.next_id();
                let name = QName::with_namespace(EXIST_NS, Some(EXIST_PREFIX), OPTIMIZE);
                let Some(pragma) = Pragma::create(self.next_id(), name, "", self.config, false)? else {
                    return Ok(expr);
                };
                debug!(expr = %expr, enabled = ?pragma.as_optimize().map(|o| o.enabled), "inserted implicit optimize pragma");
                Ok(Expr::Extension(ExtensionExpr { id, pragmas: vec![pragma], inner: Box::new(expr) }))
            }
            other => Ok(other),
        }
    }
}

/// Resolves a pragma name; the `exist` prefix is predeclared.
fn pragma_name(name: &str) -> QName {
    match name.split_once(':') {
        Some((EXIST_PREFIX, local)) => QName::with_namespace(EXIST_NS, Some(EXIST_PREFIX), local),
        Some((prefix, local)) => QName { prefix: Some(prefix.to_owned()), local: local.to_owned(), ns_uri: None },
        None => QName::new(name),
    }
}

fn node_test(test: ast::NodeTest) -> NodeTest {
    match test {
        ast::NodeTest::Name(name) => NodeTest::Name(match name.split_once(':') {
            Some((prefix, local)) => QName { prefix: Some(prefix.to_owned()), local: local.to_owned(), ns_uri: None },
            None => QName::new(name),
        }),
        ast::NodeTest::Wildcard => NodeTest::Wildcard,
        ast::NodeTest::AnyNode => NodeTest::AnyNode,
        ast::NodeTest::Text => NodeTest::Text,
    }
}

fn has_candidate_predicate(expr: &Expr) -> bool {
    #[derive(Default)]
    struct Find {
        in_predicate: bool,
        found: bool,
    }

    impl ExpressionVisitor for Find {
        fn visit_expr(&mut self, expr: &Expr) {
            match expr {
                Expr::Comparison(_) if self.in_predicate => self.found = true,
                Expr::Function(call) if self.in_predicate && call.reports_index_use() => self.found = true,
                _ => walk_expr(self, expr),
            }
        }

        fn visit_predicate(&mut self, predicate: &Predicate) {
            let saved = self.in_predicate;
            self.in_predicate = true;
            self.visit_expr(&predicate.expr);
            self.in_predicate = saved;
        }
    }

    let mut find = Find::default();
    find.visit_expr(expr);
    find.found
}

fn children(expr: &Expr) -> Vec<&Expr> {
    fn predicates(predicates: &[Predicate]) -> impl Iterator<Item = &Expr> {
        predicates.iter().map(|p| &p.expr)
    }

    match expr {
        Expr::Path(path) => path.steps.iter().collect(),
        Expr::Step(step) => predicates(&step.predicates).collect(),
        Expr::Filter(filter) => std::iter::once(filter.base.as_ref()).chain(predicates(&filter.predicates)).collect(),
        Expr::Comparison(cmp) => vec![&cmp.left, &cmp.right],
        Expr::Function(call) => call.args.iter().collect(),
        Expr::And(a, b) | Expr::Or(a, b) => vec![a.as_ref(), b.as_ref()],
        Expr::Sequence(items) => items.iter().collect(),
        Expr::Extension(ext) => vec![ext.inner.as_ref()],
        Expr::Root | Expr::VarRef(_) | Expr::Literal(_) => Vec::new(),
    }
}

fn write_tree(out: &mut String, expr: &Expr, depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    match expr {
        Expr::Path(path) => writeln!(out, "{indent}path {}", path.id)?,
        Expr::Step(step) => {
            write!(out, "{indent}step {} {}::{}", step.id, step.axis, step.test)?;
            if step.tree_traversal {
                out.push_str(" [tree traversal]");
            }
            out.push('\n');
        }
        Expr::Root => writeln!(out, "{indent}root")?,
        Expr::Filter(filter) => writeln!(out, "{indent}filter {}", filter.id)?,
        Expr::Comparison(cmp) => {
            write!(out, "{indent}comparison {} {}", cmp.id, cmp.op)?;
            if let Some(probe) = &cmp.probe {
                write!(out, " [index {probe}]")?;
            }
            out.push('\n');
        }
        Expr::Function(call) => {
            write!(out, "{indent}function {} {}()", call.id, call.name)?;
            if let Some(probe) = &call.probe {
                write!(out, " [index {probe}]")?;
            }
            out.push('\n');
        }
        Expr::VarRef(var) => writeln!(out, "{indent}variable ${}", var.name)?,
        Expr::Literal(value) => writeln!(out, "{indent}literal {value}")?,
        Expr::And(..) => writeln!(out, "{indent}and")?,
        Expr::Or(..) => writeln!(out, "{indent}or")?,
        Expr::Sequence(_) => writeln!(out, "{indent}sequence")?,
        Expr::Extension(ext) => {
            writeln!(out, "{indent}extension {}", ext.id)?;
            for pragma in &ext.pragmas {
                write!(out, "{indent}  pragma {} {pragma}", pragma.id)?;
                if let Some(optimize) = pragma.as_optimize() {
                    write!(out, " enabled={} explicit={}", optimize.enabled, optimize.explicit)?;
                }
                out.push('\n');
            }
        }
    }
    for child in children(expr) {
        write_tree(out, child, depth + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use rstest::rstest;

    fn steps(expr: &Expr) -> Vec<&LocationStep> {
        match expr {
            Expr::Path(path) => path
                .steps
                .iter()
                .filter_map(|s| match s {
                    Expr::Step(step) => Some(step),
                    _ => None,
                })
                .collect(),
            Expr::Step(step) => vec![step],
            _ => Vec::new(),
        }
    }

    #[rstest]
    #[case("//book", &[Axis::Descendant])]
    #[case("//book[1]", &[Axis::DescendantOrSelf, Axis::Child])]
    #[case("//@lang", &[Axis::DescendantAttribute])]
    #[case("/library//book/title", &[Axis::Child, Axis::Descendant, Axis::Child])]
    #[case("//book[title = 'x']", &[Axis::Descendant])]
    fn descendant_rewrite(#[case] query: &str, #[case] axes: &[Axis]) {
        let compiled = compile(query, &Configuration::default()).unwrap();
        let found: Vec<_> = steps(compiled.root()).iter().map(|s| s.axis).collect();
        assert_eq!(found, axes);
    }

    #[rstest]
    #[case("//book[title]", PredicateMode::Boolean)]
    #[case("//book[2]", PredicateMode::Positional)]
    #[case("//book[$n]", PredicateMode::Positional)]
    #[case("//book[count(title) > 1]", PredicateMode::Boolean)]
    fn predicate_modes(#[case] query: &str, #[case] mode: PredicateMode) {
        let compiled = compile(query, &Configuration::default()).unwrap();
        let last = *steps(compiled.root()).last().unwrap();
        assert_eq!(last.predicates[0].mode, mode);
    }

    #[test]
    fn unknown_pragmas_leave_the_inner_expression() {
        let compiled = compile("(# exist:timer #) { //book }", &Configuration::default()).unwrap();
        assert!(compiled.pragmas().is_empty());
        assert!(matches!(compiled.root(), Expr::Path(_)));
    }

    #[test]
    fn known_pragmas_are_resolved_in_order() {
        let compiled =
            compile("(# exist:force-index-use #) (# exist:optimize #) { //book }", &Configuration::default()).unwrap();
        let names: Vec<_> = compiled.pragmas().iter().map(|p| p.name.local.clone()).collect();
        assert_eq!(names, ["force-index-use", "optimize"]);
    }

    #[rstest]
    #[case("(# exist:optimize enable #) { //book }", ErrorCode::EXXQDY0003)]
    #[case("matches(//title, 'x')", ErrorCode::XPST0017)]
    #[case("count()", ErrorCode::XPST0017)]
    #[case("//book[", ErrorCode::XPST0003)]
    fn compile_errors(#[case] query: &str, #[case] code: ErrorCode) {
        assert_eq!(compile(query, &Configuration::default()).unwrap_err().code, code);
    }

    #[test]
    fn auto_optimize_wraps_paths_with_comparisons() {
        let config = Configuration { auto_optimize: true, ..Configuration::default() };
        let compiled = compile("//book[title = 'Dune'], count(//book)", &config).unwrap();
        let pragmas = compiled.pragmas();
        assert_eq!(pragmas.len(), 1);
        let optimize = pragmas[0].as_optimize().unwrap();
        assert!(!optimize.explicit);
        assert!(optimize.enabled);

        let disabled = Configuration { optimizations_enabled: false, ..config };
        let compiled = compile("//book[title = 'Dune']", &disabled).unwrap();
        assert!(!compiled.pragmas()[0].as_optimize().unwrap().enabled);
    }

    #[test]
    fn explain_shows_probes() {
        let compiled = compile("(# exist:optimize #) { //book[title = 'Dune'] }", &Configuration::default()).unwrap();
        let text = compiled.explain();
        assert!(text.contains("pragma"));
        assert!(text.contains("[index child::title = \"Dune\"]"), "{text}");
    }

    #[test]
    fn function_prefix_is_stripped() {
        let compiled = compile("fn:count(//book)", &Configuration::default()).unwrap();
        let Expr::Function(call) = compiled.root() else { panic!("not a function") };
        assert_eq!(call.name, "count");
    }
}
