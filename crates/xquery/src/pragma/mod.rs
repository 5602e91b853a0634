//! Pragmas: annotations that change how an expression is evaluated, never
//! what it evaluates to.
//!
//! A pragma goes through a fixed lifecycle. It is analyzed once at compile
//! time, then for every evaluation of the decorated expression `before`,
//! `eval` and `after` run in that order. The first pragma whose `eval`
//! produces a result wins; if none does, the inner expression is evaluated
//! directly.

pub mod force_index;
pub mod no_index;
pub mod optimize;

use core::fmt;

use tracing::debug;
use xmldb_core::{Configuration, QName};

use crate::analyze::AnalyzeContextInfo;
use crate::context::QueryContext;
use crate::error::{Error, ErrorCode, Result};
use crate::evaluator::eval;
use crate::expr::{Expr, ExprId, ExtensionExpr};
use crate::sequence::{Item, Sequence};

pub use optimize::{ContextStep, NarrowingRound, OptimizePragma, OptimizeState, OptimizeStats};

pub const EXIST_NS: &str = "http://exist.sourceforge.net/NS/exist";
pub const EXIST_PREFIX: &str = "exist";

pub const OPTIMIZE: &str = "optimize";
pub const NO_INDEX: &str = "no-index";
pub const FORCE_INDEX_USE: &str = "force-index-use";

/// Lifecycle position of a pragma instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PragmaPhase {
    Created,
    Analyzed,
    Activated,
    Evaluating,
    Deactivated,
}

impl fmt::Display for PragmaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PragmaPhase::Created => "created",
            PragmaPhase::Analyzed => "analyzed",
            PragmaPhase::Activated => "activated",
            PragmaPhase::Evaluating => "evaluating",
            PragmaPhase::Deactivated => "deactivated",
        })
    }
}

#[derive(Debug, Clone)]
pub enum PragmaKind {
    Optimize(OptimizePragma),
    /// `exist:no-index`
    NoIndex,
    /// `exist:force-index-use`
    ForceIndexUse,
}

#[derive(Debug, Clone)]
pub struct Pragma {
    pub id: ExprId,
    pub name: QName,
    pub contents: String,
    pub kind: PragmaKind,
    analyzed: bool,
}

/// Splits pragma contents into `key=value` options.
pub fn parse_options(pragma: &QName, contents: &str) -> Result<Vec<(String, String)>> {
    contents
        .split_whitespace()
        .map(|token| match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
            _ => Err(Error::from_code(
                ErrorCode::EXXQDY0003,
                format!("invalid content found for pragma {pragma}: {contents}"),
            )),
        })
        .collect()
}

impl Pragma {
    /// Creates the pragma named `name`, or `None` for pragmas this
    /// implementation does not know. `explicit` is false for pragmas
    /// inserted by the compiler.
    pub fn create(
        id: ExprId,
        name: QName,
        contents: &str,
        config: &Configuration,
        explicit: bool,
    ) -> Result<Option<Pragma>> {
        if name.ns_uri.as_deref() != Some(EXIST_NS) {
            debug!(pragma = %name, "ignoring pragma from unknown namespace");
            return Ok(None);
        }
        let kind = match name.local.as_str() {
            OPTIMIZE => PragmaKind::Optimize(OptimizePragma::new(&name, contents, config, explicit)?),
            NO_INDEX => PragmaKind::NoIndex,
            FORCE_INDEX_USE => PragmaKind::ForceIndexUse,
            _ => {
                debug!(pragma = %name, "ignoring unknown pragma");
                return Ok(None);
            }
        };
        Ok(Some(Pragma { id, name, contents: contents.trim().to_owned(), kind, analyzed: false }))
    }

    pub fn phase(&self, ctx: &QueryContext) -> PragmaPhase {
        match ctx.phase(self.id) {
            Some(phase) => phase,
            None if self.analyzed => PragmaPhase::Analyzed,
            None => PragmaPhase::Created,
        }
    }

    pub fn as_optimize(&self) -> Option<&OptimizePragma> {
        match &self.kind {
            PragmaKind::Optimize(optimize) => Some(optimize),
            _ => None,
        }
    }

    pub(crate) fn analyze(&mut self, info: &mut AnalyzeContextInfo) {
        match &mut self.kind {
            PragmaKind::Optimize(optimize) => optimize.analyze(info),
            PragmaKind::NoIndex => no_index::analyze(info),
            PragmaKind::ForceIndexUse => {}
        }
        self.analyzed = true;
    }

    /// Binds the pragma to the expression it decorates.
    pub fn before(&self, ctx: &mut QueryContext, inner: &Expr) -> Result<()> {
        match &self.kind {
            PragmaKind::Optimize(optimize) => optimize.before(self.id, ctx, inner),
            PragmaKind::NoIndex => {}
            PragmaKind::ForceIndexUse => force_index::before(ctx, inner),
        }
        ctx.set_phase(self.id, PragmaPhase::Activated);
        Ok(())
    }

    /// Evaluates the decorated expression, or returns `None` to leave it to
    /// the next pragma.
    pub fn eval(
        &self,
        ctx: &mut QueryContext,
        inner: &Expr,
        context: Option<&Sequence>,
        item: Option<&Item>,
    ) -> Result<Option<Sequence>> {
        ctx.set_phase(self.id, PragmaPhase::Evaluating);
        match &self.kind {
            PragmaKind::Optimize(optimize) => optimize.eval(self.id, ctx, inner, context, item).map(Some),
            PragmaKind::NoIndex | PragmaKind::ForceIndexUse => Ok(None),
        }
    }

    pub fn after(&self, ctx: &mut QueryContext, inner: &Expr) -> Result<()> {
        ctx.set_phase(self.id, PragmaPhase::Deactivated);
        match &self.kind {
            PragmaKind::ForceIndexUse => force_index::after(ctx, inner),
            PragmaKind::Optimize(_) | PragmaKind::NoIndex => Ok(()),
        }
    }
}

impl fmt::Display for Pragma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contents.is_empty() {
            write!(f, "(# {} #)", self.name)
        } else {
            write!(f, "(# {} {} #)", self.name, self.contents)
        }
    }
}

pub(crate) fn eval_extension(
    ext: &ExtensionExpr,
    ctx: &mut QueryContext,
    context: Option<&Sequence>,
    item: Option<&Item>,
) -> Result<Sequence> {
    for pragma in &ext.pragmas {
        pragma.before(ctx, &ext.inner)?;
    }
    let mut result = None;
    for pragma in &ext.pragmas {
        if let Some(seq) = pragma.eval(ctx, &ext.inner, context, item)? {
            result = Some(seq);
            break;
        }
    }
    let result = match result {
        Some(seq) => seq,
        None => eval(&ext.inner, ctx, context, item)?,
    };
    for pragma in &ext.pragmas {
        pragma.after(ctx, &ext.inner)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn exist(local: &str) -> QName {
        QName::with_namespace(EXIST_NS, Some(EXIST_PREFIX), local)
    }

    #[rstest]
    #[case("", 0)]
    #[case("enable=yes", 1)]
    #[case("  enable=no   level=2 ", 2)]
    fn options(#[case] contents: &str, #[case] count: usize) {
        assert_eq!(parse_options(&exist(OPTIMIZE), contents).unwrap().len(), count);
    }

    #[rstest]
    #[case("enable")]
    #[case("=yes")]
    fn malformed_options(#[case] contents: &str) {
        let err = parse_options(&exist(OPTIMIZE), contents).unwrap_err();
        assert_eq!(err.code, ErrorCode::EXXQDY0003);
    }

    #[test]
    fn unknown_pragmas_are_ignored() {
        let config = Configuration::default();
        assert!(Pragma::create(ExprId(1), exist("timer"), "", &config, true).unwrap().is_none());
        let foreign = QName::with_namespace("urn:other", Some("o"), OPTIMIZE);
        assert!(Pragma::create(ExprId(1), foreign, "", &config, true).unwrap().is_none());
    }

    #[test]
    fn display_includes_contents() {
        let config = Configuration::default();
        let pragma = Pragma::create(ExprId(1), exist(OPTIMIZE), "enable=no", &config, true).unwrap().unwrap();
        assert_eq!(pragma.to_string(), "(# exist:optimize enable=no #)");
        let pragma = Pragma::create(ExprId(2), exist(NO_INDEX), "", &config, true).unwrap().unwrap();
        assert_eq!(pragma.to_string(), "(# exist:no-index #)");
    }
}
