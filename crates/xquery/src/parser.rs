use std::sync::Arc;

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use xmldb_core::{AtomicValue, Axis, ComparisonOp};

use crate::error::{Error, Result};

pub mod ast;

#[derive(pest_derive::Parser)]
#[grammar = "xquery.pest"]
pub struct QueryParser;

impl QueryParser {
    /// Parses a query into its syntax tree.
    pub fn parse_query(input: &str) -> Result<ast::Expr> {
        let mut pairs = Self::parse(Rule::query, input).map_err(syntax_error)?;
        let query = next(&mut pairs, "query")?;
        let expr = next(&mut query.into_inner(), "expression")?;
        build_expr(expr)
    }
}

fn syntax_error(e: pest::error::Error<Rule>) -> Error {
    Error::syntax(e.to_string()).with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
}

fn unexpected(pair: &Pair<'_, Rule>) -> Error {
    let (line, col) = pair.as_span().start_pos().line_col();
    Error::syntax(format!("unexpected {:?} at {line}:{col}", pair.as_rule()))
}

fn next<'i>(pairs: &mut impl Iterator<Item = Pair<'i, Rule>>, what: &str) -> Result<Pair<'i, Rule>> {
    pairs.next().ok_or_else(|| Error::syntax(format!("missing {what}")))
}

fn build_expr(pair: Pair<'_, Rule>) -> Result<ast::Expr> {
    match pair.as_rule() {
        Rule::expr => {
            let mut items = pair.into_inner().map(build_expr).collect::<Result<Vec<_>>>()?;
            if items.len() == 1 {
                return Ok(items.remove(0));
            }
            Ok(ast::Expr::Sequence(items))
        }
        Rule::or_expr => fold_chain(pair, Rule::K_OR, |a, b| ast::Expr::Or(Box::new(a), Box::new(b))),
        Rule::and_expr => fold_chain(pair, Rule::K_AND, |a, b| ast::Expr::And(Box::new(a), Box::new(b))),
        Rule::comparison_expr => {
            let mut inner = pair.into_inner();
            let left = build_expr(next(&mut inner, "operand")?)?;
            let Some(op) = inner.next() else {
                return Ok(left);
            };
            let right = build_expr(next(&mut inner, "operand")?)?;
            Ok(ast::Expr::Comparison { op: comparison_op(&op)?, left: Box::new(left), right: Box::new(right) })
        }
        Rule::path_expr => build_path(pair),
        Rule::integer_literal => {
            let value = pair.as_str().parse::<i64>().map_err(|e| Error::syntax(format!("invalid integer: {e}")))?;
            Ok(ast::Expr::Literal(AtomicValue::Integer(value)))
        }
        Rule::decimal_literal | Rule::double_literal => {
            let value = pair.as_str().parse::<f64>().map_err(|e| Error::syntax(format!("invalid number: {e}")))?;
            Ok(ast::Expr::Literal(AtomicValue::Double(value)))
        }
        Rule::string_literal => {
            let content = next(&mut pair.into_inner(), "string content")?;
            let value = match content.as_rule() {
                Rule::dq_inner => content.as_str().replace("\"\"", "\""),
                _ => content.as_str().replace("''", "'"),
            };
            Ok(ast::Expr::Literal(AtomicValue::String(value)))
        }
        Rule::var_ref => Ok(ast::Expr::VarRef(next(&mut pair.into_inner(), "variable name")?.as_str().to_owned())),
        Rule::function_call => {
            let mut inner = pair.into_inner();
            let name = next(&mut inner, "function name")?.as_str().to_owned();
            let args = inner.map(build_expr).collect::<Result<Vec<_>>>()?;
            Ok(ast::Expr::FunctionCall { name, args })
        }
        Rule::parenthesized_expr => match pair.into_inner().next() {
            Some(expr) => build_expr(expr),
            None => Ok(ast::Expr::Sequence(Vec::new())),
        },
        Rule::pragma_expr => {
            let mut pragmas = Vec::new();
            let mut inner = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::pragma => {
                        let mut parts = p.into_inner();
                        let name = next(&mut parts, "pragma name")?.as_str().to_owned();
                        let contents = parts.next().map(|c| c.as_str().trim().to_owned()).unwrap_or_default();
                        pragmas.push(ast::PragmaDecl { name, contents });
                    }
                    _ => inner = Some(Box::new(build_expr(p)?)),
                }
            }
            Ok(ast::Expr::Pragma { pragmas, inner })
        }
        _ => Err(unexpected(&pair)),
    }
}

fn fold_chain(
    pair: Pair<'_, Rule>,
    operator: Rule,
    combine: impl Fn(ast::Expr, ast::Expr) -> ast::Expr,
) -> Result<ast::Expr> {
    let mut operands = pair.into_inner().filter(|p| p.as_rule() != operator);
    let mut expr = build_expr(next(&mut operands, "operand")?)?;
    for operand in operands {
        expr = combine(expr, build_expr(operand)?);
    }
    Ok(expr)
}

fn comparison_op(pair: &Pair<'_, Rule>) -> Result<ComparisonOp> {
    Ok(match pair.as_str() {
        "=" => ComparisonOp::Eq,
        "!=" => ComparisonOp::Ne,
        "<" => ComparisonOp::Lt,
        "<=" => ComparisonOp::Le,
        ">" => ComparisonOp::Gt,
        ">=" => ComparisonOp::Ge,
        _ => return Err(unexpected(pair)),
    })
}

fn build_path(pair: Pair<'_, Rule>) -> Result<ast::Expr> {
    let mut start = None;
    let mut steps = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::root_descendant => start = Some(ast::PathStart::RootDescendant),
            Rule::root_child => start = Some(ast::PathStart::Root),
            Rule::relative_path => {
                let mut descendant = start == Some(ast::PathStart::RootDescendant);
                for p in part.into_inner() {
                    match p.as_rule() {
                        Rule::path_sep => descendant = p.as_str() == "//",
                        Rule::step_expr => {
                            steps.push(ast::Step { descendant, kind: build_step(p)? });
                            descendant = false;
                        }
                        _ => return Err(unexpected(&p)),
                    }
                }
            }
            _ => return Err(unexpected(&part)),
        }
    }

    // A lone primary is not a path.
    if let (None, [ast::Step { kind: ast::StepKind::Filter { primary, predicates }, .. }]) = (start, steps.as_slice())
        && predicates.is_empty()
    {
        return Ok(primary.as_ref().clone());
    }
    Ok(ast::Expr::Path(ast::PathExpr { start, steps }))
}

fn build_step(pair: Pair<'_, Rule>) -> Result<ast::StepKind> {
    let step = next(&mut pair.into_inner(), "step")?;
    let rule = step.as_rule();
    let mut inner = step.into_inner();
    match rule {
        Rule::filter_expr => {
            let primary = build_expr(next(&mut inner, "primary expression")?)?;
            let predicates = build_predicates(inner)?;
            Ok(ast::StepKind::Filter { primary: Box::new(primary), predicates })
        }
        Rule::axis_step => {
            let head = next(&mut inner, "axis step")?;
            let (axis, test) = match head.as_rule() {
                Rule::abbrev_parent => (Axis::Parent, ast::NodeTest::AnyNode),
                Rule::abbrev_self => (Axis::SelfAxis, ast::NodeTest::AnyNode),
                Rule::full_step => {
                    let mut parts = head.into_inner();
                    let name = next(&mut parts, "axis")?;
                    let axis = Axis::from_name(name.as_str()).ok_or_else(|| unexpected(&name))?;
                    (axis, build_node_test(next(&mut parts, "node test")?)?)
                }
                Rule::abbrev_step => {
                    let mut parts = head.into_inner().peekable();
                    let attribute = parts.next_if(|p| p.as_rule() == Rule::at).is_some();
                    let test = build_node_test(next(&mut parts, "node test")?)?;
                    (if attribute { Axis::Attribute } else { Axis::Child }, test)
                }
                _ => return Err(unexpected(&head)),
            };
            Ok(ast::StepKind::Axis { axis, test, predicates: build_predicates(inner)? })
        }
        _ => Err(Error::syntax(format!("unexpected {rule:?}"))),
    }
}

fn build_node_test(pair: Pair<'_, Rule>) -> Result<ast::NodeTest> {
    let test = next(&mut pair.into_inner(), "node test")?;
    Ok(match test.as_rule() {
        Rule::wildcard => ast::NodeTest::Wildcard,
        Rule::qname => ast::NodeTest::Name(test.as_str().to_owned()),
        Rule::kind_test => match next(&mut test.into_inner(), "kind test")?.as_rule() {
            Rule::text_kind => ast::NodeTest::Text,
            _ => ast::NodeTest::AnyNode,
        },
        _ => return Err(unexpected(&test)),
    })
}

fn build_predicates(pairs: Pairs<'_, Rule>) -> Result<Vec<ast::Expr>> {
    pairs
        .map(|p| match p.as_rule() {
            Rule::predicate => build_expr(next(&mut p.into_inner(), "predicate")?),
            _ => Err(unexpected(&p)),
        })
        .collect()
}
