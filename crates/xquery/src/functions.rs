//! Builtin functions.

use xmldb_core::AtomicValue;

use crate::context::QueryContext;
use crate::error::{Error, ErrorCode, Result};
use crate::evaluator::{atomize, effective_boolean_value, eval};
use crate::expr::FunctionCall;
use crate::sequence::{Item, Sequence};

/// Names and accepted arities of the builtins.
pub const BUILTINS: &[(&str, &[usize])] = &[
    ("collection", &[0, 1]),
    ("count", &[1]),
    ("exists", &[1]),
    ("empty", &[1]),
    ("not", &[1]),
    ("string", &[0, 1]),
    ("contains", &[2]),
    ("starts-with", &[2]),
    ("true", &[0]),
    ("false", &[0]),
];

/// Checks that `name/arity` denotes a builtin.
pub fn check_signature(name: &str, arity: usize) -> Result<()> {
    match BUILTINS.iter().find(|(n, _)| *n == name) {
        Some((_, arities)) if arities.contains(&arity) => Ok(()),
        Some(_) => Err(Error::from_code(
            ErrorCode::XPST0017,
            format!("function {name}() does not accept {arity} argument(s)"),
        )),
        None => Err(Error::from_code(ErrorCode::XPST0017, format!("unknown function {name}()"))),
    }
}

pub(crate) fn call(
    call: &FunctionCall,
    ctx: &mut QueryContext,
    context: Option<&Sequence>,
    item: Option<&Item>,
) -> Result<Sequence> {
    check_signature(&call.name, call.args.len())?;
    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        args.push(eval(arg, ctx, context, item)?);
    }

    match (call.name.as_str(), args.as_slice()) {
        ("collection", []) => Ok(Sequence::from_nodes(ctx.db().all_documents())),
        ("collection", [uri]) => {
            let uri = string_arg(ctx, uri, "collection")?;
            Ok(Sequence::from_nodes(ctx.db().documents(&uri)?))
        }
        ("count", [seq]) => Ok(Sequence::singleton(AtomicValue::Integer(i64::try_from(seq.len()).unwrap_or(i64::MAX)))),
        ("exists", [seq]) => Ok(Sequence::boolean(!seq.is_empty())),
        ("empty", [seq]) => Ok(Sequence::boolean(seq.is_empty())),
        ("not", [seq]) => Ok(Sequence::boolean(!effective_boolean_value(seq)?)),
        ("string", []) => {
            let focus = match (item, context) {
                (Some(item), _) => Sequence::Items(vec![item.clone()]),
                (None, Some(seq)) => seq.clone(),
                (None, None) => return Err(Error::from_code(ErrorCode::XPDY0002, "string() needs a context item")),
            };
            Ok(Sequence::singleton(AtomicValue::String(string_arg(ctx, &focus, "string")?)))
        }
        ("string", [seq]) => Ok(Sequence::singleton(AtomicValue::String(string_arg(ctx, seq, "string")?))),
        ("contains", [haystack, needle]) => {
            let haystack = string_arg(ctx, haystack, "contains")?;
            let needle = string_arg(ctx, needle, "contains")?;
            Ok(Sequence::boolean(haystack.contains(&needle)))
        }
        ("starts-with", [value, prefix]) => {
            let value = string_arg(ctx, value, "starts-with")?;
            let prefix = string_arg(ctx, prefix, "starts-with")?;
            Ok(Sequence::boolean(value.starts_with(&prefix)))
        }
        ("true", []) => Ok(Sequence::boolean(true)),
        ("false", []) => Ok(Sequence::boolean(false)),
        (name, _) => Err(Error::from_code(ErrorCode::XPST0017, format!("unknown function {name}()"))),
    }
}

/// String value of an optional single item; the empty sequence is `""`.
fn string_arg(ctx: &QueryContext, seq: &Sequence, function: &str) -> Result<String> {
    let values = atomize(ctx, seq)?;
    match values.as_slice() {
        [] => Ok(String::new()),
        [value] => Ok(value.string_value()),
        _ => Err(Error::type_error(format!("{function}() expects at most one item, got {}", values.len()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("count", 1, true)]
    #[case("count", 2, false)]
    #[case("string", 0, true)]
    #[case("matches", 2, false)]
    fn signatures(#[case] name: &str, #[case] arity: usize, #[case] ok: bool) {
        let result = check_signature(name, arity);
        assert_eq!(result.is_ok(), ok);
        if let Err(e) = result {
            assert_eq!(e.code, ErrorCode::XPST0017);
        }
    }
}
