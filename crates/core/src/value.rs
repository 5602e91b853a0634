use core::cmp::Ordering;
use core::fmt;

use serde::{Deserialize, Serialize};

/// Atomic values produced by atomization and literals.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicValue {
    String(String),
    UntypedAtomic(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
}

impl AtomicValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AtomicValue::String(_) => "xs:string",
            AtomicValue::UntypedAtomic(_) => "xs:untypedAtomic",
            AtomicValue::Integer(_) => "xs:integer",
            AtomicValue::Double(_) => "xs:double",
            AtomicValue::Boolean(_) => "xs:boolean",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, AtomicValue::Integer(_) | AtomicValue::Double(_))
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self, AtomicValue::String(_) | AtomicValue::UntypedAtomic(_))
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AtomicValue::Integer(i) => Some(*i as f64),
            AtomicValue::Double(d) => Some(*d),
            AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => parse_double(s),
            AtomicValue::Boolean(_) => None,
        }
    }

    pub fn string_value(&self) -> String {
        match self {
            AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => s.clone(),
            AtomicValue::Integer(i) => i.to_string(),
            AtomicValue::Double(d) => format_double(*d),
            AtomicValue::Boolean(b) => b.to_string(),
        }
    }
}

impl fmt::Display for AtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtomicValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            other => f.write_str(&other.string_value()),
        }
    }
}

/// Lexical double parsing as used for `xs:untypedAtomic` to `xs:double` casts.
pub fn parse_double(s: &str) -> Option<f64> {
    let t = s.trim();
    match t {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ if t.is_empty() || t.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => None,
        _ => t.parse::<f64>().ok(),
    }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{d:.0}")
    } else {
        d.to_string()
    }
}

/// Operators of XPath general comparisons, shared with range index lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Eq => ordering == Ordering::Equal,
            ComparisonOp::Ne => ordering != Ordering::Equal,
            ComparisonOp::Lt => ordering == Ordering::Less,
            ComparisonOp::Le => ordering != Ordering::Greater,
            ComparisonOp::Gt => ordering == Ordering::Greater,
            ComparisonOp::Ge => ordering != Ordering::Less,
        }
    }

    /// Comparison of two possibly unordered values (NaN): only `!=` holds.
    pub fn holds_partial(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            Some(o) => self.holds(o),
            None => self == ComparisonOp::Ne,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
