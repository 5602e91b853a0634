use core::cmp::Ordering;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::qname::{IndexedName, NameType, QName};
use crate::value::{AtomicValue, parse_double};

/// Reserved collection holding database internals; never consulted for
/// index configuration.
pub const SYSTEM_COLLECTION_URI: &str = "/db/system";

pub fn is_system_collection(uri: &str) -> bool {
    uri == SYSTEM_COLLECTION_URI
        || uri.strip_prefix(SYSTEM_COLLECTION_URI).is_some_and(|rest| rest.starts_with('/'))
}

/// Declared value type of a range index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    #[serde(rename = "xs:string")]
    String,
    #[serde(rename = "xs:integer")]
    Integer,
    #[serde(rename = "xs:double")]
    Double,
}

impl IndexType {
    pub fn name(self) -> &'static str {
        match self {
            IndexType::String => "xs:string",
            IndexType::Integer => "xs:integer",
            IndexType::Double => "xs:double",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, IndexType::String)
    }

    /// Key for a stored node's string value, `None` if not castable.
    pub fn key_from_text(self, text: &str) -> Option<IndexKey> {
        match self {
            IndexType::String => Some(IndexKey::Text(text.to_owned())),
            #[allow(clippy::cast_precision_loss)]
            IndexType::Integer => text.trim().parse::<i64>().ok().map(|i| IndexKey::Number(i as f64)),
            IndexType::Double => parse_double(text).map(IndexKey::Number),
        }
    }

    /// Key for a query-side value; the value's type family must match.
    pub fn key_from_value(self, value: &AtomicValue) -> Option<IndexKey> {
        match (self, value) {
            (IndexType::String, AtomicValue::String(s) | AtomicValue::UntypedAtomic(s)) => {
                Some(IndexKey::Text(s.clone()))
            }
            (IndexType::Integer | IndexType::Double, v) if v.is_numeric() => v.as_f64().map(IndexKey::Number),
            _ => None,
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed key stored in a range index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Text(String),
    Number(f64),
}

impl IndexKey {
    pub fn partial_cmp_key(&self, other: &IndexKey) -> Option<Ordering> {
        match (self, other) {
            (IndexKey::Text(a), IndexKey::Text(b)) => Some(a.cmp(b)),
            (IndexKey::Number(a), IndexKey::Number(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            IndexKey::Text(s) => Some(s),
            IndexKey::Number(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeIndexSpec {
    pub name: IndexedName,
    #[serde(rename = "type")]
    pub index_type: IndexType,
}

impl RangeIndexSpec {
    pub fn new(name: IndexedName, index_type: IndexType) -> Self {
        Self { name, index_type }
    }
}

/// Collection level index configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexConfiguration {
    #[serde(default)]
    pub range_indexes: Vec<RangeIndexSpec>,
}

impl IndexConfiguration {
    pub fn with_range_index(mut self, name: IndexedName, index_type: IndexType) -> Self {
        self.range_indexes.retain(|spec| spec.name != name);
        self.range_indexes.push(RangeIndexSpec::new(name, index_type));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub uri: String,
    pub index_config: IndexConfiguration,
}

impl Collection {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), index_config: IndexConfiguration::default() }
    }

    pub fn is_system(&self) -> bool {
        is_system_collection(&self.uri)
    }

    /// Declared range index type for a name, if any.
    pub fn range_index(&self, qname: &QName, name_type: NameType) -> Option<IndexType> {
        self.index_config
            .range_indexes
            .iter()
            .find(|spec| spec.name.name_type == name_type && spec.name.qname == *qname)
            .map(|spec| spec.index_type)
    }
}

/// Normalizes a collection URI to `/db/...` without trailing slash.
pub fn normalize_collection_uri(uri: &str) -> String {
    let trimmed = uri.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "/db" || trimmed == "db" {
        return "/db".to_owned();
    }
    if trimmed.starts_with("/db/") {
        trimmed.to_owned()
    } else if let Some(rest) = trimmed.strip_prefix("db/") {
        format!("/db/{rest}")
    } else {
        format!("/db/{}", trimmed.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/db/system", true)]
    #[case("/db/system/config", true)]
    #[case("/db/systematic", false)]
    #[case("/db/books", false)]
    fn system_collection_detection(#[case] uri: &str, #[case] expected: bool) {
        assert_eq!(is_system_collection(uri), expected);
    }

    #[rstest]
    #[case("books", "/db/books")]
    #[case("/db/books/", "/db/books")]
    #[case("db/a/b", "/db/a/b")]
    #[case("/", "/db")]
    fn collection_uris_are_normalized(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_collection_uri(input), expected);
    }

    #[rstest]
    fn keys_respect_index_type() {
        assert_eq!(IndexType::Integer.key_from_text(" 12 "), Some(IndexKey::Number(12.0)));
        assert_eq!(IndexType::Integer.key_from_text("1.5"), None);
        assert_eq!(IndexType::Double.key_from_text("1.5"), Some(IndexKey::Number(1.5)));
        assert_eq!(IndexType::String.key_from_value(&AtomicValue::Integer(3)), None);
        assert_eq!(
            IndexType::Double.key_from_value(&AtomicValue::Integer(3)),
            Some(IndexKey::Number(3.0))
        );
    }

    #[rstest]
    fn range_index_lookup_by_name_type() {
        let collection = Collection {
            uri: "/db/books".into(),
            index_config: IndexConfiguration::default()
                .with_range_index(IndexedName::element("title"), IndexType::String)
                .with_range_index(IndexedName::attribute("year"), IndexType::Integer),
        };
        assert_eq!(collection.range_index(&QName::new("title"), NameType::Element), Some(IndexType::String));
        assert_eq!(collection.range_index(&QName::new("title"), NameType::Attribute), None);
        assert_eq!(collection.range_index(&QName::new("year"), NameType::Attribute), Some(IndexType::Integer));
    }

    #[rstest]
    fn index_config_from_json() {
        let config: IndexConfiguration =
            serde_json::from_str(r#"{"range_indexes":[{"name":"@lang","type":"xs:string"}]}"#).unwrap();
        assert_eq!(config.range_indexes[0].name, IndexedName::attribute("lang"));
        assert_eq!(config.range_indexes[0].index_type, IndexType::String);
    }
}
