use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Qualified name of an element or attribute.
///
/// Equality and hashing ignore the prefix; only namespace URI and local
/// part identify a name.
#[derive(Debug, Clone, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

impl QName {
    pub fn new(local: impl Into<String>) -> Self {
        Self { prefix: None, local: local.into(), ns_uri: None }
    }

    pub fn with_namespace(ns_uri: impl Into<String>, prefix: Option<&str>, local: impl Into<String>) -> Self {
        Self { prefix: prefix.map(str::to_owned), local: local.into(), ns_uri: Some(ns_uri.into()) }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.ns_uri == other.ns_uri
    }
}

impl PartialOrd for QName {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QName {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (&self.ns_uri, &self.local).cmp(&(&other.ns_uri, &other.local))
    }
}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ns_uri.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.prefix, &self.ns_uri) {
            (Some(prefix), _) => write!(f, "{prefix}:{}", self.local),
            (None, Some(ns)) => write!(f, "Q{{{ns}}}{}", self.local),
            (None, None) => f.write_str(&self.local),
        }
    }
}

/// Distinguishes element names from attribute names in index lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameType {
    Element,
    Attribute,
}

/// A name as it appears in index configuration: `title` addresses elements,
/// `@lang` addresses attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IndexedName {
    pub name_type: NameType,
    pub qname: QName,
}

impl IndexedName {
    pub fn element(local: impl Into<String>) -> Self {
        Self { name_type: NameType::Element, qname: QName::new(local) }
    }

    pub fn attribute(local: impl Into<String>) -> Self {
        Self { name_type: NameType::Attribute, qname: QName::new(local) }
    }

    pub fn new(name_type: NameType, qname: QName) -> Self {
        Self { name_type, qname }
    }
}

impl FromStr for IndexedName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (name_type, local) = match trimmed.strip_prefix('@') {
            Some(rest) => (NameType::Attribute, rest),
            None => (NameType::Element, trimmed),
        };
        let valid = !local.is_empty()
            && local.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !local.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.');
        if !valid {
            return Err(format!("invalid index name '{s}'"));
        }
        Ok(Self { name_type, qname: QName::new(local) })
    }
}

impl TryFrom<String> for IndexedName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IndexedName> for String {
    fn from(value: IndexedName) -> Self {
        value.to_string()
    }
}

impl fmt::Display for IndexedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name_type {
            NameType::Element => write!(f, "{}", self.qname),
            NameType::Attribute => write!(f, "@{}", self.qname),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("title", NameType::Element, "title")]
    #[case("@lang", NameType::Attribute, "lang")]
    #[case(" year ", NameType::Element, "year")]
    fn parses_index_names(#[case] input: &str, #[case] kind: NameType, #[case] local: &str) {
        let parsed: IndexedName = input.parse().unwrap();
        assert_eq!(parsed.name_type, kind);
        assert_eq!(parsed.qname.local, local);
    }

    #[rstest]
    #[case("")]
    #[case("@")]
    #[case("1abc")]
    #[case("a b")]
    fn rejects_malformed_index_names(#[case] input: &str) {
        assert!(input.parse::<IndexedName>().is_err());
    }

    #[rstest]
    fn prefix_does_not_affect_equality() {
        let a = QName::with_namespace("urn:x", Some("a"), "item");
        let b = QName::with_namespace("urn:x", Some("b"), "item");
        assert_eq!(a, b);
        assert_ne!(a, QName::new("item"));
    }
}
