//! Small builder for document trees, used by the XML loader and in tests.
//!
//! ```
//! use xmldb_core::builder::{attr, elem, text};
//!
//! // <book lang="en"><title>Dune</title></book>
//! let book = elem("book").attr(attr("lang", "en")).child(elem("title").child(text("Dune")));
//! assert_eq!(book.name().local, "book");
//! ```

use crate::qname::QName;

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Element(ElementBuilder),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementBuilder {
    name: QName,
    attributes: Vec<Attribute>,
    children: Vec<Content>,
}

impl ElementBuilder {
    pub fn new(name: QName) -> Self {
        Self { name, attributes: Vec::new(), children: Vec::new() }
    }

    pub fn attr(mut self, attribute: Attribute) -> Self {
        self.attributes.retain(|a| a.name != attribute.name);
        self.attributes.push(attribute);
        self
    }

    pub fn child(mut self, child: impl Into<Content>) -> Self {
        self.push(child.into());
        self
    }

    pub fn children<I: IntoIterator<Item = C>, C: Into<Content>>(mut self, it: I) -> Self {
        for c in it {
            self.push(c.into());
        }
        self
    }

    /// Shorthand for a single text child.
    pub fn text(self, value: &str) -> Self {
        self.child(text(value))
    }

    pub(crate) fn push(&mut self, content: Content) {
        // Adjacent text merges into one node.
        if let Content::Text(new) = &content
            && let Some(Content::Text(last)) = self.children.last_mut()
        {
            last.push_str(new);
            return;
        }
        if matches!(&content, Content::Text(t) if t.is_empty()) {
            return;
        }
        self.children.push(content);
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn content(&self) -> &[Content] {
        &self.children
    }
}

impl From<ElementBuilder> for Content {
    fn from(e: ElementBuilder) -> Self {
        Content::Element(e)
    }
}

fn qname(name: &str) -> QName {
    match name.split_once(':') {
        Some((prefix, local)) => QName { prefix: Some(prefix.to_owned()), local: local.to_owned(), ns_uri: None },
        None => QName::new(name),
    }
}

pub fn elem(name: &str) -> ElementBuilder {
    ElementBuilder::new(qname(name))
}

pub fn attr(name: &str, value: &str) -> Attribute {
    Attribute { name: qname(name), value: value.to_owned() }
}

pub fn text(value: &str) -> Content {
    Content::Text(value.to_owned())
}
