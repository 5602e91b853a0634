//! XML text to [`ElementBuilder`] trees.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::builder::{Content, ElementBuilder, attr, elem};
use crate::error::{StoreError, StoreResult};

/// Parses a document and returns its root element.
///
/// Whitespace-only text is dropped, namespace declarations are not kept as
/// attributes. Comments and processing instructions are skipped.
pub fn parse_document(document: &str, xml: &str) -> StoreResult<ElementBuilder> {
    let malformed = |message: String| StoreError::MalformedXml { document: document.to_owned(), message };

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<ElementBuilder> = Vec::new();
    let mut root: Option<ElementBuilder> = None;

    let mut finish = |element: ElementBuilder, stack: &mut Vec<ElementBuilder>| -> StoreResult<()> {
        match stack.last_mut() {
            Some(parent) => {
                parent.push(Content::Element(element));
                Ok(())
            }
            None if root.is_none() => {
                root = Some(element);
                Ok(())
            }
            None => Err(malformed("more than one root element".to_owned())),
        }
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(start_element(e).map_err(&malformed)?),
            Ok(Event::Empty(ref e)) => {
                let element = start_element(e).map_err(&malformed)?;
                finish(element, &mut stack)?;
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| malformed("unbalanced end tag".to_owned()))?;
                finish(element, &mut stack)?;
            }
            Ok(Event::Text(ref e)) => {
                let value = e.unescape().map_err(|err| malformed(err.to_string()))?;
                if let Some(parent) = stack.last_mut() {
                    parent.push(Content::Text(value.into_owned()));
                }
            }
            Ok(Event::CData(e)) => {
                let value = String::from_utf8_lossy(&e.into_inner()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.push(Content::Text(value));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(format!("at position {}: {e}", reader.error_position()))),
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unclosed element".to_owned()));
    }
    drop(finish);
    root.ok_or_else(|| malformed("no root element".to_owned()))
}

fn start_element(e: &BytesStart<'_>) -> Result<ElementBuilder, String> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut element = elem(&name);
    for attribute in e.attributes() {
        let attribute = attribute.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attribute.unescape_value().map_err(|err| err.to_string())?;
        element = element.attr(attr(&key, &value));
    }
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::text;

    #[test]
    fn parses_nested_elements_attributes_and_text() {
        let root = parse_document(
            "lib.xml",
            r#"<library xmlns:x="urn:x">
                 <book lang="en"><title>Dune &amp; co</title></book>
                 <book/>
               </library>"#,
        )
        .unwrap();
        let expected = elem("library")
            .child(elem("book").attr(attr("lang", "en")).child(elem("title").child(text("Dune & co"))))
            .child(elem("book"));
        assert_eq!(root, expected);
    }

    #[test]
    fn rejects_unbalanced_input() {
        let err = parse_document("bad.xml", "<a><b></a>").unwrap_err();
        assert!(matches!(err, StoreError::MalformedXml { ref document, .. } if document == "bad.xml"));
    }

    #[test]
    fn rejects_empty_document() {
        assert!(parse_document("empty.xml", "   ").is_err());
    }
}
