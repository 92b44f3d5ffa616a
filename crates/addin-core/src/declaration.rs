//! Structured declaration documents and the pull cursor the tree reads from.
//!
//! The tree never inspects raw markup. It consumes a [`DeclarationReader`]: a
//! depth-first cursor that reports a `Start` event when entering an element
//! and an `End` event when leaving it. Empty elements still produce both.
//!
//! [`Element`] is the in-memory document shape; it deserializes directly from
//! JSON so add-in documents can be stored as `.json` files:
//!
//! ```json
//! { "name": "AddIn", "attributes": { "name": "core" }, "children": [] }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of the event the cursor is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Start,
    End,
}

/// Pull-based cursor over a nested element tree.
pub trait DeclarationReader {
    /// Moves to the next event. Returns `false` once the document is exhausted.
    fn advance(&mut self) -> bool;

    /// Kind of the current event, `None` before the first `advance`.
    fn kind(&self) -> Option<ElementKind>;

    /// Local name of the current element.
    fn name(&self) -> &str;

    /// Attributes of the current element.
    fn attributes(&self) -> &BTreeMap<String, String>;

    /// True when the current element has no child elements.
    fn is_empty(&self) -> bool;

    /// Text content of the current element.
    fn inner_text(&self) -> Option<String>;

    /// Advances until a `Start` event for `name`. Returns `false` if none.
    fn move_to(&mut self, name: &str) -> bool {
        while self.advance() {
            if self.kind() == Some(ElementKind::Start) && self.name() == name {
                return true;
            }
        }
        false
    }
}

/// One element of a declaration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Parses a JSON document into an element tree.
    pub fn from_json(input: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Concatenated text of this element and its descendants.
    pub fn all_text(&self) -> String {
        let mut out = self.text.clone().unwrap_or_default();
        for child in &self.children {
            out.push_str(&child.all_text());
        }
        out
    }

    /// Returns a cursor positioned before this element.
    pub fn cursor(&self) -> ElementCursor<'_> {
        ElementCursor::new(self)
    }
}

enum Step<'a> {
    Enter(&'a Element),
    Leave(&'a Element),
}

/// [`DeclarationReader`] over an in-memory [`Element`] tree.
pub struct ElementCursor<'a> {
    pending: Vec<Step<'a>>,
    current: Option<&'a Element>,
    kind: Option<ElementKind>,
}

impl<'a> ElementCursor<'a> {
    pub fn new(root: &'a Element) -> Self {
        Self {
            pending: vec![Step::Enter(root)],
            current: None,
            kind: None,
        }
    }

    /// The element the cursor is positioned on.
    pub fn current(&self) -> Option<&'a Element> {
        self.current
    }
}

static NO_ATTRIBUTES: BTreeMap<String, String> = BTreeMap::new();

impl DeclarationReader for ElementCursor<'_> {
    fn advance(&mut self) -> bool {
        match self.pending.pop() {
            Some(Step::Enter(element)) => {
                self.pending.push(Step::Leave(element));
                for child in element.children.iter().rev() {
                    self.pending.push(Step::Enter(child));
                }
                self.current = Some(element);
                self.kind = Some(ElementKind::Start);
                true
            }
            Some(Step::Leave(element)) => {
                self.current = Some(element);
                self.kind = Some(ElementKind::End);
                true
            }
            None => false,
        }
    }

    fn kind(&self) -> Option<ElementKind> {
        self.kind
    }

    fn name(&self) -> &str {
        self.current.map(|e| e.name.as_str()).unwrap_or_default()
    }

    fn attributes(&self) -> &BTreeMap<String, String> {
        self.current.map(|e| &e.attributes).unwrap_or(&NO_ATTRIBUTES)
    }

    fn is_empty(&self) -> bool {
        self.current.map(|e| e.children.is_empty()).unwrap_or(true)
    }

    fn inner_text(&self) -> Option<String> {
        self.current.map(Element::all_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(root: &Element) -> Vec<(ElementKind, String)> {
        let mut cursor = root.cursor();
        let mut out = Vec::new();
        while cursor.advance() {
            out.push((cursor.kind().unwrap(), cursor.name().to_string()));
        }
        out
    }

    #[test]
    fn test_cursor_emits_start_and_end_in_document_order() {
        let doc = Element::new("a")
            .child(Element::new("b").child(Element::new("c")))
            .child(Element::new("d"));

        let got = events(&doc);
        let expected = vec![
            (ElementKind::Start, "a"),
            (ElementKind::Start, "b"),
            (ElementKind::Start, "c"),
            (ElementKind::End, "c"),
            (ElementKind::End, "b"),
            (ElementKind::Start, "d"),
            (ElementKind::End, "d"),
            (ElementKind::End, "a"),
        ];
        assert_eq!(
            got,
            expected
                .into_iter()
                .map(|(k, n)| (k, n.to_string()))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_move_to_finds_nested_element() {
        let doc = Element::new("root").child(Element::new("AddIn").attr("name", "core"));
        let mut cursor = doc.cursor();
        assert!(cursor.move_to("AddIn"));
        assert_eq!(cursor.attributes().get("name").map(String::as_str), Some("core"));
        assert!(cursor.is_empty());
        assert!(!cursor.move_to("AddIn"));
    }

    #[test]
    fn test_element_deserializes_from_json() {
        let doc = Element::from_json(
            r#"{"name":"Item","attributes":{"id":"x"},"text":"hello","children":[]}"#,
        )
        .unwrap();
        assert_eq!(doc.name, "Item");
        assert_eq!(doc.attributes["id"], "x");
        assert_eq!(doc.all_text(), "hello");
    }
}
