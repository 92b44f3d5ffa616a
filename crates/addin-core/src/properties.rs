//! Immutable string-keyed attribute bag attached to codons, conditions and runtimes.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::declaration::DeclarationReader;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots the attributes of the element the reader is positioned on.
    pub fn read(reader: &dyn DeclarationReader) -> Self {
        Self {
            values: reader.attributes().clone(),
        }
    }

    /// Builder-style insert, used while a bag is still being assembled.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Present and not blank.
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Parses the value; absent or unparsable values fall back to `default`.
    pub fn parse_or<T: FromStr>(&self, name: &str, default: T) -> T {
        self.get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Element;

    #[test]
    fn test_get_returns_default_when_absent() {
        let props = Properties::new().with("label", "Open");
        assert_eq!(props.get_or("label", "x"), "Open");
        assert_eq!(props.get_or("icon", "none"), "none");
        assert_eq!(props.get("icon"), None);
    }

    #[test]
    fn test_parse_or_falls_back_on_garbage() {
        let props: Properties = [("handleconditions", "true"), ("weight", "heavy")]
            .into_iter()
            .collect();
        assert!(props.parse_or("handleconditions", false));
        assert_eq!(props.parse_or("weight", 3u32), 3);
        assert_eq!(props.parse_or("missing", 7u32), 7);
    }

    #[test]
    fn test_read_snapshots_current_attributes() {
        let doc = Element::new("MenuItem").attr("id", "open").attr("label", "Open");
        let mut cursor = doc.cursor();
        assert!(cursor.advance());
        let props = Properties::read(&cursor);
        assert_eq!(props.len(), 2);
        assert_eq!(props.non_empty("id"), Some("open"));
    }
}
