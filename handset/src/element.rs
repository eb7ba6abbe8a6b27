//! Accessibility tree snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Element bounds in points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Left edge.
    #[serde(rename = "X", alias = "x")]
    pub x: f64,
    /// Top edge.
    #[serde(rename = "Y", alias = "y")]
    pub y: f64,
    /// Width.
    #[serde(rename = "Width", alias = "width")]
    pub width: f64,
    /// Height.
    #[serde(rename = "Height", alias = "height")]
    pub height: f64,
}

impl Frame {
    /// Center point, the usual tap target.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One UI element and its subtree at a single point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// String attributes such as `identifier`, `label`, `value`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Bounds, when the element is laid out.
    #[serde(default)]
    pub frame: Option<Frame>,
    /// Child elements in z-order.
    #[serde(default)]
    pub children: Vec<Element>,
}

impl Element {
    /// Parses the JSON returned by the companion.
    ///
    /// A top-level array (one entry per window) is wrapped in a synthetic
    /// root element.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        match serde_json::from_str::<Roots>(json)? {
            Roots::One(root) => Ok(root),
            Roots::Many(children) => Ok(Self {
                children,
                ..Self::default()
            }),
        }
    }

    /// Looks up an attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Depth-first, pre-order iterator over this element and its descendants.
    pub fn iter(&self) -> impl Iterator<Item = &Self> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }

    /// First element (pre-order) whose attribute `name` equals `value`.
    pub fn find(&self, name: &str, value: &str) -> Option<&Self> {
        self.iter().find(|e| e.attribute(name) == Some(value))
    }
}

/// Top-level shapes accepted by [`Element::from_json`].
#[derive(Deserialize)]
#[serde(untagged)]
enum Roots {
    /// One root per window. Tried first so an array never reads as a
    /// struct sequence.
    Many(Vec<Element>),
    /// A single root element.
    One(Element),
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"{
        "attributes": {"identifier": "root"},
        "frame": {"X": 0, "Y": 0, "Width": 390, "Height": 844},
        "children": [
            {"attributes": {"identifier": "login", "label": "Log in"},
             "frame": {"X": 20, "Y": 700, "Width": 350, "Height": 44}},
            {"attributes": {"identifier": "list"},
             "children": [{"attributes": {"identifier": "row-1"}}]}
        ]
    }"#;

    #[test]
    fn parses_nested_tree() {
        let root = Element::from_json(TREE).unwrap();
        assert_eq!(root.attribute("identifier"), Some("root"));
        assert_eq!(root.children.len(), 2);
        let ids: Vec<_> = root.iter().filter_map(|e| e.attribute("identifier")).collect();
        assert_eq!(ids, ["root", "login", "list", "row-1"]);
    }

    #[test]
    fn finds_by_attribute_and_centers() {
        let root = Element::from_json(TREE).unwrap();
        let login = root.find("label", "Log in").unwrap();
        assert_eq!(login.frame.unwrap().center(), (195.0, 722.0));
        assert!(root.find("identifier", "missing").is_none());
    }

    #[test]
    fn wraps_window_arrays() {
        let root = Element::from_json(r#"[{"attributes":{"identifier":"a"}},{}]"#).unwrap();
        assert!(root.attributes.is_empty());
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn rejects_non_tree_json() {
        assert!(Element::from_json("42").is_err());
    }
}
