//! XPath evaluation over scraper documents.
//!
//! Site rules express selectors as XPath 1.0. The parsed HTML tree is mirrored
//! into an `sxd_document` package (element and text nodes keep a link back to
//! their [`NodeId`]) and evaluated with `sxd_xpath`.

use std::collections::HashMap;

use ego_tree::NodeRef;
use scraper::{Html, Node};
use sxd_document::Package;
use sxd_document::dom::{Document as XDocument, Element as XElement};
use sxd_xpath::nodeset::Node as XNode;
use sxd_xpath::{Context, Factory, Value, XPath};

use crate::error::{Result, ScrapbookError};

pub use ego_tree::NodeId;

/// One XPath result.
///
/// `node` is set for element and text results; attribute results and
/// scalar values only carry their string value.
#[derive(Debug, Clone, PartialEq)]
pub struct XPathMatch {
    pub node: Option<NodeId>,
    pub value: String,
}

/// XPath evaluator for site config directives
pub struct XPathEvaluator {
    factory: Factory,
}

impl XPathEvaluator {
    /// Create a new XPath evaluator
    pub fn new() -> Self {
        Self { factory: Factory::new() }
    }

    /// Compile an expression.
    pub fn compile(&self, xpath: &str) -> Result<XPath> {
        self.factory
            .build(xpath)
            .map_err(|e| ScrapbookError::XPathError(format!("Invalid XPath '{}': {}", xpath, e)))?
            .ok_or_else(|| ScrapbookError::XPathError(format!("Invalid XPath: {}", xpath)))
    }

    /// Evaluate one expression against a document.
    pub fn evaluate(&self, html: &Html, xpath: &str) -> Result<Vec<XPathMatch>> {
        self.evaluate_all(html, &[xpath]).pop().unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Evaluate several expressions against the same document, mirroring the
    /// tree only once. Results are returned in expression order.
    pub fn evaluate_all<S: AsRef<str>>(&self, html: &Html, xpaths: &[S]) -> Vec<Result<Vec<XPathMatch>>> {
        let package = Package::new();
        let document = package.as_document();
        let index = mirror(&document, html);
        let context = Context::new();

        xpaths
            .iter()
            .map(|xpath| {
                let compiled = self.compile(xpath.as_ref())?;
                let value = compiled.evaluate(&context, document.root())?;
                Ok(collect(value, &index))
            })
            .collect()
    }

    /// Return the first non-empty string value produced by `xpaths`.
    pub fn first_string<S: AsRef<str>>(&self, html: &Html, xpaths: &[S]) -> Option<String> {
        self.evaluate_all(html, xpaths)
            .into_iter()
            .filter_map(|r| r.ok())
            .flatten()
            .map(|m| m.value.trim().to_string())
            .find(|v| !v.is_empty())
    }
}

impl Default for XPathEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn collect(value: Value<'_>, index: &HashMap<XNode<'_>, NodeId>) -> Vec<XPathMatch> {
    match value {
        Value::Nodeset(nodeset) => nodeset
            .document_order()
            .into_iter()
            .map(|node| XPathMatch { node: index.get(&node).copied(), value: node.string_value() })
            .collect(),
        Value::String(s) => vec![XPathMatch { node: None, value: s }],
        Value::Number(n) if n.is_finite() => vec![XPathMatch { node: None, value: n.to_string() }],
        Value::Number(_) | Value::Boolean(_) => Vec::new(),
    }
}

fn mirror<'d>(document: &XDocument<'d>, html: &Html) -> HashMap<XNode<'d>, NodeId> {
    let mut index = HashMap::new();
    for child in html.tree.root().children() {
        if matches!(child.value(), Node::Element(_)) {
            let element = mirror_element(document, child, &mut index);
            document.root().append_child(element);
        }
    }
    index
}

fn mirror_element<'d>(
    document: &XDocument<'d>, node: NodeRef<'_, Node>, index: &mut HashMap<XNode<'d>, NodeId>,
) -> XElement<'d> {
    let element = match node.value() {
        Node::Element(e) => {
            let element = document.create_element(e.name());
            for (name, value) in e.attrs() {
                element.set_attribute_value(name, value);
            }
            element
        }
        _ => document.create_element("_"),
    };
    index.insert(XNode::Element(element), node.id());

    for child in node.children() {
        match child.value() {
            Node::Element(_) => {
                let el = mirror_element(document, child, index);
                element.append_child(el);
            }
            Node::Text(t) => {
                let text = document.create_text(&t.text);
                element.append_child(text);
                index.insert(XNode::Text(text), child.id());
            }
            Node::Comment(c) => element.append_child(document.create_comment(&c.comment)),
            _ => {}
        }
    }

    element
}
