//! HTML parsing and DOM manipulation.
//!
//! This module provides the [`Document`] and [`Element`] types for reading
//! an HTML tree with CSS selectors or XPath, an [`Edits`] plan describing
//! structural changes keyed by node, and [`Dom`], the serialized document
//! carried through the extraction pipeline.
//!
//! # Example
//!
//! ```rust
//! use scrapbook_core::dom::{Dom, Edits};
//!
//! let mut dom = Dom::new("<html><body><p>Keep</p><aside>Drop</aside></body></html>");
//! dom.edit(|doc, edits| {
//!     for el in doc.select("aside").unwrap() {
//!         edits.remove(el.id());
//!     }
//! });
//! assert_eq!(dom.body_html(), "<p>Keep</p>");
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node, Selector};

use crate::xpath::{XPathEvaluator, XPathMatch};
use crate::{Result, ScrapbookError};

pub use ego_tree::NodeId;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input", "keygen", "link",
    "meta", "param", "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] =
    &["style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript"];

/// Whether `name` is an element without content or end tag.
pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

/// Represents a parsed HTML document.
///
/// A Document wraps an HTML page and provides methods for querying elements
/// using CSS selectors or XPath, and for rendering it back with edits applied.
pub struct Document {
    html: Html,
}

impl Document {
    /// Parses a full HTML document.
    pub fn parse(html: &str) -> Self {
        Self { html: Html::parse_document(html) }
    }

    /// Gets the raw HTML representation.
    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Selects elements using a CSS selector.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapbookError::HtmlParseError`] if the selector is invalid.
    pub fn select(&'_ self, selector: &str) -> Result<Vec<Element<'_>>> {
        let sel = parse_selector(selector)?;
        Ok(self.html.select(&sel).map(|el| Element { element: el }).collect())
    }

    /// Selects the first element matching a CSS selector.
    pub fn select_first(&'_ self, selector: &str) -> Result<Option<Element<'_>>> {
        let sel = parse_selector(selector)?;
        Ok(self.html.select(&sel).next().map(|el| Element { element: el }))
    }

    /// Evaluates an XPath expression.
    pub fn xpath(&self, expr: &str) -> Result<Vec<XPathMatch>> {
        XPathEvaluator::new().evaluate(&self.html, expr)
    }

    /// Evaluates an XPath expression and keeps only element results.
    pub fn xpath_elements(&'_ self, expr: &str) -> Result<Vec<Element<'_>>> {
        Ok(self.xpath(expr)?.into_iter().filter_map(|m| m.node.and_then(|id| self.element(id))).collect())
    }

    /// Gets an element by node id.
    pub fn element(&'_ self, id: NodeId) -> Option<Element<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap).map(|element| Element { element })
    }

    /// Gets the `<body>` element.
    pub fn body(&'_ self) -> Option<Element<'_>> {
        self.select_first("body").ok().flatten()
    }

    /// Gets the title of the document.
    pub fn title(&self) -> Option<String> {
        self.select_first("title").ok().flatten().map(|el| el.text())
    }

    /// Gets all text content from the document.
    pub fn text_content(&self) -> String {
        self.html.root_element().text().collect()
    }

    /// Renders the whole document with `edits` applied.
    pub fn render(&self, edits: &Edits) -> String {
        let mut out = String::new();
        for child in self.html.tree.root().children() {
            serialize(child, edits, &mut out);
        }
        out
    }

    /// Renders the children of a node with `edits` applied.
    pub fn render_children(&self, id: NodeId, edits: &Edits) -> String {
        let mut out = String::new();
        if let Some(node) = self.html.tree.get(id) {
            for child in node.children() {
                serialize(child, edits, &mut out);
            }
        }
        out
    }

    /// Renders a node (and its subtree) with `edits` applied.
    pub fn render_node(&self, id: NodeId, edits: &Edits) -> String {
        let mut out = String::new();
        if let Some(node) = self.html.tree.get(id) {
            serialize(node, edits, &mut out);
        }
        out
    }
}

/// A wrapper around scraper's ElementRef.
#[derive(Clone, Copy, Debug)]
pub struct Element<'a> {
    element: ElementRef<'a>,
}

impl<'a> Element<'a> {
    /// The tree node id of this element.
    pub fn id(&self) -> NodeId {
        self.element.id()
    }

    /// The wrapped scraper reference.
    pub fn element_ref(&self) -> ElementRef<'a> {
        self.element
    }

    /// Gets the inner HTML of this element.
    pub fn inner_html(&self) -> String {
        self.element.inner_html()
    }

    /// Gets the outer HTML of this element.
    pub fn outer_html(&self) -> String {
        self.element.html()
    }

    /// Gets the text content of this element.
    pub fn text(&self) -> String {
        self.element.text().collect()
    }

    /// Gets the value of an attribute.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.element.value().attr(name)
    }

    /// Iterates over attribute names and values.
    pub fn attrs(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.element.value().attrs()
    }

    /// Gets the lowercase tag name of this element.
    pub fn tag_name(&self) -> String {
        self.element.value().name().to_lowercase()
    }

    /// The parent element, if any.
    pub fn parent(&self) -> Option<Element<'a>> {
        self.element.parent().and_then(ElementRef::wrap).map(|element| Element { element })
    }

    /// Direct element children.
    pub fn children(&self) -> Vec<Element<'a>> {
        self.element.children().filter_map(ElementRef::wrap).map(|element| Element { element }).collect()
    }

    /// True when the element has no child elements and only whitespace text.
    pub fn is_blank(&self) -> bool {
        self.element.children().all(|c| match c.value() {
            Node::Text(t) => t.trim().is_empty(),
            Node::Comment(_) => true,
            _ => false,
        })
    }

    /// Selects descendant elements using a CSS selector.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapbookError::HtmlParseError`] if the selector is invalid.
    pub fn select(&self, selector: &str) -> Result<Vec<Element<'a>>> {
        let sel = parse_selector(selector)?;
        Ok(self.element.select(&sel).map(|el| Element { element: el }).collect())
    }
}

/// Structural changes to apply when rendering a [`Document`].
#[derive(Debug, Default, Clone)]
pub struct Edits {
    removed: HashSet<NodeId>,
    unwrapped: HashSet<NodeId>,
    replaced: HashMap<NodeId, String>,
    renamed: HashMap<NodeId, String>,
    set_attrs: HashMap<NodeId, Vec<(String, String)>>,
    removed_attrs: HashMap<NodeId, HashSet<String>>,
    append_html: HashMap<NodeId, String>,
}

impl Edits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.unwrapped.is_empty()
            && self.replaced.is_empty()
            && self.renamed.is_empty()
            && self.set_attrs.is_empty()
            && self.removed_attrs.is_empty()
            && self.append_html.is_empty()
    }

    /// Drop a node and its subtree.
    pub fn remove(&mut self, id: NodeId) {
        self.removed.insert(id);
    }

    pub fn is_removed(&self, id: NodeId) -> bool {
        self.removed.contains(&id)
    }

    /// Replace a node by its children.
    pub fn unwrap(&mut self, id: NodeId) {
        self.unwrapped.insert(id);
    }

    /// Replace a node by raw HTML.
    pub fn replace_with_html(&mut self, id: NodeId, html: impl Into<String>) {
        self.replaced.insert(id, html.into());
    }

    /// Change an element's tag name.
    pub fn rename(&mut self, id: NodeId, name: impl Into<String>) {
        self.renamed.insert(id, name.into());
    }

    /// Set an attribute, keeping its position when it already exists.
    pub fn set_attr(&mut self, id: NodeId, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(removed) = self.removed_attrs.get_mut(&id) {
            removed.remove(&name);
        }
        let attrs = self.set_attrs.entry(id).or_default();
        match attrs.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value.into(),
            None => attrs.push((name, value.into())),
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: impl Into<String>) {
        let name = name.into();
        if let Some(attrs) = self.set_attrs.get_mut(&id) {
            attrs.retain(|(n, _)| *n != name);
        }
        self.removed_attrs.entry(id).or_default().insert(name);
    }

    /// Append raw HTML at the end of an element's content.
    pub fn append_html(&mut self, id: NodeId, html: impl AsRef<str>) {
        self.append_html.entry(id).or_default().push_str(html.as_ref());
    }
}

/// A serialized HTML document.
///
/// The tree is re-parsed for every read or edit so a `Dom` can be moved
/// across threads and held over await points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dom {
    html: String,
}

impl Dom {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// Parse the current state.
    pub fn document(&self) -> Document {
        Document::parse(&self.html)
    }

    /// Collect edits on the parsed tree, then render them back.
    pub fn edit<R>(&mut self, f: impl FnOnce(&Document, &mut Edits) -> R) -> R {
        let doc = self.document();
        let mut edits = Edits::new();
        let result = f(&doc, &mut edits);
        if !edits.is_empty() {
            self.html = doc.render(&edits);
        }
        result
    }

    /// Replace the whole document with a new body content.
    pub fn set_body(&mut self, body: &str) {
        self.edit(|doc, edits| {
            if let Some(el) = doc.body() {
                for child in el.element_ref().children() {
                    edits.remove(child.id());
                }
                edits.append_html(el.id(), body);
            }
        });
    }

    /// The inner HTML of `<body>`.
    pub fn body_html(&self) -> String {
        let doc = self.document();
        doc.body().map(|b| doc.render_children(b.id(), &Edits::new())).unwrap_or_default()
    }

    pub fn text_content(&self) -> String {
        self.document().text_content()
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| ScrapbookError::HtmlParseError(format!("Invalid selector: {}", e)))
}

fn serialize(node: NodeRef<'_, Node>, edits: &Edits, out: &mut String) {
    let id = node.id();
    if edits.removed.contains(&id) {
        return;
    }
    if let Some(html) = edits.replaced.get(&id) {
        out.push_str(html);
        return;
    }

    match node.value() {
        Node::Doctype(d) => {
            let _ = write!(out, "<!DOCTYPE {}>", d.name());
        }
        Node::Comment(c) => {
            let _ = write!(out, "<!--{}-->", &*c.comment);
        }
        Node::Text(t) => {
            let raw = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| RAW_TEXT_ELEMENTS.contains(&e.name())))
                .unwrap_or(false);
            if raw { out.push_str(&t.text) } else { escape_text(&t.text, out) }
        }
        Node::Element(e) => {
            if edits.unwrapped.contains(&id) {
                serialize_children(node, edits, out);
                return;
            }

            let name = edits.renamed.get(&id).map(String::as_str).unwrap_or_else(|| e.name());
            out.push('<');
            out.push_str(name);

            let removed = edits.removed_attrs.get(&id);
            let set = edits.set_attrs.get(&id);
            for (attr, value) in e.attrs() {
                if removed.is_some_and(|r| r.contains(attr)) {
                    continue;
                }
                let value = set.and_then(|s| s.iter().find(|(n, _)| n == attr)).map_or(value, |(_, v)| v.as_str());
                write_attr(attr, value, out);
            }
            if let Some(set) = set {
                for (attr, value) in set {
                    if e.attr(attr).is_none() {
                        write_attr(attr, value, out);
                    }
                }
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&name) {
                return;
            }
            serialize_children(node, edits, out);
            if let Some(html) = edits.append_html.get(&id) {
                out.push_str(html);
            }
            let _ = write!(out, "</{}>", name);
        }
        Node::Document | Node::Fragment => serialize_children(node, edits, out),
        Node::ProcessingInstruction(_) => {}
    }
}

fn serialize_children(node: NodeRef<'_, Node>, edits: &Edits, out: &mut String) {
    for child in node.children() {
        serialize(child, edits, out);
    }
}

fn write_attr(name: &str, value: &str, out: &mut String) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Escape text content for HTML output.
pub fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

/// Escape an attribute value for HTML output.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Strip markup from an HTML fragment and return its text.
pub fn strip_html(fragment: &str) -> String {
    Html::parse_fragment(fragment).root_element().text().collect::<String>().trim().to_string()
}
