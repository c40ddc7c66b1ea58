//! Processors specific to saving bookmarks.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::Node;

use crate::dom::{Edits, Element, is_void_element};
use crate::extract::{Extractor, Flow, ProcessMessage, Processor, Step};

static RX_BLOCKED_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(class|rel|srcset|sizes)$|^data-|^on[a-z]+").expect("valid attribute regex"));

const LINK_REL: &str = "nofollow noopener noreferrer";

/// Cancels the run when the drop's host resolves to a denied address.
pub struct CheckIp;

#[async_trait]
impl Processor for CheckIp {
    fn name(&self) -> &'static str {
        "check_ip"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Start {
            return Flow::Continue;
        }
        let Some(url) = x.current_drop(m).map(|d| d.url.clone()) else {
            return Flow::Continue;
        };

        if let Err(err) = x.client().check_destination(&url).await {
            x.log().error("destination refused", &[("url", &url), ("error", &err)]);
            m.cancel(err.to_string());
            return Flow::Stop;
        }
        Flow::Continue
    }
}

/// Last cleaning pass on the extracted document.
///
/// Removes presentation and scripting attributes, drops elements left
/// without attributes or content and makes every link `nofollow`.
pub struct CleanDom;

fn is_empty(el: &Element<'_>, edits: &Edits) -> bool {
    if el.attrs().any(|(name, _)| !RX_BLOCKED_ATTR.is_match(name)) {
        return false;
    }
    el.element_ref().children().all(|child| match child.value() {
        Node::Text(t) => t.trim().is_empty(),
        Node::Element(_) => edits.is_removed(child.id()),
        _ => true,
    })
}

#[async_trait]
impl Processor for CleanDom {
    fn name(&self) -> &'static str {
        "clean_dom"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom {
            return Flow::Continue;
        }
        let Some(dom) = m.dom.as_mut() else {
            return Flow::Continue;
        };

        let (attrs, nodes) = dom.edit(|doc, edits| {
            let elements = doc.select("body *").unwrap_or_default();
            let mut attrs = 0;
            for el in &elements {
                for (name, _) in el.attrs().filter(|(name, _)| RX_BLOCKED_ATTR.is_match(name)) {
                    edits.remove_attr(el.id(), name);
                    attrs += 1;
                }
            }

            // Reverse document order visits children first, so emptied parents go too.
            let mut nodes = 0;
            for el in elements.iter().rev() {
                if !is_void_element(&el.tag_name()) && is_empty(el, edits) {
                    edits.remove(el.id());
                    nodes += 1;
                }
            }

            for a in elements.iter().filter(|el| el.tag_name() == "a") {
                if !edits.is_removed(a.id()) {
                    edits.set_attr(a.id(), "rel", LINK_REL);
                }
            }
            (attrs, nodes)
        });

        x.log().debug("cleaning resulting DOM", &[("attributes", &attrs), ("nodes", &nodes)]);
        Flow::Continue
    }
}
