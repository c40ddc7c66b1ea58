//! DOM fixes applied around content selection.

use std::sync::LazyLock;

use ego_tree::NodeRef;
use regex::Regex;
use scraper::{ElementRef, Html, Node};

use super::scoring::link_density;
use crate::dom::{Dom, Edits, Element};

static RX_SRCSET_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\S+)(?:\s+([\d.]+)[xw])?(\s*(?:,|$))").expect("valid srcset regex")
});

const EMBED_TAGS: &str = "object, embed, iframe, video, audio";
const EMPTY_CANDIDATES: &[&str] = &["div", "p", "span", "section", "article", "aside", "nav", "header", "footer"];
const LINK_DENSITY_CANDIDATES: &[&str] = &["div", "section", "aside", "nav", "ul", "ol", "li"];
const MAX_LINK_DENSITY: f64 = 0.5;
const MAX_EMPTY_PASSES: usize = 10;

fn is_single_image(el: ElementRef<'_>) -> bool {
    if el.value().name().eq_ignore_ascii_case("img") {
        return true;
    }
    let mut children = el.children().filter_map(ElementRef::wrap);
    let (Some(child), None) = (children.next(), children.next()) else {
        return false;
    };
    el.text().all(|t| t.trim().is_empty()) && is_single_image(child)
}

/// Bring images hidden in `<noscript>` into the document.
///
/// When the noscript holds a single image and is followed by a single
/// image, that image moves in front of it. Otherwise, unless a single image
/// already precedes it, the noscript is replaced by its image.
pub fn fix_noscript_images(dom: &mut Dom) -> usize {
    dom.edit(|doc, edits| {
        let mut fixed = 0;
        for noscript in doc.select("noscript").unwrap_or_default() {
            let fragment = Html::parse_fragment(&noscript.text());
            let root = fragment.root_element();
            if !is_single_image(root) {
                continue;
            }
            let Some(image) = root.children().find_map(ElementRef::wrap) else {
                continue;
            };

            let el = noscript.element_ref();
            let next = el.next_siblings().find_map(ElementRef::wrap);
            let prev = el.prev_siblings().find_map(ElementRef::wrap);

            match next {
                Some(next) if is_single_image(next) => {
                    let html = format!("{}{}", next.html(), doc.render_node(noscript.id(), &Edits::new()));
                    edits.remove(next.id());
                    edits.replace_with_html(noscript.id(), html);
                }
                _ if !prev.is_some_and(is_single_image) => edits.replace_with_html(noscript.id(), image.html()),
                _ => continue,
            }
            fixed += 1;
        }
        fixed
    })
}

fn is_empty_block(el: &Element<'_>) -> bool {
    el.element_ref().children().all(|c| match c.value() {
        Node::Text(t) => t.trim().is_empty(),
        Node::Comment(_) => true,
        Node::Element(e) => e.name() == "br",
        _ => false,
    })
}

fn content_nodes<'a>(node: NodeRef<'a, Node>) -> Vec<NodeRef<'a, Node>> {
    node.children()
        .filter(|c| match c.value() {
            Node::Text(t) => !t.trim().is_empty(),
            Node::Element(_) => true,
            _ => false,
        })
        .collect()
}

/// Remove empty blocks and link lists from the selected content and
/// collapse `div`s that only wrap another `div`.
pub fn clean_content(dom: &mut Dom) {
    dom.edit(|doc, edits| {
        for el in doc.select("*").unwrap_or_default() {
            let tag = el.tag_name();
            if LINK_DENSITY_CANDIDATES.contains(&tag.as_str()) && link_density(&el) > MAX_LINK_DENSITY {
                edits.remove(el.id());
                continue;
            }
            if tag == "div"
                && let [only] = content_nodes(*el.element_ref()).as_slice()
                && only.value().as_element().is_some_and(|e| e.name() == "div")
            {
                edits.unwrap(el.id());
            }
        }
    });

    // Removing an empty block can leave its parent empty.
    for _ in 0..MAX_EMPTY_PASSES {
        let removed = dom.edit(|doc, edits| {
            let mut removed = 0;
            for el in doc.select("body *").unwrap_or_default() {
                if EMPTY_CANDIDATES.contains(&el.tag_name().as_str()) && is_empty_block(&el) {
                    edits.remove(el.id());
                    removed += 1;
                }
            }
            removed
        });
        if removed == 0 {
            break;
        }
    }
}

pub fn remove_embeds(dom: &mut Dom) {
    dom.edit(|doc, edits| {
        for el in doc.select(EMBED_TAGS).unwrap_or_default() {
            edits.remove(el.id());
        }
    });
}

/// The candidate with the largest descriptor of a `srcset` value. A
/// candidate without descriptor counts as `1`.
fn best_source(srcset: &str) -> Option<&str> {
    let mut best: Option<(&str, f64)> = None;
    for caps in RX_SRCSET_URL.captures_iter(srcset) {
        let Some(src) = caps.get(1).map(|m| m.as_str().trim_end_matches(',')) else {
            continue;
        };
        let Ok(descriptor) = caps.get(2).map_or("1", |m| m.as_str()).parse::<f64>() else {
            continue;
        };
        if src.is_empty() {
            continue;
        }
        if best.is_none_or(|(_, d)| descriptor > d) {
            best = Some((src, descriptor));
        }
    }
    best.map(|(src, _)| src)
}

/// Replace `srcset` attributes by a `src` holding their best candidate.
/// Dimensions are dropped along the way.
pub fn fix_srcset(dom: &mut Dom) -> usize {
    dom.edit(|doc, edits| {
        let mut fixed = 0;
        for el in doc.select("[srcset]").unwrap_or_default() {
            let Some(src) = el.attr("srcset").and_then(best_source) else {
                continue;
            };
            edits.set_attr(el.id(), "src", src);
            for name in ["srcset", "width", "height"] {
                edits.remove_attr(el.id(), name);
            }
            fixed += 1;
        }
        fixed
    })
}

/// Descend while a node has a single meaningful child.
fn first_content_node(el: ElementRef<'_>) -> ElementRef<'_> {
    let nodes = content_nodes(*el);
    match nodes.as_slice() {
        [only] => ElementRef::wrap(*only).map_or(el, first_content_node),
        _ => el,
    }
}

/// Replace the body content by its first node holding more than one child.
pub fn simplify_top(dom: &mut Dom) {
    let inner = {
        let doc = dom.document();
        let Some(body) = doc.body() else {
            return;
        };
        let node = first_content_node(body.element_ref());
        if node.id() == body.id() || node.parent().map(|p| p.id()) == Some(body.id()) {
            return;
        }
        doc.render_node(node.id(), &Edits::new())
    };
    dom.set_body(&inner);
}

/// Make sure the body content starts with a `<section>`: a lone `div` is
/// renamed, anything else is wrapped.
pub fn enclose_article(dom: &mut Dom) {
    let wrap = dom.edit(|doc, edits| {
        let body = doc.body()?;
        if let [only] = content_nodes(*body.element_ref()).as_slice()
            && let Some(el) = only.value().as_element()
        {
            match el.name() {
                "section" => return None,
                "div" => {
                    edits.rename(only.id(), "section");
                    return None;
                }
                _ => {}
            }
        }
        Some(doc.render_children(body.id(), &Edits::new()))
    });

    if let Some(inner) = wrap {
        dom.set_body(&format!("<section>{inner}</section>"));
    }
}
