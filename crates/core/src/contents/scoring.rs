//! Content scoring and candidate selection.
//!
//! Every block that may hold the article body is scored from its tag, its
//! class and id, its text density and its link density. Scores propagate to
//! the parent (half) and the grandparent (a third), the best candidate wins
//! and its worthy siblings are gathered with it.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::dom::{Document, Element, NodeId};
use crate::{Result, ScrapbookError};

/// Positive patterns that suggest an element contains main content
pub(super) static RX_POSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(article|body|content|entry|hentry|h-entry|main|page|post|text|blog|story|tweet)")
        .expect("valid positive pattern regex")
});

/// Negative patterns that suggest an element does NOT contain main content
static RX_NEGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(banner|breadcrumbs?|combx|comment|community|disqus|extra|foot|header|menu|related|remark|rss|shoutbox|sidebar|sponsor|ad-break|agegate|pagination|pager|popup|highlight|code|example)",
    )
    .expect("valid negative pattern regex")
});

/// Tags that are considered potential content containers
const CANDIDATE_TAGS: &[&str] = &["div", "article", "section", "main", "p", "td", "pre", "blockquote"];

/// Configuration for content scoring algorithm
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    /// Weight for positive class/ID patterns
    pub positive_weight: f64,
    /// Weight for negative class/ID patterns
    pub negative_weight: f64,
    /// Maximum content density score from character count
    pub max_char_density_score: f64,
    /// Maximum content density score from comma count
    pub max_comma_density_score: f64,
    /// Characters per point for content density scoring
    pub chars_per_point: usize,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            positive_weight: 25.0,
            negative_weight: -25.0,
            max_char_density_score: 3.0,
            max_comma_density_score: 3.0,
            chars_per_point: 100,
        }
    }
}

/// Configuration for candidate selection
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Minimum score threshold for top candidate
    pub min_score_threshold: f64,
    /// Minimum character threshold for content
    pub char_threshold: usize,
    /// Maximum elements to consider (0 = unlimited)
    pub max_elements: usize,
    /// Sibling score threshold (multiplier of top score)
    pub sibling_threshold: f64,
    pub score: ScoreConfig,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_score_threshold: 10.0,
            char_threshold: 500,
            max_elements: 1000,
            sibling_threshold: 0.2,
            score: ScoreConfig::default(),
        }
    }
}

/// Result of scoring an element
#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub tag_name: String,
    /// Base score from tag type
    pub base_score: f64,
    /// Weight adjustment from class/ID patterns
    pub class_weight: f64,
    pub content_density: f64,
    /// Link density (0.0 to 1.0)
    pub link_density: f64,
    pub final_score: f64,
}

/// The selected content.
#[derive(Debug, Clone)]
pub struct Article {
    /// Top candidate and its siblings, in document order, inside a `<div>`.
    pub content: String,
    pub top_score: f64,
    /// Number of elements gathered
    pub element_count: usize,
}

/// Calculate the base score for an element based on its tag name
///
/// - ARTICLE: +10, SECTION: +8, DIV: +5
/// - TD, BLOCKQUOTE: +3
/// - FORM, ADDRESS and list elements: -3
/// - headings, TH, HEADER, FOOTER, NAV: -5
pub fn base_tag_score(element: &Element<'_>) -> f64 {
    match element.tag_name().as_str() {
        "article" => 10.0,
        "section" => 8.0,
        "div" => 5.0,
        "td" | "blockquote" => 3.0,
        "pre" => 0.0,
        "form" => -3.0,
        "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" | "header" | "footer" | "nav" => -5.0,
        _ => 0.0,
    }
}

/// Returns the positive weight if the id or a class name matches the
/// positive patterns, the negative weight if it matches the negative ones.
/// The id is checked first.
pub fn class_id_weight(element: &Element<'_>, config: &ScoreConfig) -> f64 {
    let names = element.attr("id").into_iter().chain(element.attr("class").unwrap_or_default().split_whitespace());
    for name in names {
        if RX_POSITIVE.is_match(name) {
            return config.positive_weight;
        }
        if RX_NEGATIVE.is_match(name) {
            return config.negative_weight;
        }
    }
    0.0
}

/// One point per `chars_per_point` characters plus one per comma, each
/// capped.
pub fn content_density_score(element: &Element<'_>, config: &ScoreConfig) -> f64 {
    let text = element.text();
    let char_score = ((text.chars().count() / config.chars_per_point) as f64).min(config.max_char_density_score);
    let comma_score = (text.matches(',').count() as f64).min(config.max_comma_density_score);
    char_score + comma_score
}

/// Ratio of link text characters to total text characters.
pub fn link_density(element: &Element<'_>) -> f64 {
    let text_length = element.text().chars().count();
    if text_length == 0 {
        return 0.0;
    }

    let link_text_length = element
        .select("a")
        .unwrap_or_default()
        .iter()
        .map(|link| link.text().chars().count())
        .sum::<usize>();

    link_text_length as f64 / text_length as f64
}

fn looks_like_code(text: &str) -> bool {
    if text.len() <= 50 {
        return false;
    }
    let len = text.len() as f64;
    let comma_ratio = text.matches(',').count() as f64 / len;
    let space_ratio = text.matches(' ').count() as f64 / len;
    let special_ratio = text.chars().filter(|c| !c.is_alphanumeric() && !c.is_whitespace()).count() as f64 / len;

    special_ratio > 0.15 && comma_ratio < 0.01 && space_ratio < 0.15
}

/// Calculate the final score for an element
///
/// `(base + class weight + density + code penalty) * (1 - link density)`.
/// The link penalty is halved for elements with a positive class or id and
/// for text rich elements (over 500 characters).
pub fn calculate_score(element: &Element<'_>, config: &ScoreConfig) -> ScoreResult {
    let tag_name = element.tag_name();
    let base_score = base_tag_score(element);
    let class_weight = class_id_weight(element, config);
    let content_density = content_density_score(element, config);
    let ld = link_density(element);

    let text = element.text();
    let code_penalty = if tag_name == "pre" && looks_like_code(&text) { -10.0 } else { 0.0 };

    let link_penalty =
        if class_weight > 0.0 || text.chars().count() > 500 { 1.0 - (ld * 0.5) } else { 1.0 - ld };

    let final_score = (base_score + class_weight + content_density + code_penalty) * link_penalty;

    ScoreResult { tag_name, base_score, class_weight, content_density, link_density: ld, final_score }
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    element: Element<'a>,
    result: ScoreResult,
}

impl Candidate<'_> {
    fn score(&self) -> f64 {
        self.result.final_score
    }
}

fn identify_candidates<'a>(doc: &'a Document, config: &ExtractConfig) -> Vec<Candidate<'a>> {
    let mut candidates = Vec::new();
    let max_elements = if config.max_elements == 0 { usize::MAX } else { config.max_elements };
    let mut scanned = 0usize;

    for tag in CANDIDATE_TAGS {
        for element in doc.select(tag).unwrap_or_default() {
            if scanned >= max_elements {
                return candidates;
            }
            scanned += 1;

            if !matches!(*tag, "article" | "section" | "main")
                && element.text().chars().count() < config.char_threshold / 10
            {
                continue;
            }
            let result = calculate_score(&element, &config.score);
            candidates.push(Candidate { element, result });
        }
    }
    candidates
}

fn promotable(element: &Element<'_>) -> bool {
    !matches!(element.tag_name().as_str(), "html" | "head")
}

/// Add a half of each candidate's score to its parent and a third to its
/// grandparent, scoring ancestors that were not candidates yet.
fn propagate_scores<'a>(candidates: &mut Vec<Candidate<'a>>, config: &ScoreConfig) {
    let mut index: HashMap<NodeId, usize> = candidates.iter().enumerate().map(|(i, c)| (c.element.id(), i)).collect();
    let raw: Vec<(Element<'a>, f64)> = candidates.iter().map(|c| (c.element, c.score().max(0.0))).collect();

    for (element, score) in raw {
        let parent = element.parent();
        let grandparent = parent.and_then(|p| p.parent());

        for (divider, ancestor) in [(2.0, parent), (3.0, grandparent)] {
            let Some(ancestor) = ancestor.filter(promotable) else {
                break;
            };
            let i = *index.entry(ancestor.id()).or_insert_with(|| {
                let result = calculate_score(&ancestor, config);
                candidates.push(Candidate { element: ancestor, result });
                candidates.len() - 1
            });
            candidates[i].result.final_score += score / divider;
        }
    }
}

fn candidate_priority(tag_name: &str) -> u8 {
    match tag_name {
        "article" | "main" | "section" => 3,
        "div" => 2,
        _ => 1,
    }
}

fn compare_candidates(a: &Candidate<'_>, b: &Candidate<'_>) -> std::cmp::Ordering {
    a.score()
        .total_cmp(&b.score())
        .then_with(|| candidate_priority(&a.result.tag_name).cmp(&candidate_priority(&b.result.tag_name)))
        .then_with(|| a.element.text().chars().count().cmp(&b.element.text().chars().count()))
}

/// Siblings are included if their score is >= top_score * sibling_threshold,
/// or when they are prose paragraphs (over 80 chars, link density under
/// 0.25), or headers with some text.
fn select_siblings<'a>(
    top: &Candidate<'a>, scores: &HashMap<NodeId, f64>, config: &ExtractConfig,
) -> Vec<Element<'a>> {
    let Some(parent) = top.element.parent() else {
        return vec![top.element];
    };
    let threshold = top.score() * config.sibling_threshold;

    parent
        .children()
        .into_iter()
        .filter(|sibling| {
            if sibling.id() == top.element.id() {
                return true;
            }
            if scores.get(&sibling.id()).is_some_and(|s| *s >= threshold) {
                return true;
            }
            match sibling.tag_name().as_str() {
                "p" => sibling.text().chars().count() > 80 && link_density(sibling) < 0.25,
                "header" => sibling.text().trim().chars().count() >= 10,
                _ => false,
            }
        })
        .collect()
}

/// Select the main content of a document.
///
/// # Errors
///
/// Returns [`ScrapbookError::NoContent`] when no candidate exists and
/// [`ScrapbookError::NotReadable`] when the best one scores under
/// `min_score_threshold`.
pub fn extract_article(doc: &Document, config: &ExtractConfig) -> Result<Article> {
    let mut candidates = identify_candidates(doc, config);
    propagate_scores(&mut candidates, &config.score);

    let top = candidates.iter().max_by(|a, b| compare_candidates(a, b)).ok_or(ScrapbookError::NoContent)?;
    if top.score() < config.min_score_threshold {
        return Err(ScrapbookError::NotReadable { score: top.score(), threshold: config.min_score_threshold });
    }

    if top.result.tag_name == "body" {
        let content = format!("<div>{}</div>", top.element.inner_html());
        return Ok(Article { content, top_score: top.score(), element_count: 1 });
    }

    let scores: HashMap<NodeId, f64> = candidates.iter().map(|c| (c.element.id(), c.score())).collect();
    let elements = select_siblings(top, &scores, config);

    let mut content = String::from("<div>");
    for element in &elements {
        content.push_str(&element.outer_html());
    }
    content.push_str("</div>");

    Ok(Article { content, top_score: top.score(), element_count: elements.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn first<'a>(doc: &'a Document, selector: &str) -> Element<'a> {
        doc.select_first(selector).unwrap().unwrap()
    }

    #[test]
    fn test_base_tag_score() {
        let doc = Document::parse(
            "<article>a</article><section>s</section><div>d</div><table><tr><td>c</td></tr></table>\
             <form>f</form><nav>n</nav><pre>p</pre>",
        );
        assert_eq!(base_tag_score(&first(&doc, "article")), 10.0);
        assert_eq!(base_tag_score(&first(&doc, "section")), 8.0);
        assert_eq!(base_tag_score(&first(&doc, "div")), 5.0);
        assert_eq!(base_tag_score(&first(&doc, "td")), 3.0);
        assert_eq!(base_tag_score(&first(&doc, "pre")), 0.0);
        assert_eq!(base_tag_score(&first(&doc, "form")), -3.0);
        assert_eq!(base_tag_score(&first(&doc, "nav")), -5.0);
    }

    #[test]
    fn test_class_weight() {
        let doc = Document::parse(
            r#"<div id="a" class="article-content">x</div>
            <div id="b" class="sidebar">x</div>
            <div id="main-content" class="sidebar">x</div>
            <div id="d" class="container">x</div>"#,
        );
        let config = ScoreConfig::default();
        assert_eq!(class_id_weight(&first(&doc, "#a"), &config), 25.0);
        assert_eq!(class_id_weight(&first(&doc, "#b"), &config), -25.0);
        assert_eq!(class_id_weight(&first(&doc, "#main-content"), &config), 25.0);
        assert_eq!(class_id_weight(&first(&doc, "#d"), &config), 0.0);
    }

    #[test]
    fn test_content_density() {
        let config = ScoreConfig::default();
        let doc = Document::parse("<div>Text with commas, more commas, even more commas, and additional commas.</div>");
        assert_eq!(content_density_score(&first(&doc, "div"), &config), 3.0);

        let doc = Document::parse(&format!("<div>{}</div>", "a".repeat(500)));
        assert_eq!(content_density_score(&first(&doc, "div"), &config), 3.0);

        let doc = Document::parse("<div>Short text here.</div>");
        assert_eq!(content_density_score(&first(&doc, "div"), &config), 0.0);
    }

    #[test]
    fn test_link_density() {
        let doc = Document::parse(
            r##"<div id="none">Plain text.</div><div id="all"><a href="#">Link text</a></div>
            <div id="mixed">Some text <a href="#">link</a> more text</div>"##,
        );
        assert_eq!(link_density(&first(&doc, "#none")), 0.0);
        assert_eq!(link_density(&first(&doc, "#all")), 1.0);
        let mixed = link_density(&first(&doc, "#mixed"));
        assert!(mixed > 0.0 && mixed < 1.0);
    }

    #[test]
    fn test_calculate_score() {
        let doc = Document::parse(
            r##"<nav class="menu"><a href="#">Link 1</a><a href="#">Link 2</a></nav>
            <div class="sidebar"></div>"##,
        );
        let config = ScoreConfig::default();

        let nav = calculate_score(&first(&doc, "nav"), &config);
        assert_eq!(nav.base_score, -5.0);
        assert_eq!(nav.class_weight, -25.0);
        assert!(nav.final_score <= 0.0);

        let empty = calculate_score(&first(&doc, "div"), &config);
        assert_eq!(empty.final_score, -20.0);
    }

    #[test]
    fn test_code_penalty() {
        let code = "fn main(){let x=vec![1;2];x.iter().map(|v|v*2).sum::<i32>();}{}[]();;;<>";
        let doc = Document::parse(&format!("<pre>{code}</pre>"));
        let result = calculate_score(&first(&doc, "pre"), &ScoreConfig::default());
        assert!(result.final_score < 0.0);
    }

    const PAGE: &str = r#"<html><body>
        <div id="menu"><a href="/">Home</a> <a href="/about">About</a></div>
        <div id="story">
            <h1>The headline of the story</h1>
            <p>The first paragraph of the story is long enough to count as real prose, with commas, clauses, and details.</p>
            <p>The second paragraph goes on, adding more sentences, more commas, and more words to read about.</p>
            <p>The third paragraph closes the story, once again with a few commas, and a conclusion at the end.</p>
        </div>
        <div class="footer">Copyright, all rights reserved, some links and legal text that nobody reads.</div>
    </body></html>"#;

    #[test]
    fn test_extract_article() {
        let doc = Document::parse(PAGE);
        let article = extract_article(&doc, &ExtractConfig::default()).unwrap();

        assert!(article.content.starts_with("<div><div id=\"story\">"));
        assert!(article.content.contains("The third paragraph"));
        assert!(!article.content.contains("Copyright"));
        assert!(!article.content.contains("About"));
        assert_eq!(article.element_count, 1);
        assert!(article.top_score > 10.0);
    }

    #[test]
    fn test_extract_article_siblings() {
        let html = PAGE.replace(
            "<div class=\"footer\">",
            "<p>A closing paragraph outside of the story block, long enough and without links to be kept.</p>\
             <div class=\"footer\">",
        );
        let doc = Document::parse(&html);
        let article = extract_article(&doc, &ExtractConfig::default()).unwrap();

        assert_eq!(article.element_count, 2);
        assert!(article.content.ends_with("to be kept.</p></div>"));
        assert!(!article.content.contains("Copyright"));
    }

    #[test]
    fn test_extract_article_body() {
        let prose = "A long paragraph that sits directly in the body of the page, with commas, words, clauses \
                     and enough length to score a point for its characters.";
        let html = format!("<html><body><h1>Title</h1><p>{prose}</p><p>{prose}</p><p>{prose}</p></body></html>");
        let doc = Document::parse(&html);
        let article = extract_article(&doc, &ExtractConfig::default()).unwrap();

        assert!(article.content.starts_with("<div><h1>Title</h1><p>"));
        assert_eq!(article.content.matches("<p>").count(), 3);
    }

    #[test]
    fn test_extract_article_not_readable() {
        let doc = Document::parse("<html><body><nav><a href=\"/\">Home</a></nav></body></html>");
        assert!(matches!(extract_article(&doc, &ExtractConfig::default()), Err(ScrapbookError::NoContent)));

        let doc = Document::parse("<html><body><div class=\"sidebar\"><p>tiny</p></div><section></section></body></html>");
        assert!(matches!(
            extract_article(&doc, &ExtractConfig::default()),
            Err(ScrapbookError::NotReadable { .. })
        ));
    }
}
