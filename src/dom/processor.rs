use crate::core::config::DomConfig;
use crate::core::Page;
use crate::dom::element::truncate;
use crate::dom::{BoundingBox, DomElement, IndexedDom};
use crate::errors::{AgentError, Result};
use crate::utils::javascript::{GEOMETRY_SCRIPT, OUTER_HTML_SCRIPT};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Elements an agent can act on.
const INTERACTIVE_SELECTORS: &[&str] = &[
    // Standard form elements
    "input",
    "button",
    "select",
    "textarea",
    // Links and disclosure
    "a",
    "summary",
    // Click handlers
    "[onclick]",
    // ARIA roles
    "[role='button']",
    "[role='link']",
    "[role='checkbox']",
    "[role='radio']",
    "[role='textbox']",
    "[role='searchbox']",
    "[role='combobox']",
    "[role='tab']",
    "[role='menuitem']",
    "[role='option']",
    "[role='switch']",
    // Focusable / editable
    "[tabindex]",
    "[contenteditable='true']",
];

/// Elements kept only to disambiguate the interactive ones.
const CONTEXTUAL_SELECTORS: &[&str] = &[
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "label",
    "form",
    "[role='alert']",
    "[role='alertdialog']",
    "[aria-live]",
    "[class*='error']",
    "[class*='alert']",
];

const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "checkbox", "radio", "textbox", "searchbox", "combobox", "tab",
    "menuitem", "option", "switch", "slider", "spinbutton",
];

/// Node found in the markup, before geometry is known.
#[derive(Debug, Clone)]
pub struct RawNode {
    pub tag: String,
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub xpath: String,
    pub is_interactive: bool,
    pub hidden_by_markup: bool,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default = "default_displayed")]
    displayed: bool,
}

fn default_displayed() -> bool {
    true
}

/// Builds [`IndexedDom`] snapshots. Every call is a fresh capture.
pub struct DomProcessor {
    config: DomConfig,
    selectors: Vec<Selector>,
}

impl DomProcessor {
    pub fn new(config: DomConfig) -> Self {
        let mut selectors = Vec::new();
        for selector_str in INTERACTIVE_SELECTORS.iter().chain(CONTEXTUAL_SELECTORS.iter()) {
            if let Ok(selector) = Selector::parse(selector_str) {
                selectors.push(selector);
            }
        }
        Self { config, selectors }
    }

    pub async fn index_page(&self, page: &dyn Page) -> Result<IndexedDom> {
        let url = page.url().await?;
        let title = page.title().await.unwrap_or_default();

        let html = page.evaluate(OUTER_HTML_SCRIPT, vec![]).await?;
        let html = html.as_str().ok_or_else(|| {
            AgentError::Browser("page returned no document markup".to_string())
        })?;

        let raw = self.parse_html(html);
        let xpaths: Vec<&str> = raw.iter().map(|n| n.xpath.as_str()).collect();
        let geometry = page
            .evaluate(GEOMETRY_SCRIPT, vec![serde_json::json!(xpaths)])
            .await?;
        let geometry: Vec<Option<Geometry>> = serde_json::from_value(geometry)?;

        let mut elements = Vec::new();
        for (i, node) in raw.into_iter().enumerate() {
            let geo = geometry.get(i).and_then(|g| g.as_ref());
            let bounding_box = geo
                .map(|g| BoundingBox::new(g.x, g.y, g.width, g.height))
                .unwrap_or_default();
            let displayed = geo.map(|g| g.displayed).unwrap_or(false);
            let is_visible = bounding_box.area() > 0.0 && displayed && !node.hidden_by_markup;

            if !is_visible && !self.config.include_hidden_elements {
                continue;
            }
            if elements.len() >= self.config.max_elements {
                break;
            }

            let mut element = DomElement::new(elements.len(), node.tag)
                .with_text(node.text)
                .with_bounding_box(bounding_box);
            element.attributes = node.attributes;
            element.xpath = node.xpath;
            element.is_visible = is_visible;
            element.is_interactive = node.is_interactive;
            elements.push(element);
        }

        let dom = IndexedDom::new(url, title, elements);
        debug!(
            url = %dom.url,
            total = dom.total_count,
            interactive = dom.interactive_count,
            "indexed page"
        );
        Ok(dom)
    }

    /// Select interactive and contextual nodes in document order.
    pub fn parse_html(&self, html: &str) -> Vec<RawNode> {
        let document = Html::parse_document(html);
        let mut nodes = Vec::new();

        // Walk once so indices follow document order regardless of which
        // pattern matched.
        for element_ref in document.root_element().descendants().filter_map(ElementRef::wrap) {
            if !self.selectors.iter().any(|s| s.matches(&element_ref)) {
                continue;
            }
            if inside_inert_subtree(element_ref) {
                continue;
            }
            let element = element_ref.value();
            let tag = element.name().to_string();

            let mut attributes = HashMap::new();
            for (name, value) in element.attrs() {
                attributes.insert(name.to_string(), value.to_string());
            }

            let text = element_ref
                .text()
                .flat_map(|t| t.split_whitespace())
                .collect::<Vec<_>>()
                .join(" ");

            nodes.push(RawNode {
                is_interactive: is_interactive_element(&tag, &attributes),
                hidden_by_markup: is_hidden_by_markup(element_ref),
                xpath: xpath_for(element_ref),
                text: truncate(&text, self.config.max_text_length),
                tag,
                attributes,
            });
        }

        nodes
    }
}

fn is_interactive_element(tag: &str, attributes: &HashMap<String, String>) -> bool {
    match tag {
        "a" | "button" | "select" | "textarea" | "summary" => return true,
        "input" => {
            return attributes
                .get("type")
                .map(|t| !t.eq_ignore_ascii_case("hidden"))
                .unwrap_or(true)
        }
        _ => {}
    }

    if attributes.contains_key("onclick") {
        return true;
    }

    if let Some(role) = attributes.get("role") {
        if INTERACTIVE_ROLES.contains(&role.as_str()) {
            return true;
        }
    }

    if let Some(tabindex) = attributes.get("tabindex") {
        if tabindex.trim() != "-1" {
            return true;
        }
    }

    attributes.get("contenteditable").map(|v| v == "true") == Some(true)
}

fn is_hidden_by_markup(element_ref: ElementRef) -> bool {
    let own = element_ref.value();
    if own.name() == "input"
        && own
            .attr("type")
            .map(|t| t.eq_ignore_ascii_case("hidden"))
            .unwrap_or(false)
    {
        return true;
    }

    let mut current = Some(element_ref);
    while let Some(el) = current {
        let value = el.value();
        if value.attr("hidden").is_some() {
            return true;
        }
        if let Some(style) = value.attr("style") {
            let style: String = style
                .to_lowercase()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            if style.contains("display:none") || style.contains("visibility:hidden") {
                return true;
            }
        }
        current = el.parent().and_then(ElementRef::wrap);
    }
    false
}

fn inside_inert_subtree(element_ref: ElementRef) -> bool {
    element_ref
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| matches!(a.value().name(), "template" | "noscript" | "script" | "style"))
}

/// Positional XPath from the document root, e.g. `/html/body/form/input[2]`.
pub(crate) fn xpath_for(element_ref: ElementRef) -> String {
    let mut segments = Vec::new();
    let mut current = Some(element_ref);

    while let Some(el) = current {
        let tag = el.value().name();
        let parent = el.parent().and_then(ElementRef::wrap);
        let segment = match parent {
            Some(p) => {
                let same_tag: Vec<ElementRef> = p
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|c| c.value().name() == tag)
                    .collect();
                if same_tag.len() > 1 {
                    let position = same_tag
                        .iter()
                        .position(|c| c.id() == el.id())
                        .unwrap_or(0)
                        + 1;
                    format!("{}[{}]", tag, position)
                } else {
                    tag.to_string()
                }
            }
            None => tag.to_string(),
        };
        segments.push(segment);
        current = parent;
    }

    segments.reverse();
    format!("/{}", segments.join("/"))
}
