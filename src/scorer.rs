//! Ranks snapshot elements against a short human description such as
//! "sign in button" or "email field".

use crate::core::config::{ScorerConfig, Viewport};
use crate::dom::{DomElement, IndexedDom};
use crate::utils::screenshot::png_dimensions;
use serde::Serialize;

const TEXT_EXACT: i32 = 40;
const TEXT_PARTIAL: i32 = 25;
const TEXT_TOKEN: i32 = 20;
const ATTRIBUTE: i32 = 20;
const SEMANTIC: i32 = 30;
/// A button that only might submit, e.g. `type=button` or `role=button`.
const SEMANTIC_WEAK: i32 = 15;
const SEMANTIC_MISMATCH: i32 = -20;
const TAG_HINT: i32 = 10;
const SALIENCE: i32 = 10;

/// Words that say what kind of control is wanted rather than its name.
const HINT_WORDS: &[&str] = &[
    "button", "btn", "link", "field", "input", "box", "textbox", "checkbox", "dropdown", "select",
];

const STOP_WORDS: &[&str] = &["the", "a", "an", "of", "for", "your"];

const MATCHED_ATTRIBUTES: &[&str] = &[
    "id",
    "name",
    "placeholder",
    "aria-label",
    "title",
    "value",
    "type",
    "autocomplete",
    "role",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Semantic {
    Submit,
    Email,
    Password,
    Username,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagHint {
    Button,
    Link,
    TextEntry,
    Checkbox,
    Select,
}

/// Parsed form of a target description.
#[derive(Debug, Clone)]
struct Intent {
    phrase: String,
    keywords: Vec<String>,
    semantic: Option<Semantic>,
    tag_hint: Option<TagHint>,
}

impl Intent {
    fn parse(description: &str) -> Self {
        let lowered = description.to_lowercase();
        let words: Vec<String> = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        let tag_hint = words.iter().find_map(|w| match w.as_str() {
            "button" | "btn" => Some(TagHint::Button),
            "link" => Some(TagHint::Link),
            "field" | "input" | "box" | "textbox" => Some(TagHint::TextEntry),
            "checkbox" => Some(TagHint::Checkbox),
            "dropdown" | "select" => Some(TagHint::Select),
            _ => None,
        });

        let keywords: Vec<String> = words
            .iter()
            .filter(|w| !HINT_WORDS.contains(&w.as_str()) && !STOP_WORDS.contains(&w.as_str()))
            .cloned()
            .collect();
        let phrase = keywords.join(" ");

        let semantic = if phrase.contains("password") || phrase.contains("passcode") {
            Some(Semantic::Password)
        } else if phrase.contains("email") || phrase.contains("e-mail") {
            Some(Semantic::Email)
        } else if phrase.contains("username") || phrase.contains("user name") || phrase == "user" {
            Some(Semantic::Username)
        } else if phrase.contains("search") {
            Some(Semantic::Search)
        } else if ["sign in", "signin", "log in", "login", "submit", "continue", "sign on"]
            .iter()
            .any(|k| phrase.contains(k))
        {
            Some(Semantic::Submit)
        } else {
            None
        };

        Self {
            phrase,
            keywords,
            semantic,
            tag_hint,
        }
    }
}

/// An element with its confidence (0 to 100) and the signals that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredElement {
    pub element: DomElement,
    pub confidence: u8,
    pub reasons: Vec<String>,
}

pub struct ElementScorer {
    config: ScorerConfig,
    viewport: Viewport,
}

impl ElementScorer {
    pub fn new(config: ScorerConfig, viewport: Viewport) -> Self {
        Self { config, viewport }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Best match at or above the action threshold.
    pub fn find_element(
        &self,
        dom: &IndexedDom,
        description: &str,
        screenshot: Option<&[u8]>,
    ) -> Option<ScoredElement> {
        self.find_element_above(dom, description, screenshot, self.config.action_threshold)
    }

    pub fn find_element_above(
        &self,
        dom: &IndexedDom,
        description: &str,
        screenshot: Option<&[u8]>,
        threshold: u8,
    ) -> Option<ScoredElement> {
        self.rank(dom, description, screenshot)
            .into_iter()
            .next()
            .filter(|best| best.confidence >= threshold)
    }

    /// Every visible interactive element, best first. Equal scores keep
    /// document order.
    pub fn rank(
        &self,
        dom: &IndexedDom,
        description: &str,
        screenshot: Option<&[u8]>,
    ) -> Vec<ScoredElement> {
        let intent = Intent::parse(description);
        let viewport = self.viewport_size(screenshot);

        let mut scored: Vec<ScoredElement> = dom
            .visible_interactive()
            .map(|element| {
                let (score, reasons) = score_element(element, &intent, viewport);
                ScoredElement {
                    element: element.clone(),
                    confidence: score.clamp(0, 100) as u8,
                    reasons,
                }
            })
            .collect();

        // Stable sort keeps snapshot order among ties.
        scored.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        scored
    }

    /// Viewport in CSS pixels. A screenshot's own dimensions win over the
    /// configured size.
    fn viewport_size(&self, screenshot: Option<&[u8]>) -> (f64, f64) {
        let scale = if self.viewport.device_scale_factor > 0.0 {
            self.viewport.device_scale_factor
        } else {
            1.0
        };
        match screenshot.and_then(png_dimensions) {
            Some((w, h)) => (w as f64 / scale, h as f64 / scale),
            None => (self.viewport.width as f64, self.viewport.height as f64),
        }
    }
}

impl Default for ElementScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default(), Viewport::default())
    }
}

fn score_element(element: &DomElement, intent: &Intent, viewport: (f64, f64)) -> (i32, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    // Text
    let text = element.accessible_text().to_lowercase();
    let text = text.trim();
    if !intent.phrase.is_empty() && !text.is_empty() {
        if text == intent.phrase {
            score += TEXT_EXACT;
            reasons.push(format!("exact text match '{}'", text));
        } else if text.contains(&intent.phrase) || intent.phrase.contains(text) {
            score += TEXT_PARTIAL;
            reasons.push(format!("partial text match '{}'", text));
        } else {
            let hits = intent
                .keywords
                .iter()
                .filter(|k| text.contains(k.as_str()))
                .count();
            if hits > 0 {
                let share = hits as f64 / intent.keywords.len() as f64;
                score += (TEXT_TOKEN as f64 * share).round() as i32;
                reasons.push(format!("{} of {} keywords in text", hits, intent.keywords.len()));
            }
        }
    }

    // Attributes
    let matched_attribute = MATCHED_ATTRIBUTES.iter().find(|key| {
        element
            .attr(key)
            .map(|value| {
                let value = value.to_lowercase();
                intent.keywords.iter().any(|k| value.contains(k.as_str()))
            })
            .unwrap_or(false)
    });
    if let Some(key) = matched_attribute {
        score += ATTRIBUTE;
        reasons.push(format!("attribute match on {}", key));
    }

    // Semantic affinity
    if let Some(semantic) = intent.semantic {
        if fits_semantic(element, semantic) {
            score += SEMANTIC;
            reasons.push(format!("fits {:?}", semantic).to_lowercase());
        } else if conflicts_semantic(element, semantic) {
            score += SEMANTIC_MISMATCH;
            reasons.push(format!("wrong kind of control for {:?}", semantic).to_lowercase());
        } else if semantic == Semantic::Submit && element.is_button_like() {
            score += SEMANTIC_WEAK;
            reasons.push("button that may submit".to_string());
        }
    }

    if let Some(hint) = intent.tag_hint {
        if fits_tag_hint(element, hint) {
            score += TAG_HINT;
            reasons.push(format!("is a {:?}", hint).to_lowercase());
        }
    }

    // Visual salience
    let bbox = &element.bounding_box;
    let mut salience = (bbox.area() / 4000.0).min(1.0) * (SALIENCE as f64 / 2.0);
    let (width, height) = viewport;
    if bbox.x >= 0.0 && bbox.y >= 0.0 && bbox.center_x() <= width && bbox.center_y() <= height {
        salience += SALIENCE as f64 / 2.0;
    }
    let salience = salience.round() as i32;
    if salience > 0 {
        score += salience;
        reasons.push(format!("visual salience +{}", salience));
    }

    (score, reasons)
}

fn attr_contains(element: &DomElement, keys: &[&str], needles: &[&str]) -> bool {
    keys.iter().any(|key| {
        element
            .attr(key)
            .map(|v| {
                let v = v.to_lowercase();
                needles.iter().any(|n| v.contains(n))
            })
            .unwrap_or(false)
    })
}

fn fits_semantic(element: &DomElement, semantic: Semantic) -> bool {
    match semantic {
        Semantic::Password => element.is_password_input(),
        Semantic::Email => {
            element.is_text_entry()
                && (element.input_type().as_deref() == Some("email")
                    || attr_contains(element, &["name", "id", "autocomplete", "placeholder"], &["email", "e-mail"]))
        }
        Semantic::Username => {
            element.is_text_entry()
                && attr_contains(
                    element,
                    &["name", "id", "autocomplete", "placeholder"],
                    &["user", "login", "account"],
                )
        }
        Semantic::Search => {
            element.input_type().as_deref() == Some("search")
                || element.attr("role") == Some("searchbox")
                || attr_contains(element, &["name", "id", "placeholder", "aria-label"], &["search"])
                || element.attr("name") == Some("q")
        }
        Semantic::Submit => element.is_submit_control(),
    }
}

fn conflicts_semantic(element: &DomElement, semantic: Semantic) -> bool {
    match semantic {
        Semantic::Password => element.is_text_entry(),
        Semantic::Email | Semantic::Username => element.is_password_input() || element.is_button_like(),
        Semantic::Submit => {
            element.is_text_entry()
                || element.is_password_input()
                || element.input_type().as_deref() == Some("reset")
        }
        Semantic::Search => element.is_password_input(),
    }
}

fn fits_tag_hint(element: &DomElement, hint: TagHint) -> bool {
    match hint {
        TagHint::Button => element.is_button_like(),
        TagHint::Link => element.tag == "a" || element.attr("role") == Some("link"),
        TagHint::TextEntry => element.is_text_entry() || element.is_password_input(),
        TagHint::Checkbox => {
            element.input_type().as_deref() == Some("checkbox")
                || element.attr("role") == Some("checkbox")
        }
        TagHint::Select => element.tag == "select" || element.attr("role") == Some("combobox"),
    }
}
