use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attributes worth showing to the planner; everything else is noise.
const KEY_ATTRIBUTES: &[&str] = &[
    "type",
    "name",
    "id",
    "placeholder",
    "aria-label",
    "role",
    "href",
    "value",
    "title",
    "autocomplete",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomElement {
    pub id: String,
    pub index: usize,
    pub tag: String,
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub bounding_box: BoundingBox,
    pub is_visible: bool,
    pub is_interactive: bool,
    pub xpath: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }
}

impl DomElement {
    pub fn new(index: usize, tag: impl Into<String>) -> Self {
        Self {
            id: format!("elem_{}", index),
            index,
            tag: tag.into(),
            text: String::new(),
            attributes: HashMap::new(),
            bounding_box: BoundingBox::default(),
            is_visible: false,
            is_interactive: false,
            xpath: String::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = bounding_box;
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    /// Lowercased `type` attribute; inputs without one are text inputs.
    pub fn input_type(&self) -> Option<String> {
        match self.tag.as_str() {
            "input" => Some(
                self.attr("type")
                    .map(|t| t.to_lowercase())
                    .unwrap_or_else(|| "text".to_string()),
            ),
            "button" => Some(
                self.attr("type")
                    .map(|t| t.to_lowercase())
                    .unwrap_or_else(|| "submit".to_string()),
            ),
            _ => None,
        }
    }

    pub fn is_password_input(&self) -> bool {
        self.tag == "input" && self.input_type().as_deref() == Some("password")
    }

    /// Inputs a user would type an identifier into.
    pub fn is_text_entry(&self) -> bool {
        match self.tag.as_str() {
            "textarea" => true,
            "input" => matches!(
                self.input_type().as_deref(),
                Some("text" | "email" | "tel" | "search" | "url" | "number")
            ),
            _ => self.attr("role") == Some("textbox") || self.attr("contenteditable") == Some("true"),
        }
    }

    pub fn is_submit_control(&self) -> bool {
        match self.tag.as_str() {
            "button" => self.input_type().as_deref() == Some("submit"),
            "input" => matches!(self.input_type().as_deref(), Some("submit" | "image")),
            _ => false,
        }
    }

    pub fn is_button_like(&self) -> bool {
        self.tag == "button"
            || self.attr("role") == Some("button")
            || (self.tag == "input"
                && matches!(
                    self.input_type().as_deref(),
                    Some("submit" | "button" | "image")
                ))
    }

    /// Whether this element sits inside the subtree rooted at `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &DomElement) -> bool {
        self.xpath.len() > ancestor.xpath.len()
            && self.xpath.starts_with(&ancestor.xpath)
            && self.xpath[ancestor.xpath.len()..].starts_with('/')
    }

    /// Locator accepted by [`crate::core::Page`].
    pub fn locator(&self) -> String {
        format!("xpath={}", self.xpath)
    }

    /// Text a human would read as this element's name.
    pub fn accessible_text(&self) -> String {
        if !self.text.is_empty() {
            return self.text.clone();
        }
        for key in ["aria-label", "value", "placeholder", "title", "alt", "name"] {
            if let Some(v) = self.attr(key) {
                if !v.trim().is_empty() {
                    return v.trim().to_string();
                }
            }
        }
        String::new()
    }

    /// One line per element for the planning prompt: index, tag, key
    /// attributes and truncated text.
    pub fn describe(&self, max_text: usize) -> String {
        let mut line = format!("[{}] <{}", self.index, self.tag);
        for key in KEY_ATTRIBUTES {
            if let Some(value) = self.attr(key) {
                if value.is_empty() {
                    continue;
                }
                let value = truncate(value, 40);
                line.push_str(&format!(" {}=\"{}\"", key, value));
            }
        }
        line.push('>');
        if !self.text.is_empty() {
            line.push_str(&format!(" \"{}\"", truncate(&self.text, max_text)));
        }
        if !self.is_visible {
            line.push_str(" (hidden)");
        }
        line
    }
}

/// Cut `s` to at most `max` characters on a char boundary.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_includes_key_attributes() {
        let mut el = DomElement::new(3, "input")
            .with_attribute("type", "email")
            .with_attribute("placeholder", "Email address")
            .with_attribute("data-x", "ignored");
        el.is_visible = true;
        let line = el.describe(50);
        assert_eq!(line, "[3] <input type=\"email\" placeholder=\"Email address\">");
    }

    #[test]
    fn input_semantics() {
        let pwd = DomElement::new(0, "input").with_attribute("type", "Password");
        assert!(pwd.is_password_input());
        assert!(!pwd.is_text_entry());

        let bare = DomElement::new(1, "input");
        assert!(bare.is_text_entry());

        let button = DomElement::new(2, "button");
        assert!(button.is_submit_control());
        let plain = DomElement::new(3, "button").with_attribute("type", "button");
        assert!(!plain.is_submit_control());
        assert!(plain.is_button_like());
    }

    #[test]
    fn descendant_check_respects_path_segments() {
        let mut form = DomElement::new(0, "form");
        form.xpath = "/html/body/form[1]".to_string();
        let mut inside = DomElement::new(1, "input");
        inside.xpath = "/html/body/form[1]/input[2]".to_string();
        let mut sibling = DomElement::new(2, "input");
        sibling.xpath = "/html/body/form[10]/input".to_string();
        assert!(inside.is_descendant_of(&form));
        assert!(!sibling.is_descendant_of(&form));
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("héllo wörld", 5), "héllo…");
        assert_eq!(truncate("short", 10), "short");
    }
}
