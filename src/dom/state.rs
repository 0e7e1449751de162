use crate::dom::DomElement;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A point-in-time capture of a page. Indices are only meaningful within
/// the snapshot that assigned them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDom {
    pub snapshot_id: String,
    pub url: String,
    pub title: String,
    /// Ordered by `index`.
    pub elements: Vec<DomElement>,
    pub total_count: usize,
    pub interactive_count: usize,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl IndexedDom {
    pub fn new(url: String, title: String, elements: Vec<DomElement>) -> Self {
        let interactive_count = elements.iter().filter(|e| e.is_interactive).count();
        Self {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            url,
            title,
            total_count: elements.len(),
            interactive_count,
            elements,
            captured_at: chrono::Utc::now(),
        }
    }

    pub fn empty(url: impl Into<String>) -> Self {
        Self::new(url.into(), String::new(), Vec::new())
    }

    pub fn get(&self, id: &str) -> Option<&DomElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn by_index(&self, index: usize) -> Option<&DomElement> {
        self.elements.get(index).filter(|e| e.index == index)
    }

    pub fn interactive(&self) -> impl Iterator<Item = &DomElement> {
        self.elements.iter().filter(|e| e.is_interactive)
    }

    pub fn visible_interactive(&self) -> impl Iterator<Item = &DomElement> {
        self.interactive().filter(|e| e.is_visible)
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<&DomElement> {
        self.elements.iter().filter(|e| e.tag == tag).collect()
    }

    pub fn find_by_text(&self, text: &str) -> Vec<&DomElement> {
        let needle = text.to_lowercase();
        self.elements
            .iter()
            .filter(|e| e.accessible_text().to_lowercase().contains(&needle))
            .collect()
    }

    /// Password and identifier inputs both visible: the page still looks
    /// like a login form.
    pub fn shows_login_form(&self) -> bool {
        let has_password = self
            .visible_interactive()
            .any(|e| e.is_password_input());
        let has_identifier = self.visible_interactive().any(|e| e.is_text_entry());
        has_password && has_identifier
    }

    /// Locate the element in this snapshot that a reference taken from an
    /// older snapshot pointed at. Returns `None` unless exactly one element
    /// carries the same fingerprint.
    pub fn reconcile(&self, stale: &DomElement) -> Option<&DomElement> {
        let wanted = fingerprint(stale);
        if let Some(same_slot) = self.by_index(stale.index) {
            if fingerprint(same_slot) == wanted {
                return Some(same_slot);
            }
        }
        let mut matches = self.elements.iter().filter(|e| fingerprint(e) == wanted);
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Line-per-element rendering, stopping once `budget` characters are
    /// used.
    pub fn render(&self, max_text: usize, budget: usize) -> String {
        let mut out = String::new();
        let mut omitted = 0;
        for element in &self.elements {
            let line = element.describe(max_text);
            if out.len() + line.len() + 1 > budget {
                omitted += 1;
                continue;
            }
            out.push_str(&line);
            out.push('\n');
        }
        if omitted > 0 {
            out.push_str(&format!("... {} more elements omitted\n", omitted));
        }
        out
    }
}

/// Identity of an element independent of where it sits in the index.
pub fn fingerprint(element: &DomElement) -> u64 {
    let mut hasher = DefaultHasher::new();
    element.tag.hash(&mut hasher);
    element.accessible_text().hash(&mut hasher);
    for key in ["type", "name", "id", "placeholder", "role", "href"] {
        element.attr(key).hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(index: usize, tag: &str, text: &str) -> DomElement {
        let mut e = DomElement::new(index, tag).with_text(text);
        e.is_interactive = true;
        e.is_visible = true;
        e
    }

    #[test]
    fn counts_are_derived() {
        let mut heading = element(1, "h1", "Welcome");
        heading.is_interactive = false;
        let dom = IndexedDom::new(
            "https://x.test".into(),
            "X".into(),
            vec![element(0, "button", "Go"), heading],
        );
        assert_eq!(dom.total_count, 2);
        assert_eq!(dom.interactive_count, 1);
        assert_eq!(dom.get("elem_1").unwrap().tag, "h1");
    }

    #[test]
    fn reconcile_follows_moved_element() {
        let old = IndexedDom::new(
            "u".into(),
            "t".into(),
            vec![element(0, "a", "Home"), element(1, "button", "Save")],
        );
        let new = IndexedDom::new(
            "u".into(),
            "t".into(),
            vec![
                element(0, "div", "Banner"),
                element(1, "a", "Home"),
                element(2, "button", "Save"),
            ],
        );
        let stale = old.by_index(1).unwrap();
        assert_eq!(new.reconcile(stale).unwrap().index, 2);
    }

    #[test]
    fn reconcile_refuses_ambiguous_match() {
        let old = IndexedDom::new("u".into(), "t".into(), vec![element(0, "button", "Delete")]);
        let new = IndexedDom::new(
            "u".into(),
            "t".into(),
            vec![
                element(0, "span", "x"),
                element(1, "button", "Delete"),
                element(2, "button", "Delete"),
            ],
        );
        assert!(new.reconcile(old.by_index(0).unwrap()).is_none());
    }

    #[test]
    fn render_respects_budget() {
        let elements = (0..50).map(|i| element(i, "button", "Click me")).collect();
        let dom = IndexedDom::new("u".into(), "t".into(), elements);
        let rendered = dom.render(20, 200);
        assert!(rendered.len() < 260);
        assert!(rendered.contains("more elements omitted"));
    }
}
