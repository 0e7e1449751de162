//! Scripts evaluated in the page. Kept as constants so page doubles can
//! recognise them.

pub const OUTER_HTML_SCRIPT: &str = "document.documentElement.outerHTML";

/// Takes an array of XPath strings, returns one entry per path: `null` when
/// the node is gone, otherwise its viewport rect plus whether computed style
/// hides it or any ancestor.
pub const GEOMETRY_SCRIPT: &str = r#"(xpaths) => xpaths.map((xp) => {
    const node = document.evaluate(xp, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    if (!node || node.nodeType !== 1) return null;
    let displayed = true;
    for (let n = node; n && n.nodeType === 1; n = n.parentElement) {
        const style = getComputedStyle(n);
        if (style.display === 'none' || style.visibility === 'hidden') { displayed = false; break; }
    }
    const r = node.getBoundingClientRect();
    return { x: r.x, y: r.y, width: r.width, height: r.height, displayed };
})"#;

/// Submits the form at the given XPath, preferring `requestSubmit` so
/// submit handlers run.
pub const SUBMIT_FORM_SCRIPT: &str = r#"(xp) => {
    const form = document.evaluate(xp, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    if (!form) return false;
    if (typeof form.requestSubmit === 'function') { form.requestSubmit(); } else { form.submit(); }
    return true;
}"#;

pub const SCROLL_SCRIPT: &str = r#"(dy) => { window.scrollBy(0, dy); return window.scrollY; }"#;

/// Visible text of the element at a CSS selector, or the whole body.
pub const EXTRACT_TEXT_SCRIPT: &str = r#"(sel) => {
    const el = sel ? document.querySelector(sel) : document.body;
    return el ? (el.innerText || el.textContent || '').trim() : null;
}"#;

/// Lowercased visible body text, used for keyword checks.
pub const BODY_TEXT_SCRIPT: &str = "(document.body ? document.body.innerText : '').toLowerCase()";

/// Tag and lowercased `type` of the focused element, `null` when focus is
/// on the body or nowhere.
pub const FOCUSED_ELEMENT_SCRIPT: &str = r#"(() => {
    const el = document.activeElement;
    if (!el || el === document.body || el === document.documentElement) return null;
    return { tag: el.tagName.toLowerCase(), type: (el.getAttribute('type') || '').toLowerCase() };
})()"#;
