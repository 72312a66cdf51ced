//! Owned, detached document trees.
//!
//! The live page is parsed with `scraper`, which hands out borrowed, read-only
//! views. Everything the pipeline mutates is first deep-copied into the owned
//! tree defined here, so nothing done during a capture can leak back into the
//! page the user is looking at.

use scraper::{ElementRef, Node};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// A node in an owned document tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentNode {
    Element(ElementNode),
    Text(String),
}

/// An element with its attributes and children
///
/// Attributes are kept sorted by name when copied out of a parsed document so
/// that serialization is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementNode {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<ContentNode>,
}

impl ElementNode {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder-style child appender.
    pub fn with_child(mut self, child: ContentNode) -> Self {
        self.children.push(child);
        self
    }

    /// Builder-style text appender.
    pub fn with_text(mut self, text: &str) -> Self {
        self.children.push(ContentNode::Text(text.to_string()));
        self
    }

    /// Deep-copy a parsed element (and its subtree) into an owned tree.
    ///
    /// Comments, doctypes and processing instructions are dropped.
    pub fn from_element_ref(element: ElementRef<'_>) -> Self {
        let value = element.value();
        let mut node = ElementNode::new(value.name());
        node.attrs = value
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        node.attrs.sort_by(|a, b| a.0.cmp(&b.0));

        for child in element.children() {
            match child.value() {
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        node.children
                            .push(ContentNode::Element(Self::from_element_ref(el)));
                    }
                }
                Node::Text(text) => node.children.push(ContentNode::Text(String::from(&**text))),
                _ => {}
            }
        }
        node
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(slot) = self
            .attrs
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            slot.1 = value.to_string();
        } else {
            self.attrs.push((name.to_ascii_lowercase(), value.to_string()));
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self
            .attrs
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(idx).1)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    /// Parsed `style` attribute as `(property, value)` pairs, property names lowercased.
    pub fn style_declarations(&self) -> Vec<(String, String)> {
        self.attr("style").map(parse_declarations).unwrap_or_default()
    }

    pub fn style_property(&self, name: &str) -> Option<String> {
        self.style_declarations()
            .into_iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Set one inline style property. An existing declaration keeps its
    /// position; duplicates of it are dropped.
    pub fn set_style_property(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        let mut decls: Vec<(String, String)> = Vec::new();
        let mut replaced = false;
        for (k, v) in self.style_declarations() {
            if k == name {
                if !replaced {
                    decls.push((k, value.to_string()));
                    replaced = true;
                }
            } else {
                decls.push((k, v));
            }
        }
        if !replaced {
            decls.push((name, value.to_string()));
        }
        let style = decls
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        self.set_attr("style", &style);
    }

    /// Whether an inline `display: none` hides this element.
    pub fn is_hidden(&self) -> bool {
        self.style_property("display")
            .map(|d| d.trim_end_matches("!important").trim() == "none")
            .unwrap_or(false)
    }

    /// Concatenated text of the subtree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Pre-order iterator over descendant elements (excluding `self`).
    pub fn descendants(&self) -> Descendants<'_> {
        let mut stack = Vec::new();
        push_children_rev(self, &mut stack);
        Descendants { stack }
    }

    pub fn find(&self, pred: impl Fn(&ElementNode) -> bool) -> Option<&ElementNode> {
        self.descendants().find(|e| pred(e))
    }

    /// Apply `f` to every descendant element, parents before children.
    pub fn visit_descendants_mut(&mut self, f: &mut dyn FnMut(&mut ElementNode)) {
        for child in self.children.iter_mut() {
            if let ContentNode::Element(el) = child {
                f(el);
                el.visit_descendants_mut(f);
            }
        }
    }

    /// Detach every descendant element for which `pred` holds. Returns the
    /// number of subtrees removed.
    pub fn remove_descendants(&mut self, pred: &dyn Fn(&ElementNode) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|c| match c {
            ContentNode::Element(el) => !pred(el),
            ContentNode::Text(_) => true,
        });
        let mut removed = before - self.children.len();
        for child in self.children.iter_mut() {
            if let ContentNode::Element(el) = child {
                removed += el.remove_descendants(pred);
            }
        }
        removed
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        let raw = RAW_TEXT_ELEMENTS.contains(&self.tag.as_str());
        for child in &self.children {
            write_node(child, raw, &mut out);
        }
        out
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a ElementNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a ElementNode;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        push_children_rev(next, &mut self.stack);
        Some(next)
    }
}

fn push_children_rev<'a>(el: &'a ElementNode, stack: &mut Vec<&'a ElementNode>) {
    for child in el.children.iter().rev() {
        if let ContentNode::Element(c) = child {
            stack.push(c);
        }
    }
}

fn collect_text(el: &ElementNode, out: &mut String) {
    for child in &el.children {
        match child {
            ContentNode::Text(t) => out.push_str(t),
            ContentNode::Element(c) => collect_text(c, out),
        }
    }
}

/// Split a declaration block on `;`, ignoring separators inside quotes or
/// parentheses (`url(data:...;base64,...)`).
fn split_declarations(style: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in style.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ';') if depth == 0 => {
                out.push(&style[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&style[start..]);
    out
}

fn parse_declarations(style: &str) -> Vec<(String, String)> {
    split_declarations(style)
        .into_iter()
        .filter_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            let k = k.trim().to_ascii_lowercase();
            let v = v.trim();
            if k.is_empty() || v.is_empty() {
                return None;
            }
            Some((k, v.to_string()))
        })
        .collect()
}

fn write_node(node: &ContentNode, raw: bool, out: &mut String) {
    match node {
        ContentNode::Text(t) if raw => out.push_str(t),
        ContentNode::Text(t) => escape_into(t, false, out),
        ContentNode::Element(el) => write_element(el, out),
    }
}

fn write_element(el: &ElementNode, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for (k, v) in &el.attrs {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        escape_into(v, true, out);
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&el.tag.as_str()) {
        return;
    }
    out.push_str(&el.inner_html());
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

fn escape_into(s: &str, attr: bool, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attr => out.push_str("&lt;"),
            '>' if !attr => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn body_of(html: &str) -> ElementNode {
        let doc = Html::parse_document(html);
        let sel = Selector::parse("body").unwrap();
        ElementNode::from_element_ref(doc.select(&sel).next().unwrap())
    }

    #[test]
    fn copies_subtree_and_serializes() {
        let body = body_of(r#"<body><p class="a b" id="x">Hi &amp; <b>there</b></p><img src="a.png"></body>"#);
        assert_eq!(body.tag, "body");
        let html = body.inner_html();
        assert_eq!(html, r#"<p class="a b" id="x">Hi &amp; <b>there</b></p><img src="a.png">"#);
        assert_eq!(body.text_content(), "Hi & there");
    }

    #[test]
    fn style_property_replaces_existing_value() {
        let mut el = ElementNode::new("div").with_attr("style", "color: red; opacity: 0.2");
        el.set_style_property("opacity", "1");
        el.set_style_property("opacity", "1");
        assert_eq!(el.attr("style"), Some("color: red; opacity: 1"));
        assert_eq!(el.style_property("color").as_deref(), Some("red"));
    }

    #[test]
    fn style_values_keep_embedded_semicolons() {
        let mut el = ElementNode::new("div").with_attr(
            "style",
            "background-image: url('data:image/png;base64,AAAA'); content: \"a;b\"; color: red",
        );
        el.set_style_property("opacity", "1");
        assert_eq!(
            el.style_property("background-image").as_deref(),
            Some("url('data:image/png;base64,AAAA')")
        );
        assert_eq!(el.style_property("content").as_deref(), Some("\"a;b\""));
        assert_eq!(
            el.attr("style"),
            Some("background-image: url('data:image/png;base64,AAAA'); content: \"a;b\"; color: red; opacity: 1")
        );
        assert_eq!(
            split_declarations("background: url(data:x;base64,y) no-repeat;color:red"),
            vec!["background: url(data:x;base64,y) no-repeat", "color:red"]
        );
    }

    #[test]
    fn remove_descendants_counts_subtrees() {
        let mut body = body_of("<body><nav><nav></nav></nav><p>keep</p><nav></nav></body>");
        let removed = body.remove_descendants(&|e| e.tag == "nav");
        assert_eq!(removed, 2);
        assert!(body.find(|e| e.tag == "nav").is_none());
        assert_eq!(body.text_content(), "keep");
    }

    #[test]
    fn descendants_are_preorder() {
        let body = body_of("<body><div><p></p></div><span></span></body>");
        let tags: Vec<_> = body.descendants().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, vec!["div", "p", "span"]);
    }

    #[test]
    fn hidden_detects_display_none() {
        let el = ElementNode::new("img").with_attr("style", "display: none !important");
        assert!(el.is_hidden());
        assert!(!ElementNode::new("img").is_hidden());
    }
}
