//! Content selection: which part of the live page gets exported.

use crate::dom::ElementNode;
use crate::page::LivePage;
use crate::CaptureMode;
use log::debug;
use scraper::{Html, Selector};

/// Candidate roots for readable mode, most specific first.
const READABLE_ROOTS: &[&str] = &["article", "main", "[role=\"main\"]"];

/// Picks the subtree to export and returns a detached deep copy of it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentSelector;

impl ContentSelector {
    pub fn new() -> Self {
        ContentSelector
    }

    /// Select from the live page. Never fails and never mutates the page.
    pub fn select(&self, page: &LivePage, mode: CaptureMode) -> ElementNode {
        self.select_from(&page.document(), mode)
    }

    pub fn select_from(&self, document: &Html, mode: CaptureMode) -> ElementNode {
        if mode == CaptureMode::Readable {
            for candidate in READABLE_ROOTS {
                let sel = Selector::parse(candidate).unwrap();
                if let Some(root) = document.select(&sel).next() {
                    debug!("readable root matched {}", candidate);
                    return ElementNode::from_element_ref(root);
                }
            }
            debug!("no readable root, falling back to body");
        }
        let body_sel = Selector::parse("body").unwrap();
        document
            .select(&body_sel)
            .next()
            .map(ElementNode::from_element_ref)
            .unwrap_or_else(|| ElementNode::new("body"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(html: &str, mode: CaptureMode) -> ElementNode {
        ContentSelector::new().select_from(&Html::parse_document(html), mode)
    }

    #[test]
    fn readable_prefers_article_over_main() {
        let root = select(
            "<body><main><p>main</p></main><article><p>story</p></article></body>",
            CaptureMode::Readable,
        );
        assert_eq!(root.tag, "article");
        assert_eq!(root.text_content(), "story");
    }

    #[test]
    fn readable_uses_role_main() {
        let root = select(
            r#"<body><nav>menu</nav><div role="main">content</div></body>"#,
            CaptureMode::Readable,
        );
        assert_eq!(root.tag, "div");
        assert_eq!(root.text_content(), "content");
    }

    #[test]
    fn readable_falls_back_to_body() {
        let root = select("<body><div>only</div></body>", CaptureMode::Readable);
        assert_eq!(root.tag, "body");
        assert_eq!(root.text_content(), "only");
    }

    #[test]
    fn original_mode_copies_whole_body() {
        let root = select("<body><article>a</article><aside>b</aside></body>", CaptureMode::Original);
        assert_eq!(root.tag, "body");
        assert_eq!(root.text_content(), "ab");
    }

    #[test]
    fn empty_document_still_yields_body() {
        let root = select("", CaptureMode::Readable);
        assert_eq!(root.tag, "body");
    }

    #[test]
    fn selection_leaves_the_live_page_untouched() {
        let page = LivePage::new("https://example.com/", "<body><article><p>x</p></article></body>").unwrap();
        let mut root = ContentSelector::new().select(&page, CaptureMode::Readable);
        root.children.clear();
        let again = ContentSelector::new().select(&page, CaptureMode::Readable);
        assert_eq!(again.text_content(), "x");
    }
}
