//! Structural clean-up of the selected content.

use crate::dom::{ContentNode, ElementNode};
use crate::page::LivePage;
use crate::CaptureMode;
use log::debug;

/// One entry of the removal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Tag(&'static str),
    Class(&'static str),
    Role(&'static str),
    IdContains(&'static str),
    ClassContains(&'static str),
}

impl Rule {
    pub fn matches(&self, el: &ElementNode) -> bool {
        match *self {
            Rule::Tag(tag) => el.tag == tag,
            Rule::Class(class) => el.has_class(class),
            Rule::Role(role) => el
                .attr("role")
                .map(|r| r.trim().eq_ignore_ascii_case(role))
                .unwrap_or(false),
            Rule::IdContains(needle) => el.attr("id").map(|v| v.contains(needle)).unwrap_or(false),
            Rule::ClassContains(needle) => el
                .attr("class")
                .map(|v| v.contains(needle))
                .unwrap_or(false),
        }
    }
}

/// Nodes that never belong in an export: executable or embedded content,
/// page chrome, ads, share/comment widgets, and A/B testing overlays.
pub const REMOVAL_SET: &[Rule] = &[
    Rule::Tag("script"),
    Rule::Tag("style"),
    Rule::Tag("noscript"),
    Rule::Tag("iframe"),
    Rule::Tag("frame"),
    Rule::Tag("object"),
    Rule::Tag("embed"),
    Rule::Tag("nav"),
    Rule::Tag("header"),
    Rule::Tag("footer"),
    Rule::Tag("aside"),
    Rule::Class("advertisement"),
    Rule::Class("ad"),
    Rule::Class("ads"),
    Rule::Class("social-share"),
    Rule::Class("comments"),
    Rule::Role("navigation"),
    Rule::Role("banner"),
    Rule::Role("complementary"),
    Rule::IdContains("_vis_opt"),
    Rule::ClassContains("_vis_opt"),
];

const READABLE_CONTAINER_STYLE: &str = "max-width: 800px; margin: 0 auto; padding: 40px; \
     font-family: -apple-system, BlinkMacSystemFont, \"Segoe UI\", Roboto, sans-serif; \
     line-height: 1.8; color: #333; background: #fff";
const READABLE_TITLE_STYLE: &str = "font-size: 28px; font-weight: 600; margin-bottom: 8px; color: #1a1a1a";
const READABLE_SOURCE_STYLE: &str = "font-size: 13px; color: #666; margin-bottom: 30px; \
     padding-bottom: 20px; border-bottom: 1px solid #e0e0e0";
const READABLE_LINK_STYLE: &str = "color: #0078d4; text-decoration: none";
const EXPORT_CONTAINER_STYLE: &str = "width: 100%; background: white; padding: 20px";

/// Sanitizes a detached content tree
#[derive(Debug, Clone, Copy)]
pub struct DocumentSanitizer {
    pub mode: CaptureMode,
    pub include_images: bool,
    pub include_links: bool,
}

impl DocumentSanitizer {
    pub fn new(mode: CaptureMode, include_images: bool, include_links: bool) -> Self {
        Self {
            mode,
            include_images,
            include_links,
        }
    }

    /// Strip, hide and force visibility in place. Idempotent.
    pub fn sanitize(&self, root: &mut ElementNode) {
        let removed = root.remove_descendants(&|el| REMOVAL_SET.iter().any(|r| r.matches(el)));
        debug!("sanitizer removed {} subtrees", removed);

        let readable = self.mode == CaptureMode::Readable;
        let include_images = self.include_images;
        let include_links = self.include_links;
        root.visit_descendants_mut(&mut |el| {
            if !include_images && el.tag == "img" {
                el.set_style_property("display", "none");
            }
            if !include_links && el.tag == "a" {
                el.remove_attr("href");
            }
            if readable {
                el.set_style_property("opacity", "1");
                el.set_style_property("visibility", "visible");
            }
        });
    }

    /// Build the exported root around sanitized content.
    pub fn wrap(&self, content: ElementNode, page: &LivePage) -> ElementNode {
        match self.mode {
            CaptureMode::Readable => self.readable_container(content, page),
            CaptureMode::Original => {
                let mut container = ElementNode::new("div")
                    .with_attr("class", "pdf-export-container")
                    .with_attr("style", EXPORT_CONTAINER_STYLE);
                if content.tag == "body" {
                    container.children = content.children;
                } else {
                    container.children.push(ContentNode::Element(content));
                }
                container
            }
        }
    }

    fn readable_container(&self, content: ElementNode, page: &LivePage) -> ElementNode {
        let title = ElementNode::new("h1")
            .with_attr("style", READABLE_TITLE_STYLE)
            .with_text(page.title());

        let label = page.host_label();
        let source_inner = if self.include_links {
            ElementNode::new("a")
                .with_attr("href", page.url().as_str())
                .with_attr("style", READABLE_LINK_STYLE)
                .with_text(&label)
        } else {
            ElementNode::new("span").with_text(&label)
        };
        let source = ElementNode::new("p")
            .with_attr("style", READABLE_SOURCE_STYLE)
            .with_child(ContentNode::Element(source_inner));

        ElementNode::new("div")
            .with_attr("class", "pdf-readable-content")
            .with_attr("style", READABLE_CONTAINER_STYLE)
            .with_child(ContentNode::Element(title))
            .with_child(ContentNode::Element(source))
            .with_child(ContentNode::Element(content))
    }
}
