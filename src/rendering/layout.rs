//! Block-flow layout of a render surface.
//!
//! Blocks stack vertically. Inline content (text, inline elements) is
//! collected into runs and wrapped by character cell. Images are laid out as
//! blocks, constrained to the available width with their aspect ratio kept.
//! Only inline `style` declarations are honoured: `display: none`,
//! `max-width`, `width`, `margin: auto`, `padding*`, `background*`, `color`,
//! `font-size` and `border-bottom`.

use super::font::{CELL_HEIGHT, CELL_WIDTH};
use crate::dom::{ContentNode, ElementNode};

pub type Rgba = (u8, u8, u8, u8);

pub const WHITE: Rgba = (255, 255, 255, 255);
const LINK_COLOR: Rgba = (0x00, 0x78, 0xd4, 255);

/// Typography of the surface's base style sheet (14px, #333)
const BASE_TEXT: TextStyle = TextStyle {
    font_px: 14,
    color: (0x33, 0x33, 0x33, 255),
};

/// Body padding of the surface's base style sheet
pub const BODY_PADDING: u32 = 20;

/// Elements that never produce boxes.
const NON_RENDERED: &[&str] = &[
    "head", "title", "meta", "link", "script", "style", "noscript", "template", "base",
];

const INLINE: &[&str] = &[
    "a", "abbr", "b", "cite", "code", "em", "font", "i", "kbd", "label", "mark", "q", "s",
    "small", "span", "strong", "sub", "sup", "time", "u", "var",
];

/// Blocks followed by a half-line gap.
const SPACED: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "blockquote", "pre", "figure", "table", "dl",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutContent {
    Fill(Rgba),
    /// One run of same-styled text on a single line; glyphs are `unit` px per font pixel
    Text { text: String, unit: u32, rgba: Rgba },
    /// `slot` is `None` when the image never loaded
    Image { slot: Option<usize> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutNode {
    pub rect: Rect,
    pub content: LayoutContent,
}

/// Laid-out surface
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub nodes: Vec<LayoutNode>,
}

/// What the layout needs to know about an image slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrinsicImage<'a> {
    pub src: &'a str,
    /// Natural size, when the image loaded
    pub size: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TextStyle {
    font_px: u32,
    color: Rgba,
}

impl TextStyle {
    fn unit(&self) -> u32 {
        ((self.font_px + 3) / 7).max(1)
    }

    fn cell(&self) -> u32 {
        CELL_WIDTH * self.unit()
    }

    fn line_height(&self) -> u32 {
        (self.font_px * 16 / 10).max(CELL_HEIGHT * self.unit() + 2)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Edges {
    top: u32,
    right: u32,
    bottom: u32,
    left: u32,
}

enum InlineItem<'a> {
    Word(String, TextStyle),
    Break,
    Image(&'a ElementNode),
}

struct Piece {
    text: String,
    style: TextStyle,
    offset: u32,
}

/// Lay out `body` on a surface `width` units wide.
pub fn layout_document(body: &ElementNode, width: u32, images: &[IntrinsicImage<'_>]) -> Layout {
    let mut flow = Flow {
        images,
        nodes: Vec::new(),
    };
    let inner = width.saturating_sub(2 * BODY_PADDING).max(1);
    let pad = BODY_PADDING as i32;
    let height = flow.block(body, pad, pad, inner, BASE_TEXT) + 2 * BODY_PADDING;
    Layout {
        width,
        height,
        nodes: flow.nodes,
    }
}

struct Flow<'i> {
    images: &'i [IntrinsicImage<'i>],
    nodes: Vec<LayoutNode>,
}

impl<'i> Flow<'i> {
    /// Lay out a block at `(x, y)` within `avail` units; returns the height used.
    fn block(&mut self, el: &ElementNode, x: i32, y: i32, avail: u32, inherited: TextStyle) -> u32 {
        if el.is_hidden() || NON_RENDERED.contains(&el.tag.as_str()) {
            return 0;
        }
        if el.tag == "img" {
            return self.image(el, x, y, avail);
        }
        let decls = el.style_declarations();
        let text = text_style(el, &decls, inherited);

        let mut width = avail;
        if let Some(w) = lookup(&decls, "width").and_then(|v| length(v, avail)) {
            width = w.min(avail);
        }
        if let Some(mw) = lookup(&decls, "max-width").and_then(|v| length(v, avail)) {
            width = width.min(mw);
        }
        let centred = lookup(&decls, "margin")
            .map(|m| m.split_whitespace().any(|t| t == "auto"))
            .unwrap_or(false);
        let bx = if centred {
            x + ((avail - width) / 2) as i32
        } else {
            x
        };

        let pad = padding(&decls);
        let fill = ["background-color", "background"]
            .iter()
            .find_map(|k| lookup(&decls, k).and_then(first_color));
        let fill_idx = fill.map(|rgba| {
            self.nodes.push(LayoutNode {
                rect: Rect { x: bx, y, width, height: 0 },
                content: LayoutContent::Fill(rgba),
            });
            self.nodes.len() - 1
        });

        let content_x = bx + pad.left as i32;
        let content_w = width.saturating_sub(pad.left + pad.right).max(1);
        let mut cy = y + pad.top as i32;

        let mut run: Vec<InlineItem<'_>> = Vec::new();
        if el.tag == "li" {
            run.push(InlineItem::Word("-".to_string(), text));
        }
        for child in &el.children {
            match child {
                ContentNode::Text(t) => push_words(&mut run, t, text),
                ContentNode::Element(c) if is_inline(c) => collect_inline(c, &mut run, text),
                ContentNode::Element(c) => {
                    cy += self.flush(&mut run, content_x, cy, content_w) as i32;
                    cy += self.block(c, content_x, cy, content_w, text) as i32;
                }
            }
        }
        cy += self.flush(&mut run, content_x, cy, content_w) as i32;

        let mut height = (cy - y) as u32 + pad.bottom;
        if let Some((thickness, rgba)) = lookup(&decls, "border-bottom").and_then(border) {
            self.nodes.push(LayoutNode {
                rect: Rect { x: bx, y: y + height as i32, width, height: thickness },
                content: LayoutContent::Fill(rgba),
            });
            height += thickness;
        }
        if let Some(idx) = fill_idx {
            self.nodes[idx].rect.height = height;
        }
        if SPACED.contains(&el.tag.as_str()) && height > 0 {
            height += text.line_height() / 2;
        }
        height
    }

    fn image(&mut self, el: &ElementNode, x: i32, y: i32, avail: u32) -> u32 {
        let src = el.attr("src").unwrap_or("");
        let slot = self.images.iter().position(|i| !src.is_empty() && i.src == src);
        let natural = slot.and_then(|s| self.images[s].size);
        let attr_w = el.attr("width").and_then(|v| length(v, avail));
        let attr_h = el.attr("height").and_then(|v| length(v, avail));

        let (mut w, mut h) = match (natural, attr_w, attr_h) {
            (_, Some(w), Some(h)) => (w, h),
            (Some((nw, nh)), Some(w), None) => (w, scale_dim(nh, w, nw)),
            (Some((nw, nh)), None, Some(h)) => (scale_dim(nw, h, nh), h),
            (Some((nw, nh)), None, None) => (nw, nh),
            _ => return 0,
        };
        if w > avail {
            h = scale_dim(h, avail, w);
            w = avail;
        }
        if w == 0 || h == 0 {
            return 0;
        }
        self.nodes.push(LayoutNode {
            rect: Rect { x, y, width: w, height: h },
            content: LayoutContent::Image {
                slot: slot.filter(|_| natural.is_some()),
            },
        });
        h
    }

    /// Wrap pending inline items into lines; returns the height used.
    fn flush(&mut self, run: &mut Vec<InlineItem<'_>>, x: i32, y: i32, width: u32) -> u32 {
        let items = std::mem::take(run);
        let mut cy = y;
        let mut line: Vec<Piece> = Vec::new();
        let mut line_w = 0u32;

        for item in items {
            match item {
                InlineItem::Break => {
                    cy += self.emit_line(&mut line, x, cy) as i32;
                    line_w = 0;
                }
                InlineItem::Image(img) => {
                    cy += self.emit_line(&mut line, x, cy) as i32;
                    line_w = 0;
                    cy += self.image(img, x, cy, width) as i32;
                }
                InlineItem::Word(word, style) => {
                    let cell = style.cell();
                    let max_chars = (width / cell).max(1) as usize;
                    let chars: Vec<char> = word.chars().collect();
                    for chunk in chars.chunks(max_chars) {
                        let chunk: String = chunk.iter().collect();
                        let chunk_w = chunk.chars().count() as u32 * cell;
                        let space = if line.is_empty() { 0 } else { cell };
                        if !line.is_empty() && line_w + space + chunk_w > width {
                            cy += self.emit_line(&mut line, x, cy) as i32;
                            line_w = 0;
                        }
                        let space = if line.is_empty() { 0 } else { cell };
                        let merge = matches!(line.last(), Some(last) if last.style == style);
                        match line.last_mut() {
                            Some(last) if merge => {
                                last.text.push(' ');
                                last.text.push_str(&chunk);
                            }
                            _ => {
                                let offset = line_w + space;
                                line.push(Piece { text: chunk, style, offset });
                            }
                        }
                        line_w += space + chunk_w;
                    }
                }
            }
        }
        cy += self.emit_line(&mut line, x, cy) as i32;
        (cy - y) as u32
    }

    fn emit_line(&mut self, line: &mut Vec<Piece>, x: i32, y: i32) -> u32 {
        if line.is_empty() {
            return 0;
        }
        let height = line.iter().map(|p| p.style.line_height()).max().unwrap_or(0);
        for piece in line.drain(..) {
            let unit = piece.style.unit();
            let glyph_h = CELL_HEIGHT * unit;
            self.nodes.push(LayoutNode {
                rect: Rect {
                    x: x + piece.offset as i32,
                    y: y + ((height - glyph_h) / 2) as i32,
                    width: piece.text.chars().count() as u32 * piece.style.cell(),
                    height: glyph_h,
                },
                content: LayoutContent::Text {
                    text: piece.text,
                    unit,
                    rgba: piece.style.color,
                },
            });
        }
        height
    }
}

fn is_inline(el: &ElementNode) -> bool {
    el.tag == "br" || INLINE.contains(&el.tag.as_str())
}

fn push_words(run: &mut Vec<InlineItem<'_>>, text: &str, style: TextStyle) {
    for word in text.split_whitespace() {
        run.push(InlineItem::Word(word.to_string(), style));
    }
}

fn collect_inline<'a>(el: &'a ElementNode, run: &mut Vec<InlineItem<'a>>, inherited: TextStyle) {
    if el.is_hidden() {
        return;
    }
    match el.tag.as_str() {
        "br" => return run.push(InlineItem::Break),
        "img" => return run.push(InlineItem::Image(el)),
        _ => {}
    }
    let decls = el.style_declarations();
    let mut style = text_style(el, &decls, inherited);
    if el.tag == "a" && el.attr("href").is_some() && lookup(&decls, "color").is_none() {
        style.color = LINK_COLOR;
    }
    for child in &el.children {
        match child {
            ContentNode::Text(t) => push_words(run, t, style),
            ContentNode::Element(c) => collect_inline(c, run, style),
        }
    }
}

fn text_style(el: &ElementNode, decls: &[(String, String)], inherited: TextStyle) -> TextStyle {
    let mut style = inherited;
    style.font_px = match el.tag.as_str() {
        "h1" => 28,
        "h2" => 22,
        "h3" => 18,
        "h4" => 16,
        "h5" => 14,
        "h6" => 13,
        "small" => inherited.font_px * 85 / 100,
        _ => inherited.font_px,
    };
    if let Some(px) = lookup(decls, "font-size").and_then(|v| length(v, inherited.font_px)) {
        style.font_px = px.clamp(6, 96);
    }
    if let Some(color) = lookup(decls, "color").and_then(first_color) {
        style.color = color;
    }
    style
}

fn lookup<'d>(decls: &'d [(String, String)], name: &str) -> Option<&'d str> {
    decls
        .iter()
        .rev()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.trim_end_matches("!important").trim())
}

/// `px`, unitless and `%` lengths; `%` is relative to `basis`.
fn length(value: &str, basis: u32) -> Option<u32> {
    let v = value.trim();
    let (num, pct) = if let Some(n) = v.strip_suffix('%') {
        (n, true)
    } else {
        (v.strip_suffix("px").unwrap_or(v), false)
    };
    let n: f32 = num.trim().parse().ok()?;
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    Some(if pct {
        (basis as f32 * n / 100.0) as u32
    } else {
        n as u32
    })
}

fn padding(decls: &[(String, String)]) -> Edges {
    let mut edges = Edges::default();
    if let Some(v) = lookup(decls, "padding") {
        let parts: Vec<u32> = v
            .split_whitespace()
            .map(|p| length(p, 0).unwrap_or(0))
            .collect();
        let (t, r, b, l) = match parts.as_slice() {
            [a] => (*a, *a, *a, *a),
            [a, b] => (*a, *b, *a, *b),
            [a, b, c] => (*a, *b, *c, *b),
            [a, b, c, d, ..] => (*a, *b, *c, *d),
            [] => (0, 0, 0, 0),
        };
        edges = Edges { top: t, right: r, bottom: b, left: l };
    }
    let side = |name| lookup(decls, name).and_then(|v| length(v, 0));
    if let Some(v) = side("padding-top") {
        edges.top = v;
    }
    if let Some(v) = side("padding-right") {
        edges.right = v;
    }
    if let Some(v) = side("padding-bottom") {
        edges.bottom = v;
    }
    if let Some(v) = side("padding-left") {
        edges.left = v;
    }
    edges
}

fn border(value: &str) -> Option<(u32, Rgba)> {
    let thickness = value
        .split_whitespace()
        .find_map(|t| t.strip_suffix("px").and_then(|n| n.parse::<u32>().ok()))
        .unwrap_or(1);
    let color = first_color(value)?;
    (thickness > 0).then_some((thickness, color))
}

fn first_color(value: &str) -> Option<Rgba> {
    if let Some(start) = value.find("rgb") {
        if let Some(c) = parse_color(&value[start..]) {
            return Some(c);
        }
    }
    value.split_whitespace().find_map(parse_color)
}

/// `#rgb`, `#rrggbb`, `rgb()`/`rgba()` and a handful of named colours.
pub fn parse_color(value: &str) -> Option<Rgba> {
    let v = value.trim().to_ascii_lowercase();
    if let Some(hex) = v.strip_prefix('#') {
        let hex = hex.trim_end_matches(|c: char| !c.is_ascii_hexdigit());
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        return match hex.len() {
            3 => {
                let d: Vec<u8> = hex
                    .chars()
                    .map(|c| c.to_digit(16).map(|d| (d * 17) as u8))
                    .collect::<Option<_>>()?;
                Some((d[0], d[1], d[2], 255))
            }
            6 => Some((channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?, 255)),
            _ => None,
        };
    }
    if v.starts_with("rgb") {
        let inner = v.split_once('(')?.1.split(')').next()?;
        let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
        if parts.len() < 3 {
            return None;
        }
        let c = |s: &str| s.parse::<f32>().ok().map(|n| n.clamp(0.0, 255.0) as u8);
        let alpha = parts
            .get(3)
            .and_then(|a| a.parse::<f32>().ok())
            .map(|a| (a.clamp(0.0, 1.0) * 255.0) as u8)
            .unwrap_or(255);
        if alpha == 0 {
            return None;
        }
        return Some((c(parts[0])?, c(parts[1])?, c(parts[2])?, 255));
    }
    match v.trim_end_matches(';') {
        "white" => Some(WHITE),
        "black" => Some((0, 0, 0, 255)),
        "red" => Some((255, 0, 0, 255)),
        "green" => Some((0, 128, 0, 255)),
        "blue" => Some((0, 0, 255, 255)),
        "gray" | "grey" => Some((128, 128, 128, 255)),
        "silver" => Some((192, 192, 192, 255)),
        _ => None,
    }
}

fn scale_dim(dim: u32, num: u32, den: u32) -> u32 {
    if den == 0 {
        return 0;
    }
    (dim as u64 * num as u64 / den as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn body(html: &str) -> ElementNode {
        let doc = Html::parse_document(html);
        let sel = Selector::parse("body").unwrap();
        ElementNode::from_element_ref(doc.select(&sel).next().unwrap())
    }

    fn texts(layout: &Layout) -> Vec<&str> {
        layout
            .nodes
            .iter()
            .filter_map(|n| match &n.content {
                LayoutContent::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn stacks_blocks_and_scales_headings() {
        let b = body("<body><h1>Title</h1><p>Hello world</p></body>");
        let layout = layout_document(&b, 1200, &[]);
        assert_eq!(texts(&layout), vec!["Title", "Hello world"]);
        let (h1, p) = (&layout.nodes[0], &layout.nodes[1]);
        assert!(h1.rect.y < p.rect.y);
        match (&h1.content, &p.content) {
            (LayoutContent::Text { unit: hu, .. }, LayoutContent::Text { unit: pu, .. }) => assert!(hu > pu),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn wraps_long_paragraphs() {
        let words = "lorem ".repeat(100);
        let b = body(&format!("<body><p>{}</p></body>", words));
        let layout = layout_document(&b, 300, &[]);
        let lines = texts(&layout);
        assert!(lines.len() > 1);
        for n in &layout.nodes {
            assert!(n.rect.x as u32 + n.rect.width <= 300);
        }
    }

    #[test]
    fn skips_hidden_subtrees() {
        let b = body(r#"<body><div style="display: none"><p>secret</p></div><p>shown</p></body>"#);
        let layout = layout_document(&b, 1200, &[]);
        assert_eq!(texts(&layout), vec!["shown"]);
    }

    #[test]
    fn centres_max_width_containers_with_padding() {
        let b = body(r#"<body><div style="max-width: 800px; margin: 0 auto; padding: 40px; background: #fff"><p>x</p></div></body>"#);
        let layout = layout_document(&b, 1200, &[]);
        let fill = &layout.nodes[0];
        assert_eq!(fill.content, LayoutContent::Fill(WHITE));
        assert_eq!(fill.rect.x, 200);
        assert_eq!(fill.rect.width, 800);
        let text = &layout.nodes[1];
        assert_eq!(text.rect.x, 240);
        assert!(fill.rect.height >= 80);
    }

    #[test]
    fn images_are_constrained_to_container_width() {
        let b = body(r#"<body><div style="padding: 20px"><img src="big.png"><img src="gone.png" width="10" height="10"></div></body>"#);
        let images = [
            IntrinsicImage { src: "big.png", size: Some((2000, 1000)) },
            IntrinsicImage { src: "gone.png", size: None },
        ];
        let layout = layout_document(&b, 1200, &images);
        let imgs: Vec<_> = layout
            .nodes
            .iter()
            .filter(|n| matches!(n.content, LayoutContent::Image { .. }))
            .collect();
        assert_eq!(imgs.len(), 2);
        assert_eq!(imgs[0].rect.width, 1120);
        assert_eq!(imgs[0].rect.height, 560);
        assert_eq!(imgs[0].content, LayoutContent::Image { slot: Some(0) });
        assert_eq!(imgs[1].content, LayoutContent::Image { slot: None });
    }

    #[test]
    fn links_and_list_items() {
        let b = body(r#"<body><ul><li>one <a href="/x">link</a></li></ul></body>"#);
        let layout = layout_document(&b, 1200, &[]);
        assert_eq!(texts(&layout), vec!["- one", "link"]);
        match &layout.nodes[1].content {
            LayoutContent::Text { rgba, .. } => assert_eq!(*rgba, LINK_COLOR),
            _ => panic!("expected link text"),
        }
    }

    #[test]
    fn parses_colors() {
        assert_eq!(parse_color("#fff"), Some(WHITE));
        assert_eq!(parse_color("#0078d4"), Some((0, 0x78, 0xd4, 255)));
        assert_eq!(parse_color("rgb(1, 2, 3)"), Some((1, 2, 3, 255)));
        assert_eq!(parse_color("rgba(1, 2, 3, 0)"), None);
        assert_eq!(parse_color("transparent"), None);
        assert_eq!(border("1px solid #e0e0e0"), Some((1, (0xe0, 0xe0, 0xe0, 255))));
    }
}
