/// Paint command list for a laid-out surface

use super::layout::{Layout, LayoutContent, Rgba, WHITE};

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: Rgba,
    },
    Text {
        x: i32,
        y: i32,
        text: String,
        /// Surface units per font pixel
        unit: u32,
        rgba: Rgba,
    },
    Image {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        slot: usize,
    },
}

/// Turn a layout into draw order: white background first, then boxes in
/// document order. Images that never loaded paint nothing.
pub fn paint(layout: &Layout) -> Vec<PaintCommand> {
    let mut commands = Vec::with_capacity(layout.nodes.len() + 1);
    commands.push(PaintCommand::SolidRect {
        x: 0,
        y: 0,
        width: layout.width,
        height: layout.height,
        rgba: WHITE,
    });
    for node in &layout.nodes {
        let r = node.rect;
        match &node.content {
            LayoutContent::Fill(rgba) => commands.push(PaintCommand::SolidRect {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                rgba: *rgba,
            }),
            LayoutContent::Text { text, unit, rgba } => commands.push(PaintCommand::Text {
                x: r.x,
                y: r.y,
                text: text.clone(),
                unit: *unit,
                rgba: *rgba,
            }),
            LayoutContent::Image { slot: Some(slot) } => commands.push(PaintCommand::Image {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                slot: *slot,
            }),
            LayoutContent::Image { slot: None } => {}
        }
    }
    commands
}
