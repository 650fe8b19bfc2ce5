//! Detection overlays and instrumentation text.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::{BoundingBox, Detection, LabelMap};
use crate::frame::Frame;

/// Box colours, cycled by class index.
const PALETTE: [[u8; 3]; 10] = [
    [87, 120, 164],
    [228, 148, 68],
    [209, 97, 93],
    [133, 182, 178],
    [106, 159, 88],
    [231, 202, 96],
    [168, 124, 159],
    [241, 162, 169],
    [150, 118, 98],
    [184, 176, 172],
];

const LABEL_TEXT: Rgb<u8> = Rgb([0, 0, 0]);
const OVERLAY_TEXT: Rgb<u8> = Rgb([255, 255, 0]);
const LABEL_SCALE: f32 = 16.0;
const OVERLAY_SCALE: f32 = 22.0;
const BOX_THICKNESS: i32 = 2;

/// Fonts tried when none is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// Per-frame numbers printed in the top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OverlayStats {
    /// Shown only for streaming sources.
    pub frame_rate: Option<f64>,
    pub object_count: usize,
}

pub struct Annotator {
    labels: LabelMap,
    font: Option<FontVec>,
}

impl Annotator {
    /// Annotator without text rendering; label backgrounds are still drawn.
    pub fn new(labels: LabelMap) -> Self {
        Self { labels, font: None }
    }

    /// Uses `font_path` when given, otherwise the first system font found.
    pub fn with_font(labels: LabelMap, font_path: Option<&Path>) -> Result<Self> {
        let font = match font_path {
            Some(path) => Some(load_font(path)?),
            None => FONT_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|path| path.is_file())
                .and_then(|path| load_font(&path).ok()),
        };
        if font.is_none() {
            log::warn!("Annotator: no TTF font available, overlay text is not drawn");
        }
        Ok(Self { labels, font })
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// `name: NN%`, with the percentage truncated.
    pub fn label_text(&self, detection: &Detection) -> String {
        format!(
            "{}: {}%",
            self.labels.name(detection.class_index),
            (detection.confidence * 100.0) as u32
        )
    }

    /// Draws every detection plus the overlay text and returns the frame.
    pub fn annotate(&self, mut frame: Frame, detections: &[Detection], stats: &OverlayStats) -> Frame {
        for detection in detections {
            self.draw_detection(frame.image_mut(), detection);
        }
        self.draw_overlay(frame.image_mut(), stats);
        frame
    }

    /// Box outline, filled label background and label text.
    pub fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
        let color = box_color(detection.class_index);
        let bbox = clip_to_image(detection.bbox, image.width(), image.height());
        for inset in 0..BOX_THICKNESS {
            let width = bbox.xmax - bbox.xmin + 1 - 2 * inset;
            let height = bbox.ymax - bbox.ymin + 1 - 2 * inset;
            if width < 1 || height < 1 {
                break;
            }
            let rect = Rect::at(bbox.xmin + inset, bbox.ymin + inset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        let text = self.label_text(detection);
        let (text_w, text_h) = self.measure(LABEL_SCALE, &text);
        let baseline = (text_h / 3).max(1);
        let label_ymin = bbox.ymin.max(text_h + 10);
        let background = Rect::at(bbox.xmin, label_ymin - text_h - 10)
            .of_size(text_w.max(1) as u32, (text_h + baseline).max(1) as u32);
        draw_filled_rect_mut(image, background, color);
        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                LABEL_TEXT,
                bbox.xmin,
                label_ymin - 7 - text_h,
                PxScale::from(LABEL_SCALE),
                font,
                &text,
            );
        }
    }

    /// `FPS: x.xx` at the top for streaming sources, then the object count.
    pub fn draw_overlay(&self, image: &mut RgbImage, stats: &OverlayStats) {
        let Some(font) = &self.font else {
            return;
        };
        let mut lines = Vec::with_capacity(2);
        if let Some(rate) = stats.frame_rate {
            lines.push((20, format!("FPS: {:.2}", rate)));
        }
        lines.push((40, format!("Number of objects: {}", stats.object_count)));
        for (baseline_y, text) in lines {
            let (_, text_h) = self.measure(OVERLAY_SCALE, &text);
            draw_text_mut(
                image,
                OVERLAY_TEXT,
                10,
                baseline_y - text_h,
                PxScale::from(OVERLAY_SCALE),
                font,
                &text,
            );
        }
    }

    fn measure(&self, scale: f32, text: &str) -> (i32, i32) {
        match &self.font {
            Some(font) => {
                let (w, h) = text_size(PxScale::from(scale), font, text);
                (w as i32, h as i32)
            }
            // Rough monospace estimate keeps label backgrounds sized without a font.
            None => {
                let glyph_w = (scale * 0.55).round() as i32;
                (glyph_w * text.chars().count() as i32, (scale * 0.7).round() as i32)
            }
        }
    }
}

/// Clamps a box to the image plus a margin wide enough that clipped edges stay
/// off-canvas, keeping the drawing arithmetic within `i32`.
fn clip_to_image(bbox: BoundingBox, width: u32, height: u32) -> BoundingBox {
    let margin = BOX_THICKNESS + 1;
    let max_x = i32::try_from(width).unwrap_or(i32::MAX / 2) + margin;
    let max_y = i32::try_from(height).unwrap_or(i32::MAX / 2) + margin;
    BoundingBox::new(
        bbox.xmin.clamp(-margin, max_x),
        bbox.ymin.clamp(-margin, max_y),
        bbox.xmax.clamp(-margin, max_x),
        bbox.ymax.clamp(-margin, max_y),
    )
}

pub fn box_color(class_index: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_index % PALETTE.len()])
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read font {}", path.display()))?;
    FontVec::try_from_vec(bytes).map_err(|_| anyhow!("{} is not a usable TTF/OTF font", path.display()))
}
