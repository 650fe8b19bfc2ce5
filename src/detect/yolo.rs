//! YOLOv8 pre/post-processing shared by model backends.
//!
//! Kept free of any inference runtime so the geometry and decoding rules can
//! be tested on plain buffers.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Resolution;

/// Padding value used for the unused part of a letterboxed input.
const LETTERBOX_FILL: f32 = 144.0 / 255.0;
const BOX_CHANNELS: usize = 4;

/// Scale between a frame and the model input; the frame sits top-left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub ratio: f32,
    pub frame_width: f32,
    pub frame_height: f32,
}

impl Letterbox {
    pub fn fit(frame: Resolution, input: Resolution) -> Self {
        let frame_width = frame.width as f32;
        let frame_height = frame.height as f32;
        let ratio = (input.width as f32 / frame_width).min(input.height as f32 / frame_height);
        Self {
            ratio,
            frame_width,
            frame_height,
        }
    }

    /// Maps a centre/size box in input pixels back to clamped frame pixels.
    fn to_frame(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let cx = cx / self.ratio;
        let cy = cy / self.ratio;
        let w = w / self.ratio;
        let h = h / self.ratio;
        let x1 = (cx - w / 2.0).clamp(0.0, self.frame_width);
        let y1 = (cy - h / 2.0).clamp(0.0, self.frame_height);
        let x2 = (cx + w / 2.0).clamp(0.0, self.frame_width);
        let y2 = (cy + h / 2.0).clamp(0.0, self.frame_height);
        BoundingBox::from_corners(x1, y1, x2, y2)
    }
}

/// Builds a `[1, 3, H, W]` normalised tensor buffer from an RGB image.
pub fn letterbox_input(image: &RgbImage, input: Resolution) -> (Vec<f32>, Letterbox) {
    let geometry = Letterbox::fit(Resolution::new(image.width(), image.height()), input);
    let new_w = ((image.width() as f32 * geometry.ratio).round() as u32).clamp(1, input.width);
    let new_h = ((image.height() as f32 * geometry.ratio).round() as u32).clamp(1, input.height);
    let scaled = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let plane = (input.width * input.height) as usize;
    let mut tensor = vec![LETTERBOX_FILL; plane * 3];
    for (x, y, pixel) in scaled.enumerate_pixels() {
        let offset = (y * input.width + x) as usize;
        for channel in 0..3 {
            tensor[channel * plane + offset] = pixel.0[channel] as f32 / 255.0;
        }
    }
    (tensor, geometry)
}

/// Layout of a raw YOLOv8 detection head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadShape {
    /// `4 + number_of_classes`.
    pub channels: usize,
    pub anchors: usize,
    /// `true` for `[1, anchors, channels]`, `false` for `[1, channels, anchors]`.
    pub anchors_first: bool,
}

impl HeadShape {
    /// Infers the layout from a `[1, a, b]` output shape; the smaller axis holds the channels.
    pub fn from_dims(dims: &[usize]) -> Option<Self> {
        let (a, b) = match dims {
            [1, a, b] => (*a, *b),
            [a, b] => (*a, *b),
            _ => return None,
        };
        let (channels, anchors, anchors_first) = if a <= b { (a, b, false) } else { (b, a, true) };
        if channels <= BOX_CHANNELS {
            return None;
        }
        Some(Self {
            channels,
            anchors,
            anchors_first,
        })
    }

    fn value(&self, output: &[f32], anchor: usize, channel: usize) -> f32 {
        if self.anchors_first {
            output[anchor * self.channels + channel]
        } else {
            output[channel * self.anchors + anchor]
        }
    }
}

/// Decodes every anchor whose best class score reaches `min_score`.
pub fn decode_head(
    output: &[f32],
    shape: HeadShape,
    geometry: &Letterbox,
    min_score: f32,
) -> Vec<Detection> {
    if output.len() < shape.channels * shape.anchors {
        return Vec::new();
    }
    let mut detections = Vec::new();
    for anchor in 0..shape.anchors {
        let mut best = (0usize, f32::NEG_INFINITY);
        for class in 0..shape.channels - BOX_CHANNELS {
            let score = shape.value(output, anchor, BOX_CHANNELS + class);
            if score > best.1 {
                best = (class, score);
            }
        }
        if best.1 < min_score {
            continue;
        }
        let bbox = geometry.to_frame(
            shape.value(output, anchor, 0),
            shape.value(output, anchor, 1),
            shape.value(output, anchor, 2),
            shape.value(output, anchor, 3),
        );
        detections.push(Detection::new(bbox, best.0, best.1));
    }
    detections
}

/// Class-aware non-maximum suppression, highest confidence first.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..detections.len() {
        let candidate = detections[index];
        let suppressed = detections[..kept].iter().any(|prev| {
            prev.class_index == candidate.class_index
                && prev.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_keeps_aspect_ratio() {
        let image = RgbImage::from_pixel(200, 100, image::Rgb([255, 0, 0]));
        let (tensor, geometry) = letterbox_input(&image, Resolution::new(64, 64));
        assert_eq!(tensor.len(), 3 * 64 * 64);
        assert!((geometry.ratio - 0.32).abs() < 1e-6);
        // Top-left pixel comes from the image, bottom rows are padding.
        assert!((tensor[0] - 1.0).abs() < 1e-6);
        assert!((tensor[63 * 64] - LETTERBOX_FILL).abs() < 1e-6);
    }

    #[test]
    fn head_shape_detects_layout() {
        let shape = HeadShape::from_dims(&[1, 6, 8400]).unwrap();
        assert_eq!((shape.channels, shape.anchors, shape.anchors_first), (6, 8400, false));
        let shape = HeadShape::from_dims(&[1, 8400, 6]).unwrap();
        assert_eq!((shape.channels, shape.anchors, shape.anchors_first), (6, 8400, true));
        assert!(HeadShape::from_dims(&[1, 4, 10]).is_none());
    }

    #[test]
    fn decodes_best_class_and_rescales() {
        // Two anchors, two classes, channels-first layout.
        let shape = HeadShape {
            channels: 6,
            anchors: 2,
            anchors_first: false,
        };
        #[rustfmt::skip]
        let output = vec![
            32.0, 10.0, // cx
            32.0, 10.0, // cy
            16.0, 4.0,  // w
            16.0, 4.0,  // h
            0.1, 0.05,  // class 0
            0.9, 0.1,   // class 1
        ];
        let geometry = Letterbox::fit(Resolution::new(128, 128), Resolution::new(64, 64));
        let detections = decode_head(&output, shape, &geometry, 0.25);
        assert_eq!(detections.len(), 1);
        let det = detections[0];
        assert_eq!(det.class_index, 1);
        assert!((det.confidence - 0.9).abs() < 1e-6);
        assert_eq!(det.bbox, BoundingBox::new(48, 48, 80, 80));
    }

    #[test]
    fn nms_suppresses_same_class_overlaps_only() {
        let a = Detection::new(BoundingBox::new(0, 0, 10, 10), 0, 0.9);
        let b = Detection::new(BoundingBox::new(1, 1, 11, 11), 0, 0.8);
        let c = Detection::new(BoundingBox::new(1, 1, 11, 11), 1, 0.7);
        let d = Detection::new(BoundingBox::new(50, 50, 60, 60), 0, 0.6);
        let mut dets = vec![d, b, c, a];
        non_max_suppression(&mut dets, 0.45);
        assert_eq!(dets, vec![a, c, d]);
    }
}
