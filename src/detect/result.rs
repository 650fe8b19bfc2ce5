use serde::Deserialize;

/// Float corners beyond this many pixels are clamped.
pub const COORD_LIMIT: f32 = 1.0e6;

/// Axis-aligned box in frame pixel coordinates. Corners are always ordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl BoundingBox {
    /// Builds a box from any two opposite corners.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            xmin: x1.min(x2),
            ymin: y1.min(y2),
            xmax: x1.max(x2),
            ymax: y1.max(y2),
        }
    }

    /// Truncates float corners to whole pixels, clamped to `±COORD_LIMIT`.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let px = |v: f32| v.clamp(-COORD_LIMIT, COORD_LIMIT) as i32;
        Self::new(px(x1), px(y1), px(x2), px(y2))
    }

    pub fn width(&self) -> u32 {
        self.xmax.abs_diff(self.xmin)
    }

    pub fn height(&self) -> u32 {
        self.ymax.abs_diff(self.ymin)
    }

    pub fn area(&self) -> f32 {
        self.width() as f32 * self.height() as f32
    }

    /// Intersection over union; `0.0` for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let overlap = |lo: i32, hi: i32| (i64::from(hi) - i64::from(lo)).max(0) as f32;
        let ix = overlap(self.xmin.max(other.xmin), self.xmax.min(other.xmax));
        let iy = overlap(self.ymin.max(other.ymin), self.ymax.min(other.ymax));
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One detected object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_index: usize,
    /// Probability in `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    /// Confidence is clamped into `[0, 1]`; NaN becomes `0.0`.
    pub fn new(bbox: BoundingBox, class_index: usize, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            bbox,
            class_index,
            confidence,
        }
    }

    /// Strictly-greater-than threshold test shared by drawing and alerting.
    pub fn clears(&self, threshold: f32) -> bool {
        self.confidence > threshold
    }
}

/// On-disk form of a detection in replay files.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct DetectionRecord {
    pub bbox: [f32; 4],
    pub class: usize,
    pub confidence: f32,
}

impl From<DetectionRecord> for Detection {
    fn from(record: DetectionRecord) -> Self {
        let [x1, y1, x2, y2] = record.bbox;
        Detection::new(
            BoundingBox::from_corners(x1, y1, x2, y2),
            record.class,
            record.confidence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_are_ordered() {
        let b = BoundingBox::new(50, 40, 10, 5);
        assert_eq!((b.xmin, b.ymin, b.xmax, b.ymax), (10, 5, 50, 40));
        assert_eq!((b.width(), b.height()), (40, 35));
    }

    #[test]
    fn confidence_is_a_probability() {
        let b = BoundingBox::new(0, 0, 1, 1);
        assert_eq!(Detection::new(b, 0, 1.7).confidence, 1.0);
        assert_eq!(Detection::new(b, 0, -0.2).confidence, 0.0);
        assert_eq!(Detection::new(b, 0, f32::NAN).confidence, 0.0);
    }

    #[test]
    fn threshold_is_strict() {
        let b = BoundingBox::new(0, 0, 1, 1);
        assert!(!Detection::new(b, 0, 0.79).clears(0.8));
        assert!(!Detection::new(b, 0, 0.8).clears(0.8));
        assert!(Detection::new(b, 0, 0.81).clears(0.8));
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 20, 30, 30);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), 0.0);
        let half = BoundingBox::new(5, 0, 15, 10);
        assert!((a.iou(&half) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn extreme_corners_do_not_overflow() {
        let huge = BoundingBox::from_corners(-3.0e38, -1.0e30, 3.0e38, f32::INFINITY);
        assert_eq!((huge.xmin, huge.xmax), (-1_000_000, 1_000_000));
        assert_eq!(huge.width(), 2_000_000);

        let full = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(full.width(), u32::MAX);
        let inner = BoundingBox::new(0, 0, 10, 10);
        assert!(full.iou(&inner) >= 0.0);
    }
}
