use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, top-left `(x1, y1)` to bottom-right `(x2, y2)`.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BoundingBox { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn diagonal(&self) -> f32 {
        self.width().hypot(self.height())
    }

    /// Centroid of the box.
    pub fn center(&self) -> Point2<f32> {
        Point2::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        BoundingBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// A single labelled detection from the external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_name: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_name: class_name.into(),
            confidence,
        }
    }

    pub fn center(&self) -> Point2<f32> {
        self.bbox.center()
    }
}

/// One line of a detection replay log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameDetections {
    pub frame_id: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}
