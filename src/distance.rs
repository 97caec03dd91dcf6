use crate::config::ObjectDimensions;
use crate::detection::BoundingBox;

/// Returned when a box is too degenerate to range.
pub const UNKNOWN_DISTANCE: f32 = -1.0;

/// True for a usable distance, false for the sentinel or garbage.
pub fn is_known(distance: f32) -> bool {
    distance.is_finite() && distance > 0.0
}

/// Pinhole-model range: `real_size` cm seen at `pixel_size` px with `focal_length` px.
pub fn distance_from_size(real_size: f32, focal_length: f32, pixel_size: f32) -> f32 {
    if pixel_size <= 0.0 {
        return UNKNOWN_DISTANCE;
    }
    real_size * focal_length / (pixel_size * 100.0)
}

/// Monocular distance estimate from bounding-box size and per-class real sizes.
#[derive(Debug, Clone)]
pub struct DistanceEstimator {
    focal_length: f32,
    dimensions: ObjectDimensions,
}

impl DistanceEstimator {
    pub fn new(focal_length: f32, dimensions: ObjectDimensions) -> Self {
        DistanceEstimator {
            focal_length,
            dimensions,
        }
    }

    pub fn set_focal_length(&mut self, focal_length: f32) {
        self.focal_length = focal_length;
    }

    pub fn set_dimensions(&mut self, dimensions: ObjectDimensions) {
        self.dimensions = dimensions;
    }

    /// Distance in metres, or [`UNKNOWN_DISTANCE`].
    ///
    /// Classes with a width entry (displays) are ranged by box width, everything
    /// else by the box diagonal against the class height.
    pub fn distance(&self, class_name: &str, bbox: &BoundingBox) -> f32 {
        let (pixel_size, real_size) = match self.dimensions.widths.get(class_name) {
            Some(&width) => (bbox.width(), width),
            None => (
                bbox.diagonal(),
                self.dimensions
                    .heights
                    .get(class_name)
                    .copied()
                    .unwrap_or(self.dimensions.default_size),
            ),
        };
        distance_from_size(real_size, self.focal_length, pixel_size)
    }
}
