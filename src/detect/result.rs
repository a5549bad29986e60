/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Horizontal extent. Degenerate or inverted boxes report zero.
    pub fn width(&self) -> f64 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.ymax - self.ymin).max(0.0)
    }
}

/// One object reported by a detector for a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    pub bbox: BoundingBox,
    /// Detector score in `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            label: label.into(),
            bbox,
            confidence,
        }
    }
}
