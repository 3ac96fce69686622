use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixel space, stored center-first the way the
/// detector reports it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Corner form of a [`BBox`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corners {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    /// Negative extents are clamped to zero.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn corners(&self) -> Corners {
        Corners {
            x0: self.x - self.width / 2.0,
            y0: self.y - self.height / 2.0,
            x1: self.x + self.width / 2.0,
            y1: self.y + self.height / 2.0,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

impl Corners {
    pub fn area(&self) -> f32 {
        (self.x1 - self.x0).max(0.0) * (self.y1 - self.y0).max(0.0)
    }
}

/// One detector output: a box, its confidence and the class label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(flatten)]
    pub bbox: BBox,
    pub confidence: f32,
    #[serde(rename = "class")]
    pub label: String,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, label: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            label: label.into(),
        }
    }
}
