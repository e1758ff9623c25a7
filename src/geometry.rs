//! Geometry primitives shared by the ingress stage and the output path.
//!
//! Boxes are center-based (`xc`, `yc`, `width`, `height`), matching the object
//! metadata model of the inference framework.

use serde::{Deserialize, Serialize};

/// Original (native) resolution of a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Paddings added around the processing frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePadding {
    /// Whether the paddings stay on the output frame.
    pub keep: bool,
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Default for FramePadding {
    fn default() -> Self {
        Self {
            keep: true,
            left: 0,
            top: 0,
            right: 0,
            bottom: 0,
        }
    }
}

impl FramePadding {
    /// Padding with all sides zero behaves as "no padding".
    pub fn is_empty(&self) -> bool {
        self.left == 0 && self.top == 0 && self.right == 0 && self.bottom == 0
    }

    /// Total horizontal padding.
    pub fn width(&self) -> u32 {
        self.left + self.right
    }

    /// Total vertical padding.
    pub fn height(&self) -> u32 {
        self.top + self.bottom
    }
}

/// Axis-aligned box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub xc: f32,
    pub yc: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(xc: f32, yc: f32, width: f32, height: f32) -> Self {
        Self {
            xc,
            yc,
            width,
            height,
        }
    }

    /// Box covering a whole `width` x `height` frame.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(
            width as f32 / 2.0,
            height as f32 / 2.0,
            width as f32,
            height as f32,
        )
    }

    pub fn left(&self) -> f32 {
        self.xc - self.width / 2.0
    }

    pub fn top(&self) -> f32 {
        self.yc - self.height / 2.0
    }

    pub fn scale(&mut self, scale_x: f32, scale_y: f32) {
        self.xc *= scale_x;
        self.yc *= scale_y;
        self.width *= scale_x;
        self.height *= scale_y;
    }

    pub fn shift(&mut self, dx: f32, dy: f32) {
        self.xc += dx;
        self.yc += dy;
    }

    /// Component-wise comparison with a tolerance relative to the magnitude
    /// of the compared values.
    pub fn almost_eq(&self, other: &BBox, eps: f32) -> bool {
        close(self.xc, other.xc, eps)
            && close(self.yc, other.yc, eps)
            && close(self.width, other.width, eps)
            && close(self.height, other.height, eps)
    }
}

/// Rotated box. `angle` is in degrees, `None` means not rotated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RBBox {
    pub xc: f32,
    pub yc: f32,
    pub width: f32,
    pub height: f32,
    pub angle: Option<f32>,
}

impl RBBox {
    pub fn new(xc: f32, yc: f32, width: f32, height: f32, angle: Option<f32>) -> Self {
        Self {
            xc,
            yc,
            width,
            height,
            angle,
        }
    }

    pub fn is_rotated(&self) -> bool {
        matches!(self.angle, Some(angle) if angle != 0.0)
    }

    /// Scale a rotated box by non-uniform factors.
    ///
    /// Right angles keep the box axis-aligned (with swapped axes for odd
    /// multiples of 90 degrees); other angles project the scale onto the box
    /// axes and recompute the angle.
    pub fn scale(&mut self, scale_x: f32, scale_y: f32) {
        self.xc *= scale_x;
        self.yc *= scale_y;
        let angle = self.angle.unwrap_or(0.0);
        if angle % 90.0 == 0.0 {
            if (angle / 90.0).rem_euclid(2.0) == 0.0 {
                self.width *= scale_x;
                self.height *= scale_y;
            } else {
                self.width *= scale_y;
                self.height *= scale_x;
            }
            return;
        }

        let radians = angle.to_radians();
        let (sin, cos) = radians.sin_cos();
        let (sx2, sy2) = (scale_x * scale_x, scale_y * scale_y);
        let (sin2, cos2) = (sin * sin, cos * cos);
        self.width *= (sx2 * cos2 + sy2 * sin2).sqrt();
        self.height *= (sx2 * sin2 + sy2 * cos2).sqrt();
        self.angle = Some((scale_y * sin).atan2(scale_x * cos).to_degrees());
    }

    pub fn shift(&mut self, dx: f32, dy: f32) {
        self.xc += dx;
        self.yc += dy;
    }

    pub fn as_bbox(&self) -> BBox {
        BBox::new(self.xc, self.yc, self.width, self.height)
    }
}

/// Detection box of an object: regular or rotated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectBox {
    Regular(BBox),
    Rotated(RBBox),
}

impl ObjectBox {
    /// Rotated boxes without an angle collapse to regular boxes.
    pub fn normalized(self) -> Self {
        match self {
            ObjectBox::Rotated(rbbox) if !rbbox.is_rotated() => {
                ObjectBox::Regular(rbbox.as_bbox())
            }
            other => other,
        }
    }

    pub fn scale(&mut self, scale_x: f32, scale_y: f32) {
        match self {
            ObjectBox::Regular(bbox) => bbox.scale(scale_x, scale_y),
            ObjectBox::Rotated(rbbox) => rbbox.scale(scale_x, scale_y),
        }
    }

    pub fn shift(&mut self, dx: f32, dy: f32) {
        match self {
            ObjectBox::Regular(bbox) => bbox.shift(dx, dy),
            ObjectBox::Rotated(rbbox) => rbbox.shift(dx, dy),
        }
    }

    pub fn is_rotated(&self) -> bool {
        matches!(self, ObjectBox::Rotated(_))
    }

    pub fn center(&self) -> (f32, f32) {
        match self {
            ObjectBox::Regular(bbox) => (bbox.xc, bbox.yc),
            ObjectBox::Rotated(rbbox) => (rbbox.xc, rbbox.yc),
        }
    }
}

fn close(a: f32, b: f32, eps: f32) -> bool {
    let magnitude = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= eps * magnitude
}
