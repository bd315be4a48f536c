//! Axis-aligned box arithmetic for layout regions.
//!
//! Region coordinates arrive as `[x1, y1, x2, y2]` floats in page-pixel
//! space. Two operations matter downstream: deciding whether a formula box
//! sits inside a text paragraph (so its glyphs are already covered by the
//! paragraph's OCR pass), and turning a float box into a crop rectangle
//! that stays inside the image.

/// An axis-aligned bounding box, `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Area of this box. Degenerate boxes report `0.0`.
    pub fn area(&self) -> f32 {
        let w = self.x2 - self.x1;
        let h = self.y2 - self.y1;
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Area of the intersection with `other`, `0.0` when disjoint.
    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let x_left = self.x1.max(other.x1);
        let y_top = self.y1.max(other.y1);
        let x_right = self.x2.min(other.x2);
        let y_bottom = self.y2.min(other.y2);

        if x_right < x_left || y_bottom < y_top {
            return 0.0;
        }
        (x_right - x_left) * (y_bottom - y_top)
    }

    /// Ratio of the intersection with `other` to this box's own area.
    ///
    /// Returns `0.0` when the boxes do not intersect or this box is
    /// degenerate, so the result is always a valid ratio in `[0, 1]` for
    /// well-formed inputs.
    pub fn containment_ratio(&self, other: &BBox) -> f32 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let own = self.area();
        if own <= 0.0 {
            return 0.0;
        }
        inter / own
    }

    /// Whether this box sits inside `other` at `threshold` or more of its
    /// own area.
    pub fn is_contained_within(&self, other: &BBox, threshold: f32) -> bool {
        self.containment_ratio(other) >= threshold
    }

    /// Pixel crop rectangle `(x, y, width, height)` clamped to an image of
    /// `width`×`height`.
    ///
    /// The left/top edges are floored, the right/bottom edges are ceiled,
    /// then everything is clamped to the image bounds. Returns `None` when
    /// the clamped rectangle has no area (box entirely outside the image,
    /// or inverted).
    pub fn crop_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = (self.x1.floor().max(0.0) as u32).min(width);
        let y1 = (self.y1.floor().max(0.0) as u32).min(height);
        let x2 = (self.x2.ceil().max(0.0) as u32).min(width);
        let y2 = (self.y2.ceil().max(0.0) as u32).min(height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

impl From<[f32; 4]> for BBox {
    fn from(c: [f32; 4]) -> Self {
        BBox::new(c[0], c[1], c[2], c[3])
    }
}
