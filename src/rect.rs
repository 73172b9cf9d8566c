//! Rectangle primitives.
//!
//! [`Rect`] is the `{x, y, w, h}` form used for node geometry and sub-texture
//! regions. [`Bound`] is the `{x1, y1, x2, y2}` form with an explicit validity
//! flag, used for clipping rectangles and world-space AABBs. Intersections
//! involving an invalid bound stay invalid.

/// An axis-aligned rectangle in `{x, y, w, h}` form.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }
}

/// An axis-aligned bound in `{x1, y1, x2, y2}` form with a validity flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub valid: bool,
}

impl Default for Bound {
    fn default() -> Self {
        Self::INVALID
    }
}

impl Bound {
    pub const INVALID: Self = Self {
        x1: 0.0,
        y1: 0.0,
        x2: 0.0,
        y2: 0.0,
        valid: false,
    };

    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            valid: true,
        }
    }

    pub fn from_rect(rect: &Rect) -> Self {
        Self::new(rect.x, rect.y, rect.x + rect.w, rect.y + rect.h)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        !self.valid || self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Intersection of two bounds. Invalid inputs produce an invalid result;
    /// disjoint inputs produce a valid but empty result.
    pub fn intersection(&self, other: &Bound) -> Bound {
        if !self.valid || !other.valid {
            return Bound::INVALID;
        }
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        Bound::new(x1, y1, x2.max(x1), y2.max(y1))
    }

    /// True when the bounds share any area. An invalid bound intersects
    /// nothing.
    pub fn intersects(&self, other: &Bound) -> bool {
        self.valid
            && other.valid
            && self.x1 < other.x2
            && other.x1 < self.x2
            && self.y1 < other.y2
            && other.y1 < self.y2
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Bound) -> bool {
        self.valid
            && other.valid
            && other.x1 >= self.x1
            && other.y1 >= self.y1
            && other.x2 <= self.x2
            && other.y2 <= self.y2
    }
}

#[cfg(test)]
mod tests {
    use super::{Bound, Rect};

    #[test]
    fn intersection_of_overlapping_bounds() {
        let a = Bound::new(100.0, 100.0, 300.0, 300.0);
        let b = Bound::new(250.0, 250.0, 450.0, 450.0);
        let clipped = a.intersection(&b);
        assert!(clipped.valid);
        assert_eq!(
            (clipped.x1, clipped.y1, clipped.x2, clipped.y2),
            (250.0, 250.0, 300.0, 300.0)
        );
    }

    #[test]
    fn intersection_with_invalid_bound_is_invalid() {
        let a = Bound::new(0.0, 0.0, 10.0, 10.0);
        assert!(!a.intersection(&Bound::INVALID).valid);
        assert!(!Bound::INVALID.intersection(&a).valid);
    }

    #[test]
    fn disjoint_intersection_is_empty_but_valid() {
        let a = Bound::new(0.0, 0.0, 10.0, 10.0);
        let b = Bound::new(20.0, 20.0, 30.0, 30.0);
        let clipped = a.intersection(&b);
        assert!(clipped.valid);
        assert!(clipped.is_empty());
    }

    #[test]
    fn from_rect_converts_corner_form() {
        let bound = Bound::from_rect(&Rect::new(100.0, 200.0, 300.0, 150.0));
        assert_eq!(
            (bound.x1, bound.y1, bound.x2, bound.y2),
            (100.0, 200.0, 400.0, 350.0)
        );
    }

    #[test]
    fn containment() {
        let outer = Bound::new(0.0, 0.0, 100.0, 100.0);
        let inner = Bound::new(10.0, 10.0, 90.0, 90.0);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(!outer.contains(&Bound::INVALID));
    }
}
