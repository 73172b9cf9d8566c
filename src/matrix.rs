//! 2D affine transforms.
//!
//! The matrix layout is `[ta tb tx; tc td ty]`, so a point maps as
//! `x' = ta*x + tb*y + tx`, `y' = tc*x + td*y + ty`. Composition helpers
//! mutate in place and [`Transform2D::multiply`] takes an output parameter so
//! hot paths can reuse a scratch matrix instead of allocating per node.

/// A 2D affine transform `[ta tb tx; tc td ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    pub ta: f32,
    pub tb: f32,
    pub tx: f32,
    pub tc: f32,
    pub td: f32,
    pub ty: f32,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform2D {
    pub const IDENTITY: Self = Self {
        ta: 1.0,
        tb: 0.0,
        tx: 0.0,
        tc: 0.0,
        td: 1.0,
        ty: 0.0,
    };

    pub fn translation(x: f32, y: f32) -> Self {
        Self {
            tx: x,
            ty: y,
            ..Self::IDENTITY
        }
    }

    /// Post-multiplies by a translation, applied in the local space of the
    /// current transform.
    pub fn translate(&mut self, x: f32, y: f32) {
        self.tx += self.ta * x + self.tb * y;
        self.ty += self.tc * x + self.td * y;
    }

    /// Post-multiplies by a rotation of `radians`.
    pub fn rotate(&mut self, radians: f32) {
        if radians == 0.0 {
            return;
        }
        let (sin, cos) = radians.sin_cos();
        let (ta, tb, tc, td) = (self.ta, self.tb, self.tc, self.td);
        self.ta = ta * cos + tb * sin;
        self.tb = tb * cos - ta * sin;
        self.tc = tc * cos + td * sin;
        self.td = td * cos - tc * sin;
    }

    /// Post-multiplies by a non-uniform scale.
    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.ta *= sx;
        self.tb *= sy;
        self.tc *= sx;
        self.td *= sy;
    }

    /// `out = lhs * rhs`. Output-parameter form so callers can keep a scratch
    /// matrix across a traversal.
    pub fn multiply(out: &mut Transform2D, lhs: &Transform2D, rhs: &Transform2D) {
        let ta = lhs.ta * rhs.ta + lhs.tb * rhs.tc;
        let tb = lhs.ta * rhs.tb + lhs.tb * rhs.td;
        let tx = lhs.ta * rhs.tx + lhs.tb * rhs.ty + lhs.tx;
        let tc = lhs.tc * rhs.ta + lhs.td * rhs.tc;
        let td = lhs.tc * rhs.tb + lhs.td * rhs.td;
        let ty = lhs.tc * rhs.tx + lhs.td * rhs.ty + lhs.ty;
        *out = Transform2D {
            ta,
            tb,
            tx,
            tc,
            td,
            ty,
        };
    }

    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.ta * x + self.tb * y + self.tx,
            self.tc * x + self.td * y + self.ty,
        )
    }

    /// True when the transform maps axis-aligned rectangles to axis-aligned
    /// rectangles, enabling the quad fast path.
    pub fn is_axis_aligned(&self) -> bool {
        self.tb == 0.0 && self.tc == 0.0
    }

    pub fn to_float6(&self) -> [f32; 6] {
        [self.ta, self.tb, self.tx, self.tc, self.td, self.ty]
    }
}

#[cfg(test)]
mod tests {
    use super::Transform2D;

    fn assert_close(actual: (f32, f32), expected: (f32, f32)) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-4 && (actual.1 - expected.1).abs() < 1e-4,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn identity_leaves_points_unchanged() {
        assert_close(
            Transform2D::IDENTITY.transform_point(3.0, 4.0),
            (3.0, 4.0),
        );
    }

    #[test]
    fn translate_then_rotate_applies_in_local_space() {
        // T(10, 0) * R(90deg): the rotation happens around the translated
        // origin, so (1, 0) lands at (10, 1).
        let mut transform = Transform2D::translation(10.0, 0.0);
        transform.rotate(std::f32::consts::FRAC_PI_2);
        assert_close(transform.transform_point(1.0, 0.0), (10.0, 1.0));
    }

    #[test]
    fn scale_composes_with_translation() {
        let mut transform = Transform2D::translation(5.0, 5.0);
        transform.scale(2.0, 3.0);
        assert_close(transform.transform_point(1.0, 1.0), (7.0, 8.0));
    }

    #[test]
    fn multiply_matches_sequential_application() {
        let mut lhs = Transform2D::translation(2.0, 3.0);
        lhs.rotate(0.7);
        let mut rhs = Transform2D::translation(-1.0, 4.0);
        rhs.scale(1.5, 0.5);

        let mut composed = Transform2D::IDENTITY;
        Transform2D::multiply(&mut composed, &lhs, &rhs);

        let point = (2.5, -1.5);
        let staged = rhs.transform_point(point.0, point.1);
        let expected = lhs.transform_point(staged.0, staged.1);
        assert_close(composed.transform_point(point.0, point.1), expected);
    }

    #[test]
    fn axis_alignment_detection() {
        let mut transform = Transform2D::translation(4.0, 4.0);
        transform.scale(2.0, 2.0);
        assert!(transform.is_axis_aligned());
        transform.rotate(0.3);
        assert!(!transform.is_axis_aligned());
    }
}
