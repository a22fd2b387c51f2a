//! Orientation handling for video tracks.
//!
//! Transforms use the row-vector convention of the MOV display matrix:
//! `[x' y' 1] = [x y 1] * [[a b 0] [c d 0] [tx ty 1]]`, so `p.concat(q)`
//! applies `p` first and `q` second.

use ffmpeg_bus::stream::DisplayMatrix;

use crate::media::Size;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn rotate(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    /// `self` followed by `other`.
    pub fn concat(&self, other: &AffineTransform) -> AffineTransform {
        AffineTransform {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            tx: self.tx * other.a + self.ty * other.c + other.tx,
            ty: self.tx * other.b + self.ty * other.d + other.ty,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.a + y * self.c + self.tx,
            x * self.b + y * self.d + self.ty,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// `None` for degenerate (non-invertible) transforms.
    pub fn invert(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(AffineTransform {
            a,
            b,
            c,
            d,
            tx: -(self.tx * a + self.ty * c),
            ty: -(self.tx * b + self.ty * d),
        })
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<DisplayMatrix> for AffineTransform {
    fn from(m: DisplayMatrix) -> Self {
        Self::new(m.a, m.b, m.c, m.d, m.tx, m.ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Up,
    Down,
    Left,
    Right,
}

/// Classifies the rotation part of `transform`. Only the four axis-aligned
/// rotations are recognised, by exact comparison; anything else is `Up` with
/// `is_portrait` passed through untouched.
pub fn orientation_from_transform(
    transform: &AffineTransform,
    is_portrait: bool,
) -> (Orientation, bool) {
    match (transform.a, transform.b, transform.c, transform.d) {
        (a, b, c, d) if a == 0.0 && b == 1.0 && c == -1.0 && d == 0.0 => (Orientation::Right, true),
        (a, b, c, d) if a == 0.0 && b == -1.0 && c == 1.0 && d == 0.0 => (Orientation::Left, true),
        (a, b, c, d) if a == 1.0 && b == 0.0 && c == 0.0 && d == 1.0 => (Orientation::Up, is_portrait),
        (a, b, c, d) if a == -1.0 && b == 0.0 && c == 0.0 && d == -1.0 => {
            (Orientation::Down, is_portrait)
        }
        _ => (Orientation::Up, is_portrait),
    }
}

/// Transform that maps a track's natural frame onto `canvas`.
///
/// Portrait tracks are scaled so their rotated width fills the canvas width.
/// Landscape tracks are scaled to the canvas height and centred horizontally.
pub fn fit_transform(preferred: &AffineTransform, natural: Size, canvas: Size) -> AffineTransform {
    let default_portrait = natural.width < natural.height;
    let (orientation, is_portrait) = orientation_from_transform(preferred, default_portrait);

    if is_portrait {
        let s = canvas.width / natural.height;
        return preferred.concat(&AffineTransform::scale(s, s));
    }

    let s = canvas.height / natural.height;
    let scale = AffineTransform::scale(s, s);
    if orientation == Orientation::Down {
        return AffineTransform::rotate(std::f64::consts::PI)
            .concat(&AffineTransform::translate(
                natural.width,
                natural.height + canvas.height,
            ))
            .concat(&scale);
    }
    preferred
        .concat(&scale)
        .concat(&AffineTransform::translate(
            -(natural.width * s / 2.0 - canvas.width / 2.0),
            0.0,
        ))
}

#[cfg(test)]
#[path = "transform_test.rs"]
mod transform_test;
