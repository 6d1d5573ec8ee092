// SPDX-License-Identifier: GPL-3.0-only

//! Preview transform
//!
//! The display stretches the camera buffer over the whole surface. The
//! transform computed here is applied on top of that stretch to restore the
//! buffer's aspect ratio, fill the surface without letterboxing, rotate the
//! image upright and optionally mirror it. All steps pivot on the surface
//! center, so the center of the buffer always lands on the center of the
//! surface.

use crate::backends::camera::types::Resolution;

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn from_size(width: f64, height: f64) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            right: width,
            bottom: height,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn offset(&mut self, dx: f64, dy: f64) {
        self.left += dx;
        self.right += dx;
        self.top += dy;
        self.bottom += dy;
    }
}

/// 2D affine transform stored as the top two rows of a 3x3 matrix
///
/// ```text
/// | scale_x  skew_x   trans_x |
/// | skew_y   scale_y  trans_y |
/// |   0        0        1     |
/// ```
///
/// `post_*` operations apply after the existing transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub scale_x: f64,
    pub skew_x: f64,
    pub trans_x: f64,
    pub skew_y: f64,
    pub scale_y: f64,
    pub trans_y: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        scale_x: 1.0,
        skew_x: 0.0,
        trans_x: 0.0,
        skew_y: 0.0,
        scale_y: 1.0,
        trans_y: 0.0,
    };

    pub fn translate(dx: f64, dy: f64) -> Self {
        Self {
            trans_x: dx,
            trans_y: dy,
            ..Self::IDENTITY
        }
    }

    /// Scale about the pivot point
    pub fn scale(sx: f64, sy: f64, px: f64, py: f64) -> Self {
        Self {
            scale_x: sx,
            scale_y: sy,
            trans_x: px - sx * px,
            trans_y: py - sy * py,
            ..Self::IDENTITY
        }
    }

    /// Clockwise rotation (y axis pointing down) about the pivot point
    pub fn rotate(degrees: f64, px: f64, py: f64) -> Self {
        let (sin, cos) = snap_sin_cos(degrees);
        Self {
            scale_x: cos,
            skew_x: -sin,
            trans_x: px - cos * px + sin * py,
            skew_y: sin,
            scale_y: cos,
            trans_y: py - sin * px - cos * py,
        }
    }

    /// Map `src` onto `dst`, scaling each axis independently
    pub fn rect_to_rect(src: &Rect, dst: &Rect) -> Option<Self> {
        if src.width() == 0.0 || src.height() == 0.0 {
            return None;
        }
        let sx = dst.width() / src.width();
        let sy = dst.height() / src.height();
        Some(Self {
            scale_x: sx,
            scale_y: sy,
            trans_x: dst.left - src.left * sx,
            trans_y: dst.top - src.top * sy,
            ..Self::IDENTITY
        })
    }

    /// `other * self`: apply `self`, then `other`
    pub fn post_concat(&mut self, other: &Matrix) {
        let a = *self;
        let b = other;
        *self = Matrix {
            scale_x: b.scale_x * a.scale_x + b.skew_x * a.skew_y,
            skew_x: b.scale_x * a.skew_x + b.skew_x * a.scale_y,
            trans_x: b.scale_x * a.trans_x + b.skew_x * a.trans_y + b.trans_x,
            skew_y: b.skew_y * a.scale_x + b.scale_y * a.skew_y,
            scale_y: b.skew_y * a.skew_x + b.scale_y * a.scale_y,
            trans_y: b.skew_y * a.trans_x + b.scale_y * a.trans_y + b.trans_y,
        };
    }

    pub fn post_scale(&mut self, sx: f64, sy: f64, px: f64, py: f64) {
        self.post_concat(&Matrix::scale(sx, sy, px, py));
    }

    pub fn post_rotate(&mut self, degrees: f64, px: f64, py: f64) {
        self.post_concat(&Matrix::rotate(degrees, px, py));
    }

    pub fn map_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.scale_x * x + self.skew_x * y + self.trans_x,
            self.skew_y * x + self.scale_y * y + self.trans_y,
        )
    }

    /// Row-major 3x3 values, as display toolkits take them
    pub fn values(&self) -> [f64; 9] {
        [
            self.scale_x,
            self.skew_x,
            self.trans_x,
            self.skew_y,
            self.scale_y,
            self.trans_y,
            0.0,
            0.0,
            1.0,
        ]
    }
}

/// Exact sine/cosine for quarter turns, so 90 degree rotations do not leave
/// 1e-17 residue in the matrix
fn snap_sin_cos(degrees: f64) -> (f64, f64) {
    let normalized = degrees.rem_euclid(360.0);
    if normalized == 0.0 {
        (0.0, 1.0)
    } else if normalized == 90.0 {
        (1.0, 0.0)
    } else if normalized == 180.0 {
        (0.0, -1.0)
    } else if normalized == 270.0 {
        (-1.0, 0.0)
    } else {
        normalized.to_radians().sin_cos()
    }
}

/// Transform for one buffer/surface/orientation combination
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewTransform {
    pub matrix: Matrix,
    /// Uniform scale that makes the buffer cover the surface
    pub fill_scale: f64,
    pub rotation_degrees: i32,
    pub mirror: bool,
}

/// Build the preview transform
///
/// The steps run in a fixed order, each post-multiplied onto the matrix:
/// center the buffer on the surface, scale to fill, rotate, mirror.
/// Returns `None` for an empty buffer or surface.
pub fn configure_transform(
    buffer: Resolution,
    surface: Resolution,
    rotation_degrees: i32,
    mirror: bool,
) -> Option<PreviewTransform> {
    if buffer.is_empty() || surface.is_empty() {
        return None;
    }

    let surface_rect = Rect::from_size(surface.width as f64, surface.height as f64);
    let mut buffer_rect = Rect::from_size(buffer.width as f64, buffer.height as f64);
    let (center_x, center_y) = surface_rect.center();

    // Center buffer
    let (buffer_x, buffer_y) = buffer_rect.center();
    buffer_rect.offset(center_x - buffer_x, center_y - buffer_y);
    let mut matrix = Matrix::rect_to_rect(&surface_rect, &buffer_rect)?;

    // Scale to fill
    let fill_scale = f64::max(
        surface.height as f64 / buffer.height as f64,
        surface.width as f64 / buffer.width as f64,
    );
    matrix.post_scale(fill_scale, fill_scale, center_x, center_y);

    matrix.post_rotate(rotation_degrees as f64, center_x, center_y);

    if mirror {
        matrix.post_scale(-1.0, 1.0, center_x, center_y);
    }

    Some(PreviewTransform {
        matrix,
        fill_scale,
        rotation_degrees,
        mirror,
    })
}
