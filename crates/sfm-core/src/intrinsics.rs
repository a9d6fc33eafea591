use nalgebra::{Matrix3, RealField, Vector2};
use serde::{Deserialize, Serialize};

use crate::{Mat3, Pt2, Pt3, Real, Vec3};

/// Standard pinhole intrinsics with optional skew.
///
/// The corresponding calibration matrix `K` has the form:
///
/// ```text
/// [ fx  skew  cx ]
/// [  0   fy   cy ]
/// [  0    0    1 ]
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FxFyCxCySkew<S: RealField + Copy> {
    /// Focal length in pixels along X.
    pub fx: S,
    /// Focal length in pixels along Y.
    pub fy: S,
    /// Principal point X coordinate in pixels.
    pub cx: S,
    /// Principal point Y coordinate in pixels.
    pub cy: S,
    /// Skew term (typically 0).
    pub skew: S,
}

impl<S: RealField + Copy> FxFyCxCySkew<S> {
    /// Return the 3x3 camera intrinsics matrix K.
    pub fn k_matrix(&self) -> Matrix3<S> {
        Matrix3::new(
            self.fx,
            self.skew,
            self.cx,
            S::zero(),
            self.fy,
            self.cy,
            S::zero(),
            S::zero(),
            S::one(),
        )
    }

    /// Convert normalized image-plane coordinates into pixel coordinates.
    pub fn normalized_to_pixel(&self, n: &Vector2<S>) -> Vector2<S> {
        let u = self.fx * n.x + self.skew * n.y + self.cx;
        let v = self.fy * n.y + self.cy;
        Vector2::new(u, v)
    }

    /// Convert pixel coordinates into normalized image-plane coordinates.
    pub fn pixel_to_normalized(&self, px: &Vector2<S>) -> Vector2<S> {
        let ny = (px.y - self.cy) / self.fy;
        let nx = (px.x - self.cx - self.skew * ny) / self.fx;
        Vector2::new(nx, ny)
    }
}

impl FxFyCxCySkew<Real> {
    /// Attempt to construct intrinsics from a 3×3 calibration matrix `K`.
    ///
    /// The matrix is first normalised so that `K[2, 2] == 1` and then checked
    /// against the upper-triangular form above. Returns `None` if the
    /// structure does not match within a small tolerance or a focal length is
    /// not positive.
    pub fn try_from_k_matrix(k: &Mat3) -> Option<Self> {
        let eps = 1e-9;
        let k33 = k[(2, 2)];
        if k33.abs() < eps {
            return None;
        }
        let k_norm = k / k33;

        if k_norm[(1, 0)].abs() > eps || k_norm[(2, 0)].abs() > eps || k_norm[(2, 1)].abs() > eps
        {
            return None;
        }

        let out = Self {
            fx: k_norm[(0, 0)],
            skew: k_norm[(0, 1)],
            cx: k_norm[(0, 2)],
            fy: k_norm[(1, 1)],
            cy: k_norm[(1, 2)],
        };
        (out.fx > 0.0 && out.fy > 0.0).then_some(out)
    }

    /// Mean focal length, used to express normalized residuals in pixels.
    pub fn mean_focal(&self) -> Real {
        0.5 * (self.fx + self.fy)
    }

    /// Project a camera-frame point into pixels.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, p_c: &Pt3) -> Option<Pt2> {
        if p_c.z <= 0.0 {
            return None;
        }
        let n = Vector2::new(p_c.x / p_c.z, p_c.y / p_c.z);
        Some(Pt2::from(self.normalized_to_pixel(&n)))
    }

    /// Back-project a pixel onto the normalized image plane (`z = 1`).
    pub fn unproject(&self, px: &Pt2) -> Vec3 {
        let n = self.pixel_to_normalized(&px.coords);
        Vec3::new(n.x, n.y, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k() -> FxFyCxCySkew<Real> {
        FxFyCxCySkew {
            fx: 800.0,
            fy: 780.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.5,
        }
    }

    #[test]
    fn pixel_normalized_roundtrip() {
        let k = k();
        let px = Vector2::new(100.0, 250.0);
        let back = k.normalized_to_pixel(&k.pixel_to_normalized(&px));
        assert!((back - px).norm() < 1e-10);
    }

    #[test]
    fn k_matrix_roundtrip() {
        let k = k();
        let scaled = k.k_matrix() * 2.0;
        let back = FxFyCxCySkew::try_from_k_matrix(&scaled).unwrap();
        assert_eq!(back, k);
    }

    #[test]
    fn rejects_non_triangular_matrix() {
        let mut m = k().k_matrix();
        m[(2, 0)] = 0.3;
        assert!(FxFyCxCySkew::try_from_k_matrix(&m).is_none());
    }

    #[test]
    fn project_rejects_points_behind_camera() {
        let k = k();
        assert!(k.project(&Pt3::new(0.0, 0.0, -1.0)).is_none());
        let px = k.project(&Pt3::new(0.0, 0.0, 2.0)).unwrap();
        assert!((px.x - 640.0).abs() < 1e-12 && (px.y - 360.0).abs() < 1e-12);
    }
}
