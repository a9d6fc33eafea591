//! Numerical helpers shared by the solvers in this crate.
//!
//! - Hartley normalization of 2D point sets,
//! - real polynomial roots (used by P3P),
//! - reshaping SVD null vectors into matrices,
//! - cross-product matrices.

use nalgebra::{DMatrix, Schur, Vector2};
use sfm_core::{Mat3, Pt2, Real, Vec3};

/// Hartley normalization for 2D points.
///
/// Returns the conditioned points (centroid at the origin, mean distance
/// `√2`) and the similarity `T` mapping homogeneous inputs onto them.
/// `None` for an empty or fully coincident set.
pub fn normalize_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    let n = points.len() as Real;
    let centroid = points.iter().map(|p| p.coords).sum::<Vector2<Real>>() / n.max(1.0);
    let spread = points.iter().map(|p| (p.coords - centroid).norm()).sum::<Real>() / n;
    if !(spread > Real::EPSILON) {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / spread;
    let t = Mat3::new(s, 0.0, -s * centroid.x, 0.0, s, -s * centroid.y, 0.0, 0.0, 1.0);
    let conditioned = points
        .iter()
        .map(|p| Pt2::from(s * (p.coords - centroid)))
        .collect();
    Some((conditioned, t))
}

/// Real roots of the polynomial with coefficients `coeffs`, highest degree
/// first, in ascending order.
///
/// Leading coefficients below `1e-12` in magnitude are dropped. Roots come
/// from the eigenvalues of the companion matrix; eigenvalues with an
/// imaginary part above `1e-8` are discarded and the rest are polished with
/// one Newton step.
pub fn real_roots(coeffs: &[Real]) -> Vec<Real> {
    let first = coeffs.iter().position(|c| c.abs() >= 1e-12);
    let Some(first) = first else {
        return Vec::new();
    };
    let poly = &coeffs[first..];
    let degree = poly.len() - 1;
    match degree {
        0 => return Vec::new(),
        1 => return vec![-poly[1] / poly[0]],
        _ => {}
    }

    let companion = DMatrix::<Real>::from_fn(degree, degree, |r, c| {
        if r == 0 {
            -poly[c + 1] / poly[0]
        } else if r == c + 1 {
            1.0
        } else {
            0.0
        }
    });

    let eval = |x: Real| poly.iter().fold((0.0, 0.0), |(f, df), &a| (f * x + a, df * x + f));
    let mut roots: Vec<Real> = Schur::new(companion)
        .complex_eigenvalues()
        .iter()
        .filter(|z| z.im.abs() < 1e-8)
        .map(|z| {
            let (f, df) = eval(z.re);
            if df.abs() > Real::EPSILON {
                z.re - f / df
            } else {
                z.re
            }
        })
        .collect();
    roots.sort_by(|a, b| a.total_cmp(b));
    roots.dedup_by(|a, b| (*a - *b).abs() < 1e-8);
    roots
}

/// Reshape row `row_idx` of a `V^T` with 9 columns into a row-major 3×3 matrix.
///
/// Returns `None` if the shape does not match.
pub fn mat3_from_svd_row(v_t: &DMatrix<Real>, row_idx: usize) -> Option<Mat3> {
    if v_t.ncols() != 9 || row_idx >= v_t.nrows() {
        return None;
    }
    Some(Mat3::from_fn(|r, c| v_t[(row_idx, 3 * r + c)]))
}

/// Cross-product matrix `[v]×` such that `[v]× w = v × w`.
pub fn skew(v: &Vec3) -> Mat3 {
    Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Singular vector of the smallest singular value of `a` (`A x ≈ 0`).
///
/// Wide systems are zero-padded to square so that the full right null space
/// is available from the thin SVD.
pub(crate) fn null_vector(a: &DMatrix<Real>) -> Option<nalgebra::DVector<Real>> {
    let (rows, cols) = a.shape();
    let work = if rows < cols {
        let mut pad = DMatrix::<Real>::zeros(cols, cols);
        pad.view_mut((0, 0), (rows, cols)).copy_from(a);
        pad
    } else {
        a.clone()
    };
    let svd = work.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))?;
    Some(v_t.row(min_idx).transpose())
}
