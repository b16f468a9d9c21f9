use imu_traits::{CalibrationMatrix, Vector3};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Vector3 as Vec3};

/// Number of unknowns in the axis-aligned model, and so the fewest samples
/// that can determine it.
pub const MIN_POINTS: usize = 6;

// Singular values below this are treated as zero by the least-squares solve.
const SVD_EPSILON: f64 = 1e-12;

// Iteration cap for the SVD; a cloud that needs more is treated as degenerate.
const SVD_MAX_ITERATIONS: usize = 1_000;

/// Axis-aligned ellipsoid recovered from a point cloud.
///
/// Either field may hold NaN when the cloud does not describe an ellipsoid
/// (a saddle or a flat cloud, for instance).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedEllipsoid {
    pub center: Vec3<f64>,
    pub radii: Vec3<f64>,
}

impl AlignedEllipsoid {
    fn undefined() -> Self {
        AlignedEllipsoid {
            center: Vec3::repeat(f64::NAN),
            radii: Vec3::repeat(f64::NAN),
        }
    }

    /// Per-axis factor that brings each radius to 1.
    pub fn scale(&self) -> Vec3<f64> {
        self.radii.map(|r| 1.0 / r)
    }

    /// Correction that maps this ellipsoid onto the unit sphere at the origin.
    pub fn correction(&self) -> CalibrationMatrix {
        let scale = self.scale();
        let offset = -self.center.component_mul(&scale);
        CalibrationMatrix::from_rows([
            [scale.x as f32, 0.0, 0.0, offset.x as f32],
            [0.0, scale.y as f32, 0.0, offset.y as f32],
            [0.0, 0.0, scale.z as f32, offset.z as f32],
        ])
    }
}

/// Fits `A x² + B y² + C z² + 2G x + 2H y + 2I z = 1` to `points`.
///
/// Returns `None` when there are fewer than [`MIN_POINTS`] samples. A cloud
/// holding a NaN or infinite sample fits to an all-NaN ellipsoid.
pub fn fit_aligned_ellipsoid(points: &[Vector3]) -> Option<AlignedEllipsoid> {
    if points.len() < MIN_POINTS {
        return None;
    }
    if let Some(bad) = points
        .iter()
        .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
    {
        warn!("Calibration sample {} is not finite: {}", bad, points[bad]);
        return Some(AlignedEllipsoid::undefined());
    }

    let design = DMatrix::from_fn(points.len(), 6, |row, col| {
        let p = &points[row];
        let (x, y, z) = (p.x as f64, p.y as f64, p.z as f64);
        match col {
            0 => x * x,
            1 => y * y,
            2 => z * z,
            3 => 2.0 * x,
            4 => 2.0 * y,
            _ => 2.0 * z,
        }
    });
    let ones = DVector::from_element(points.len(), 1.0);

    // Minimum-norm least squares; rank-deficient clouds still get a solution.
    let params = match design.try_svd(true, true, f64::EPSILON, SVD_MAX_ITERATIONS) {
        Some(svd) => svd
            .solve(&ones, SVD_EPSILON)
            .unwrap_or_else(|_| DVector::from_element(6, f64::NAN)),
        None => {
            warn!("SVD did not converge over {} points", points.len());
            return Some(AlignedEllipsoid::undefined());
        }
    };

    let quadratic = Vec3::new(params[0], params[1], params[2]);
    let linear = Vec3::new(params[3], params[4], params[5]);

    let center = -linear.component_div(&quadratic);
    let gamma = 1.0 + linear.component_mul(&linear).component_div(&quadratic).sum();
    let radii = quadratic.map(|q| (gamma / q).sqrt());

    debug!(
        "Fitted ellipsoid over {} points: center {:?}, radii {:?}",
        points.len(),
        center.as_slice(),
        radii.as_slice()
    );

    Some(AlignedEllipsoid { center, radii })
}

/// Computes the correction matrix for a raw sensor cloud.
///
/// Under-determined clouds yield the identity; degenerate ones yield NaN
/// coefficients that the caller must check before using the matrix.
pub fn fit(points: &[Vector3]) -> CalibrationMatrix {
    match fit_aligned_ellipsoid(points) {
        Some(ellipsoid) => ellipsoid.correction(),
        None => {
            warn!(
                "Only {} calibration points (need {}), keeping identity",
                points.len(),
                MIN_POINTS
            );
            CalibrationMatrix::identity()
        }
    }
}
