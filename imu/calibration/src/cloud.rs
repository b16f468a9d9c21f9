use crate::ellipsoid;
use imu_traits::{CalibrationMatrix, Vector3};

/// Raw samples of one sensor captured during a calibration session.
///
/// Once `limit` samples are held, further pushes are dropped.
#[derive(Debug, Clone)]
pub struct SampleCloud {
    points: Vec<Vector3>,
    limit: usize,
}

impl SampleCloud {
    pub const DEFAULT_LIMIT: usize = 100_000;

    pub fn new() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        SampleCloud {
            points: Vec::new(),
            limit,
        }
    }

    /// Adds a sample. Returns `false` if the cloud is full or the sample is not finite.
    pub fn push(&mut self, point: Vector3) -> bool {
        let finite = point.x.is_finite() && point.y.is_finite() && point.z.is_finite();
        if !finite || self.is_full() {
            return false;
        }
        self.points.push(point);
        true
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.points.len() >= self.limit
    }

    pub fn points(&self) -> &[Vector3] {
        &self.points
    }

    /// Fits the correction for the samples gathered so far.
    pub fn fit(&self) -> CalibrationMatrix {
        ellipsoid::fit(&self.points)
    }
}

impl Default for SampleCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl Extend<Vector3> for SampleCloud {
    fn extend<I: IntoIterator<Item = Vector3>>(&mut self, iter: I) {
        for point in iter {
            if !self.push(point) && self.is_full() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_drops_extra_samples() {
        let mut cloud = SampleCloud::with_limit(2);
        assert!(cloud.push(Vector3::new(1.0, 0.0, 0.0)));
        assert!(cloud.push(Vector3::new(0.0, 1.0, 0.0)));
        assert!(!cloud.push(Vector3::new(0.0, 0.0, 1.0)));
        assert_eq!(cloud.len(), 2);
        assert!(cloud.is_full());
    }

    #[test]
    fn test_non_finite_samples_are_skipped() {
        let mut cloud = SampleCloud::new();
        assert!(!cloud.push(Vector3::new(f32::NAN, 0.0, 0.0)));
        cloud.extend([Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.0, f32::INFINITY, 0.0)]);
        assert_eq!(cloud.points(), &[Vector3::new(1.0, 2.0, 3.0)]);
    }

    #[test]
    fn test_small_cloud_fits_identity_and_clears() {
        let mut cloud = SampleCloud::new();
        cloud.extend((0..5).map(|i| Vector3::new(i as f32, 1.0, 0.0)));
        assert_eq!(cloud.fit(), CalibrationMatrix::identity());

        cloud.clear();
        assert!(cloud.is_empty());
    }
}
