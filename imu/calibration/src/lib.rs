//! Calibration of the wristband's raw accelerometer and magnetometer.
//!
//! Raw samples gathered while the device streams in calibration mode are
//! collected into a [`SampleCloud`]; fitting the cloud yields the
//! [`CalibrationMatrix`] that maps the measured ellipsoid onto the unit sphere.

mod cloud;
mod ellipsoid;

pub use cloud::SampleCloud;
pub use ellipsoid::{fit, fit_aligned_ellipsoid, AlignedEllipsoid, MIN_POINTS};
pub use imu_traits::{CalibrationMatrix, Vector3};
