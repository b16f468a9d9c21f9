use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;
use std::sync::{mpsc, PoisonError};
use std::time::Duration;
use strum_macros::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

// --- Basic Types ---
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 { x, y, z }
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector3(x={}, y={}, z={})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl fmt::Display for Quaternion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quaternion(w={}, x={}, y={}, z={})", self.w, self.x, self.y, self.z)
    }
}

/// Load measured on the wrist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Force {
    pub flex_x: f32,
    pub flex_y: f32,
    pub compression: f32,
    pub torsion: f32,
}

impl fmt::Display for Force {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Flex: ({:+.4}, {:+.4}) | Compression: {:+.4} | Torsion: {:+.4}",
            self.flex_x, self.flex_y, self.compression, self.torsion
        )
    }
}

/// Uncalibrated sensor triplet as streamed in calibration mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSensors {
    /// Angular velocity (rad/s)
    pub gyroscope: Vector3,
    /// Acceleration in units of g₀
    pub accelerometer: Vector3,
    /// Magnetic field in units of 45 µT
    pub magnetometer: Vector3,
}

// --- Device State ---

/// Operating mode of the wristband link.
///
/// `Compass` and `Calibration` are streaming modes: the firmware pushes
/// telemetry lines without being polled.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeviceMode {
    #[default]
    Disconnected,
    Waiting,
    Compass,
    Calibration,
}

impl DeviceMode {
    pub fn is_streaming(&self) -> bool {
        matches!(self, DeviceMode::Compass | DeviceMode::Calibration)
    }
}

/// Sensors that carry an on-device correction matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum Sensor {
    #[strum(serialize = "acc")]
    Accelerometer,
    #[strum(serialize = "mag")]
    Magnetometer,
}

// --- Telemetry ---
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    Orientation(Quaternion),
    Force(Force),
    RawSensors(RawSensors),
    /// The six ADC channels, in millivolts.
    RawAnalog([f32; 6]),
}

/// Latest value of every telemetry stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuData {
    /// Orientation in the ENU frame
    pub quaternion: Option<Quaternion>,
    pub force: Option<Force>,
    /// Angular velocity (rad/s)
    pub gyroscope: Option<Vector3>,
    /// Acceleration (g₀)
    pub accelerometer: Option<Vector3>,
    /// Magnetic field (45 µT)
    pub magnetometer: Option<Vector3>,
    /// ADC channels (mV)
    pub analog: Option<[f32; 6]>,
}

impl ImuData {
    pub fn update(&mut self, event: &TelemetryEvent) {
        match *event {
            TelemetryEvent::Orientation(q) => self.quaternion = Some(q),
            TelemetryEvent::Force(force) => self.force = Some(force),
            TelemetryEvent::RawSensors(raw) => {
                self.gyroscope = Some(raw.gyroscope);
                self.accelerometer = Some(raw.accelerometer);
                self.magnetometer = Some(raw.magnetometer);
            }
            TelemetryEvent::RawAnalog(values) => self.analog = Some(values),
        }
    }
}

// --- Calibration ---

/// Affine 3x4 correction applied by the firmware to raw sensor readings.
///
/// The implicit bottom row is `[0, 0, 0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMatrix {
    rows: [[f32; 4]; 3],
}

impl CalibrationMatrix {
    pub const IDENTITY: CalibrationMatrix = CalibrationMatrix {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn from_rows(rows: [[f32; 4]; 3]) -> Self {
        CalibrationMatrix { rows }
    }

    /// Builds a matrix from 12 row-major coefficients.
    pub fn from_coefficients(coefficients: [f32; 12]) -> Self {
        let mut rows = [[0.0; 4]; 3];
        for (i, value) in coefficients.into_iter().enumerate() {
            rows[i / 4][i % 4] = value;
        }
        CalibrationMatrix { rows }
    }

    pub fn rows(&self) -> &[[f32; 4]; 3] {
        &self.rows
    }

    /// The 12 coefficients in row-major order, as sent on the wire.
    pub fn coefficients(&self) -> [f32; 12] {
        let mut out = [0.0; 12];
        for (i, value) in self.rows.iter().flatten().enumerate() {
            out[i] = *value;
        }
        out
    }

    pub fn is_finite(&self) -> bool {
        self.rows.iter().flatten().all(|v| v.is_finite())
    }

    /// Applies the correction to a raw reading.
    pub fn apply(&self, v: Vector3) -> Vector3 {
        let row = |r: &[f32; 4]| r[0] * v.x + r[1] * v.y + r[2] * v.z + r[3];
        Vector3 {
            x: row(&self.rows[0]),
            y: row(&self.rows[1]),
            z: row(&self.rows[2]),
        }
    }
}

impl Default for CalibrationMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Index<(usize, usize)> for CalibrationMatrix {
    type Output = f32;

    fn index(&self, (row, col): (usize, usize)) -> &f32 {
        &self.rows[row][col]
    }
}

impl fmt::Display for CalibrationMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            writeln!(
                f,
                "[{: >10.6} {: >10.6} {: >10.6} {: >10.6}]",
                row[0], row[1], row[2], row[3]
            )?;
        }
        Ok(())
    }
}

// --- Standard Error Type ---
#[derive(Debug, Error)]
pub enum ImuError {
    /// The serial port could not be opened
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),
    /// The firmware never answered `ready`
    #[error("Device unresponsive: no `ready` after `{command}` within {timeout:?}")]
    DeviceUnresponsive { command: String, timeout: Duration },
    #[error("Read error: {0}")]
    ReadError(String),
    #[error("Write error: {0}")]
    WriteError(String),
    /// A response did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// The ellipsoid fit produced a non-finite correction
    #[error("Degenerate fit: {0}")]
    DegenerateFit(String),
    #[error("Lock error: {0}")]
    LockError(String),
    /// The worker thread is gone or refused the command
    #[error("Command send error: {0}")]
    CommandSendError(String),
}

impl From<serialport::Error> for ImuError {
    fn from(error: serialport::Error) -> Self {
        ImuError::PortUnavailable(error.to_string())
    }
}

impl From<std::io::Error> for ImuError {
    fn from(error: std::io::Error) -> Self {
        ImuError::WriteError(error.to_string())
    }
}

impl<T> From<PoisonError<T>> for ImuError {
    fn from(error: PoisonError<T>) -> Self {
        ImuError::LockError(format!("Lock poisoned: {}", error))
    }
}

impl<T> From<mpsc::SendError<T>> for ImuError {
    fn from(error: mpsc::SendError<T>) -> Self {
        ImuError::CommandSendError(format!("Failed to send command: {}", error))
    }
}

pub trait ImuReader {
    /// Retrieves the latest available IMU data.
    fn get_data(&self) -> Result<ImuData, ImuError>;

    fn stop(&self) -> Result<(), ImuError>;
}
