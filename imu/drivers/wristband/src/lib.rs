//! Driver for the wristband IMU.
//!
//! The firmware speaks a line-oriented text protocol over a serial port:
//! commands are answered by zero or more lines followed by `ready`, and in
//! compass or calibration mode the device streams telemetry lines
//! (`wxyz`, `force`, `raw_adc`, `raw_gam`) unprompted.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod port;
pub mod reader;
pub mod session;

#[cfg(test)]
mod testing;

pub use codec::{decode, tokenize, DecodedLine};
pub use config::{PortConfig, DEFAULT_BAUD_RATE};
pub use dispatcher::{route, TelemetryDispatcher, TelemetryKind};
pub use imu_calibration::{fit, SampleCloud};
pub use imu_traits::{
    CalibrationMatrix, DeviceMode, Force, ImuData, ImuError, ImuReader, Quaternion, RawSensors,
    Sensor, TelemetryEvent, Vector3,
};
pub use port::{available_ports, LinePort, PortInfo, Transport};
pub use reader::{ReaderCommand, WristbandReader};
pub use session::{DeviceSession, CALIBRATION_REPEATS};
