pub use imu_traits::*;

pub mod calibration {
    pub use imu_calibration::*;
}

// --- Re-export the serial driver based on features ---

#[cfg(feature = "wristband")]
pub use wristband::{
    available_ports, DeviceSession, PortConfig, PortInfo, TelemetryDispatcher, WristbandReader,
};
