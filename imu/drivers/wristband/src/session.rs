use crate::codec;
use crate::config::PortConfig;
use crate::port::{LinePort, Transport};
use imu_traits::{CalibrationMatrix, DeviceMode, ImuError, Sensor};
use std::fmt::Write as _;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const COMMAND_RESET: &str = "reset";
const COMMAND_READ_UID: &str = "read uid";
const COMMAND_START_ORI: &str = "start ori";
const COMMAND_START_CAL: &str = "start cal";
const COMMAND_STOP: &str = "stop";

const READY: &str = "ready";

/// Every calibration command goes out this many times to survive line noise.
pub const CALIBRATION_REPEATS: usize = 3;

// Breathing room for the firmware after each completed exchange.
const COMMAND_GAP: Duration = Duration::from_millis(10);

/// An open conversation with the wristband firmware.
///
/// The session is the only reader and writer of its port. Every command is a
/// half-duplex exchange: one line out, response lines back until `ready`.
pub struct DeviceSession {
    port: Option<LinePort>,
    mode: DeviceMode,
    uid: String,
    response_timeout: Option<Duration>,
}

impl DeviceSession {
    /// Opens the serial port and performs the reset / uid handshake.
    pub fn open(config: &PortConfig) -> Result<Self, ImuError> {
        let port = LinePort::open(config)?;
        Self::start(port, config)
    }

    /// Runs the handshake over an already open transport.
    pub fn handshake(transport: Box<dyn Transport>, config: &PortConfig) -> Result<Self, ImuError> {
        Self::start(LinePort::new(transport), config)
    }

    fn start(mut port: LinePort, config: &PortConfig) -> Result<Self, ImuError> {
        thread::sleep(config.settle_delay);
        port.discard_input()?;

        let mut session = DeviceSession {
            port: Some(port),
            mode: DeviceMode::Disconnected,
            uid: String::new(),
            response_timeout: config.response_timeout,
        };

        session.reset()?;
        session.uid = session.read_uid()?;
        info!("Wristband unique id: {}", session.uid);

        // Leave the device idle, whatever the reset left running.
        session.set_mode(DeviceMode::Waiting)?;
        Ok(session)
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Sends one command and collects its response.
    ///
    /// Returns every non-blank line received before `ready`, trimmed,
    /// lower-cased and in order. Fails with [`ImuError::DeviceUnresponsive`] if `ready` does not
    /// arrive within the response timeout.
    pub fn send_command(&mut self, command: &str) -> Result<Vec<String>, ImuError> {
        let timeout = self.response_timeout;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ImuError::WriteError("Session is closed".to_string()))?;

        let command = command.trim();
        debug!("Sending: {}", command);
        port.write_line(command)?;

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut response = Vec::new();
        loop {
            if let Some(line) = port.read_line()? {
                let line = line.trim().to_lowercase();
                if line == READY {
                    debug!("Ready after `{}`", command);
                    break;
                }
                if !line.is_empty() {
                    debug!("Received: {}", line);
                    response.push(line);
                }
            }

            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    warn!("No `ready` after `{}` within {:?}", command, timeout);
                    return Err(ImuError::DeviceUnresponsive {
                        command: command.to_string(),
                        timeout,
                    });
                }
            }
        }

        thread::sleep(COMMAND_GAP);
        Ok(response)
    }

    pub fn reset(&mut self) -> Result<(), ImuError> {
        self.send_command(COMMAND_RESET)?;
        Ok(())
    }

    pub fn read_uid(&mut self) -> Result<String, ImuError> {
        let response = self.send_command(COMMAND_READ_UID)?;
        response
            .iter()
            .filter_map(|line| codec::tokenize(line))
            .find(|(keyword, _)| keyword == "uid")
            .and_then(|(_, fields)| fields.first().map(|uid| uid.to_string()))
            .ok_or_else(|| {
                ImuError::InvalidResponse(format!("No uid in response to `{}`", COMMAND_READ_UID))
            })
    }

    /// Switches the streaming mode. Returns `false` if the device was already in `mode`.
    ///
    /// `Disconnected` closes the session.
    pub fn set_mode(&mut self, mode: DeviceMode) -> Result<bool, ImuError> {
        if mode == self.mode {
            return Ok(false);
        }
        let command = match mode {
            DeviceMode::Disconnected => {
                self.close()?;
                return Ok(true);
            }
            DeviceMode::Waiting => COMMAND_STOP,
            DeviceMode::Compass => COMMAND_START_ORI,
            DeviceMode::Calibration => COMMAND_START_CAL,
        };
        if !self.is_open() {
            return Err(ImuError::WriteError("Session is closed".to_string()));
        }

        info!("Switching from {} to {} mode", self.mode, mode);
        self.mode = mode;
        self.send_command(command)?;
        Ok(true)
    }

    /// Reads the correction matrix currently stored on the device.
    pub fn read_calibration(&mut self, sensor: Sensor) -> Result<CalibrationMatrix, ImuError> {
        let keyword: &'static str = sensor.into();
        let response = self.send_command(&format!("read {}", keyword))?;

        let values: Vec<f32> = response
            .iter()
            .map(|line| codec::decode(line))
            .filter(|line| line.keyword == keyword)
            .flat_map(|line| line.values)
            .collect();

        let coefficients: [f32; 12] = values.as_slice().try_into().map_err(|_| {
            ImuError::InvalidResponse(format!(
                "Expected 12 `{}` coefficients, got {}",
                keyword,
                values.len()
            ))
        })?;
        Ok(CalibrationMatrix::from_coefficients(coefficients))
    }

    /// Stores both correction matrices on the device, accelerometer first.
    pub fn write_calibration(
        &mut self,
        acc: &CalibrationMatrix,
        mag: &CalibrationMatrix,
    ) -> Result<(), ImuError> {
        for (sensor, matrix) in [(Sensor::Accelerometer, acc), (Sensor::Magnetometer, mag)] {
            let command = write_command(sensor, matrix);
            for _ in 0..CALIBRATION_REPEATS {
                self.send_command(&command)?;
            }
        }
        info!("Wrote accelerometer and magnetometer calibration");
        Ok(())
    }

    /// Waits up to one poll interval for telemetry lines.
    pub fn poll_lines(&mut self) -> Result<Vec<String>, ImuError> {
        match self.port.as_mut() {
            Some(port) => port.poll_lines(),
            None => Err(ImuError::ReadError("Session is closed".to_string())),
        }
    }

    /// Stops streaming and releases the port. Calling it again does nothing.
    pub fn close(&mut self) -> Result<(), ImuError> {
        if !self.is_open() {
            return Ok(());
        }
        self.mode = DeviceMode::Disconnected;
        let result = self.send_command(COMMAND_STOP).map(|_| ());
        self.port = None;
        info!("Closed serial port");
        result
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Formats `write acc|mag` with the 12 row-major coefficients.
pub fn write_command(sensor: Sensor, matrix: &CalibrationMatrix) -> String {
    let mut command = format!("write {}", sensor);
    for value in matrix.coefficients() {
        let _ = write!(command, " {:.6}", value);
    }
    command
}
