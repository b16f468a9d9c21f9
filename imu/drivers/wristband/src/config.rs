use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Baud rate the wristband firmware is built for.
pub const DEFAULT_BAUD_RATE: u32 = 460_800;

/// Serial link settings. Framing is always 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Serial port path, e.g. `/dev/ttyACM0`
    pub port: String,
    pub baud_rate: u32,
    /// Pause after opening the port before the first command
    pub settle_delay: Duration,
    /// Longest single wait for telemetry; also the port read timeout
    pub poll_interval: Duration,
    /// How long a command may wait for `ready`. `None` waits forever.
    pub response_timeout: Option<Duration>,
}

impl PortConfig {
    pub fn new(port: impl Into<String>) -> Self {
        PortConfig {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            settle_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            response_timeout: Some(Duration::from_secs(2)),
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }
}
