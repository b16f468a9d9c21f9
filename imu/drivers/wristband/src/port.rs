use crate::config::PortConfig;
use imu_traits::ImuError;
use serde::Serialize;
use serialport::{DataBits, FlowControl, Parity, SerialPortType, StopBits};
use std::io::{self, Read, Write};
use tracing::{debug, info, warn};

/// Byte stream the wristband protocol runs over: the serial port, or an
/// in-memory device in tests.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Transport for T {}

// Longest run of bytes kept while waiting for a line terminator.
const MAX_LINE_LEN: usize = 1024;

/// Line-oriented view of a [`Transport`].
///
/// Outgoing lines are terminated with CRLF; incoming bytes are buffered until
/// a `\n` completes a line.
pub struct LinePort {
    transport: Box<dyn Transport>,
    pending: Vec<u8>,
}

impl LinePort {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        LinePort {
            transport,
            pending: Vec::with_capacity(MAX_LINE_LEN),
        }
    }

    /// Opens the serial port with the framing the firmware expects (8N1, no flow control).
    ///
    /// Reads block for at most `config.poll_interval`.
    pub fn open(config: &PortConfig) -> Result<Self, ImuError> {
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.poll_interval)
            .open()
            .map_err(|e| ImuError::PortUnavailable(format!("{}: {}", config.port, e)))?;

        info!("Opened port: {} at {} baud", config.port, config.baud_rate);
        Ok(Self::new(Box::new(port)))
    }

    pub fn write_line(&mut self, line: &str) -> Result<(), ImuError> {
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.trim().as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.transport
            .write_all(&bytes)
            .map_err(|e| ImuError::WriteError(format!("Failed to write `{}`: {}", line.trim(), e)))?;
        self.transport.flush()?;
        Ok(())
    }

    /// Returns the next complete line, reading from the transport at most
    /// once if none is buffered. `None` means the read timed out.
    pub fn read_line(&mut self) -> Result<Option<String>, ImuError> {
        if let Some(line) = self.next_line() {
            return Ok(Some(line));
        }
        self.fill()?;
        Ok(self.next_line())
    }

    /// Waits at most one read for data, then returns every complete line buffered.
    pub fn poll_lines(&mut self) -> Result<Vec<String>, ImuError> {
        if !self.has_line() {
            self.fill()?;
        }
        Ok(std::iter::from_fn(|| self.next_line()).collect())
    }

    /// Drops whatever the device sent before we started talking to it.
    pub fn discard_input(&mut self) -> Result<(), ImuError> {
        for _ in 0..4 {
            if self.fill()? == 0 {
                break;
            }
        }
        if !self.pending.is_empty() {
            debug!("Discarded {} stale bytes", self.pending.len());
            self.pending.clear();
        }
        Ok(())
    }

    fn has_line(&self) -> bool {
        self.pending.contains(&b'\n')
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    fn fill(&mut self) -> Result<usize, ImuError> {
        let mut buffer = [0u8; 1024];
        let n = match self.transport.read(&mut buffer) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(e) => return Err(ImuError::ReadError(format!("Failed to read data: {}", e))),
        };
        self.pending.extend_from_slice(&buffer[..n]);

        if !self.has_line() && self.pending.len() > MAX_LINE_LEN {
            warn!(
                "Buffer overflow ({} bytes without a line end), discarding",
                self.pending.len()
            );
            self.pending.clear();
        }
        Ok(n)
    }
}

/// A serial port the wristband could be attached to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// Lists the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<PortInfo>, ImuError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => format!(
                    "{} - {}",
                    usb.product.unwrap_or_default(),
                    usb.manufacturer.unwrap_or_default()
                ),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: port.port_name,
                description,
            }
        })
        .collect())
}
