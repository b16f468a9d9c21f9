use clap::Parser;
use std::error::Error;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wristband::{
    available_ports, fit, DeviceMode, PortConfig, SampleCloud, TelemetryEvent, WristbandReader,
    DEFAULT_BAUD_RATE,
};

/// Stream telemetry from the wristband IMU or calibrate it
#[derive(Parser, Debug)]
#[command(name = "read_wristband")]
#[command(version)]
struct Args {
    /// List serial ports and exit
    #[arg(long)]
    list: bool,

    /// Serial port the wristband is attached to
    #[arg(short, long, default_value = "/dev/ttyACM0")]
    port: String,

    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// How long to wait for `ready` after a command (0 waits forever)
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    /// `compass` prints orientation and force, `calibration` fits new corrections
    #[arg(short, long, default_value = "compass", value_parser = parse_streaming_mode)]
    mode: DeviceMode,

    /// Raw samples to capture per sensor in calibration mode
    #[arg(short, long, default_value = "2000")]
    samples: usize,

    /// Print the fitted matrices without writing them to the device
    #[arg(long)]
    dry_run: bool,
}

const EVENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Accepts only the modes in which the device streams telemetry.
fn parse_streaming_mode(s: &str) -> Result<DeviceMode, String> {
    let mode: DeviceMode = s.parse().map_err(|_| format!("Unknown mode `{}`", s))?;
    if !mode.is_streaming() {
        return Err(format!("Mode `{}` does not stream anything", mode));
    }
    Ok(mode)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    if args.list {
        for port in available_ports()? {
            println!("{:<24} {}", port.name, port.description);
        }
        return Ok(());
    }

    let timeout = match args.timeout_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };
    let config = PortConfig::new(args.port)
        .with_baud_rate(args.baud)
        .with_response_timeout(timeout);

    let reader = WristbandReader::new(config)?;
    info!("Connected to wristband {}", reader.device_id());

    match args.mode {
        DeviceMode::Calibration => calibrate(&reader, args.samples, args.dry_run),
        _ => stream_compass(&reader),
    }
}

/// Waits for the next event, surfacing the worker's error if it stopped.
fn next_event(
    reader: &WristbandReader,
    events: &Receiver<TelemetryEvent>,
) -> Result<Option<TelemetryEvent>, Box<dyn Error>> {
    match events.recv_timeout(EVENT_TIMEOUT) {
        Ok(event) => Ok(Some(event)),
        Err(RecvTimeoutError::Timeout) => {
            if let Some(e) = reader.take_error() {
                return Err(e.into());
            }
            if reader.mode()? == DeviceMode::Disconnected {
                return Err("Wristband disconnected".into());
            }
            warn!("No telemetry for {:?}", EVENT_TIMEOUT);
            Ok(None)
        }
        Err(RecvTimeoutError::Disconnected) => Err("Telemetry stream closed".into()),
    }
}

fn stream_compass(reader: &WristbandReader) -> Result<(), Box<dyn Error>> {
    let events = reader.subscribe()?;
    reader.request_mode(DeviceMode::Compass)?;

    loop {
        match next_event(reader, &events)? {
            Some(TelemetryEvent::Orientation(q)) => println!(
                "quaternion: x: {: >10.4} y: {: >10.4} z: {: >10.4} w: {: >10.4}",
                q.x, q.y, q.z, q.w
            ),
            Some(TelemetryEvent::Force(force)) => println!("force: {}", force),
            _ => {}
        }
    }
}

fn calibrate(reader: &WristbandReader, samples: usize, dry_run: bool) -> Result<(), Box<dyn Error>> {
    let mut acc = SampleCloud::with_limit(samples);
    let mut mag = SampleCloud::with_limit(samples);

    let events = reader.subscribe()?;
    reader.request_mode(DeviceMode::Calibration)?;
    info!("Rotate the wristband slowly through every orientation");

    while !(acc.is_full() && mag.is_full()) {
        if let Some(TelemetryEvent::RawSensors(raw)) = next_event(reader, &events)? {
            mag.push(raw.magnetometer);
            if acc.push(raw.accelerometer) && acc.len() % 500 == 0 {
                info!("Captured {}/{} samples", acc.len(), samples);
            }
        }
    }

    reader.request_mode(DeviceMode::Waiting)?;

    let (acc_matrix, mag_matrix) = if dry_run {
        (fit(acc.points()), fit(mag.points()))
    } else {
        reader.request_calibration(acc.points(), mag.points())?
    };
    println!("Accelerometer correction:\n{}", acc_matrix);
    println!("Magnetometer correction:\n{}", mag_matrix);

    reader.close()?;
    if let Some(e) = reader.take_error() {
        return Err(e.into());
    }
    if !dry_run {
        info!("Calibration written to {}", reader.device_id());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_modes_are_rejected_before_connecting() {
        for mode in ["waiting", "disconnected"] {
            assert!(Args::try_parse_from(["read_wristband", "--mode", mode]).is_err());
        }
        assert!(Args::try_parse_from(["read_wristband", "--mode", "sleep"]).is_err());
    }

    #[test]
    fn test_streaming_modes_parse() {
        let args = Args::try_parse_from(["read_wristband", "-m", "Calibration"]).unwrap();
        assert_eq!(args.mode, DeviceMode::Calibration);
        assert_eq!(Args::try_parse_from(["read_wristband"]).unwrap().mode, DeviceMode::Compass);
    }
}
