use crate::config::PortConfig;
use crate::dispatcher::TelemetryDispatcher;
use crate::session::DeviceSession;
use imu_calibration::fit;
use imu_traits::{
    CalibrationMatrix, DeviceMode, ImuData, ImuError, ImuReader, TelemetryEvent, Vector3,
};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

// How long the worker sleeps on the command channel while nothing streams.
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum ReaderCommand {
    SetMode(DeviceMode),
    WriteCalibration {
        acc: CalibrationMatrix,
        mag: CalibrationMatrix,
    },
    Stop,
}

/// Requests the worker has seen but not applied yet.
///
/// Repeated requests of the same kind collapse to the most recent one.
#[derive(Debug, Default, PartialEq)]
struct Pending {
    mode: Option<DeviceMode>,
    calibration: Option<(CalibrationMatrix, CalibrationMatrix)>,
    stop: bool,
}

enum Action {
    WriteCalibration(CalibrationMatrix, CalibrationMatrix),
    SetMode(DeviceMode),
}

impl Pending {
    fn absorb(&mut self, command: ReaderCommand) {
        match command {
            ReaderCommand::SetMode(DeviceMode::Disconnected) | ReaderCommand::Stop => {
                self.stop = true
            }
            ReaderCommand::SetMode(mode) => self.mode = Some(mode),
            ReaderCommand::WriteCalibration { acc, mag } => self.calibration = Some((acc, mag)),
        }
    }

    fn drain(&mut self, command_rx: &mpsc::Receiver<ReaderCommand>) {
        loop {
            match command_rx.try_recv() {
                Ok(command) => self.absorb(command),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.stop = true;
                    break;
                }
            }
        }
    }

    /// Takes the next action to apply. Calibration writes go before mode changes.
    fn next_action(&mut self) -> Option<Action> {
        if let Some((acc, mag)) = self.calibration.take() {
            return Some(Action::WriteCalibration(acc, mag));
        }
        self.mode.take().map(Action::SetMode)
    }
}

/// Background reader for the wristband.
///
/// A single worker thread owns the [`DeviceSession`]: it applies requested
/// mode changes and calibration writes, and while the device streams it feeds
/// every line through the [`TelemetryDispatcher`].
pub struct WristbandReader {
    command_tx: mpsc::Sender<ReaderCommand>,
    dispatcher: TelemetryDispatcher,
    mode: Arc<RwLock<DeviceMode>>,
    fault: Arc<Mutex<Option<ImuError>>>,
    device_id: String,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WristbandReader {
    /// Opens the port described by `config` and starts the worker.
    ///
    /// Blocks until the handshake finished, so [`device_id`](Self::device_id)
    /// is available as soon as this returns.
    pub fn new(config: PortConfig) -> Result<Self, ImuError> {
        Self::spawn(move || DeviceSession::open(&config))
    }

    /// Starts the worker on a session produced by `open`, which runs on the
    /// worker thread.
    pub fn spawn<F>(open: F) -> Result<Self, ImuError>
    where
        F: FnOnce() -> Result<DeviceSession, ImuError> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel();
        let dispatcher = TelemetryDispatcher::new();
        let mode = Arc::new(RwLock::new(DeviceMode::Disconnected));
        let fault = Arc::new(Mutex::new(None));

        let (init_tx, init_rx) = mpsc::channel();
        let worker = {
            let dispatcher = dispatcher.clone();
            let mode = Arc::clone(&mode);
            let fault = Arc::clone(&fault);

            thread::spawn(move || {
                let mut session = match open() {
                    Ok(session) => session,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                if let Ok(mut guard) = mode.write() {
                    *guard = session.mode();
                }
                let _ = init_tx.send(Ok(session.uid().to_string()));

                if let Err(e) = run(&mut session, &command_rx, &dispatcher, &mode) {
                    error!("Wristband worker stopped: {}", e);
                    if let Ok(mut slot) = fault.lock() {
                        *slot = Some(e);
                    }
                }
                if let Err(e) = session.close() {
                    warn!("Failed to close session cleanly: {}", e);
                }
                if let Ok(mut guard) = mode.write() {
                    *guard = DeviceMode::Disconnected;
                }
            })
        };

        // Wait for the handshake before returning
        let device_id = init_rx.recv().map_err(|_| {
            ImuError::ReadError("Failed to receive initialization result".to_string())
        })??;

        Ok(WristbandReader {
            command_tx,
            dispatcher,
            mode,
            fault,
            device_id,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The mode the worker last applied.
    pub fn mode(&self) -> Result<DeviceMode, ImuError> {
        Ok(*self.mode.read()?)
    }

    pub fn subscribe(&self) -> Result<mpsc::Receiver<TelemetryEvent>, ImuError> {
        self.dispatcher.subscribe()
    }

    pub fn request_mode(&self, mode: DeviceMode) -> Result<(), ImuError> {
        self.command_tx.send(ReaderCommand::SetMode(mode))?;
        Ok(())
    }

    /// Fits both sample clouds and queues the resulting matrices for writing.
    ///
    /// A fit that is not finite is returned as [`ImuError::DegenerateFit`] and
    /// never reaches the device.
    pub fn request_calibration(
        &self,
        acc_points: &[Vector3],
        mag_points: &[Vector3],
    ) -> Result<(CalibrationMatrix, CalibrationMatrix), ImuError> {
        let acc = fit(acc_points);
        let mag = fit(mag_points);
        for (name, matrix) in [("accelerometer", &acc), ("magnetometer", &mag)] {
            if !matrix.is_finite() {
                return Err(ImuError::DegenerateFit(format!(
                    "{} samples do not lie on an ellipsoid",
                    name
                )));
            }
        }

        self.command_tx
            .send(ReaderCommand::WriteCalibration { acc, mag })?;
        Ok((acc, mag))
    }

    /// The error that stopped the worker, if any. Cleared by reading it.
    pub fn take_error(&self) -> Option<ImuError> {
        self.fault.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Stops the worker and waits for it to release the port.
    pub fn close(&self) -> Result<(), ImuError> {
        // The worker may already be gone.
        let _ = self.command_tx.send(ReaderCommand::Stop);
        if let Some(worker) = self.worker.lock()?.take() {
            worker
                .join()
                .map_err(|_| ImuError::LockError("Wristband worker panicked".to_string()))?;
        }
        Ok(())
    }
}

fn run(
    session: &mut DeviceSession,
    command_rx: &mpsc::Receiver<ReaderCommand>,
    dispatcher: &TelemetryDispatcher,
    mode: &RwLock<DeviceMode>,
) -> Result<(), ImuError> {
    let mut pending = Pending::default();
    loop {
        pending.drain(command_rx);
        if pending.stop {
            // A queued calibration still reaches the device.
            if let Some((acc, mag)) = pending.calibration.take() {
                session.write_calibration(&acc, &mag)?;
            }
            info!("Stopping wristband worker");
            return Ok(());
        }

        match pending.next_action() {
            Some(Action::WriteCalibration(acc, mag)) => session.write_calibration(&acc, &mag)?,
            Some(Action::SetMode(next)) => {
                session.set_mode(next)?;
            }
            None => {}
        }
        *mode.write()? = session.mode();

        if session.mode().is_streaming() {
            let lines = session.poll_lines()?;
            dispatcher.dispatch_all(lines)?;
        } else {
            match command_rx.recv_timeout(IDLE_WAIT) {
                Ok(command) => pending.absorb(command),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => pending.stop = true,
            }
        }
    }
}

impl ImuReader for WristbandReader {
    fn get_data(&self) -> Result<ImuData, ImuError> {
        self.dispatcher.latest()
    }

    fn stop(&self) -> Result<(), ImuError> {
        self.command_tx.send(ReaderCommand::Stop)?;
        Ok(())
    }
}

impl Drop for WristbandReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
