use crate::codec::{self, DecodedLine};
use imu_traits::{Force, ImuData, ImuError, Quaternion, RawSensors, TelemetryEvent, Vector3};
use std::str::FromStr;
use std::sync::{mpsc, Arc, Mutex, RwLock};
use strum_macros::EnumString;
use tracing::trace;

/// Telemetry line keywords the firmware streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TelemetryKind {
    Wxyz,
    Force,
    RawAdc,
    RawGam,
}

impl TelemetryKind {
    /// Number of values a well-formed line carries.
    pub fn field_count(&self) -> usize {
        match self {
            TelemetryKind::Wxyz | TelemetryKind::Force => 4,
            TelemetryKind::RawAdc => 6,
            TelemetryKind::RawGam => 9,
        }
    }
}

fn vector(v: &[f32]) -> Vector3 {
    Vector3::new(v[0], v[1], v[2])
}

/// Turns a decoded line into an event.
///
/// Unknown keywords and lines with the wrong number of values yield `None`.
pub fn route(line: &DecodedLine) -> Option<TelemetryEvent> {
    let kind = TelemetryKind::from_str(&line.keyword).ok()?;
    let v = line.values.as_slice();
    if v.len() != kind.field_count() {
        return None;
    }

    let event = match kind {
        // Despite the keyword the firmware sends x, y, z, w.
        TelemetryKind::Wxyz => TelemetryEvent::Orientation(Quaternion {
            x: v[0],
            y: v[1],
            z: v[2],
            w: v[3],
        }),
        TelemetryKind::Force => TelemetryEvent::Force(Force {
            flex_x: v[0],
            flex_y: v[1],
            compression: v[2],
            torsion: v[3],
        }),
        TelemetryKind::RawAdc => {
            let mut channels = [0.0; 6];
            channels.copy_from_slice(v);
            TelemetryEvent::RawAnalog(channels)
        }
        TelemetryKind::RawGam => TelemetryEvent::RawSensors(RawSensors {
            gyroscope: vector(&v[0..3]),
            accelerometer: vector(&v[3..6]),
            magnetometer: vector(&v[6..9]),
        }),
    };
    Some(event)
}

/// Fans decoded telemetry out to subscribers in read order and keeps the
/// latest value of every stream.
#[derive(Clone, Default)]
pub struct TelemetryDispatcher {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<TelemetryEvent>>>>,
    latest: Arc<RwLock<ImuData>>,
}

impl TelemetryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Result<mpsc::Receiver<TelemetryEvent>, ImuError> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock()?.push(tx);
        Ok(rx)
    }

    pub fn latest(&self) -> Result<ImuData, ImuError> {
        Ok(*self.latest.read()?)
    }

    /// Decodes and routes one line. Returns the event if the line carried one.
    pub fn dispatch(&self, line: &str) -> Result<Option<TelemetryEvent>, ImuError> {
        let Some(event) = route(&codec::decode(line)) else {
            if !line.trim().is_empty() {
                trace!("Dropped line: {}", line.trim());
            }
            return Ok(None);
        };

        self.latest.write()?.update(&event);

        // Subscribers that hung up are pruned here.
        self.subscribers
            .lock()?
            .retain(|subscriber| subscriber.send(event).is_ok());
        Ok(Some(event))
    }

    /// Routes a batch of lines, returning how many produced an event.
    pub fn dispatch_all<I, S>(&self, lines: I) -> Result<usize, ImuError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut routed = 0;
        for line in lines {
            if self.dispatch(line.as_ref())?.is_some() {
                routed += 1;
            }
        }
        Ok(routed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_order() {
        let event = route(&codec::decode("wxyz 0.0 0.0 0.0 1.0"));
        assert_eq!(
            event,
            Some(TelemetryEvent::Orientation(Quaternion {
                w: 1.0,
                x: 0.0,
                y: 0.0,
                z: 0.0
            }))
        );

        match route(&codec::decode("wxyz 0.1 0.2 0.3 0.9")) {
            Some(TelemetryEvent::Orientation(q)) => {
                assert_eq!((q.x, q.y, q.z, q.w), (0.1, 0.2, 0.3, 0.9));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_raw_gam_split() {
        let event = route(&codec::decode("raw_gam 1 2 3 4 5 6 7 8 9"));
        assert_eq!(
            event,
            Some(TelemetryEvent::RawSensors(RawSensors {
                gyroscope: Vector3::new(1.0, 2.0, 3.0),
                accelerometer: Vector3::new(4.0, 5.0, 6.0),
                magnetometer: Vector3::new(7.0, 8.0, 9.0),
            }))
        );
    }

    #[test]
    fn test_force_and_analog() {
        assert_eq!(
            route(&codec::decode("FORCE 0.5 -0.5 2 3")),
            Some(TelemetryEvent::Force(Force {
                flex_x: 0.5,
                flex_y: -0.5,
                compression: 2.0,
                torsion: 3.0,
            }))
        );
        assert_eq!(
            route(&codec::decode("raw_adc 100 200 300 400 500 600")),
            Some(TelemetryEvent::RawAnalog([
                100.0, 200.0, 300.0, 400.0, 500.0, 600.0
            ]))
        );
    }

    #[test]
    fn test_unknown_and_short_lines_are_dropped() {
        for line in [
            "unknown 1 2",
            "wxyz 0 0 1",
            "raw_gam 1 2 3 4 5 6 7 8",
            "force 1 2 3 4 5",
            "ready",
            "",
            "# wxyz 0 0 0 1",
        ] {
            assert_eq!(route(&codec::decode(line)), None, "{:?}", line);
        }
    }

    #[test]
    fn test_nan_fields_still_route() {
        match route(&codec::decode("force 1 x 3 4")) {
            Some(TelemetryEvent::Force(force)) => assert!(force.flex_y.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_preserves_order() {
        let dispatcher = TelemetryDispatcher::new();
        let first = dispatcher.subscribe().unwrap();
        let second = dispatcher.subscribe().unwrap();

        let routed = dispatcher
            .dispatch_all(["force 1 2 3 4", "noise", "wxyz 0 0 0 1", "raw_adc 1 2 3 4 5 6"])
            .unwrap();
        assert_eq!(routed, 3);

        for rx in [first, second] {
            let events: Vec<TelemetryEvent> = rx.try_iter().collect();
            assert_eq!(events.len(), 3);
            assert!(matches!(events[0], TelemetryEvent::Force(_)));
            assert!(matches!(events[1], TelemetryEvent::Orientation(_)));
            assert!(matches!(events[2], TelemetryEvent::RawAnalog(_)));
        }
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let dispatcher = TelemetryDispatcher::new();
        let kept = dispatcher.subscribe().unwrap();
        drop(dispatcher.subscribe().unwrap());
        assert_eq!(dispatcher.subscriber_count(), 2);

        dispatcher.dispatch("wxyz 0 0 0 1").unwrap();
        assert_eq!(dispatcher.subscriber_count(), 1);
        assert_eq!(kept.try_iter().count(), 1);
    }

    #[test]
    fn test_latest_snapshot() {
        let dispatcher = TelemetryDispatcher::new();
        dispatcher.dispatch("force 1 2 3 4").unwrap();
        dispatcher.dispatch("force 5 6 7 8").unwrap();

        let data = dispatcher.latest().unwrap();
        assert_eq!(data.force.map(|f| f.flex_x), Some(5.0));
        assert_eq!(data.quaternion, None);
    }
}
