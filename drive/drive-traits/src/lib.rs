use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

// --- Basic Types ---
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 { x, y, z }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f32; 3]> for Vector3 {
    fn from(v: [f32; 3]) -> Self {
        Vector3 { x: v[0], y: v[1], z: v[2] }
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector3(x={}, y={}, z={})", self.x, self.y, self.z)
    }
}

/// Device orientation relative to the vehicle, in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrientationAngles {
    /// Rotation applied about the (X, Z) plane.
    pub roll: f64,
    /// Rotation applied about the (Y, Z) plane.
    pub pitch: f64,
    /// Rotation applied about the (X, Y) plane.
    pub yaw: f64,
}

impl fmt::Display for OrientationAngles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Orientation(roll={}, pitch={}, yaw={})", self.roll, self.pitch, self.yaw)
    }
}

/// A position fix delivered by the location source.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Ground speed (m/s)
    pub speed: f32,
    /// Source timestamp (ms)
    pub timestamp_ms: u64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, speed: f32, timestamp_ms: u64) -> Self {
        Location { latitude, longitude, speed, timestamp_ms }
    }

    /// A zero or non-finite coordinate means the receiver has no fix.
    pub fn is_valid_fix(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude != 0.0
            && self.longitude != 0.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location(lat={}, lon={}, speed={})", self.latitude, self.longitude, self.speed)
    }
}

// --- Standard Error Type ---
#[derive(Debug)]
pub enum MonitorError {
    /// Error originating from the sensor or location collaborator
    SourceError(String),
    /// Error reading a file or stream
    ReadError(String),
    /// Error writing a trip file
    WriteError(String),
    /// Invalid or unreadable configuration
    ConfigurationError(String),
    /// A trip file line that does not follow the record format
    ParseError(String),
    /// Error related to multithreading locks (e.g., poisoned)
    LockError(String),
    /// Catch-all for other errors
    Other(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::SourceError(s) => write!(f, "Source error: {}", s),
            MonitorError::ReadError(s) => write!(f, "Read error: {}", s),
            MonitorError::WriteError(s) => write!(f, "Write error: {}", s),
            MonitorError::ConfigurationError(s) => write!(f, "Configuration error: {}", s),
            MonitorError::ParseError(s) => write!(f, "Parse error: {}", s),
            MonitorError::LockError(s) => write!(f, "Lock error: {}", s),
            MonitorError::Other(s) => write!(f, "Other monitor error: {}", s),
        }
    }
}

impl StdError for MonitorError {}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::WriteError(format!("I/O error: {}", err))
    }
}

impl<T> From<PoisonError<T>> for MonitorError {
    fn from(err: PoisonError<T>) -> Self {
        MonitorError::LockError(format!("Mutex poisoned: {}", err))
    }
}

impl From<toml::de::Error> for MonitorError {
    fn from(err: toml::de::Error) -> Self {
        MonitorError::ConfigurationError(format!("Invalid TOML: {}", err))
    }
}

// --- Collaborator traits ---

/// Receives raw accelerometer samples from a sensor source.
pub trait SampleSink: Send + Sync {
    fn push_sample(&self, sample: Vector3);
}

/// A platform accelerometer. Once started it pushes samples into the sink
/// from its own thread until stopped.
pub trait SensorSource: Send + Sync {
    fn start(&self, sink: Arc<dyn SampleSink>) -> Result<(), MonitorError>;

    fn stop(&self) -> Result<(), MonitorError>;
}

/// Receives location updates from a location source.
pub trait LocationSink: Send + Sync {
    fn push_location(&self, location: Location);
}

/// A platform location provider.
pub trait LocationSource: Send + Sync {
    /// Requests updates no more often than `min_interval`.
    fn start(&self, sink: Arc<dyn LocationSink>, min_interval: Duration) -> Result<(), MonitorError>;

    fn stop(&self) -> Result<(), MonitorError>;
}

// --- Observer traits ---

pub trait FilteredAccelerationListener: Send + Sync {
    /// Called for every denoised sample with the filtered vector and the same
    /// vector rotated into the vehicle frame.
    fn on_filtered_acceleration(&self, filtered: &[f32; 3], rotated: &[f32; 3]);
}

pub trait QualityListener: Send + Sync {
    fn on_quality_update(&self, score: i32);
}

pub trait NewLocationListener: Send + Sync {
    fn on_new_location(&self, location: Location);
}

pub trait CalibrationListener: Send + Sync {
    /// The resting XY offset has been measured; the driver may start moving.
    fn on_offset_found(&self);

    /// Roll, pitch and yaw are all known.
    fn on_calibration_complete(&self);
}

/// Identity comparison for listener registries. Compares the data pointers
/// only, so two `Arc`s of the same object always match.
pub fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl QualityListener for Noop {
        fn on_quality_update(&self, _score: i32) {}
    }

    #[test]
    fn test_valid_fix() {
        assert!(Location::new(60.79, 10.69, 12.0, 0).is_valid_fix());
        assert!(!Location::new(0.0, 10.69, 12.0, 0).is_valid_fix());
        assert!(!Location::new(60.79, 0.0, 12.0, 0).is_valid_fix());
        assert!(!Location::new(f64::NAN, 10.69, 12.0, 0).is_valid_fix());
        assert!(!Location::default().is_valid_fix());
    }

    #[test]
    fn test_same_listener() {
        let a: Arc<dyn QualityListener> = Arc::new(Noop);
        let b: Arc<dyn QualityListener> = Arc::new(Noop);
        assert!(same_listener(&a, &a.clone()));
        assert!(!same_listener(&a, &b));
    }

    #[test]
    fn test_error_display() {
        let err = MonitorError::ParseError("bad row".to_string());
        assert_eq!(err.to_string(), "Parse error: bad row");
    }

    #[test]
    fn test_error_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(matches!(MonitorError::from(io), MonitorError::WriteError(_)));

        let lock = std::sync::Mutex::new(0);
        let poisoned = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = lock.lock().unwrap();
                panic!("poison");
            })
            .join()
            .ok();
            lock.lock().map(|_| ()).map_err(MonitorError::from)
        });
        assert!(matches!(poisoned, Err(MonitorError::LockError(_))));

        let toml_err = toml::from_str::<toml::Table>("= nope").unwrap_err();
        assert!(matches!(MonitorError::from(toml_err), MonitorError::ConfigurationError(_)));
    }
}
