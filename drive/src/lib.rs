//! Driving quality monitor core.
//!
//! Raw accelerometer samples flow through [`AccelerationPipeline`], which
//! denoises them and rotates them into the vehicle frame. A [`Calibrator`]
//! finds that frame, a [`QualityRater`] turns the rotated vectors into a
//! running score and a [`TripLogger`] writes the score and position to a
//! trip file. [`MonitorController`] wires the pieces together.

pub mod acceleration;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod data;
pub mod filter;
pub mod location;
pub mod quality;
pub mod replay;
pub mod rotation;
pub mod trip;
pub mod trip_logger;
mod worker;

pub use drive_traits::{
    CalibrationListener, FilteredAccelerationListener, Location, LocationSink, LocationSource,
    MonitorError, NewLocationListener, OrientationAngles, QualityListener, SampleSink,
    SensorSource, Vector3,
};

pub use acceleration::AccelerationPipeline;
pub use calibration::{CalibrationState, Calibrator};
pub use config::MonitorConfig;
pub use controller::{ControllerState, MonitorController, MonitorView};
pub use data::{AccelerationObject, Axis, TripPosition, TripRecord};
pub use filter::MovingAverageFilter;
pub use location::LocationHandler;
pub use quality::{Quality, QualityGrade, QualityRater};
pub use replay::{ReplayGps, ReplaySensor};
pub use trip::Trip;
pub use trip_logger::TripLogger;
