//! Calibration of the device orientation relative to the vehicle.
//!
//! Calibration runs in three steps. While the car stands still the gravity
//! vector gives roll and pitch. The remaining sideways magnitude is then
//! averaged to find the resting offset. Finally the driver pulls away and the
//! direction of the forward acceleration gives the yaw.

use crate::acceleration::AccelerationPipeline;
use crate::data::Axis;
use crate::rotation::rotate;
use drive_traits::{CalibrationListener, FilteredAccelerationListener, MonitorError};
use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

/// Samples averaged for the offset and for the yaw angle.
pub const AVERAGE_SAMPLES: u32 = 25;

/// Sideways magnitude above the offset that counts as driving (m/s²).
pub const DRIVING_THRESHOLD: f64 = 0.5;

/// Allowed deviation from the running average while measuring the offset.
pub const STABILITY_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Idle,
    LevelCalibrating,
    OffsetFinding,
    DirectionFinding,
    Complete,
}

#[derive(Debug)]
struct Progress {
    state: CalibrationState,
    average_buffer: f64,
    average_counter: u32,
    offset: f64,
}

impl Progress {
    fn reset_average(&mut self) {
        self.average_buffer = 0.0;
        self.average_counter = 0;
    }
}

enum Event {
    OffsetFound,
    Complete,
}

/// One-shot calibration run. Construct a new one to calibrate again.
pub struct Calibrator {
    pipeline: Arc<AccelerationPipeline>,
    listener: Arc<dyn CalibrationListener>,
    progress: Mutex<Progress>,
    cancelled: AtomicBool,
    settle_tx: Mutex<Option<mpsc::Sender<()>>>,
    me: Weak<Calibrator>,
}

impl Calibrator {
    /// Starts calibrating. The calibrator subscribes to the pipeline once
    /// `settle_delay` has passed, giving touch vibration time to die down; a
    /// zero delay subscribes before returning.
    pub fn start(
        pipeline: Arc<AccelerationPipeline>,
        listener: Arc<dyn CalibrationListener>,
        settle_delay: Duration,
    ) -> Result<Arc<Self>, MonitorError> {
        let calibrator = Arc::new_cyclic(|me| Calibrator {
            pipeline,
            listener,
            progress: Mutex::new(Progress {
                state: CalibrationState::LevelCalibrating,
                average_buffer: 0.0,
                average_counter: 0,
                offset: 0.0,
            }),
            cancelled: AtomicBool::new(false),
            settle_tx: Mutex::new(None),
            me: me.clone(),
        });

        if settle_delay.is_zero() {
            calibrator.subscribe()?;
            return Ok(calibrator);
        }

        let (settle_tx, settle_rx) = mpsc::channel::<()>();
        *calibrator.settle_tx.lock()? = Some(settle_tx);
        let weak = Arc::downgrade(&calibrator);
        thread::Builder::new()
            .name("calibration-settle".to_string())
            .spawn(move || match settle_rx.recv_timeout(settle_delay) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(calibrator) = weak.upgrade() {
                        if let Err(e) = calibrator.subscribe() {
                            error!("Failed to start calibration: {}", e);
                        }
                    }
                }
                _ => debug!("Calibration cancelled before it started"),
            })
            .map_err(|e| MonitorError::Other(format!("Failed to spawn calibration thread: {}", e)))?;

        Ok(calibrator)
    }

    fn as_listener(&self) -> Option<Arc<dyn FilteredAccelerationListener>> {
        self.me.upgrade().map(|me| me as Arc<dyn FilteredAccelerationListener>)
    }

    fn subscribe(&self) -> Result<(), MonitorError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(listener) = self.as_listener() else {
            return Ok(());
        };
        self.pipeline.register_listener(Arc::clone(&listener))?;
        debug!("Calibration started");

        // Cancelled while registering.
        if self.cancelled.load(Ordering::SeqCst) {
            self.pipeline.unregister_listener(&listener)?;
        }
        Ok(())
    }

    fn unsubscribe(&self) {
        if let Some(listener) = self.as_listener() {
            if let Err(e) = self.pipeline.unregister_listener(&listener) {
                error!("Failed to unregister calibration: {}", e);
            }
        }
    }

    /// Aborts an unfinished calibration and discards its progress. Has no
    /// effect once calibration is complete.
    pub fn cancel(&self) -> Result<(), MonitorError> {
        let mut progress = self.progress.lock()?;
        if progress.state == CalibrationState::Complete {
            return Ok(());
        }
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(settle_tx) = self.settle_tx.lock()?.take() {
            let _ = settle_tx.send(());
        }
        progress.state = CalibrationState::Idle;
        progress.reset_average();
        progress.offset = 0.0;
        drop(progress);

        self.unsubscribe();
        debug!("Calibration cancelled");
        Ok(())
    }

    pub fn state(&self) -> CalibrationState {
        self.progress.lock().map(|p| p.state).unwrap_or(CalibrationState::Idle)
    }

    /// Resting XY magnitude, once found.
    pub fn offset(&self) -> Option<f64> {
        self.progress.lock().ok().and_then(|p| match p.state {
            CalibrationState::DirectionFinding | CalibrationState::Complete => Some(p.offset),
            _ => None,
        })
    }

    fn level(&self, filtered: &[f32; 3]) -> Result<(), MonitorError> {
        let mut level = *filtered;
        let roll = (level[0] as f64).atan2(level[2] as f64);
        rotate(roll, Axis::X, Axis::Z, &mut level);
        let pitch = (level[1] as f64).atan2(level[2] as f64);
        rotate(pitch, Axis::Y, Axis::Z, &mut level);

        self.pipeline.update_roll(roll)?;
        self.pipeline.update_pitch(pitch)?;
        self.pipeline.update_yaw(0.0)?;
        debug!("Level calibrated: roll={:.4}, pitch={:.4}", roll, pitch);
        Ok(())
    }

    fn step(&self, filtered: &[f32; 3], rotated: &[f32; 3]) -> Result<Option<Event>, MonitorError> {
        let mut progress = self.progress.lock()?;

        match progress.state {
            CalibrationState::LevelCalibrating => {
                self.level(filtered)?;
                progress.state = CalibrationState::OffsetFinding;
            }
            CalibrationState::OffsetFinding => {
                let magnitude = (rotated[0] as f64).hypot(rotated[1] as f64);
                let counter = progress.average_counter;
                let stable = counter == 0 || {
                    let average = progress.average_buffer / counter as f64;
                    magnitude < average + STABILITY_TOLERANCE
                        && magnitude > average - STABILITY_TOLERANCE
                };

                if !stable {
                    warn!("Device moved while measuring offset, restarting level calibration");
                    progress.reset_average();
                    progress.state = CalibrationState::LevelCalibrating;
                    return Ok(None);
                }

                progress.average_buffer += magnitude;
                progress.average_counter += 1;
                if progress.average_counter >= AVERAGE_SAMPLES {
                    progress.offset = progress.average_buffer / progress.average_counter as f64;
                    progress.reset_average();
                    progress.state = CalibrationState::DirectionFinding;
                    debug!("Offset found: {:.4}", progress.offset);
                    return Ok(Some(Event::OffsetFound));
                }
            }
            CalibrationState::DirectionFinding => {
                let x = rotated[0] as f64;
                let y = rotated[1] as f64;
                if x.hypot(y) - progress.offset > DRIVING_THRESHOLD {
                    progress.average_buffer += x.atan2(y);
                    progress.average_counter += 1;

                    if progress.average_counter > AVERAGE_SAMPLES {
                        let yaw = progress.average_buffer / progress.average_counter as f64;
                        self.pipeline.update_yaw(yaw)?;
                        progress.state = CalibrationState::Complete;
                        debug!("Direction found: yaw={:.4}", yaw);
                        return Ok(Some(Event::Complete));
                    }
                }
            }
            CalibrationState::Idle | CalibrationState::Complete => {}
        }
        Ok(None)
    }
}

impl FilteredAccelerationListener for Calibrator {
    fn on_filtered_acceleration(&self, filtered: &[f32; 3], rotated: &[f32; 3]) {
        match self.step(filtered, rotated) {
            Ok(Some(Event::OffsetFound)) => self.listener.on_offset_found(),
            Ok(Some(Event::Complete)) => {
                self.unsubscribe();
                self.listener.on_calibration_complete();
            }
            Ok(None) => {}
            Err(e) => error!("Calibration step failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::WINDOW_SIZE;
    use approx::assert_relative_eq;
    use drive_traits::{SampleSink, SensorSource, Vector3};
    use std::f64::consts::FRAC_PI_2;
    use std::sync::atomic::AtomicUsize;

    const G: f32 = 9.81;

    struct IdleSensor;

    impl SensorSource for IdleSensor {
        fn start(&self, _sink: Arc<dyn SampleSink>) -> Result<(), MonitorError> {
            Ok(())
        }

        fn stop(&self) -> Result<(), MonitorError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Events {
        offset_found: AtomicUsize,
        complete: AtomicUsize,
    }

    impl CalibrationListener for Events {
        fn on_offset_found(&self) {
            self.offset_found.fetch_add(1, Ordering::SeqCst);
        }

        fn on_calibration_complete(&self) {
            self.complete.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (Arc<AccelerationPipeline>, Arc<Events>, Arc<Calibrator>) {
        let pipeline = AccelerationPipeline::new(Box::new(IdleSensor));
        let events = Arc::new(Events::default());
        let calibrator =
            Calibrator::start(Arc::clone(&pipeline), events.clone(), Duration::ZERO).unwrap();
        (pipeline, events, calibrator)
    }

    fn feed(pipeline: &AccelerationPipeline, sample: Vector3, count: usize) {
        for _ in 0..count {
            pipeline.on_raw_sample(sample);
        }
    }

    #[test]
    fn test_level_with_gravity_only() {
        let (pipeline, events, calibrator) = setup();
        assert_eq!(calibrator.state(), CalibrationState::LevelCalibrating);

        feed(&pipeline, Vector3::new(0.0, 0.0, G), WINDOW_SIZE);
        assert_eq!(calibrator.state(), CalibrationState::OffsetFinding);
        let angles = pipeline.angles().unwrap();
        assert_relative_eq!(angles.roll, 0.0, epsilon = 1e-6);
        assert_relative_eq!(angles.pitch, 0.0, epsilon = 1e-6);

        feed(&pipeline, Vector3::new(0.0, 0.0, G), AVERAGE_SAMPLES as usize);
        assert_eq!(calibrator.state(), CalibrationState::DirectionFinding);
        assert_eq!(events.offset_found.load(Ordering::SeqCst), 1);
        assert_relative_eq!(calibrator.offset().unwrap(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_tilted_device_is_levelled() {
        let (pipeline, _, calibrator) = setup();
        let tilt = 0.4f32;
        let sample = Vector3::new(G * tilt.sin(), 0.0, G * tilt.cos());

        feed(&pipeline, sample, WINDOW_SIZE);
        assert_eq!(calibrator.state(), CalibrationState::OffsetFinding);
        assert_relative_eq!(pipeline.angles().unwrap().roll, 0.4, epsilon = 1e-4);

        feed(&pipeline, sample, AVERAGE_SAMPLES as usize);
        assert_eq!(calibrator.state(), CalibrationState::DirectionFinding);
        assert!(calibrator.offset().unwrap() < 0.01);
    }

    #[test]
    fn test_sustained_forward_acceleration_completes() {
        let (pipeline, events, calibrator) = setup();
        feed(&pipeline, Vector3::new(0.0, 0.0, G), WINDOW_SIZE + AVERAGE_SAMPLES as usize);
        assert_eq!(calibrator.state(), CalibrationState::DirectionFinding);

        // Below the threshold nothing accumulates.
        feed(&pipeline, Vector3::new(0.0, 0.2, G), 200);
        assert_eq!(calibrator.state(), CalibrationState::DirectionFinding);

        feed(&pipeline, Vector3::new(0.0, 3.0, G), 100);
        assert_eq!(calibrator.state(), CalibrationState::Complete);
        assert_eq!(events.complete.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.listener_count(), 0);
        assert_relative_eq!(pipeline.angles().unwrap().yaw, 0.0, epsilon = 1e-6);

        // Terminal: nothing else fires.
        feed(&pipeline, Vector3::new(0.0, 3.0, G), 50);
        assert_eq!(events.complete.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sideways_mount_finds_yaw() {
        let (pipeline, _, calibrator) = setup();
        feed(&pipeline, Vector3::new(0.0, 0.0, G), WINDOW_SIZE + AVERAGE_SAMPLES as usize);
        feed(&pipeline, Vector3::new(3.0, 0.0, G), 100);

        assert_eq!(calibrator.state(), CalibrationState::Complete);
        assert_relative_eq!(pipeline.angles().unwrap().yaw, FRAC_PI_2, epsilon = 1e-6);
    }

    #[test]
    fn test_motion_during_offset_restarts_level() {
        let (pipeline, events, calibrator) = setup();
        feed(&pipeline, Vector3::new(0.0, 0.0, G), WINDOW_SIZE + 5);
        assert_eq!(calibrator.state(), CalibrationState::OffsetFinding);

        pipeline.on_raw_sample(Vector3::new(20.0, 0.0, G));
        assert_eq!(calibrator.state(), CalibrationState::LevelCalibrating);
        assert_eq!(events.offset_found.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel() {
        let (pipeline, events, calibrator) = setup();
        feed(&pipeline, Vector3::new(0.0, 0.0, G), WINDOW_SIZE + 3);
        assert_eq!(pipeline.listener_count(), 1);

        calibrator.cancel().unwrap();
        assert_eq!(calibrator.state(), CalibrationState::Idle);
        assert_eq!(pipeline.listener_count(), 0);
        assert!(calibrator.offset().is_none());

        feed(&pipeline, Vector3::new(0.0, 0.0, G), 100);
        assert_eq!(calibrator.state(), CalibrationState::Idle);
        assert_eq!(events.offset_found.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_settle_delay() {
        let pipeline = AccelerationPipeline::new(Box::new(IdleSensor));
        let events = Arc::new(Events::default());
        let _calibrator =
            Calibrator::start(Arc::clone(&pipeline), events.clone(), Duration::from_millis(50))
                .unwrap();
        assert_eq!(pipeline.listener_count(), 0);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(pipeline.listener_count(), 1);
    }

    #[test]
    fn test_cancel_during_settle_delay() {
        let pipeline = AccelerationPipeline::new(Box::new(IdleSensor));
        let events = Arc::new(Events::default());
        let calibrator =
            Calibrator::start(Arc::clone(&pipeline), events.clone(), Duration::from_millis(50))
                .unwrap();
        calibrator.cancel().unwrap();

        thread::sleep(Duration::from_millis(200));
        assert_eq!(pipeline.listener_count(), 0);
        assert_eq!(calibrator.state(), CalibrationState::Idle);
    }
}
