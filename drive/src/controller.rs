use crate::acceleration::AccelerationPipeline;
use crate::calibration::Calibrator;
use crate::config::MonitorConfig;
use crate::location::LocationHandler;
use crate::quality::QualityRater;
use crate::trip_logger::TripLogger;
use drive_traits::{
    CalibrationListener, FilteredAccelerationListener, LocationSource, MonitorError,
    NewLocationListener, QualityListener, SensorSource,
};
use log::{debug, error};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Calibrating,
    Monitoring,
}

/// The user-facing side of a monitoring session.
///
/// Only calibration and quality events reach a view through the controller.
/// A view that also wants filtered acceleration or location fixes registers
/// itself with [`MonitorController::pipeline`] and
/// [`MonitorController::location_handler`], and unregisters when it goes
/// away. Views may query the controller (state, score, trip file name) from
/// any event.
pub trait MonitorView: CalibrationListener + QualityListener {}

impl<T: CalibrationListener + QualityListener> MonitorView for T {}

/// Forwards calibration and quality events to whichever view is attached.
#[derive(Default)]
struct ViewRelay {
    view: RwLock<Option<Arc<dyn MonitorView>>>,
}

impl ViewRelay {
    fn current(&self) -> Option<Arc<dyn MonitorView>> {
        match self.view.read() {
            Ok(view) => view.clone(),
            Err(e) => {
                error!("View lock poisoned: {}", e);
                None
            }
        }
    }
}

impl CalibrationListener for ViewRelay {
    fn on_offset_found(&self) {
        if let Some(view) = self.current() {
            view.on_offset_found();
        }
    }

    fn on_calibration_complete(&self) {
        if let Some(view) = self.current() {
            view.on_calibration_complete();
        }
    }
}

impl QualityListener for ViewRelay {
    fn on_quality_update(&self, score: i32) {
        if let Some(view) = self.current() {
            view.on_quality_update(score);
        }
    }
}

struct Monitoring {
    rater: Arc<QualityRater>,
    logger: Option<Arc<TripLogger>>,
}

enum Session {
    Idle,
    Calibrating(Arc<Calibrator>),
    Monitoring(Monitoring),
}

/// Drives a monitoring session: calibrate, then rate and log the drive.
///
/// Calls made from the wrong state are ignored.
pub struct MonitorController {
    pipeline: Arc<AccelerationPipeline>,
    locations: Arc<LocationHandler>,
    config: MonitorConfig,
    relay: Arc<ViewRelay>,
    // Serialises transitions. Listeners run and workers are joined while
    // only this lock is held.
    control: Mutex<()>,
    // Locked just long enough to read or swap the session.
    session: Mutex<Session>,
}

impl MonitorController {
    pub fn new(
        sensor: Box<dyn SensorSource>,
        gps: Box<dyn LocationSource>,
        config: MonitorConfig,
    ) -> Self {
        MonitorController {
            pipeline: AccelerationPipeline::new(sensor),
            locations: LocationHandler::new(gps, &config),
            config,
            relay: Arc::new(ViewRelay::default()),
            control: Mutex::new(()),
            session: Mutex::new(Session::Idle),
        }
    }

    /// Replaces the attached view. Events go to the new view from now on.
    pub fn attach_view(&self, view: Arc<dyn MonitorView>) -> Result<(), MonitorError> {
        *self.relay.view.write()? = Some(view);
        Ok(())
    }

    pub fn detach_view(&self) -> Result<(), MonitorError> {
        *self.relay.view.write()? = None;
        Ok(())
    }

    /// Forgets the previous orientation and starts a new calibration.
    pub fn initiate_calibration(&self) -> Result<(), MonitorError> {
        let _control = self.control.lock()?;
        let state = self.state();
        if state != ControllerState::Idle {
            debug!("Ignoring calibration request while {:?}", state);
            return Ok(());
        }

        self.pipeline.reset_angles()?;
        let listener: Arc<dyn CalibrationListener> = self.relay.clone();
        let calibrator = Calibrator::start(
            Arc::clone(&self.pipeline),
            listener,
            self.config.calibration_settle(),
        )?;
        *self.session.lock()? = Session::Calibrating(calibrator);
        debug!("Calibrating");
        Ok(())
    }

    pub fn cancel_calibration(&self) -> Result<(), MonitorError> {
        let _control = self.control.lock()?;
        let calibrator = {
            let mut session = self.session.lock()?;
            match std::mem::replace(&mut *session, Session::Idle) {
                Session::Calibrating(calibrator) => calibrator,
                other => {
                    *session = other;
                    return Ok(());
                }
            }
        };
        calibrator.cancel()?;
        debug!("Calibration cancelled, idle");
        Ok(())
    }

    /// Starts rating and logging the drive. A trip file that cannot be
    /// created, or a location source that will not start, is logged and
    /// monitoring goes on without it.
    pub fn start_monitoring(&self) -> Result<(), MonitorError> {
        let _control = self.control.lock()?;
        let calibrator = match &*self.session.lock()? {
            Session::Monitoring(_) => return Ok(()),
            Session::Calibrating(calibrator) => Some(Arc::clone(calibrator)),
            Session::Idle => None,
        };
        // No effect once the calibration has completed.
        if let Some(calibrator) = calibrator {
            calibrator.cancel()?;
            *self.session.lock()? = Session::Idle;
        }

        let rater = QualityRater::new();
        let sample_listener: Arc<dyn FilteredAccelerationListener> = rater.clone();
        self.pipeline.register_listener(sample_listener)?;

        let logger = match TripLogger::create(&self.config.trip_dir, self.config.trip_interval()) {
            Ok(logger) => Some(logger),
            Err(e) => {
                error!("Failed to create trip file in {}: {}", self.config.trip_dir.display(), e);
                None
            }
        };
        rater.register_listener(self.relay.clone())?;
        if let Some(logger) = &logger {
            rater.register_listener(logger.clone())?;
            if let Err(e) = self.locations.register_listener(logger.clone()) {
                error!("Logging the trip without positions: {}", e);
            }
            logger.start()?;
        }

        *self.session.lock()? = Session::Monitoring(Monitoring { rater, logger });
        debug!("Monitoring");
        Ok(())
    }

    /// Closes the trip file and releases the sensors.
    pub fn stop_monitoring(&self) -> Result<(), MonitorError> {
        let _control = self.control.lock()?;
        let Monitoring { rater, logger } = {
            let mut session = self.session.lock()?;
            match std::mem::replace(&mut *session, Session::Idle) {
                Session::Monitoring(monitoring) => monitoring,
                other => {
                    *session = other;
                    return Ok(());
                }
            }
        };

        if let Some(logger) = &logger {
            logger.stop()?;
            let quality: Arc<dyn QualityListener> = logger.clone();
            rater.unregister_listener(&quality)?;
            let location: Arc<dyn NewLocationListener> = logger.clone();
            self.locations.unregister_listener(&location)?;
        }
        let relay: Arc<dyn QualityListener> = self.relay.clone();
        rater.unregister_listener(&relay)?;
        let sample_listener: Arc<dyn FilteredAccelerationListener> = rater.clone();
        self.pipeline.unregister_listener(&sample_listener)?;

        debug!("Monitoring stopped, idle");
        Ok(())
    }

    pub fn state(&self) -> ControllerState {
        self.session
            .lock()
            .map(|session| state_of(&session))
            .unwrap_or(ControllerState::Idle)
    }

    pub fn is_monitoring(&self) -> bool {
        self.state() == ControllerState::Monitoring
    }

    /// Name of the current trip file, if monitoring with one.
    pub fn log_file_name(&self) -> Option<String> {
        match &*self.session.lock().ok()? {
            Session::Monitoring(Monitoring { logger: Some(logger), .. }) => Some(logger.file_name()),
            _ => None,
        }
    }

    /// Latest score, if monitoring.
    pub fn score(&self) -> Option<i32> {
        match &*self.session.lock().ok()? {
            Session::Monitoring(monitoring) => Some(monitoring.rater.score()),
            _ => None,
        }
    }

    /// The running calibration, if calibrating.
    pub fn calibrator(&self) -> Option<Arc<Calibrator>> {
        match &*self.session.lock().ok()? {
            Session::Calibrating(calibrator) => Some(Arc::clone(calibrator)),
            _ => None,
        }
    }

    pub fn pipeline(&self) -> &Arc<AccelerationPipeline> {
        &self.pipeline
    }

    pub fn location_handler(&self) -> &Arc<LocationHandler> {
        &self.locations
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

fn state_of(session: &Session) -> ControllerState {
    match session {
        Session::Idle => ControllerState::Idle,
        Session::Calibrating(_) => ControllerState::Calibrating,
        Session::Monitoring(_) => ControllerState::Monitoring,
    }
}

impl Drop for MonitorController {
    fn drop(&mut self) {
        let _ = self.cancel_calibration();
        let _ = self.stop_monitoring();
    }
}
