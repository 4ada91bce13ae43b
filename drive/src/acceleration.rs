use crate::filter::MovingAverageFilter;
use crate::rotation::rotate_by;
use drive_traits::{
    same_listener, FilteredAccelerationListener, MonitorError, OrientationAngles, SampleSink,
    SensorSource, Vector3,
};
use log::{debug, error};
use std::sync::{Arc, Mutex, RwLock, Weak};

type ListenerList = Vec<Arc<dyn FilteredAccelerationListener>>;

/// Collects raw accelerometer samples, denoises them and rotates them into
/// the vehicle frame before handing them to the registered listeners.
///
/// The sensor only runs while at least one listener is registered.
pub struct AccelerationPipeline {
    source: Box<dyn SensorSource>,
    filter: Mutex<MovingAverageFilter>,
    angles: Mutex<OrientationAngles>,
    listeners: RwLock<ListenerList>,
    // Held across start/stop of the sensor; true while the sensor runs.
    sensor_running: Mutex<bool>,
    me: Weak<AccelerationPipeline>,
}

struct PipelineSink {
    pipeline: Weak<AccelerationPipeline>,
}

impl SampleSink for PipelineSink {
    fn push_sample(&self, sample: Vector3) {
        if let Some(pipeline) = self.pipeline.upgrade() {
            pipeline.on_raw_sample(sample);
        }
    }
}

impl AccelerationPipeline {
    pub fn new(source: Box<dyn SensorSource>) -> Arc<Self> {
        Arc::new_cyclic(|me| AccelerationPipeline {
            source,
            filter: Mutex::new(MovingAverageFilter::new()),
            angles: Mutex::new(OrientationAngles::default()),
            listeners: RwLock::new(Vec::new()),
            sensor_running: Mutex::new(false),
            me: me.clone(),
        })
    }

    /// Adds a listener, starting the sensor if it is the first one.
    /// Registering the same listener twice has no effect.
    pub fn register_listener(
        &self,
        listener: Arc<dyn FilteredAccelerationListener>,
    ) -> Result<(), MonitorError> {
        let mut running = self.sensor_running.lock()?;
        let count = {
            let mut listeners = self.listeners.write()?;
            if !listeners.iter().any(|l| same_listener(l, &listener)) {
                listeners.push(Arc::clone(&listener));
            }
            listeners.len()
        };
        debug!("Acceleration listener registered ({} total)", count);

        if !*running {
            let sink: Arc<dyn SampleSink> = Arc::new(PipelineSink { pipeline: self.me.clone() });
            match self.source.start(sink) {
                Ok(()) => {
                    debug!("Accelerometer started");
                    *running = true;
                }
                Err(e) => {
                    error!("Failed to start accelerometer: {}", e);
                    self.listeners.write()?.retain(|l| !same_listener(l, &listener));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Removes a listener, stopping the sensor once none are left. Removing
    /// an unknown listener has no effect.
    pub fn unregister_listener(
        &self,
        listener: &Arc<dyn FilteredAccelerationListener>,
    ) -> Result<(), MonitorError> {
        let mut running = self.sensor_running.lock()?;
        let count = {
            let mut listeners = self.listeners.write()?;
            listeners.retain(|l| !same_listener(l, listener));
            listeners.len()
        };
        debug!("Acceleration listener removed ({} left)", count);

        if count == 0 && *running {
            *running = false;
            if let Err(e) = self.source.stop() {
                error!("Failed to stop accelerometer: {}", e);
            }
            debug!("Accelerometer stopped");
        }
        Ok(())
    }

    /// Feeds one raw sample through the filter. Once the filter window is
    /// full every listener receives the filtered vector and its rotated copy.
    pub fn on_raw_sample(&self, sample: Vector3) {
        let filtered = match self.filter.lock() {
            Ok(mut filter) => {
                filter.push(sample.to_array());
                filter.compute_ema()
            }
            Err(e) => {
                error!("Filter lock poisoned: {}", e);
                return;
            }
        };
        let Some(filtered) = filtered else {
            return;
        };

        let listeners: ListenerList = match self.listeners.read() {
            Ok(listeners) if !listeners.is_empty() => listeners.clone(),
            Ok(_) => return,
            Err(e) => {
                error!("Listener lock poisoned: {}", e);
                return;
            }
        };

        let angles = match self.angles() {
            Ok(angles) => angles,
            Err(e) => {
                error!("Failed to read orientation: {}", e);
                return;
            }
        };
        let mut rotated = filtered;
        rotate_by(&angles, &mut rotated);

        for listener in listeners {
            listener.on_filtered_acceleration(&filtered, &rotated);
        }
    }

    pub fn update_roll(&self, roll: f64) -> Result<(), MonitorError> {
        self.angles.lock()?.roll = roll;
        Ok(())
    }

    pub fn update_pitch(&self, pitch: f64) -> Result<(), MonitorError> {
        self.angles.lock()?.pitch = pitch;
        Ok(())
    }

    pub fn update_yaw(&self, yaw: f64) -> Result<(), MonitorError> {
        self.angles.lock()?.yaw = yaw;
        Ok(())
    }

    /// Replaces all three angles at once.
    pub fn update_angles(&self, angles: OrientationAngles) -> Result<(), MonitorError> {
        *self.angles.lock()? = angles;
        Ok(())
    }

    pub fn reset_angles(&self) -> Result<(), MonitorError> {
        self.update_angles(OrientationAngles::default())
    }

    pub fn angles(&self) -> Result<OrientationAngles, MonitorError> {
        Ok(*self.angles.lock()?)
    }

    pub fn is_active(&self) -> bool {
        self.sensor_running.lock().map(|running| *running).unwrap_or(false)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

impl Drop for AccelerationPipeline {
    fn drop(&mut self) {
        if let Ok(running) = self.sensor_running.get_mut() {
            if *running {
                let _ = self.source.stop();
            }
        }
    }
}
