use crate::config::MonitorConfig;
use drive_traits::{
    same_listener, Location, LocationSink, LocationSource, MonitorError, NewLocationListener,
};
use log::{debug, error, warn};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

type ListenerList = Vec<Arc<dyn NewLocationListener>>;

/// Distributes location fixes to registered listeners. The location source
/// only runs while GPS logging is enabled and at least one listener is
/// registered.
pub struct LocationHandler {
    source: Box<dyn LocationSource>,
    listeners: RwLock<ListenerList>,
    source_running: Mutex<bool>,
    log_gps: bool,
    min_interval: Duration,
    me: Weak<LocationHandler>,
}

struct HandlerSink {
    handler: Weak<LocationHandler>,
}

impl LocationSink for HandlerSink {
    fn push_location(&self, location: Location) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_location_changed(location);
        }
    }
}

impl LocationHandler {
    pub fn new(source: Box<dyn LocationSource>, config: &MonitorConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| LocationHandler {
            source,
            listeners: RwLock::new(Vec::new()),
            source_running: Mutex::new(false),
            log_gps: config.log_gps,
            min_interval: config.location_interval(),
            me: me.clone(),
        })
    }

    pub fn register_listener(&self, listener: Arc<dyn NewLocationListener>) -> Result<(), MonitorError> {
        let mut running = self.source_running.lock()?;
        let count = {
            let mut listeners = self.listeners.write()?;
            if !listeners.iter().any(|l| same_listener(l, &listener)) {
                listeners.push(Arc::clone(&listener));
            }
            listeners.len()
        };
        debug!("Location listener registered ({} total)", count);

        if !*running && self.log_gps {
            let sink: Arc<dyn LocationSink> = Arc::new(HandlerSink { handler: self.me.clone() });
            match self.source.start(sink, self.min_interval) {
                Ok(()) => {
                    debug!("Location updates started every {:?}", self.min_interval);
                    *running = true;
                }
                Err(e) => {
                    error!("Failed to start location updates: {}", e);
                    self.listeners.write()?.retain(|l| !same_listener(l, &listener));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn NewLocationListener>) -> Result<(), MonitorError> {
        let mut running = self.source_running.lock()?;
        let count = {
            let mut listeners = self.listeners.write()?;
            listeners.retain(|l| !same_listener(l, listener));
            listeners.len()
        };
        debug!("Location listener removed ({} left)", count);

        if count == 0 && *running {
            *running = false;
            if let Err(e) = self.source.stop() {
                error!("Failed to stop location updates: {}", e);
            }
            debug!("Location updates stopped");
        }
        Ok(())
    }

    /// Forwards a fix to every listener. Fixes without valid coordinates are
    /// dropped.
    pub fn on_location_changed(&self, location: Location) {
        if !location.is_valid_fix() {
            warn!("Ignoring location without a fix: {}", location);
            return;
        }

        let listeners: ListenerList = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(e) => {
                error!("Location listener lock poisoned: {}", e);
                return;
            }
        };
        for listener in listeners {
            listener.on_new_location(location);
        }
    }

    pub fn is_active(&self) -> bool {
        self.source_running.lock().map(|running| *running).unwrap_or(false)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

impl Drop for LocationHandler {
    fn drop(&mut self) {
        if let Ok(running) = self.source_running.get_mut() {
            if *running {
                let _ = self.source.stop();
            }
        }
    }
}
