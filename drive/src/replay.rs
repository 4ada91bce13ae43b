//! Sensor and location sources that replay recorded data, for running the
//! monitor away from a vehicle.

use drive_traits::{
    Location, LocationSink, LocationSource, MonitorError, SampleSink, SensorSource, Vector3,
};
use log::{debug, error};
use std::io::BufRead;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn parse_row<const N: usize>(line_no: usize, line: &str) -> Result<[f64; N], MonitorError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != N {
        return Err(MonitorError::ParseError(format!(
            "line {}: expected {} fields, got {}",
            line_no,
            N,
            fields.len()
        )));
    }
    let mut row = [0.0; N];
    for (value, field) in row.iter_mut().zip(fields) {
        *value = field.parse().map_err(|e| {
            MonitorError::ParseError(format!("line {}: invalid number {:?}: {}", line_no, field, e))
        })?;
    }
    Ok(row)
}

fn parse_rows<const N: usize, R: BufRead>(reader: R) -> Result<Vec<[f64; N]>, MonitorError> {
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| MonitorError::ReadError(e.to_string()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        rows.push(parse_row::<N>(i + 1, line)?);
    }
    Ok(rows)
}

/// Reads `x,y,z` accelerometer samples, one per line. Blank lines and lines
/// starting with `#` are skipped.
pub fn load_samples<R: BufRead>(reader: R) -> Result<Vec<Vector3>, MonitorError> {
    Ok(parse_rows::<3, R>(reader)?
        .into_iter()
        .map(|[x, y, z]| Vector3::new(x as f32, y as f32, z as f32))
        .collect())
}

/// Reads `latitude,longitude,speed` fixes, one per line.
pub fn load_fixes<R: BufRead>(reader: R) -> Result<Vec<Location>, MonitorError> {
    Ok(parse_rows::<3, R>(reader)?
        .into_iter()
        .enumerate()
        .map(|(i, [lat, long, speed])| Location::new(lat, long, speed as f32, i as u64))
        .collect())
}

struct Player {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Player {
    /// Delivers `items` from `cursor` onwards, one per `period`, until the
    /// end or until stopped. The cursor survives a stop, so a restarted
    /// player resumes where the previous one left off.
    fn spawn<T, F>(
        name: &str,
        items: Arc<Vec<T>>,
        cursor: Arc<AtomicUsize>,
        period: Duration,
        mut deliver: F,
    ) -> Result<Self, MonitorError>
    where
        T: Copy + Send + Sync + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(&item) = items.get(index) else {
                        cursor.store(items.len(), Ordering::SeqCst);
                        debug!("{} reached the end of its data", thread_name);
                        break;
                    };
                    deliver(item);
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            })
            .map_err(|e| MonitorError::SourceError(format!("Failed to spawn {}: {}", name, e)))?;
        Ok(Player { stop_tx, handle })
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        // A sink may stop its own source from the player thread.
        if self.handle.thread().id() != thread::current().id() {
            if self.handle.join().is_err() {
                error!("Replay thread panicked");
            }
        }
    }
}

/// Plays recorded accelerometer samples at a fixed rate.
///
/// Clones share the same position, so a clone can watch the progress of a
/// sensor handed to the monitor.
#[derive(Clone)]
pub struct ReplaySensor {
    samples: Arc<Vec<Vector3>>,
    period: Duration,
    cursor: Arc<AtomicUsize>,
    player: Arc<Mutex<Option<Player>>>,
}

impl ReplaySensor {
    pub fn new(samples: Vec<Vector3>, period: Duration) -> Self {
        ReplaySensor {
            samples: Arc::new(samples),
            period,
            cursor: Arc::new(AtomicUsize::new(0)),
            player: Arc::new(Mutex::new(None)),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples delivered so far.
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst).min(self.samples.len())
    }

    pub fn is_finished(&self) -> bool {
        self.position() >= self.samples.len()
    }
}

impl SensorSource for ReplaySensor {
    fn start(&self, sink: Arc<dyn SampleSink>) -> Result<(), MonitorError> {
        let mut player = self.player.lock()?;
        if player.is_some() {
            return Ok(());
        }
        *player = Some(Player::spawn(
            "replay-sensor",
            Arc::clone(&self.samples),
            Arc::clone(&self.cursor),
            self.period,
            move |sample| sink.push_sample(sample),
        )?);
        debug!("Replaying samples from #{}", self.position());
        Ok(())
    }

    fn stop(&self) -> Result<(), MonitorError> {
        let running = self.player.lock()?.take();
        if let Some(running) = running {
            running.stop();
            debug!("Sample replay paused at #{}", self.position());
        }
        Ok(())
    }
}

/// Plays recorded fixes, one per requested interval.
#[derive(Clone)]
pub struct ReplayGps {
    fixes: Arc<Vec<Location>>,
    cursor: Arc<AtomicUsize>,
    player: Arc<Mutex<Option<Player>>>,
}

impl ReplayGps {
    pub fn new(fixes: Vec<Location>) -> Self {
        ReplayGps {
            fixes: Arc::new(fixes),
            cursor: Arc::new(AtomicUsize::new(0)),
            player: Arc::new(Mutex::new(None)),
        }
    }
}

impl LocationSource for ReplayGps {
    fn start(&self, sink: Arc<dyn LocationSink>, min_interval: Duration) -> Result<(), MonitorError> {
        let mut player = self.player.lock()?;
        if player.is_some() {
            return Ok(());
        }
        *player = Some(Player::spawn(
            "replay-gps",
            Arc::clone(&self.fixes),
            Arc::clone(&self.cursor),
            min_interval,
            move |fix| sink.push_location(fix),
        )?);
        Ok(())
    }

    fn stop(&self) -> Result<(), MonitorError> {
        let running = self.player.lock()?.take();
        if let Some(running) = running {
            running.stop();
        }
        Ok(())
    }
}
