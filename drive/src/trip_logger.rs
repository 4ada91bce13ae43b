use crate::data::{TripPosition, TripRecord};
use crate::worker::Worker;
use drive_traits::{Location, MonitorError, NewLocationListener, QualityListener};
use log::{debug, error};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const FILE_PREFIX: &str = "drismo-";
pub const FILE_EXTENSION: &str = "csv";

/// Header line of a trip file, ending with the record interval in ms.
pub fn header_line(interval: Duration) -> String {
    format!("#Time,Score,Lat,Long,Speed,:{}", interval.as_millis())
}

/// First `drismo-NNNN.csv` name not yet taken in `dir`.
pub fn next_file_name(dir: &Path) -> String {
    let mut count = 1u32;
    loop {
        let name = format!("{}{:04}.{}", FILE_PREFIX, count, FILE_EXTENSION);
        if !dir.join(&name).exists() {
            return name;
        }
        count += 1;
    }
}

struct LoggerState {
    file: Mutex<Option<BufWriter<File>>>,
    scores: Mutex<Vec<i32>>,
    location: Mutex<Option<Location>>,
    started: Mutex<Instant>,
}

impl LoggerState {
    fn write_record(&self) -> Result<Option<TripRecord>, MonitorError> {
        let mut file = self.file.lock()?;
        let Some(writer) = file.as_mut() else {
            return Ok(None);
        };

        let mut scores = self.scores.lock()?;
        let avg_score = if scores.is_empty() {
            0
        } else {
            (scores.iter().map(|&s| s as i64).sum::<i64>() / scores.len() as i64) as i32
        };
        let position = self.location.lock()?.map(|l| TripPosition {
            latitude: l.latitude,
            longitude: l.longitude,
            speed: l.speed,
        });

        let record = TripRecord {
            elapsed_ms: self.started.lock()?.elapsed().as_millis() as u64,
            avg_score,
            position,
        };

        let written = writeln!(writer, "{}", record.to_csv()).and_then(|_| writer.flush());
        if let Err(e) = written {
            error!("Failed to write trip record, logging stopped: {}", e);
            *file = None;
            return Err(MonitorError::WriteError(e.to_string()));
        }

        scores.clear();
        Ok(Some(record))
    }

    fn close(&self) -> Result<(), MonitorError> {
        if let Some(mut writer) = self.file.lock()?.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Writes the averaged score and the latest position to a trip file at a
/// fixed interval.
pub struct TripLogger {
    state: Arc<LoggerState>,
    worker: Mutex<Option<Worker>>,
    interval: Duration,
    path: PathBuf,
}

impl TripLogger {
    /// Record interval for the given power-saver setting.
    pub fn interval_for(power_saver: bool) -> Duration {
        Duration::from_millis(if power_saver { 6000 } else { 2000 })
    }

    /// Creates a new trip file in `dir` and writes its header. Records are
    /// only written once [`start`](Self::start) is called or through
    /// [`write_record`](Self::write_record).
    pub fn create<P: AsRef<Path>>(dir: P, interval: Duration) -> Result<Arc<Self>, MonitorError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(next_file_name(dir));

        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", header_line(interval))?;
        writer.flush()?;
        debug!("Created trip file {}", path.display());

        Ok(Arc::new(TripLogger {
            state: Arc::new(LoggerState {
                file: Mutex::new(Some(writer)),
                scores: Mutex::new(Vec::new()),
                location: Mutex::new(None),
                started: Mutex::new(Instant::now()),
            }),
            worker: Mutex::new(None),
            interval,
            path,
        }))
    }

    /// Starts writing a record now and then once per interval. Record times
    /// count from here. A failed write closes the file and ends the thread.
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut worker = self.worker.lock()?;
        if worker.is_some() {
            return Ok(());
        }
        *self.state.started.lock()? = Instant::now();
        let state = Arc::clone(&self.state);
        *worker = Some(Worker::spawn("trip-logger", self.interval, move || {
            matches!(state.write_record(), Ok(Some(_)))
        })?);
        debug!("Trip logging started every {:?}", self.interval);
        Ok(())
    }

    /// Stops the writer thread, then flushes and closes the file. Calling it
    /// again has no effect.
    pub fn stop(&self) -> Result<(), MonitorError> {
        if let Some(worker) = self.worker.lock()?.take() {
            worker.stop();
        }
        self.state.close()?;
        debug!("Trip logging stopped");
        Ok(())
    }

    /// Appends one record with the mean of the scores received since the
    /// previous record. Returns `None` once the file is closed.
    pub fn write_record(&self) -> Result<Option<TripRecord>, MonitorError> {
        self.state.write_record()
    }

    pub fn is_logging(&self) -> bool {
        self.state.file.lock().map(|f| f.is_some()).unwrap_or(false)
    }

    /// Whether the writer thread is still running.
    pub fn is_writing(&self) -> bool {
        self.worker
            .lock()
            .map(|w| w.as_ref().is_some_and(Worker::is_running))
            .unwrap_or(false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of scores buffered since the last record.
    pub fn pending_scores(&self) -> usize {
        self.state.scores.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl QualityListener for TripLogger {
    fn on_quality_update(&self, score: i32) {
        match self.state.scores.lock() {
            Ok(mut scores) => scores.push(score),
            Err(e) => error!("Score buffer lock poisoned: {}", e),
        }
    }
}

impl NewLocationListener for TripLogger {
    fn on_new_location(&self, location: Location) {
        if !location.is_valid_fix() {
            return;
        }
        match self.state.location.lock() {
            Ok(mut current) => *current = Some(location),
            Err(e) => error!("Location lock poisoned: {}", e),
        }
    }
}

impl Drop for TripLogger {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_header() {
        let dir = TempDir::new().unwrap();
        let logger = TripLogger::create(dir.path(), TripLogger::interval_for(true)).unwrap();
        assert_eq!(logger.file_name(), "drismo-0001.csv");
        assert_eq!(lines(logger.path()), vec!["#Time,Score,Lat,Long,Speed,:6000"]);
        assert_eq!(TripLogger::interval_for(false), Duration::from_millis(2000));
    }

    #[test]
    fn test_next_file_name_skips_existing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("drismo-0001.csv"), "").unwrap();
        fs::write(dir.path().join("drismo-0002.csv"), "").unwrap();
        fs::write(dir.path().join("drismo-0004.csv"), "").unwrap();
        assert_eq!(next_file_name(dir.path()), "drismo-0003.csv");

        let logger = TripLogger::create(dir.path(), Duration::from_secs(2)).unwrap();
        assert_eq!(logger.file_name(), "drismo-0003.csv");
    }

    #[test]
    fn test_record_averages_scores() {
        let dir = TempDir::new().unwrap();
        let logger = TripLogger::create(dir.path(), Duration::from_secs(2)).unwrap();

        for score in [1600, 1601, 1605] {
            logger.on_quality_update(score);
        }
        let record = logger.write_record().unwrap().unwrap();
        assert_eq!(record.avg_score, 1602);
        assert_eq!(record.position, None);
        assert_eq!(logger.pending_scores(), 0);

        let lines = lines(logger.path());
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(",1602,,,"));
    }

    #[test]
    fn test_record_without_scores_is_zero() {
        let dir = TempDir::new().unwrap();
        let logger = TripLogger::create(dir.path(), Duration::from_secs(2)).unwrap();
        assert_eq!(logger.write_record().unwrap().unwrap().avg_score, 0);
    }

    #[test]
    fn test_record_uses_latest_location() {
        let dir = TempDir::new().unwrap();
        let logger = TripLogger::create(dir.path(), Duration::from_secs(2)).unwrap();
        logger.on_new_location(Location::new(60.1, 10.2, 5.0, 1));
        logger.on_new_location(Location::new(0.0, 0.0, 0.0, 2));
        logger.on_new_location(Location::new(60.5, 10.5, 7.5, 3));
        logger.on_quality_update(1500);

        let record = logger.write_record().unwrap().unwrap();
        let position = record.position.unwrap();
        assert_eq!(position.latitude, 60.5);
        assert_eq!(position.longitude, 10.5);
        assert_eq!(position.speed, 7.5);
        assert!(lines(logger.path())[1].ends_with(",1500,60.5,10.5,7.5"));
    }

    #[test]
    fn test_stop_closes_file() {
        let dir = TempDir::new().unwrap();
        let logger = TripLogger::create(dir.path(), Duration::from_millis(20)).unwrap();
        logger.start().unwrap();
        logger.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        logger.stop().unwrap();
        logger.stop().unwrap();

        assert!(!logger.is_logging());
        assert!(logger.write_record().unwrap().is_none());

        let written = lines(logger.path()).len();
        assert!(written >= 3);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(lines(logger.path()).len(), written);
    }

    #[test]
    fn test_record_time_counts_from_start() {
        let dir = TempDir::new().unwrap();
        let logger = TripLogger::create(dir.path(), Duration::from_secs(10)).unwrap();
        thread::sleep(Duration::from_millis(300));
        logger.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        logger.stop().unwrap();

        let lines = lines(logger.path());
        assert_eq!(lines.len(), 2);
        let elapsed: u64 = lines[1].split(',').next().unwrap().parse().unwrap();
        assert!(elapsed < 200, "first record at {} ms", elapsed);
    }

    #[test]
    fn test_closed_file_ends_writer_thread() {
        let dir = TempDir::new().unwrap();
        let logger = TripLogger::create(dir.path(), Duration::from_millis(20)).unwrap();
        logger.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(logger.is_writing());

        logger.state.close().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!logger.is_writing());
        logger.stop().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_failure_ends_session() {
        let dir = TempDir::new().unwrap();
        let logger = TripLogger::create(dir.path(), Duration::from_millis(20)).unwrap();
        let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
        *logger.state.file.lock().unwrap() = Some(BufWriter::new(full));

        logger.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!logger.is_logging());
        assert!(!logger.is_writing());
        assert!(logger.write_record().unwrap().is_none());
        logger.stop().unwrap();
    }
}
