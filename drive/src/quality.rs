//! Driving quality rating.
//!
//! The rater keeps the rotated acceleration of the last half second and,
//! four times per second, compares how much each axis varied and how large
//! the current force is against fixed "bad" and "ugly" thresholds. Each
//! comparison is an Elo-style match result that moves the score up or down.

use crate::data::{AccelerationObject, Axis};
use crate::worker::Worker;
use drive_traits::{same_listener, FilteredAccelerationListener, MonitorError, QualityListener};
use log::{debug, error};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Length of the sliding window (ms).
pub const MAX_WINDOW_MS: u64 = 500;

/// Delta-score weight for how much an axis changed within the window.
pub const DIFF_POINTS: f32 = (100.0 / 3.0) * 0.7;

/// Delta-score weight for the force currently acting on an axis.
pub const CONST_POINTS: f32 = (100.0 / 3.0) * 0.3;

//                                  X     Y     Z
pub const THRESHOLD_BAD: [f32; 3] = [2.0, 1.0, 0.8];
pub const THRESHOLD_UGLY: [f32; 3] = [3.0, 2.2, 1.6];

/// The forward axis must exceed this for the car to count as moving.
pub const MOTION_THRESHOLD: f32 = 0.1;

/// Standard gravity (m/s²).
pub const STANDARD_GRAVITY: f32 = 9.80665;

/// Score bands.
pub struct Quality;

impl Quality {
    pub const MAX_SCORE: i32 = 1670;
    pub const EXCELLENT_SCORE: i32 = 1650;
    pub const GOOD_SCORE: i32 = 1550;
    pub const OK_SCORE: i32 = 1400;
    pub const MIN_SCORE: i32 = 1250;
    pub const INITIAL_SCORE: i32 = 1600;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityGrade {
    Excellent,
    Good,
    Ok,
    Bad,
}

impl QualityGrade {
    pub fn from_score(score: i32) -> Self {
        if score > Quality::EXCELLENT_SCORE {
            QualityGrade::Excellent
        } else if score > Quality::GOOD_SCORE {
            QualityGrade::Good
        } else if score > Quality::OK_SCORE {
            QualityGrade::Ok
        } else {
            QualityGrade::Bad
        }
    }
}

/// Classifies `vector` as good, bad or ugly and returns the resulting score
/// change for a driver currently rated `rating`.
pub fn delta_score(vector: f32, bad: f32, ugly: f32, points: f32, rating: i32) -> f32 {
    if vector > ugly || vector < -ugly {
        calculate_delta_score(0.0, points * 3.0, rating)
    } else if vector > bad || vector < -bad {
        calculate_delta_score(0.5, points * 2.0, rating)
    } else {
        calculate_delta_score(1.0, points / 2.0, rating)
    }
}

/// Elo update: `points * (outcome - expected)`, where the expected outcome
/// compares `rating` with the rating `1000 * outcome + 500` that the
/// observed outcome stands for.
pub fn calculate_delta_score(outcome: f32, points: f32, rating: i32) -> f32 {
    let relative_score = 1000.0 * outcome + 500.0;
    let exponent = (relative_score - rating as f32) as f64 / 100.0;
    let expected = (1.0 / (1.0 + 10f64.powf(exponent))) as f32;

    points * (outcome - expected)
}

type ListenerList = Vec<Arc<dyn QualityListener>>;

struct RaterState {
    window: Mutex<VecDeque<AccelerationObject>>,
    rating: AtomicI32,
    listeners: RwLock<ListenerList>,
}

impl RaterState {
    fn insert(&self, current: AccelerationObject) {
        let mut window = match self.window.lock() {
            Ok(window) => window,
            Err(e) => {
                error!("Quality window lock poisoned: {}", e);
                return;
            }
        };

        // Drop timed-out entries from the back, keeping the last one popped.
        if let Some(mut last) = window.pop_back() {
            while !window.is_empty()
                && current.timestamp_ms.saturating_sub(last.timestamp_ms) > MAX_WINDOW_MS
            {
                if let Some(next) = window.pop_back() {
                    last = next;
                }
            }
            window.push_back(last);
        }
        window.push_front(current);
    }

    /// The window lock is held across the whole read-modify-write of the
    /// rating.
    fn evaluate(&self) -> i32 {
        let window = match self.window.lock() {
            Ok(window) => window,
            Err(e) => {
                error!("Quality window lock poisoned: {}", e);
                return self.rating.load(Ordering::SeqCst);
            }
        };
        let rating = self.rating.load(Ordering::SeqCst);

        let Some(newest) = window.front() else {
            return rating;
        };
        let current = newest.rotated;
        let forward = current[Axis::Y.index()];
        if forward <= MOTION_THRESHOLD && forward >= -MOTION_THRESHOLD {
            return rating;
        }

        let mut min = current;
        let mut max = current;
        for previous in window.iter() {
            for i in 0..3 {
                let value = previous.rotated[i];
                if min[i] > value {
                    min[i] = value;
                } else if max[i] < value {
                    max[i] = value;
                }
            }
        }

        let mut delta = 0.0f32;
        for axis in Axis::ALL {
            let i = axis.index();
            let diff = max[i] - min[i];
            delta += delta_score(diff, THRESHOLD_BAD[i], THRESHOLD_UGLY[i], DIFF_POINTS, rating);

            let value = match axis {
                Axis::Z => current[i] - STANDARD_GRAVITY,
                _ => current[i],
            };
            delta += delta_score(value, THRESHOLD_BAD[i], THRESHOLD_UGLY[i], CONST_POINTS, rating);
        }

        let mut updated = (rating as f32 + delta) as i32;
        if delta < 0.0 && updated < Quality::MIN_SCORE {
            updated = Quality::MIN_SCORE;
        }
        self.rating.store(updated, Ordering::SeqCst);
        updated
    }

    fn tick(&self) {
        let score = self.evaluate();

        let listeners: ListenerList = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(e) => {
                error!("Quality listener lock poisoned: {}", e);
                return;
            }
        };
        for listener in listeners {
            listener.on_quality_update(score);
        }
    }
}

/// Rates driving smoothness from rotated acceleration vectors.
///
/// Register it with an [`AccelerationPipeline`](crate::AccelerationPipeline)
/// to feed it, and register [`QualityListener`]s to receive the score. The
/// rating thread runs only while at least one quality listener is
/// registered.
pub struct QualityRater {
    state: Arc<RaterState>,
    worker: Mutex<Option<Worker>>,
    epoch: Instant,
}

impl QualityRater {
    pub fn new() -> Arc<Self> {
        Arc::new(QualityRater {
            state: Arc::new(RaterState {
                window: Mutex::new(VecDeque::new()),
                rating: AtomicI32::new(Quality::INITIAL_SCORE),
                listeners: RwLock::new(Vec::new()),
            }),
            worker: Mutex::new(None),
            epoch: Instant::now(),
        })
    }

    /// Time between two evaluations.
    pub fn tick_period() -> Duration {
        Duration::from_millis(MAX_WINDOW_MS / 2)
    }

    /// Adds a listener. The first listener resets the score to 1600 and
    /// starts the rating thread.
    pub fn register_listener(&self, listener: Arc<dyn QualityListener>) -> Result<(), MonitorError> {
        let mut worker = self.worker.lock()?;
        let count = {
            let mut listeners = self.state.listeners.write()?;
            if !listeners.iter().any(|l| same_listener(l, &listener)) {
                listeners.push(listener);
            }
            listeners.len()
        };
        debug!("Quality listener registered ({} total)", count);

        if worker.is_none() {
            self.state.rating.store(Quality::INITIAL_SCORE, Ordering::SeqCst);
            let state = Arc::clone(&self.state);
            *worker = Some(Worker::spawn("quality-rater", Self::tick_period(), move || {
                state.tick();
                true
            })?);
            debug!("Quality rating started");
        }
        Ok(())
    }

    /// Removes a listener. Removing the last one stops the rating thread
    /// before returning and clears the window.
    pub fn unregister_listener(&self, listener: &Arc<dyn QualityListener>) -> Result<(), MonitorError> {
        let mut worker = self.worker.lock()?;
        let count = {
            let mut listeners = self.state.listeners.write()?;
            listeners.retain(|l| !same_listener(l, listener));
            listeners.len()
        };
        debug!("Quality listener removed ({} left)", count);

        if count == 0 {
            if let Some(running) = worker.take() {
                running.stop();
                self.state.window.lock()?.clear();
                debug!("Quality rating stopped");
            }
        }
        Ok(())
    }

    /// Adds a rotated vector received at `timestamp_ms` to the window.
    pub fn push(&self, rotated: [f32; 3], timestamp_ms: u64) {
        self.state.insert(AccelerationObject::new(rotated, timestamp_ms));
    }

    /// Runs one evaluation and returns the updated score.
    pub fn evaluate(&self) -> i32 {
        self.state.evaluate()
    }

    pub fn score(&self) -> i32 {
        self.state.rating.load(Ordering::SeqCst)
    }

    pub fn is_rating(&self) -> bool {
        self.worker.lock().map(|w| w.is_some()).unwrap_or(false)
    }

    pub fn window_len(&self) -> usize {
        self.state.window.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Timestamps in the window, newest first.
    pub fn window_timestamps(&self) -> Vec<u64> {
        self.state
            .window
            .lock()
            .map(|w| w.iter().map(|o| o.timestamp_ms).collect())
            .unwrap_or_default()
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

impl FilteredAccelerationListener for QualityRater {
    fn on_filtered_acceleration(&self, _filtered: &[f32; 3], rotated: &[f32; 3]) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.push(*rotated, now);
    }
}
