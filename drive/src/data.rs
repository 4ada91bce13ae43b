use std::fmt;

/// Axis index into a `[f32; 3]` acceleration vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A rotated acceleration vector stamped with the time it was received.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerationObject {
    pub rotated: [f32; 3],
    pub timestamp_ms: u64,
}

impl AccelerationObject {
    pub fn new(rotated: [f32; 3], timestamp_ms: u64) -> Self {
        AccelerationObject { rotated, timestamp_ms }
    }
}

/// One line of a trip file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripRecord {
    /// Milliseconds since the logger was started.
    pub elapsed_ms: u64,
    /// Integer mean of the scores received since the previous record.
    pub avg_score: i32,
    /// Latest valid fix, if the receiver had one.
    pub position: Option<TripPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f32,
}

impl TripRecord {
    /// Formats the record as a CSV line without the trailing newline.
    /// Missing positions leave the three GPS fields empty.
    pub fn to_csv(&self) -> String {
        match self.position {
            Some(p) => format!(
                "{},{},{},{},{}",
                self.elapsed_ms, self.avg_score, p.latitude, p.longitude, p.speed
            ),
            None => format!("{},{},,,", self.elapsed_ms, self.avg_score),
        }
    }
}

impl fmt::Display for TripRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_csv())
    }
}
