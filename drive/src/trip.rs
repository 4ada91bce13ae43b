//! Reads trip files written by [`TripLogger`](crate::trip_logger::TripLogger)
//! back into memory and summarises them.

use crate::data::{TripPosition, TripRecord};
use drive_traits::MonitorError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    interval_ms: u64,
    records: Vec<TripRecord>,
}

fn parse_error(line: usize, msg: impl std::fmt::Display) -> MonitorError {
    MonitorError::ParseError(format!("line {}: {}", line, msg))
}

fn parse_field<T: std::str::FromStr>(line: usize, name: &str, value: &str) -> Result<T, MonitorError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| parse_error(line, format!("invalid {} {:?}: {}", name, value, e)))
}

fn parse_record(line: usize, row: &str) -> Result<TripRecord, MonitorError> {
    let fields: Vec<&str> = row.split(',').collect();
    if fields.len() < 2 {
        return Err(parse_error(line, format!("expected at least 2 fields, got {}", fields.len())));
    }

    let elapsed_ms = parse_field(line, "time", fields[0])?;
    let avg_score = parse_field(line, "score", fields[1])?;

    let gps: Vec<&str> = fields[2..].iter().map(|f| f.trim()).collect();
    let position = match gps.as_slice() {
        [] | ["", "", ""] => None,
        [lat, long, speed] => Some(TripPosition {
            latitude: parse_field(line, "latitude", lat)?,
            longitude: parse_field(line, "longitude", long)?,
            speed: parse_field(line, "speed", speed)?,
        }),
        _ => return Err(parse_error(line, format!("expected 5 fields, got {}", fields.len()))),
    };

    Ok(TripRecord { elapsed_ms, avg_score, position })
}

/// Great-circle distance between two coordinates in metres.
pub fn haversine_m(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

impl Trip {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MonitorError> {
        let file = File::open(path.as_ref()).map_err(|e| {
            MonitorError::ReadError(format!("Failed to open {}: {}", path.as_ref().display(), e))
        })?;
        Self::parse(BufReader::new(file))
    }

    /// Parses a trip file. The first line carries the record interval after
    /// its last `:`, the second line is skipped, and records run until the
    /// end of input or a line starting with `#`.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, MonitorError> {
        let mut lines = reader.lines();

        let header = lines
            .next()
            .transpose()
            .map_err(|e| MonitorError::ReadError(e.to_string()))?
            .ok_or_else(|| parse_error(1, "missing header"))?;
        let interval = header
            .rsplit_once(':')
            .map(|(_, interval)| interval)
            .ok_or_else(|| parse_error(1, "header has no interval"))?;
        let interval_ms = parse_field(1, "interval", interval)?;

        let mut records = Vec::new();
        for (i, line) in lines.enumerate().skip(1) {
            let line = line.map_err(|e| MonitorError::ReadError(e.to_string()))?;
            if line.starts_with('#') {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            records.push(parse_record(i + 2, &line)?);
        }

        Ok(Trip { interval_ms, records })
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn records(&self) -> &[TripRecord] {
        &self.records
    }

    pub fn scores(&self) -> Vec<i32> {
        self.records.iter().map(|r| r.avg_score).collect()
    }

    /// Integer mean of all record scores, `None` for an empty trip.
    pub fn average_score(&self) -> Option<i32> {
        if self.records.is_empty() {
            return None;
        }
        let sum: i64 = self.records.iter().map(|r| r.avg_score as i64).sum();
        Some((sum / self.records.len() as i64) as i32)
    }

    pub fn max_speed(&self) -> f32 {
        self.records
            .iter()
            .filter_map(|r| r.position.map(|p| p.speed))
            .fold(0.0, f32::max)
    }

    /// Mean speed over the records where the vehicle was moving.
    pub fn average_speed(&self) -> f32 {
        let moving: Vec<f32> = self
            .records
            .iter()
            .filter_map(|r| r.position.map(|p| p.speed))
            .filter(|&s| s != 0.0)
            .collect();
        if moving.is_empty() {
            0.0
        } else {
            moving.iter().sum::<f32>() / moving.len() as f32
        }
    }

    pub fn has_gps(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r.position, Some(p) if p.longitude != 0.0))
    }

    /// Valid `(latitude, longitude)` points with consecutive repeats removed.
    pub fn gps_track(&self) -> Vec<(f64, f64)> {
        let mut track: Vec<(f64, f64)> = Vec::new();
        for p in self.records.iter().filter_map(|r| r.position) {
            if p.longitude == 0.0 {
                continue;
            }
            let point = (p.latitude, p.longitude);
            if track.last() != Some(&point) {
                track.push(point);
            }
        }
        track
    }

    pub fn length_m(&self) -> f64 {
        self.gps_track().windows(2).map(|w| haversine_m(w[0], w[1])).sum()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.interval_ms * self.records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    const TRIP: &str = "#Time,Score,Lat,Long,Speed,:2000\n\
                        0,0,,,\n\
                        2000,1600,60.0,10.0,0.0\n\
                        4000,1610,60.0,10.0,10.0\n\
                        6000,1590,60.001,10.0,20.0\n\
                        8000,1580,,,\n";

    #[test]
    fn test_parse() {
        let trip = Trip::parse(Cursor::new(TRIP)).unwrap();
        assert_eq!(trip.interval_ms(), 2000);
        assert_eq!(trip.scores(), vec![1600, 1610, 1590, 1580]);
        assert_eq!(trip.average_score(), Some(1595));
        assert_eq!(trip.duration(), Duration::from_secs(8));
        assert!(trip.records()[3].position.is_none());
    }

    #[test]
    fn test_speed_summary() {
        let trip = Trip::parse(Cursor::new(TRIP)).unwrap();
        assert_eq!(trip.max_speed(), 20.0);
        assert_eq!(trip.average_speed(), 15.0);
    }

    #[test]
    fn test_track_and_length() {
        let trip = Trip::parse(Cursor::new(TRIP)).unwrap();
        assert!(trip.has_gps());
        assert_eq!(trip.gps_track(), vec![(60.0, 10.0), (60.001, 10.0)]);
        // 0.001 degrees of latitude
        assert_relative_eq!(trip.length_m(), 111.195, epsilon = 0.01);
    }

    #[test]
    fn test_stops_at_comment_line() {
        let input = "#Time,Score,Lat,Long,Speed,:6000\nskipped\n6000,1600,,,\n#end\n12000,1,,,\n";
        let trip = Trip::parse(Cursor::new(input)).unwrap();
        assert_eq!(trip.interval_ms(), 6000);
        assert_eq!(trip.scores(), vec![1600]);
        assert!(!trip.has_gps());
        assert_eq!(trip.length_m(), 0.0);
        assert_eq!(trip.average_speed(), 0.0);
    }

    #[test]
    fn test_malformed_input() {
        let cases = [
            "",
            "#Time,Score\n",
            "#Time,Score,:abc\n",
            "#Time,Score,:2000\n\n2000\n",
            "#Time,Score,:2000\n\n2000,good,,,\n",
            "#Time,Score,:2000\n\n2000,1600,60.0\n",
        ];
        for case in cases {
            let err = Trip::parse(Cursor::new(case)).unwrap_err();
            assert!(matches!(err, MonitorError::ParseError(_)), "{:?}", case);
        }
    }

    #[test]
    fn test_empty_trip() {
        let trip = Trip::parse(Cursor::new("#Time,Score,Lat,Long,Speed,:2000\n")).unwrap();
        assert!(trip.records().is_empty());
        assert_eq!(trip.average_score(), None);
        assert_eq!(trip.max_speed(), 0.0);
    }
}
