//! Chair location history.

use crate::geometry::Coordinate;

/// One recorded position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationEntry {
    pub coordinate: Coordinate,

    /// Virtual-clock tick when the position was reached
    pub time: i64,

    /// Service timestamp (ms) once the position was acknowledged
    pub server_time: Option<i64>,

    /// False for placements, which do not count as travel
    pub traveled: bool,
}

/// Append-only position log of a chair with its cumulative travel distance.
#[derive(Debug, Clone)]
pub struct ChairLocation {
    initial: Coordinate,
    current: Coordinate,
    history: Vec<LocationEntry>,
    total_travel_distance: i64,
    dirty: bool,
}

impl ChairLocation {
    pub fn new(initial: Coordinate) -> Self {
        Self {
            initial,
            current: initial,
            history: Vec::new(),
            total_travel_distance: 0,
            dirty: false,
        }
    }

    pub fn initial(&self) -> Coordinate {
        self.initial
    }

    pub fn current(&self) -> Coordinate {
        self.current
    }

    pub fn history(&self) -> &[LocationEntry] {
        &self.history
    }

    /// Puts the chair at `coordinate` without counting the jump as travel.
    pub fn place_to(&mut self, coordinate: Coordinate, time: i64) {
        self.push(coordinate, time, false);
    }

    /// Moves the chair to `coordinate`, adding the distance to the total.
    pub fn move_to(&mut self, coordinate: Coordinate, time: i64) {
        self.total_travel_distance += i64::from(self.current.distance_to(coordinate));
        self.push(coordinate, time, true);
    }

    fn push(&mut self, coordinate: Coordinate, time: i64, traveled: bool) {
        self.history.push(LocationEntry {
            coordinate,
            time,
            server_time: None,
            traveled,
        });
        self.current = coordinate;
        self.dirty = true;
    }

    /// Stamps the latest entry with the time the service recorded it.
    pub fn set_server_time(&mut self, server_time: i64) {
        if let Some(entry) = self.history.last_mut() {
            entry.server_time = Some(server_time);
        }
    }

    pub fn total_travel_distance(&self) -> i64 {
        self.total_travel_distance
    }

    /// Travel distance the service can know about as of `until` (ms).
    ///
    /// Only acknowledged entries count; an unacknowledged entry folds into
    /// the next acknowledged one, the same way the service measures it.
    pub fn total_travel_distance_until(&self, until: i64) -> i64 {
        let mut sum = 0;
        let mut prev = self.initial;
        for entry in &self.history {
            let Some(server_time) = entry.server_time else {
                continue;
            };
            if server_time > until {
                break;
            }
            if entry.traveled {
                sum += i64::from(prev.distance_to(entry.coordinate));
            }
            prev = entry.coordinate;
        }
        sum
    }

    /// Service timestamp of the latest acknowledged entry.
    pub fn last_acknowledged_at(&self) -> Option<i64> {
        self.history.iter().rev().find_map(|e| e.server_time)
    }

    /// True if the position changed since the last report.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn reset_dirty(&mut self) {
        self.dirty = false;
    }
}
