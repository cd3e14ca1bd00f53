//! Coordinate and region geometry.
//!
//! All distances are Manhattan distances on an integer grid.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the integer grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to `other`.
    pub fn distance_to(&self, other: Coordinate) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Returns a random coordinate exactly `distance` away from `self`.
    ///
    /// The distance is split randomly between the axes and the quadrant is
    /// picked uniformly.
    pub fn random_away_from<R: Rng + ?Sized>(&self, distance: i32, rng: &mut R) -> Coordinate {
        let distance = distance.max(0);
        let dx = rng.gen_range(0..=distance);
        let dy = distance - dx;
        let sx = if rng.gen_bool(0.5) { 1 } else { -1 };
        let sy = if rng.gen_bool(0.5) { 1 } else { -1 };
        Coordinate::new(self.x + sx * dx, self.y + sy * dy)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// A rectangular area that anchors users, owners and chairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Human readable name, used only for reporting
    pub name: String,

    /// Center of the region
    pub offset: Coordinate,

    /// Extent along the x axis
    pub width: i32,

    /// Extent along the y axis
    pub height: i32,
}

impl Region {
    pub fn new(name: impl Into<String>, offset: Coordinate, width: i32, height: i32) -> Self {
        Self {
            name: name.into(),
            offset,
            width,
            height,
        }
    }

    /// Inclusive x range covered by the region.
    pub fn range_x(&self) -> (i32, i32) {
        (self.offset.x - self.width / 2, self.offset.x + self.width / 2)
    }

    /// Inclusive y range covered by the region.
    pub fn range_y(&self) -> (i32, i32) {
        (self.offset.y - self.height / 2, self.offset.y + self.height / 2)
    }

    /// Returns true if `c` lies inside the region bounds.
    pub fn contains(&self, c: Coordinate) -> bool {
        let (min_x, max_x) = self.range_x();
        let (min_y, max_y) = self.range_y();
        (min_x..=max_x).contains(&c.x) && (min_y..=max_y).contains(&c.y)
    }

    /// Uniformly random point inside the region.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Coordinate {
        Coordinate::new(
            self.offset.x + rng.gen_range(0..self.width.max(1)) - self.width / 2,
            self.offset.y + rng.gen_range(0..self.height.max(1)) - self.height / 2,
        )
    }

    /// The two regions a benchmark run starts with.
    pub fn defaults() -> Vec<Region> {
        vec![
            Region::new("Chair Town", Coordinate::new(0, 0), 100, 100),
            Region::new("Cozy Town", Coordinate::new(300, 300), 100, 100),
        ]
    }
}
