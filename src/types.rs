use std::fmt;

use serde::{Deserialize, Serialize};

/// Durable identifier assigned by the store when a run is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimulationId(pub i64);

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed interval `[min, max]` a uniform draw is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Bounds { min, max }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_and_midpoint() {
        let b = Bounds::new(10_000.0, 600_000.0);
        assert_eq!(b.width(), 590_000.0);
        assert_eq!(b.midpoint(), 305_000.0);
    }

    #[test]
    fn degenerate_bounds_have_zero_width() {
        let b = Bounds::new(7.5, 7.5);
        assert_eq!(b.width(), 0.0);
        assert_eq!(b.midpoint(), 7.5);
    }
}
