use common::Side;

/// A protective stop level that may tighten but never loosen.
///
/// Longs only ever raise the level, shorts only ever lower it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopRatchet {
    side: Side,
    level: Option<f64>,
}

impl StopRatchet {
    pub fn new(side: Side) -> Self {
        Self { side, level: None }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn level(&self) -> Option<f64> {
        self.level
    }

    /// Offer a new level and return the ratcheted one.
    pub fn apply(&mut self, proposed: f64) -> f64 {
        let next = match (self.level, self.side) {
            (None, _) => proposed,
            (Some(current), Side::Long) => current.max(proposed),
            (Some(current), Side::Short) => current.min(proposed),
        };
        self.level = Some(next);
        next
    }

    /// True when `candidate` would move the stop against the position.
    pub fn is_regression(side: Side, current: f64, candidate: f64) -> bool {
        match side {
            Side::Long => candidate < current,
            Side::Short => candidate > current,
        }
    }
}
