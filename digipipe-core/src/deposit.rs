//! Energy deposit records.

use serde::{Deserialize, Serialize};

use crate::key::Mask;

/// Encoded detector cell identifier.
pub type CellId = u64;

/// Position in detector coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Energy deposited in one detector cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyDeposit {
    /// Deposited energy.
    pub energy: f64,
    /// Time of the deposit (earliest contribution).
    pub time: f64,
    /// Energy-weighted position of the deposit.
    pub position: Position,
    /// User flag bits.
    pub flag: u32,
    /// Event mask of the stream the deposit came from.
    pub mask: Mask,
}

impl EnergyDeposit {
    /// Creates a deposit with energy and time at the origin.
    #[must_use]
    pub fn new(energy: f64, time: f64) -> Self {
        Self {
            energy,
            time,
            ..Self::default()
        }
    }

    /// Sets the position.
    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// Sets the source mask.
    #[must_use]
    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = mask;
        self
    }

    /// Adds another contribution to the same cell.
    ///
    /// Energies add, the position becomes the energy-weighted mean, the time
    /// becomes the earliest of both and the flags are or-ed.
    pub fn update(&mut self, other: &EnergyDeposit) {
        let total = self.energy + other.energy;
        if total > 0.0 {
            let w1 = self.energy / total;
            let w2 = other.energy / total;
            self.position = Position::new(
                self.position.x * w1 + other.position.x * w2,
                self.position.y * w1 + other.position.y * w2,
                self.position.z * w1 + other.position.z * w2,
            );
        }
        self.energy = total;
        self.time = self.time.min(other.time);
        self.flag |= other.flag;
    }
}
