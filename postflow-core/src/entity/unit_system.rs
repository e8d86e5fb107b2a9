//! Unit systems.

use std::fmt;

/// Seven base-unit names plus a numeric id identifying a unit convention.
///
/// Unlike the other entities this is plain client-side data: it is small,
/// immutable and travels by value when connected to an operator pin.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct UnitSystem {
    pub id: i32,
    pub name: String,
    /// Base units in the order length, mass, time, temperature, electric
    /// current, amount of substance, luminous intensity.
    pub base_units: [String; 7],
}

impl UnitSystem {
    pub fn new(id: i32, name: &str, base_units: [&str; 7]) -> Self {
        Self {
            id,
            name: name.to_string(),
            base_units: [
                base_units[0].to_string(),
                base_units[1].to_string(),
                base_units[2].to_string(),
                base_units[3].to_string(),
                base_units[4].to_string(),
                base_units[5].to_string(),
                base_units[6].to_string(),
            ],
        }
    }

    /// SI with meters, kilograms, seconds and kelvin.
    pub fn solver_mks() -> Self {
        Self::new(11, "solver_mks", ["m", "kg", "s", "K", "A", "mol", "cd"])
    }

    /// Consistent millimeter-tonne-second convention.
    pub fn solver_nmm() -> Self {
        Self::new(12, "solver_nmm", ["mm", "t", "s", "K", "A", "mol", "cd"])
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (id {})", self.name, self.id)
    }
}
