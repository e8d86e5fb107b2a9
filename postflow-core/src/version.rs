//! Engine version negotiation and feature gating.
//!
//! On connect the binding retrieves a semver-like triple from the engine.
//! Client methods that depend on newer engine behavior declare a minimum
//! version and go through [`EngineVersion::require`] before issuing the call.

use std::fmt;
use std::str::FromStr;

use semver::Version;

use crate::error::{Error, Result};

// feature minimums, checked at the call sites they gate
/// Scopings larger than [`LARGE_SCOPING_LEN`] entries.
pub const VERSION_LARGE_SCOPING: &str = "2.1";
/// Strings marshalled with an explicit byte length on the C ABI.
pub const VERSION_SIZED_STRINGS: &str = "8.0";
/// Pin aliases and workflow topology introspection.
pub const VERSION_PIN_ALIASES: &str = "10.0";
/// Named dimensionless units set as a (homogeneity, name) pair.
pub const VERSION_NAMED_UNITS: &str = "11.0";

pub const LARGE_SCOPING_LEN: usize = 2_000_000;

/// Version triple reported by a connected engine.
///
/// Parsing accepts one to three dot-separated components; missing components
/// are treated as zero, a fourth component is rejected.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct EngineVersion(Version);

impl EngineVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Checks the connected version against a required minimum, producing the
    /// typed gate error on failure.
    pub fn require(&self, required: &str) -> Result<()> {
        let min: EngineVersion = required.parse()?;
        if *self < min {
            return Err(Error::VersionNotSupported {
                required: required.to_string(),
                actual: self.to_string(),
            });
        }
        Ok(())
    }

    pub fn supports(&self, required: &str) -> bool {
        self.require(required).is_ok()
    }
}

impl FromStr for EngineVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() > 3 {
            return Err(Error::validation(format!(
                "version `{}` has more than three components",
                s
            )));
        }
        let mut nums = [0u64; 3];
        for (i, part) in parts.iter().enumerate() {
            nums[i] = part
                .parse()
                .map_err(|_| Error::validation(format!("invalid version component `{}`", part)))?;
        }
        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)
    }
}

/// Licensing profile active on the connected engine.
///
/// Operators outside the active context fail with a license error at
/// creation time.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    serde_repr::Deserialize_repr,
    serde_repr::Serialize_repr,
)]
#[repr(u8)]
pub enum ServerContext {
    Entry,
    Premium,
}

impl fmt::Display for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Premium => write!(f, "premium"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fills_missing_components_with_zero() {
        let v: EngineVersion = "5.0".parse().unwrap();
        assert_eq!(v, EngineVersion::new(5, 0, 0));
        let v: EngineVersion = "7".parse().unwrap();
        assert_eq!(v, EngineVersion::new(7, 0, 0));
    }

    #[test]
    fn parse_rejects_four_components() {
        assert!("1.2.3.4".parse::<EngineVersion>().is_err());
    }

    #[test]
    fn gate_reports_required_and_actual() {
        let actual = EngineVersion::new(4, 0, 0);
        match actual.require("5.0") {
            Err(Error::VersionNotSupported { required, actual }) => {
                assert_eq!(required, "5.0");
                assert_eq!(actual, "4.0.0");
            }
            other => panic!("expected version gate error, got {:?}", other),
        }
    }

    #[test]
    fn versions_cross_the_wire_intact() {
        let v = EngineVersion::new(11, 0, 2);
        let bytes = bincode::serialize(&v).unwrap();
        let back: EngineVersion = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn gate_passes_on_equal_version() {
        let actual = EngineVersion::new(10, 0, 0);
        assert!(actual.require("10.0").is_ok());
        assert!(actual.supports("2.1"));
        assert!(!actual.supports("11.0"));
    }
}
