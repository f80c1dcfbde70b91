//! Symbolic Sizes
//!
//! `SizeUnit` is a numeric value tagged with a unit (decimal and binary
//! byte multiples, raw bytes, 512-byte sectors, percent). `SpaceClaim` is
//! the symbolic size request carried by claims: an exact byte count, a
//! percentage of the container, or whatever remains.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Constants
// =============================================================================

/// Bytes per `s` unit, independent of the device's logical sector size
pub const SECTOR_BYTES: u64 = 512;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Keyword used for the `BIGGEST` claim
pub const REMAINING: &str = "remaining";

// =============================================================================
// Unit
// =============================================================================

/// Size unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    B,
    KB,
    MB,
    GB,
    TB,
    PB,
    EB,
    ZB,
    YB,
    KiB,
    MiB,
    GiB,
    TiB,
    PiB,
    EiB,
    ZiB,
    YiB,
    /// 512-byte sector
    Sector,
    /// Dimensionless percentage
    Percent,
}

impl Unit {
    pub const ALL: [Unit; 19] = [
        Unit::B,
        Unit::KB,
        Unit::MB,
        Unit::GB,
        Unit::TB,
        Unit::PB,
        Unit::EB,
        Unit::ZB,
        Unit::YB,
        Unit::KiB,
        Unit::MiB,
        Unit::GiB,
        Unit::TiB,
        Unit::PiB,
        Unit::EiB,
        Unit::ZiB,
        Unit::YiB,
        Unit::Sector,
        Unit::Percent,
    ];

    /// Canonical spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::B => "B",
            Unit::KB => "KB",
            Unit::MB => "MB",
            Unit::GB => "GB",
            Unit::TB => "TB",
            Unit::PB => "PB",
            Unit::EB => "EB",
            Unit::ZB => "ZB",
            Unit::YB => "YB",
            Unit::KiB => "KiB",
            Unit::MiB => "MiB",
            Unit::GiB => "GiB",
            Unit::TiB => "TiB",
            Unit::PiB => "PiB",
            Unit::EiB => "EiB",
            Unit::ZiB => "ZiB",
            Unit::YiB => "YiB",
            Unit::Sector => "s",
            Unit::Percent => "%",
        }
    }

    /// Bytes per unit, `None` for percent
    pub fn multiplier(&self) -> Option<f64> {
        let decimal = |power: i32| 1000f64.powi(power);
        let binary = |power: i32| 1024f64.powi(power);
        match self {
            Unit::B => Some(1.0),
            Unit::KB => Some(decimal(1)),
            Unit::MB => Some(decimal(2)),
            Unit::GB => Some(decimal(3)),
            Unit::TB => Some(decimal(4)),
            Unit::PB => Some(decimal(5)),
            Unit::EB => Some(decimal(6)),
            Unit::ZB => Some(decimal(7)),
            Unit::YB => Some(decimal(8)),
            Unit::KiB => Some(binary(1)),
            Unit::MiB => Some(binary(2)),
            Unit::GiB => Some(binary(3)),
            Unit::TiB => Some(binary(4)),
            Unit::PiB => Some(binary(5)),
            Unit::EiB => Some(binary(6)),
            Unit::ZiB => Some(binary(7)),
            Unit::YiB => Some(binary(8)),
            Unit::Sector => Some(SECTOR_BYTES as f64),
            Unit::Percent => None,
        }
    }

    /// Units whose byte conversion must land on a whole count
    fn requires_integral_value(&self) -> bool {
        matches!(self, Unit::B | Unit::Sector)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Unit::ALL
            .iter()
            .find(|unit| unit.as_str().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| Error::SizeParse(format!("unknown unit: {:?}", s)))
    }
}

// =============================================================================
// Size Unit
// =============================================================================

/// A numeric value paired with a unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SizeUnit {
    value: f64,
    unit: Unit,
}

impl SizeUnit {
    pub fn new(value: f64, unit: Unit) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::SizeParse(format!("invalid size value: {}", value)));
        }
        Ok(Self { value, unit })
    }

    /// Parse strings like `100 MiB`, `1.5GiB`, `2048 s`, `50%`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::SizeParse("empty size string".into()));
        }

        let num_end = s
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
            .map(|(i, _)| i)
            .unwrap_or(s.len());

        let num_str = &s[..num_end];
        let unit_str = s[num_end..].trim();

        if num_str.is_empty() {
            return Err(Error::SizeParse(format!("missing number in {:?}", s)));
        }
        if unit_str.is_empty() {
            return Err(Error::SizeParse(format!("missing unit in {:?}", s)));
        }

        let value: f64 = num_str
            .parse()
            .map_err(|_| Error::SizeParse(format!("invalid number: {}", num_str)))?;

        Self::new(value, unit_str.parse()?)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Convert to a byte count
    pub fn to_bytes(&self) -> Result<u64> {
        let multiplier = self.unit.multiplier().ok_or_else(|| {
            Error::SizeParse(format!("{} is not convertible to bytes", self))
        })?;

        if self.unit.requires_integral_value() && self.value.fract() != 0.0 {
            return Err(Error::SizeParse(format!(
                "fractional {} count: {}",
                self.unit, self
            )));
        }

        let bytes = (self.value * multiplier).round();
        if bytes > u64::MAX as f64 {
            return Err(Error::SizeParse(format!("{} overflows a byte count", self)));
        }
        Ok(bytes as u64)
    }

    /// Express a byte count in the given unit
    pub fn from_bytes(bytes: u64, unit: Unit) -> Result<Self> {
        let multiplier = unit.multiplier().ok_or_else(|| {
            Error::SizeParse("bytes cannot be expressed as a percentage".into())
        })?;
        Self::new(bytes as f64 / multiplier, unit)
    }

    /// Re-express this size in another byte unit
    pub fn in_unit(&self, unit: Unit) -> Result<Self> {
        Self::from_bytes(self.to_bytes()?, unit)
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

impl FromStr for SizeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SizeUnit {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<SizeUnit> for String {
    fn from(size: SizeUnit) -> Self {
        size.to_string()
    }
}

// =============================================================================
// Space Claim
// =============================================================================

/// A symbolic size request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SpaceClaim {
    /// Exact byte count
    Exact(u64),
    /// Percentage of the container, in (0, 100]
    Percentage(f64),
    /// Whatever is left once the other claims resolve
    Biggest,
}

impl SpaceClaim {
    pub fn exact(bytes: u64) -> Self {
        SpaceClaim::Exact(bytes)
    }

    pub fn percentage(percent: f64) -> Result<Self> {
        if !(percent > 0.0 && percent <= 100.0) {
            return Err(Error::SizeParse(format!(
                "percentage out of range (0, 100]: {}",
                percent
            )));
        }
        Ok(SpaceClaim::Percentage(percent))
    }

    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case(REMAINING) {
            return Ok(SpaceClaim::Biggest);
        }

        let size = SizeUnit::parse(s)?;
        match size.unit() {
            Unit::Percent => Self::percentage(size.value()),
            _ => Ok(SpaceClaim::Exact(size.to_bytes()?)),
        }
    }

    pub fn is_biggest(&self) -> bool {
        matches!(self, SpaceClaim::Biggest)
    }
}

impl fmt::Display for SpaceClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceClaim::Exact(bytes) => write!(f, "{} {}", bytes, Unit::B),
            SpaceClaim::Percentage(percent) => write!(f, "{} {}", percent, Unit::Percent),
            SpaceClaim::Biggest => f.write_str(REMAINING),
        }
    }
}

impl FromStr for SpaceClaim {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SpaceClaim {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<SpaceClaim> for String {
    fn from(claim: SpaceClaim) -> Self {
        claim.to_string()
    }
}

/// Whole MiB contained in a byte count
pub fn mib_floor(bytes: u64) -> u64 {
    bytes / MIB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_unit() {
        let size = SizeUnit::parse("100 MiB").unwrap();
        assert_eq!(size.unit(), Unit::MiB);
        assert_eq!(size.to_bytes().unwrap(), 100 * MIB);

        assert_eq!(SizeUnit::parse("1.5GiB").unwrap().to_bytes().unwrap(), 1536 * MIB);
        assert_eq!(SizeUnit::parse("2 KB").unwrap().to_bytes().unwrap(), 2000);
        assert_eq!(SizeUnit::parse("2048 s").unwrap().to_bytes().unwrap(), MIB);
        assert_eq!(SizeUnit::parse("10 mib").unwrap().unit(), Unit::MiB);

        assert!(SizeUnit::parse("").is_err());
        assert!(SizeUnit::parse("MiB").is_err());
        assert!(SizeUnit::parse("100").is_err());
        assert!(SizeUnit::parse("100 XB").is_err());
        assert!(SizeUnit::parse("-5 MiB").is_err());
    }

    #[test]
    fn test_fractional_sectors_rejected() {
        assert!(SizeUnit::parse("1.5 s").unwrap().to_bytes().is_err());
        assert!(SizeUnit::parse("50 %").unwrap().to_bytes().is_err());
    }

    #[test]
    fn test_huge_values_overflow() {
        assert!(SizeUnit::parse("100 YiB").unwrap().to_bytes().is_err());
    }

    #[test]
    fn test_canonical_round_trip() {
        for input in [
            "100 MiB", "1.5GiB", "0.3 GB", "2048 s", "7 B", "12 TiB", "3 kb", "250 MB",
        ] {
            let parsed = SizeUnit::parse(input).unwrap();
            let bytes = parsed.to_bytes().unwrap();
            let back = SizeUnit::from_bytes(bytes, parsed.unit()).unwrap();
            assert_eq!(back.to_string(), parsed.to_string(), "round trip of {}", input);
        }
    }

    #[test]
    fn test_in_unit() {
        let size = SizeUnit::parse("1 GiB").unwrap().in_unit(Unit::MiB).unwrap();
        assert_eq!(size.to_string(), "1024 MiB");
        let sectors = SizeUnit::parse("1 MiB").unwrap().in_unit(Unit::Sector).unwrap();
        assert_eq!(sectors.to_string(), "2048 s");
    }

    #[test]
    fn test_parse_space_claim() {
        assert_eq!(SpaceClaim::parse("remaining").unwrap(), SpaceClaim::Biggest);
        assert_eq!(SpaceClaim::parse("Remaining").unwrap(), SpaceClaim::Biggest);
        assert_eq!(SpaceClaim::parse("50%").unwrap(), SpaceClaim::Percentage(50.0));
        assert_eq!(SpaceClaim::parse("24 MiB").unwrap(), SpaceClaim::Exact(24 * MIB));

        assert!(SpaceClaim::parse("0%").is_err());
        assert!(SpaceClaim::parse("101 %").is_err());
        assert!(SpaceClaim::parse("lots").is_err());
    }

    #[test]
    fn test_space_claim_serde() {
        let claim: SpaceClaim = serde_json::from_str("\"25 %\"").unwrap();
        assert_eq!(claim, SpaceClaim::Percentage(25.0));
        assert_eq!(serde_json::to_string(&SpaceClaim::Biggest).unwrap(), "\"remaining\"");
        assert!(serde_json::from_str::<SpaceClaim>("\"twelve\"").is_err());
    }
}
