//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Unit versions and version ranges.
//!
//! A [`Version`] has three numeric segments and an optional qualifier:
//!
//! ```
//! use libprov::metadata::Version;
//!
//! let v: Version = "1.2.3.v20240101".parse().unwrap();
//! assert_eq!(v.major, 1);
//! assert_eq!(v.qualifier, "v20240101");
//! assert!(v > "1.2.3".parse().unwrap());
//! ```
//!
//! Ranges use interval notation. A bare version means "this version or newer":
//!
//! ```
//! use libprov::metadata::{Version, VersionRange};
//!
//! let r: VersionRange = "[1.0,2.0)".parse().unwrap();
//! assert!(r.includes(&Version::new(1, 5, 0)));
//! assert!(!r.includes(&Version::new(2, 0, 0)));
//! let open: VersionRange = "1.0".parse().unwrap();
//! assert!(open.includes(&Version::new(9, 0, 0)));
//! ```

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version '{0}'")]
    #[diagnostic(
        code(prov::version_error::invalid_version),
        help("Versions look like major[.minor[.micro[.qualifier]]] with numeric segments.")
    )]
    InvalidVersion(String),

    #[error("invalid version range '{0}'")]
    #[diagnostic(
        code(prov::version_error::invalid_range),
        help("Use interval notation such as [1.0,2.0) or a single version for an open range.")
    )]
    InvalidRange(String),

    #[error("version range '{0}' has a lower bound above its upper bound")]
    #[diagnostic(
        code(prov::version_error::inverted_range),
        help("Swap the bounds or make the range inclusive on both ends.")
    )]
    InvertedRange(String),

    #[error("qualifier '{0}' cannot be expressed as a semver pre-release")]
    #[diagnostic(code(prov::version_error::semver))]
    Semver(String),
}

type Result<T> = std::result::Result<T, VersionError>;

/// Version of an installable unit. Numeric segments compare numerically and the
/// qualifier lexically, with no qualifier sorting first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub micro: u64,
    pub qualifier: String,
}

impl Version {
    pub fn new(major: u64, minor: u64, micro: u64) -> Self {
        Version {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// The lowest possible version, `0.0.0`.
    pub fn zero() -> Self {
        Version::default()
    }

    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionError::InvalidVersion(s.to_string()));
        }
        let mut parts = trimmed.splitn(4, '.');
        let mut numeric = [0u64; 3];
        for (idx, slot) in numeric.iter_mut().enumerate() {
            match parts.next() {
                Some(segment) => {
                    *slot = segment
                        .parse::<u64>()
                        .map_err(|_| VersionError::InvalidVersion(s.to_string()))?;
                }
                None if idx > 0 => break,
                None => return Err(VersionError::InvalidVersion(s.to_string())),
            }
        }
        let qualifier = parts.next().unwrap_or_default();
        if qualifier
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(VersionError::InvalidVersion(s.to_string()));
        }
        Ok(Version {
            major: numeric[0],
            minor: numeric[1],
            micro: numeric[2],
            qualifier: qualifier.to_string(),
        })
    }

    /// Converts into a semver version, mapping the qualifier onto the pre-release field.
    pub fn to_semver(&self) -> Result<semver::Version> {
        let mut v = semver::Version::new(self.major, self.minor, self.micro);
        if !self.qualifier.is_empty() {
            v.pre = semver::Prerelease::new(&self.qualifier)
                .map_err(|_| VersionError::Semver(self.qualifier.clone()))?;
        }
        Ok(v)
    }
}

impl From<semver::Version> for Version {
    fn from(v: semver::Version) -> Self {
        Version {
            major: v.major,
            minor: v.minor,
            micro: v.patch,
            qualifier: v.pre.as_str().to_string(),
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self> {
        Version::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

/// Interval over [`Version`]s. `max == None` means unbounded above.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    min: Version,
    include_min: bool,
    max: Option<Version>,
    include_max: bool,
    empty: bool,
}

impl VersionRange {
    /// Matches every version.
    pub fn any() -> Self {
        VersionRange {
            min: Version::zero(),
            include_min: true,
            max: None,
            include_max: false,
            empty: false,
        }
    }

    /// Matches nothing.
    pub fn empty() -> Self {
        VersionRange {
            min: Version::zero(),
            include_min: false,
            max: Some(Version::zero()),
            include_max: false,
            empty: true,
        }
    }

    /// `[v,v]`
    pub fn exact(v: &Version) -> Self {
        VersionRange {
            min: v.clone(),
            include_min: true,
            max: Some(v.clone()),
            include_max: true,
            empty: false,
        }
    }

    /// `[v,∞)`
    pub fn at_least(v: &Version) -> Self {
        VersionRange {
            min: v.clone(),
            include_min: true,
            max: None,
            include_max: false,
            empty: false,
        }
    }

    pub fn new(
        min: Version,
        include_min: bool,
        max: Option<Version>,
        include_max: bool,
    ) -> Result<Self> {
        if let Some(upper) = &max {
            let inverted = match min.cmp(upper) {
                Ordering::Greater => true,
                Ordering::Equal => !(include_min && include_max),
                Ordering::Less => false,
            };
            if inverted {
                let text = format!(
                    "{}{},{}{}",
                    if include_min { '[' } else { '(' },
                    min,
                    upper,
                    if include_max { ']' } else { ')' }
                );
                return Err(VersionError::InvertedRange(text));
            }
        }
        Ok(VersionRange {
            min,
            include_min,
            max,
            include_max,
            empty: false,
        })
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(VersionRange::any());
        }
        if s == "()" {
            return Ok(VersionRange::empty());
        }
        let first = s.chars().next().unwrap_or(' ');
        if first != '[' && first != '(' {
            return Ok(VersionRange::at_least(&Version::parse(s)?));
        }
        let include_min = first == '[';
        let include_max = match s.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(VersionError::InvalidRange(s.to_string())),
        };
        let inner = &s[1..s.len() - 1];
        let (low, high) = inner
            .split_once(',')
            .ok_or_else(|| VersionError::InvalidRange(s.to_string()))?;
        let min = Version::parse(low).map_err(|_| VersionError::InvalidRange(s.to_string()))?;
        if high.trim().is_empty() {
            return VersionRange::new(min, include_min, None, false);
        }
        let max = Version::parse(high).map_err(|_| VersionError::InvalidRange(s.to_string()))?;
        VersionRange::new(min, include_min, Some(max), include_max)
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn is_any(&self) -> bool {
        !self.empty && self.include_min && self.min == Version::zero() && self.max.is_none()
    }

    pub fn min(&self) -> &Version {
        &self.min
    }

    pub fn max(&self) -> Option<&Version> {
        self.max.as_ref()
    }

    pub fn includes(&self, v: &Version) -> bool {
        if self.empty {
            return false;
        }
        let above_min = match v.cmp(&self.min) {
            Ordering::Greater => true,
            Ordering::Equal => self.include_min,
            Ordering::Less => false,
        };
        let below_max = match &self.max {
            None => true,
            Some(max) => match v.cmp(max) {
                Ordering::Less => true,
                Ordering::Equal => self.include_max,
                Ordering::Greater => false,
            },
        };
        above_min && below_max
    }

    /// True when every version in `self` is also in `other`.
    pub fn is_included_in(&self, other: &VersionRange) -> bool {
        if self.empty {
            return true;
        }
        if other.empty {
            return false;
        }
        let lower_ok = match self.min.cmp(&other.min) {
            Ordering::Greater => true,
            Ordering::Equal => other.include_min || !self.include_min,
            Ordering::Less => false,
        };
        let upper_ok = match (&self.max, &other.max) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(mine), Some(theirs)) => match mine.cmp(theirs) {
                Ordering::Less => true,
                Ordering::Equal => other.include_max || !self.include_max,
                Ordering::Greater => false,
            },
        };
        lower_ok && upper_ok
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        VersionRange::any()
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        VersionRange::parse(s)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self> {
        VersionRange::parse(&s)
    }
}

impl From<VersionRange> for String {
    fn from(r: VersionRange) -> Self {
        r.to_string()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            return write!(f, "()");
        }
        match &self.max {
            None if self.include_min => write!(f, "{}", self.min),
            None => write!(f, "({},)", self.min),
            Some(max) => write!(
                f,
                "{}{},{}{}",
                if self.include_min { '[' } else { '(' },
                self.min,
                max,
                if self.include_max { ']' } else { ')' }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).expect("version")
    }

    #[test]
    fn parse_pads_missing_segments() {
        assert_eq!(v("1"), Version::new(1, 0, 0));
        assert_eq!(v("1.2"), Version::new(1, 2, 0));
        assert_eq!(v("1.2.3.beta").qualifier, "beta");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("a.b").is_err());
        assert!(Version::parse("1.2.3.has space").is_err());
    }

    #[test]
    fn qualifier_orders_after_plain_release() {
        assert!(v("1.0.0") < v("1.0.0.a"));
        assert!(v("1.0.0.a") < v("1.0.0.b"));
        assert!(v("1.0.0.z") < v("1.0.1"));
        assert!(v("1.10.0") > v("1.9.0"));
    }

    #[test]
    fn range_bounds_are_honoured() {
        let r = VersionRange::parse("(1.0,2.0]").expect("range");
        assert!(!r.includes(&v("1.0")));
        assert!(r.includes(&v("1.0.0.x")));
        assert!(r.includes(&v("2.0")));
        assert!(!r.includes(&v("2.0.1")));
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        assert!(matches!(
            VersionRange::parse("[2.0,1.0]"),
            Err(VersionError::InvertedRange(_))
        ));
        assert!(VersionRange::parse("[1.0,1.0)").is_err());
        assert!(VersionRange::parse("[1.0,1.0]").is_ok());
    }

    #[test]
    fn empty_and_any() {
        assert!(!VersionRange::empty().includes(&Version::zero()));
        assert!(VersionRange::any().includes(&Version::zero()));
        assert!(VersionRange::parse("").expect("any").is_any());
        assert!(VersionRange::parse("0.0.0").expect("any").is_any());
    }

    #[test]
    fn inclusion_between_ranges() {
        let narrow = VersionRange::parse("[1.0,1.0]").expect("range");
        let wide = VersionRange::parse("[1.0,2.0)").expect("range");
        assert!(narrow.is_included_in(&wide));
        assert!(!wide.is_included_in(&narrow));
        assert!(wide.is_included_in(&VersionRange::any()));
        assert!(!VersionRange::any().is_included_in(&wide));
    }

    #[test]
    fn display_round_trips_through_serde() {
        let r = VersionRange::parse("[1.0,2.0)").expect("range");
        let json = serde_json::to_string(&r).expect("serialize");
        assert_eq!(json, "\"[1.0.0,2.0.0)\"");
        let back: VersionRange = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, r);
    }

    #[test]
    fn semver_interop() {
        let sv = semver::Version::parse("1.2.3-rc1").expect("semver");
        let ours = Version::from(sv.clone());
        assert_eq!(ours.qualifier, "rc1");
        assert_eq!(ours.to_semver().expect("to semver"), sv);
    }
}
