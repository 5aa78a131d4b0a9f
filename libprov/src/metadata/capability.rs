//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::metadata::{Environment, Filter, MetadataError, Version, VersionRange};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace of the capability every unit provides for its own id.
pub const UNIT_NAMESPACE: &str = "prov.unit";

/// A (namespace, name, version) a unit offers to others.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProvidedCapability {
    pub namespace: String,
    pub name: String,
    pub version: Version,
}

impl ProvidedCapability {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        ProvidedCapability {
            namespace: namespace.into(),
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ProvidedCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.name, self.version)
    }
}

#[derive(Deserialize)]
struct RawRequirement {
    namespace: String,
    name: String,
    #[serde(default)]
    range: VersionRange,
    #[serde(default)]
    filter: Option<Filter>,
    #[serde(default = "one")]
    min: u32,
    #[serde(default = "one")]
    max: u32,
    #[serde(default)]
    multiple: bool,
    #[serde(default = "yes")]
    greedy: bool,
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

/// Constraint a unit places on the presence of some capability.
///
/// `min == 0` makes the requirement optional and `max == 0` turns it into a negative
/// requirement that no provider may be selected. Cardinalities above one need `multiple`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawRequirement")]
pub struct Requirement {
    namespace: String,
    name: String,
    range: VersionRange,
    filter: Option<Filter>,
    min: u32,
    max: u32,
    multiple: bool,
    greedy: bool,
}

impl TryFrom<RawRequirement> for Requirement {
    type Error = MetadataError;

    fn try_from(raw: RawRequirement) -> Result<Self, MetadataError> {
        let mut req = Requirement::new(raw.namespace, raw.name, raw.range)
            .with_cardinality(raw.min, raw.max, raw.multiple)?;
        req.filter = raw.filter;
        req.greedy = raw.greedy;
        Ok(req)
    }
}

impl Requirement {
    /// A hard, greedy, single-provider requirement.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, range: VersionRange) -> Self {
        Requirement {
            namespace: namespace.into(),
            name: name.into(),
            range,
            filter: None,
            min: 1,
            max: 1,
            multiple: false,
            greedy: true,
        }
    }

    /// Requirement on the unit with the given id.
    pub fn unit(id: impl Into<String>, range: VersionRange) -> Self {
        Requirement::new(UNIT_NAMESPACE, id, range)
    }

    /// Requirement on exactly one version of a unit.
    pub fn strict(id: impl Into<String>, version: &Version) -> Self {
        Requirement::unit(id, VersionRange::exact(version))
    }

    pub fn optional(mut self) -> Self {
        self.min = 0;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn non_greedy(mut self) -> Self {
        self.greedy = false;
        self
    }

    /// No provider of this capability may be selected alongside the requiring unit.
    pub fn negative(mut self) -> Self {
        self.min = 0;
        self.max = 0;
        self
    }

    pub fn with_cardinality(mut self, min: u32, max: u32, multiple: bool) -> Result<Self, MetadataError> {
        let invalid = (max != 0 && min > max) || (!multiple && (min > 1 || max > 1)) || (max == 0 && min != 0);
        if invalid {
            return Err(MetadataError::InvalidCardinality {
                requirement: format!("{}/{}", self.namespace, self.name),
                min,
                max,
            });
        }
        self.min = min;
        self.max = max;
        self.multiple = multiple;
        Ok(self)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> &VersionRange {
        &self.range
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_optional(&self) -> bool {
        self.min == 0
    }

    pub fn is_negative(&self) -> bool {
        self.max == 0
    }

    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    pub fn is_greedy(&self) -> bool {
        self.greedy
    }

    /// Whether the requirement applies in `env`; requirements without a filter always apply.
    pub fn is_applicable(&self, env: &Environment) -> bool {
        self.filter.as_ref().map(|f| f.matches(env)).unwrap_or(true)
    }

    pub fn is_satisfied_by(&self, capability: &ProvidedCapability) -> bool {
        capability.namespace == self.namespace
            && capability.name == self.name
            && self.range.includes(&capability.version)
    }

    /// Same requirement with a different version range.
    pub fn with_range(&self, range: VersionRange) -> Self {
        Requirement {
            range,
            ..self.clone()
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace == UNIT_NAMESPACE {
            write!(f, "{} {}", self.name, self.range)?;
        } else {
            write!(f, "{}/{} {}", self.namespace, self.name, self.range)?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " {}", filter)?;
        }
        if self.is_negative() {
            write!(f, " (must not be present)")?;
        } else if self.is_optional() {
            write!(f, " (optional)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinality_invariants() {
        let base = Requirement::unit("a", VersionRange::any());
        assert!(base.clone().with_cardinality(0, 1, false).is_ok());
        assert!(base.clone().with_cardinality(2, 5, false).is_err());
        assert!(base.clone().with_cardinality(2, 5, true).is_ok());
        assert!(base.clone().with_cardinality(3, 2, true).is_err());
        assert!(base.clone().with_cardinality(1, 0, false).is_err());
        assert!(base.with_cardinality(0, 0, false).expect("negative").is_negative());
    }

    #[test]
    fn optional_means_min_zero() {
        let req = Requirement::unit("a", VersionRange::any()).optional();
        assert!(req.is_optional());
        assert_eq!(Requirement::min(&req), 0);
    }

    #[test]
    fn matches_capabilities() {
        let req = Requirement::unit("b", VersionRange::parse("[1.0,2.0)").expect("range"));
        assert!(req.is_satisfied_by(&ProvidedCapability::new(UNIT_NAMESPACE, "b", Version::new(1, 4, 0))));
        assert!(!req.is_satisfied_by(&ProvidedCapability::new(UNIT_NAMESPACE, "b", Version::new(2, 0, 0))));
        assert!(!req.is_satisfied_by(&ProvidedCapability::new("os.package", "b", Version::new(1, 4, 0))));
    }

    #[test]
    fn deserialize_validates() {
        let ok: Requirement = serde_json::from_str(
            r#"{"namespace":"prov.unit","name":"a","range":"[1.0,2.0)","filter":"(os=linux)","min":0}"#,
        )
        .expect("requirement");
        assert!(ok.is_optional());
        assert!(ok.filter().is_some());
        let bad = serde_json::from_str::<Requirement>(
            r#"{"namespace":"prov.unit","name":"a","min":2,"max":2}"#,
        );
        assert!(bad.is_err());
    }
}
