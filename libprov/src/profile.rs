//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::metadata::{Environment, InstallableUnit, Queryable, UnitQuery, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString};

/// Per-unit property recording why a unit is installed.
pub const PROP_INCLUSION_RULES: &str = "planner.inclusionRules";
/// Profile property holding the environment as comma separated `key=value` pairs.
pub const PROP_ENVIRONMENTS: &str = "planner.environments";
/// Profile property; `false` disables meta-requirement handling for the profile.
pub const PROP_RESOLVE_META_REQUIREMENTS: &str = "planner.resolveMetaRequirements";

/// How a unit was requested. Units without a rule are only installed as dependencies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum InclusionRule {
    #[strum(serialize = "STRICT")]
    #[serde(rename = "STRICT")]
    Strict,
    #[strum(serialize = "OPTIONAL")]
    #[serde(rename = "OPTIONAL")]
    Optional,
}

/// Snapshot of an installation: the installed units with their properties.
///
/// The planner only reads profiles; the plan it returns describes the mutations.
#[derive(Debug, Clone)]
pub struct Profile {
    id: String,
    timestamp: i64,
    units: BTreeSet<Arc<InstallableUnit>>,
    unit_properties: BTreeMap<(String, Version), BTreeMap<String, String>>,
    properties: BTreeMap<String, String>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Profile {
            id: id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            units: BTreeSet::new(),
            unit_properties: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn add_unit(&mut self, unit: Arc<InstallableUnit>) {
        self.units.replace(unit);
    }

    /// Adds a unit and records its inclusion rule.
    pub fn add_root(&mut self, unit: Arc<InstallableUnit>, rule: InclusionRule) {
        self.set_unit_property(&unit, PROP_INCLUSION_RULES, rule.as_ref());
        self.add_unit(unit);
    }

    pub fn remove_unit(&mut self, unit: &InstallableUnit) {
        self.units.remove(unit);
        self.unit_properties
            .remove(&(unit.id().to_string(), unit.version().clone()));
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn set_unit_property(
        &mut self,
        unit: &InstallableUnit,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.unit_properties
            .entry((unit.id().to_string(), unit.version().clone()))
            .or_default()
            .insert(key.into(), value.into());
    }

    pub fn units(&self) -> impl Iterator<Item = &Arc<InstallableUnit>> {
        self.units.iter()
    }

    pub fn unit_set(&self) -> &BTreeSet<Arc<InstallableUnit>> {
        &self.units
    }

    pub fn contains(&self, unit: &InstallableUnit) -> bool {
        self.units.contains(unit)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn unit_properties(&self, unit: &InstallableUnit) -> Option<&BTreeMap<String, String>> {
        self.unit_properties
            .get(&(unit.id().to_string(), unit.version().clone()))
    }

    pub fn unit_property(&self, unit: &InstallableUnit, key: &str) -> Option<&str> {
        self.unit_properties(unit)
            .and_then(|props| props.get(key))
            .map(String::as_str)
    }

    /// The recorded inclusion rule; unparsable values are treated as strict.
    pub fn inclusion_rule(&self, unit: &InstallableUnit) -> Option<InclusionRule> {
        self.unit_property(unit, PROP_INCLUSION_RULES)
            .map(|rule| rule.parse().unwrap_or(InclusionRule::Strict))
    }

    pub fn environment(&self) -> Environment {
        self.property(PROP_ENVIRONMENTS)
            .map(Environment::from_spec)
            .unwrap_or_default()
    }

    pub fn resolves_meta_requirements(&self) -> bool {
        self.property(PROP_RESOLVE_META_REQUIREMENTS)
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true)
    }
}

impl Queryable for Profile {
    fn query(&self, query: &UnitQuery) -> Vec<Arc<InstallableUnit>> {
        self.units
            .iter()
            .filter(|u| query.matches(u))
            .cloned()
            .collect()
    }
}
