//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::metadata::InstallableUnit;
use crate::profile::{InclusionRule, Profile, PROP_INCLUSION_RULES};
use miette::Diagnostic;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("unit {unit} is both added and removed")]
    #[diagnostic(
        code(prov::request_error::conflicting_change),
        help("Request either the addition or the removal of the unit, not both.")
    )]
    ConflictingChange { unit: String },

    #[error("property {key} is set on unit {unit} which is being removed")]
    #[diagnostic(
        code(prov::request_error::property_on_removed_unit),
        help("Drop the property change or keep the unit installed.")
    )]
    PropertyOnRemovedUnit { unit: String, key: String },
}

/// Changes requested against one profile snapshot.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    profile: Arc<Profile>,
    additions: BTreeSet<Arc<InstallableUnit>>,
    removals: BTreeSet<Arc<InstallableUnit>>,
    property_adds: BTreeMap<String, String>,
    property_removes: BTreeSet<String>,
    unit_property_adds: BTreeMap<Arc<InstallableUnit>, BTreeMap<String, String>>,
    unit_property_removes: BTreeMap<Arc<InstallableUnit>, BTreeSet<String>>,
    absolute: bool,
}

impl ChangeRequest {
    pub fn new(profile: Arc<Profile>) -> Self {
        ChangeRequest {
            profile,
            additions: BTreeSet::new(),
            removals: BTreeSet::new(),
            property_adds: BTreeMap::new(),
            property_removes: BTreeSet::new(),
            unit_property_adds: BTreeMap::new(),
            unit_property_removes: BTreeMap::new(),
            absolute: false,
        }
    }

    pub fn add(&mut self, unit: Arc<InstallableUnit>) {
        self.additions.insert(unit);
    }

    pub fn add_all<I: IntoIterator<Item = Arc<InstallableUnit>>>(&mut self, units: I) {
        self.additions.extend(units);
    }

    pub fn remove(&mut self, unit: Arc<InstallableUnit>) {
        self.removals.insert(unit);
    }

    pub fn remove_all<I: IntoIterator<Item = Arc<InstallableUnit>>>(&mut self, units: I) {
        self.removals.extend(units);
    }

    pub fn set_profile_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.property_removes.remove(&key);
        self.property_adds.insert(key, value.into());
    }

    pub fn remove_profile_property(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.property_adds.remove(&key);
        self.property_removes.insert(key);
    }

    pub fn set_unit_property(
        &mut self,
        unit: &Arc<InstallableUnit>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        let key = key.into();
        if let Some(removes) = self.unit_property_removes.get_mut(unit) {
            removes.remove(&key);
        }
        self.unit_property_adds
            .entry(unit.clone())
            .or_default()
            .insert(key, value.into());
    }

    pub fn remove_unit_property(&mut self, unit: &Arc<InstallableUnit>, key: impl Into<String>) {
        let key = key.into();
        if let Some(adds) = self.unit_property_adds.get_mut(unit) {
            adds.remove(&key);
        }
        self.unit_property_removes
            .entry(unit.clone())
            .or_default()
            .insert(key);
    }

    pub fn set_inclusion_rule(&mut self, unit: &Arc<InstallableUnit>, rule: InclusionRule) {
        self.set_unit_property(unit, PROP_INCLUSION_RULES, rule.as_ref());
    }

    /// Marks the request as a fully resolved target: additions and removals are applied
    /// as given without solving.
    pub fn set_absolute(&mut self, absolute: bool) {
        self.absolute = absolute;
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.profile
    }

    pub fn additions(&self) -> &BTreeSet<Arc<InstallableUnit>> {
        &self.additions
    }

    pub fn removals(&self) -> &BTreeSet<Arc<InstallableUnit>> {
        &self.removals
    }

    pub fn property_adds(&self) -> &BTreeMap<String, String> {
        &self.property_adds
    }

    pub fn property_removes(&self) -> &BTreeSet<String> {
        &self.property_removes
    }

    pub fn unit_property_adds(&self) -> &BTreeMap<Arc<InstallableUnit>, BTreeMap<String, String>> {
        &self.unit_property_adds
    }

    pub fn unit_property_removes(&self) -> &BTreeMap<Arc<InstallableUnit>, BTreeSet<String>> {
        &self.unit_property_removes
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// The rule requested for an added unit, if the request sets one.
    pub fn requested_inclusion_rule(&self, unit: &InstallableUnit) -> Option<InclusionRule> {
        self.unit_property_adds
            .get(unit)
            .and_then(|props| props.get(PROP_INCLUSION_RULES))
            .map(|rule| rule.parse().unwrap_or(InclusionRule::Strict))
    }

    /// Rejects requests that contradict themselves.
    pub fn validate(&self) -> Result<(), RequestError> {
        if let Some(unit) = self.additions.intersection(&self.removals).next() {
            return Err(RequestError::ConflictingChange {
                unit: unit.to_string(),
            });
        }
        for (unit, props) in &self.unit_property_adds {
            if self.removals.contains(unit) {
                if let Some(key) = props.keys().next() {
                    return Err(RequestError::PropertyOnRemovedUnit {
                        unit: unit.to_string(),
                        key: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
