//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::metadata::{InstallableUnit, Requirement, VersionRange};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Selection over a set of units.
#[derive(Debug, Clone)]
pub enum UnitQuery {
    All,
    Id(String),
    IdInRange(String, VersionRange),
    /// Units providing a capability matching the requirement
    Capability(Requirement),
    /// Units that are an update of the given unit
    UpdatesOf(Arc<InstallableUnit>),
    Property(String, String),
}

impl UnitQuery {
    pub fn matches(&self, unit: &InstallableUnit) -> bool {
        match self {
            UnitQuery::All => true,
            UnitQuery::Id(id) => unit.id() == id,
            UnitQuery::IdInRange(id, range) => unit.id() == id && range.includes(unit.version()),
            UnitQuery::Capability(req) => unit.satisfies(req),
            UnitQuery::UpdatesOf(target) => unit.is_update_of(target),
            UnitQuery::Property(key, value) => unit.property(key) == Some(value.as_str()),
        }
    }
}

/// Anything units can be queried from.
pub trait Queryable {
    /// Matching units in `(id, version)` order.
    fn query(&self, query: &UnitQuery) -> Vec<Arc<InstallableUnit>>;
}

/// Owned set of units indexed by provided capability.
#[derive(Debug, Clone, Default)]
pub struct UnitIndex {
    units: BTreeSet<Arc<InstallableUnit>>,
    by_capability: HashMap<(String, String), Vec<Arc<InstallableUnit>>>,
}

impl UnitIndex {
    pub fn new<I: IntoIterator<Item = Arc<InstallableUnit>>>(units: I) -> Self {
        let mut index = UnitIndex::default();
        for unit in units {
            index.insert(unit);
        }
        index
    }

    /// Adds a unit; an existing unit with the same identity is kept.
    pub fn insert(&mut self, unit: Arc<InstallableUnit>) -> bool {
        if self.units.contains(&unit) {
            return false;
        }
        for cap in unit.provided_capabilities() {
            self.by_capability
                .entry((cap.namespace.clone(), cap.name.clone()))
                .or_default()
                .push(unit.clone());
        }
        self.units.insert(unit);
        true
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, unit: &InstallableUnit) -> bool {
        self.units.contains(unit)
    }

    pub fn get(&self, unit: &InstallableUnit) -> Option<&Arc<InstallableUnit>> {
        self.units.get(unit)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<InstallableUnit>> {
        self.units.iter()
    }

    /// Providers of `requirement`, ordered by id ascending then version descending.
    pub fn providers(&self, requirement: &Requirement) -> Vec<Arc<InstallableUnit>> {
        let key = (
            requirement.namespace().to_string(),
            requirement.name().to_string(),
        );
        let mut found: Vec<Arc<InstallableUnit>> = self
            .by_capability
            .get(&key)
            .map(|candidates| {
                candidates
                    .iter()
                    .filter(|u| u.satisfies(requirement))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by(|a, b| {
            a.id()
                .cmp(b.id())
                .then_with(|| b.version().cmp(a.version()))
        });
        found.dedup();
        found
    }

    /// Units providing the capability named by `requirement` at any version.
    pub fn providers_any_version(&self, requirement: &Requirement) -> Vec<Arc<InstallableUnit>> {
        self.providers(&requirement.with_range(VersionRange::any()))
    }
}

impl Queryable for UnitIndex {
    fn query(&self, query: &UnitQuery) -> Vec<Arc<InstallableUnit>> {
        match query {
            UnitQuery::Capability(req) => {
                let mut found = self.providers(req);
                found.sort();
                found
            }
            _ => self
                .units
                .iter()
                .filter(|u| query.matches(u))
                .cloned()
                .collect(),
        }
    }
}

impl FromIterator<Arc<InstallableUnit>> for UnitIndex {
    fn from_iter<T: IntoIterator<Item = Arc<InstallableUnit>>>(iter: T) -> Self {
        UnitIndex::new(iter)
    }
}
