//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::metadata::{
    Environment, Filter, ProvidedCapability, Requirement, Version, VersionRange, UNIT_NAMESPACE,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Set to `true` on units whose metadata is incomplete, e.g. when a repository only
/// published a summary. Complete copies win over partial ones.
pub const PROP_PARTIAL: &str = "unit.partial";

/// Rewrites one requirement of a patched unit.
///
/// `apply_on == None` adds `new_value`; `new_value == None` drops the matched requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequirementChange {
    pub apply_on: Option<Requirement>,
    pub new_value: Option<Requirement>,
}

impl RequirementChange {
    pub fn replace(apply_on: Requirement, new_value: Requirement) -> Self {
        RequirementChange {
            apply_on: Some(apply_on),
            new_value: Some(new_value),
        }
    }

    pub fn add(new_value: Requirement) -> Self {
        RequirementChange {
            apply_on: None,
            new_value: Some(new_value),
        }
    }

    pub fn remove(apply_on: Requirement) -> Self {
        RequirementChange {
            apply_on: Some(apply_on),
            new_value: None,
        }
    }

    /// A change targets a requirement with the same capability whose range lies inside
    /// the change's range. Requirements on any version are always targeted.
    pub fn matches(&self, requirement: &Requirement) -> bool {
        let Some(apply_on) = &self.apply_on else {
            return false;
        };
        apply_on.namespace() == requirement.namespace()
            && apply_on.name() == requirement.name()
            && (requirement.range().is_any()
                || requirement.range().is_included_in(apply_on.range()))
    }
}

/// Patch extension of a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatchInfo {
    pub changes: Vec<RequirementChange>,
    /// OR of AND groups; a patch applies to a unit satisfying every requirement of at
    /// least one group. An empty scope applies to every unit.
    #[serde(default)]
    pub applicability_scope: Vec<Vec<Requirement>>,
    /// Must be satisfied whenever the patch is applied.
    #[serde(default)]
    pub lifecycle: Option<Requirement>,
}

impl PatchInfo {
    pub fn applies_to(&self, unit: &InstallableUnit) -> bool {
        self.applicability_scope.is_empty()
            || self
                .applicability_scope
                .iter()
                .any(|group| group.iter().all(|req| unit.satisfies(req)))
    }
}

/// Fragment extension: the fragment attaches to hosts satisfying all of these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentInfo {
    pub host: Vec<Requirement>,
}

/// Declares which units this one is an update of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    pub id: String,
    pub range: VersionRange,
}

impl UpdateDescriptor {
    pub fn new(id: impl Into<String>, range: VersionRange) -> Self {
        UpdateDescriptor {
            id: id.into(),
            range,
        }
    }

    pub fn is_update_of(&self, unit: &InstallableUnit) -> bool {
        self.id == unit.id && self.range.includes(&unit.version)
    }
}

/// Immutable, versioned unit of installation.
///
/// Identity is `(id, version)`: equality, hashing and ordering ignore everything else, so a
/// resolved copy with fragments attached compares equal to its unattached original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallableUnit {
    id: String,
    version: Version,
    #[serde(default)]
    provides: Vec<ProvidedCapability>,
    #[serde(default)]
    requires: Vec<Requirement>,
    #[serde(default)]
    meta_requires: Vec<Requirement>,
    #[serde(default)]
    filter: Option<Filter>,
    #[serde(default)]
    singleton: bool,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    patch: Option<PatchInfo>,
    #[serde(default)]
    fragment: Option<FragmentInfo>,
    #[serde(default)]
    update: Option<UpdateDescriptor>,
    #[serde(skip)]
    attached: Vec<Arc<InstallableUnit>>,
}

impl InstallableUnit {
    pub fn builder(id: impl Into<String>, version: Version) -> UnitBuilder {
        UnitBuilder::new(id, version)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn provided_capabilities(&self) -> &[ProvidedCapability] {
        &self.provides
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requires
    }

    pub fn meta_requirements(&self) -> &[Requirement] {
        &self.meta_requires
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn patch(&self) -> Option<&PatchInfo> {
        self.patch.as_ref()
    }

    pub fn fragment(&self) -> Option<&FragmentInfo> {
        self.fragment.as_ref()
    }

    pub fn update_descriptor(&self) -> Option<&UpdateDescriptor> {
        self.update.as_ref()
    }

    /// Fragments attached by resolution; empty on units read from a repository.
    pub fn attached_fragments(&self) -> &[Arc<InstallableUnit>] {
        &self.attached
    }

    pub fn is_patch(&self) -> bool {
        self.patch.is_some()
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment.is_some()
    }

    pub fn is_partial(&self) -> bool {
        self.property(PROP_PARTIAL)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Whether the unit may be installed in `env`.
    pub fn is_applicable(&self, env: &Environment) -> bool {
        self.filter.as_ref().map(|f| f.matches(env)).unwrap_or(true)
    }

    pub fn satisfies(&self, requirement: &Requirement) -> bool {
        self.provides.iter().any(|cap| requirement.is_satisfied_by(cap))
    }

    /// A fragment attaches to a host that satisfies all its host requirements.
    pub fn is_host_for(&self, fragment: &InstallableUnit) -> bool {
        match &fragment.fragment {
            Some(info) if !info.host.is_empty() => info.host.iter().all(|r| self.satisfies(r)),
            _ => false,
        }
    }

    /// Requirements the unit needs at run time, host requirements of fragments included.
    pub fn runtime_requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.requires
            .iter()
            .chain(self.fragment.iter().flat_map(|f| f.host.iter()))
    }

    /// `self` is an update of `other` when it is a patch whose lifecycle `other` satisfies,
    /// when its update descriptor names `other`, or, lacking a descriptor, when it is a
    /// newer version of the same id.
    pub fn is_update_of(&self, other: &InstallableUnit) -> bool {
        if let Some(patch) = &self.patch {
            if other.patch.is_none() {
                return patch
                    .lifecycle
                    .as_ref()
                    .map(|l| other.satisfies(l))
                    .unwrap_or(false);
            }
        }
        match &self.update {
            Some(descriptor) if descriptor.is_update_of(other) => {
                self.id != other.id || self.version > other.version
            }
            Some(_) => false,
            None => self.id == other.id && self.version > other.version,
        }
    }

    /// Copy of this unit with `fragments` attached.
    pub fn with_fragments(&self, mut fragments: Vec<Arc<InstallableUnit>>) -> Arc<InstallableUnit> {
        fragments.sort();
        fragments.dedup();
        Arc::new(InstallableUnit {
            attached: fragments,
            ..self.clone()
        })
    }

    /// Whether two copies of the same unit carry the same attached fragments.
    pub fn same_attachment(&self, other: &InstallableUnit) -> bool {
        self.attached.len() == other.attached.len()
            && self.attached.iter().zip(&other.attached).all(|(a, b)| a == b)
    }
}

impl PartialEq for InstallableUnit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.version == other.version
    }
}

impl Eq for InstallableUnit {}

impl Hash for InstallableUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.version.hash(state);
    }
}

impl PartialOrd for InstallableUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstallableUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl fmt::Display for InstallableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// Builder for [`InstallableUnit`]. The unit always provides its own id in
/// [`UNIT_NAMESPACE`].
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    unit: InstallableUnit,
}

impl UnitBuilder {
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        UnitBuilder {
            unit: InstallableUnit {
                id: id.into(),
                version,
                provides: Vec::new(),
                requires: Vec::new(),
                meta_requires: Vec::new(),
                filter: None,
                singleton: false,
                properties: BTreeMap::new(),
                patch: None,
                fragment: None,
                update: None,
                attached: Vec::new(),
            },
        }
    }

    pub fn provides(mut self, namespace: &str, name: &str, version: Version) -> Self {
        self.unit
            .provides
            .push(ProvidedCapability::new(namespace, name, version));
        self
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.unit.requires.push(requirement);
        self
    }

    pub fn meta_requires(mut self, requirement: Requirement) -> Self {
        self.unit.meta_requires.push(requirement);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.unit.filter = Some(filter);
        self
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.unit.singleton = singleton;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.unit.properties.insert(key.into(), value.into());
        self
    }

    pub fn patch(mut self, patch: PatchInfo) -> Self {
        self.unit.patch = Some(patch);
        self
    }

    pub fn fragment_of(mut self, host: Vec<Requirement>) -> Self {
        self.unit.fragment = Some(FragmentInfo { host });
        self
    }

    pub fn update_of(mut self, descriptor: UpdateDescriptor) -> Self {
        self.unit.update = Some(descriptor);
        self
    }

    pub fn build(self) -> Arc<InstallableUnit> {
        Arc::new(self.into_unit())
    }

    pub fn into_unit(mut self) -> InstallableUnit {
        self.unit.ensure_self_capability();
        self.unit
    }
}

impl InstallableUnit {
    /// Units deserialised from metadata may omit their self capability.
    pub(crate) fn normalized(unit: Arc<InstallableUnit>) -> Arc<InstallableUnit> {
        let mut unit = unit;
        if !unit.has_self_capability() {
            Arc::make_mut(&mut unit).ensure_self_capability();
        }
        unit
    }

    fn has_self_capability(&self) -> bool {
        self.provides.iter().any(|c| {
            c.namespace == UNIT_NAMESPACE && c.name == self.id && c.version == self.version
        })
    }

    pub(crate) fn ensure_self_capability(&mut self) {
        if !self.has_self_capability() {
            self.provides.insert(
                0,
                ProvidedCapability::new(UNIT_NAMESPACE, self.id.clone(), self.version.clone()),
            );
        }
    }
}
