//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::cancel::CancellationToken;
use crate::director::explanation::requester;
use crate::director::Explanation;
use crate::metadata::{
    Environment, InstallableUnit, Queryable, Requirement, UnitIndex, UnitQuery, Version,
    VersionRange,
};
use crate::progress::{NoopProgressReporter, ProgressInfo, ProgressReporter};
use miette::Diagnostic;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Units processed between two cancellation checks.
const BATCH_SIZE: usize = 64;

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum SliceError {
    #[error("slicing was cancelled")]
    #[diagnostic(code(prov::slice_error::cancelled))]
    Cancelled,

    #[error("a root requirement has no candidate")]
    #[diagnostic(
        code(prov::slice_error::unsatisfiable),
        help("The explanation names the requirements nothing in the universe can meet.")
    )]
    Unsatisfiable(BTreeSet<Explanation>),
}

/// The part of the universe a request can reach in one environment.
#[derive(Debug, Clone)]
pub struct Slice {
    units: UnitIndex,
    filtered_out: UnitIndex,
    environment: Environment,
    available: BTreeMap<Requirement, Vec<Version>>,
}

impl Slice {
    pub fn units(&self) -> impl Iterator<Item = &Arc<InstallableUnit>> {
        self.units.iter()
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

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Providers inside the slice, by id ascending then version descending.
    pub fn providers(&self, requirement: &Requirement) -> Vec<Arc<InstallableUnit>> {
        self.units.providers(requirement)
    }

    /// Units that would satisfy `requirement` but were excluded by their filter.
    pub fn filtered_providers(&self, requirement: &Requirement) -> Vec<Arc<InstallableUnit>> {
        self.filtered_out.providers(requirement)
    }

    pub fn filtered_out(&self) -> impl Iterator<Item = &Arc<InstallableUnit>> {
        self.filtered_out.iter()
    }

    /// Versions of the required capability the universe offers outside the requirement's
    /// range; empty when the capability is unknown or the requirement was met.
    pub fn available_versions(&self, requirement: &Requirement) -> &[Version] {
        self.available
            .get(requirement)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Queryable for Slice {
    fn query(&self, query: &UnitQuery) -> Vec<Arc<InstallableUnit>> {
        self.units.query(query)
    }
}

/// Computes the transitive closure of a set of roots over a universe of units.
pub struct Slicer<'a> {
    universe: &'a dyn Queryable,
    environment: Environment,
    consider_meta: bool,
    progress: &'a dyn ProgressReporter,
}

impl<'a> Slicer<'a> {
    pub fn new(universe: &'a dyn Queryable, environment: Environment, consider_meta: bool) -> Self {
        Slicer {
            universe,
            environment,
            consider_meta,
            progress: &NoopProgressReporter,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Slices the universe from `roots`.
    ///
    /// Fails early when a hard requirement of a root cannot be met by anything in the
    /// universe. The roots themselves are part of the slice.
    pub fn slice(
        &self,
        roots: &[Arc<InstallableUnit>],
        cancel: &CancellationToken,
    ) -> Result<Slice, SliceError> {
        self.validate_roots(roots)?;

        let mut slice = Slice {
            units: UnitIndex::default(),
            filtered_out: UnitIndex::default(),
            environment: self.environment.clone(),
            available: BTreeMap::new(),
        };
        let mut queue: VecDeque<Arc<InstallableUnit>> = VecDeque::new();
        for root in roots {
            if slice.units.insert(root.clone()) {
                queue.push_back(root.clone());
            }
        }

        self.progress
            .start(&ProgressInfo::new("slice").with_total(roots.len() as u64));
        let mut processed = 0usize;
        while let Some(unit) = queue.pop_front() {
            if processed % BATCH_SIZE == 0 {
                if cancel.is_cancelled() {
                    debug!("slicing cancelled after {} units", processed);
                    return Err(SliceError::Cancelled);
                }
                self.progress.update(
                    &ProgressInfo::new("slice")
                        .with_current(processed as u64)
                        .with_context(unit.to_string()),
                );
            }
            processed += 1;

            for requirement in self.followed_requirements(&unit) {
                self.follow(&requirement, &mut slice, &mut queue);
            }
        }
        self.progress
            .finish(&ProgressInfo::new("slice").with_current(processed as u64));

        debug!(
            "slice holds {} units, {} filtered out",
            slice.units.len(),
            slice.filtered_out.len()
        );
        Ok(slice)
    }

    fn validate_roots(&self, roots: &[Arc<InstallableUnit>]) -> Result<(), SliceError> {
        let mut explanation = BTreeSet::new();
        for root in roots {
            if let Some(filter) = root.filter().filter(|_| !root.is_applicable(&self.environment)) {
                explanation.insert(Explanation::FilteredOut {
                    unit: root.clone(),
                    filter: filter.clone(),
                    environment: self.environment.clone(),
                    required_by: None,
                });
                continue;
            }
            for requirement in self.root_requirements(root) {
                if requirement.is_optional()
                    || requirement.is_negative()
                    || !requirement.is_greedy()
                    || !requirement.is_applicable(&self.environment)
                {
                    continue;
                }
                let candidates = self
                    .universe
                    .query(&UnitQuery::Capability(requirement.clone()));
                if candidates
                    .iter()
                    .any(|c| c.is_applicable(&self.environment))
                {
                    continue;
                }
                let filtered = candidates
                    .iter()
                    .find_map(|c| c.filter().map(|filter| (c, filter)));
                match filtered {
                    Some((unit, filter)) => explanation.insert(Explanation::FilteredOut {
                        unit: unit.clone(),
                        filter: filter.clone(),
                        environment: self.environment.clone(),
                        required_by: requester(root),
                    }),
                    None => explanation.insert(Explanation::MissingIU {
                        required_by: requester(root),
                        requirement: requirement.clone(),
                    }),
                };
            }
        }
        if explanation.is_empty() {
            Ok(())
        } else {
            debug!("{} root requirement(s) cannot be met", explanation.len());
            Err(SliceError::Unsatisfiable(explanation))
        }
    }

    fn root_requirements<'u>(
        &self,
        root: &'u InstallableUnit,
    ) -> impl Iterator<Item = &'u Requirement> {
        let meta: &[Requirement] = if self.consider_meta {
            root.meta_requirements()
        } else {
            &[]
        };
        root.runtime_requirements().chain(meta.iter())
    }

    /// Requirements whose providers belong in the slice: run time requirements, meta
    /// requirements when considered, and for patches the replacement and lifecycle
    /// requirements.
    fn followed_requirements(&self, unit: &InstallableUnit) -> Vec<Requirement> {
        let mut requirements: Vec<Requirement> =
            self.root_requirements(unit).cloned().collect();
        if let Some(patch) = unit.patch() {
            requirements.extend(
                patch
                    .changes
                    .iter()
                    .filter_map(|change| change.new_value.clone()),
            );
            requirements.extend(patch.lifecycle.clone());
        }
        requirements
    }

    fn follow(
        &self,
        requirement: &Requirement,
        slice: &mut Slice,
        queue: &mut VecDeque<Arc<InstallableUnit>>,
    ) {
        if !requirement.is_applicable(&self.environment)
            || !requirement.is_greedy()
            || requirement.is_negative()
        {
            trace!("not following {}", requirement);
            return;
        }
        let mut matched = false;
        for candidate in self
            .universe
            .query(&UnitQuery::Capability(requirement.clone()))
        {
            if !candidate.is_applicable(&self.environment) {
                slice.filtered_out.insert(candidate);
                continue;
            }
            matched = true;
            if slice.units.insert(candidate.clone()) {
                queue.push_back(candidate);
            }
        }
        if !matched && !slice.available.contains_key(requirement) {
            let mut versions: Vec<Version> = self
                .universe
                .query(&UnitQuery::Capability(
                    requirement.with_range(VersionRange::any()),
                ))
                .iter()
                .filter(|c| c.is_applicable(&self.environment))
                .flat_map(|c| {
                    c.provided_capabilities()
                        .iter()
                        .filter(|cap| {
                            cap.namespace == requirement.namespace()
                                && cap.name == requirement.name()
                        })
                        .map(|cap| cap.version.clone())
                        .collect::<Vec<_>>()
                })
                .collect();
            versions.sort();
            versions.dedup();
            slice.available.insert(requirement.clone(), versions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Filter, PatchInfo, RequirementChange};

    fn v(major: u64) -> Version {
        Version::new(major, 0, 0)
    }

    fn exact(id: &str, major: u64) -> Requirement {
        Requirement::strict(id, &v(major))
    }

    fn linux_only(id: &str, major: u64) -> Arc<InstallableUnit> {
        InstallableUnit::builder(id, v(major))
            .filter(Filter::parse("(os=linux)").expect("filter"))
            .build()
    }

    #[test]
    fn follows_requirements_transitively() {
        let a = InstallableUnit::builder("a", v(1))
            .requires(Requirement::unit("b", VersionRange::any()))
            .build();
        let b = InstallableUnit::builder("b", v(1))
            .requires(Requirement::unit("c", VersionRange::any()))
            .build();
        let c = InstallableUnit::builder("c", v(1)).build();
        let unrelated = InstallableUnit::builder("d", v(1)).build();
        let universe = UnitIndex::new(vec![a.clone(), b, c, unrelated.clone()]);

        let slice = Slicer::new(&universe, Environment::new(), false)
            .slice(&[a], &CancellationToken::new())
            .expect("slice");
        assert_eq!(slice.len(), 3);
        assert!(!slice.contains(&unrelated));
    }

    #[test]
    fn filtered_units_are_recorded_not_sliced() {
        let a = InstallableUnit::builder("a", v(1))
            .requires(Requirement::unit("b", VersionRange::any()).optional())
            .build();
        let b = linux_only("b", 1);
        let universe = UnitIndex::new(vec![a.clone(), b.clone()]);
        let slice = Slicer::new(&universe, Environment::from_spec("os=win32"), false)
            .slice(&[a], &CancellationToken::new())
            .expect("slice");
        assert!(!slice.contains(&b));
        assert_eq!(
            slice.filtered_providers(&Requirement::unit("b", VersionRange::any())),
            vec![b]
        );
    }

    #[test]
    fn root_with_only_filtered_candidates_fails_early() {
        let a = InstallableUnit::builder("a", v(1))
            .requires(exact("b", 1))
            .build();
        let universe = UnitIndex::new(vec![a.clone(), linux_only("b", 1)]);
        let err = Slicer::new(&universe, Environment::from_spec("os=win32"), false)
            .slice(&[a], &CancellationToken::new())
            .expect_err("b is filtered");
        match err {
            SliceError::Unsatisfiable(explanation) => {
                assert!(explanation
                    .iter()
                    .all(|e| matches!(e, Explanation::FilteredOut { .. })));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn root_with_unknown_requirement_reports_missing_unit() {
        let a = InstallableUnit::builder("a", v(1))
            .requires(exact("nowhere", 1))
            .build();
        let universe = UnitIndex::new(vec![a.clone()]);
        let err = Slicer::new(&universe, Environment::new(), false)
            .slice(&[a.clone()], &CancellationToken::new())
            .expect_err("nothing provides it");
        assert_eq!(
            err,
            SliceError::Unsatisfiable(maplit::btreeset! {
                Explanation::MissingIU { required_by: Some(a), requirement: exact("nowhere", 1) }
            })
        );
    }

    #[test]
    fn non_greedy_and_meta_requirements() {
        let a = InstallableUnit::builder("a", v(1))
            .requires(Requirement::unit("b", VersionRange::any()).non_greedy())
            .meta_requires(Requirement::unit("m", VersionRange::any()))
            .build();
        let b = InstallableUnit::builder("b", v(1)).build();
        let m = InstallableUnit::builder("m", v(1)).build();
        let universe = UnitIndex::new(vec![a.clone(), b.clone(), m.clone()]);
        let cancel = CancellationToken::new();

        let plain = Slicer::new(&universe, Environment::new(), false)
            .slice(&[a.clone()], &cancel)
            .expect("slice");
        assert!(!plain.contains(&b) && !plain.contains(&m));

        let with_meta = Slicer::new(&universe, Environment::new(), true)
            .slice(&[a], &cancel)
            .expect("slice");
        assert!(with_meta.contains(&m));
        assert!(!with_meta.contains(&b));
    }

    #[test]
    fn patches_bring_in_replacement_providers() {
        let patch = InstallableUnit::builder("p", v(1))
            .patch(PatchInfo {
                changes: vec![RequirementChange::replace(exact("c", 1), exact("c", 2))],
                applicability_scope: vec![],
                lifecycle: None,
            })
            .build();
        let c2 = InstallableUnit::builder("c", v(2)).build();
        let universe = UnitIndex::new(vec![patch.clone(), c2.clone()]);
        let slice = Slicer::new(&universe, Environment::new(), false)
            .slice(&[patch], &CancellationToken::new())
            .expect("slice");
        assert!(slice.contains(&c2));
    }

    #[test]
    fn records_versions_outside_the_range() {
        let a = InstallableUnit::builder("a", v(1))
            .requires(exact("b", 3).optional())
            .build();
        let universe = UnitIndex::new(vec![
            a.clone(),
            InstallableUnit::builder("b", v(1)).build(),
            InstallableUnit::builder("b", v(2)).build(),
        ]);
        let slice = Slicer::new(&universe, Environment::new(), false)
            .slice(&[a], &CancellationToken::new())
            .expect("slice");
        assert_eq!(slice.available_versions(&exact("b", 3).optional()), &[v(1), v(2)]);
    }

    #[test]
    fn cancelled_token_stops_slicing() {
        let a = InstallableUnit::builder("a", v(1)).build();
        let universe = UnitIndex::new(vec![a.clone()]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Slicer::new(&universe, Environment::new(), false)
            .slice(&[a], &cancel)
            .expect_err("cancelled");
        assert_eq!(err, SliceError::Cancelled);
    }
}
