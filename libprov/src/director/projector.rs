//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::cancel::CancellationToken;
use crate::director::attachment::{associate_fragments, attach_fragments, FragmentAssociation};
use crate::director::explanation::requester;
use crate::director::{Explanation, Slice, PROP_SYNTHETIC};
use crate::metadata::{InstallableUnit, Requirement};
use crate::profile::Profile;
use crate::solver::{Assignment, Lit, Outcome, Problem, SolverBackend, SolverError, Var};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use strum::Display;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProjectorStatus {
    Satisfiable,
    Unsatisfiable,
    Cancelled,
}

/// Units selected by a successful solve.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    /// Selected units without fragments attached, the root excluded
    pub units: BTreeSet<Arc<InstallableUnit>>,
    pub association: FragmentAssociation,
}

impl Solution {
    /// The selected units with their fragments attached.
    pub fn attached(&self) -> BTreeSet<Arc<InstallableUnit>> {
        attach_fragments(&self.units, &self.association)
    }
}

/// Translates a slice and a change request into a boolean problem and reads the answer
/// back.
///
/// Every unit of the slice gets one variable. Clauses that can take part in a conflict are
/// tagged with the [`Explanation`] they stand for, so an unsatisfiable core maps straight
/// back onto diagnostics.
pub struct Projector<'a> {
    slice: &'a Slice,
    consider_meta: bool,
    problem: Problem,
    vars: BTreeMap<Arc<InstallableUnit>, Var>,
    root: Option<Arc<InstallableUnit>>,
    optionals: Vec<Var>,
    explanations: Vec<Explanation>,
    tags: BTreeMap<Explanation, usize>,
    assignment: Option<Assignment>,
}

impl<'a> Projector<'a> {
    pub fn new(slice: &'a Slice, consider_meta: bool) -> Self {
        Projector {
            slice,
            consider_meta,
            problem: Problem::new(),
            vars: BTreeMap::new(),
            root: None,
            optionals: Vec::new(),
            explanations: Vec::new(),
            tags: BTreeMap::new(),
            assignment: None,
        }
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    /// Builds the problem for resolving `root`.
    ///
    /// `already_installed` holds the rooted profile units the request keeps; they are
    /// preferred selected, followed by `requested_additions`. Other units of `profile` are
    /// the last of their id to be given up.
    pub fn encode(
        &mut self,
        root: &Arc<InstallableUnit>,
        already_installed: &BTreeSet<Arc<InstallableUnit>>,
        profile: &Profile,
        requested_additions: &BTreeSet<Arc<InstallableUnit>>,
    ) {
        let slice = self.slice;
        for unit in slice.units() {
            self.var_of(unit);
        }
        let root_var = self.var_of(root);
        self.root = Some(root.clone());
        self.problem.add_clause(vec![Lit::positive(root_var)], None);

        let patches: Vec<Arc<InstallableUnit>> =
            slice.units().filter(|u| u.is_patch()).cloned().collect();

        let mut units: Vec<Arc<InstallableUnit>> = slice.units().cloned().collect();
        if !slice.contains(root) {
            units.push(root.clone());
        }
        for unit in &units {
            let is_root = unit == root;
            let applicable: Vec<&Arc<InstallableUnit>> =
                if is_root || unit.is_patch() || unit.property(PROP_SYNTHETIC).is_some() {
                    Vec::new()
                } else {
                    patches
                        .iter()
                        .filter(|p| p.patch().map(|info| info.applies_to(unit)).unwrap_or(false))
                        .collect()
                };
            self.encode_unit(unit, &applicable, is_root, already_installed, requested_additions);
        }

        self.encode_singletons();
        self.encode_preferences(root, already_installed, profile, requested_additions);
        debug!(
            "projected {} units onto {} variables and {} clauses",
            units.len(),
            self.problem.var_count(),
            self.problem.clauses().len()
        );
    }

    fn encode_unit(
        &mut self,
        unit: &Arc<InstallableUnit>,
        patches: &[&Arc<InstallableUnit>],
        is_root: bool,
        already_installed: &BTreeSet<Arc<InstallableUnit>>,
        requested_additions: &BTreeSet<Arc<InstallableUnit>>,
    ) {
        let slice = self.slice;
        let environment = slice.environment();
        let mut requirements: Vec<Requirement> = unit.runtime_requirements().cloned().collect();
        if self.consider_meta {
            requirements.extend(unit.meta_requirements().iter().cloned());
        }

        for requirement in requirements {
            if !requirement.is_applicable(environment) {
                continue;
            }
            let reason = if is_root {
                root_reason(unit, &requirement, already_installed, requested_additions)
            } else {
                Explanation::HardRequirement {
                    unit: unit.clone(),
                    requirement: requirement.clone(),
                }
            };

            let changed: Vec<(&Arc<InstallableUnit>, Option<Requirement>)> = patches
                .iter()
                .filter_map(|patch| {
                    let info = patch.patch()?;
                    info.changes
                        .iter()
                        .find(|change| change.matches(&requirement))
                        .map(|change| (*patch, change.new_value.clone()))
                })
                .collect();

            let guards: Vec<Lit> = changed
                .iter()
                .map(|(patch, _)| Lit::positive(self.var_of(patch)))
                .collect();
            self.encode_requirement(unit, &guards, &requirement, reason);

            for (patch, replacement) in changed {
                let Some(replacement) = replacement else {
                    continue;
                };
                if !replacement.is_applicable(environment) {
                    continue;
                }
                let guard = Lit::negative(self.var_of(patch));
                let reason = Explanation::PatchedHardRequirement {
                    unit: unit.clone(),
                    patch: patch.clone(),
                    requirement: replacement.clone(),
                };
                self.encode_requirement(unit, &[guard], &replacement, reason);
            }
        }

        for patch in patches {
            let Some(info) = patch.patch() else {
                continue;
            };
            let added = info
                .changes
                .iter()
                .filter(|change| change.apply_on.is_none())
                .filter_map(|change| change.new_value.clone());
            let extra: Vec<Requirement> = added.chain(info.lifecycle.clone()).collect();
            let guard = Lit::negative(self.var_of(patch));
            for requirement in extra {
                if !requirement.is_applicable(environment) {
                    continue;
                }
                let reason = Explanation::PatchedHardRequirement {
                    unit: unit.clone(),
                    patch: (*patch).clone(),
                    requirement: requirement.clone(),
                };
                self.encode_requirement(unit, &[guard], &requirement, reason);
            }
        }
    }

    /// Adds the clauses for `unit ∧ ¬guards → requirement`.
    fn encode_requirement(
        &mut self,
        unit: &Arc<InstallableUnit>,
        guards: &[Lit],
        requirement: &Requirement,
        reason: Explanation,
    ) {
        let unit_var = self.var_of(unit);
        let providers: Vec<Var> = self
            .slice
            .providers(requirement)
            .iter()
            .map(|p| self.var_of(p))
            .collect();

        if requirement.is_negative() {
            if providers.iter().all(|p| *p == unit_var) {
                return;
            }
            let tag = self.tag(reason);
            for provider in providers.into_iter().filter(|p| *p != unit_var) {
                let mut clause = vec![Lit::negative(unit_var)];
                clause.extend_from_slice(guards);
                clause.push(Lit::negative(provider));
                self.problem.add_clause(clause, Some(tag));
            }
            return;
        }

        if requirement.is_optional() {
            if providers.is_empty() {
                return;
            }
            let optional = self.problem.new_var();
            self.problem
                .add_clause(vec![Lit::negative(optional), Lit::positive(unit_var)], None);
            for guard in guards {
                self.problem
                    .add_clause(vec![Lit::negative(optional), !*guard], None);
            }
            let mut clause = vec![Lit::negative(optional)];
            clause.extend(providers.iter().map(|p| Lit::positive(*p)));
            self.problem.add_clause(clause, None);
            self.optionals.push(optional);
            return;
        }

        let needed = requirement.min().max(1) as usize;
        let mut base = vec![Lit::negative(unit_var)];
        base.extend_from_slice(guards);
        if providers.is_empty() {
            let tag = self.tag(self.missing(unit, requirement));
            self.problem.add_clause(base, Some(tag));
            return;
        }
        let tag = self.tag(reason);
        if providers.len() < needed {
            self.problem.add_clause(base, Some(tag));
            return;
        }
        self.at_least(&base, &providers, needed, tag);
    }

    /// Sequential counter for "at least `needed` of `providers`", read as "at most
    /// n - needed providers left out". Every clause carries `base` and `tag`, so the
    /// constraint only binds while `base` is falsified and cores still name the
    /// requirement.
    fn at_least(&mut self, base: &[Lit], providers: &[Var], needed: usize, tag: usize) {
        let n = providers.len();
        let slack = n - needed;
        let add = |problem: &mut Problem, lits: &[Lit]| {
            let mut clause = base.to_vec();
            clause.extend_from_slice(lits);
            problem.add_clause(clause, Some(tag));
        };
        if slack == 0 {
            for p in providers {
                add(&mut self.problem, &[Lit::positive(*p)]);
            }
            return;
        }

        // counter[i][j]: more than j of the first i + 1 providers are left out
        let counter: Vec<Vec<Var>> = (0..n - 1)
            .map(|_| (0..slack).map(|_| self.problem.new_var()).collect())
            .collect();
        let out = |i: usize| Lit::positive(providers[i]);
        add(&mut self.problem, &[out(0), Lit::positive(counter[0][0])]);
        for j in 1..slack {
            add(&mut self.problem, &[Lit::negative(counter[0][j])]);
        }
        for i in 1..n - 1 {
            add(&mut self.problem, &[out(i), Lit::positive(counter[i][0])]);
            for j in 0..slack {
                add(
                    &mut self.problem,
                    &[Lit::negative(counter[i - 1][j]), Lit::positive(counter[i][j])],
                );
            }
            for j in 1..slack {
                add(
                    &mut self.problem,
                    &[
                        out(i),
                        Lit::negative(counter[i - 1][j - 1]),
                        Lit::positive(counter[i][j]),
                    ],
                );
            }
            add(
                &mut self.problem,
                &[out(i), Lit::negative(counter[i - 1][slack - 1])],
            );
        }
        add(
            &mut self.problem,
            &[out(n - 1), Lit::negative(counter[n - 2][slack - 1])],
        );
    }

    /// Root cause for a hard requirement nothing in the slice provides.
    fn missing(&self, unit: &Arc<InstallableUnit>, requirement: &Requirement) -> Explanation {
        let required_by = requester(unit);
        if let Some(filtered) = self.slice.filtered_providers(requirement).first() {
            if let Some(filter) = filtered.filter() {
                return Explanation::FilteredOut {
                    unit: filtered.clone(),
                    filter: filter.clone(),
                    environment: self.slice.environment().clone(),
                    required_by,
                };
            }
        }
        let available = self.slice.available_versions(requirement);
        if available.is_empty() {
            Explanation::MissingIU {
                required_by,
                requirement: requirement.clone(),
            }
        } else {
            Explanation::VersionMismatch {
                required_by,
                requirement: requirement.clone(),
                available: available.to_vec(),
            }
        }
    }

    fn encode_singletons(&mut self) {
        let mut by_id: BTreeMap<String, Vec<Arc<InstallableUnit>>> = BTreeMap::new();
        for unit in self.slice.units().filter(|u| u.is_singleton()) {
            by_id.entry(unit.id().to_string()).or_default().push(unit.clone());
        }
        for (id, candidates) in by_id {
            if candidates.len() < 2 {
                continue;
            }
            let vars: Vec<Var> = candidates.iter().map(|u| self.var_of(u)).collect();
            let tag = self.tag(Explanation::SingletonConflict { id, candidates });
            for (i, a) in vars.iter().enumerate() {
                for b in &vars[i + 1..] {
                    self.problem
                        .add_clause(vec![Lit::negative(*a), Lit::negative(*b)], Some(tag));
                }
            }
        }
    }

    fn encode_preferences(
        &mut self,
        root: &Arc<InstallableUnit>,
        already_installed: &BTreeSet<Arc<InstallableUnit>>,
        profile: &Profile,
        requested_additions: &BTreeSet<Arc<InstallableUnit>>,
    ) {
        let mut installed: Vec<&Arc<InstallableUnit>> = already_installed
            .iter()
            .filter(|u| self.vars.contains_key(*u))
            .collect();
        installed.sort_by(|a, b| a.id().cmp(b.id()).then_with(|| b.version().cmp(a.version())));
        for unit in installed {
            let var = self.var_of(unit);
            self.problem.prefer(Lit::positive(var));
        }
        for unit in requested_additions {
            if self.vars.contains_key(unit) {
                let var = self.var_of(unit);
                self.problem.prefer(Lit::positive(var));
            }
        }
        for optional in self.optionals.clone() {
            self.problem.prefer(Lit::positive(optional));
        }
        // Within an id, dropping the lowest versions first leaves the highest selected,
        // unless a version is already in the profile.
        let mut by_id: BTreeMap<&str, Vec<(&Arc<InstallableUnit>, Var)>> = BTreeMap::new();
        for (unit, var) in &self.vars {
            if unit == root || already_installed.contains(unit) {
                continue;
            }
            by_id.entry(unit.id()).or_default().push((unit, *var));
        }
        let mut lowest_first = Vec::new();
        for (_, mut versions) in by_id {
            versions.sort_by(|(a, _), (b, _)| {
                profile
                    .contains(a)
                    .cmp(&profile.contains(b))
                    .then_with(|| a.version().cmp(b.version()))
            });
            lowest_first.extend(versions.into_iter().map(|(_, var)| Lit::negative(var)));
        }
        for lit in lowest_first {
            self.problem.prefer(lit);
        }
    }

    pub fn invoke_solver(
        &mut self,
        backend: &mut dyn SolverBackend,
        cancel: &CancellationToken,
    ) -> ProjectorStatus {
        let status = match backend.solve(&self.problem, cancel) {
            Outcome::Satisfiable(assignment) => {
                self.assignment = Some(assignment);
                ProjectorStatus::Satisfiable
            }
            Outcome::Unsatisfiable => ProjectorStatus::Unsatisfiable,
            Outcome::Cancelled => ProjectorStatus::Cancelled,
        };
        debug!("solver finished: {}", status);
        status
    }

    /// Selected units after a satisfiable solve; empty otherwise.
    pub fn extract_solution(&self) -> Solution {
        let Some(assignment) = &self.assignment else {
            return Solution::default();
        };
        let units: BTreeSet<Arc<InstallableUnit>> = self
            .vars
            .iter()
            .filter(|(unit, var)| assignment.value(**var) && Some(*unit) != self.root.as_ref())
            .map(|(unit, _)| unit.clone())
            .collect();
        let association = associate_fragments(&units);
        Solution { units, association }
    }

    /// Diagnostics of a minimal set of conflicting constraint groups.
    pub fn explanation(
        &self,
        backend: &mut dyn SolverBackend,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<Explanation>, SolverError> {
        let core = backend.minimal_core(&self.problem, cancel)?;
        debug!("unsatisfiable core spans {} constraint groups", core.len());
        Ok(core
            .into_iter()
            .filter_map(|tag| self.explanations.get(tag).cloned())
            .collect())
    }

    fn var_of(&mut self, unit: &Arc<InstallableUnit>) -> Var {
        if let Some(var) = self.vars.get(unit) {
            return *var;
        }
        let var = self.problem.new_var();
        self.vars.insert(unit.clone(), var);
        var
    }

    fn tag(&mut self, explanation: Explanation) -> usize {
        if let Some(tag) = self.tags.get(&explanation) {
            return *tag;
        }
        let tag = self.explanations.len();
        self.explanations.push(explanation.clone());
        self.tags.insert(explanation, tag);
        tag
    }
}

/// Why the root requires something: a requested addition, a kept installed unit, or an
/// additional requirement of the request.
fn root_reason(
    root: &Arc<InstallableUnit>,
    requirement: &Requirement,
    already_installed: &BTreeSet<Arc<InstallableUnit>>,
    requested_additions: &BTreeSet<Arc<InstallableUnit>>,
) -> Explanation {
    if let Some(unit) = requested_additions.iter().find(|u| u.satisfies(requirement)) {
        return Explanation::IUToInstall { unit: unit.clone() };
    }
    if let Some(unit) = already_installed.iter().find(|u| u.satisfies(requirement)) {
        return Explanation::IUInstalled { unit: unit.clone() };
    }
    Explanation::HardRequirement {
        unit: root.clone(),
        requirement: requirement.clone(),
    }
}
