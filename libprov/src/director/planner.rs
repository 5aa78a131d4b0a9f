//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::cancel::CancellationToken;
use crate::context::{ProvisioningContext, PROP_EXPLAIN, PROP_INCLUDE_PROFILE_UNITS};
use crate::director::attachment::{associate_fragments, attach_fragments};
use crate::director::{
    generate_operands, property_operands, summarize, Operand, PlannerError, PlannerStatus,
    Projector, ProjectorStatus, ProvisioningPlan, RequestStatus, RequestStatusKind, Severity,
    SliceError, Slicer, Solution, PROP_SYNTHETIC,
};
use crate::metadata::{
    Environment, InstallableUnit, Queryable, Requirement, UnitIndex, UnitQuery, Version,
};
use crate::profile::{
    InclusionRule, Profile, PROP_ENVIRONMENTS, PROP_INCLUSION_RULES,
    PROP_RESOLVE_META_REQUIREMENTS,
};
use crate::progress::{NoopProgressReporter, ProgressInfo, ProgressReporter};
use crate::repository::RepositoryManager;
use crate::request::ChangeRequest;
use crate::solver::{SatSolver, SolverBackend, SolverError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Id prefix of the synthetic unit standing for a whole request.
pub const ROOT_UNIT_PREFIX: &str = "planner.root";
/// Id prefix of the unit gathering the meta-requirements installed into an agent profile.
pub const ACTIONS_UNIT_PREFIX: &str = "actions";

type SolverFactory = dyn Fn() -> Box<dyn SolverBackend> + Send + Sync;

/// Nested resolutions run at `Bootstrap` and never plan a further installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Depth {
    Primary,
    Bootstrap,
}

/// Outcome of one resolution, with the repository problems met along the way.
struct Attempt {
    outcome: Result<Solution, PlannerError>,
    warnings: Vec<PlannerError>,
}

/// Computes provisioning plans for change requests.
///
/// The planner holds no per-request state; one instance can serve concurrent requests.
pub struct Planner {
    manager: Arc<dyn RepositoryManager>,
    progress: Arc<dyn ProgressReporter>,
    solver: Arc<SolverFactory>,
}

impl fmt::Debug for Planner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Planner")
            .field("repositories", &self.manager.known_repositories())
            .finish_non_exhaustive()
    }
}

impl Planner {
    pub fn new(manager: Arc<dyn RepositoryManager>) -> Self {
        Planner {
            manager,
            progress: Arc::new(NoopProgressReporter),
            solver: Arc::new(|| Box::new(SatSolver::new()) as Box<dyn SolverBackend>),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the embedded search engine. `factory` is called once per resolution.
    pub fn with_solver<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn SolverBackend> + Send + Sync + 'static,
    {
        self.solver = Arc::new(factory);
        self
    }

    /// Plans `request`.
    ///
    /// `agent` is the profile of the installer itself. When the new state carries
    /// meta-requirements the agent does not meet yet, the plan gets an installer plan
    /// that brings them in first.
    pub fn provisioning_plan(
        &self,
        request: &ChangeRequest,
        context: &ProvisioningContext,
        agent: Option<&Arc<Profile>>,
        cancel: &CancellationToken,
    ) -> ProvisioningPlan {
        self.plan_at(request, context, agent, cancel, Depth::Primary)
    }

    fn plan_at(
        &self,
        request: &ChangeRequest,
        context: &ProvisioningContext,
        agent: Option<&Arc<Profile>>,
        cancel: &CancellationToken,
        depth: Depth,
    ) -> ProvisioningPlan {
        let profile = request.profile();
        if let Err(e) = request.validate() {
            return ProvisioningPlan::failed(profile.clone(), PlannerStatus::failed(e.into()));
        }
        if request.is_absolute() {
            return absolute_plan(request);
        }

        let effective = with_bookkeeping(request);
        let Attempt { outcome, warnings } = self.solution_for(&effective, context, cancel);
        let solution = match outcome {
            Ok(solution) => solution,
            Err(error) => return failure_plan(&effective, error, warnings),
        };

        let full_state = solution.units.clone();
        let new_state = solution.attached();
        let main = plan_between(
            &effective,
            &initial_state(profile),
            &new_state,
            true,
            warnings,
        );
        if depth == Depth::Bootstrap {
            return main;
        }
        let Some(agent) = agent else {
            return main;
        };
        if !resolves_meta_requirements(&effective_properties(&effective)) {
            return main;
        }

        if agent.id() == profile.id() {
            if agent.timestamp() != profile.timestamp() {
                warn!(
                    "profile {} changed since the request was made ({} != {})",
                    profile.id(),
                    profile.timestamp(),
                    agent.timestamp()
                );
                return ProvisioningPlan::failed(
                    profile.clone(),
                    PlannerStatus::failed(PlannerError::ProfileOutOfSync {
                        profile_id: profile.id().to_string(),
                    }),
                );
            }
            self.cohosted_installer_plan(&effective, context, &full_state, &new_state, main, cancel)
        } else {
            self.external_installer_plan(&effective, context, agent, &new_state, main, cancel)
        }
    }

    /// The agent is the profile being changed: the meta-requirements are resolved into the
    /// same profile, and the main plan starts from the state the installer plan leaves.
    fn cohosted_installer_plan(
        &self,
        request: &ChangeRequest,
        context: &ProvisioningContext,
        full_state: &BTreeSet<Arc<InstallableUnit>>,
        expected_state: &BTreeSet<Arc<InstallableUnit>>,
        main: ProvisioningPlan,
        cancel: &CancellationToken,
    ) -> ProvisioningPlan {
        let profile = request.profile();
        let all_meta = extract_meta_requirements(expected_state, &main);
        let meta = if request.removals().is_empty() {
            unsatisfied(profile, all_meta)
        } else {
            Some(all_meta)
        };
        let Some(meta) = meta.filter(|m| !m.is_empty()) else {
            return main;
        };
        info!(
            "resolving {} meta-requirement(s) into profile {}",
            meta.len(),
            profile.id()
        );

        let actions = actions_unit(profile, &meta);
        let mut agent_request = ChangeRequest::new(profile.clone());
        for (key, value) in request.property_adds() {
            agent_request.set_profile_property(key.clone(), value.clone());
        }
        for key in request.property_removes() {
            agent_request.remove_profile_property(key.clone());
        }
        for (unit, keys) in request.unit_property_removes() {
            for key in keys {
                agent_request.remove_unit_property(unit, key.clone());
            }
        }
        if let Some(previous) = previous_actions_unit(profile, profile.id()) {
            agent_request.remove(previous);
        }
        agent_request.add(actions.clone());

        let mut agent_context = ProvisioningContext::new()
            .with_repositories(Vec::<String>::new())
            .with_extra_units(full_state.iter().cloned());
        if let Some(explain) = context.property(PROP_EXPLAIN) {
            agent_context = agent_context.with_property(PROP_EXPLAIN, explain);
        }

        let agent_request = with_bookkeeping(&agent_request);
        let Attempt { outcome, .. } = self.solution_for(&agent_request, &agent_context, cancel);
        let agent_solution = match outcome {
            Ok(solution) => solution,
            Err(PlannerError::Cancelled) => {
                return ProvisioningPlan::failed(profile.clone(), PlannerStatus::cancelled())
            }
            Err(error) => {
                return nested_failure(
                    profile,
                    profile,
                    "The actions required to install the software are incompatible with it",
                    error,
                )
            }
        };

        let mut agent_units = agent_solution.units;
        agent_units.remove(actions.as_ref());
        let agent_state = attach_fragments(&agent_units, &associate_fragments(&agent_units));

        let installer = plan_between(
            request,
            &initial_state(profile),
            &agent_state,
            false,
            Vec::new(),
        );
        let mut plan = plan_between(
            request,
            &agent_state,
            expected_state,
            true,
            main.status().warnings().to_vec(),
        );
        plan.set_installer_plan(installer);
        plan
    }

    /// The installer runs from a different profile: the meta-requirements are installed
    /// there through a nested plan.
    fn external_installer_plan(
        &self,
        request: &ChangeRequest,
        context: &ProvisioningContext,
        agent: &Arc<Profile>,
        expected_state: &BTreeSet<Arc<InstallableUnit>>,
        mut main: ProvisioningPlan,
        cancel: &CancellationToken,
    ) -> ProvisioningPlan {
        let profile = request.profile();
        let Some(meta) = unsatisfied(agent, extract_meta_requirements(expected_state, &main))
        else {
            return main;
        };
        info!(
            "resolving {} meta-requirement(s) of {} into agent profile {}",
            meta.len(),
            profile.id(),
            agent.id()
        );

        let mut agent_request = ChangeRequest::new(agent.clone());
        agent_request.add(actions_unit(profile, &meta));
        if let Some(previous) = previous_actions_unit(agent, profile.id()) {
            agent_request.remove(previous);
        }

        let installer = self.plan_at(&agent_request, context, None, cancel, Depth::Bootstrap);
        match installer.status().error() {
            None => {
                main.set_installer_plan(installer);
                main
            }
            Some(PlannerError::Cancelled) => {
                ProvisioningPlan::failed(profile.clone(), PlannerStatus::cancelled())
            }
            Some(error) => nested_failure(
                profile,
                agent,
                "Cannot install the prerequisites of the requested software",
                error.clone(),
            ),
        }
    }

    /// Resolves an already bookkept request into the selected units.
    fn solution_for(
        &self,
        request: &ChangeRequest,
        context: &ProvisioningContext,
        cancel: &CancellationToken,
    ) -> Attempt {
        let mut warnings = Vec::new();
        let outcome = self.resolve(request, context, cancel, &mut warnings);
        Attempt { outcome, warnings }
    }

    fn resolve(
        &self,
        request: &ChangeRequest,
        context: &ProvisioningContext,
        cancel: &CancellationToken,
        warnings: &mut Vec<PlannerError>,
    ) -> Result<Solution, PlannerError> {
        let profile = request.profile();
        let properties = effective_properties(request);
        let environment = properties
            .get(PROP_ENVIRONMENTS)
            .map(|spec| Environment::from_spec(spec))
            .unwrap_or_default();
        let consider_meta = resolves_meta_requirements(&properties);

        let mut universe = self.gather(request, context, cancel, warnings)?;
        let root = root_unit(request, context);
        universe.insert(root.clone());

        let slice = Slicer::new(&universe, environment, consider_meta)
            .with_progress(self.progress.as_ref())
            .slice(&[root.clone()], cancel)
            .map_err(|e| match e {
                SliceError::Cancelled => PlannerError::Cancelled,
                SliceError::Unsatisfiable(explanation) => PlannerError::Unsatisfiable {
                    message: summarize(&explanation),
                    explanation,
                },
            })?;

        let already_installed: BTreeSet<Arc<InstallableUnit>> = profile
            .units()
            .filter(|u| profile.inclusion_rule(u).is_some() && !request.removals().contains(*u))
            .cloned()
            .collect();
        let mut projector = Projector::new(&slice, consider_meta);
        projector.encode(&root, &already_installed, profile, request.additions());

        let mut backend = (self.solver)();
        match projector.invoke_solver(backend.as_mut(), cancel) {
            ProjectorStatus::Satisfiable => Ok(projector.extract_solution()),
            ProjectorStatus::Cancelled => Err(PlannerError::Cancelled),
            ProjectorStatus::Unsatisfiable if !context.explain() => {
                Err(PlannerError::Unsatisfiable {
                    message: summarize(&BTreeSet::new()),
                    explanation: BTreeSet::new(),
                })
            }
            ProjectorStatus::Unsatisfiable => {
                match projector.explanation(backend.as_mut(), cancel) {
                    Ok(explanation) => {
                        debug!("no solution for profile {}: {:?}", profile.id(), explanation);
                        Err(PlannerError::Unsatisfiable {
                            message: summarize(&explanation),
                            explanation,
                        })
                    }
                    Err(SolverError::Cancelled) => Err(PlannerError::Cancelled),
                    Err(SolverError::Satisfiable) => Err(PlannerError::Unsatisfiable {
                        message: summarize(&BTreeSet::new()),
                        explanation: BTreeSet::new(),
                    }),
                }
            }
        }
    }

    /// Collects candidates keyed by identity: context extras and the request's units, the
    /// profile's units, then every repository in order.
    fn gather(
        &self,
        request: &ChangeRequest,
        context: &ProvisioningContext,
        cancel: &CancellationToken,
        warnings: &mut Vec<PlannerError>,
    ) -> Result<UnitIndex, PlannerError> {
        let mut found: BTreeSet<Arc<InstallableUnit>> = BTreeSet::new();
        let extras = context
            .extra_units
            .iter()
            .chain(request.additions())
            .chain(request.removals());
        for unit in extras {
            offer(&mut found, unit.clone());
        }
        if context.include_profile_units() {
            for unit in request.profile().units() {
                offer(&mut found, unit.clone());
            }
        }

        let locations = self.locations(context);
        self.progress
            .start(&ProgressInfo::new("gather").with_total(locations.len() as u64));
        for (i, location) in locations.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PlannerError::Cancelled);
            }
            self.progress.update(
                &ProgressInfo::new("gather")
                    .with_current(i as u64)
                    .with_total(locations.len() as u64)
                    .with_context(location.clone()),
            );
            match self.manager.load_repository(location) {
                Ok(repository) => {
                    let units = repository.query(&UnitQuery::All);
                    debug!("repository {} offers {} units", location, units.len());
                    for unit in units {
                        offer(&mut found, unit);
                    }
                }
                Err(e) => {
                    warn!("skipping repository {}: {}", location, e);
                    warnings.push(PlannerError::RepositoryUnreadable {
                        location: location.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        self.progress
            .finish(&ProgressInfo::new("gather").with_current(found.len() as u64));
        debug!("gathered {} candidate units", found.len());
        Ok(UnitIndex::new(found))
    }

    fn locations(&self, context: &ProvisioningContext) -> Vec<String> {
        context
            .repositories
            .clone()
            .unwrap_or_else(|| self.manager.known_repositories())
    }

    /// Known updates of `unit`, one per identity, preferring complete metadata.
    pub fn updates_for(
        &self,
        unit: &Arc<InstallableUnit>,
        context: &ProvisioningContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<InstallableUnit>>, PlannerError> {
        let query = UnitQuery::UpdatesOf(unit.clone());
        let mut found = BTreeSet::new();
        for extra in context.extra_units.iter().filter(|u| query.matches(u)) {
            offer(&mut found, extra.clone());
        }
        for location in self.locations(context) {
            if cancel.is_cancelled() {
                return Err(PlannerError::Cancelled);
            }
            match self.manager.load_repository(&location) {
                Ok(repository) => {
                    for update in repository.query(&query) {
                        offer(&mut found, update);
                    }
                }
                Err(e) => warn!("skipping repository {}: {}", location, e),
            }
        }
        Ok(found.into_iter().collect())
    }

    /// Request replacing each of `units` by its newest update, or, for units without one,
    /// adding the patches that apply to them as optional roots.
    pub fn update_request(
        &self,
        profile: &Arc<Profile>,
        units: &[Arc<InstallableUnit>],
        context: &ProvisioningContext,
        cancel: &CancellationToken,
    ) -> Result<ChangeRequest, PlannerError> {
        let mut request = ChangeRequest::new(profile.clone());
        for unit in units {
            let updates = self.updates_for(unit, context, cancel)?;
            let newest = updates
                .iter()
                .filter(|u| !u.is_patch())
                .max_by(|a, b| a.version().cmp(b.version()));
            match newest {
                Some(newest) => {
                    request.remove(unit.clone());
                    request.add(newest.clone());
                    if let Some(rule) = profile.inclusion_rule(unit) {
                        request.set_inclusion_rule(newest, rule);
                    }
                }
                None => {
                    for patch in updates.iter().filter(|u| u.is_patch()) {
                        request.add(patch.clone());
                        request.set_inclusion_rule(patch, InclusionRule::Optional);
                    }
                }
            }
        }
        Ok(request)
    }

    /// Plan turning `current` into `target`, using only the units `target` holds.
    pub fn diff_plan(
        &self,
        current: &Arc<Profile>,
        target: &Profile,
        cancel: &CancellationToken,
    ) -> ProvisioningPlan {
        let mut request = ChangeRequest::new(current.clone());
        request.remove_all(current.units().filter(|u| !target.contains(u)).cloned());
        request.add_all(target.units().filter(|u| !current.contains(u)).cloned());

        for (key, value) in target.properties() {
            if current.property(key) != Some(value.as_str()) {
                request.set_profile_property(key.clone(), value.clone());
            }
        }
        for key in current.properties().keys() {
            if target.property(key).is_none() {
                request.remove_profile_property(key.clone());
            }
        }

        for unit in target.units() {
            let wanted = target.unit_properties(unit);
            for (key, value) in wanted.into_iter().flatten() {
                if current.unit_property(unit, key) != Some(value.as_str()) {
                    request.set_unit_property(unit, key.clone(), value.clone());
                }
            }
            if !current.contains(unit) {
                continue;
            }
            for key in current.unit_properties(unit).into_iter().flat_map(|p| p.keys()) {
                if target.unit_property(unit, key).is_none() {
                    request.remove_unit_property(unit, key.clone());
                }
            }
        }

        let context = ProvisioningContext::new()
            .with_repositories(Vec::<String>::new())
            .with_extra_units(target.units().cloned())
            .with_property(PROP_INCLUDE_PROFILE_UNITS, "false");
        self.plan_at(&request, &context, None, cancel, Depth::Primary)
    }
}

/// Keeps the first copy of an identity unless a later one has complete metadata.
fn offer(found: &mut BTreeSet<Arc<InstallableUnit>>, unit: Arc<InstallableUnit>) {
    let better = match found.get(unit.as_ref()) {
        Some(existing) => existing.is_partial() && !unit.is_partial(),
        None => true,
    };
    if better {
        found.replace(unit);
    }
}

/// Copy of `request` recording inclusion rules: added units are rooted strictly unless
/// the request says otherwise, removed units lose their rule.
fn with_bookkeeping(request: &ChangeRequest) -> ChangeRequest {
    let mut effective = request.clone();
    for unit in request.additions() {
        if request.requested_inclusion_rule(unit).is_none() {
            effective.set_inclusion_rule(unit, InclusionRule::Strict);
        }
    }
    for unit in request.removals() {
        if request.profile().inclusion_rule(unit).is_some() {
            effective.remove_unit_property(unit, PROP_INCLUSION_RULES);
        }
    }
    effective
}

/// Profile properties as they will be once the request is applied.
fn effective_properties(request: &ChangeRequest) -> BTreeMap<String, String> {
    let mut properties = request.profile().properties().clone();
    for key in request.property_removes() {
        properties.remove(key);
    }
    properties.extend(
        request
            .property_adds()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    properties
}

fn resolves_meta_requirements(properties: &BTreeMap<String, String>) -> bool {
    properties
        .get(PROP_RESOLVE_META_REQUIREMENTS)
        .map(|v| !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true)
}

/// The synthetic unit whose requirements are the request.
fn root_unit(request: &ChangeRequest, context: &ProvisioningContext) -> Arc<InstallableUnit> {
    let profile = request.profile();
    let mut builder = InstallableUnit::builder(
        format!("{}.{}", ROOT_UNIT_PREFIX, profile.id()),
        Version::new(1, 0, 0),
    )
    .property(PROP_SYNTHETIC, "true");

    for unit in request.additions() {
        let rule = request
            .requested_inclusion_rule(unit)
            .unwrap_or(InclusionRule::Strict);
        builder = builder.requires(rooted(unit, rule));
    }
    for unit in profile.units() {
        if request.removals().contains(unit) || request.additions().contains(unit) {
            continue;
        }
        let rule = request
            .requested_inclusion_rule(unit)
            .or_else(|| profile.inclusion_rule(unit));
        if let Some(rule) = rule {
            builder = builder.requires(rooted(unit, rule));
        }
    }
    for requirement in &context.additional_requirements {
        builder = builder.requires(requirement.clone());
    }
    builder.build()
}

fn rooted(unit: &InstallableUnit, rule: InclusionRule) -> Requirement {
    let requirement = Requirement::strict(unit.id(), unit.version());
    match rule {
        InclusionRule::Strict => requirement,
        InclusionRule::Optional => requirement.optional(),
    }
}

/// Profile units with the fragments they currently host attached.
fn initial_state(profile: &Profile) -> BTreeSet<Arc<InstallableUnit>> {
    let units = profile.unit_set();
    attach_fragments(units, &associate_fragments(units))
}

/// Per-request statuses and the rooted units that disappear without being asked to.
fn request_statuses(
    request: &ChangeRequest,
    to: &BTreeSet<Arc<InstallableUnit>>,
) -> (
    BTreeMap<Arc<InstallableUnit>, RequestStatus>,
    BTreeMap<Arc<InstallableUnit>, RequestStatus>,
) {
    let mut changes = BTreeMap::new();
    for unit in request.additions() {
        let severity = if to.contains(unit) {
            Severity::Ok
        } else {
            Severity::Error
        };
        changes.insert(
            unit.clone(),
            RequestStatus {
                kind: RequestStatusKind::Added,
                severity,
            },
        );
    }
    for unit in request.removals() {
        let severity = if to.contains(unit) {
            Severity::Error
        } else {
            Severity::Ok
        };
        changes.insert(
            unit.clone(),
            RequestStatus {
                kind: RequestStatusKind::Removed,
                severity,
            },
        );
    }

    let profile = request.profile();
    let side_effects = profile
        .units()
        .filter(|u| {
            profile.inclusion_rule(u).is_some() && !to.contains(*u) && !changes.contains_key(*u)
        })
        .map(|u| {
            (
                u.clone(),
                RequestStatus {
                    kind: RequestStatusKind::Removed,
                    severity: Severity::Info,
                },
            )
        })
        .collect();
    (changes, side_effects)
}

fn plan_between(
    request: &ChangeRequest,
    from: &BTreeSet<Arc<InstallableUnit>>,
    to: &BTreeSet<Arc<InstallableUnit>>,
    with_properties: bool,
    warnings: Vec<PlannerError>,
) -> ProvisioningPlan {
    let mut operands: Vec<Operand> = generate_operands(from, to);
    let status = if with_properties {
        operands.extend(property_operands(request, to));
        let (changes, side_effects) = request_statuses(request, to);
        PlannerStatus::ok().with_changes(changes, side_effects)
    } else {
        PlannerStatus::ok()
    };
    debug!(
        "plan for profile {}: {} operand(s)",
        request.profile().id(),
        operands.len()
    );
    ProvisioningPlan::new(
        request.profile().clone(),
        operands,
        to.clone(),
        status.with_warnings(warnings),
    )
}

/// Applies additions and removals as given.
fn absolute_plan(request: &ChangeRequest) -> ProvisioningPlan {
    let profile = request.profile();
    let from = profile.unit_set().clone();
    let mut to = from.clone();
    for unit in request.removals() {
        to.remove(unit);
    }
    for unit in request.additions() {
        to.replace(unit.clone());
    }
    info!(
        "absolute request on profile {}: {} unit(s) before, {} after",
        profile.id(),
        from.len(),
        to.len()
    );
    plan_between(request, &from, &to, true, Vec::new())
}

fn failure_plan(
    request: &ChangeRequest,
    error: PlannerError,
    warnings: Vec<PlannerError>,
) -> ProvisioningPlan {
    let unsatisfiable = matches!(error, PlannerError::Unsatisfiable { .. });
    let mut status = PlannerStatus::failed(error).with_warnings(warnings);
    if unsatisfiable {
        let mut changes = BTreeMap::new();
        for unit in request.additions() {
            changes.insert(
                unit.clone(),
                RequestStatus {
                    kind: RequestStatusKind::Added,
                    severity: Severity::Error,
                },
            );
        }
        for unit in request.removals() {
            changes.insert(
                unit.clone(),
                RequestStatus {
                    kind: RequestStatusKind::Removed,
                    severity: Severity::Error,
                },
            );
        }
        status = status.with_changes(changes, BTreeMap::new());
    }
    ProvisioningPlan::failed(request.profile().clone(), status)
}

fn nested_failure(
    profile: &Arc<Profile>,
    installer_profile: &Arc<Profile>,
    message: &str,
    cause: PlannerError,
) -> ProvisioningPlan {
    warn!("{}: {}", message, cause);
    let error = PlannerError::NestedBootstrapFailure {
        message: message.to_string(),
        source: Box::new(cause),
    };
    let mut plan = ProvisioningPlan::failed(profile.clone(), PlannerStatus::failed(error.clone()));
    plan.set_installer_plan(ProvisioningPlan::failed(
        installer_profile.clone(),
        PlannerStatus::failed(error),
    ));
    plan
}

/// Meta-requirements of the new state and of the units the plan removes.
fn extract_meta_requirements(
    state: &BTreeSet<Arc<InstallableUnit>>,
    plan: &ProvisioningPlan,
) -> BTreeSet<Requirement> {
    let removed = plan.removals();
    state
        .iter()
        .chain(removed.iter())
        .flat_map(|u| u.meta_requirements().iter().cloned())
        .collect()
}

/// All of `meta` when any of them is unmet in `profile`.
fn unsatisfied(profile: &Profile, meta: BTreeSet<Requirement>) -> Option<BTreeSet<Requirement>> {
    let missing = meta
        .iter()
        .any(|requirement| !profile.units().any(|u| u.satisfies(requirement)));
    missing.then_some(meta)
}

fn actions_unit(target: &Profile, meta: &BTreeSet<Requirement>) -> Arc<InstallableUnit> {
    let version = Version::new(1, 0, 0).with_qualifier(target.timestamp().to_string());
    let mut builder =
        InstallableUnit::builder(format!("{}.{}", ACTIONS_UNIT_PREFIX, target.id()), version);
    for requirement in meta {
        builder = builder.requires(requirement.clone());
    }
    builder.build()
}

fn previous_actions_unit(profile: &Profile, target_id: &str) -> Option<Arc<InstallableUnit>> {
    profile
        .query(&UnitQuery::Id(format!("{}.{}", ACTIONS_UNIT_PREFIX, target_id)))
        .into_iter()
        .next()
}
