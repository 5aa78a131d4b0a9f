//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::cancel::CancellationToken;
use crate::context::{ProvisioningContext, PROP_EXPLAIN};
use crate::metadata::{
    Filter, InstallableUnit, PatchInfo, Requirement, RequirementChange, UnitBuilder, Version,
    VersionRange, PROP_PARTIAL,
};
use crate::profile::{InclusionRule, Profile, PROP_ENVIRONMENTS};
use crate::progress::{ProgressInfo, ProgressReporter};
use crate::repository::{MemoryRepository, MemoryRepositoryManager};
use crate::request::ChangeRequest;
use crate::solver::{Outcome, Problem, SatSolver, SolverBackend};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn v(s: &str) -> Version {
    Version::parse(s).expect("version")
}

fn range(s: &str) -> VersionRange {
    VersionRange::parse(s).expect("range")
}

fn iu(id: &str, version: &str) -> UnitBuilder {
    InstallableUnit::builder(id, v(version))
}

fn requires(id: &str, r: &str) -> Requirement {
    Requirement::unit(id, range(r))
}

fn planner(units: Vec<Arc<InstallableUnit>>) -> Planner {
    let manager = MemoryRepositoryManager::new();
    manager.add_repository(Arc::new(MemoryRepository::new("mem:main", units)));
    Planner::new(Arc::new(manager))
}

fn install(planner: &Planner, profile: Profile, units: &[Arc<InstallableUnit>]) -> ProvisioningPlan {
    let mut request = ChangeRequest::new(Arc::new(profile));
    request.add_all(units.iter().cloned());
    planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        None,
        &CancellationToken::new(),
    )
}

fn unit_operands(plan: &ProvisioningPlan) -> Vec<String> {
    plan.operands()
        .iter()
        .filter(|op| {
            !matches!(
                op.kind(),
                OperandKind::ProfileProperty | OperandKind::UnitProperty
            )
        })
        .map(ToString::to_string)
        .collect()
}

fn state(plan: &ProvisioningPlan) -> Vec<String> {
    plan.future_state().iter().map(ToString::to_string).collect()
}

#[test]
fn exact_range_picks_the_matching_version() {
    let a = iu("a", "1.0").requires(requires("b", "[1.0,1.0]")).build();
    let planner = planner(vec![a.clone(), iu("b", "1.0").build(), iu("b", "2.0").build()]);
    let plan = install(&planner, Profile::new("p"), &[a.clone()]);
    assert_eq!(plan.status().severity(), Severity::Ok);
    assert_eq!(state(&plan), vec!["a 1.0.0", "b 1.0.0"]);
    assert_eq!(unit_operands(&plan), vec!["install a 1.0.0", "install b 1.0.0"]);
    assert_eq!(
        plan.status().request_changes()[&a],
        RequestStatus {
            kind: RequestStatusKind::Added,
            severity: Severity::Ok
        }
    );
    assert!(plan.operands().contains(&Operand::UnitProperty {
        unit: a,
        key: crate::profile::PROP_INCLUSION_RULES.to_string(),
        from: None,
        to: Some("STRICT".to_string()),
    }));
}

#[test]
fn absent_optional_requirement_is_ignored() {
    let a = iu("a", "1.0")
        .requires(requires("c", "").optional())
        .build();
    let plan = install(&planner(vec![a.clone()]), Profile::new("p"), &[a]);
    assert!(plan.status().is_ok());
    assert_eq!(state(&plan), vec!["a 1.0.0"]);
}

#[test]
fn filtered_hard_dependency_fails_with_filtered_out() {
    let a = iu("a", "1.0").requires(requires("b", "")).build();
    let b = iu("b", "1.0")
        .filter(Filter::parse("(os=linux)").expect("filter"))
        .build();
    let mut profile = Profile::new("p");
    profile.set_property(PROP_ENVIRONMENTS, "os=win32");
    let plan = install(&planner(vec![a.clone(), b]), profile, &[a]);

    assert_eq!(plan.status().severity(), Severity::Error);
    let explanation = plan.status().explanation().expect("explanation");
    assert!(explanation
        .iter()
        .any(|e| matches!(e, Explanation::FilteredOut { unit, .. } if unit.id() == "b")));
    assert!(plan.operands().is_empty());
    assert!(plan
        .status()
        .message()
        .contains("some dependencies are not available"));
}

#[test]
fn filtered_optional_dependency_is_fine() {
    let a = iu("a", "1.0")
        .requires(requires("b", "").optional())
        .build();
    let b = iu("b", "1.0")
        .filter(Filter::parse("(os=linux)").expect("filter"))
        .build();
    let mut profile = Profile::new("p");
    profile.set_property(PROP_ENVIRONMENTS, "os=win32");
    let plan = install(&planner(vec![a.clone(), b]), profile, &[a]);
    assert!(plan.status().is_ok());
    assert_eq!(state(&plan), vec!["a 1.0.0"]);
}

#[test]
fn optional_dependency_keeps_its_own_requirements() {
    let a = iu("a", "1.0")
        .requires(requires("b", "").optional())
        .build();
    let b = iu("b", "1.0").requires(requires("c", "")).build();

    let without_c = install(&planner(vec![a.clone(), b.clone()]), Profile::new("p"), &[a.clone()]);
    assert!(without_c.status().is_ok());
    assert_eq!(state(&without_c), vec!["a 1.0.0"]);

    let c = iu("c", "1.0").build();
    let with_c = install(&planner(vec![a.clone(), b, c]), Profile::new("p"), &[a]);
    assert_eq!(state(&with_c), vec!["a 1.0.0", "b 1.0.0", "c 1.0.0"]);
}

fn patch_setup() -> (Profile, Arc<InstallableUnit>, Arc<InstallableUnit>, Vec<Arc<InstallableUnit>>) {
    let c1 = iu("c", "1.0").singleton(true).build();
    let c15 = iu("c", "1.5").singleton(true).build();
    let d = iu("d", "1.0").requires(requires("c", "[1.0,1.0]")).build();
    let p = iu("p", "1.0")
        .patch(PatchInfo {
            changes: vec![RequirementChange::replace(
                requires("c", "[1.0,1.0]"),
                requires("c", "[1.0,2.0)"),
            )],
            applicability_scope: vec![vec![requires("d", "")]],
            lifecycle: None,
        })
        .build();
    let mut profile = Profile::new("p");
    profile.add_root(d.clone(), InclusionRule::Strict);
    profile.add_unit(c1.clone());
    (profile, p.clone(), c15.clone(), vec![c1, c15, d, p])
}

#[test]
fn patch_relaxes_an_installed_requirement() {
    let (profile, patch, c15, universe) = patch_setup();
    let planner = planner(universe);
    let plan = install(&planner, profile, &[patch, c15]);
    assert!(plan.status().is_ok(), "{}", plan.status().message());
    assert_eq!(state(&plan), vec!["c 1.5.0", "d 1.0.0", "p 1.0.0"]);
    assert_eq!(
        unit_operands(&plan),
        vec!["update c 1.0.0 -> 1.5.0", "install p 1.0.0"]
    );
}

#[test]
fn without_the_patch_the_singleton_conflicts() {
    let (profile, _, c15, universe) = patch_setup();
    let plan = install(&planner(universe), profile, &[c15]);
    assert_eq!(plan.status().severity(), Severity::Error);
    let explanation = plan.status().explanation().expect("explanation");
    assert!(explanation
        .iter()
        .any(|e| matches!(e, Explanation::SingletonConflict { id, .. } if id == "c")));
    assert!(explanation
        .iter()
        .any(|e| matches!(e, Explanation::IUInstalled { unit } if unit.id() == "d")));
    assert!(plan.status().message().contains("conflicting dependencies"));
}

#[test]
fn singleton_versions_never_coexist() {
    let s1 = iu("s", "1.0").singleton(true).build();
    let s2 = iu("s", "2.0").singleton(true).build();
    let plan = install(&planner(vec![s1.clone(), s2.clone()]), Profile::new("p"), &[s1, s2]);
    assert_eq!(plan.status().severity(), Severity::Error);
    assert!(!plan.status().explanation().expect("explanation").is_empty());
    assert_eq!(
        plan.status().request_changes().values().filter(|s| s.severity == Severity::Error).count(),
        2
    );
}

fn installed_profile() -> (Profile, Vec<Arc<InstallableUnit>>) {
    let a = iu("a", "1.0").requires(requires("b", "")).build();
    let b1 = iu("b", "1.0").build();
    let b2 = iu("b", "2.0").build();
    let mut profile = Profile::new("p");
    profile.add_root(a.clone(), InclusionRule::Strict);
    profile.add_unit(b1.clone());
    (profile, vec![a, b1, b2])
}

#[test]
fn empty_request_changes_nothing() {
    let (profile, universe) = installed_profile();
    let plan = install(&planner(universe), profile, &[]);
    assert_eq!(plan.status().severity(), Severity::Ok);
    assert!(plan.operands().is_empty());
    assert_eq!(state(&plan), vec!["a 1.0.0", "b 1.0.0"]);
}

#[test]
fn planning_twice_gives_the_same_plan() {
    let (profile, universe) = installed_profile();
    let planner = planner(universe);
    let x = iu("x", "1.0").requires(requires("b", "[2.0,3.0)")).build();
    let profile = Arc::new(profile);
    let mut request = ChangeRequest::new(profile);
    request.add(x);
    let context = ProvisioningContext::new();
    let cancel = CancellationToken::new();
    let first = planner.provisioning_plan(&request, &context, None, &cancel);
    let second = planner.provisioning_plan(&request, &context, None, &cancel);
    assert_eq!(first.operands(), second.operands());
    assert_eq!(
        unit_operands(&first),
        vec!["update b 1.0.0 -> 2.0.0", "install x 1.0.0"]
    );
    assert_eq!(first.additions().len(), 2);
    assert_eq!(first.removals().len(), 1);
}

#[test]
fn diff_plan_installs_the_difference() {
    let a = iu("a", "1.0").build();
    let x = iu("x", "1.0").build();
    let mut current = Profile::new("p");
    current.add_root(a.clone(), InclusionRule::Strict);
    let mut target = current.clone();
    target.add_root(x.clone(), InclusionRule::Strict);
    target.set_property("flavor", "full");

    let plan = planner(vec![]).diff_plan(&Arc::new(current), &target, &CancellationToken::new());
    assert!(plan.status().is_ok());
    assert_eq!(unit_operands(&plan), vec!["install x 1.0.0"]);
    assert!(plan.operands().contains(&Operand::ProfileProperty {
        key: "flavor".to_string(),
        from: None,
        to: Some("full".to_string()),
    }));
}

#[test]
fn cancelled_request_reports_cancel() {
    let a = iu("a", "1.0").build();
    let planner = planner(vec![a.clone()]);
    let mut request = ChangeRequest::new(Arc::new(Profile::new("p")));
    request.add(a);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let plan = planner.provisioning_plan(&request, &ProvisioningContext::new(), None, &cancel);
    assert_eq!(plan.status().severity(), Severity::Cancel);
    assert!(matches!(plan.status().error(), Some(PlannerError::Cancelled)));
    assert!(plan.operands().is_empty());
}

fn meta_setup() -> (Arc<InstallableUnit>, Planner) {
    let a = iu("a", "1.0")
        .meta_requires(requires("touchpoint", ""))
        .build();
    let touchpoint = iu("touchpoint", "1.0").build();
    (a.clone(), planner(vec![a, touchpoint]))
}

#[test]
fn cohosted_installer_plan_installs_actions_first() {
    let (a, planner) = meta_setup();
    let profile = Arc::new(Profile::new("self").with_timestamp(42));
    let mut request = ChangeRequest::new(profile.clone());
    request.add(a);
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        Some(&profile),
        &CancellationToken::new(),
    );
    assert!(plan.status().is_ok(), "{}", plan.status().message());
    assert_eq!(unit_operands(&plan), vec!["install a 1.0.0"]);
    let installer = plan.installer_plan().expect("installer plan");
    assert_eq!(unit_operands(installer), vec!["install touchpoint 1.0.0"]);
    assert_eq!(state(&plan), vec!["a 1.0.0", "touchpoint 1.0.0"]);
}

#[test]
fn external_installer_plan_targets_the_agent() {
    let (a, planner) = meta_setup();
    let profile = Arc::new(Profile::new("target").with_timestamp(7));
    let agent = Arc::new(Profile::new("agent"));
    let mut request = ChangeRequest::new(profile);
    request.add(a);
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        Some(&agent),
        &CancellationToken::new(),
    );
    assert!(plan.status().is_ok(), "{}", plan.status().message());
    let installer = plan.installer_plan().expect("installer plan");
    assert_eq!(installer.profile().id(), "agent");
    assert_eq!(
        unit_operands(installer),
        vec![
            format!("install {}.target 1.0.0.7", ACTIONS_UNIT_PREFIX),
            "install touchpoint 1.0.0".to_string()
        ]
    );
    assert!(installer.installer_plan().is_none());
}

#[test]
fn agent_meeting_meta_requirements_needs_no_installer_plan() {
    let (a, planner) = meta_setup();
    let profile = Arc::new(Profile::new("target"));
    let mut agent = Profile::new("agent");
    agent.add_unit(iu("touchpoint", "1.0").build());
    let mut request = ChangeRequest::new(profile);
    request.add(a);
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        Some(&Arc::new(agent)),
        &CancellationToken::new(),
    );
    assert!(plan.status().is_ok());
    assert!(plan.installer_plan().is_none());
}

#[test]
fn unresolvable_meta_requirements_fail_the_bootstrap() {
    let a = iu("a", "1.0").meta_requires(requires("touchpoint", "")).build();
    let touchpoint = iu("touchpoint", "1.0")
        .requires(requires("nowhere", ""))
        .build();
    let planner = planner(vec![a.clone(), touchpoint]);
    let mut profile = Profile::new("target");
    profile.set_property(crate::profile::PROP_RESOLVE_META_REQUIREMENTS, "true");
    let mut request = ChangeRequest::new(Arc::new(profile));
    request.add(a);
    // The main solve needs the touchpoint too, so it fails before any bootstrap.
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        Some(&Arc::new(Profile::new("agent"))),
        &CancellationToken::new(),
    );
    assert_eq!(plan.status().severity(), Severity::Error);
    assert!(matches!(
        plan.status().error(),
        Some(PlannerError::Unsatisfiable { .. })
    ));
}

#[test]
fn agent_resolution_failure_is_a_nested_bootstrap_failure() {
    let a = iu("a", "1.0").meta_requires(requires("touchpoint", "")).build();
    let touchpoint = iu("touchpoint", "1.0")
        .filter(Filter::parse("(os=linux)").expect("filter"))
        .build();
    let planner = planner(vec![a.clone(), touchpoint]);
    let mut profile = Profile::new("target");
    profile.set_property(PROP_ENVIRONMENTS, "os=linux");
    let mut request = ChangeRequest::new(Arc::new(profile));
    request.add(a);
    let mut agent = Profile::new("agent");
    agent.set_property(PROP_ENVIRONMENTS, "os=win32");
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        Some(&Arc::new(agent)),
        &CancellationToken::new(),
    );
    assert_eq!(plan.status().severity(), Severity::Error);
    match plan.status().error() {
        Some(PlannerError::NestedBootstrapFailure { source, .. }) => {
            assert!(matches!(**source, PlannerError::Unsatisfiable { .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
    let installer = plan.installer_plan().expect("failed installer plan");
    assert_eq!(installer.profile().id(), "agent");
    assert!(plan.status().explanation().is_some());
}

#[test]
fn out_of_sync_agent_profile_is_rejected() {
    let (a, planner) = meta_setup();
    let profile = Arc::new(Profile::new("self").with_timestamp(1));
    let stale = Arc::new(Profile::new("self").with_timestamp(2));
    let mut request = ChangeRequest::new(profile);
    request.add(a);
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        Some(&stale),
        &CancellationToken::new(),
    );
    assert!(matches!(
        plan.status().error(),
        Some(PlannerError::ProfileOutOfSync { profile_id }) if profile_id == "self"
    ));
}

#[test]
fn absolute_request_is_applied_verbatim() {
    let a = iu("a", "1.0").build();
    let broken = iu("b", "1.0").requires(requires("nowhere", "")).build();
    let mut profile = Profile::new("p");
    profile.add_root(a.clone(), InclusionRule::Strict);
    let mut request = ChangeRequest::new(Arc::new(profile));
    request.remove(a);
    request.add(broken);
    request.set_absolute(true);
    let plan = planner(vec![]).provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        None,
        &CancellationToken::new(),
    );
    assert!(plan.status().is_ok());
    assert_eq!(unit_operands(&plan), vec!["uninstall a 1.0.0", "install b 1.0.0"]);
    assert!(plan.installer_plan().is_none());
}

#[test]
fn updates_are_deduplicated_by_identity() {
    let a1 = iu("a", "1.0").build();
    let partial = iu("a", "2.0").property(PROP_PARTIAL, "true").build();
    let complete = iu("a", "2.0").property("origin", "second").build();
    let a3 = iu("a", "3.0").build();
    let manager = MemoryRepositoryManager::new();
    manager.add_repository(Arc::new(MemoryRepository::new("mem:one", vec![partial])));
    manager.add_repository(Arc::new(MemoryRepository::new("mem:two", vec![complete, a3])));
    manager.add_unreadable("mem:broken", "truncated");
    let planner = Planner::new(Arc::new(manager));

    let updates = planner
        .updates_for(&a1, &ProvisioningContext::new(), &CancellationToken::new())
        .expect("updates");
    let found: Vec<String> = updates.iter().map(ToString::to_string).collect();
    assert_eq!(found, vec!["a 2.0.0", "a 3.0.0"]);
    assert_eq!(updates[0].property("origin"), Some("second"));
}

#[test]
fn update_request_replaces_with_newest() {
    let a1 = iu("a", "1.0").build();
    let a2 = iu("a", "2.0").build();
    let mut profile = Profile::new("p");
    profile.add_root(a1.clone(), InclusionRule::Optional);
    let profile = Arc::new(profile);
    let planner = planner(vec![a1.clone(), a2.clone()]);
    let cancel = CancellationToken::new();
    let request = planner
        .update_request(&profile, &[a1.clone()], &ProvisioningContext::new(), &cancel)
        .expect("request");
    assert!(request.removals().contains(&a1));
    assert!(request.additions().contains(&a2));
    assert_eq!(
        request.requested_inclusion_rule(&a2),
        Some(InclusionRule::Optional)
    );

    let plan = planner.provisioning_plan(&request, &ProvisioningContext::new(), None, &cancel);
    assert_eq!(unit_operands(&plan), vec!["update a 1.0.0 -> 2.0.0"]);
}

#[test]
fn update_request_falls_back_to_patches() {
    let d = iu("d", "1.0").build();
    let patch = iu("d.patch", "1.0")
        .patch(PatchInfo {
            changes: vec![],
            applicability_scope: vec![],
            lifecycle: Some(requires("d", "[1.0,1.0]")),
        })
        .build();
    let mut profile = Profile::new("p");
    profile.add_root(d.clone(), InclusionRule::Strict);
    let planner = planner(vec![d.clone(), patch.clone()]);
    let request = planner
        .update_request(
            &Arc::new(profile),
            &[d],
            &ProvisioningContext::new(),
            &CancellationToken::new(),
        )
        .expect("request");
    assert!(request.removals().is_empty());
    assert!(request.additions().contains(&patch));
    assert_eq!(
        request.requested_inclusion_rule(&patch),
        Some(InclusionRule::Optional)
    );
}

#[test]
fn side_effect_removals_are_reported_as_info() {
    let x1 = iu("x", "1.0").singleton(true).build();
    let x2 = iu("x", "2.0").singleton(true).build();
    let mut profile = Profile::new("p");
    profile.add_root(x1.clone(), InclusionRule::Optional);
    let plan = install(&planner(vec![x1.clone(), x2.clone()]), profile, &[x2]);
    assert_eq!(plan.status().severity(), Severity::Info);
    assert!(plan.status().is_ok());
    assert_eq!(
        plan.status().side_effects()[&x1],
        RequestStatus {
            kind: RequestStatusKind::Removed,
            severity: Severity::Info
        }
    );
    assert_eq!(unit_operands(&plan), vec!["update x 1.0.0 -> 2.0.0"]);
}

#[test]
fn contradictory_request_is_invalid() {
    let a = iu("a", "1.0").build();
    let mut request = ChangeRequest::new(Arc::new(Profile::new("p")));
    request.add(a.clone());
    request.remove(a);
    let plan = planner(vec![]).provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        None,
        &CancellationToken::new(),
    );
    assert!(matches!(
        plan.status().error(),
        Some(PlannerError::InvalidRequest(_))
    ));
}

#[test]
fn unreadable_repositories_are_skipped_with_a_warning() {
    let a = iu("a", "1.0").requires(requires("b", "")).build();
    let manager = MemoryRepositoryManager::new();
    manager.add_unreadable("mem:broken", "checksum mismatch");
    manager.add_repository(Arc::new(MemoryRepository::new(
        "mem:good",
        vec![a.clone(), iu("b", "1.0").build()],
    )));
    let plan = install(&Planner::new(Arc::new(manager)), Profile::new("p"), &[a]);
    assert!(plan.status().is_ok());
    assert_eq!(plan.status().warnings().len(), 1);
    assert!(matches!(
        &plan.status().warnings()[0],
        PlannerError::RepositoryUnreadable { location, .. } if location == "mem:broken"
    ));
}

#[test]
fn losing_every_repository_surfaces_as_missing_units() {
    let a = iu("a", "1.0").requires(requires("b", "")).build();
    let manager = MemoryRepositoryManager::new();
    manager.add_unreadable("mem:broken", "checksum mismatch");
    let plan = install(&Planner::new(Arc::new(manager)), Profile::new("p"), &[a]);
    assert_eq!(plan.status().severity(), Severity::Error);
    assert_eq!(plan.status().warnings().len(), 1);
    assert!(plan
        .status()
        .explanation()
        .expect("explanation")
        .iter()
        .any(|e| matches!(e, Explanation::MissingIU { .. })));
}

#[test]
fn explanation_can_be_switched_off() {
    let a = iu("a", "1.0").requires(requires("b", "")).build();
    let mut request = ChangeRequest::new(Arc::new(Profile::new("p")));
    request.add(a.clone());
    let context = ProvisioningContext::new().with_property(PROP_EXPLAIN, "false");
    let plan = planner(vec![a]).provisioning_plan(&request, &context, None, &CancellationToken::new());
    assert_eq!(plan.status().severity(), Severity::Error);
    assert_eq!(plan.status().explanation().map(|e| e.len()), Some(0));
}

#[test]
fn fragments_are_attached_to_their_hosts() {
    let host = iu("host", "1.0").build();
    let fragment = iu("host.nl", "1.0")
        .fragment_of(vec![requires("host", "")])
        .build();
    let plan = install(
        &planner(vec![host.clone(), fragment.clone()]),
        Profile::new("p"),
        &[host.clone(), fragment.clone()],
    );
    assert!(plan.status().is_ok());
    let resolved = plan.future_state().get(host.as_ref()).expect("host");
    assert_eq!(resolved.attached_fragments(), &[fragment]);
}

#[test]
fn missing_version_is_reported_as_mismatch() {
    let a = iu("a", "1.0").requires(requires("b", "[3.0,4.0)")).build();
    let plan = install(
        &planner(vec![a.clone(), iu("b", "1.0").build(), iu("b", "2.0").build()]),
        Profile::new("p"),
        &[a],
    );
    let explanation = plan.status().explanation().expect("explanation");
    assert!(explanation.iter().any(|e| matches!(
        e,
        Explanation::VersionMismatch { available, .. } if available == &vec![v("1.0"), v("2.0")]
    )));
}

/// Units `a00`.. in two versions each, all required by `bundle`, which also needs a `z`
/// whose versions both want two versions of the singleton `s`.
fn many_choices_without_a_solution(
    n: usize,
) -> (Arc<InstallableUnit>, Vec<Arc<InstallableUnit>>) {
    let mut units = Vec::new();
    let mut bundle = iu("bundle", "1.0").requires(requires("z", ""));
    for i in 0..n {
        let id = format!("a{:02}", i);
        bundle = bundle.requires(requires(&id, ""));
        units.push(iu(&id, "1.0").build());
        units.push(iu(&id, "2.0").build());
    }
    for version in ["1.0", "2.0"] {
        units.push(
            iu("z", version)
                .requires(requires("s", "[1.0,1.0]"))
                .requires(requires("s", "[2.0,2.0]"))
                .build(),
        );
    }
    units.push(iu("s", "1.0").singleton(true).build());
    units.push(iu("s", "2.0").singleton(true).build());
    let bundle = bundle.build();
    units.push(bundle.clone());
    (bundle, units)
}

#[test]
fn many_independent_choices_fail_promptly() {
    let (root, units) = many_choices_without_a_solution(24);
    let planner = planner(units);
    for explain in ["false", "true"] {
        let mut request = ChangeRequest::new(Arc::new(Profile::new("p")));
        request.add(root.clone());
        let context = ProvisioningContext::new().with_property(PROP_EXPLAIN, explain);
        let started = Instant::now();
        let plan = planner.provisioning_plan(&request, &context, None, &CancellationToken::new());
        assert!(
            started.elapsed() < Duration::from_secs(30),
            "planning took {:?} with explain={}",
            started.elapsed(),
            explain
        );
        assert_eq!(plan.status().severity(), Severity::Error);
        if explain == "true" {
            let explanation = plan.status().explanation().expect("explanation");
            assert!(explanation
                .iter()
                .any(|e| matches!(e, Explanation::SingletonConflict { id, .. } if id == "s")));
        }
    }
}

/// Delegates to the real engine but cancels `token` when the `cancel_at`-th solve starts.
struct CancelOnSolve {
    inner: SatSolver,
    calls: Arc<AtomicUsize>,
    cancel_at: usize,
    token: CancellationToken,
}

impl SolverBackend for CancelOnSolve {
    fn solve(&mut self, problem: &Problem, cancel: &CancellationToken) -> Outcome {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_at {
            self.token.cancel();
        }
        self.inner.solve(problem, cancel)
    }
}

fn cancelling_on_solve(
    planner: Planner,
    cancel_at: usize,
    token: &CancellationToken,
) -> (Planner, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let token = token.clone();
    let planner = planner.with_solver(move || {
        Box::new(CancelOnSolve {
            inner: SatSolver::new(),
            calls: counter.clone(),
            cancel_at,
            token: token.clone(),
        }) as Box<dyn SolverBackend>
    });
    (planner, calls)
}

fn assert_cancelled(plan: &ProvisioningPlan) {
    assert_eq!(plan.status().severity(), Severity::Cancel, "{}", plan.status().message());
    assert!(matches!(plan.status().error(), Some(PlannerError::Cancelled)));
    assert!(plan.operands().is_empty());
    assert!(plan.installer_plan().is_none());
}

#[test]
fn cancellation_during_the_solve_reports_cancel() {
    let a = iu("a", "1.0").requires(requires("b", "")).build();
    let token = CancellationToken::new();
    let (planner, calls) =
        cancelling_on_solve(planner(vec![a.clone(), iu("b", "1.0").build()]), 1, &token);
    let mut request = ChangeRequest::new(Arc::new(Profile::new("p")));
    request.add(a);
    let plan = planner.provisioning_plan(&request, &ProvisioningContext::new(), None, &token);
    assert_cancelled(&plan);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn cancellation_during_the_explanation_reports_cancel() {
    let (root, units) = many_choices_without_a_solution(4);
    let token = CancellationToken::new();
    // the first solve fails, the core search behind it is cancelled
    let (planner, calls) = cancelling_on_solve(planner(units), 2, &token);
    let mut request = ChangeRequest::new(Arc::new(Profile::new("p")));
    request.add(root);
    let plan = planner.provisioning_plan(&request, &ProvisioningContext::new(), None, &token);
    assert_cancelled(&plan);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn cancellation_during_the_cohosted_installer_solve_reports_cancel() {
    let (a, planner) = meta_setup();
    let token = CancellationToken::new();
    let (planner, calls) = cancelling_on_solve(planner, 2, &token);
    let profile = Arc::new(Profile::new("self").with_timestamp(42));
    let mut request = ChangeRequest::new(profile.clone());
    request.add(a);
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        Some(&profile),
        &token,
    );
    assert_cancelled(&plan);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn cancellation_during_the_external_installer_solve_reports_cancel() {
    let (a, planner) = meta_setup();
    let token = CancellationToken::new();
    let (planner, calls) = cancelling_on_solve(planner, 2, &token);
    let agent = Arc::new(Profile::new("agent"));
    let mut request = ChangeRequest::new(Arc::new(Profile::new("target")));
    request.add(a);
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        Some(&agent),
        &token,
    );
    assert_cancelled(&plan);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Cancels `token` on the `cancel_at`-th slicing batch.
struct CancelOnBatch {
    batches: AtomicUsize,
    cancel_at: usize,
    token: CancellationToken,
}

impl ProgressReporter for CancelOnBatch {
    fn start(&self, _info: &ProgressInfo) {}

    fn update(&self, info: &ProgressInfo) {
        if info.phase == "slice"
            && self.batches.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_at
        {
            self.token.cancel();
        }
    }

    fn finish(&self, _info: &ProgressInfo) {}
}

fn cancelling_on_batch(planner: Planner, cancel_at: usize, token: &CancellationToken) -> Planner {
    planner.with_progress(Arc::new(CancelOnBatch {
        batches: AtomicUsize::new(0),
        cancel_at,
        token: token.clone(),
    }))
}

#[test]
fn cancellation_while_slicing_stops_the_primary_resolution() {
    let a = iu("a", "1.0").requires(requires("b", "")).build();
    let token = CancellationToken::new();
    let planner = cancelling_on_batch(planner(vec![a.clone(), iu("b", "1.0").build()]), 1, &token);
    let mut request = ChangeRequest::new(Arc::new(Profile::new("p")));
    request.add(a);
    let plan = planner.provisioning_plan(&request, &ProvisioningContext::new(), None, &token);
    assert_cancelled(&plan);
}

#[test]
fn cancellation_while_slicing_stops_the_installer_resolution() {
    let (a, planner) = meta_setup();
    let token = CancellationToken::new();
    let planner = cancelling_on_batch(planner, 2, &token);
    let agent = Arc::new(Profile::new("agent"));
    let mut request = ChangeRequest::new(Arc::new(Profile::new("target")));
    request.add(a);
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        Some(&agent),
        &token,
    );
    assert_cancelled(&plan);
}
