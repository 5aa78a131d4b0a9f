//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

extern crate libprov;

use libprov::cancel::CancellationToken;
use libprov::context::ProvisioningContext;
use libprov::director::{Explanation, Operand, Planner, Severity};
use libprov::metadata::{InstallableUnit, Requirement, Version, VersionRange};
use libprov::profile::{InclusionRule, Profile, PROP_ENVIRONMENTS};
use libprov::progress::{ProgressInfo, ProgressReporter};
use libprov::repository::{MemoryRepositoryManager, MetadataRepository, RepositoryManager};
use libprov::request::ChangeRequest;
use libprov::solver::{SatSolver, Outcome, Problem, SolverBackend};
use maplit::btreeset;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

const CATALOG: &str = r#"[
  {"id": "editor", "version": "1.0.0",
   "requires": [
     {"namespace": "prov.unit", "name": "runtime", "range": "[2.0,3.0)"},
     {"namespace": "prov.unit", "name": "spell", "min": 0}
   ]},
  {"id": "runtime", "version": "1.4.0"},
  {"id": "runtime", "version": "2.1.0"},
  {"id": "runtime", "version": "2.3.0", "filter": "(os=linux)"},
  {"id": "spell", "version": "0.9.0",
   "requires": [{"namespace": "prov.unit", "name": "dictionary"}]}
]"#;

fn manager_with_catalog(dir: &std::path::Path) -> MemoryRepositoryManager {
    let path = dir.join("catalog.json");
    fs::write(&path, CATALOG).expect("Failed to write catalog");
    let manager = MemoryRepositoryManager::new();
    manager.add_file("file:catalog", &path);
    manager
}

fn editor(manager: &MemoryRepositoryManager) -> Arc<InstallableUnit> {
    let repository = manager
        .load_repository("file:catalog")
        .expect("Failed to load catalog");
    repository
        .query(&libprov::metadata::UnitQuery::Id("editor".to_string()))
        .into_iter()
        .next()
        .expect("editor missing from catalog")
}

#[derive(Default)]
struct Recorder {
    phases: Mutex<Vec<String>>,
}

impl ProgressReporter for Recorder {
    fn start(&self, info: &ProgressInfo) {
        if let Ok(mut phases) = self.phases.lock() {
            phases.push(format!("start {}", info.phase));
        }
    }

    fn update(&self, _info: &ProgressInfo) {}

    fn finish(&self, info: &ProgressInfo) {
        if let Ok(mut phases) = self.phases.lock() {
            phases.push(format!("finish {}", info.phase));
        }
    }
}

#[test]
fn resolves_against_a_json_catalog() {
    let dir = tempdir().expect("Failed to create temp dir");
    let manager = manager_with_catalog(dir.path());
    let editor = editor(&manager);
    let recorder = Arc::new(Recorder::default());
    let planner = Planner::new(Arc::new(manager)).with_progress(recorder.clone());

    let mut profile = Profile::new("desktop");
    profile.set_property(PROP_ENVIRONMENTS, "os=win32");
    let mut request = ChangeRequest::new(Arc::new(profile));
    request.add(editor.clone());
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        None,
        &CancellationToken::new(),
    );

    assert_eq!(plan.status().severity(), Severity::Ok, "{}", plan.status().message());
    let ids: Vec<String> = plan.future_state().iter().map(|u| u.to_string()).collect();
    // 2.3.0 is linux only and spell cannot find its dictionary
    assert_eq!(ids, vec!["editor 1.0.0", "runtime 2.1.0"]);
    assert_eq!(
        plan.additions().len(),
        2,
        "Expected editor and runtime to be installed"
    );

    let phases = recorder.phases.lock().expect("poisoned").clone();
    assert_eq!(
        phases,
        vec!["start gather", "finish gather", "start slice", "finish slice"]
    );
}

#[test]
fn linux_environment_gets_the_newest_runtime() {
    let dir = tempdir().expect("Failed to create temp dir");
    let manager = manager_with_catalog(dir.path());
    let editor = editor(&manager);
    let planner = Planner::new(Arc::new(manager));

    let mut profile = Profile::new("desktop");
    profile.set_property(PROP_ENVIRONMENTS, "os=linux");
    let mut request = ChangeRequest::new(Arc::new(profile));
    request.add(editor);
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        None,
        &CancellationToken::new(),
    );
    assert!(plan.status().is_ok());
    assert!(plan
        .future_state()
        .iter()
        .any(|u| u.id() == "runtime" && *u.version() == Version::new(2, 3, 0)));
}

#[test]
fn removing_a_dependency_in_use_keeps_it() {
    let runtime = InstallableUnit::builder("runtime", Version::new(2, 1, 0)).build();
    let editor = InstallableUnit::builder("editor", Version::new(1, 0, 0))
        .requires(Requirement::unit(
            "runtime",
            VersionRange::parse("[2.0,3.0)").expect("range"),
        ))
        .build();
    let mut profile = Profile::new("desktop");
    profile.add_root(editor.clone(), InclusionRule::Strict);
    profile.add_root(runtime.clone(), InclusionRule::Strict);

    let mut request = ChangeRequest::new(Arc::new(profile));
    request.remove(runtime.clone());
    let context = ProvisioningContext::new().with_repositories(Vec::<String>::new());
    let plan = Planner::new(Arc::new(MemoryRepositoryManager::new())).provisioning_plan(
        &request,
        &context,
        None,
        &CancellationToken::new(),
    );

    // The profile still offers runtime, so the removal only drops its rule and the
    // editor keeps it installed.
    assert!(plan.status().is_ok());
    assert!(plan.future_state().contains(&runtime));
    assert!(plan.operands().iter().all(|op| !matches!(op, Operand::Uninstall(_))));
    assert_eq!(
        plan.status().request_changes()[&runtime].severity,
        Severity::Error
    );
}

#[test]
fn missing_dependency_names_its_requester() {
    let dir = tempdir().expect("Failed to create temp dir");
    let manager = manager_with_catalog(dir.path());
    let planner = Planner::new(Arc::new(manager));
    let tool = InstallableUnit::builder("tool", Version::new(1, 0, 0))
        .requires(Requirement::unit("compiler", VersionRange::any()))
        .build();

    let mut request = ChangeRequest::new(Arc::new(Profile::new("desktop")));
    request.add(tool.clone());
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        None,
        &CancellationToken::new(),
    );
    assert_eq!(plan.status().severity(), Severity::Error);
    let explanation = plan.status().explanation().expect("Expected an explanation");
    assert_eq!(
        explanation.iter().filter(|e| e.is_root_cause()).count(),
        1,
        "Expected exactly one root cause: {:?}",
        explanation
    );
    assert!(explanation.iter().any(|e| matches!(
        e,
        Explanation::MissingIU { required_by: Some(unit), .. } if *unit == tool
    )));
}

struct Counting {
    inner: SatSolver,
    calls: Arc<AtomicUsize>,
}

impl SolverBackend for Counting {
    fn solve(&mut self, problem: &Problem, cancel: &CancellationToken) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.solve(problem, cancel)
    }
}

#[test]
fn custom_solver_backend_is_used() {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory_calls = calls.clone();
    let unit = InstallableUnit::builder("a", Version::new(1, 0, 0)).build();
    let planner = Planner::new(Arc::new(MemoryRepositoryManager::new())).with_solver(move || {
        Box::new(Counting {
            inner: SatSolver::new(),
            calls: factory_calls.clone(),
        }) as Box<dyn SolverBackend>
    });

    let mut request = ChangeRequest::new(Arc::new(Profile::new("p")));
    request.add(unit);
    let plan = planner.provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        None,
        &CancellationToken::new(),
    );
    assert!(plan.status().is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn context_survives_a_save_and_load() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("context.json");
    let extra = InstallableUnit::builder("extra", Version::new(1, 2, 0)).build();
    let context = ProvisioningContext::new()
        .with_repositories(vec!["file:catalog"])
        .with_extra_units(vec![extra.clone()])
        .with_property("planner.explain", "false");
    context.save(&path).expect("Failed to save context");

    let loaded = ProvisioningContext::load(&path).expect("Failed to load context");
    assert_eq!(loaded.repositories, Some(vec!["file:catalog".to_string()]));
    assert_eq!(
        loaded.extra_units.iter().cloned().collect::<std::collections::BTreeSet<_>>(),
        btreeset! {extra}
    );
    assert!(!loaded.explain());
    assert!(loaded.extra_units[0].satisfies(&Requirement::unit("extra", VersionRange::any())));
}

#[test]
fn broken_catalog_file_is_a_warning() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").expect("Failed to write catalog");
    let manager = MemoryRepositoryManager::new();
    manager.add_file("file:broken", &path);
    let unit = InstallableUnit::builder("a", Version::new(1, 0, 0)).build();

    let mut request = ChangeRequest::new(Arc::new(Profile::new("p")));
    request.add(unit);
    let plan = Planner::new(Arc::new(manager)).provisioning_plan(
        &request,
        &ProvisioningContext::new(),
        None,
        &CancellationToken::new(),
    );
    assert!(plan.status().is_ok());
    assert_eq!(plan.status().warnings().len(), 1);
}
