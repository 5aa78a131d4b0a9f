//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::director::{Explanation, PlannerError};
use crate::metadata::InstallableUnit;
use crate::profile::Profile;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString};

/// Outcome severity, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Error,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RequestStatusKind {
    Added,
    Removed,
}

/// What became of one unit named by the request, or removed as a side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStatus {
    pub kind: RequestStatusKind,
    pub severity: Severity,
}

/// Status attached to every plan.
#[derive(Debug, Clone)]
pub struct PlannerStatus {
    severity: Severity,
    message: String,
    error: Option<PlannerError>,
    warnings: Vec<PlannerError>,
    request_changes: BTreeMap<Arc<InstallableUnit>, RequestStatus>,
    side_effects: BTreeMap<Arc<InstallableUnit>, RequestStatus>,
}

impl PlannerStatus {
    pub fn ok() -> Self {
        PlannerStatus {
            severity: Severity::Ok,
            message: "OK".to_string(),
            error: None,
            warnings: Vec::new(),
            request_changes: BTreeMap::new(),
            side_effects: BTreeMap::new(),
        }
    }

    pub fn cancelled() -> Self {
        PlannerStatus::failed(PlannerError::Cancelled)
    }

    pub fn failed(error: PlannerError) -> Self {
        let severity = match error {
            PlannerError::Cancelled => Severity::Cancel,
            _ => Severity::Error,
        };
        PlannerStatus {
            severity,
            message: error.to_string(),
            error: Some(error),
            ..PlannerStatus::ok()
        }
    }

    pub(crate) fn with_changes(
        mut self,
        request_changes: BTreeMap<Arc<InstallableUnit>, RequestStatus>,
        side_effects: BTreeMap<Arc<InstallableUnit>, RequestStatus>,
    ) -> Self {
        if self.severity == Severity::Ok && !side_effects.is_empty() {
            self.severity = Severity::Info;
            self.message = format!("{} previously installed unit(s) will be removed", side_effects.len());
        }
        self.request_changes = request_changes;
        self.side_effects = side_effects;
        self
    }

    pub(crate) fn with_warnings(mut self, warnings: Vec<PlannerError>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_ok(&self) -> bool {
        self.severity <= Severity::Info
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error(&self) -> Option<&PlannerError> {
        self.error.as_ref()
    }

    /// Non-fatal problems met along the way, such as skipped repositories.
    pub fn warnings(&self) -> &[PlannerError] {
        &self.warnings
    }

    pub fn explanation(&self) -> Option<&BTreeSet<Explanation>> {
        self.error.as_ref().and_then(PlannerError::explanation)
    }

    pub fn request_changes(&self) -> &BTreeMap<Arc<InstallableUnit>, RequestStatus> {
        &self.request_changes
    }

    pub fn side_effects(&self) -> &BTreeMap<Arc<InstallableUnit>, RequestStatus> {
        &self.side_effects
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OperandKind {
    Install,
    Uninstall,
    Update,
    ProfileProperty,
    UnitProperty,
}

/// One instruction for the engine applying the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Install(Arc<InstallableUnit>),
    Uninstall(Arc<InstallableUnit>),
    Update {
        from: Arc<InstallableUnit>,
        to: Arc<InstallableUnit>,
    },
    ProfileProperty {
        key: String,
        from: Option<String>,
        to: Option<String>,
    },
    UnitProperty {
        unit: Arc<InstallableUnit>,
        key: String,
        from: Option<String>,
        to: Option<String>,
    },
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Install(_) => OperandKind::Install,
            Operand::Uninstall(_) => OperandKind::Uninstall,
            Operand::Update { .. } => OperandKind::Update,
            Operand::ProfileProperty { .. } => OperandKind::ProfileProperty,
            Operand::UnitProperty { .. } => OperandKind::UnitProperty,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn value(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or("<none>")
        }
        match self {
            Operand::Install(u) => write!(f, "install {}", u),
            Operand::Uninstall(u) => write!(f, "uninstall {}", u),
            Operand::Update { from, to } => write!(f, "update {} -> {}", from, to.version()),
            Operand::ProfileProperty { key, from, to } => {
                write!(f, "property {}: {} -> {}", key, value(from), value(to))
            }
            Operand::UnitProperty {
                unit,
                key,
                from,
                to,
            } => write!(f, "property {} of {}: {} -> {}", key, unit, value(from), value(to)),
        }
    }
}

/// Result of planning a change request. Always produced, even when planning fails; check
/// [`ProvisioningPlan::status`].
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    profile: Arc<Profile>,
    operands: Vec<Operand>,
    status: PlannerStatus,
    future_state: BTreeSet<Arc<InstallableUnit>>,
    installer_plan: Option<Box<ProvisioningPlan>>,
}

impl ProvisioningPlan {
    pub(crate) fn new(
        profile: Arc<Profile>,
        operands: Vec<Operand>,
        future_state: BTreeSet<Arc<InstallableUnit>>,
        status: PlannerStatus,
    ) -> Self {
        ProvisioningPlan {
            profile,
            operands,
            status,
            future_state,
            installer_plan: None,
        }
    }

    /// Plan without operands carrying a failure status.
    pub(crate) fn failed(profile: Arc<Profile>, status: PlannerStatus) -> Self {
        let future_state = profile.unit_set().clone();
        ProvisioningPlan::new(profile, Vec::new(), future_state, status)
    }

    pub(crate) fn set_installer_plan(&mut self, plan: ProvisioningPlan) {
        self.installer_plan = Some(Box::new(plan));
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.profile
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn status(&self) -> &PlannerStatus {
        &self.status
    }

    /// Units the profile will hold once the plan is applied.
    pub fn future_state(&self) -> &BTreeSet<Arc<InstallableUnit>> {
        &self.future_state
    }

    pub fn installer_plan(&self) -> Option<&ProvisioningPlan> {
        self.installer_plan.as_deref()
    }

    /// Units the plan installs, update targets included.
    pub fn additions(&self) -> Vec<Arc<InstallableUnit>> {
        self.operands
            .iter()
            .filter_map(|op| match op {
                Operand::Install(u) => Some(u.clone()),
                Operand::Update { to, .. } => Some(to.clone()),
                _ => None,
            })
            .collect()
    }

    /// Units the plan uninstalls, update sources included.
    pub fn removals(&self) -> Vec<Arc<InstallableUnit>> {
        self.operands
            .iter()
            .filter_map(|op| match op {
                Operand::Uninstall(u) => Some(u.clone()),
                Operand::Update { from, .. } => Some(from.clone()),
                _ => None,
            })
            .collect()
    }
}
