//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::metadata::{Environment, Filter, InstallableUnit, Requirement, Version};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Property marking the synthetic units the planner creates for its own bookkeeping.
pub const PROP_SYNTHETIC: &str = "planner.synthetic";

/// One reason a request cannot be satisfied.
///
/// The root causes are [`MissingIU`](Explanation::MissingIU),
/// [`VersionMismatch`](Explanation::VersionMismatch),
/// [`FilteredOut`](Explanation::FilteredOut) and
/// [`SingletonConflict`](Explanation::SingletonConflict). The remaining variants describe the
/// chain of requirements that pulled the conflicting units in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind")]
pub enum Explanation {
    /// Nothing anywhere provides the requirement.
    MissingIU {
        required_by: Option<Arc<InstallableUnit>>,
        requirement: Requirement,
    },
    /// The capability exists, but only in versions outside the requirement's range.
    VersionMismatch {
        required_by: Option<Arc<InstallableUnit>>,
        requirement: Requirement,
        available: Vec<Version>,
    },
    /// The only providers are excluded by the resolution environment.
    FilteredOut {
        unit: Arc<InstallableUnit>,
        filter: Filter,
        environment: Environment,
        required_by: Option<Arc<InstallableUnit>>,
    },
    /// Several versions of a singleton unit are needed at once.
    SingletonConflict {
        id: String,
        candidates: Vec<Arc<InstallableUnit>>,
    },
    HardRequirement {
        unit: Arc<InstallableUnit>,
        requirement: Requirement,
    },
    PatchedHardRequirement {
        unit: Arc<InstallableUnit>,
        patch: Arc<InstallableUnit>,
        requirement: Requirement,
    },
    /// The unit was requested for installation.
    IUToInstall { unit: Arc<InstallableUnit> },
    /// The unit is installed and must stay.
    IUInstalled { unit: Arc<InstallableUnit> },
}

impl Explanation {
    pub fn is_root_cause(&self) -> bool {
        matches!(
            self,
            Explanation::MissingIU { .. }
                | Explanation::VersionMismatch { .. }
                | Explanation::FilteredOut { .. }
                | Explanation::SingletonConflict { .. }
        )
    }
}

/// The unit to blame for a requirement; `None` for the planner's own synthetic units.
pub(crate) fn requester(unit: &Arc<InstallableUnit>) -> Option<Arc<InstallableUnit>> {
    if unit.property(PROP_SYNTHETIC).is_some() {
        None
    } else {
        Some(unit.clone())
    }
}

fn requested_by(f: &mut fmt::Formatter<'_>, unit: &Option<Arc<InstallableUnit>>) -> fmt::Result {
    match unit {
        Some(unit) => write!(f, " required by {}", unit),
        None => Ok(()),
    }
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Explanation::MissingIU {
                required_by,
                requirement,
            } => {
                write!(f, "missing requirement {}", requirement)?;
                requested_by(f, required_by)
            }
            Explanation::VersionMismatch {
                required_by,
                requirement,
                available,
            } => {
                write!(f, "no version of {} satisfies {}", requirement.name(), requirement.range())?;
                requested_by(f, required_by)?;
                let versions: Vec<String> = available.iter().map(ToString::to_string).collect();
                write!(f, " (available: {})", versions.join(", "))
            }
            Explanation::FilteredOut {
                unit,
                filter,
                environment,
                required_by,
            } => {
                write!(
                    f,
                    "{} is not applicable: filter {} does not match environment [{}]",
                    unit, filter, environment
                )?;
                requested_by(f, required_by)
            }
            Explanation::SingletonConflict { id, candidates } => {
                let names: Vec<String> = candidates.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "only one version of {} can be installed at a time: {}",
                    id,
                    names.join(", ")
                )
            }
            Explanation::HardRequirement { unit, requirement } => {
                write!(f, "{} requires {}", unit, requirement)
            }
            Explanation::PatchedHardRequirement {
                unit,
                patch,
                requirement,
            } => write!(f, "{} requires {} (patched by {})", unit, requirement, patch),
            Explanation::IUToInstall { unit } => write!(f, "{} is requested", unit),
            Explanation::IUInstalled { unit } => write!(f, "{} is installed", unit),
        }
    }
}

/// Headline for a failed resolution.
pub fn summarize(explanation: &BTreeSet<Explanation>) -> String {
    let missing = explanation.iter().any(|e| {
        matches!(
            e,
            Explanation::MissingIU { .. }
                | Explanation::VersionMismatch { .. }
                | Explanation::FilteredOut { .. }
        )
    });
    if missing {
        return "Cannot complete the request: some dependencies are not available".to_string();
    }
    if explanation
        .iter()
        .any(|e| matches!(e, Explanation::SingletonConflict { .. }))
    {
        return "Cannot complete the request: conflicting dependencies".to_string();
    }
    "Cannot complete the request".to_string()
}
