//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Resolution of change requests into provisioning plans.
//!
//! A request flows through these stages:
//! - gather candidate units from the context, the profile and the repositories;
//! - [`Slicer`] cuts the candidates down to what the request can reach;
//! - [`Projector`] turns the slice into a boolean problem and runs a
//!   [`SolverBackend`](crate::solver::SolverBackend) on it;
//! - the solution gets its fragments attached and is diffed against the profile into a
//!   [`ProvisioningPlan`], with a nested installer plan when meta-requirements call for one.
//!
//! [`Planner`] drives all of it.

mod attachment;
mod explanation;
mod operations;
mod plan;
mod planner;
mod projector;
mod slicer;

#[cfg(test)]
mod tests;

pub use attachment::{associate_fragments, attach_fragments, FragmentAssociation};
pub use explanation::{summarize, Explanation, PROP_SYNTHETIC};
pub use operations::{generate_operands, property_operands};
pub use plan::{
    Operand, OperandKind, PlannerStatus, ProvisioningPlan, RequestStatus, RequestStatusKind,
    Severity,
};
pub use planner::{Planner, ACTIONS_UNIT_PREFIX, ROOT_UNIT_PREFIX};
pub use projector::{Projector, ProjectorStatus, Solution};
pub use slicer::{Slice, SliceError, Slicer};

use crate::request::RequestError;
use miette::Diagnostic;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone)]
pub enum PlannerError {
    #[error("{message}")]
    #[diagnostic(
        code(prov::planner_error::unsatisfiable),
        help("The explanation lists the requirements that cannot be met together.")
    )]
    Unsatisfiable {
        message: String,
        explanation: BTreeSet<Explanation>,
    },

    #[error("resolution was cancelled")]
    #[diagnostic(code(prov::planner_error::cancelled))]
    Cancelled,

    #[error("repository {location} is unreadable: {reason}")]
    #[diagnostic(
        code(prov::planner_error::repository_unreadable),
        help("No usable repository was left to provide candidates; check the repository locations.")
    )]
    RepositoryUnreadable { location: String, reason: String },

    #[error("{message}")]
    #[diagnostic(
        code(prov::planner_error::nested_bootstrap_failure),
        help("The software can be resolved but the actions needed to install it cannot.")
    )]
    NestedBootstrapFailure {
        message: String,
        #[source]
        source: Box<PlannerError>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidRequest(#[from] RequestError),

    #[error("profile {profile_id} is out of sync with the installer profile")]
    #[diagnostic(
        code(prov::planner_error::profile_out_of_sync),
        help("Reload the profile and compute the request again.")
    )]
    ProfileOutOfSync { profile_id: String },
}

impl PlannerError {
    /// Explanation carried by this error or the error it wraps.
    pub fn explanation(&self) -> Option<&BTreeSet<Explanation>> {
        match self {
            PlannerError::Unsatisfiable { explanation, .. } => Some(explanation),
            PlannerError::NestedBootstrapFailure { source, .. } => source.explanation(),
            _ => None,
        }
    }
}
