//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Dependency resolution and provisioning planning for installable units.
//!
//! A [`Profile`] records what is installed. A [`ChangeRequest`] asks for units to be
//! added or removed, and the [`Planner`] turns it into a [`ProvisioningPlan`]: the
//! install, uninstall, update and property operands that take the profile to a
//! consistent new state, or an explanation of why no such state exists.
//!
//! ```
//! use libprov::cancel::CancellationToken;
//! use libprov::context::ProvisioningContext;
//! use libprov::director::Planner;
//! use libprov::metadata::{InstallableUnit, Requirement, Version};
//! use libprov::profile::Profile;
//! use libprov::repository::{MemoryRepository, MemoryRepositoryManager};
//! use libprov::request::ChangeRequest;
//! use std::sync::Arc;
//!
//! let editor = InstallableUnit::builder("editor", Version::new(1, 0, 0))
//!     .requires(Requirement::unit("runtime", "[2.0,3.0)".parse()?))
//!     .build();
//! let runtime = InstallableUnit::builder("runtime", Version::new(2, 1, 0)).build();
//!
//! let manager = MemoryRepositoryManager::new();
//! manager.add_repository(Arc::new(MemoryRepository::new(
//!     "mem:main",
//!     vec![editor.clone(), runtime],
//! )));
//! let planner = Planner::new(Arc::new(manager));
//!
//! let mut request = ChangeRequest::new(Arc::new(Profile::new("default")));
//! request.add(editor);
//! let plan = planner.provisioning_plan(
//!     &request,
//!     &ProvisioningContext::new(),
//!     None,
//!     &CancellationToken::new(),
//! );
//! assert!(plan.status().is_ok());
//! assert_eq!(plan.future_state().len(), 2);
//! # Ok::<(), libprov::ProvError>(())
//! ```

pub mod cancel;
pub mod context;
pub mod director;
pub mod metadata;
pub mod profile;
pub mod progress;
pub mod repository;
pub mod request;
pub mod solver;

pub use cancel::CancellationToken;
pub use context::ProvisioningContext;
pub use director::{Planner, PlannerError, ProvisioningPlan};
pub use metadata::InstallableUnit;
pub use profile::Profile;
pub use request::ChangeRequest;

use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for callers that do not care which layer failed.
#[derive(Debug, Error, Diagnostic)]
pub enum ProvError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Metadata(#[from] metadata::MetadataError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Version(#[from] metadata::VersionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Filter(#[from] metadata::FilterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Repository(#[from] repository::RepositoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Request(#[from] request::RequestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Context(#[from] context::ContextError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Solver(#[from] solver::SolverError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Planner(Box<PlannerError>),
}

impl From<PlannerError> for ProvError {
    fn from(e: PlannerError) -> Self {
        ProvError::Planner(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, ProvError>;
