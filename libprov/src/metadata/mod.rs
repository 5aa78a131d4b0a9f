//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Installable units and everything they are described with: versions, ranges,
//! capabilities, requirements and environment filters.

mod capability;
mod filter;
mod query;
mod unit;
mod version;

pub use capability::{ProvidedCapability, Requirement, UNIT_NAMESPACE};
pub use filter::{Environment, Filter, FilterError, Pattern, Rule as FilterRule};
pub use query::{Queryable, UnitIndex, UnitQuery};
pub use unit::{
    FragmentInfo, InstallableUnit, PatchInfo, RequirementChange, UnitBuilder, UpdateDescriptor,
    PROP_PARTIAL,
};
pub use version::{Version, VersionError, VersionRange};

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MetadataError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Filter(#[from] FilterError),

    #[error("requirement {requirement} has invalid cardinality min={min} max={max}")]
    #[diagnostic(
        code(prov::metadata_error::invalid_cardinality),
        help("Cardinalities above one need a multiple requirement and min may not exceed max.")
    )]
    InvalidCardinality {
        requirement: String,
        min: u32,
        max: u32,
    },
}
