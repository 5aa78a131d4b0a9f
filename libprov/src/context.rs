//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::metadata::{InstallableUnit, Requirement};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Context property; `false` keeps the profile's own units out of the candidate pool.
pub const PROP_INCLUDE_PROFILE_UNITS: &str = "planner.includeProfileUnits";
/// Context property; `false` skips computing explanations for unsatisfiable requests.
pub const PROP_EXPLAIN: &str = "planner.explain";

#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("I/O error: {0}")]
    #[diagnostic(
        code(prov::context_error::io),
        help("Check that the provisioning context file exists and is readable.")
    )]
    IO(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(
        code(prov::context_error::json),
        help("The provisioning context file must be a JSON object.")
    )]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, ContextError>;

/// Where candidate units come from for one resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningContext {
    /// Repository locations to consult, in order. `None` means every repository the
    /// manager knows about.
    #[serde(default)]
    pub repositories: Option<Vec<String>>,
    /// Units offered ahead of any repository.
    #[serde(default)]
    pub extra_units: Vec<Arc<InstallableUnit>>,
    /// Requirements added to every resolution's root.
    #[serde(default)]
    pub additional_requirements: Vec<Requirement>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ProvisioningContext {
    pub fn new() -> Self {
        ProvisioningContext::default()
    }

    pub fn with_repositories<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repositories = Some(locations.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_extra_units<I: IntoIterator<Item = Arc<InstallableUnit>>>(mut self, units: I) -> Self {
        self.extra_units = units.into_iter().collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn include_profile_units(&self) -> bool {
        self.flag(PROP_INCLUDE_PROFILE_UNITS)
    }

    pub fn explain(&self) -> bool {
        self.flag(PROP_EXPLAIN)
    }

    fn flag(&self, key: &str) -> bool {
        self.property(key)
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut context: ProvisioningContext = serde_json::from_str(&content)?;
        context.extra_units = context
            .extra_units
            .into_iter()
            .map(InstallableUnit::normalized)
            .collect();
        Ok(context)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Version, VersionRange};
    use tempfile::tempdir;

    #[test]
    fn defaults_enable_profile_units_and_explanations() {
        let context = ProvisioningContext::new();
        assert!(context.include_profile_units());
        assert!(context.explain());
        let quiet = context.with_property(PROP_EXPLAIN, "false");
        assert!(!quiet.explain());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("context.json");
        let context = ProvisioningContext::new()
            .with_repositories(["mem:main", "mem:extra"])
            .with_extra_units([InstallableUnit::builder("a", Version::new(1, 0, 0)).build()])
            .with_property(PROP_INCLUDE_PROFILE_UNITS, "false");
        context.save(&path).expect("save");

        let loaded = ProvisioningContext::load(&path).expect("load");
        assert_eq!(
            loaded.repositories,
            Some(vec!["mem:main".to_string(), "mem:extra".to_string()])
        );
        assert!(!loaded.include_profile_units());
        assert_eq!(loaded.extra_units.len(), 1);
        assert!(loaded.extra_units[0].satisfies(&Requirement::unit("a", VersionRange::any())));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempdir().expect("tempdir");
        let err = ProvisioningContext::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ContextError::IO(_)));
    }
}
