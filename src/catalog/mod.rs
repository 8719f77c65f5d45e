pub mod bundle;
pub mod entry;
pub mod loader;
pub mod taxonomy;

use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};

use crate::catalog::entry::{CatalogEntry, ParameterEntry, UseCaseEntry};
use crate::catalog::loader::CatalogScope;
use crate::error::EngineError;

/// The merged, immutable registry of step, use-case, and parameter
/// descriptors for a run.
///
/// Scopes merge in load order: the first scope is the framework catalog,
/// later scopes are user catalogs. A user entry with an id already present
/// replaces the earlier entry fully (no field-level merge). Parameter
/// entries are the exception: redefining one requires `Override="true"` on
/// the incoming entry.
#[derive(Debug, Default)]
pub struct Catalog {
    steps: BTreeMap<String, CatalogEntry>,
    usecases: BTreeMap<String, UseCaseEntry>,
    parameters: BTreeMap<String, ParameterEntry>,
    overridden_parameters: BTreeSet<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a loaded scope into the registry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` if a parameter entry redefines an existing
    /// one without `Override="true"`.
    pub fn merge_scope(&mut self, scope: CatalogScope) -> Result<(), EngineError> {
        for entry in scope.steps {
            if self.steps.contains_key(&entry.id) {
                info!(
                    "catalog {}: step \"{}\" replaces an earlier entry",
                    scope.name, entry.id
                );
            }
            self.steps.insert(entry.id.clone(), entry);
        }
        for entry in scope.usecases {
            if self.usecases.contains_key(&entry.id) {
                info!(
                    "catalog {}: use-case \"{}\" replaces an earlier entry",
                    scope.name, entry.id
                );
            }
            self.usecases.insert(entry.id.clone(), entry);
        }
        for entry in scope.parameters {
            if self.parameters.contains_key(&entry.name) {
                if !entry.override_allowed {
                    return Err(EngineError::invalid_catalog(format!(
                        "catalog {}: parameter \"{}\" redefines an existing entry without Override=\"true\"",
                        scope.name, entry.name
                    )));
                }
                // Last override wins; repeated overrides are legal but
                // worth flagging to the bench maintainer.
                if !self.overridden_parameters.insert(entry.name.clone()) {
                    warn!(
                        "catalog {}: parameter \"{}\" overridden more than once; keeping the last definition",
                        scope.name, entry.name
                    );
                }
            }
            self.parameters.insert(entry.name.clone(), entry);
        }
        Ok(())
    }

    /// Resolve a step id for the step factory.
    ///
    /// # Errors
    ///
    /// Returns an internal error: referring to an unknown id is a
    /// programming error in the campaign author's descriptors caught at
    /// load, not a runtime condition.
    pub fn resolve_step(&self, id: &str) -> Result<&CatalogEntry, EngineError> {
        self.steps
            .get(id)
            .ok_or_else(|| EngineError::internal(format!("unknown step id \"{id}\"")))
    }

    /// Resolve a use-case id.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an unknown id.
    pub fn resolve_usecase(&self, id: &str) -> Result<&UseCaseEntry, EngineError> {
        self.usecases
            .get(id)
            .ok_or_else(|| EngineError::internal(format!("unknown use-case id \"{id}\"")))
    }

    pub fn get_parameter(&self, name: &str) -> Option<&ParameterEntry> {
        self.parameters.get(name)
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    pub fn usecase_ids(&self) -> impl Iterator<Item = &str> {
        self.usecases.keys().map(String::as_str)
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn steps(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.steps.values()
    }
}
