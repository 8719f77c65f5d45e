use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::engine::step::TestStep;
use crate::error::EngineError;

/// Constructor for a step implementation. Steps are stateless between
/// invocations; per-instance data arrives through the `StepEnv`.
pub type StepConstructor = fn() -> Box<dyn TestStep>;

/// Registry mapping a catalog entry's `ClassName` to a constructor.
///
/// Populated at startup; catalog descriptors then carry only logical
/// names, and `verify_catalog` checks up front that every descriptor has
/// a registered constructor.
#[derive(Default)]
pub struct StepRegistry {
    constructors: BTreeMap<String, StepConstructor>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class_name: &str, constructor: StepConstructor) {
        self.constructors.insert(class_name.to_owned(), constructor);
    }

    pub fn get(&self, class_name: &str) -> Option<StepConstructor> {
        self.constructors.get(class_name).copied()
    }

    pub fn list(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Check that every step entry in the catalog resolves to a
    /// registered constructor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` naming the first unresolvable entry.
    pub fn verify_catalog(&self, catalog: &Catalog) -> Result<(), EngineError> {
        for entry in catalog.steps() {
            if self.get(&entry.class_name).is_none() {
                return Err(EngineError::invalid_catalog(format!(
                    "step \"{}\" names implementation \"{}\" but no such constructor is registered",
                    entry.id, entry.class_name
                )));
            }
        }
        Ok(())
    }
}
