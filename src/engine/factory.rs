use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bench::BenchFactory;
use crate::catalog::Catalog;
use crate::catalog::bundle::{ParameterBundle, parse_bool, parse_duration_secs};
use crate::engine::registry::StepRegistry;
use crate::engine::step::{StepEnv, TestStep};
use crate::engine::watch::{CancelToken, WatcherRegistry};
use crate::error::EngineError;
use crate::xml::AttrMap;

/// Engine-wide tunables injected into every step environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cooperative polling granularity for blocking waits.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Attributes understood by the executor rather than the step itself.
/// They are stripped before parameter-bundle resolution.
const RESERVED_ATTRS: [&str; 3] = ["blocking", "critical", "timeout"];

/// A step instance ready to run: the implementation object, its
/// environment, and the contract flags from its authoring site.
pub struct PreparedStep {
    pub id: String,
    pub blocking: bool,
    pub critical: bool,
    pub step: Box<dyn TestStep>,
    pub env: StepEnv,
}

impl std::fmt::Debug for PreparedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStep")
            .field("id", &self.id)
            .field("blocking", &self.blocking)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}

/// Builds step instances from catalog ids and raw attribute maps.
///
/// The factory owns the immutable collaborators (catalog, constructor
/// registry, bench, config); the per-case mutable ones (cancel token,
/// watcher registry) arrive per instantiation.
pub struct StepFactory {
    catalog: Arc<Catalog>,
    registry: Arc<StepRegistry>,
    bench: Arc<dyn BenchFactory>,
    config: EngineConfig,
}

impl StepFactory {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<StepRegistry>,
        bench: Arc<dyn BenchFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            registry,
            bench,
            config,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn bench(&self) -> &Arc<dyn BenchFactory> {
        &self.bench
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Instantiate the step behind a catalog id with the given attributes.
    ///
    /// # Errors
    ///
    /// Internal error for an unknown id or unregistered implementation;
    /// `InvalidParameter`/`MissingParameter` from bundle resolution or a
    /// malformed reserved attribute.
    pub fn instantiate(
        &self,
        id: &str,
        attrs: &AttrMap,
        cancel: &CancelToken,
        watchers: &Arc<WatcherRegistry>,
    ) -> Result<PreparedStep, EngineError> {
        let entry = self.catalog.resolve_step(id)?;
        let constructor = self.registry.get(&entry.class_name).ok_or_else(|| {
            EngineError::internal(format!(
                "step \"{id}\": implementation \"{}\" is not registered",
                entry.class_name
            ))
        })?;

        let mut attrs = attrs.clone();
        let blocking = take_flag(&mut attrs, "blocking", false, id)?;
        let critical = take_flag(&mut attrs, "critical", true, id)?;
        let timeout = take_timeout(&mut attrs, id)?.or(entry.timeout);
        debug_assert!(RESERVED_ATTRS.iter().all(|r| !attrs.contains_key(*r)));

        let bundle = ParameterBundle::resolve(entry, &attrs)?;
        Ok(PreparedStep {
            id: id.to_owned(),
            blocking,
            critical,
            step: constructor(),
            env: StepEnv {
                bundle,
                bench: Arc::clone(&self.bench),
                cancel: cancel.clone(),
                watchers: Arc::clone(watchers),
                deadline: timeout.map(|t| Instant::now() + t),
                poll_interval: self.config.poll_interval,
            },
        })
    }
}

fn take_flag(
    attrs: &mut AttrMap,
    name: &str,
    default: bool,
    step_id: &str,
) -> Result<bool, EngineError> {
    match attrs.remove(name) {
        None => Ok(default),
        Some(raw) => parse_bool(&raw).ok_or_else(|| {
            EngineError::invalid_parameter(format!(
                "step \"{step_id}\": attribute \"{name}\" expects a boolean, got \"{raw}\""
            ))
        }),
    }
}

fn take_timeout(attrs: &mut AttrMap, step_id: &str) -> Result<Option<Duration>, EngineError> {
    match attrs.remove("timeout") {
        None => Ok(None),
        Some(raw) => {
            let secs = parse_duration_secs(&raw).ok_or_else(|| {
                EngineError::invalid_parameter(format!(
                    "step \"{step_id}\": attribute \"timeout\" expects a duration, got \"{raw}\""
                ))
            })?;
            if secs > 0.0 {
                Ok(Some(Duration::from_secs_f64(secs)))
            } else {
                Ok(None)
            }
        }
    }
}
