//! Built-in diagnostic steps. They exercise the engine without any
//! device domain library and double as fixtures for campaign authors.

use log::info;

use crate::catalog::entry::{CatalogEntry, ParamSpec, ParamType};
use crate::catalog::loader::CatalogScope;
use crate::context::Context;
use crate::engine::registry::StepRegistry;
use crate::engine::step::{StepEnv, TestStep};
use crate::error::{DeviceFault, EngineError};

/// Does nothing and reports an unchecked pass.
pub struct NoopPass;

impl TestStep for NoopPass {
    fn apply(&self, _ctx: &Context, env: &StepEnv) -> Result<(), EngineError> {
        info!("noop: {}", env.bundle.str("MESSAGE")?);
        Ok(())
    }
}

/// Does nothing and fails its check.
pub struct NoopFail;

impl TestStep for NoopFail {
    fn apply(&self, _ctx: &Context, _env: &StepEnv) -> Result<(), EngineError> {
        Ok(())
    }

    fn check(&self, _ctx: &Context, _env: &StepEnv) -> Option<bool> {
        Some(false)
    }
}

/// Raises the configured error kind from `apply`.
pub struct RaiseError;

impl TestStep for RaiseError {
    fn apply(&self, _ctx: &Context, env: &StepEnv) -> Result<(), EngineError> {
        let message = env.bundle.str("MESSAGE")?.to_owned();
        match env.bundle.str("KIND")? {
            "device" => Err(EngineError::device(DeviceFault::InvalidState, message)),
            "environment" => Err(EngineError::environment(message)),
            "equipment" => Err(EngineError::equipment(message)),
            "timeout" => Err(EngineError::timeout(message)),
            other => Err(EngineError::internal(format!(
                "unhandled error kind \"{other}\""
            ))),
        }
    }
}

/// Writes `VALUE` (a string) under the dotted path `KEY`.
pub struct SetContextValue;

impl TestStep for SetContextValue {
    fn apply(&self, ctx: &Context, env: &StepEnv) -> Result<(), EngineError> {
        ctx.set(env.bundle.str("KEY")?, env.bundle.str("VALUE")?)
    }
}

/// Compares the rendered value under `KEY` to `EXPECT`.
pub struct CheckContextValue;

impl TestStep for CheckContextValue {
    fn apply(&self, _ctx: &Context, _env: &StepEnv) -> Result<(), EngineError> {
        Ok(())
    }

    fn check(&self, ctx: &Context, env: &StepEnv) -> Option<bool> {
        let key = env.bundle.str("KEY").ok()?;
        let expect = env.bundle.str("EXPECT").ok()?;
        match ctx.get(key) {
            Some(value) => Some(value.render() == expect),
            None => Some(false),
        }
    }
}

/// Sleeps for `DURATION`, polling cancellation and the deadline.
pub struct Sleep;

impl TestStep for Sleep {
    fn apply(&self, _ctx: &Context, env: &StepEnv) -> Result<(), EngineError> {
        env.sleep(env.bundle.duration("DURATION")?)
    }
}

/// Registry with every built-in implementation bound by class name.
pub fn builtin_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register("NoopPass", || Box::new(NoopPass));
    registry.register("NoopFail", || Box::new(NoopFail));
    registry.register("RaiseError", || Box::new(RaiseError));
    registry.register("SetContextValue", || Box::new(SetContextValue));
    registry.register("CheckContextValue", || Box::new(CheckContextValue));
    registry.register("Sleep", || Box::new(Sleep));
    registry
}

/// The framework-provided catalog scope describing the built-ins.
pub fn builtin_scope() -> CatalogScope {
    let mut scope = CatalogScope {
        name: "builtin".to_owned(),
        ..CatalogScope::default()
    };
    scope.steps.push(
        CatalogEntry::new("NOOP_PASS", "NoopPass")
            .with_param(ParamSpec::optional("MESSAGE", ParamType::Str, "ok")),
    );
    scope
        .steps
        .push(CatalogEntry::new("NOOP_FAIL", "NoopFail"));
    scope.steps.push(
        CatalogEntry::new("RAISE_ERROR", "RaiseError")
            .with_param(kind_param())
            .with_param(ParamSpec::optional("MESSAGE", ParamType::Str, "raised")),
    );
    scope.steps.push(
        CatalogEntry::new("SET_CONTEXT_VALUE", "SetContextValue")
            .with_param(ParamSpec::required("KEY", ParamType::Str))
            .with_param(ParamSpec::required("VALUE", ParamType::Str)),
    );
    scope.steps.push(
        CatalogEntry::new("CHECK_CONTEXT_VALUE", "CheckContextValue")
            .with_param(ParamSpec::required("KEY", ParamType::Str))
            .with_param(ParamSpec::required("EXPECT", ParamType::Str)),
    );
    scope.steps.push(
        CatalogEntry::new("SLEEP", "Sleep")
            .with_param(ParamSpec::required("DURATION", ParamType::Duration)),
    );
    scope
}

fn kind_param() -> ParamSpec {
    let mut spec = ParamSpec::required("KIND", ParamType::Ident);
    spec.allowed_values = ["device", "environment", "equipment", "timeout"]
        .into_iter()
        .map(str::to_owned)
        .collect();
    spec
}
