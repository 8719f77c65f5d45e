//! The step engine: factory, executor, composite interpreter, and the
//! cross-cutting cancellation/watcher affordances.

pub mod composite;
pub mod executor;
pub mod factory;
pub mod registry;
pub mod step;
pub mod watch;
