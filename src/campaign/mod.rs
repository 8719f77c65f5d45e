//! Campaign loading, linearization, case execution, and orchestration.

pub mod case_runner;
pub mod descriptor;
pub mod failed;
pub mod loader;
pub mod orchestrator;
