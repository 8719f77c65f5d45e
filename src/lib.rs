//! benchrun — an XML-driven test-campaign execution engine.
//!
//! A campaign is an ordered batch of test cases drawn from XML
//! descriptors; each case runs five lifecycle phases (Initialize, Setup,
//! RunTest, TearDown, Finalize) built from atomic test steps composed
//! with sets, conditionals, bounded loops, and parallel forks, sharing a
//! typed key/value context and producing a structured verdict record.

pub mod bench;
pub mod campaign;
pub mod catalog;
pub mod cli;
pub mod context;
pub mod engine;
pub mod error;
pub mod report;
pub mod steps;
pub mod testcase;
pub mod verdict;
pub mod xml;
