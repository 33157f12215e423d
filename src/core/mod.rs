//! Core provisioning model and execution
//!
//! Steps are declared once, ordered by [`graph::DependencyGraph`], and run
//! by [`executor::Executor`] against a single [`context::EnvironmentContext`].

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod handler;
pub mod manifest;
pub mod output;
pub mod report;
pub mod step;
