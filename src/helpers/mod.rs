//! Side-effecting actions used by [`SystemHandler`](crate::core::handler::SystemHandler).
//!
//! Each helper takes explicit, already-expanded inputs and returns an
//! `anyhow::Result`; mapping failures to the step error taxonomy is the
//! handler's job.

pub mod extract;
pub mod fetch;
pub mod fs;
pub mod process;
