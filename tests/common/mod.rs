//! Common test utilities for provisioning integration tests.

#![allow(dead_code)]

mod fixtures;

pub use fixtures::*;
