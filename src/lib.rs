//! Ordered provisioning of a GPU machine-learning research environment
//!
//! A manifest declares provisioning steps (install system packages, fetch a
//! native library, unpack it, put it on the library search path, fetch and
//! mark a binary patcher executable, install the Python binding that links
//! against it). Each step names the steps it needs. The engine orders them
//! deterministically, runs them one at a time, stops at the first failure,
//! and reports how far it got.
//!
//! # Example Manifest
//!
//! ```toml
//! [[step]]
//! id = "fetch-mujoco"
//! kind = "fetch-file"
//! url = "https://mujoco.org/download/mujoco210-linux-x86_64.tar.gz"
//! dest = "/tmp/mujoco.tar.gz"
//!
//! [[step]]
//! id = "unpack-mujoco"
//! kind = "unpack-archive"
//! archive = "/tmp/mujoco.tar.gz"
//! dest = "~/.mujoco"
//! expect = ["mujoco210/bin"]
//! requires = ["fetch-mujoco"]
//! provides = { artifact = "mujoco-binary", path = "mujoco210" }
//!
//! [[step]]
//! id = "mujoco-lib-path"
//! kind = "set-env"
//! name = "LD_LIBRARY_PATH"
//! value = "${artifact:mujoco-binary}/bin"
//! mode = "prepend"
//! requires = ["unpack-mujoco"]
//! ```
//!
//! # Step Kinds
//!
//! - `install-packages` - Install packages with apt, pip, or a custom command
//! - `fetch-file` - Download a file, optionally verifying its SHA-256
//! - `unpack-archive` - Extract tar.{gz,xz,bz2,zst} or zip, then check expected paths
//! - `set-env` - Overwrite or prepend to a variable
//! - `run-installer` - Run a shell command
//! - `make-executable` - `chmod +x` a file
//!
//! # Expansion
//!
//! Step parameters may reference `${VAR}`, `${artifact:NAME}` and a leading `~/`.

pub mod core;
pub mod helpers;

pub use crate::core::context::EnvironmentContext;
pub use crate::core::error::{ContextError, GraphError, StepError};
pub use crate::core::executor::{Executor, StepHandler};
pub use crate::core::graph::DependencyGraph;
pub use crate::core::handler::SystemHandler;
pub use crate::core::manifest::Manifest;
pub use crate::core::report::{Outcome, ProvisionReport, StepRecord};
pub use crate::core::step::{PackageManager, Provides, SetMode, StepKind, StepSpec};
pub use crate::core::output;
