//! Provisioning manifest: the static configuration of one target environment.
//!
//! ## Format
//!
//! ```toml
//! [image]
//! base = "nvcr.io/nvidia/jax:24.04-py3"
//! expose = [6006]
//! entrypoint = ["/bin/bash"]
//!
//! [settings]
//! fetch_timeout_secs = 300
//! process_timeout_secs = 3600
//!
//! [vars]
//! MUJOCO_VERSION = "210"
//!
//! [[step]]
//! id = "system-packages"
//! kind = "install-packages"
//! packages = ["libosmesa6-dev", "libgl1-mesa-glx"]
//! ```

use super::context::EnvironmentContext;
use super::error::GraphError;
use super::graph::DependencyGraph;
use super::output;
use super::step::{SetMode, StepSpec};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lower bound for any configured timeout
const MIN_TIMEOUT_SECS: u64 = 5;
/// Upper bound for any configured timeout (one day)
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Image-level metadata. Not executed; reported by `plan` and carried for the
/// image builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Base runtime image identifier
    pub base: Option<String>,
    /// Ports exposed for interactive tooling (e.g. TensorBoard)
    #[serde(default)]
    pub expose: Vec<u16>,
    /// Default entry command
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Working directory for installers
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub fetch_timeout_secs: Option<u64>,
    pub process_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub settings: Settings,
    /// Variables seeded into the context before the first step
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepSpec>,
    /// Directory the manifest was read from
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let mut manifest = Self::parse(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
        manifest.base_dir = path.parent().map(Path::to_path_buf);
        Ok(manifest)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate the steps and compute their order.
    pub fn graph(&self) -> Result<DependencyGraph, GraphError> {
        DependencyGraph::build(self.steps.clone())
    }

    /// Prepare `base` for a run: working directory and seeded variables.
    ///
    /// The working directory is `image.workdir` if set, else the manifest's
    /// directory, else whatever `base` already had.
    pub fn prepare_context(&self, base: EnvironmentContext) -> EnvironmentContext {
        let mut ctx = match (&self.image.workdir, &self.base_dir) {
            (Some(dir), _) => {
                let dir = base.resolve_path(dir);
                base.with_working_dir(dir)
            }
            (None, Some(dir)) if !dir.as_os_str().is_empty() => {
                let dir = base.resolve_path(dir);
                base.with_working_dir(dir)
            }
            _ => base,
        };
        for (name, value) in &self.vars {
            ctx.set(name, value, SetMode::Overwrite);
        }
        ctx
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.settings.fetch_timeout_secs.map(clamp_timeout)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.settings.process_timeout_secs.map(clamp_timeout)
    }
}

/// Clamp a timeout to a sane range, warning when the value is adjusted.
pub fn clamp_timeout(secs: u64) -> Duration {
    let clamped = secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
    if clamped != secs {
        output::warning(&format!("timeout of {}s adjusted to {}s", secs, clamped));
    }
    Duration::from_secs(clamped)
}
