//! Declarative provisioning steps.
//!
//! A [`StepSpec`] is one unit of provisioning work: what to do, which steps
//! must have succeeded first, and which artifact it leaves behind. Specs are
//! immutable once declared; the executor only reads them.
//!
//! ## Manifest form
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
//! ```

use super::error::GraphError;
use crate::helpers::process::shell_quote;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a `set-env` step writes its variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetMode {
    /// Replace any existing value.
    #[default]
    Overwrite,
    /// Place the value in front of the existing one, separated by the
    /// platform path separator.
    Prepend,
}

/// The installer used by an `install-packages` step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PackageManager {
    #[default]
    Apt,
    Pip,
    /// Any other command prefix; packages are appended as arguments.
    Command(String),
}

impl PackageManager {
    /// Full shell command installing `packages`.
    ///
    /// Each package is quoted as one word, so version specifiers such as
    /// `cython<3` reach the installer intact.
    pub fn command_line(&self, packages: &[String]) -> String {
        let prefix = match self {
            Self::Apt => "apt-get install -y --no-install-recommends",
            Self::Pip => "python3 -m pip install --no-cache-dir",
            Self::Command(cmd) => cmd.as_str(),
        };
        let args: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
        format!("{} {}", prefix, args.join(" "))
    }
}

impl From<String> for PackageManager {
    fn from(s: String) -> Self {
        match s.as_str() {
            "apt" | "apt-get" => Self::Apt,
            "pip" | "pip3" => Self::Pip,
            _ => Self::Command(s),
        }
    }
}

impl From<PackageManager> for String {
    fn from(m: PackageManager) -> Self {
        match m {
            PackageManager::Apt => "apt".to_string(),
            PackageManager::Pip => "pip".to_string(),
            PackageManager::Command(cmd) => cmd,
        }
    }
}

/// The action a step performs, with its parameters.
///
/// String parameters are expanded against the
/// [`EnvironmentContext`](super::context::EnvironmentContext) right before the
/// step runs, so `${artifact:patchelf}` or `${MUJOCO_VERSION}` resolve to
/// whatever earlier steps left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepKind {
    InstallPackages {
        #[serde(default)]
        manager: PackageManager,
        packages: Vec<String>,
    },
    FetchFile {
        url: String,
        dest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    },
    UnpackArchive {
        archive: String,
        dest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        expect: Vec<String>,
    },
    SetEnv {
        name: String,
        value: String,
        #[serde(default)]
        mode: SetMode,
    },
    RunInstaller {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    MakeExecutable {
        path: String,
    },
}

impl StepKind {
    /// Manifest name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InstallPackages { .. } => "install-packages",
            Self::FetchFile { .. } => "fetch-file",
            Self::UnpackArchive { .. } => "unpack-archive",
            Self::SetEnv { .. } => "set-env",
            Self::RunInstaller { .. } => "run-installer",
            Self::MakeExecutable { .. } => "make-executable",
        }
    }

    /// The path this kind naturally produces, before expansion.
    pub fn natural_output(&self) -> Option<&str> {
        match self {
            Self::FetchFile { dest, .. } | Self::UnpackArchive { dest, .. } => Some(dest),
            Self::MakeExecutable { path } => Some(path),
            _ => None,
        }
    }

    /// One-line summary for plans and progress output.
    pub fn describe(&self) -> String {
        match self {
            Self::InstallPackages { manager, packages } => {
                format!("{} install {}", String::from(manager.clone()), packages.join(" "))
            }
            Self::FetchFile { url, dest, .. } => format!("fetch {} -> {}", url, dest),
            Self::UnpackArchive { archive, dest, .. } => format!("unpack {} -> {}", archive, dest),
            Self::SetEnv { name, value, mode } => match mode {
                SetMode::Overwrite => format!("{}={}", name, value),
                SetMode::Prepend => format!("{}={}:${}", name, value, name),
            },
            Self::RunInstaller { command, .. } => format!("run `{}`", command),
            Self::MakeExecutable { path } => format!("chmod +x {}", path),
        }
    }
}

/// An artifact registered once the owning step succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provides {
    pub artifact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One declared provisioning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    id: String,
    #[serde(flatten)]
    kind: StepKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provides: Option<Provides>,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            requires: Vec::new(),
            provides: None,
        }
    }

    /// Add prerequisites (builder style).
    pub fn requires<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Declare the artifact this step leaves behind (builder style).
    pub fn provides(mut self, artifact: impl Into<String>, path: Option<&str>) -> Self {
        self.provides = Some(Provides {
            artifact: artifact.into(),
            path: path.map(str::to_string),
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn prerequisites(&self) -> &[String] {
        &self.requires
    }

    pub fn provided(&self) -> Option<&Provides> {
        self.provides.as_ref()
    }

    /// Static checks that do not need the rest of the graph.
    pub fn validate(&self) -> Result<(), GraphError> {
        let invalid = |reason: &str| GraphError::InvalidStep {
            step: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty identifier"));
        }

        match &self.kind {
            StepKind::InstallPackages { packages, .. } if packages.is_empty() => {
                return Err(invalid("no packages listed"));
            }
            StepKind::SetEnv { name, .. } if name.is_empty() || name.contains('=') => {
                return Err(invalid("variable name must be non-empty and contain no '='"));
            }
            StepKind::FetchFile { url, .. } if url.is_empty() => {
                return Err(invalid("empty url"));
            }
            StepKind::RunInstaller { command, .. } if command.trim().is_empty() => {
                return Err(invalid("empty command"));
            }
            _ => {}
        }

        if let Some(p) = &self.provides
            && p.path.is_none()
            && self.kind.natural_output().is_none()
        {
            return Err(GraphError::MissingArtifactPath {
                step: self.id.clone(),
                artifact: p.artifact.clone(),
            });
        }

        Ok(())
    }
}

impl fmt::Display for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.kind.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step_from_toml() {
        let spec: StepSpec = toml::from_str(
            r#"
id = "unpack-mujoco"
kind = "unpack-archive"
archive = "/tmp/mujoco.tar.gz"
dest = "/root/.mujoco"
expect = ["mujoco210/bin"]
requires = ["fetch-mujoco"]
provides = { artifact = "mujoco-binary", path = "mujoco210" }
"#,
        )
        .unwrap();

        assert_eq!(spec.id(), "unpack-mujoco");
        assert_eq!(spec.prerequisites(), ["fetch-mujoco"]);
        assert_eq!(spec.kind().name(), "unpack-archive");
        assert_eq!(spec.provided().unwrap().artifact, "mujoco-binary");
        match spec.kind() {
            StepKind::UnpackArchive { expect, format, .. } => {
                assert_eq!(expect, &["mujoco210/bin"]);
                assert!(format.is_none());
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_set_env_mode_defaults_to_overwrite() {
        let spec: StepSpec = toml::from_str(
            r#"
id = "log-level"
kind = "set-env"
name = "TF_CPP_MIN_LOG_LEVEL"
value = "3"
"#,
        )
        .unwrap();
        assert!(matches!(
            spec.kind(),
            StepKind::SetEnv { mode: SetMode::Overwrite, .. }
        ));
    }

    #[test]
    fn test_package_manager_from_string() {
        assert_eq!(PackageManager::from("apt".to_string()), PackageManager::Apt);
        assert_eq!(PackageManager::from("pip3".to_string()), PackageManager::Pip);
        assert_eq!(
            PackageManager::from("conda install -y".to_string()),
            PackageManager::Command("conda install -y".into())
        );
    }

    #[test]
    fn test_command_line_quotes_version_specifiers() {
        let cmd = PackageManager::Pip.command_line(&["mujoco-py<2.2,>=2.1".into(), "wheel".into()]);
        assert_eq!(
            cmd,
            "python3 -m pip install --no-cache-dir 'mujoco-py<2.2,>=2.1' wheel"
        );
    }

    #[test]
    fn test_validate_rejects_empty_packages() {
        let spec = StepSpec::new(
            "sys",
            StepKind::InstallPackages {
                manager: PackageManager::Apt,
                packages: vec![],
            },
        );
        assert!(matches!(spec.validate(), Err(GraphError::InvalidStep { .. })));
    }

    #[test]
    fn test_validate_requires_artifact_path_without_natural_output() {
        let spec = StepSpec::new(
            "build",
            StepKind::RunInstaller {
                command: "make".into(),
                cwd: None,
            },
        )
        .provides("tool", None);
        assert_eq!(
            spec.validate(),
            Err(GraphError::MissingArtifactPath {
                step: "build".into(),
                artifact: "tool".into()
            })
        );

        let spec = StepSpec::new(
            "chmod",
            StepKind::MakeExecutable {
                path: "/usr/local/bin/patchelf".into(),
            },
        )
        .provides("patchelf", None);
        assert!(spec.validate().is_ok());
    }
}
