//! The step handler that performs real side effects.

use super::context::EnvironmentContext;
use super::error::{ContextError, StepError};
use super::executor::StepHandler;
use super::output;
use super::step::{StepKind, StepSpec};
use crate::helpers::{extract, fetch, fs, process};
use std::time::Duration;

/// Default timeout for a single download
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Default timeout for a single installer invocation
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(3600);

/// Runs steps against the real filesystem, network and process table.
#[derive(Debug, Clone)]
pub struct SystemHandler {
    fetch_timeout: Duration,
    process_timeout: Duration,
}

impl SystemHandler {
    pub fn new(fetch_timeout: Duration, process_timeout: Duration) -> Self {
        Self {
            fetch_timeout,
            process_timeout,
        }
    }

    fn run_command(
        &self,
        id: &str,
        command: &str,
        cwd: Option<&str>,
        ctx: &EnvironmentContext,
    ) -> Result<(), StepError> {
        let env_err = |source: ContextError| StepError::Environment {
            step: id.to_string(),
            source,
        };
        let cwd = match cwd {
            Some(dir) => ctx.expand_path(dir).map_err(env_err)?,
            None => ctx.working_dir().to_path_buf(),
        };

        output::detail(command);
        process::run_shell(command, &cwd, ctx.command_env(), self.process_timeout).map_err(
            |cause| StepError::Installer {
                step: id.to_string(),
                cause,
            },
        )
    }
}

impl Default for SystemHandler {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT, DEFAULT_PROCESS_TIMEOUT)
    }
}

impl StepHandler for SystemHandler {
    fn execute(&self, step: &StepSpec, ctx: &mut EnvironmentContext) -> Result<(), StepError> {
        let id = step.id();
        let env_err = |source: ContextError| StepError::Environment {
            step: id.to_string(),
            source,
        };

        match step.kind() {
            StepKind::InstallPackages { manager, packages } => {
                let packages = packages
                    .iter()
                    .map(|p| ctx.expand(p))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(env_err)?;
                let command = manager.command_line(&packages);
                self.run_command(id, &command, None, ctx)
            }

            StepKind::FetchFile { url, dest, sha256 } => {
                let url = ctx.expand(url).map_err(env_err)?;
                let dest = ctx.expand_path(dest).map_err(env_err)?;
                fetch::fetch(&url, &dest, self.fetch_timeout, sha256.as_deref())
                    .map(|_| ())
                    .map_err(|cause| StepError::Fetch {
                        step: id.to_string(),
                        cause,
                    })
            }

            StepKind::UnpackArchive {
                archive,
                dest,
                format,
                expect,
            } => {
                let archive = ctx.expand_path(archive).map_err(env_err)?;
                let dest = ctx.expand_path(dest).map_err(env_err)?;
                let expect = expect
                    .iter()
                    .map(|e| ctx.expand(e))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(env_err)?;
                extract::unpack(&archive, &dest, format.as_deref(), &expect).map_err(|cause| {
                    StepError::Unpack {
                        step: id.to_string(),
                        cause,
                    }
                })
            }

            StepKind::SetEnv { name, value, mode } => {
                let value = ctx.expand(value).map_err(env_err)?;
                ctx.set(name, &value, *mode);
                output::detail(&format!("{}={}", name, ctx.get(name).unwrap_or_default()));
                Ok(())
            }

            StepKind::RunInstaller { command, cwd } => {
                let command = ctx.expand(command).map_err(env_err)?;
                self.run_command(id, &command, cwd.as_deref(), ctx)
            }

            StepKind::MakeExecutable { path } => {
                let path = ctx.expand_path(path).map_err(env_err)?;
                fs::make_executable(&path).map_err(|cause| StepError::Permission {
                    step: id.to_string(),
                    cause,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::{PackageManager, SetMode};
    use tempfile::TempDir;

    fn ctx_in(dir: &TempDir) -> EnvironmentContext {
        let mut ctx = EnvironmentContext::new().with_working_dir(dir.path());
        ctx.set("PATH", "/usr/local/bin:/usr/bin:/bin", SetMode::Overwrite);
        ctx
    }

    #[test]
    fn test_set_env_expands_value() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx_in(&dir);
        ctx.register_artifact("mujoco-binary", "/root/.mujoco/mujoco210");
        let step = StepSpec::new(
            "lib-path",
            StepKind::SetEnv {
                name: "LD_LIBRARY_PATH".into(),
                value: "${artifact:mujoco-binary}/bin".into(),
                mode: SetMode::Prepend,
            },
        );

        SystemHandler::default().execute(&step, &mut ctx).unwrap();
        assert_eq!(ctx.get("LD_LIBRARY_PATH").unwrap(), "/root/.mujoco/mujoco210/bin");
    }

    #[test]
    fn test_installer_sees_context_env() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx_in(&dir);
        ctx.set("MUJOCO_PY_MUJOCO_PATH", "/opt/mujoco", SetMode::Overwrite);
        let step = StepSpec::new(
            "probe",
            StepKind::RunInstaller {
                command: r#"test "$MUJOCO_PY_MUJOCO_PATH" = /opt/mujoco"#.into(),
                cwd: None,
            },
        );
        SystemHandler::default().execute(&step, &mut ctx).unwrap();
    }

    #[test]
    fn test_install_packages_failure_is_installer_error() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx_in(&dir);
        let step = StepSpec::new(
            "pip",
            StepKind::InstallPackages {
                manager: PackageManager::Command("false".into()),
                packages: vec!["mujoco-py".into()],
            },
        );
        let err = SystemHandler::default().execute(&step, &mut ctx).unwrap_err();
        assert!(matches!(err, StepError::Installer { ref step, .. } if step == "pip"));
    }

    #[test]
    fn test_install_packages_passes_specifiers_as_single_args() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx_in(&dir);
        ctx.set("MUJOCO_PY_MAX", "2.2", SetMode::Overwrite);
        let step = StepSpec::new(
            "mujoco-py",
            StepKind::InstallPackages {
                manager: PackageManager::Command("printf '%s\\n' >> args.txt".into()),
                packages: vec!["mujoco-py<${MUJOCO_PY_MAX},>=2.1".into(), "cython<3".into()],
            },
        );

        SystemHandler::default().execute(&step, &mut ctx).unwrap();

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(args, "mujoco-py<2.2,>=2.1\ncython<3\n");
        assert!(!dir.path().join("=2.1").exists());
    }

    #[test]
    fn test_make_executable_missing_is_permission_error() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx_in(&dir);
        let step = StepSpec::new(
            "chmod-patchelf",
            StepKind::MakeExecutable {
                path: "bin/patchelf".into(),
            },
        );
        let err = SystemHandler::default().execute(&step, &mut ctx).unwrap_err();
        assert_eq!(err.category(), "permission");
    }

    #[test]
    fn test_undefined_variable_is_environment_error() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx_in(&dir);
        let step = StepSpec::new(
            "fetch",
            StepKind::FetchFile {
                url: "https://example.invalid/mujoco${MUJOCO_VERSION}.tar.gz".into(),
                dest: "mujoco.tar.gz".into(),
                sha256: None,
            },
        );
        let err = SystemHandler::default().execute(&step, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            StepError::Environment {
                source: ContextError::UndefinedVariable(_),
                ..
            }
        ));
    }
}
