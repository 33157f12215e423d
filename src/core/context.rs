//! Mutable state shared by every step of one provisioning run.
//!
//! Holds environment variables, the working directory, and the artifact
//! registry. Steps see each other's writes in execution order. The context is
//! passed explicitly instead of mutating the process environment, and is
//! dropped when the run ends.

use super::error::ContextError;
use super::step::SetMode;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Separator used when prepending to search-path variables.
#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

const ARTIFACT_PREFIX: &str = "artifact:";

#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    vars: BTreeMap<String, String>,
    /// Variables written during this run
    written: BTreeSet<String>,
    artifacts: BTreeMap<String, PathBuf>,
    working_dir: PathBuf,
}

impl EnvironmentContext {
    /// An empty context rooted at the current directory.
    pub fn new() -> Self {
        Self {
            vars: BTreeMap::new(),
            written: BTreeSet::new(),
            artifacts: BTreeMap::new(),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// A context seeded with the environment of the current process.
    ///
    /// Seeded variables are not reported as written by the run.
    pub fn from_process_env() -> Self {
        let mut ctx = Self::new();
        ctx.vars.extend(std::env::vars());
        ctx
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Write a variable.
    ///
    /// In [`SetMode::Prepend`] the new value goes in front of the existing one,
    /// so the most recent prepend takes precedence at lookup time.
    pub fn set(&mut self, name: &str, value: &str, mode: SetMode) {
        let new = match (mode, self.vars.get(name)) {
            (SetMode::Prepend, Some(old)) if !old.is_empty() => {
                format!("{}{}{}", value, PATH_SEPARATOR, old)
            }
            _ => value.to_string(),
        };
        self.vars.insert(name.to_string(), new);
        self.written.insert(name.to_string());
    }

    pub fn get(&self, name: &str) -> Result<&str, ContextError> {
        self.vars
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ContextError::UndefinedVariable(name.to_string()))
    }

    pub fn register_artifact(&mut self, name: &str, path: impl Into<PathBuf>) {
        self.artifacts.insert(name.to_string(), path.into());
    }

    pub fn resolve_artifact(&self, name: &str) -> Result<&Path, ContextError> {
        self.artifacts
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| ContextError::UnknownArtifact(name.to_string()))
    }

    pub fn artifacts(&self) -> &BTreeMap<String, PathBuf> {
        &self.artifacts
    }

    /// Final values of every variable written during the run.
    pub fn written_vars(&self) -> BTreeMap<String, String> {
        self.written
            .iter()
            .filter_map(|k| self.vars.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// All variables, for handing to subprocesses.
    pub fn command_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Substitute `${NAME}`, `${artifact:NAME}` and a leading `~/`.
    ///
    /// `$$` produces a literal `$`; a `$` not followed by `{` or `$` is kept.
    pub fn expand(&self, input: &str) -> Result<String, ContextError> {
        let input = match input.strip_prefix("~/") {
            Some(rest) => match dirs::home_dir() {
                Some(home) => format!("{}/{}", home.display(), rest),
                None => input.to_string(),
            },
            None => input.to_string(),
        };

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_str();

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            if let Some(tail) = after.strip_prefix('$') {
                out.push('$');
                rest = tail;
            } else if let Some(tail) = after.strip_prefix('{') {
                let end = tail
                    .find('}')
                    .ok_or_else(|| ContextError::Unterminated(input.clone()))?;
                let key = &tail[..end];
                match key.strip_prefix(ARTIFACT_PREFIX) {
                    Some(artifact) => {
                        out.push_str(&self.resolve_artifact(artifact)?.to_string_lossy())
                    }
                    None => out.push_str(self.get(key)?),
                }
                rest = &tail[end + 1..];
            } else {
                out.push('$');
                rest = after;
            }
        }
        out.push_str(rest);

        Ok(out)
    }

    /// Expand `input` and resolve it against the working directory.
    pub fn expand_path(&self, input: &str) -> Result<PathBuf, ContextError> {
        Ok(self.resolve_path(self.expand(input)?))
    }

    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

impl Default for EnvironmentContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sep(parts: &[&str]) -> String {
        parts.join(&PATH_SEPARATOR.to_string())
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let mut ctx = EnvironmentContext::new();
        ctx.set("CUDA_DEVICE_ORDER", "FASTEST_FIRST", SetMode::Overwrite);
        ctx.set("CUDA_DEVICE_ORDER", "PCI_BUS_ID", SetMode::Overwrite);
        assert_eq!(ctx.get("CUDA_DEVICE_ORDER").unwrap(), "PCI_BUS_ID");
    }

    #[test]
    fn test_prepend_most_recent_first() {
        let mut ctx = EnvironmentContext::new();
        ctx.set("LD_LIBRARY_PATH", "/usr/lib", SetMode::Overwrite);
        ctx.set("LD_LIBRARY_PATH", "/v1", SetMode::Prepend);
        ctx.set("LD_LIBRARY_PATH", "/v2", SetMode::Prepend);
        assert_eq!(
            ctx.get("LD_LIBRARY_PATH").unwrap(),
            sep(&["/v2", "/v1", "/usr/lib"])
        );
    }

    #[test]
    fn test_prepend_to_unset_has_no_trailing_separator() {
        let mut ctx = EnvironmentContext::new();
        ctx.set("LIB_PATH", "/a", SetMode::Prepend);
        assert_eq!(ctx.get("LIB_PATH").unwrap(), "/a");
    }

    #[test]
    fn test_undefined_variable() {
        let ctx = EnvironmentContext::new();
        assert_eq!(
            ctx.get("NOPE"),
            Err(ContextError::UndefinedVariable("NOPE".into()))
        );
    }

    #[test]
    fn test_artifacts() {
        let mut ctx = EnvironmentContext::new();
        assert!(matches!(
            ctx.resolve_artifact("patchelf"),
            Err(ContextError::UnknownArtifact(_))
        ));
        ctx.register_artifact("patchelf", "/usr/local/bin/patchelf");
        assert_eq!(
            ctx.resolve_artifact("patchelf").unwrap(),
            Path::new("/usr/local/bin/patchelf")
        );
    }

    #[test]
    fn test_written_vars_excludes_seeded() {
        let mut ctx = EnvironmentContext::from_process_env();
        ctx.set("XLA_PYTHON_CLIENT_PREALLOCATE", "false", SetMode::Overwrite);
        let written = ctx.written_vars();
        assert_eq!(written.len(), 1);
        assert_eq!(written["XLA_PYTHON_CLIENT_PREALLOCATE"], "false");
    }

    #[test]
    fn test_expand_variables_and_artifacts() {
        let mut ctx = EnvironmentContext::new();
        ctx.set("MUJOCO_VERSION", "210", SetMode::Overwrite);
        ctx.register_artifact("patchelf", "/usr/local/bin/patchelf");

        assert_eq!(
            ctx.expand("mujoco${MUJOCO_VERSION}-linux.tar.gz").unwrap(),
            "mujoco210-linux.tar.gz"
        );
        assert_eq!(
            ctx.expand("${artifact:patchelf} --version").unwrap(),
            "/usr/local/bin/patchelf --version"
        );
        assert_eq!(ctx.expand("cost $$5 and $HOME").unwrap(), "cost $5 and $HOME");
    }

    #[test]
    fn test_expand_errors() {
        let ctx = EnvironmentContext::new();
        assert_eq!(
            ctx.expand("${MISSING}"),
            Err(ContextError::UndefinedVariable("MISSING".into()))
        );
        assert_eq!(
            ctx.expand("${artifact:mujoco-binary}/bin"),
            Err(ContextError::UnknownArtifact("mujoco-binary".into()))
        );
        assert!(matches!(
            ctx.expand("${OPEN"),
            Err(ContextError::Unterminated(_))
        ));
    }

    #[test]
    fn test_expand_path_uses_working_dir() {
        let ctx = EnvironmentContext::new().with_working_dir("/workspace");
        assert_eq!(
            ctx.expand_path("requirements.txt").unwrap(),
            PathBuf::from("/workspace/requirements.txt")
        );
        assert_eq!(ctx.expand_path("/etc/hosts").unwrap(), PathBuf::from("/etc/hosts"));
    }
}
