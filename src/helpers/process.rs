//! Subprocess execution with a bounded timeout.
//!
//! Installers are run through `sh -c` with the provisioning environment and a
//! null stdin. Output streams straight to the terminal so the build log shows
//! installer progress. A process that outlives its timeout is killed and
//! reported as a failure.

use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

fn runtime() -> &'static tokio::runtime::Runtime {
    static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .enable_io()
            .build()
            .expect("failed to build tokio runtime for subprocess timeouts")
    })
}

/// Shell-quote a single word for interpolation into an `sh -c` command.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '=' | ':' | '+'))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Run `command` via `sh -c` in `cwd` with exactly the variables in `env`.
pub fn run_shell<'a, I>(command: &str, cwd: &Path, env: I, timeout: Duration) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    if !cwd.is_dir() {
        bail!("working directory does not exist: {}", cwd.display());
    }

    let mut cmd = tokio::process::Command::new("sh");
    cmd.args(["-c", command])
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    runtime().block_on(async move {
        let mut child = cmd
            .spawn()
            .with_context(|| format!("command failed to start: {}", command))?;

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.context("failed waiting for subprocess")?,
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return Err(anyhow!(
                    "command timed out after {}s\n  command: {}",
                    timeout.as_secs(),
                    command
                ));
            }
        };

        if !status.success() {
            bail!(
                "command failed with exit code: {:?}\n  command: {}\n  in: {}",
                status.code(),
                command,
                cwd.display()
            );
        }
        Ok(())
    })
}
