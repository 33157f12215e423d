//! Provision CLI - ordered, fail-fast environment provisioning
//!
//! Usage:
//!   provision run [manifest]       Execute every step and print the report
//!   provision plan [manifest]      Show the resolved execution order
//!   provision check [manifest]     Validate the manifest without running it

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mlenv_provision::core::manifest::clamp_timeout;
use mlenv_provision::core::handler::{DEFAULT_FETCH_TIMEOUT, DEFAULT_PROCESS_TIMEOUT};
use mlenv_provision::{
    DependencyGraph, EnvironmentContext, Executor, Manifest, ProvisionReport, output,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

const EXIT_OK: u8 = 0;
/// Exit status when a step failed
const EXIT_FAILED: u8 = 1;
/// Exit status for configuration errors (nothing was run)
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "provision")]
#[command(about = "Ordered, fail-fast provisioning of an ML research environment")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory searched when the manifest is given as a bare name
    #[arg(short = 'r', long, global = true, env = "PROVISION_RECIPES", default_value = "recipes")]
    recipes_dir: PathBuf,
}

#[derive(Args)]
struct ManifestArg {
    /// Manifest path, or a name resolved as <recipes-dir>/<name>.toml
    #[arg(env = "PROVISION_MANIFEST", default_value = "provision.toml")]
    manifest: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every step in dependency order
    Run {
        #[command(flatten)]
        manifest: ManifestArg,

        /// Continue with unaffected steps after a failure
        #[arg(short = 'k', long)]
        keep_going: bool,

        /// Start from an empty environment instead of the process environment
        #[arg(long)]
        clean_env: bool,

        /// Download timeout in seconds
        #[arg(long, env = "PROVISION_FETCH_TIMEOUT")]
        fetch_timeout: Option<u64>,

        /// Installer timeout in seconds
        #[arg(long, env = "PROVISION_PROCESS_TIMEOUT")]
        process_timeout: Option<u64>,

        /// Write the report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the execution order without running anything
    Plan {
        #[command(flatten)]
        manifest: ManifestArg,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the manifest and its dependency graph
    Check {
        #[command(flatten)]
        manifest: ManifestArg,
    },
}

/// Options of the `run` command
struct RunOptions {
    keep_going: bool,
    clean_env: bool,
    fetch_timeout: Option<u64>,
    process_timeout: Option<u64>,
    report: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            manifest,
            keep_going,
            clean_env,
            fetch_timeout,
            process_timeout,
            report,
        } => {
            let path = resolve_manifest(&manifest.manifest, &cli.recipes_dir)?;
            let options = RunOptions {
                keep_going,
                clean_env,
                fetch_timeout,
                process_timeout,
                report,
            };
            Ok(ExitCode::from(run_manifest(&path, &options)?))
        }

        Commands::Plan { manifest, json } => {
            let path = resolve_manifest(&manifest.manifest, &cli.recipes_dir)?;
            let manifest = Manifest::read(&path)?;
            let Some(graph) = build_graph(&manifest) else {
                return Ok(ExitCode::from(EXIT_CONFIG));
            };

            if json {
                let plan = serde_json::json!({
                    "image": manifest.image,
                    "vars": manifest.vars,
                    "steps": graph.ordered().collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&manifest, &graph);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Check { manifest } => {
            let path = resolve_manifest(&manifest.manifest, &cli.recipes_dir)?;
            let manifest = Manifest::read(&path)?;
            match build_graph(&manifest) {
                Some(graph) => {
                    output::success(&format!("{}: {} step(s), no cycles", path.display(), graph.len()));
                    Ok(ExitCode::SUCCESS)
                }
                None => Ok(ExitCode::from(EXIT_CONFIG)),
            }
        }
    }
}

/// Provision from the manifest at `path` and return the process exit status.
fn run_manifest(path: &Path, options: &RunOptions) -> Result<u8> {
    let manifest = Manifest::read(path)?;
    let Some(graph) = build_graph(&manifest) else {
        return Ok(EXIT_CONFIG);
    };

    let fetch_timeout = effective_timeout(
        options.fetch_timeout,
        manifest.fetch_timeout(),
        DEFAULT_FETCH_TIMEOUT,
    );
    let process_timeout = effective_timeout(
        options.process_timeout,
        manifest.process_timeout(),
        DEFAULT_PROCESS_TIMEOUT,
    );

    let base = if options.clean_env {
        EnvironmentContext::new()
    } else {
        EnvironmentContext::from_process_env()
    };
    let context = manifest.prepare_context(base);

    output::action(&format!("Provisioning {}", path.display()));
    if let Some(image) = &manifest.image.base {
        output::info(&format!("base image: {}", image));
    }

    let result = Executor::system(fetch_timeout, process_timeout)
        .keep_going(options.keep_going)
        .run(&graph, context);

    result.print();

    if let Some(report_path) = &options.report {
        let json = result.to_json().context("Failed to serialize report")?;
        std::fs::write(report_path, json)
            .with_context(|| format!("Failed to write report: {}", report_path.display()))?;
        output::detail(&format!("report written to {}", report_path.display()));
    }

    Ok(run_status(&result))
}

/// A command-line timeout wins over the manifest's, which wins over the default.
fn effective_timeout(flag: Option<u64>, manifest: Option<Duration>, default: Duration) -> Duration {
    flag.map(clamp_timeout).or(manifest).unwrap_or(default)
}

fn run_status(report: &ProvisionReport) -> u8 {
    if report.is_success() { EXIT_OK } else { EXIT_FAILED }
}

/// Build the graph, printing configuration errors instead of propagating them.
fn build_graph(manifest: &Manifest) -> Option<DependencyGraph> {
    match manifest.graph() {
        Ok(graph) => Some(graph),
        Err(e) => {
            output::error(&e.to_string());
            None
        }
    }
}

fn print_plan(manifest: &Manifest, graph: &DependencyGraph) {
    use owo_colors::OwoColorize;

    if let Some(base) = &manifest.image.base {
        output::info(&format!("base image: {}", base.bold()));
    }
    if !manifest.image.expose.is_empty() {
        let ports: Vec<String> = manifest.image.expose.iter().map(u16::to_string).collect();
        output::info(&format!("exposed ports: {}", ports.join(", ")));
    }
    if !manifest.image.entrypoint.is_empty() {
        output::info(&format!("entrypoint: {}", manifest.image.entrypoint.join(" ")));
    }

    output::action(&format!("Execution order ({} steps)", graph.len()));
    for (i, step) in graph.ordered().enumerate() {
        println!(
            "  {:>2}. {} {}",
            i + 1,
            step.id().bold(),
            format!("[{}]", step.kind().name()).dimmed()
        );
        println!("      {}", step.kind().describe().dimmed());
        if !step.prerequisites().is_empty() {
            println!(
                "      {} {}",
                "after:".cyan(),
                step.prerequisites().join(", ")
            );
        }
    }
}

/// Validate a manifest name to prevent path traversal
fn validate_manifest_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("Manifest name cannot be empty");
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        anyhow::bail!(
            "Invalid manifest name '{}': only alphanumeric characters, underscores, and hyphens are allowed",
            name
        );
    }
    Ok(())
}

/// Resolve a manifest argument to a file path
fn resolve_manifest(manifest: &str, recipes_dir: &Path) -> Result<PathBuf> {
    let is_explicit_path =
        manifest.contains('/') || manifest.contains('\\') || manifest.ends_with(".toml");

    if is_explicit_path {
        let as_path = PathBuf::from(manifest);
        if as_path.exists() {
            return Ok(as_path);
        }
        anyhow::bail!("Manifest file not found: {}", manifest);
    }

    validate_manifest_name(manifest)?;

    let candidate = recipes_dir.join(format!("{}.toml", manifest));
    if candidate.exists() {
        return Ok(candidate);
    }

    anyhow::bail!(
        "Manifest not found: {}\nSearched in: {}",
        manifest,
        recipes_dir.display()
    )
}
