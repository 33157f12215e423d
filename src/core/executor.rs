//! Ordered, fail-fast execution of a [`DependencyGraph`].
//!
//! Steps run one at a time in graph order against a single
//! [`EnvironmentContext`]. Before a step starts, every prerequisite must have
//! succeeded; otherwise it is skipped. The first failure aborts the run: every
//! step not yet attempted is recorded as skipped, and nothing already applied
//! is rolled back.
//!
//! Side effects live behind [`StepHandler`] so ordering and failure
//! propagation can be exercised without touching the system.

use super::context::EnvironmentContext;
use super::error::{ContextError, StepError};
use super::graph::DependencyGraph;
use super::handler::SystemHandler;
use super::output;
use super::report::{Outcome, ProvisionReport, StepRecord};
use super::step::{StepKind, StepSpec};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Performs the action of a single step.
pub trait StepHandler {
    fn execute(&self, step: &StepSpec, ctx: &mut EnvironmentContext) -> Result<(), StepError>;
}

impl<H: StepHandler + ?Sized> StepHandler for &H {
    fn execute(&self, step: &StepSpec, ctx: &mut EnvironmentContext) -> Result<(), StepError> {
        (**self).execute(step, ctx)
    }
}

pub struct Executor<H = SystemHandler> {
    handler: H,
    keep_going: bool,
}

impl Executor<SystemHandler> {
    /// Executor performing real work with the given timeouts.
    pub fn system(fetch_timeout: Duration, process_timeout: Duration) -> Self {
        Self::with_handler(SystemHandler::new(fetch_timeout, process_timeout))
    }
}

impl Default for Executor<SystemHandler> {
    fn default() -> Self {
        Self::with_handler(SystemHandler::default())
    }
}

impl<H: StepHandler> Executor<H> {
    pub fn with_handler(handler: H) -> Self {
        Self {
            handler,
            keep_going: false,
        }
    }

    /// Keep running steps unaffected by a failure instead of aborting.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Run every step of `graph` in order and report what happened.
    ///
    /// `context` is consumed; its final variables and artifacts are carried
    /// in the report.
    pub fn run(&self, graph: &DependencyGraph, mut context: EnvironmentContext) -> ProvisionReport {
        let total = graph.len();
        let mut outcomes: HashMap<&str, Outcome> = HashMap::with_capacity(total);
        let mut records = Vec::with_capacity(total);
        let mut aborted = false;

        for (i, step) in graph.ordered().enumerate() {
            let outcome_of = |id: &String| outcomes.get(id.as_str()).copied();
            let prereq_failed = step.prerequisites().iter().any(|p| {
                matches!(
                    outcome_of(p),
                    Some(Outcome::Failed | Outcome::SkippedDueToPrerequisite)
                )
            });
            let prereq_pending = step
                .prerequisites()
                .iter()
                .any(|p| outcome_of(p) != Some(Outcome::Succeeded));

            let record = if prereq_failed {
                output::skip(&format!("{} skipped (prerequisite failed)", step.id()));
                skipped(step, Outcome::SkippedDueToPrerequisite)
            } else if aborted || prereq_pending {
                skipped(step, Outcome::SkippedDueToAbort)
            } else {
                output::action_numbered(i + 1, total, step.id());
                output::sub_action(&step.kind().describe());

                let start = Instant::now();
                let result = self
                    .handler
                    .execute(step, &mut context)
                    .and_then(|()| register_provided(step, &mut context));
                let duration = start.elapsed();

                match result {
                    Ok(()) => StepRecord {
                        id: step.id().to_string(),
                        kind: step.kind().name(),
                        outcome: Outcome::Succeeded,
                        duration,
                        error: None,
                        error_kind: None,
                    },
                    Err(e) => {
                        output::error(&e.to_string());
                        if !self.keep_going {
                            aborted = true;
                        }
                        StepRecord {
                            id: step.id().to_string(),
                            kind: step.kind().name(),
                            outcome: Outcome::Failed,
                            duration,
                            error: Some(e.to_string()),
                            error_kind: Some(e.category()),
                        }
                    }
                }
            };

            outcomes.insert(step.id(), record.outcome);
            records.push(record);
        }

        ProvisionReport::new(records, context.written_vars(), context.artifacts().clone())
    }
}

fn skipped(step: &StepSpec, outcome: Outcome) -> StepRecord {
    StepRecord {
        id: step.id().to_string(),
        kind: step.kind().name(),
        outcome,
        duration: Duration::ZERO,
        error: None,
        error_kind: None,
    }
}

/// Register the step's declared artifact. Only called after success.
fn register_provided(step: &StepSpec, ctx: &mut EnvironmentContext) -> Result<(), StepError> {
    let Some(provides) = step.provided() else {
        return Ok(());
    };
    let env_err = |source: ContextError| StepError::Environment {
        step: step.id().to_string(),
        source,
    };

    let path: PathBuf = match (&provides.path, step.kind()) {
        (Some(rel), StepKind::UnpackArchive { dest, .. }) => {
            let rel = ctx.expand(rel).map_err(env_err)?;
            ctx.expand_path(dest).map_err(env_err)?.join(rel)
        }
        (Some(path), _) => ctx.expand_path(path).map_err(env_err)?,
        (None, kind) => {
            // Checked by StepSpec::validate when the graph was built.
            let natural = kind.natural_output().unwrap_or_default();
            ctx.expand_path(natural).map_err(env_err)?
        }
    };

    output::detail(&format!("artifact {} -> {}", provides.artifact, path.display()));
    ctx.register_artifact(&provides.artifact, path);
    Ok(())
}
