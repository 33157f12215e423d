//! Outcome record of one provisioning run.

use super::output;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// What happened to a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Succeeded,
    Failed,
    /// A prerequisite failed or was itself skipped for that reason.
    SkippedDueToPrerequisite,
    /// The run was aborted by an unrelated failure before this step started.
    SkippedDueToAbort,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::SkippedDueToPrerequisite => "skipped (prerequisite failed)",
            Self::SkippedDueToAbort => "skipped (aborted)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub id: String,
    pub kind: &'static str,
    pub outcome: Outcome,
    #[serde(serialize_with = "serialize_millis", rename = "duration_ms")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Category of the failure (`fetch`, `installer`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Per-step outcomes plus the environment the run produced.
///
/// Built once by the executor; read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    steps: Vec<StepRecord>,
    environment: BTreeMap<String, String>,
    artifacts: BTreeMap<String, PathBuf>,
}

impl ProvisionReport {
    pub(crate) fn new(
        steps: Vec<StepRecord>,
        environment: BTreeMap<String, String>,
        artifacts: BTreeMap<String, PathBuf>,
    ) -> Self {
        Self {
            steps,
            environment,
            artifacts,
        }
    }

    /// Records in execution order, skipped steps included.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Variables written during the run, with their final values.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn artifacts(&self) -> &BTreeMap<String, PathBuf> {
        &self.artifacts
    }

    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.outcome == Outcome::Succeeded)
    }

    /// The first failed step, if any.
    pub fn failed(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.outcome == Outcome::Failed)
    }

    pub fn outcome_of(&self, id: &str) -> Option<Outcome> {
        self.steps.iter().find(|s| s.id == id).map(|s| s.outcome)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.steps.iter().filter(|s| s.outcome == outcome).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Print a human-readable summary.
    pub fn print(&self) {
        output::action("Provisioning report");
        for record in &self.steps {
            output::report_line(
                &record.id,
                record.outcome,
                record.duration,
                record.error.as_deref(),
            );
        }

        if !self.environment.is_empty() {
            output::info("Environment");
            for (k, v) in &self.environment {
                output::detail(&format!("{}={}", k, v));
            }
        }
        if !self.artifacts.is_empty() {
            output::info("Artifacts");
            for (k, v) in &self.artifacts {
                output::detail(&format!("{} -> {}", k, v.display()));
            }
        }

        let total = self.steps.len();
        let ok = self.count(Outcome::Succeeded);
        if self.is_success() {
            output::success(&format!("{} step(s) succeeded", total));
        } else {
            output::error(&format!(
                "{}/{} step(s) succeeded, {} failed, {} skipped",
                ok,
                total,
                self.count(Outcome::Failed),
                self.count(Outcome::SkippedDueToPrerequisite) + self.count(Outcome::SkippedDueToAbort)
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, outcome: Outcome) -> StepRecord {
        StepRecord {
            id: id.into(),
            kind: "fetch-file",
            outcome,
            duration: Duration::from_millis(1500),
            error: (outcome == Outcome::Failed).then(|| "boom".to_string()),
            error_kind: (outcome == Outcome::Failed).then_some("fetch"),
        }
    }

    #[test]
    fn test_queries() {
        let report = ProvisionReport::new(
            vec![
                record("a", Outcome::Succeeded),
                record("b", Outcome::Failed),
                record("c", Outcome::SkippedDueToPrerequisite),
                record("d", Outcome::SkippedDueToAbort),
            ],
            BTreeMap::new(),
            BTreeMap::new(),
        );
        assert!(!report.is_success());
        assert_eq!(report.failed().unwrap().id, "b");
        assert_eq!(report.outcome_of("c"), Some(Outcome::SkippedDueToPrerequisite));
        assert_eq!(report.outcome_of("zzz"), None);
        assert_eq!(report.count(Outcome::SkippedDueToAbort), 1);
    }

    #[test]
    fn test_json_shape() {
        let report = ProvisionReport::new(
            vec![record("a", Outcome::Failed)],
            BTreeMap::from([("LIB_PATH".to_string(), "/b:/a".to_string())]),
            BTreeMap::new(),
        );
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["steps"][0]["outcome"], "failed");
        assert_eq!(json["steps"][0]["duration_ms"], 1500);
        assert_eq!(json["steps"][0]["error"], "boom");
        assert_eq!(json["steps"][0]["error_kind"], "fetch");
        assert_eq!(json["environment"]["LIB_PATH"], "/b:/a");
    }
}
