//! Run summary, rendered as Markdown for people or JSON for tooling

use super::state::TransformState;
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Success,
    DryRun,
    Failed,
}

/// Outcome for one transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformReport {
    pub name: String,
    pub output_file: String,
    pub state: TransformState,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransformReport {
    pub fn new(name: impl Into<String>, output_file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_file: output_file.into(),
            state: TransformState::Pending,
            duration_ms: 0,
            warnings: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub output_root: String,
    pub status: RunStatus,
    pub transformations: Vec<TransformReport>,
    /// Run-level warnings (pre-flight, manifest, recovery of an earlier run)
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Files promoted into the output tree by this run
    #[serde(default)]
    pub files_committed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_steps: Vec<String>,
}

impl SyncReport {
    pub fn new(output_root: impl Into<String>) -> Self {
        Self {
            started_at: Utc::now(),
            duration_ms: 0,
            output_root: output_root.into(),
            status: RunStatus::Success,
            transformations: Vec::new(),
            warnings: Vec::new(),
            files_committed: Vec::new(),
            error: None,
            error_kind: None,
            recovery_steps: Vec::new(),
        }
    }

    pub fn executed(&self) -> usize {
        self.count(|s| !matches!(s, TransformState::Skipped | TransformState::Pending))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| s == TransformState::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| s == TransformState::Failed)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
            + self
                .transformations
                .iter()
                .map(|t| t.warnings.len())
                .sum::<usize>()
    }

    pub fn transformation(&self, name: &str) -> Option<&TransformReport> {
        self.transformations.iter().find(|t| t.name == name)
    }

    fn count(&self, pred: impl Fn(TransformState) -> bool) -> usize {
        self.transformations.iter().filter(|t| pred(t.state)).count()
    }

    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Markdown => self.to_markdown(),
            ReportFormat::Json => self.to_json(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Sync report\n");
        let _ = writeln!(out, "- Status: **{}**", self.status);
        let _ = writeln!(out, "- Output root: `{}`", self.output_root);
        let _ = writeln!(
            out,
            "- Transformations: {} executed, {} skipped, {} failed",
            self.executed(),
            self.skipped(),
            self.failed()
        );
        let _ = writeln!(out, "- Files committed: {}", self.files_committed.len());
        let _ = writeln!(out, "- Duration: {} ms", self.duration_ms);

        if !self.transformations.is_empty() {
            out.push_str("\n| Transformation | Output | State | Duration (ms) |\n");
            out.push_str("|---|---|---|---|\n");
            for t in &self.transformations {
                let _ = writeln!(
                    out,
                    "| {} | `{}` | {} | {} |",
                    t.name, t.output_file, t.state, t.duration_ms
                );
            }
        }

        let warnings: Vec<String> = self
            .warnings
            .iter()
            .cloned()
            .chain(self.transformations.iter().flat_map(|t| {
                t.warnings.iter().map(move |w| format!("{}: {w}", t.name))
            }))
            .collect();
        if !warnings.is_empty() {
            out.push_str("\n## Warnings\n\n");
            for warning in &warnings {
                let _ = writeln!(out, "- {warning}");
            }
        }

        if let Some(error) = &self.error {
            out.push_str("\n## Error\n\n");
            match self.error_kind {
                Some(kind) => {
                    let _ = writeln!(out, "**{}**: {error}", kind.title());
                }
                None => {
                    let _ = writeln!(out, "{error}");
                }
            }
            for t in self.transformations.iter().filter(|t| t.error.is_some()) {
                let _ = writeln!(out, "- {}: {}", t.name, t.error.as_deref().unwrap_or_default());
            }
        }

        if !self.recovery_steps.is_empty() {
            out.push_str("\n## Recovery steps\n\n");
            for step in &self.recovery_steps {
                let _ = writeln!(out, "{step}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> SyncReport {
        let mut report = SyncReport::new("out");
        let mut docs = TransformReport::new("docs", "docs/spec.md");
        docs.state = TransformState::Committed;
        docs.warnings.push("Line 3: Duplicate heading: Intro".to_string());
        let mut api = TransformReport::new("api", "api.json");
        api.state = TransformState::Skipped;
        report.transformations = vec![docs, api];
        report.files_committed = vec!["docs/spec.md".to_string()];
        report
    }

    #[test]
    fn counts_by_state() {
        let report = report();
        assert_eq!(report.executed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn markdown_lists_transformations_and_warnings() {
        let md = report().to_markdown();
        assert!(md.contains("1 executed, 1 skipped, 0 failed"));
        assert!(md.contains("| docs | `docs/spec.md` | committed |"));
        assert!(md.contains("- docs: Line 3: Duplicate heading: Intro"));
        assert!(!md.contains("## Error"));
    }

    #[test]
    fn json_uses_snake_case_states() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["transformations"][1]["state"], "skipped");
    }

    #[test]
    fn failed_report_renders_error_and_steps() {
        let mut report = report();
        report.status = RunStatus::Failed;
        report.error = Some("sync cancelled before commit".to_string());
        report.error_kind = Some(ErrorKind::Cancelled);
        report.recovery_steps = vec!["1. Retry sync operation".to_string()];
        let md = report.render(ReportFormat::Markdown);
        assert!(md.contains("**Sync Cancelled**: sync cancelled before commit"));
        assert!(md.contains("## Recovery steps\n\n1. Retry sync operation"));
    }
}
