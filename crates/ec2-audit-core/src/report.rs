//! Per-instance compliance reports and the run summary

use serde::Serialize;
use std::fmt;

/// Result of one rule applied to one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    rule: String,
    passed: bool,
}

impl Verdict {
    pub fn new(rule: impl Into<String>, passed: bool) -> Self {
        Self {
            rule: rule.into(),
            passed,
        }
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    pub fn passed(&self) -> bool {
        self.passed
    }
}

/// Verdicts for one instance, in rule registration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_name: Option<String>,
    verdicts: Vec<Verdict>,
    /// Why volume data was unavailable, when volume rules failed closed
    #[serde(skip_serializing_if = "Option::is_none")]
    volume_error: Option<String>,
    /// Why the latest image could not be determined
    #[serde(skip_serializing_if = "Option::is_none")]
    image_error: Option<String>,
}

impl Report {
    pub fn new(
        instance_id: impl Into<String>,
        instance_name: Option<String>,
        verdicts: Vec<Verdict>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            instance_name,
            verdicts,
            volume_error: None,
            image_error: None,
        }
    }

    pub fn with_volume_error(mut self, reason: Option<String>) -> Self {
        self.volume_error = reason;
        self
    }

    pub fn with_image_error(mut self, reason: Option<String>) -> Self {
        self.image_error = reason;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    pub fn verdicts(&self) -> &[Verdict] {
        &self.verdicts
    }

    pub fn volume_error(&self) -> Option<&str> {
        self.volume_error.as_deref()
    }

    pub fn image_error(&self) -> Option<&str> {
        self.image_error.as_deref()
    }

    /// True if every rule passed
    pub fn compliant(&self) -> bool {
        self.verdicts.iter().all(Verdict::passed)
    }

    /// Verdict for a rule by name
    pub fn verdict(&self, rule: &str) -> Option<bool> {
        self.verdicts
            .iter()
            .find(|v| v.rule == rule)
            .map(Verdict::passed)
    }
}

/// Overall run outcome, in monitoring-plugin terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Ok,
    Critical,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Ok => f.write_str("OK"),
            RunStatus::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// Instance counts of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Instances in any state returned by the provider
    pub all_instances: usize,
    /// Instances that were audited
    pub running_instances: usize,
    pub compliant_instances: usize,
}

impl Summary {
    /// Summarize audited reports out of `all_instances` listed instances
    pub fn new(all_instances: usize, reports: &[Report]) -> Self {
        Self {
            all_instances: all_instances.max(reports.len()),
            running_instances: reports.len(),
            compliant_instances: reports.iter().filter(|r| r.compliant()).count(),
        }
    }

    pub fn non_compliant(&self) -> usize {
        self.running_instances - self.compliant_instances
    }

    /// `Ok` when every audited instance is compliant (including an empty fleet)
    pub fn status(&self) -> RunStatus {
        if self.non_compliant() == 0 {
            RunStatus::Ok
        } else {
            RunStatus::Critical
        }
    }

    pub fn perfdata(&self) -> String {
        format!(
            "all_instances={} running_instances={} compliant_instances={}",
            self.all_instances, self.running_instances, self.compliant_instances
        )
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.status(), self.perfdata())
    }
}

/// Reports of one audit run together with its summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRun {
    reports: Vec<Report>,
    summary: Summary,
}

impl AuditRun {
    pub fn new(all_instances: usize, reports: Vec<Report>) -> Self {
        let summary = Summary::new(all_instances, &reports);
        Self { reports, summary }
    }

    /// Reports in inventory order
    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }
}
