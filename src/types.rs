use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Severity of a finding. Ordered: low < medium < high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Numeric rank for sorting (higher = more severe).
    pub fn rank(self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// A severity gate. `None` means "never trip".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Threshold {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Threshold {
    fn rank(self) -> u8 {
        match self {
            Threshold::None => 0,
            Threshold::Low => 1,
            Threshold::Medium => 2,
            Threshold::High => 3,
        }
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Threshold::None => write!(f, "none"),
            Threshold::Low => write!(f, "low"),
            Threshold::Medium => write!(f, "medium"),
            Threshold::High => write!(f, "high"),
        }
    }
}

/// Returns true if `severity` is at or above the threshold.
/// A `None` threshold never trips, regardless of severity.
pub fn meets_threshold(severity: Severity, threshold: Threshold) -> bool {
    if threshold == Threshold::None {
        return false;
    }
    severity.rank() >= threshold.rank()
}

/// The kind of issue a finding describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Bug,
    Security,
    Performance,
    Correctness,
    Style,
    Maintainability,
    Testing,
    Docs,
}

/// A range of line numbers. `0` means "no line info".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// Where a finding was detected. `path` is relative to the repository root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hunk: Option<String>,
    pub lines: LineRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// A single code review finding.
///
/// The id is derived from the primary path, title, and start line, so two
/// findings describing the same issue at the same place share an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub category: Category,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub confidence: f64,
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

impl Finding {
    /// Path of the primary (first) location, or "" when there is none.
    pub fn path(&self) -> &str {
        self.locations.first().map(|l| l.path.as_str()).unwrap_or("")
    }

    /// Start line of the primary location, or 0 when there is none.
    pub fn start_line(&self) -> u32 {
        self.locations.first().map(|l| l.lines.start).unwrap_or(0)
    }

    /// Line range of the primary location.
    pub fn lines(&self) -> LineRange {
        self.locations.first().map(|l| l.lines).unwrap_or_default()
    }
}

/// Repository metadata echoed into the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub root: String,
    pub head: String,
    pub branch: String,
}

/// What was reviewed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputInfo {
    pub mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub range: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths_included: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths_excluded: Vec<String>,
}

/// Finding counts by severity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

/// Overview of the findings in a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub counts: SeverityCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highest_severity: Option<Severity>,
}

/// Wall-clock timings for one review run, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub git_ms: u64,
    pub llm_ms: u64,
    pub total_ms: u64,
}

/// Top-level output of a review run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub tool: String,
    pub version: String,
    pub run_id: String,
    pub repo: RepoInfo,
    pub inputs: InputInfo,
    pub summary: Summary,
    pub findings: Vec<Finding>,
    pub timing: Timing,
}

/// Calculates the summary from findings.
pub fn compute_summary(findings: &[Finding]) -> Summary {
    let mut summary = Summary::default();
    for f in findings {
        match f.severity {
            Severity::Low => summary.counts.low += 1,
            Severity::Medium => summary.counts.medium += 1,
            Severity::High => summary.counts.high += 1,
        }
        if summary.highest_severity.is_none_or(|s| f.severity > s) {
            summary.highest_severity = Some(f.severity);
        }
    }
    summary
}

/// Derive the stable finding id: the first 8 bytes of a SHA-256 over
/// `path:title:startLine`, hex-encoded.
pub fn generate_finding_id(finding: &Finding) -> String {
    let data = format!(
        "{}:{}:{}",
        finding.path(),
        finding.title,
        finding.start_line()
    );
    let digest = Sha256::digest(data.as_bytes());
    hex::encode(&digest[..8])
}

/// A fresh 32-hex-character identifier, unique per invocation.
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Removes duplicate findings by id, keeping the first occurrence.
pub fn dedupe_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen = std::collections::HashSet::new();
    findings
        .into_iter()
        .filter(|f| seen.insert(f.id.clone()))
        .collect()
}

/// Sorts findings by severity (high first), then path, then start line.
/// The sort is stable, so equal keys keep their insertion order.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then_with(|| a.path().cmp(b.path()))
            .then_with(|| a.start_line().cmp(&b.start_line()))
    });
}
